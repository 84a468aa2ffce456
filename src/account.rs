use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RelayError;

/// Deposit method an account has configured for content delivery.
///
/// Mirrors the validation the original account model performed on its
/// `sword.deposit_method` setter: only these two strings (case-insensitive,
/// surrounding whitespace trimmed) are accepted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepositMethod {
    SingleZipFile,
    IndividualFiles,
}

impl DepositMethod {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        match raw.trim().to_lowercase().as_str() {
            "single zip file" => Ok(DepositMethod::SingleZipFile),
            "individual files" => Ok(DepositMethod::IndividualFiles),
            other => Err(RelayError::Config(format!(
                "sword deposit method must be 'single zip file' or 'individual files', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwordCredentials {
    pub collection: Url,
    pub username: String,
    pub password: String,
    pub deposit_method: DepositMethod,
}

/// Identity, credentials, and deposit configuration for one subscribing
/// account (§3). Lifecycle is externally managed; the engine only reads.
///
/// `sword` is absent for an account that exists in the store but hasn't had
/// sword credentials configured yet — `add_sword_credentials` is a distinct
/// step from account creation in the original model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub api_key: String,
    /// Ordered list of supported packaging formats; selection precedence is
    /// list order (§4.3 variant selection).
    pub packaging: Vec<String>,
    #[serde(default)]
    pub sword: Option<SwordCredentials>,
    pub repository_software: String,
}

impl Account {
    /// True iff `sword.collection` is present and non-empty (§3).
    pub fn is_sword_activated(&self) -> bool {
        match &self.sword {
            Some(sword) => !sword.collection.as_str().trim().is_empty(),
            None => false,
        }
    }

    pub fn is_eprints(&self) -> bool {
        self.repository_software.eq_ignore_ascii_case("eprints")
    }
}
