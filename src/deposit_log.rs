use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::AccountStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub text: String,
    pub notification: Option<String>,
    pub deposit_record_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-pass, per-account aggregate log. One fresh instance is created at the
/// start of `process_account` and sealed with a terminal `status` before
/// being persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDepositLog {
    pub id: String,
    pub repo: String,
    #[serde(default)]
    pub status: Option<AccountStatus>,
    #[serde(default)]
    pub messages: Vec<LogEntry>,
    pub last_updated: DateTime<Utc>,
}

impl RepositoryDepositLog {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repo: repo.into(),
            status: None,
            messages: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn add_message(
        &mut self,
        level: impl Into<String>,
        text: impl Into<String>,
        notification: Option<String>,
        deposit_record_id: Option<String>,
    ) {
        self.messages.push(LogEntry {
            level: level.into(),
            text: text.into(),
            notification,
            deposit_record_id,
            timestamp: Utc::now(),
        });
        self.last_updated = Utc::now();
    }

    pub fn seal(&mut self, status: AccountStatus) {
        self.status = Some(status);
        self.last_updated = Utc::now();
    }
}
