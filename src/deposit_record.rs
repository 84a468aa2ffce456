use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one phase of a deposit attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Deposited,
    Failed,
    None,
    Invalidxml,
    Payloadtoolarge,
    Unset,
}

impl Default for DepositStatus {
    fn default() -> Self {
        DepositStatus::Unset
    }
}

impl DepositStatus {
    pub fn is_soft_failure(self) -> bool {
        matches!(
            self,
            DepositStatus::Invalidxml | DepositStatus::Payloadtoolarge
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogMessage {
    pub fn new(level: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One attempt's provenance for a (notification, account) pair.
///
/// The account-id field is named `repo`, not `repository`, to stay
/// compatible with documents written by the field name the original service
/// used in its secondary index (see DESIGN.md §9 note 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: String,
    pub repo: String,
    pub notification: String,
    pub deposit_date: DateTime<Utc>,
    /// Drives the "most-recent record for (notification, account)" query
    /// (§4.5); bumped on every mutation.
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata_status: DepositStatus,
    #[serde(default)]
    pub content_status: DepositStatus,
    #[serde(default)]
    pub completed_status: DepositStatus,
    #[serde(default)]
    pub messages: Vec<LogMessage>,
}

impl DepositRecord {
    pub fn new(repo: impl Into<String>, notification: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repo: repo.into(),
            notification: notification.into(),
            deposit_date: now,
            last_updated: now,
            metadata_status: DepositStatus::Unset,
            content_status: DepositStatus::Unset,
            completed_status: DepositStatus::Unset,
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, level: impl Into<String>, text: impl Into<String>) {
        self.messages.push(LogMessage::new(level, text));
        self.last_updated = Utc::now();
    }

    /// `was_successful()` ⇔ metadata deposited AND content/completed are
    /// deposited-or-none.
    pub fn was_successful(&self) -> bool {
        self.metadata_status == DepositStatus::Deposited
            && matches!(
                self.content_status,
                DepositStatus::Deposited | DepositStatus::None
            )
            && matches!(
                self.completed_status,
                DepositStatus::Deposited | DepositStatus::None
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn was_successful_requires_metadata_deposited() {
        let mut dr = DepositRecord::new("acc-1", "note-1");
        assert!(!dr.was_successful());

        dr.metadata_status = DepositStatus::Deposited;
        dr.content_status = DepositStatus::None;
        dr.completed_status = DepositStatus::None;
        assert!(dr.was_successful());
    }

    #[test]
    fn was_successful_false_if_content_failed() {
        let mut dr = DepositRecord::new("acc-1", "note-1");
        dr.metadata_status = DepositStatus::Deposited;
        dr.content_status = DepositStatus::Failed;
        dr.completed_status = DepositStatus::None;
        assert!(!dr.was_successful());
    }

    #[test]
    fn soft_failure_classes() {
        assert!(DepositStatus::Invalidxml.is_soft_failure());
        assert!(DepositStatus::Payloadtoolarge.is_soft_failure());
        assert!(!DepositStatus::Failed.is_soft_failure());
    }
}
