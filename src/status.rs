use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Per-account deposit state machine (§3, §4.2.1).
///
/// `Failing` accounts are skipped entirely by the account processor until an
/// operator re-activates them; `Problem` accounts are retried once
/// `LONG_CYCLE_RETRY_DELAY` has elapsed since `last_tried`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Succeeding,
    Problem,
    Failing,
}

impl Default for AccountStatus {
    fn default() -> Self {
        AccountStatus::Succeeding
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub id: String,
    pub status: AccountStatus,
    pub last_deposit_date: DateTime<Utc>,
    #[serde(default)]
    pub last_tried: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retries: u32,
}

impl RepositoryStatus {
    /// Lazily-created status for an account seen for the first time.
    pub fn new(account_id: impl Into<String>, default_since: DateTime<Utc>) -> Self {
        Self {
            id: account_id.into(),
            status: AccountStatus::Succeeding,
            last_deposit_date: default_since,
            last_tried: None,
            retries: 0,
        }
    }

    /// Record a hard deposit failure for this pass. Transitions to `Failing`
    /// once `retries` reaches `limit`, otherwise to `Problem`.
    pub fn record_failure(&mut self, limit: u32) {
        self.retries = self.retries.saturating_add(1);
        self.last_tried = Some(Utc::now());
        self.status = if self.retries >= limit {
            AccountStatus::Failing
        } else {
            AccountStatus::Problem
        };
    }

    /// Called whenever a notification deposit completes successfully within
    /// a pass. A single success clears a prior `Problem` status.
    pub fn record_success(&mut self) {
        self.status = AccountStatus::Succeeding;
        self.retries = 0;
    }

    /// True iff enough time has elapsed since the last retry attempt to try
    /// this account again (or no attempt has been recorded yet).
    pub fn can_retry(&self, delay: ChronoDuration) -> bool {
        match self.last_tried {
            None => true,
            Some(last) => Utc::now() - last >= delay,
        }
    }

    /// Externally-invoked: suspend deposit processing for this account.
    pub fn deactivate(&mut self) {
        self.status = AccountStatus::Failing;
    }

    /// Externally-invoked: resume deposit processing and clear retry count.
    pub fn activate(&mut self) {
        self.status = AccountStatus::Succeeding;
        self.retries = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_failure_transitions_to_problem_then_failing() {
        let mut status = RepositoryStatus::new("acc-1", Utc::now());
        status.record_failure(3);
        assert_eq!(status.status, AccountStatus::Problem);
        assert_eq!(status.retries, 1);

        status.record_failure(3);
        assert_eq!(status.status, AccountStatus::Problem);
        assert_eq!(status.retries, 2);

        status.record_failure(3);
        assert_eq!(status.status, AccountStatus::Failing);
        assert_eq!(status.retries, 3);
    }

    #[test]
    fn record_success_resets_retries_and_clears_problem() {
        let mut status = RepositoryStatus::new("acc-1", Utc::now());
        status.record_failure(5);
        status.record_failure(5);
        assert_eq!(status.status, AccountStatus::Problem);

        status.record_success();
        assert_eq!(status.status, AccountStatus::Succeeding);
        assert_eq!(status.retries, 0);
    }

    #[test]
    fn can_retry_true_when_never_tried() {
        let status = RepositoryStatus::new("acc-1", Utc::now());
        assert!(status.can_retry(ChronoDuration::seconds(60)));
    }

    #[test]
    fn can_retry_false_within_delay() {
        let mut status = RepositoryStatus::new("acc-1", Utc::now());
        status.last_tried = Some(Utc::now());
        assert!(!status.can_retry(ChronoDuration::hours(1)));
    }

    #[test]
    fn activate_resets_retries_and_deactivate_sets_failing() {
        let mut status = RepositoryStatus::new("acc-1", Utc::now());
        status.record_failure(10);
        status.deactivate();
        assert_eq!(status.status, AccountStatus::Failing);

        status.activate();
        assert_eq!(status.status, AccountStatus::Succeeding);
        assert_eq!(status.retries, 0);
    }
}
