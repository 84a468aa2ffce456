use std::path::PathBuf;

use crate::config::RelayConfig;
use crate::crosswalk::Crosswalk;
use crate::error::RelayError;
use crate::jper::JperClientFactory;
use crate::notification;
use crate::status::AccountStatus;
use crate::store::Store;
use crate::sword::SwordTransportFactory;

/// Activate a previously-suspended account, clearing its retry count.
/// Grounded on `scripts/activate.py`'s `-a/--activate` flag.
pub async fn activate(store: &dyn Store, account_id: &str) -> Result<(), RelayError> {
    let mut status = store
        .get_repository_status(account_id)
        .await?
        .ok_or_else(|| RelayError::Store(format!("no repository status found for {account_id}")))?;
    status.activate();
    store.save_repository_status(&status).await?;
    Ok(())
}

/// Deactivate one account. Grounded on `scripts/activate.py`'s `-s/--stop` flag.
pub async fn deactivate(store: &dyn Store, account_id: &str) -> Result<(), RelayError> {
    let mut status = store
        .get_repository_status(account_id)
        .await?
        .ok_or_else(|| RelayError::Store(format!("no repository status found for {account_id}")))?;
    status.deactivate();
    store.save_repository_status(&status).await?;
    Ok(())
}

/// One row of the `deactivate --all` / `status-csv` report.
pub struct StatusRow {
    pub id: String,
    pub old_status: Option<AccountStatus>,
    pub new_status: Option<AccountStatus>,
}

/// Deactivate every sword-activated account that isn't already failing, and
/// return the before/after rows for a CSV dump. Grounded on
/// `scripts/deactivate_all.py`.
pub async fn deactivate_all(store: &dyn Store) -> Result<Vec<StatusRow>, RelayError> {
    let accounts = store.with_sword_activated().await?;
    let mut rows = Vec::with_capacity(accounts.len());
    for account in accounts {
        match store.get_repository_status(&account.id).await? {
            None => rows.push(StatusRow {
                id: account.id,
                old_status: None,
                new_status: None,
            }),
            Some(status) if status.status == AccountStatus::Failing => {
                rows.push(StatusRow {
                    id: account.id,
                    old_status: Some(status.status),
                    new_status: None,
                });
            }
            Some(mut status) => {
                let old = status.status;
                status.deactivate();
                store.save_repository_status(&status).await?;
                rows.push(StatusRow {
                    id: account.id,
                    old_status: Some(old),
                    new_status: Some(status.status),
                });
            }
        }
    }
    Ok(rows)
}

/// `id,status` for every sword-activated account. Grounded on
/// `scripts/current_sword_status.py`.
pub async fn status_rows(store: &dyn Store) -> Result<Vec<(String, Option<AccountStatus>)>, RelayError> {
    let accounts = store.with_sword_activated().await?;
    let mut rows = Vec::with_capacity(accounts.len());
    for account in accounts {
        let status = store
            .get_repository_status(&account.id)
            .await?
            .map(|s| s.status);
        rows.push((account.id, status));
    }
    Ok(rows)
}

pub fn write_status_csv(path: &PathBuf, rows: &[(String, Option<AccountStatus>)]) -> Result<(), RelayError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| RelayError::Store(e.to_string()))?;
    writer
        .write_record(["id", "status"])
        .map_err(|e| RelayError::Store(e.to_string()))?;
    for (id, status) in rows {
        let status_str = status
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();
        writer
            .write_record([id.as_str(), status_str.as_str()])
            .map_err(|e| RelayError::Store(e.to_string()))?;
    }
    writer.flush().map_err(|e| RelayError::Store(e.to_string()))?;
    Ok(())
}

pub fn write_deactivate_all_csv(path: &PathBuf, rows: &[StatusRow]) -> Result<(), RelayError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| RelayError::Store(e.to_string()))?;
    writer
        .write_record(["id", "old_status", "new_status"])
        .map_err(|e| RelayError::Store(e.to_string()))?;
    for row in rows {
        let old = row
            .old_status
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();
        let new = row
            .new_status
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_default();
        writer
            .write_record([row.id.as_str(), old.as_str(), new.as_str()])
            .map_err(|e| RelayError::Store(e.to_string()))?;
    }
    writer.flush().map_err(|e| RelayError::Store(e.to_string()))?;
    Ok(())
}

/// Deposit a single notification for a single account, bypassing the
/// idempotence/poison-cap check. Grounded on `deposit_notification.py` /
/// `deposit_notification_with_debug.py`.
pub async fn deposit_one(
    store: &dyn Store,
    jper_factory: &dyn JperClientFactory,
    sword_factory: &dyn SwordTransportFactory,
    crosswalk: &dyn Crosswalk,
    cache_dir: &std::path::Path,
    cfg: &RelayConfig,
    account_id: &str,
    notification_id: &str,
) -> Result<(bool, String), RelayError> {
    let account = store
        .get_account(account_id)
        .await?
        .filter(|a| a.is_sword_activated())
        .ok_or_else(|| {
            RelayError::Store(format!(
                "account {account_id} not found or sword not activated"
            ))
        })?;

    let jper = jper_factory.build(&account);
    let note = jper
        .get_notification(notification_id)
        .await?
        .ok_or_else(|| RelayError::Store(format!("notification {notification_id} not found")))?;

    let sword_creds = account.sword.as_ref().ok_or_else(|| {
        RelayError::Config(format!(
            "account {} has no sword credentials configured",
            account.id
        ))
    })?;
    let sword = sword_factory.build(sword_creds);
    notification::process(
        &account,
        &note,
        store,
        jper.as_ref(),
        sword.as_ref(),
        crosswalk,
        cache_dir,
        cfg.max_deposit_attempts,
        &cfg.host_rewrites,
        true,
    )
    .await
}

/// Per-notification row of a dry pass: would this notification be
/// deposited if a real pass ran right now? Grounded on `debug_deposit.py`'s
/// per-account CSV (`note_id,doi,date_created,has_deposit_record,dr_id,will_deposit`).
pub struct DebugNotificationRow {
    pub notification_id: String,
    pub doi: String,
    pub date_created: chrono::DateTime<chrono::Utc>,
    pub has_deposit_record: bool,
    pub deposit_record_id: String,
    pub will_deposit: bool,
}

/// Per-account summary row of a dry pass, mirroring `debug_deposit.py`'s
/// top-level `debug_deposit.csv`.
pub struct DebugPassRow {
    pub account_id: String,
    pub status: Option<AccountStatus>,
    pub try_deposit: bool,
    pub since: chrono::DateTime<chrono::Utc>,
    pub safe_since: chrono::DateTime<chrono::Utc>,
    pub notifications: Vec<DebugNotificationRow>,
}

impl DebugPassRow {
    pub fn number_of_notifications(&self) -> usize {
        self.notifications.len()
    }

    pub fn number_to_deposit(&self) -> usize {
        self.notifications.iter().filter(|n| n.will_deposit).count()
    }
}

fn doi_of(note: &crate::jper::Notification) -> String {
    note.identifiers
        .iter()
        .filter(|id| id.kind.eq_ignore_ascii_case("doi"))
        .map(|id| id.id.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Report, per sword-activated account, which outstanding notifications
/// would be deposited on the next real pass, without depositing anything.
/// Grounded on `debug_deposit.py::debug_run`.
pub async fn debug_pass(
    store: &dyn Store,
    jper_factory: &dyn JperClientFactory,
    cfg: &RelayConfig,
) -> Result<Vec<DebugPassRow>, RelayError> {
    let accounts = store.with_sword_activated().await?;
    let mut rows = Vec::with_capacity(accounts.len());
    for account in accounts {
        let repository_status = store.get_repository_status(&account.id).await?;
        let status = repository_status.as_ref().map(|s| s.status);
        let since = repository_status
            .as_ref()
            .map(|s| s.last_deposit_date)
            .unwrap_or(cfg.default_since_date);

        let mut try_deposit = true;
        if let Some(s) = &repository_status {
            if s.status == AccountStatus::Failing {
                try_deposit = false;
            }
            if s.status == AccountStatus::Problem && !s.can_retry(cfg.long_cycle_retry_delay) {
                try_deposit = false;
            }
        }

        let safe_since = since - chrono::Duration::days(cfg.default_since_delta_days);

        let mut notifications = Vec::new();
        if try_deposit {
            let jper = jper_factory.build(&account);
            let notes = jper.iterate_notifications(safe_since, &account.id).await?;
            for note in &notes {
                let dr = store
                    .pull_latest_deposit_record(&note.id, &account.id)
                    .await?;
                let mut will_deposit = true;
                let mut deposit_record_id = String::new();
                if let Some(dr) = &dr {
                    deposit_record_id = dr.id.clone();
                    if dr.was_successful() {
                        will_deposit = false;
                    } else {
                        let attempts = store
                            .pull_deposit_record_count(&note.id, &account.id)
                            .await?;
                        if attempts as u32 >= cfg.max_deposit_attempts {
                            will_deposit = false;
                        }
                    }
                    if dr.metadata_status.is_soft_failure() {
                        will_deposit = false;
                    }
                }
                notifications.push(DebugNotificationRow {
                    notification_id: note.id.clone(),
                    doi: doi_of(note),
                    date_created: note.created_date,
                    has_deposit_record: dr.is_some(),
                    deposit_record_id,
                    will_deposit,
                });
            }
        }

        rows.push(DebugPassRow {
            account_id: account.id,
            status,
            try_deposit,
            since,
            safe_since,
            notifications,
        });
    }
    Ok(rows)
}

pub fn write_debug_pass_csv(out_dir: &std::path::Path, rows: &[DebugPassRow]) -> Result<(), RelayError> {
    std::fs::create_dir_all(out_dir).map_err(|e| RelayError::Store(e.to_string()))?;

    let mut summary =
        csv::Writer::from_path(out_dir.join("debug_deposit.csv")).map_err(|e| RelayError::Store(e.to_string()))?;
    summary
        .write_record([
            "account_id",
            "status",
            "try_deposit",
            "since",
            "safe_since",
            "number_of_notifications",
            "number_to_deposit",
        ])
        .map_err(|e| RelayError::Store(e.to_string()))?;

    for row in rows {
        let status_str = row
            .status
            .map(|s| format!("{s:?}").to_lowercase())
            .unwrap_or_else(|| "new - succeeding".to_string());
        summary
            .write_record([
                row.account_id.as_str(),
                status_str.as_str(),
                &row.try_deposit.to_string(),
                &row.since.to_rfc3339(),
                &row.safe_since.to_rfc3339(),
                &row.number_of_notifications().to_string(),
                &row.number_to_deposit().to_string(),
            ])
            .map_err(|e| RelayError::Store(e.to_string()))?;

        let mut per_account = csv::Writer::from_path(out_dir.join(format!("{}.csv", row.account_id)))
            .map_err(|e| RelayError::Store(e.to_string()))?;
        per_account
            .write_record([
                "note_id",
                "doi",
                "date_created",
                "has_deposit_record",
                "dr_id",
                "will_deposit",
            ])
            .map_err(|e| RelayError::Store(e.to_string()))?;
        for note in &row.notifications {
            per_account
                .write_record([
                    note.notification_id.as_str(),
                    note.doi.as_str(),
                    &note.date_created.to_rfc3339(),
                    &note.has_deposit_record.to_string(),
                    note.deposit_record_id.as_str(),
                    &note.will_deposit.to_string(),
                ])
                .map_err(|e| RelayError::Store(e.to_string()))?;
        }
        per_account.flush().map_err(|e| RelayError::Store(e.to_string()))?;
    }
    summary.flush().map_err(|e| RelayError::Store(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, DepositMethod, SwordCredentials};
    use crate::store::FileStore;
    use chrono::Utc;
    use url::Url;

    fn account(id: &str) -> Account {
        Account {
            id: id.into(),
            api_key: "key".into(),
            packaging: vec!["opus4".into()],
            sword: Some(SwordCredentials {
                collection: Url::parse("https://repo.example/col").unwrap(),
                username: "u".into(),
                password: "p".into(),
                deposit_method: DepositMethod::SingleZipFile,
            }),
            repository_software: "opus4".into(),
        }
    }

    #[tokio::test]
    async fn activate_clears_failing_status() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        let mut status = crate::status::RepositoryStatus::new("acc-1", Utc::now());
        status.deactivate();
        store.save_repository_status(&status).await.unwrap();

        activate(&store, "acc-1").await.unwrap();

        let reloaded = store.get_repository_status("acc-1").await.unwrap().unwrap();
        assert_eq!(reloaded.status, AccountStatus::Succeeding);
    }

    #[tokio::test]
    async fn deactivate_all_skips_accounts_already_failing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.save_account(&account("acc-1")).await.unwrap();
        store.save_account(&account("acc-2")).await.unwrap();

        let mut failing = crate::status::RepositoryStatus::new("acc-1", Utc::now());
        failing.deactivate();
        store.save_repository_status(&failing).await.unwrap();

        let rows = deactivate_all(&store).await.unwrap();
        assert_eq!(rows.len(), 2);

        let row1 = rows.iter().find(|r| r.id == "acc-1").unwrap();
        assert_eq!(row1.new_status, None);

        let row2 = rows.iter().find(|r| r.id == "acc-2").unwrap();
        assert_eq!(row2.old_status, None);
        assert_eq!(row2.new_status, None);
    }

    use crate::jper::{ContentStream, JperClient, Notification};
    use async_trait::async_trait;

    struct FakeJperFactory {
        notes: Vec<Notification>,
    }

    struct FakeJper {
        notes: Vec<Notification>,
    }

    #[async_trait]
    impl JperClient for FakeJper {
        async fn iterate_notifications(
            &self,
            _since: chrono::DateTime<Utc>,
            _repository_id: &str,
        ) -> Result<Vec<Notification>, RelayError> {
            Ok(self.notes.clone())
        }
        async fn get_notification(&self, _id: &str) -> Result<Option<Notification>, RelayError> {
            Ok(None)
        }
        async fn get_content(&self, _url: &Url) -> Result<ContentStream, RelayError> {
            Err(RelayError::Transport("not used".into()))
        }
    }

    impl JperClientFactory for FakeJperFactory {
        fn build(&self, _account: &Account) -> Box<dyn JperClient> {
            Box::new(FakeJper {
                notes: self.notes.clone(),
            })
        }
    }

    fn config() -> RelayConfig {
        RelayConfig::assemble(
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            Some("https://jper.example/".to_string()),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn debug_pass_reports_will_deposit_for_fresh_notification() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.save_account(&account("acc-1")).await.unwrap();

        let note = Notification {
            id: "note-1".into(),
            created_date: Utc::now(),
            identifiers: vec![crate::jper::Identifier {
                kind: "doi".into(),
                id: "10.1/x".into(),
            }],
            links: vec![],
            metadata: serde_json::Value::Null,
        };
        let jper_factory = FakeJperFactory {
            notes: vec![note.clone()],
        };
        let cfg = config();

        let rows = debug_pass(&store, &jper_factory, &cfg).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number_of_notifications(), 1);
        assert_eq!(rows[0].number_to_deposit(), 1);
        assert!(rows[0].notifications[0].will_deposit);
        assert_eq!(rows[0].notifications[0].doi, "10.1/x");
    }

    #[tokio::test]
    async fn debug_pass_skips_failing_account_without_querying_jper() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.save_account(&account("acc-1")).await.unwrap();

        let mut status = crate::status::RepositoryStatus::new("acc-1", Utc::now());
        status.deactivate();
        store.save_repository_status(&status).await.unwrap();

        let jper_factory = FakeJperFactory { notes: vec![] };
        let cfg = config();

        let rows = debug_pass(&store, &jper_factory, &cfg).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].try_deposit);
        assert_eq!(rows[0].number_of_notifications(), 0);
    }
}
