use crate::account::Account;
use crate::config::RelayConfig;
use crate::crosswalk::Crosswalk;
use crate::deposit_log::RepositoryDepositLog;
use crate::error::RelayError;
use crate::jper::JperClientFactory;
use crate::notification;
use crate::status::{AccountStatus, RepositoryStatus};
use crate::store::Store;
use crate::sword::SwordTransportFactory;

/// Retrieve the notifications JPER holds for `account` since its last
/// cursor, and relay them to its sword-enabled repository. Transcribes
/// `process_account` verbatim, including the status-gating order, the
/// `safe_since` rewind, and the three distinct exit paths (hard deposit
/// failure, transport error, normal exhaustion).
pub async fn process_account(
    account: &Account,
    store: &dyn Store,
    jper_factory: &dyn JperClientFactory,
    sword_factory: &dyn SwordTransportFactory,
    crosswalk: &dyn Crosswalk,
    cache_dir: &std::path::Path,
    cfg: &RelayConfig,
) -> Result<(), RelayError> {
    tracing::info!(account = %account.id, "processing account");

    let sword_creds = account.sword.as_ref().ok_or_else(|| {
        RelayError::Config(format!(
            "account {} has no sword credentials configured",
            account.id
        ))
    })?;

    let (mut status, is_new_account) = match store.get_repository_status(&account.id).await? {
        Some(status) => (status, false),
        None => {
            tracing::debug!(account = %account.id, "no previous deposit for account - creating repository status");
            let fresh = RepositoryStatus::new(&account.id, cfg.default_since_date);
            store.save_repository_status(&fresh).await?;
            (fresh, true)
        }
    };

    let mut log = RepositoryDepositLog::new(&account.id);
    if is_new_account {
        log.add_message(
            "debug",
            format!("First deposit for account {}", account.id),
            None,
            None,
        );
    }

    tracing::info!(account = %account.id, status = ?status.status, "account status");

    if status.status == AccountStatus::Failing {
        tracing::debug!(account = %account.id, "account is marked as failing - skipping. reactivate manually to resume");
        return Ok(());
    }

    if status.status == AccountStatus::Problem && !status.can_retry(cfg.long_cycle_retry_delay) {
        tracing::debug!(account = %account.id, "account is in problem state and retry delay has not elapsed - skipping");
        return Ok(());
    }

    let safe_since = status.last_deposit_date
        - chrono::Duration::days(cfg.default_since_delta_days);
    log.add_message(
        "info",
        format!("Finding updated notifications since {safe_since}"),
        None,
        None,
    );

    let jper = jper_factory.build(account);
    let sword = sword_factory.build(sword_creds);

    let mut deposit_done_count = 0u32;

    let notifications = match jper.iterate_notifications(safe_since, &account.id).await {
        Ok(notes) => notes,
        Err(e) => {
            store.save_repository_status(&status).await?;
            tracing::error!(account = %account.id, error = %e, "problem while processing account for sword deposit");
            log.add_message(
                "error",
                format!("Problem while processing account for SWORD deposit: {e}"),
                None,
                None,
            );
            if deposit_done_count > 0 {
                log.add_message(
                    "info",
                    format!("Number of successful deposits: {deposit_done_count}"),
                    None,
                    None,
                );
            }
            log.seal(status.status);
            store.save_deposit_log(&log).await?;
            return Err(e);
        }
    };

    for note in &notifications {
        let outcome = notification::process(
            account,
            note,
            store,
            jper.as_ref(),
            sword.as_ref(),
            crosswalk,
            cache_dir,
            cfg.max_deposit_attempts,
            &cfg.host_rewrites,
            false,
        )
        .await;

        match outcome {
            Ok((true, deposit_record_id)) => {
                status.last_deposit_date = note.created_date;
                log.add_message(
                    "info",
                    "Notification deposited",
                    Some(note.id.clone()),
                    Some(deposit_record_id),
                );
                deposit_done_count += 1;
            }
            Ok((false, deposit_record_id)) => {
                if let Some(drec) = store
                    .pull_latest_deposit_record(&note.id, &account.id)
                    .await?
                {
                    if drec.metadata_status.is_soft_failure() {
                        log.add_message(
                            "warn",
                            format!(
                                "Notification not deposited - {:?}",
                                drec.metadata_status
                            ),
                            Some(note.id.clone()),
                            Some(deposit_record_id),
                        );
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    account = %account.id,
                    notification = %note.id,
                    error = %e,
                    "received deposit exception; recording failure and ceasing further processing for this account"
                );
                log.add_message(
                    "error",
                    format!(
                        "Received package deposit exception for notification {} on account {}. Recording a failed deposit and ceasing further processing of notifications for this account. {e}",
                        note.id, account.id
                    ),
                    Some(note.id.clone()),
                    None,
                );
                if deposit_done_count > 0 {
                    log.add_message(
                        "info",
                        format!("Number of successful deposits: {deposit_done_count}"),
                        None,
                        None,
                    );
                }
                status.record_failure(cfg.long_cycle_retry_limit);
                store.save_repository_status(&status).await?;
                log.seal(status.status);
                store.save_deposit_log(&log).await?;
                return Ok(());
            }
        }
    }

    store.save_repository_status(&status).await?;
    if deposit_done_count > 0 {
        log.add_message(
            "info",
            format!("Number of successful deposits: {deposit_done_count}"),
            None,
            None,
        );
        status.record_success();
        store.save_repository_status(&status).await?;
        log.seal(AccountStatus::Succeeding);
        store.save_deposit_log(&log).await?;
    }
    tracing::info!(account = %account.id, "leaving processing account");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{DepositMethod, SwordCredentials};
    use crate::crosswalk::DefaultCrosswalk;
    use crate::jper::{ContentStream, JperClient, Notification};
    use crate::store::FileStore;
    use crate::sword::{DepositReceipt, SwordResponse, SwordTransport};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use url::Url;

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
            let stream = futures::stream::once(async move { Ok(bytes::Bytes::from_static(b"x")) });
            Ok(ContentStream {
                headers: vec![],
                bytes: Box::pin(stream),
            })
        }
    }

    impl JperClientFactory for FakeJperFactory {
        fn build(&self, _account: &Account) -> Box<dyn JperClient> {
            Box::new(FakeJper {
                notes: self.notes.clone(),
            })
        }
    }

    struct FakeSwordFactory;
    struct FakeSword;

    fn receipt() -> DepositReceipt {
        DepositReceipt {
            edit_iri: Url::parse("https://repo.example/edit/1").unwrap(),
            edit_media_iri: Some(Url::parse("https://repo.example/edit-media/1").unwrap()),
            has_dom: true,
        }
    }

    #[async_trait]
    impl SwordTransport for FakeSword {
        async fn create_package(
            &self,
            _col_iri: &Url,
            _payload: &[u8],
            _filename: &str,
            _mimetype: &str,
            _packaging: Option<&str>,
        ) -> Result<SwordResponse, RelayError> {
            Ok(SwordResponse::Receipt(receipt()))
        }

        async fn create_metadata(
            &self,
            _col_iri: &Url,
            _atom_entry_xml: &str,
            _in_progress: bool,
        ) -> Result<SwordResponse, RelayError> {
            Ok(SwordResponse::Receipt(receipt()))
        }

        async fn add_file_to_resource(
            &self,
            _edit_media_iri: &Url,
            _payload: &[u8],
            _filename: &str,
            _mimetype: &str,
            _packaging: Option<&str>,
        ) -> Result<SwordResponse, RelayError> {
            Ok(SwordResponse::Receipt(receipt()))
        }

        async fn update_files_for_resource(
            &self,
            _receipt: &DepositReceipt,
            _payload: &[u8],
            _filename: &str,
            _mimetype: &str,
            _packaging: Option<&str>,
        ) -> Result<SwordResponse, RelayError> {
            Ok(SwordResponse::Receipt(receipt()))
        }

        async fn complete_deposit(&self, _receipt: &DepositReceipt) -> Result<SwordResponse, RelayError> {
            Ok(SwordResponse::Receipt(receipt()))
        }

        async fn get_deposit_receipt(&self, _edit_iri: &Url) -> Result<DepositReceipt, RelayError> {
            Ok(receipt())
        }
    }

    impl SwordTransportFactory for FakeSwordFactory {
        fn build(&self, _sword: &SwordCredentials) -> Box<dyn SwordTransport> {
            Box::new(FakeSword)
        }
    }

    fn account() -> Account {
        Account {
            id: "acc-1".into(),
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
    async fn first_pass_creates_status_and_deposits_notification() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path().join("store")).await.unwrap();
        let acc = account();
        let note = Notification {
            id: "note-1".into(),
            created_date: chrono::Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            identifiers: vec![],
            links: vec![crate::jper::PackageLink {
                format: "opus4".into(),
                url: Url::parse("https://example.org/files/deposit.zip").unwrap(),
            }],
            metadata: serde_json::Value::Null,
        };
        let jper_factory = FakeJperFactory {
            notes: vec![note.clone()],
        };
        let sword_factory = FakeSwordFactory;
        let crosswalk = DefaultCrosswalk;
        let cfg = config();

        process_account(
            &acc,
            &store,
            &jper_factory,
            &sword_factory,
            &crosswalk,
            tmp.path(),
            &cfg,
        )
        .await
        .unwrap();

        let status = store.get_repository_status("acc-1").await.unwrap().unwrap();
        assert_eq!(status.status, AccountStatus::Succeeding);
        assert_eq!(status.last_deposit_date, note.created_date);

        let log = store.pull_latest_deposit_log("acc-1").await.unwrap().unwrap();
        assert_eq!(log.status, Some(AccountStatus::Succeeding));
    }

    #[tokio::test]
    async fn failing_account_is_skipped_entirely() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path().join("store")).await.unwrap();
        let acc = account();

        let mut status = RepositoryStatus::new(&acc.id, Utc::now());
        status.deactivate();
        store.save_repository_status(&status).await.unwrap();

        let jper_factory = FakeJperFactory { notes: vec![] };
        let sword_factory = FakeSwordFactory;
        let crosswalk = DefaultCrosswalk;
        let cfg = config();

        process_account(
            &acc,
            &store,
            &jper_factory,
            &sword_factory,
            &crosswalk,
            tmp.path(),
            &cfg,
        )
        .await
        .unwrap();

        assert!(store.pull_latest_deposit_log("acc-1").await.unwrap().is_none());
    }
}
