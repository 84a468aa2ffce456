use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::account::Account;
use crate::deposit_log::RepositoryDepositLog;
use crate::deposit_record::DepositRecord;
use crate::error::RelayError;
use crate::status::RepositoryStatus;

/// Persistence boundary consumed by the core engine (§4.5). The reference
/// design backs this with Elasticsearch; that is out of scope here (§1), so
/// the one concrete adapter, [`FileStore`], is a newline-delimited-JSON
/// document store, atomically written the way the teacher's
/// `KeeperState::save` writes its single state blob, generalized to one
/// file (or append-log) per entity.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, RelayError>;
    async fn save_account(&self, account: &Account) -> Result<(), RelayError>;
    /// Accounts where `sword.collection` is present and non-empty, fully
    /// materialized (the reference design scrolls then collects to release
    /// the cursor before iterating; this adapter has no cursor to release,
    /// but keeps the same materialize-then-return shape at the trait
    /// boundary so callers never depend on a live cursor).
    async fn with_sword_activated(&self) -> Result<Vec<Account>, RelayError>;

    async fn get_repository_status(&self, id: &str) -> Result<Option<RepositoryStatus>, RelayError>;
    async fn save_repository_status(&self, status: &RepositoryStatus) -> Result<(), RelayError>;

    async fn save_deposit_record(&self, record: &DepositRecord) -> Result<(), RelayError>;
    /// Most-recent deposit record for (notification, account), sorted by
    /// `last_updated` descending.
    async fn pull_latest_deposit_record(
        &self,
        notification_id: &str,
        repository_id: &str,
    ) -> Result<Option<DepositRecord>, RelayError>;
    /// Count of deposit records for (notification, account) — drives the
    /// `MAX_DEPOSIT_ATTEMPTS` poison cap (§4.3).
    async fn pull_deposit_record_count(
        &self,
        notification_id: &str,
        repository_id: &str,
    ) -> Result<usize, RelayError>;

    async fn save_deposit_log(&self, log: &RepositoryDepositLog) -> Result<(), RelayError>;
    /// Most recent log for `repository_id` (size=1, sorted desc by
    /// `last_updated` — confirmed per §9 note 3).
    async fn pull_latest_deposit_log(
        &self,
        repository_id: &str,
    ) -> Result<Option<RepositoryDepositLog>, RelayError>;
}

/// File-backed `Store`. One JSON file per account/status (overwritten on
/// save, mirroring a single-document-per-id collection) and one
/// newline-delimited append log per (notification, account) for deposit
/// records, and per account for deposit logs.
pub struct FileStore {
    base_dir: PathBuf,
    // A single process-wide lock is enough discipline for the reference
    // adapter; callers wanting per-account parallelism (§5) should shard
    // across multiple `FileStore` instances pointed at the same directory,
    // or wrap per-account writes in their own serialization as the spec
    // permits.
    lock: Mutex<()>,
}

impl FileStore {
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let base_dir = base_dir.into();
        for sub in ["accounts", "status", "deposit_records", "deposit_logs"] {
            tokio::fs::create_dir_all(base_dir.join(sub))
                .await
                .map_err(|e| RelayError::Store(e.to_string()))?;
        }
        Ok(Self {
            base_dir,
            lock: Mutex::new(()),
        })
    }

    fn account_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("accounts").join(format!("{id}.json"))
    }

    fn status_path(&self, id: &str) -> PathBuf {
        self.base_dir.join("status").join(format!("{id}.json"))
    }

    fn deposit_record_log_path(&self, notification_id: &str, repository_id: &str) -> PathBuf {
        self.base_dir.join("deposit_records").join(format!(
            "{repository_id}__{notification_id}.ndjson"
        ))
    }

    fn deposit_log_path(&self, repository_id: &str) -> PathBuf {
        self.base_dir
            .join("deposit_logs")
            .join(format!("{repository_id}.ndjson"))
    }

    async fn write_atomic(path: &Path, contents: &str) -> Result<(), RelayError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        Ok(())
    }

    async fn append_line(path: &Path, line: &str) -> Result<(), RelayError> {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        Ok(())
    }

    async fn read_lines(path: &Path) -> Result<Vec<String>, RelayError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(contents
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.to_string())
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RelayError::Store(e.to_string())),
        }
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get_account(&self, id: &str) -> Result<Option<Account>, RelayError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(self.account_path(id)).await {
            Ok(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| RelayError::Store(e.to_string()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RelayError::Store(e.to_string())),
        }
    }

    async fn save_account(&self, account: &Account) -> Result<(), RelayError> {
        let _guard = self.lock.lock().await;
        let json = serde_json::to_string_pretty(account)
            .map_err(|e| RelayError::Store(e.to_string()))?;
        Self::write_atomic(&self.account_path(&account.id), &json).await
    }

    async fn with_sword_activated(&self) -> Result<Vec<Account>, RelayError> {
        let _guard = self.lock.lock().await;
        let mut dir = tokio::fs::read_dir(self.base_dir.join("accounts"))
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?;
        let mut accounts = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| RelayError::Store(e.to_string()))?
        {
            let raw = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| RelayError::Store(e.to_string()))?;
            let account: Account =
                serde_json::from_str(&raw).map_err(|e| RelayError::Store(e.to_string()))?;
            if account.is_sword_activated() {
                accounts.push(account);
            }
        }
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn get_repository_status(
        &self,
        id: &str,
    ) -> Result<Option<RepositoryStatus>, RelayError> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read_to_string(self.status_path(id)).await {
            Ok(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| RelayError::Store(e.to_string()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RelayError::Store(e.to_string())),
        }
    }

    async fn save_repository_status(&self, status: &RepositoryStatus) -> Result<(), RelayError> {
        let _guard = self.lock.lock().await;
        let json =
            serde_json::to_string_pretty(status).map_err(|e| RelayError::Store(e.to_string()))?;
        Self::write_atomic(&self.status_path(&status.id), &json).await
    }

    async fn save_deposit_record(&self, record: &DepositRecord) -> Result<(), RelayError> {
        let _guard = self.lock.lock().await;
        let json =
            serde_json::to_string(record).map_err(|e| RelayError::Store(e.to_string()))?;
        Self::append_line(
            &self.deposit_record_log_path(&record.notification, &record.repo),
            &json,
        )
        .await
    }

    async fn pull_latest_deposit_record(
        &self,
        notification_id: &str,
        repository_id: &str,
    ) -> Result<Option<DepositRecord>, RelayError> {
        let _guard = self.lock.lock().await;
        let lines = Self::read_lines(&self.deposit_record_log_path(notification_id, repository_id))
            .await?;
        let mut records: Vec<DepositRecord> = lines
            .iter()
            .map(|l| serde_json::from_str(l).map_err(|e| RelayError::Store(e.to_string())))
            .collect::<Result<_, _>>()?;
        records.sort_by_key(|r| r.last_updated);
        Ok(records.pop())
    }

    async fn pull_deposit_record_count(
        &self,
        notification_id: &str,
        repository_id: &str,
    ) -> Result<usize, RelayError> {
        let _guard = self.lock.lock().await;
        let lines = Self::read_lines(&self.deposit_record_log_path(notification_id, repository_id))
            .await?;
        Ok(lines.len())
    }

    async fn save_deposit_log(&self, log: &RepositoryDepositLog) -> Result<(), RelayError> {
        let _guard = self.lock.lock().await;
        let json = serde_json::to_string(log).map_err(|e| RelayError::Store(e.to_string()))?;
        Self::append_line(&self.deposit_log_path(&log.repo), &json).await
    }

    async fn pull_latest_deposit_log(
        &self,
        repository_id: &str,
    ) -> Result<Option<RepositoryDepositLog>, RelayError> {
        let _guard = self.lock.lock().await;
        let lines = Self::read_lines(&self.deposit_log_path(repository_id)).await?;
        lines
            .last()
            .map(|l| serde_json::from_str(l).map_err(|e| RelayError::Store(e.to_string())))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{DepositMethod, SwordCredentials};
    use chrono::Utc;

    fn sample_account(id: &str, collection: &str) -> Account {
        Account {
            id: id.to_string(),
            api_key: "key".to_string(),
            packaging: vec!["opus4".to_string()],
            sword: Some(SwordCredentials {
                collection: url::Url::parse(collection).unwrap(),
                username: "u".to_string(),
                password: "p".to_string(),
                deposit_method: DepositMethod::SingleZipFile,
            }),
            repository_software: "opus4".to_string(),
        }
    }

    fn unconfigured_account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            api_key: "key".to_string(),
            packaging: vec!["opus4".to_string()],
            sword: None,
            repository_software: "opus4".to_string(),
        }
    }

    #[tokio::test]
    async fn with_sword_activated_filters_by_nonempty_collection() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        store
            .save_account(&sample_account("a1", "https://repo.example/col"))
            .await
            .unwrap();
        store
            .save_account(&sample_account("a2", "https://repo.example/"))
            .await
            .unwrap();
        store
            .save_account(&unconfigured_account("a3"))
            .await
            .unwrap();

        let active = store.with_sword_activated().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|a| a.id != "a3"));
    }

    #[tokio::test]
    async fn pull_latest_deposit_record_returns_most_recently_updated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        let mut first = DepositRecord::new("acc-1", "note-1");
        first.add_message("info", "first attempt");
        store.save_deposit_record(&first).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(2)).await;

        let mut second = DepositRecord::new("acc-1", "note-1");
        second.add_message("info", "second attempt");
        store.save_deposit_record(&second).await.unwrap();

        let latest = store
            .pull_latest_deposit_record("note-1", "acc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);

        let count = store
            .pull_deposit_record_count("note-1", "acc-1")
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn pull_latest_deposit_log_is_most_recent_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        let mut log1 = RepositoryDepositLog::new("acc-1");
        log1.add_message("info", "pass one", None, None);
        store.save_deposit_log(&log1).await.unwrap();

        let mut log2 = RepositoryDepositLog::new("acc-1");
        log2.add_message("info", "pass two", None, None);
        store.save_deposit_log(&log2).await.unwrap();

        let latest = store.pull_latest_deposit_log("acc-1").await.unwrap().unwrap();
        assert_eq!(latest.id, log2.id);
    }

    #[tokio::test]
    async fn repository_status_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        assert!(store.get_repository_status("acc-1").await.unwrap().is_none());

        let status = RepositoryStatus::new("acc-1", Utc::now());
        store.save_repository_status(&status).await.unwrap();

        let loaded = store.get_repository_status("acc-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, "acc-1");
    }
}
