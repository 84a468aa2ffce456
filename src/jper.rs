use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use url::Url;

use crate::error::RelayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageLink {
    pub format: String,
    pub url: Url,
}

/// A unit of work referencing metadata and optionally one or more content
/// packages (§6, §GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub created_date: DateTime<Utc>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub links: Vec<PackageLink>,
    /// Raw metadata payload handed to the crosswalk; opaque to the engine.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Notification {
    /// First link (in notification order, not account-packaging order —
    /// the account-order scan happens in the caller) whose format matches
    /// `packaging`. Undefined packagings yield `None`, matching the
    /// `get_package_link` contract.
    pub fn get_package_link(&self, packaging: &str) -> Option<&PackageLink> {
        self.links.iter().find(|l| l.format == packaging)
    }
}

/// A streamed byte payload plus whatever headers the transport surfaced.
pub struct ContentStream {
    pub headers: Vec<(String, String)>,
    pub bytes: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
}

/// External collaborator: the notifications service client. Consumed by the
/// account processor (to enumerate notifications) and the content cache (to
/// download payloads). Not specified further than this interface per §1.
#[async_trait]
pub trait JperClient: Send + Sync {
    /// Notifications for `repository_id` created at or after `since`,
    /// ordered ascending by creation time.
    async fn iterate_notifications(
        &self,
        since: DateTime<Utc>,
        repository_id: &str,
    ) -> Result<Vec<Notification>, RelayError>;

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, RelayError>;

    async fn get_content(&self, url: &Url) -> Result<ContentStream, RelayError>;
}

/// Default HTTP-backed adapter.
pub struct HttpJperClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpJperClient {
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl JperClient for HttpJperClient {
    async fn iterate_notifications(
        &self,
        since: DateTime<Utc>,
        repository_id: &str,
    ) -> Result<Vec<Notification>, RelayError> {
        let mut url = self
            .base_url
            .join("notifications")
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("since", &since.to_rfc3339())
            .append_pair("repository", repository_id)
            .append_pair("api_key", &self.api_key);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let notes: Vec<Notification> = resp
            .json()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(notes)
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>, RelayError> {
        let mut url = self
            .base_url
            .join(&format!("notifications/{id}"))
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let note: Notification = resp
            .json()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        Ok(Some(note))
    }

    async fn get_content(&self, url: &Url) -> Result<ContentStream, RelayError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let stream = resp
            .bytes_stream()
            .map(|r| r.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));

        Ok(ContentStream {
            headers,
            bytes: Box::pin(stream),
        })
    }
}

/// Builds a `JperClient` scoped to one account's api key, mirroring
/// `client.JPER(api_key=acc.api_key)` being constructed fresh per account in
/// `process_account`.
pub trait JperClientFactory: Send + Sync {
    fn build(&self, account: &crate::account::Account) -> Box<dyn JperClient>;
}

pub struct HttpJperClientFactory {
    pub base_url: Url,
}

impl JperClientFactory for HttpJperClientFactory {
    fn build(&self, account: &crate::account::Account) -> Box<dyn JperClient> {
        Box::new(HttpJperClient::new(self.base_url.clone(), account.api_key.clone()))
    }
}
