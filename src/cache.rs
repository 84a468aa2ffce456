use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::RelayError;
use crate::jper::{JperClient, Notification};

/// A scoped local copy of a notification's content payload.
///
/// Cleans itself up on drop (success, soft failure, or hard failure path —
/// every exit from the notification processor goes through this guard's
/// `Drop`, instead of the four separate `tmp.delete(local_id)` call sites
/// the original Python needed).
pub struct CachedContent {
    dir: PathBuf,
    pub payload_path: PathBuf,
}

impl CachedContent {
    pub fn payload_path(&self) -> &Path {
        &self.payload_path
    }
}

impl Drop for CachedContent {
    fn drop(&mut self) {
        if self.dir.exists() {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

/// Stream the content via the JPER client into a fresh local scope. Writes
/// a `README.txt` containing the notification id and the payload under a
/// filename taken from the last path segment of the link URL, per §4.4.
pub async fn cache_content(
    link_url: &url::Url,
    note: &Notification,
    jper: &dyn JperClient,
    base_dir: &Path,
) -> Result<CachedContent, RelayError> {
    let local_id = uuid::Uuid::new_v4().to_string();
    let dir = base_dir.join(&local_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| RelayError::ContentFetch {
            notification: note.id.clone(),
            source: e,
        })?;

    tokio::fs::write(dir.join("README.txt"), note.id.as_bytes())
        .await
        .map_err(|e| RelayError::ContentFetch {
            notification: note.id.clone(),
            source: e,
        })?;

    let filename = link_url
        .path_segments()
        .and_then(|segs| segs.last())
        .filter(|s| !s.is_empty())
        .unwrap_or("payload.bin");
    let payload_path = dir.join(filename);

    let mut stream = jper.get_content(link_url).await?;
    let mut file =
        tokio::fs::File::create(&payload_path)
            .await
            .map_err(|e| RelayError::ContentFetch {
                notification: note.id.clone(),
                source: e,
            })?;

    while let Some(chunk) = stream.bytes.next().await {
        let chunk = chunk.map_err(|e| RelayError::ContentFetch {
            notification: note.id.clone(),
            source: e,
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| RelayError::ContentFetch {
                notification: note.id.clone(),
                source: e,
            })?;
    }
    file.flush().await.map_err(|e| RelayError::ContentFetch {
        notification: note.id.clone(),
        source: e,
    })?;

    Ok(CachedContent { dir, payload_path })
}
