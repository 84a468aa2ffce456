use url::Url;

use crate::account::{Account, DepositMethod};
use crate::cache::cache_content;
use crate::crosswalk::Crosswalk;
use crate::deposit_record::{DepositRecord, DepositStatus};
use crate::error::{DepositPhase, RelayError};
use crate::jper::{JperClient, Notification};
use crate::store::Store;
use crate::sword::{classify_soft_failure, DepositReceipt, SwordResponse, SwordTransport};

/// Packaging identifiers that go through the atomic ("deepgreen") deposit
/// path rather than the three-phase metadata/content/complete sequence
/// (§4.3). Matched case-insensitively as a substring, as the original
/// classifies them.
const ATOMIC_PACKAGING_MARKERS: &[&str] = &["opus4", "escidoc", "dspace", "mods", "simple"];

fn is_atomic_packaging(packaging: &str) -> bool {
    let lower = packaging.to_lowercase();
    ATOMIC_PACKAGING_MARKERS.iter().any(|m| lower.contains(m))
}

/// Host rewrites applied to a content link before it's dereferenced, e.g.
/// the two documented DeepGreen rewrites. Lives on `RelayConfig`
/// (`host_rewrites`) and is threaded in here rather than hardcoded so an
/// operator can retarget a repository's content host without a rebuild.
fn rewrite_host(url: &Url, rewrites: &[(String, String)]) -> Url {
    let mut s = url.as_str().to_string();
    for (from, to) in rewrites {
        if s.starts_with(from.as_str()) {
            s = format!("{to}{}", &s[from.len()..]);
        }
    }
    Url::parse(&s).unwrap_or_else(|_| url.clone())
}

/// Outcome of depositing one notification, used internally to decide the
/// `(deposit_done, deposit_record_id)` pair the account processor expects.
pub enum Outcome {
    Deposited,
    NotDeposited,
}

/// Process one notification against one account: idempotence/poison-cap
/// check, variant selection, the deposit sequence itself, and error
/// classification. Mirrors `process_notification` / `deepgreen_deposit` /
/// `metadata_deposit` / `package_deposit` / `complete_deposit`.
///
/// Returns `(deposit_done, deposit_record_id)`. Soft failures
/// (`invalidxml`/`payloadtoolarge`) and content-fetch failures are reported
/// as `deposit_done = false` with `Ok`, never as `Err` — only a genuine hard
/// deposit failure raises `RelayError::Deposit`.
///
/// `force` bypasses the idempotence/poison-cap short-circuit (used by the
/// `deposit-one` operator command to retry a notification on demand).
#[allow(clippy::too_many_arguments)]
pub async fn process(
    account: &Account,
    note: &Notification,
    store: &dyn Store,
    jper: &dyn JperClient,
    sword: &dyn SwordTransport,
    crosswalk: &dyn Crosswalk,
    cache_dir: &std::path::Path,
    max_deposit_attempts: u32,
    host_rewrites: &[(String, String)],
    force: bool,
) -> Result<(bool, String), RelayError> {
    let collection = account
        .sword
        .as_ref()
        .map(|sword| sword.collection.clone())
        .ok_or_else(|| {
            RelayError::Config(format!(
                "account {} has no sword credentials configured",
                account.id
            ))
        })?;

    let mut dr = match store
        .pull_latest_deposit_record(&note.id, &account.id)
        .await?
    {
        Some(existing) if force => existing,
        Some(existing) => {
            if existing.was_successful() {
                return Ok((false, existing.id));
            }
            if existing.metadata_status.is_soft_failure() {
                return Ok((false, existing.id));
            }
            let attempts = store
                .pull_deposit_record_count(&note.id, &account.id)
                .await?;
            if attempts as u32 >= max_deposit_attempts {
                let mut capped = existing.clone();
                capped.add_message(
                    "warn",
                    format!("poison capped after {attempts} deposit attempts"),
                );
                store.save_deposit_record(&capped).await?;
                return Ok((false, capped.id));
            }
            existing
        }
        None => DepositRecord::new(&account.id, &note.id),
    };
    dr.deposit_date = chrono::Utc::now();

    let mut link = None;
    let mut packaging: Option<String> = None;
    for p in &account.packaging {
        if let Some(l) = note.get_package_link(p) {
            link = Some(l.clone());
            packaging = Some(p.clone());
            break;
        }
    }

    if link.is_none() {
        dr.content_status = DepositStatus::None;
        dr.completed_status = DepositStatus::None;
    }

    let link = link.map(|mut l| {
        l.url = rewrite_host(&l.url, host_rewrites);
        l
    });
    let packaging = packaging.unwrap_or_default();

    let outcome = if is_atomic_packaging(&packaging) {
        deepgreen_deposit(
            account, note, &link, &packaging, jper, sword, cache_dir, &collection, &mut dr,
        )
        .await?
    } else {
        three_phase_deposit(
            account, note, &link, &packaging, jper, sword, crosswalk, cache_dir, &collection,
            &mut dr,
        )
        .await?
    };

    store.save_deposit_record(&dr).await?;

    match outcome {
        Outcome::Deposited => Ok((true, dr.id)),
        Outcome::NotDeposited => Ok((false, dr.id)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn deepgreen_deposit(
    account: &Account,
    note: &Notification,
    link: &Option<crate::jper::PackageLink>,
    packaging: &str,
    jper: &dyn JperClient,
    sword: &dyn SwordTransport,
    cache_dir: &std::path::Path,
    collection: &Url,
    dr: &mut DepositRecord,
) -> Result<Outcome, RelayError> {
    let Some(link) = link else {
        dr.add_message(
            "debug",
            format!(
                "No content files to deposit for notification {} on account {}",
                note.id, account.id
            ),
        );
        return Ok(Outcome::NotDeposited);
    };

    dr.add_message(
        "info",
        format!("Depositing DeepGreen package format {packaging} for account {}", account.id),
    );

    let cached = match cache_content(&link.url, note, jper, cache_dir).await {
        Ok(c) => c,
        Err(e) => {
            dr.add_message("error", format!("problem retrieving content for deposit: {e}"));
            return Ok(Outcome::NotDeposited);
        }
    };

    // opus4 server infers packaging, escidoc wants its schema URI, everything
    // else is passed through unchanged.
    let normalized_packaging = if packaging.to_lowercase().contains("opus4") {
        None
    } else if packaging.to_lowercase().contains("escidoc") {
        Some("http://purl.org/escidoc/metadata/schemas/0.1/publication".to_string())
    } else {
        Some(packaging.to_string())
    };

    let bytes = tokio::fs::read(cached.payload_path())
        .await
        .map_err(|e| RelayError::ContentFetch {
            notification: note.id.clone(),
            source: e,
        })?;

    let response = sword
        .create_package(
            collection,
            &bytes,
            "deposit.zip",
            "application/zip",
            normalized_packaging.as_deref(),
        )
        .await?;

    match response {
        SwordResponse::Receipt(_) => {
            dr.add_message("info", "Content deposit was successful");
            dr.metadata_status = DepositStatus::Deposited;
            dr.content_status = DepositStatus::Deposited;
            dr.completed_status = DepositStatus::Deposited;
            Ok(Outcome::Deposited)
        }
        SwordResponse::Error(err) => {
            dr.content_status = DepositStatus::Failed;
            if let Some(soft) = classify_soft_failure(&err) {
                dr.metadata_status = soft;
                dr.add_message(
                    "error",
                    format!(
                        "content deposit failed with status {} (error_href={:?})",
                        err.code, err.error_href
                    ),
                );
                return Ok(Outcome::NotDeposited);
            }
            dr.metadata_status = DepositStatus::Failed;
            let msg = format!(
                "content deposit failed with status {} (error_href={:?})",
                err.code, err.error_href
            );
            dr.add_message("error", msg.clone());
            Err(RelayError::Deposit {
                phase: DepositPhase::Package,
                notification: note.id.clone(),
                message: msg,
            })
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn three_phase_deposit(
    account: &Account,
    note: &Notification,
    link: &Option<crate::jper::PackageLink>,
    packaging: &str,
    jper: &dyn JperClient,
    sword: &dyn SwordTransport,
    crosswalk: &dyn Crosswalk,
    cache_dir: &std::path::Path,
    collection: &Url,
    dr: &mut DepositRecord,
) -> Result<Outcome, RelayError> {
    let atom_entry = crosswalk.to_atom_entry(note);
    let complete = link.is_none();
    let in_progress = if account.is_eprints() { true } else { !complete };

    dr.add_message(
        "info",
        format!("Depositing metadata for notification {} on account {}", note.id, account.id),
    );

    let response = sword
        .create_metadata(collection, &atom_entry, in_progress)
        .await?;

    let mut receipt = match response {
        SwordResponse::Receipt(r) => {
            dr.metadata_status = DepositStatus::Deposited;
            dr.add_message("info", "Metadata deposit was successful");
            r
        }
        SwordResponse::Error(err) => {
            if let Some(soft) = classify_soft_failure(&err) {
                dr.metadata_status = soft;
                dr.add_message(
                    "error",
                    format!(
                        "metadata deposit failed with status {} (error_href={:?})",
                        err.code, err.error_href
                    ),
                );
                return Ok(Outcome::NotDeposited);
            }
            dr.metadata_status = DepositStatus::Failed;
            let msg = format!(
                "metadata deposit failed with status {} (error_href={:?})",
                err.code, err.error_href
            );
            dr.add_message("error", msg.clone());
            return Err(RelayError::Deposit {
                phase: DepositPhase::Metadata,
                notification: note.id.clone(),
                message: msg,
            });
        }
    };

    if !receipt.has_dom {
        receipt = sword.get_deposit_receipt(&receipt.edit_iri).await.map_err(|e| {
            RelayError::Deposit {
                phase: DepositPhase::Metadata,
                notification: note.id.clone(),
                message: format!("failed to retrieve deposit receipt: {e}"),
            }
        })?;
    }

    if account.is_eprints() {
        let edit_media = receipt
            .edit_media_iri
            .clone()
            .unwrap_or_else(|| receipt.edit_iri.clone());
        sword
            .add_file_to_resource(
                &edit_media,
                atom_entry.as_bytes(),
                "sword.xml",
                "text/xml",
                None,
            )
            .await
            .map_err(|e| RelayError::Deposit {
                phase: DepositPhase::Metadata,
                notification: note.id.clone(),
                message: format!("failed to deposit atom entry as file in eprints repository: {e}"),
            })?;
    }

    let Some(link) = link else {
        dr.add_message(
            "debug",
            format!(
                "No content files to deposit for notification {} on account {}",
                note.id, account.id
            ),
        );
        return Ok(Outcome::Deposited);
    };

    let cached = match cache_content(&link.url, note, jper, cache_dir).await {
        Ok(c) => c,
        Err(e) => {
            dr.add_message("error", format!("problem retrieving content for deposit: {e}"));
            return Ok(Outcome::Deposited);
        }
    };

    let normalized_packaging = if packaging.is_empty() {
        None
    } else {
        Some(packaging)
    };

    let bytes = tokio::fs::read(cached.payload_path())
        .await
        .map_err(|e| RelayError::ContentFetch {
            notification: note.id.clone(),
            source: e,
        })?;

    dr.add_message(
        "info",
        format!("Depositing package of format {packaging} for account {}", account.id),
    );

    let response = if account.is_eprints() {
        let edit_media = receipt
            .edit_media_iri
            .clone()
            .unwrap_or_else(|| receipt.edit_iri.clone());
        sword
            .add_file_to_resource(
                &edit_media,
                &bytes,
                "deposit.zip",
                "application/zip",
                normalized_packaging,
            )
            .await?
    } else {
        sword
            .update_files_for_resource(
                &receipt,
                &bytes,
                "deposit.zip",
                "application/zip",
                normalized_packaging,
            )
            .await?
    };

    match response {
        SwordResponse::Receipt(_) => {
            dr.content_status = DepositStatus::Deposited;
            dr.add_message("info", "Content deposit was successful");
        }
        SwordResponse::Error(err) => {
            dr.content_status = DepositStatus::Failed;
            let msg = format!(
                "content deposit failed with status {} (error_href={:?})",
                err.code, err.error_href
            );
            dr.add_message("error", msg.clone());
            return Err(RelayError::Deposit {
                phase: DepositPhase::Content,
                notification: note.id.clone(),
                message: msg,
            });
        }
    }

    if account.is_eprints() {
        dr.completed_status = DepositStatus::None;
        dr.add_message(
            "debug",
            "complete request ignored, as repository does not support this operation",
        );
        return Ok(Outcome::Deposited);
    }

    dr.add_message("info", format!("Sending complete request for account {}", account.id));
    match sword.complete_deposit(&receipt).await? {
        SwordResponse::Receipt(_) => {
            dr.completed_status = DepositStatus::Deposited;
            dr.add_message("info", "Complete request was successful");
            Ok(Outcome::Deposited)
        }
        SwordResponse::Error(err) => {
            dr.completed_status = DepositStatus::Failed;
            let msg = format!(
                "complete request failed with status {} (error_href={:?})",
                err.code, err.error_href
            );
            dr.add_message("error", msg.clone());
            Err(RelayError::Deposit {
                phase: DepositPhase::Complete,
                notification: note.id.clone(),
                message: msg,
            })
        }
    }
}
