use crate::account_pass::process_account;
use crate::config::RelayConfig;
use crate::crosswalk::Crosswalk;
use crate::error::RelayError;
use crate::jper::JperClientFactory;
use crate::store::Store;
use crate::sword::SwordTransportFactory;

#[derive(Debug, Default)]
pub struct RunSummary {
    pub accounts_processed: usize,
    pub accounts_skipped_on_error: usize,
}

/// Execute a single pass over every sword-activated account, processing
/// each one's outstanding notifications. Mirrors `deposit.py::run`: a
/// transport-class error either aborts the whole pass (`fail_on_error`) or
/// is logged and the next account is tried.
pub async fn run(
    store: &dyn Store,
    jper_factory: &dyn JperClientFactory,
    sword_factory: &dyn SwordTransportFactory,
    crosswalk: &dyn Crosswalk,
    cache_dir: &std::path::Path,
    cfg: &RelayConfig,
    fail_on_error: bool,
) -> Result<RunSummary, RelayError> {
    tracing::info!("entering run");
    let accounts = store.with_sword_activated().await?;

    let mut summary = RunSummary::default();
    for account in &accounts {
        match process_account(
            account,
            store,
            jper_factory,
            sword_factory,
            crosswalk,
            cache_dir,
            cfg,
        )
        .await
        {
            Ok(()) => summary.accounts_processed += 1,
            Err(e @ RelayError::Transport(_)) => {
                tracing::error!(account = %account.id, error = %e, "problem while processing account for sword deposit");
                summary.accounts_skipped_on_error += 1;
                if fail_on_error {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        processed = summary.accounts_processed,
        skipped = summary.accounts_skipped_on_error,
        "leaving run"
    );
    Ok(summary)
}
