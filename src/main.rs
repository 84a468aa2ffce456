mod account;
mod account_pass;
mod cache;
mod config;
mod crosswalk;
mod deposit_log;
mod deposit_record;
mod error;
mod jper;
mod notification;
mod operator;
mod run;
mod status;
mod store;
mod sword;

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::{eyre, Result};
use fs2::FileExt;

use config::RelayConfig;
use crosswalk::DefaultCrosswalk;
use jper::HttpJperClientFactory;
use store::FileStore;
use sword::HttpSwordTransportFactory;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "JPER to SWORDv2 deposit relay")]
struct Args {
    /// Path to a TOML config file. Defaults to `<data-dir>/relay.toml` if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding accounts, status, deposit records and logs.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the JPER base URL. Also settable via RELAY_JPER_BASE_URL.
    #[arg(long)]
    jper_base_url: Option<String>,

    #[arg(long)]
    default_since_date: Option<String>,

    #[arg(long)]
    default_since_delta_days: Option<i64>,

    #[arg(long)]
    long_cycle_retry_delay_seconds: Option<u64>,

    #[arg(long)]
    long_cycle_retry_limit: Option<u32>,

    #[arg(long)]
    max_deposit_attempts: Option<u32>,

    #[arg(long)]
    store_response_data: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more passes over every sword-activated account.
    Run {
        /// Run a single pass and exit instead of polling forever.
        #[arg(long)]
        once: bool,
        /// Seconds to sleep between passes when not run with --once.
        #[arg(long, default_value_t = 3600)]
        poll_seconds: u64,
        /// Abort the whole pass on the first transport-class error instead
        /// of skipping to the next account.
        #[arg(long)]
        fail_on_error: bool,
    },
    /// Resume deposit processing for a suspended account.
    Activate {
        account_id: String,
    },
    /// Suspend deposit processing for one account, or every account with `--all`.
    Deactivate {
        account_id: Option<String>,
        #[arg(long)]
        all: bool,
        /// Where to write the before/after CSV when `--all` is given.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Dump `id,status` for every sword-activated account.
    StatusCsv {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Deposit a single notification for a single account, bypassing the
    /// idempotence and poison-cap checks.
    DepositOne {
        #[arg(long)]
        account: String,
        #[arg(long)]
        notification: String,
    },
    /// Report which outstanding notifications each account would deposit,
    /// without depositing anything.
    DebugPass {
        #[arg(long, default_value = "debug-pass")]
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let cfg = RelayConfig::assemble(
        args.config.clone(),
        args.default_since_date,
        args.default_since_delta_days,
        args.long_cycle_retry_delay_seconds,
        args.long_cycle_retry_limit,
        args.max_deposit_attempts,
        args.store_response_data,
        args.jper_base_url,
        args.data_dir,
    )?;

    std::fs::create_dir_all(&cfg.data_dir)
        .map_err(|e| eyre!("failed to create data directory {}: {e}", cfg.data_dir.display()))?;

    // Single-instance guard, alongside the data directory, same discipline
    // as keeper-rs's state-file lock.
    let lock_path = cfg.data_dir.join("relay.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| eyre!("failed to open lock file {}: {e}", lock_path.display()))?;
    lock_file.try_lock_exclusive().map_err(|e| {
        eyre!(
            "relay already running or lock unavailable ({}): {e}",
            lock_path.display()
        )
    })?;
    let _lock_guard = lock_file;

    let store = FileStore::open(cfg.data_dir.clone()).await?;
    let jper_factory = HttpJperClientFactory {
        base_url: cfg.jper_base_url.clone(),
    };
    let sword_factory = HttpSwordTransportFactory;
    let crosswalk = DefaultCrosswalk;
    let cache_dir = std::env::temp_dir().join("relay-cache");
    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| eyre!("failed to create cache directory {}: {e}", cache_dir.display()))?;

    match args.command {
        Command::Run {
            once,
            poll_seconds,
            fail_on_error,
        } => {
            tracing::info!(once, poll_seconds, "relay starting");
            loop {
                let summary = run::run(
                    &store,
                    &jper_factory,
                    &sword_factory,
                    &crosswalk,
                    &cache_dir,
                    &cfg,
                    fail_on_error,
                )
                .await?;
                tracing::info!(?summary, "pass complete");

                if once {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(poll_seconds)).await;
            }
        }
        Command::Activate { account_id } => {
            operator::activate(&store, &account_id).await?;
            println!("activated {account_id}");
        }
        Command::Deactivate {
            account_id,
            all,
            out,
        } => {
            if all {
                let rows = operator::deactivate_all(&store).await?;
                let out = out.unwrap_or_else(|| {
                    PathBuf::from(format!(
                        "repository_status_{}.csv",
                        chrono::Utc::now().format("%Y%m%d")
                    ))
                });
                operator::write_deactivate_all_csv(&out, &rows)?;
                println!("wrote {}", out.display());
            } else {
                let account_id = account_id
                    .ok_or_else(|| eyre!("either an account id or --all is required"))?;
                operator::deactivate(&store, &account_id).await?;
                println!("deactivated {account_id}");
            }
        }
        Command::StatusCsv { out } => {
            let rows = operator::status_rows(&store).await?;
            let out = out.unwrap_or_else(|| PathBuf::from("sword_status.csv"));
            operator::write_status_csv(&out, &rows)?;
            println!("wrote {}", out.display());
        }
        Command::DepositOne {
            account,
            notification,
        } => {
            let (deposited, deposit_record_id) = operator::deposit_one(
                &store,
                &jper_factory,
                &sword_factory,
                &crosswalk,
                &cache_dir,
                &cfg,
                &account,
                &notification,
            )
            .await?;
            println!("deposited={deposited} deposit_record_id={deposit_record_id}");
        }
        Command::DebugPass { out_dir } => {
            let rows = operator::debug_pass(&store, &jper_factory, &cfg).await?;
            for row in &rows {
                println!(
                    "{} try_deposit={} number_of_notifications={} number_to_deposit={}",
                    row.account_id,
                    row.try_deposit,
                    row.number_of_notifications(),
                    row.number_to_deposit()
                );
            }
            operator::write_debug_pass_csv(&out_dir, &rows)?;
            println!("wrote {}", out_dir.display());
        }
    }

    Ok(())
}
