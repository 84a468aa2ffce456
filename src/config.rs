use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use eyre::{eyre, Result};
use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

const DEFAULT_SINCE_DELTA_DAYS: i64 = 2;
const DEFAULT_LONG_CYCLE_RETRY_DELAY_SECONDS: u64 = 3600;
const DEFAULT_LONG_CYCLE_RETRY_LIMIT: u32 = 5;
const DEFAULT_MAX_DEPOSIT_ATTEMPTS: u32 = 10;

/// `{data_dir}/relay.toml` — all fields are optional overrides.
/// Priority: CLI flag / env var > TOML file > built-in default.
#[derive(Debug, Deserialize, Default)]
struct TomlConfig {
    default_since_date: Option<String>,
    default_since_delta_days: Option<i64>,
    long_cycle_retry_delay_seconds: Option<u64>,
    long_cycle_retry_limit: Option<u32>,
    max_deposit_attempts: Option<u32>,
    store_response_data: Option<bool>,
    jper_base_url: Option<String>,
    data_dir: Option<PathBuf>,
    host_rewrites: Option<Vec<[String; 2]>>,
}

fn load_toml(path: &std::path::Path) -> Option<TomlConfig> {
    let contents = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            tracing::error!(path = %path.display(), err = %e, "failed to parse config file — using defaults");
            None
        }
    }
}

/// Immutable configuration snapshot for one invocation of the relay, built
/// in the same precedence order keeper-rs uses for its RPC URL: CLI flag >
/// env var > config file > built-in default (§6).
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Cursor seed used the first time an account's `RepositoryStatus` is
    /// created.
    pub default_since_date: DateTime<Utc>,
    /// Safety margin subtracted from `last_deposit_date` before querying
    /// JPER, to cover clock/granularity drift between passes.
    pub default_since_delta_days: i64,
    pub long_cycle_retry_delay: ChronoDuration,
    pub long_cycle_retry_limit: u32,
    /// Poison cap: once a (notification, account) pair has this many saved
    /// deposit-record attempts without succeeding, it's skipped and logged
    /// rather than retried forever.
    pub max_deposit_attempts: u32,
    /// Whether to record the full response/error text on deposit-record
    /// messages (gates verbosity, not whether the record itself is saved —
    /// the record is always saved so idempotence keeps working).
    pub store_response_data: bool,
    pub jper_base_url: Url,
    pub data_dir: PathBuf,
    /// `(from_prefix, to_prefix)` pairs applied to content links before
    /// they're dereferenced.
    pub host_rewrites: Vec<(String, String)>,
}

impl RelayConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config_file: Option<PathBuf>,
        default_since_date: Option<String>,
        default_since_delta_days: Option<i64>,
        long_cycle_retry_delay_seconds: Option<u64>,
        long_cycle_retry_limit: Option<u32>,
        max_deposit_attempts: Option<u32>,
        store_response_data: Option<bool>,
        jper_base_url: Option<String>,
        data_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let toml = config_file
            .as_deref()
            .and_then(load_toml)
            .unwrap_or_default();

        let default_since_date = default_since_date
            .or(toml.default_since_date)
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| eyre!("invalid default_since_date '{raw}': {e}"))
            })
            .transpose()?
            .unwrap_or_else(|| {
                Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
                    .single()
                    .expect("fixed epoch is valid")
            });

        let default_since_delta_days = default_since_delta_days
            .or(toml.default_since_delta_days)
            .unwrap_or(DEFAULT_SINCE_DELTA_DAYS);

        let long_cycle_retry_delay_seconds = long_cycle_retry_delay_seconds
            .or(toml.long_cycle_retry_delay_seconds)
            .unwrap_or(DEFAULT_LONG_CYCLE_RETRY_DELAY_SECONDS);

        let long_cycle_retry_limit = long_cycle_retry_limit
            .or(toml.long_cycle_retry_limit)
            .unwrap_or(DEFAULT_LONG_CYCLE_RETRY_LIMIT);

        let max_deposit_attempts = max_deposit_attempts
            .or(toml.max_deposit_attempts)
            .unwrap_or(DEFAULT_MAX_DEPOSIT_ATTEMPTS);

        let store_response_data = store_response_data
            .or(toml.store_response_data)
            .unwrap_or(false);

        let jper_base_url = std::env::var("RELAY_JPER_BASE_URL")
            .ok()
            .or(jper_base_url)
            .or(toml.jper_base_url)
            .ok_or_else(|| {
                eyre!("no JPER base URL provided. pass --jper-base-url, set RELAY_JPER_BASE_URL, or include jper_base_url in the config file")
            })?;
        let jper_base_url = Url::parse(&jper_base_url)
            .map_err(|e| eyre!("invalid jper base url '{jper_base_url}': {e}"))?;

        let data_dir = data_dir
            .or(toml.data_dir)
            .unwrap_or_else(|| PathBuf::from("relay-data"));

        if max_deposit_attempts == 0 {
            return Err(eyre!("max deposit attempts must be > 0"));
        }
        if long_cycle_retry_limit == 0 {
            tracing::warn!("long cycle retry limit is 0; accounts will be marked failing on their first deposit failure");
        }

        let host_rewrites = toml
            .host_rewrites
            .map(|pairs| {
                pairs
                    .into_iter()
                    .map(|[from, to]| (from, to))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| {
                vec![
                    (
                        "https://www.oa-deepgreen.de".to_string(),
                        "http://li31.int.zib.de".to_string(),
                    ),
                    (
                        "https://test.oa-deepgreen.de".to_string(),
                        "http://li31.int.zib.de".to_string(),
                    ),
                ]
            });

        Ok(Self {
            default_since_date,
            default_since_delta_days,
            long_cycle_retry_delay: ChronoDuration::seconds(long_cycle_retry_delay_seconds as i64),
            long_cycle_retry_limit,
            max_deposit_attempts,
            store_response_data,
            jper_base_url,
            data_dir,
            host_rewrites,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_applies_built_in_defaults_when_nothing_else_given() {
        let cfg = RelayConfig::assemble(
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
        .unwrap();
        assert_eq!(cfg.default_since_delta_days, DEFAULT_SINCE_DELTA_DAYS);
        assert_eq!(cfg.max_deposit_attempts, DEFAULT_MAX_DEPOSIT_ATTEMPTS);
        assert_eq!(cfg.host_rewrites.len(), 2);
    }

    #[test]
    fn assemble_requires_a_jper_base_url() {
        let result = RelayConfig::assemble(None, None, None, None, None, None, None, None, None);
        assert!(result.is_err());
    }

    #[test]
    fn assemble_rejects_zero_max_deposit_attempts() {
        let result = RelayConfig::assemble(
            None,
            None,
            None,
            None,
            None,
            Some(0),
            None,
            Some("https://jper.example/".to_string()),
            None,
        );
        assert!(result.is_err());
    }
}
