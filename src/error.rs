use thiserror::Error;

/// Typed error surface for the relay engine, mirroring the error classes in
/// the error-handling design: transport failures against JPER, content-fetch
/// failures, hard deposit failures, and persistence I/O.
///
/// Soft deposit outcomes (`invalidxml`, `payloadtoolarge`) are *not*
/// represented here — they are not an error, just a terminal
/// [`crate::notification::Outcome`] variant, per §7 of the spec.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error contacting JPER: {0}")]
    Transport(String),

    #[error("failed to fetch content for notification {notification}: {source}")]
    ContentFetch {
        notification: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deposit failed during {phase} phase for notification {notification}: {message}")]
    Deposit {
        phase: DepositPhase,
        notification: String,
        message: String,
    },

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositPhase {
    Package,
    Metadata,
    Content,
    Complete,
}

impl std::fmt::Display for DepositPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DepositPhase::Package => "package",
            DepositPhase::Metadata => "metadata",
            DepositPhase::Content => "content",
            DepositPhase::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
