use thiserror::Error;

/// Faults a node can hit while a session is up.
///
/// `Transport`, `ShortTransfer` and `Timeout` end the session (Connected -> Lost);
/// `State` reports a rejected lifecycle transition and never reaches the wire.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("timeout waiting for peer")]
    Timeout,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

impl LinkError {
    /// Malformed records have no recovery path, so they count as transport failures.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ShortTransfer { .. })
    }

    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::ShortTransfer { .. } => "short_transfer",
            Self::Timeout => "timeout",
            Self::Hardware(_) => "hardware",
            Self::Config(_) => "config",
            Self::State(_) => "state",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing role")]
    MissingRole,
    #[error("missing connector")]
    MissingConnector,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
