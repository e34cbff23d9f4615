use thiserror::Error;

#[derive(Error, Debug)]
pub enum CensusError {
    #[error("Host call '{operation}' timed out after {timeout_ms}ms")]
    HostTimeout { operation: String, timeout_ms: u64 },

    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Incompatible snapshot: {0}")]
    IncompatibleSnapshot(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Census service is already running")]
    AlreadyRunning,

    #[error("Census service is not running")]
    NotRunning,

    #[error("Scan worker error: {0}")]
    Worker(String),
}

impl CensusError {
    pub fn is_host_timeout(&self) -> bool {
        matches!(self, Self::HostTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CensusError>;

impl From<std::io::Error> for CensusError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CensusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
