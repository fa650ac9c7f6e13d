//! Error types and handling for QueryPulse

use thiserror::Error;

/// Result type alias for QueryPulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// QueryPulse error types
///
/// Failures of the caller's own work never appear here: the executor hands
/// them back unchanged so the layer stays transparent on the failure path.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("No performance data available for query '{query_id}'")]
    NoData { query_id: String },

    #[error("Analysis error: {0}")]
    Analysis(String),
}

impl Error {
    /// True for the recoverable "nothing recorded yet" analysis outcome
    pub fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_data_is_distinguishable() {
        let err = Error::NoData { query_id: "q1".to_string() };
        assert!(err.is_no_data());
        assert!(err.to_string().contains("q1"));
        assert!(!Error::Analysis("boom".to_string()).is_no_data());
    }
}
