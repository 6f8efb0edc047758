use thiserror::Error;

/// Application level error type used throughout the crate.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// I/O related failure
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error while parsing YAML configuration files
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error while encoding or decoding a JSON payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Inbound bus message that could not be decoded
    #[error("Malformed payload on '{topic}': {reason}")]
    Payload { topic: String, reason: String },

    /// Bus, serial or HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The coordinator event channel is gone
    #[error("Event channel closed")]
    ChannelClosed,
}

/// Convenient alias over [`Result`] using [`GatewayError`]
pub type Result<T> = std::result::Result<T, GatewayError>;
