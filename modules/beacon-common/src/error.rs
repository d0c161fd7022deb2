/// Result type alias for beacon operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pipe unavailable: {0}")]
    PipeUnavailable(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
