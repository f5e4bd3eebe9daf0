use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid start time metric regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Downstream sink error: {0}")]
    Sink(String),

    #[error("Pipeline is shutting down")]
    Shutdown,
}

/// Result type alias for sidecar operations
pub type Result<T> = std::result::Result<T, SidecarError>;

impl SidecarError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Creates a new sink error
    pub fn sink<S: Into<String>>(msg: S) -> Self {
        Self::Sink(msg.into())
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ChannelSend | Self::Sink(_))
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::InvalidRegex(_) => "config",
            Self::Parse { .. } | Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::ChannelSend => "channel",
            Self::Sink(_) => "sink",
            Self::Shutdown => "lifecycle",
        }
    }
}
