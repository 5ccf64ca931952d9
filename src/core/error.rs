use thiserror::Error;

#[derive(Error, Debug)]
pub enum KubepulseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type alias for kubepulse operations
pub type Result<T> = std::result::Result<T, KubepulseError>;

impl KubepulseError {
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

    /// Creates a new invalid sample error
    pub fn invalid_sample<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSample(msg.into())
    }

    /// Returns true if the failing operation can be retried on the next cycle
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Parse { .. } | Self::InvalidSample(_) | Self::NotFound(_) => true,
            Self::Config(_) | Self::Serialization(_) | Self::Yaml(_) | Self::Pattern(_) => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Yaml(_) | Self::Pattern(_) => "config",
            Self::Parse { .. } | Self::Serialization(_) => "serialization",
            Self::InvalidSample(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Io(_) => "io",
        }
    }
}
