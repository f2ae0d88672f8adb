use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Errors worth retrying on the next refresh cycle.
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Error::HttpError(_) | Error::Timeout(_) | Error::Io(_) | Error::Persistence(_)
        )
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::InvalidUrl(_) | Error::Config(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Error::FeedParse(_) => "FEED_PARSE",
            Error::HttpError(_) => "HTTP_ERROR",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::Timeout(_) => "TIMEOUT",
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Config(_) => "CONFIG",
            Error::Persistence(_) => "PERSISTENCE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Invalid(_) => "INVALID",
        }
    }
}
