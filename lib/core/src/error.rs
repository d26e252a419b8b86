use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing or empty required input (no interactions, empty matrix).
    #[error("Data error: {0}")]
    Data(String),

    /// Empty training set or a numerically unstable training pass.
    #[error("Training error: {0}")]
    Training(String),

    #[error("Model not ready: no successful rebuild has been loaded")]
    NotReady,

    #[error(
        "Upstream fetch failed{}: {}",
        .status.map(|s| format!(" (status {})", s)).unwrap_or_default(),
        .detail
    )]
    UpstreamFetch { status: Option<u16>, detail: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn no_interactions() -> Self {
        Error::Data("no interactions".to_string())
    }

    /// Whether the caller may retry the same request without new data.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::NotReady | Error::UpstreamFetch { .. })
    }

    /// Short machine-readable name of the error class.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Data(_) => "data_error",
            Error::Training(_) => "training_error",
            Error::NotReady => "not_ready",
            Error::UpstreamFetch { .. } => "upstream_fetch_error",
            Error::Persistence(_) => "persistence_error",
            Error::Serialization(_) => "serialization_error",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
