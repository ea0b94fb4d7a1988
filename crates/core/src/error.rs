use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no supported files found in {0}")]
    NoSupportedFiles(String),

    #[error("document parse failed: {0}")]
    Parse(#[from] CollaboratorError),

    #[error("search backend error: {0}")]
    Search(#[from] SearchError),
}

/// Failure of one call to an external service (parser, embedder, keyword model).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} request timed out")]
    Timeout { service: &'static str },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned a malformed response: {details}")]
    Malformed {
        service: &'static str,
        details: String,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollaboratorError {
    pub(crate) fn from_transport(service: &'static str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout { service }
        } else {
            Self::Http(error)
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search engine unreachable at {endpoint}: {details}")]
    Unreachable { endpoint: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
