use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Configuration(String),

    #[error("{message}")]
    InvalidInput { message: String, hint: String },

    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        body: String,
    },

    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status the gateway answers with for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::Configuration(_) | Error::Transport(_) | Error::Url(_) | Error::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short error kind, reported as `type` in error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::InvalidInput { .. } => "InvalidInput",
            Error::Upstream { .. } => "UpstreamError",
            Error::Transport(e) if e.is_timeout() => "TimeoutError",
            Error::Transport(_) => "TransportError",
            Error::Url(_) => "UrlError",
            Error::Json(_) => "JsonError",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
