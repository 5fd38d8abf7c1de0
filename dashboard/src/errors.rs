use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay request failed: {0}")]
    Transport(String),

    #[error("all {attempts} routes failed, last error: {last_error}")]
    Exhausted { attempts: usize, last_error: String },
}

pub type Result<T> = std::result::Result<T, FetchError>;
