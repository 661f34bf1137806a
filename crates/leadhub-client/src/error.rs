use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("{message} ({code}, status {status})")]
    Api { status: u16, code: String, message: String },

    #[error("realtime feed: {0}")]
    Feed(String),

    #[error("invalid server url '{0}'")]
    Url(String),
}
