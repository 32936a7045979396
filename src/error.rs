use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("WebSocket error: {0}")]
    SocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("Invalid credential: {0}")]
    CredentialError(String),
}

/// The one error a `StateSink` implementation may hand back from a commit.
/// The flush path logs it and drops the batch; it is never propagated.
#[derive(Error, Debug)]
#[error("sink commit failed: {0}")]
pub struct SinkError(String);

impl SinkError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
