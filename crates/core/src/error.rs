use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tab operation failed: {0}")]
    TabOperation(String),

    #[error("Native channel busy with another override")]
    ChannelBusy,

    #[error("Native channel closed: {0}")]
    ChannelClosed(String),

    #[error("Timed out waiting for reply: {0}")]
    Timeout(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
