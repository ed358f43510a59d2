use thiserror::Error;

/// Errors surfaced to callers of the supervisor.
#[derive(Debug, Error)]
pub enum Error {
    /// The control engine has shut down; its mailbox no longer accepts
    /// commands and pending replies were dropped. Not retryable.
    #[error("supervisor terminated")]
    Terminated,

    #[error("supervisor task failed: {0}")]
    Task(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
