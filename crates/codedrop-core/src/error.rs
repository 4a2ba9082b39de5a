use thiserror::Error;

/// Caller-visible outcomes of core operations.
///
/// Everything except `Storage` is a recoverable business outcome. `NotFound`
/// deliberately covers "never existed", "already consumed" and "expired".
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("not found or expired")]
    NotFound,
    #[error("{recipient} is not a friend of {sender}")]
    NotFriend { sender: String, recipient: String },
    #[error("no free code left after {attempts} attempts")]
    CapacityExhausted { attempts: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} is already registered")]
    AlreadyRegistered(String),
    #[error("{0} is not registered")]
    UnknownUser(String),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
