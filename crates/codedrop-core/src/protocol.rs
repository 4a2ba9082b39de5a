//! Request/response protocol spoken between the CLI and a running service.
//!
//! - Every message is one frame: u32 big-endian length, then a bincode body.
//! - A connection carries any number of request/response pairs, in order.
//! - Service errors travel as [`Response::Error`] so the caller can still
//!   tell "not found" from "not a friend" from a storage failure.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;
use crate::friends::{FriendEdgeSet, SearchHit};
use crate::inbox::InboxEntry;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Register { first_name: String, last_name: String },
    Login { first_name: String, last_name: String },
    SendAnonymous { filename: String, payload: Vec<u8> },
    CheckCode { code: String },
    FetchByCode { code: String },
    DownloadStatus { code: String },
    SendToFriend { sender: String, recipient: String, filename: String, payload: Vec<u8> },
    ListInbox { user: String },
    FetchInboxItem { user: String, id: String },
    SendFriendRequest { user: String, target: String },
    AcceptFriendRequest { user: String, requester: String },
    RejectFriendRequest { user: String, requester: String },
    SearchUsers { user: String, query: String },
    ListFriends { user: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Identity { name: String },
    Code { code: String, share_url: String },
    CodeStatus { live: bool },
    File { filename: String, payload: Vec<u8>, sender: Option<String> },
    Downloaded { downloaded: bool },
    Delivered { id: String },
    Inbox { items: Vec<InboxEntry> },
    Relations { edges: FriendEdgeSet },
    SearchResults { hits: Vec<SearchHit> },
    Done,
    Error { kind: ErrorKind, message: String },
}

/// Wire-level classification of [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    NotFriend,
    CapacityExhausted,
    InvalidInput,
    AlreadyRegistered,
    UnknownUser,
    Storage,
}

impl From<&TransferError> for ErrorKind {
    fn from(err: &TransferError) -> Self {
        match err {
            TransferError::NotFound => ErrorKind::NotFound,
            TransferError::NotFriend { .. } => ErrorKind::NotFriend,
            TransferError::CapacityExhausted { .. } => ErrorKind::CapacityExhausted,
            TransferError::InvalidInput(_) => ErrorKind::InvalidInput,
            TransferError::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            TransferError::UnknownUser(_) => ErrorKind::UnknownUser,
            TransferError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<TransferError> for Response {
    fn from(err: TransferError) -> Self {
        Response::Error {
            kind: ErrorKind::from(&err),
            message: err.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("unexpected response to {0}")]
    UnexpectedResponse(&'static str),
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl ProtocolError {
    /// The service-side error kind, if the failure came from the service.
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            ProtocolError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub async fn write_frame<T, M>(transport: &mut T, message: &M) -> Result<(), ProtocolError>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize,
{
    let body = bincode::serialize(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    transport.write_all(&(body.len() as u32).to_be_bytes()).await?;
    transport.write_all(&body).await?;
    transport.flush().await?;
    Ok(())
}

/// Read one frame. `None` means the peer closed the connection cleanly
/// between frames.
pub async fn read_frame<T, M>(transport: &mut T) -> Result<Option<M>, ProtocolError>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    let mut lenb = [0u8; 4];
    // Only EOF before the first prefix byte is a clean close
    if transport.read(&mut lenb[..1]).await? == 0 {
        return Ok(None);
    }
    transport.read_exact(&mut lenb[1..]).await?;

    let len = u32::from_be_bytes(lenb) as usize;
    // Sanity check to prevent memory exhaustion
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut buf = vec![0u8; len];
    transport.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}
