//! CodeDrop Core - code and inbox based file hand-off
//!
//! Anonymous transfers are parked under a short numeric code and consumed
//! exactly once. Registered users can instead drop files straight into a
//! friend's inbox, gated by a mutual friend relationship.

pub mod clock;
pub mod config;
pub mod error;
pub mod code_store;
pub mod inbox;
pub mod friends;
pub mod users;
pub mod sweeper;
pub mod service;
pub mod protocol;
pub mod session;
pub mod client;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::ServiceConfig;
pub use error::{Result, TransferError};
pub use code_store::{CodeSpace, CodeStore, Transfer};
pub use inbox::{InboxEntry, InboxItem, InboxStore};
pub use friends::{FriendEdgeSet, FriendGraph, Relation, SearchHit};
pub use users::UserDirectory;
pub use service::TransferService;
pub use protocol::{ErrorKind, ProtocolError, Request, Response};
pub use client::{Client, ReceivedFile};
