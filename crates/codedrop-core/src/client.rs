//! Typed client for a running service.
//!
//! The client expects a connected transport stream (usually TCP) that
//! implements AsyncRead + AsyncWrite, and issues one request at a time.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::friends::{FriendEdgeSet, SearchHit};
use crate::inbox::InboxEntry;
use crate::protocol::{read_frame, write_frame, ProtocolError, Request, Response};

type Result<T> = std::result::Result<T, ProtocolError>;

/// A received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub filename: String,
    pub payload: Vec<u8>,
    pub sender: Option<String>,
}

pub struct Client<T> {
    transport: T,
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send one request and wait for its response. Service errors come back
    /// as [`ProtocolError::Remote`].
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        write_frame(&mut self.transport, request).await?;
        match read_frame(&mut self.transport).await? {
            Some(Response::Error { kind, message }) => Err(ProtocolError::Remote { kind, message }),
            Some(response) => Ok(response),
            None => Err(ProtocolError::Closed),
        }
    }

    pub async fn register(&mut self, first_name: &str, last_name: &str) -> Result<String> {
        let request = Request::Register {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        match self.call(&request).await? {
            Response::Identity { name } => Ok(name),
            _ => Err(ProtocolError::UnexpectedResponse("register")),
        }
    }

    pub async fn login(&mut self, first_name: &str, last_name: &str) -> Result<String> {
        let request = Request::Login {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        };
        match self.call(&request).await? {
            Response::Identity { name } => Ok(name),
            _ => Err(ProtocolError::UnexpectedResponse("login")),
        }
    }

    /// Returns the code and its share URL.
    pub async fn send_anonymous(&mut self, filename: &str, payload: Vec<u8>) -> Result<(String, String)> {
        let request = Request::SendAnonymous {
            filename: filename.to_string(),
            payload,
        };
        match self.call(&request).await? {
            Response::Code { code, share_url } => Ok((code, share_url)),
            _ => Err(ProtocolError::UnexpectedResponse("send")),
        }
    }

    pub async fn check_code(&mut self, code: &str) -> Result<bool> {
        match self.call(&Request::CheckCode { code: code.to_string() }).await? {
            Response::CodeStatus { live } => Ok(live),
            _ => Err(ProtocolError::UnexpectedResponse("check code")),
        }
    }

    pub async fn fetch_by_code(&mut self, code: &str) -> Result<ReceivedFile> {
        let response = self.call(&Request::FetchByCode { code: code.to_string() }).await?;
        into_file(response, "fetch by code")
    }

    pub async fn download_status(&mut self, code: &str) -> Result<bool> {
        match self.call(&Request::DownloadStatus { code: code.to_string() }).await? {
            Response::Downloaded { downloaded } => Ok(downloaded),
            _ => Err(ProtocolError::UnexpectedResponse("download status")),
        }
    }

    pub async fn send_to_friend(
        &mut self,
        sender: &str,
        recipient: &str,
        filename: &str,
        payload: Vec<u8>,
    ) -> Result<String> {
        let request = Request::SendToFriend {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            filename: filename.to_string(),
            payload,
        };
        match self.call(&request).await? {
            Response::Delivered { id } => Ok(id),
            _ => Err(ProtocolError::UnexpectedResponse("send to friend")),
        }
    }

    pub async fn list_inbox(&mut self, user: &str) -> Result<Vec<InboxEntry>> {
        match self.call(&Request::ListInbox { user: user.to_string() }).await? {
            Response::Inbox { items } => Ok(items),
            _ => Err(ProtocolError::UnexpectedResponse("list inbox")),
        }
    }

    pub async fn fetch_inbox_item(&mut self, user: &str, id: &str) -> Result<ReceivedFile> {
        let request = Request::FetchInboxItem {
            user: user.to_string(),
            id: id.to_string(),
        };
        let response = self.call(&request).await?;
        into_file(response, "fetch inbox item")
    }

    pub async fn send_friend_request(&mut self, user: &str, target: &str) -> Result<()> {
        let request = Request::SendFriendRequest {
            user: user.to_string(),
            target: target.to_string(),
        };
        expect_done(self.call(&request).await?, "friend request")
    }

    pub async fn accept_friend_request(&mut self, user: &str, requester: &str) -> Result<()> {
        let request = Request::AcceptFriendRequest {
            user: user.to_string(),
            requester: requester.to_string(),
        };
        expect_done(self.call(&request).await?, "accept")
    }

    pub async fn reject_friend_request(&mut self, user: &str, requester: &str) -> Result<()> {
        let request = Request::RejectFriendRequest {
            user: user.to_string(),
            requester: requester.to_string(),
        };
        expect_done(self.call(&request).await?, "reject")
    }

    pub async fn search_users(&mut self, user: &str, query: &str) -> Result<Vec<SearchHit>> {
        let request = Request::SearchUsers {
            user: user.to_string(),
            query: query.to_string(),
        };
        match self.call(&request).await? {
            Response::SearchResults { hits } => Ok(hits),
            _ => Err(ProtocolError::UnexpectedResponse("search")),
        }
    }

    pub async fn list_friends(&mut self, user: &str) -> Result<FriendEdgeSet> {
        match self.call(&Request::ListFriends { user: user.to_string() }).await? {
            Response::Relations { edges } => Ok(edges),
            _ => Err(ProtocolError::UnexpectedResponse("list friends")),
        }
    }
}

fn into_file(response: Response, op: &'static str) -> Result<ReceivedFile> {
    match response {
        Response::File { filename, payload, sender } => Ok(ReceivedFile { filename, payload, sender }),
        _ => Err(ProtocolError::UnexpectedResponse(op)),
    }
}

fn expect_done(response: Response, op: &'static str) -> Result<()> {
    match response {
        Response::Done => Ok(()),
        _ => Err(ProtocolError::UnexpectedResponse(op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::friends::Relation;
    use crate::protocol::ErrorKind;
    use crate::service::TransferService;
    use crate::session::serve_connection;
    use std::sync::Arc;
    use storage::MemoryStorage;
    use tokio::io::DuplexStream;

    fn connect() -> Client<DuplexStream> {
        let service = Arc::new(TransferService::new(MemoryStorage::new(), ServiceConfig::default()));
        let (client_side, mut server_side) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            serve_connection(service.as_ref(), &mut server_side).await.unwrap();
        });
        Client::new(client_side)
    }

    #[tokio::test]
    async fn test_code_transfer_over_connection() -> Result<()> {
        let mut client = connect();

        let (code, url) = client.send_anonymous("a.txt", b"12345".to_vec()).await?;
        assert!(url.ends_with(&code));
        assert!(client.check_code(&code).await?);
        assert!(!client.download_status(&code).await?);

        let file = client.fetch_by_code(&code).await?;
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.payload, b"12345");
        assert_eq!(file.sender, None);

        let err = client.fetch_by_code(&code).await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::NotFound));
        assert!(client.download_status(&code).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_friend_flow_over_connection() -> Result<()> {
        let mut client = connect();
        let ann = client.register("Ann", "A").await?;
        let bob = client.register("Bob", "B").await?;

        let err = client.send_to_friend(&ann, &bob, "f.txt", vec![7]).await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::NotFriend));

        client.send_friend_request(&ann, &bob).await?;
        let hits = client.search_users(&bob, "ann").await?;
        assert_eq!(hits[0].status, Relation::Received);

        client.accept_friend_request(&bob, &ann).await?;
        assert!(client.list_friends(&ann).await?.friends.contains(&bob));

        let id = client.send_to_friend(&ann, &bob, "f.txt", vec![7]).await?;
        let inbox = client.list_inbox(&bob).await?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].size, 1);

        let file = client.fetch_inbox_item(&bob, &id).await?;
        assert_eq!(file.sender.as_deref(), Some("Ann A"));
        assert!(client.list_inbox(&bob).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_reject_over_connection() -> Result<()> {
        let mut client = connect();
        client.send_friend_request("Ann A", "Bob B").await?;
        client.reject_friend_request("Bob B", "Ann A").await?;
        assert_eq!(client.list_friends("Bob B").await?, FriendEdgeSet::default());

        let err = client.login("Nobody", "Here").await.unwrap_err();
        assert_eq!(err.remote_kind(), Some(ErrorKind::UnknownUser));
        Ok(())
    }
}
