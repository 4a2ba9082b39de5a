//! Service side of a connection: read requests, answer them in order.

use storage::Storage;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::protocol::{read_frame, write_frame, ProtocolError, Request, Response};
use crate::service::TransferService;

/// Serve requests from `transport` until the peer hangs up.
pub async fn serve_connection<S, T>(service: &TransferService<S>, transport: &mut T) -> std::result::Result<(), ProtocolError>
where
    S: Storage + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut handled = 0usize;
    while let Some(request) = read_frame::<_, Request>(transport).await? {
        let response = dispatch(service, request).await;
        write_frame(transport, &response).await?;
        handled += 1;
    }
    tracing::debug!("Connection closed after {} requests", handled);
    Ok(())
}

/// Run one request against the service.
pub async fn dispatch<S>(service: &TransferService<S>, request: Request) -> Response
where
    S: Storage + 'static,
{
    match handle(service, request).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!("Request failed: {}", err);
            Response::from(err)
        }
    }
}

async fn handle<S>(service: &TransferService<S>, request: Request) -> Result<Response>
where
    S: Storage + 'static,
{
    let response = match request {
        Request::Register { first_name, last_name } => Response::Identity {
            name: service.register(&first_name, &last_name).await?,
        },
        Request::Login { first_name, last_name } => Response::Identity {
            name: service.login(&first_name, &last_name).await?,
        },
        Request::SendAnonymous { filename, payload } => {
            let code = service.send_anonymous(&filename, payload).await?;
            Response::Code {
                share_url: service.share_url(&code),
                code,
            }
        }
        Request::CheckCode { code } => Response::CodeStatus {
            live: service.check_code(&code).await?,
        },
        Request::FetchByCode { code } => {
            let transfer = service.receive_by_code(&code).await?;
            Response::File {
                filename: transfer.filename,
                payload: transfer.payload,
                sender: None,
            }
        }
        Request::DownloadStatus { code } => Response::Downloaded {
            downloaded: service.download_status(&code),
        },
        Request::SendToFriend { sender, recipient, filename, payload } => Response::Delivered {
            id: service.send_to_friend(&sender, &recipient, &filename, payload).await?,
        },
        Request::ListInbox { user } => Response::Inbox {
            items: service
                .list_inbox(&user)
                .await?
                .iter()
                .map(|item| item.entry())
                .collect(),
        },
        Request::FetchInboxItem { user, id } => {
            let item = service.fetch_inbox_item(&user, &id).await?;
            Response::File {
                filename: item.filename,
                payload: item.payload,
                sender: Some(item.sender),
            }
        }
        Request::SendFriendRequest { user, target } => {
            service.send_request(&user, &target).await?;
            Response::Done
        }
        Request::AcceptFriendRequest { user, requester } => {
            service.accept_request(&user, &requester).await?;
            Response::Done
        }
        Request::RejectFriendRequest { user, requester } => {
            service.reject_request(&user, &requester).await?;
            Response::Done
        }
        Request::SearchUsers { user, query } => Response::SearchResults {
            hits: service.search_users(&user, &query).await?,
        },
        Request::ListFriends { user } => Response::Relations {
            edges: service.relations(&user).await?,
        },
    };
    Ok(response)
}
