//! Transfer orchestration: routes each send through the code store or a
//! friend's inbox and exposes every boundary operation to the transport.

use std::collections::BTreeSet;
use std::sync::Arc;

use storage::Storage;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::code_store::{CodeStore, Transfer};
use crate::config::ServiceConfig;
use crate::error::{Result, TransferError};
use crate::friends::{FriendEdgeSet, FriendGraph, SearchHit};
use crate::inbox::{InboxItem, InboxStore};
use crate::sweeper::Sweeper;
use crate::users::UserDirectory;

pub struct TransferService<S> {
    cfg: ServiceConfig,
    clock: Arc<dyn Clock>,
    codes: Arc<CodeStore>,
    inbox: Arc<InboxStore<S>>,
    friends: FriendGraph<S>,
    users: UserDirectory<S>,
    sweeper: Sweeper<S>,
}

fn require(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TransferError::invalid(format!("{} is required", what)));
    }
    Ok(())
}

impl<S> TransferService<S>
where
    S: Storage + 'static,
{
    pub fn new(storage: S, cfg: ServiceConfig) -> Self {
        Self::with_clock(Arc::new(storage), cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<S>, cfg: ServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let codes = Arc::new(CodeStore::new(cfg.code_space, cfg.max_code_attempts));
        let inbox = Arc::new(InboxStore::new(
            Arc::clone(&storage),
            cfg.code_space,
            cfg.max_code_attempts,
        ));

        Self {
            sweeper: Sweeper::new(Arc::clone(&codes), Arc::clone(&inbox)),
            friends: FriendGraph::new(Arc::clone(&storage)),
            users: UserDirectory::new(storage),
            codes,
            inbox,
            clock,
            cfg,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.cfg
    }

    /// Sweep and return the instant the request is evaluated at.
    async fn sweep(&self) -> Result<Timestamp> {
        let now = self.clock.now();
        self.sweeper.run(now).await?;
        Ok(now)
    }

    /// Download link for `code`; this is what the QR image encodes.
    pub fn share_url(&self, code: &str) -> String {
        format!("{}/download/{}", self.cfg.public_base_url.trim_end_matches('/'), code)
    }

    pub async fn register(&self, first: &str, last: &str) -> Result<String> {
        let name = self.users.register(first, last, self.clock.now()).await?;
        self.friends.ensure_user(&name).await?;
        Ok(name)
    }

    pub async fn login(&self, first: &str, last: &str) -> Result<String> {
        self.users.login(first, last).await
    }

    /// Park a file under a fresh code for anonymous pickup.
    pub async fn send_anonymous(&self, filename: &str, payload: Vec<u8>) -> Result<String> {
        require(filename, "filename")?;
        let now = self.sweep().await?;
        self.codes.create(filename, payload, self.cfg.code_ttl(), now)
    }

    /// Whether `code` can currently be picked up, without consuming it.
    pub async fn check_code(&self, code: &str) -> Result<bool> {
        let now = self.sweep().await?;
        Ok(self.codes.is_live(code.trim(), now))
    }

    pub async fn receive_by_code(&self, code: &str) -> Result<Transfer> {
        let now = self.sweep().await?;
        self.codes.pop_if_live(code.trim(), now)
    }

    pub fn download_status(&self, code: &str) -> bool {
        self.codes.was_downloaded(code.trim())
    }

    /// Deliver into `recipient`'s inbox, provided the two are friends.
    pub async fn send_to_friend(
        &self,
        sender: &str,
        recipient: &str,
        filename: &str,
        payload: Vec<u8>,
    ) -> Result<String> {
        require(sender, "sender")?;
        require(recipient, "recipient")?;
        require(filename, "filename")?;
        let now = self.sweep().await?;

        if !self.friends.friends_of(sender).await?.contains(recipient) {
            tracing::warn!("Rejected delivery from {} to non-friend {}", sender, recipient);
            return Err(TransferError::NotFriend {
                sender: sender.to_string(),
                recipient: recipient.to_string(),
            });
        }

        self.inbox
            .deliver(recipient, filename, payload, sender, self.cfg.inbox_ttl(), now)
            .await
    }

    pub async fn list_inbox(&self, user: &str) -> Result<Vec<InboxItem>> {
        require(user, "user")?;
        let now = self.sweep().await?;
        self.inbox.list_live(user, now).await
    }

    pub async fn fetch_inbox_item(&self, user: &str, id: &str) -> Result<InboxItem> {
        require(user, "user")?;
        let now = self.sweep().await?;
        self.inbox.pop_by_id(user, id.trim(), now).await
    }

    pub async fn send_request(&self, user: &str, target: &str) -> Result<()> {
        self.friends.send_request(user, target).await
    }

    pub async fn accept_request(&self, user: &str, requester: &str) -> Result<()> {
        self.friends.accept(user, requester).await
    }

    pub async fn reject_request(&self, user: &str, requester: &str) -> Result<()> {
        self.friends.reject(user, requester).await
    }

    pub async fn relations(&self, user: &str) -> Result<FriendEdgeSet> {
        self.friends.relations(user).await
    }

    pub async fn friends_of(&self, user: &str) -> Result<BTreeSet<String>> {
        self.friends.friends_of(user).await
    }

    /// Search registered users by name on behalf of `user`.
    pub async fn search_users(&self, user: &str, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.chars().count() < self.cfg.min_query_len {
            return Err(TransferError::invalid(format!(
                "search query must be at least {} characters",
                self.cfg.min_query_len
            )));
        }

        let names = self.users.names().await?;
        let mut hits = self
            .friends
            .search(names.iter().map(String::as_str), query, user)
            .await?;
        hits.truncate(self.cfg.search_limit);
        Ok(hits)
    }
}
