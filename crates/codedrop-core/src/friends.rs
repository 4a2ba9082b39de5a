//! Friend relationships, persisted under the `friends` record.
//!
//! Every user has one [`FriendEdgeSet`]. Operations touching two users are
//! applied to a loaded copy of the whole record and saved once, so the two
//! sides of an edge are never observed out of step.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use storage::Storage;
use tokio::sync::Mutex;

use crate::error::{Result, TransferError};

const STORE_NAME: &str = "friends";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEdgeSet {
    pub friends: BTreeSet<String>,
    pub requests_sent: BTreeSet<String>,
    pub requests_received: BTreeSet<String>,
}

/// How a search hit relates to the searching user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    Friend,
    Sent,
    Received,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub name: String,
    pub status: Relation,
}

impl FriendEdgeSet {
    pub fn relation_to(&self, other: &str) -> Relation {
        if self.friends.contains(other) {
            Relation::Friend
        } else if self.requests_sent.contains(other) {
            Relation::Sent
        } else if self.requests_received.contains(other) {
            Relation::Received
        } else {
            Relation::None
        }
    }
}

type FriendRecord = BTreeMap<String, FriendEdgeSet>;

fn edges_mut<'a>(record: &'a mut FriendRecord, user: &str) -> &'a mut FriendEdgeSet {
    record.entry(user.to_string()).or_default()
}

fn distinct_pair(a: &str, b: &str) -> Result<()> {
    if a.is_empty() || b.is_empty() {
        return Err(TransferError::invalid("user name must not be empty"));
    }
    if a == b {
        return Err(TransferError::invalid("cannot befriend yourself"));
    }
    Ok(())
}

/// `from` asks `to`. Returns whether anything changed.
fn apply_request(record: &mut FriendRecord, from: &str, to: &str) -> bool {
    let sender = edges_mut(record, from);
    if sender.friends.contains(to) || sender.requests_sent.contains(to) {
        return false;
    }
    if sender.requests_received.contains(to) {
        // Both sides asked: that is a friendship
        return apply_accept(record, from, to);
    }
    sender.requests_sent.insert(to.to_string());
    edges_mut(record, to).requests_received.insert(from.to_string());
    true
}

/// `user` accepts `requester`. Pending edges in either direction are cleared.
/// Returns whether anything changed.
fn apply_accept(record: &mut FriendRecord, user: &str, requester: &str) -> bool {
    let mut changed = clear_pending(record, user, requester);
    changed |= clear_pending(record, requester, user);
    changed |= edges_mut(record, user).friends.insert(requester.to_string());
    changed |= edges_mut(record, requester).friends.insert(user.to_string());
    changed
}

/// Drop the request `requester` sent to `user`, on both sides. Returns
/// whether anything changed.
fn clear_pending(record: &mut FriendRecord, user: &str, requester: &str) -> bool {
    let received = edges_mut(record, user).requests_received.remove(requester);
    let sent = edges_mut(record, requester).requests_sent.remove(user);
    received || sent
}

pub struct FriendGraph<S> {
    storage: Arc<S>,
    lock: Mutex<()>,
}

impl<S> FriendGraph<S>
where
    S: Storage + 'static,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<FriendRecord> {
        match self.storage.load(STORE_NAME).await? {
            Some(data) => Ok(serde_json::from_slice(&data).context("Failed to decode friends record")?),
            None => Ok(FriendRecord::new()),
        }
    }

    async fn save(&self, record: &FriendRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record).context("Failed to encode friends record")?;
        self.storage.save(STORE_NAME, &data).await?;
        Ok(())
    }

    /// Run `f` against a fresh copy of the record and persist the result in
    /// one save. Nothing is written when `f` reports no change. Returns
    /// whether anything changed.
    async fn transact<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&mut FriendRecord) -> bool,
    {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;
        let changed = f(&mut record);
        if changed {
            self.save(&record).await?;
        }
        Ok(changed)
    }

    async fn edges_of(&self, user: &str) -> Result<FriendEdgeSet> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(user).unwrap_or_default())
    }

    /// Make sure `user` has a (possibly empty) record.
    pub async fn ensure_user(&self, user: &str) -> Result<()> {
        self.transact(|record| {
            if record.contains_key(user) {
                return false;
            }
            record.insert(user.to_string(), FriendEdgeSet::default());
            true
        })
        .await?;
        Ok(())
    }

    /// `from` asks `to` to be friends. Repeating the request, or asking an
    /// existing friend, changes nothing.
    pub async fn send_request(&self, from: &str, to: &str) -> Result<()> {
        distinct_pair(from, to)?;
        if self.transact(|record| apply_request(record, from, to)).await? {
            tracing::info!("Friend request {} -> {}", from, to);
        } else {
            tracing::debug!("Friend request {} -> {} changed nothing", from, to);
        }
        Ok(())
    }

    /// `user` accepts `requester`. An already resolved request still ends in
    /// friendship.
    pub async fn accept(&self, user: &str, requester: &str) -> Result<()> {
        distinct_pair(user, requester)?;
        if self.transact(|record| apply_accept(record, user, requester)).await? {
            tracing::info!("{} and {} are now friends", user, requester);
        }
        Ok(())
    }

    /// `user` turns down `requester`. Existing friendships are untouched.
    pub async fn reject(&self, user: &str, requester: &str) -> Result<()> {
        distinct_pair(user, requester)?;
        if self.transact(|record| clear_pending(record, user, requester)).await? {
            tracing::info!("{} rejected {}", user, requester);
        }
        Ok(())
    }

    pub async fn relations(&self, user: &str) -> Result<FriendEdgeSet> {
        self.edges_of(user).await
    }

    pub async fn friends_of(&self, user: &str) -> Result<BTreeSet<String>> {
        Ok(self.edges_of(user).await?.friends)
    }

    pub async fn pending_sent_by(&self, user: &str) -> Result<BTreeSet<String>> {
        Ok(self.edges_of(user).await?.requests_sent)
    }

    pub async fn pending_received_by(&self, user: &str) -> Result<BTreeSet<String>> {
        Ok(self.edges_of(user).await?.requests_received)
    }

    /// Case-insensitive substring search over `candidates`, skipping
    /// `excluding`. Hits come back sorted by name.
    pub async fn search<'a, I>(&self, candidates: I, query: &str, excluding: &str) -> Result<Vec<SearchHit>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let edges = self.edges_of(excluding).await?;
        let needle = query.to_lowercase();

        let names: BTreeSet<&str> = candidates
            .into_iter()
            .filter(|name| *name != excluding && name.to_lowercase().contains(&needle))
            .collect();

        Ok(names
            .into_iter()
            .map(|name| SearchHit {
                name: name.to_string(),
                status: edges.relation_to(name),
            })
            .collect())
    }
}
