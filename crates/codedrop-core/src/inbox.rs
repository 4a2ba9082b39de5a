//! Per-recipient inbox of pending deliveries, persisted under the `inbox`
//! record.
//!
//! Every operation is a single load-modify-save cycle under one lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use storage::Storage;
use tokio::sync::Mutex;

use crate::clock::{self, Timestamp};
use crate::code_store::CodeSpace;
use crate::error::{Result, TransferError};

const STORE_NAME: &str = "inbox";

/// A file dropped into a recipient's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxItem {
    pub id: String,
    pub filename: String,
    #[serde(rename = "data", with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub sender: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Listing view of an inbox item, without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub id: String,
    pub filename: String,
    pub sender: String,
    pub size: u64,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl InboxItem {
    pub fn entry(&self) -> InboxEntry {
        InboxEntry {
            id: self.id.clone(),
            filename: self.filename.clone(),
            sender: self.sender.clone(),
            size: self.payload.len() as u64,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Payload bytes are stored base64-encoded so the record stays plain JSON.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

type InboxRecord = BTreeMap<String, Vec<InboxItem>>;

/// Drop expired items of one recipient; removes the recipient when nothing
/// is left. Returns how many items went.
fn sweep_recipient(record: &mut InboxRecord, recipient: &str, now: Timestamp) -> usize {
    let Some(items) = record.get_mut(recipient) else {
        return 0;
    };
    let before = items.len();
    items.retain(|item| clock::is_live(item.expires_at, now));
    let removed = before - items.len();
    if items.is_empty() {
        record.remove(recipient);
    }
    removed
}

pub struct InboxStore<S> {
    storage: Arc<S>,
    lock: Mutex<()>,
    ids: CodeSpace,
    max_attempts: u32,
}

impl<S> InboxStore<S>
where
    S: Storage + 'static,
{
    pub fn new(storage: Arc<S>, ids: CodeSpace, max_attempts: u32) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
            ids,
            max_attempts,
        }
    }

    async fn load(&self) -> Result<InboxRecord> {
        match self.storage.load(STORE_NAME).await? {
            Some(data) => Ok(serde_json::from_slice(&data).context("Failed to decode inbox record")?),
            None => Ok(InboxRecord::new()),
        }
    }

    async fn save(&self, record: &InboxRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(record).context("Failed to encode inbox record")?;
        self.storage.save(STORE_NAME, &data).await?;
        Ok(())
    }

    /// Append a delivery to `recipient`'s inbox, creating it if needed.
    /// Returns the new item's id.
    pub async fn deliver(
        &self,
        recipient: &str,
        filename: &str,
        payload: Vec<u8>,
        sender: &str,
        ttl: Duration,
        now: Timestamp,
    ) -> Result<String> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;

        let items = record.entry(recipient.to_string()).or_default();
        let id = self.ids.draw_unique(self.max_attempts, items.len(), |candidate| {
            items.iter().any(|item| item.id == candidate)
        })?;

        let size = payload.len();
        items.push(InboxItem {
            id: id.clone(),
            filename: filename.to_string(),
            payload,
            sender: sender.to_string(),
            created_at: now,
            expires_at: clock::expiry(now, ttl),
        });

        self.save(&record).await?;
        tracing::info!("Delivered {} ({} bytes) from {} to {}", filename, size, sender, recipient);
        Ok(id)
    }

    /// Live items of `recipient` in delivery order. Expired items of this
    /// recipient are purged first.
    pub async fn list_live(&self, recipient: &str, now: Timestamp) -> Result<Vec<InboxItem>> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;

        if sweep_recipient(&mut record, recipient, now) > 0 {
            self.save(&record).await?;
        }

        Ok(record.remove(recipient).unwrap_or_default())
    }

    /// Remove and return the live item `id` from `recipient`'s inbox.
    pub async fn pop_by_id(&self, recipient: &str, id: &str, now: Timestamp) -> Result<InboxItem> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;

        let items = record.get_mut(recipient).ok_or(TransferError::NotFound)?;
        let index = items
            .iter()
            .position(|item| item.id == id && clock::is_live(item.expires_at, now))
            .ok_or(TransferError::NotFound)?;

        let item = items.remove(index);
        if items.is_empty() {
            record.remove(recipient);
        }

        self.save(&record).await?;
        tracing::info!("Inbox item {} of {} picked up", id, recipient);
        Ok(item)
    }

    /// Drop expired items for every recipient. Returns how many went.
    pub async fn sweep_all(&self, now: Timestamp) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut record = self.load().await?;

        let recipients: Vec<String> = record.keys().cloned().collect();
        let removed: usize = recipients
            .iter()
            .map(|recipient| sweep_recipient(&mut record, recipient, now))
            .sum();

        if removed > 0 {
            self.save(&record).await?;
        }
        Ok(removed)
    }
}
