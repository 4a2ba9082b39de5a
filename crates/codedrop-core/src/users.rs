//! Registered identities, persisted under the `users` record.
//!
//! An identity is just the normalized display name "First Last". No
//! credential is attached to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use storage::Storage;
use tokio::sync::Mutex;

use crate::clock::Timestamp;
use crate::error::{Result, TransferError};

const STORE_NAME: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub registered_at: Timestamp,
}

type UsersRecord = BTreeMap<String, UserRecord>;

/// Build the identity for a first/last name pair.
pub fn normalize_name(first: &str, last: &str) -> Result<String> {
    let (first, last) = (first.trim(), last.trim());
    if first.is_empty() || last.is_empty() {
        return Err(TransferError::invalid("please enter both first and last name"));
    }
    Ok(format!("{} {}", first, last))
}

pub struct UserDirectory<S> {
    storage: Arc<S>,
    lock: Mutex<()>,
}

impl<S> UserDirectory<S>
where
    S: Storage + 'static,
{
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<UsersRecord> {
        match self.storage.load(STORE_NAME).await? {
            Some(data) => Ok(serde_json::from_slice(&data).context("Failed to decode users record")?),
            None => Ok(UsersRecord::new()),
        }
    }

    pub async fn register(&self, first: &str, last: &str, now: Timestamp) -> Result<String> {
        let name = normalize_name(first, last)?;

        let _guard = self.lock.lock().await;
        let mut users = self.load().await?;
        if users.contains_key(&name) {
            return Err(TransferError::AlreadyRegistered(name));
        }
        users.insert(name.clone(), UserRecord { registered_at: now });

        let data = serde_json::to_vec_pretty(&users).context("Failed to encode users record")?;
        self.storage.save(STORE_NAME, &data).await?;

        tracing::info!("Registered {}", name);
        Ok(name)
    }

    /// Resolve a first/last pair to a registered identity.
    pub async fn login(&self, first: &str, last: &str) -> Result<String> {
        let name = normalize_name(first, last)?;
        if !self.contains(&name).await? {
            return Err(TransferError::UnknownUser(name));
        }
        Ok(name)
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.contains_key(name))
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_keys().collect())
    }
}
