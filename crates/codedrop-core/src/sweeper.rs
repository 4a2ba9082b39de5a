//! Inline expiry sweep run before every request that touches the code store
//! or the inbox. Cost is proportional to what is live, not to history.

use std::sync::Arc;

use storage::Storage;

use crate::clock::Timestamp;
use crate::code_store::CodeStore;
use crate::error::Result;
use crate::inbox::InboxStore;

pub struct Sweeper<S> {
    codes: Arc<CodeStore>,
    inbox: Arc<InboxStore<S>>,
}

impl<S> Sweeper<S>
where
    S: Storage + 'static,
{
    pub fn new(codes: Arc<CodeStore>, inbox: Arc<InboxStore<S>>) -> Self {
        Self { codes, inbox }
    }

    pub async fn run(&self, now: Timestamp) -> Result<()> {
        let codes = self.codes.sweep_expired(now);
        let items = self.inbox.sweep_all(now).await?;
        if codes > 0 || items > 0 {
            tracing::debug!("Sweep dropped {} code transfers and {} inbox items", codes, items);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_store::CodeSpace;
    use std::time::Duration;
    use storage::MemoryStorage;

    #[tokio::test]
    async fn test_sweeps_both_stores() -> Result<()> {
        let codes = Arc::new(CodeStore::new(CodeSpace::default(), 64));
        let inbox = Arc::new(InboxStore::new(Arc::new(MemoryStorage::new()), CodeSpace::default(), 64));
        let sweeper = Sweeper::new(Arc::clone(&codes), Arc::clone(&inbox));

        let ttl = Duration::from_secs(5);
        codes.create("a", vec![], ttl, 0)?;
        inbox.deliver("Bob B", "b", vec![], "Ann A", ttl, 0).await?;

        sweeper.run(4).await?;
        assert_eq!(codes.live_count(), 1);

        sweeper.run(5).await?;
        assert_eq!(codes.live_count(), 0);
        assert_eq!(inbox.sweep_all(5).await?, 0);
        Ok(())
    }
}
