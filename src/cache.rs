use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{Address, Bundle, Error, Ledger, TransactionHash, Trytes};

/// Local persistence for fetched transactions, keyed by address.
///
/// The cache only deduplicates retrieval: without it every poll re-fetches
/// the full address history from the ledger, which stays correct but slow.
/// Implementations must keep addresses independent so concurrent pollers for
/// different contacts never contend.
#[async_trait]
pub trait TransactionCache: Send + Sync {
    /// All bundles previously stored for the address.
    async fn load(&self, address: &Address) -> Result<Vec<Bundle>, Error>;

    /// Store a fetched bundle.
    async fn save(&self, bundle: Bundle) -> Result<(), Error>;

    /// Persist any buffered state.
    async fn flush(&self) -> Result<(), Error>;
}

/// Ledger read path that merges cached bundles with newly fetched ones.
#[derive(Clone)]
pub struct CachedLedger {
    ledger: Arc<dyn Ledger>,
    cache: Arc<dyn TransactionCache>,
}

impl CachedLedger {
    pub fn new(ledger: Arc<dyn Ledger>, cache: Arc<dyn TransactionCache>) -> Self {
        Self { ledger, cache }
    }

    /// Every bundle at the address: cached entries plus anything the ledger
    /// has that the cache has not seen yet. New bundles are cached before
    /// they are returned.
    pub async fn read(&self, address: &Address) -> Result<Vec<Bundle>, Error> {
        let mut bundles = self.cache.load(address).await?;
        let known: HashSet<TransactionHash> =
            bundles.iter().map(|bundle| bundle.hash.clone()).collect();

        let hashes = self.ledger.find_transactions(address).await?;
        let mut fetched = 0usize;
        for hash in hashes {
            if known.contains(&hash) {
                continue;
            }
            let bundle = self.ledger.fetch_bundle(&hash).await?;
            self.cache.save(bundle.clone()).await?;
            bundles.push(bundle);
            fetched += 1;
        }

        debug!(%address, cached = bundles.len() - fetched, fetched, "read address");
        Ok(bundles)
    }

    /// Submit a payload, bypassing the cache.
    pub async fn submit(
        &self,
        address: &Address,
        payload: &Trytes,
        tag: &str,
    ) -> Result<TransactionHash, Error> {
        self.ledger.submit(address, payload, tag).await
    }

    /// Flush the underlying cache.
    pub async fn flush(&self) -> Result<(), Error> {
        self.cache.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryLedger};
    use crate::{Seed, derive_addresses};

    fn test_address(byte: u8) -> Address {
        derive_addresses(&Seed::from([byte; 32]), 0, 1)
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_read_merges_cache_and_ledger() {
        let ledger = Arc::new(MemoryLedger::new());
        let cached = CachedLedger::new(ledger.clone(), Arc::new(MemoryCache::new()));
        let address = test_address(1);

        cached
            .submit(&address, &Trytes::from_bytes(b"one"), "TAG")
            .await
            .unwrap();
        assert_eq!(cached.read(&address).await.unwrap().len(), 1);

        // A second submission appears alongside the cached entry
        cached
            .submit(&address, &Trytes::from_bytes(b"two"), "TAG")
            .await
            .unwrap();
        assert_eq!(cached.read(&address).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cached_entries_are_not_refetched() {
        let ledger = Arc::new(MemoryLedger::new());
        let cached = CachedLedger::new(ledger.clone(), Arc::new(MemoryCache::new()));
        let address = test_address(2);

        cached
            .submit(&address, &Trytes::from_bytes(b"payload"), "TAG")
            .await
            .unwrap();

        cached.read(&address).await.unwrap();
        let fetches_after_first = ledger.bundle_fetches();

        cached.read(&address).await.unwrap();
        assert_eq!(ledger.bundle_fetches(), fetches_after_first);
    }

    #[tokio::test]
    async fn test_addresses_stay_independent() {
        let cached = CachedLedger::new(
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryCache::new()),
        );
        let first = test_address(3);
        let second = test_address(4);

        cached
            .submit(&first, &Trytes::from_bytes(b"here"), "TAG")
            .await
            .unwrap();

        assert_eq!(cached.read(&first).await.unwrap().len(), 1);
        assert!(cached.read(&second).await.unwrap().is_empty());
    }
}
