//! In-memory reference implementations of the transport capabilities.
//!
//! `MemoryLedger` and `MemoryCache` back the test suites and let the
//! protocol run without a network node.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::address::derive_tryte_string;
use crate::{
    Address, Bundle, Error, Ledger, MAX_PAYLOAD_LEN, TRANSACTION_HASH_LEN, TransactionCache,
    TransactionHash, Trytes,
};

/// An append-only ledger held in process memory.
#[derive(Default)]
pub struct MemoryLedger {
    transactions: RwLock<HashMap<String, Bundle>>,
    by_address: RwLock<HashMap<Address, Vec<TransactionHash>>>,
    sequence: AtomicU64,
    fetches: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bundle fetches served, for cache behavior assertions.
    pub fn bundle_fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    fn hash_transaction(address: &Address, payload: &Trytes, sequence: u64) -> Result<TransactionHash, Error> {
        let mut hasher = Sha256::new();
        hasher.update(address.as_str().as_bytes());
        hasher.update(payload.as_str().as_bytes());
        hasher.update(sequence.to_be_bytes());
        let digest = hasher.finalize();

        let trytes = derive_tryte_string(&digest, b"transaction-hash", TRANSACTION_HASH_LEN)?;
        TransactionHash::from_str(&trytes)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn submit(
        &self,
        address: &Address,
        payload: &Trytes,
        tag: &str,
    ) -> Result<TransactionHash, Error> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::Transport(format!(
                "payload of {} trytes exceeds the {MAX_PAYLOAD_LEN} tryte transaction capacity",
                payload.len()
            )));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let hash = Self::hash_transaction(address, payload, sequence)?;
        let bundle = Bundle {
            hash: hash.clone(),
            address: address.clone(),
            payload: payload.clone(),
            tag: tag.to_string(),
        };

        self.transactions
            .write()
            .await
            .insert(hash.as_str().to_string(), bundle);
        self.by_address
            .write()
            .await
            .entry(address.clone())
            .or_default()
            .push(hash.clone());

        Ok(hash)
    }

    async fn find_transactions(&self, address: &Address) -> Result<Vec<TransactionHash>, Error> {
        Ok(self
            .by_address
            .read()
            .await
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_bundle(&self, hash: &TransactionHash) -> Result<Bundle, Error> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.transactions
            .read()
            .await
            .get(hash.as_str())
            .cloned()
            .ok_or_else(|| Error::Transport(format!("unknown transaction {hash}")))
    }
}

/// An address-partitioned transaction cache held in process memory.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<Address, Vec<Bundle>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionCache for MemoryCache {
    async fn load(&self, address: &Address) -> Result<Vec<Bundle>, Error> {
        Ok(self
            .entries
            .read()
            .await
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, bundle: Bundle) -> Result<(), Error> {
        let mut entries = self.entries.write().await;
        let slot = entries.entry(bundle.address.clone()).or_default();
        if !slot.iter().any(|known| known.hash == bundle.hash) {
            slot.push(bundle);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
