use async_trait::async_trait;

use crate::{Address, Error, TransactionHash, Trytes};

/// Maximum payload size of a single ledger transaction, in trytes.
pub const MAX_PAYLOAD_LEN: usize = 2187;

/// A transaction bundle fetched from the ledger.
#[derive(Clone, Debug)]
pub struct Bundle {
    pub hash: TransactionHash,
    pub address: Address,
    pub payload: Trytes,
    pub tag: String,
}

/// Access to the append-only ledger.
///
/// The ledger is public, unordered and append-only: `submit` durably records
/// a payload at an address, and the only query primitive is finding all
/// transactions ever attached to an address. Implementations must tolerate
/// concurrent use.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Broadcast a payload to an address. Irrevocable once accepted.
    async fn submit(
        &self,
        address: &Address,
        payload: &Trytes,
        tag: &str,
    ) -> Result<TransactionHash, Error>;

    /// Hashes of every transaction attached to the address.
    async fn find_transactions(&self, address: &Address) -> Result<Vec<TransactionHash>, Error>;

    /// Fetch the full bundle for a transaction hash.
    async fn fetch_bundle(&self, hash: &TransactionHash) -> Result<Bundle, Error>;
}
