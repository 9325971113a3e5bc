//! The chain client contract the solver consumes. The RPC
//! transport, wallet keys, and address validation behind a real
//! implementation are out of scope — the solver only ever calls these
//! four synchronous operations.

/// Synchronous chain operations the coordinator polls. Implementations
/// are expected to be cheap to call repeatedly; the coordinator is the
/// only caller and never calls these from a worker thread.
pub trait ChainClient: Send + Sync {
    fn current_block_number(&self) -> anyhow::Result<u64>;

    fn current_difficulty(&self) -> anyhow::Result<u128>;

    /// Returns `None` for a null block hash; the coordinator treats that
    /// as a condition to retry, not as an error in itself.
    fn block_hash(&self, block_number: u64) -> anyhow::Result<Option<[u8; 32]>>;

    fn wallet_is_registered(&self) -> anyhow::Result<bool>;
}
