pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::OracleError;
use crate::types::{
    DataRequest, DexPair, FailedFulfilment, Fulfillment, NewDataRequest, SupportedPair,
    TokenContract,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Current `version_info` schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Durable record of every request and of the caches the resolvers read.
///
/// Every request mutation is an update-by-primary-key. Rows whose
/// `job_status` is already terminal are never rewritten.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a request. Returns `false` when the `request_id` already exists.
    async fn insert_request(&self, request: NewDataRequest) -> Result<bool, OracleError>;

    async fn get_request(&self, request_id: &str) -> Result<Option<DataRequest>, OracleError>;

    /// Pending requests in insertion order.
    async fn pending_requests(&self) -> Result<Vec<DataRequest>, OracleError>;

    /// Persists the mutable fields of a pending request.
    /// Returns `false` when the stored row is already terminal.
    async fn save_request(&self, request: &DataRequest) -> Result<bool, OracleError>;

    /// Closes a pending request as `SUCCESS`. Idempotent: returns `false` when
    /// the request is unknown or already terminal.
    async fn mark_fulfilled(
        &self,
        request_id: &str,
        fulfillment: &Fulfillment,
    ) -> Result<bool, OracleError>;

    async fn record_failed_fulfilment(&self, failed: &FailedFulfilment)
        -> Result<(), OracleError>;

    async fn failed_fulfilments(
        &self,
        request_id: &str,
    ) -> Result<Vec<FailedFulfilment>, OracleError>;

    async fn last_block_seen(&self) -> Result<Option<u64>, OracleError>;

    /// Appends `block` to the checkpoint log if it is strictly greater than the
    /// current value. Returns whether the checkpoint moved.
    async fn advance_last_block_seen(&self, block: u64) -> Result<bool, OracleError>;

    async fn upsert_supported_pairs(&self, pairs: &[SupportedPair]) -> Result<(), OracleError>;

    async fn supported_pair(
        &self,
        base: &str,
        target: &str,
    ) -> Result<Option<SupportedPair>, OracleError>;

    /// Upserts a pool keyed by `(dex, pair)`. An existing pool with more
    /// liquidity under a different contract is kept.
    async fn upsert_dex_pair(&self, pair: &DexPair) -> Result<(), OracleError>;

    /// Looks up a pool for `base`/`target` in either token order.
    async fn dex_pair(
        &self,
        base: &str,
        target: &str,
        dex: &str,
    ) -> Result<Option<DexPair>, OracleError>;

    async fn upsert_token_contract(&self, token: &TokenContract) -> Result<(), OracleError>;

    async fn token_contract(
        &self,
        symbol: &str,
        chain: &str,
    ) -> Result<Option<TokenContract>, OracleError>;

    async fn schema_version(&self) -> Result<Option<i32>, OracleError>;
}

/// Picks which of two cached pools for the same key to keep.
pub(crate) fn keep_existing_pool(existing: &DexPair, incoming: &DexPair) -> bool {
    existing.contract_address != incoming.contract_address
        && existing.reserve_usd > incoming.reserve_usd
}
