use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{keep_existing_pool, JobStore, SCHEMA_VERSION};
use crate::error::OracleError;
use crate::types::{
    DataRequest, DexPair, FailedFulfilment, Fulfillment, JobStatus, NewDataRequest,
    RequestStatus, SupportedPair, TokenContract,
};

#[derive(Debug, Default)]
struct Tables {
    requests: Vec<DataRequest>,
    failed: Vec<FailedFulfilment>,
    to_blocks: Vec<u64>,
    supported_pairs: HashMap<String, SupportedPair>,
    dex_pairs: HashMap<(String, String), DexPair>,
    token_contracts: HashMap<(String, String), TokenContract>,
}

/// Process-local store with the same semantics as [`super::PgStore`].
/// Used for `memory://` databases and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every checkpoint ever written, oldest first.
    pub async fn checkpoints(&self) -> Vec<u64> {
        self.tables.read().await.to_blocks.clone()
    }

    pub async fn all_requests(&self) -> Vec<DataRequest> {
        self.tables.read().await.requests.clone()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_request(&self, request: NewDataRequest) -> Result<bool, OracleError> {
        let mut tables = self.tables.write().await;
        if tables
            .requests
            .iter()
            .any(|r| r.request_id == request.request_id)
        {
            return Ok(false);
        }
        let id = tables.requests.len() as i64 + 1;
        tables.requests.push(request.into_request(id));
        Ok(true)
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<DataRequest>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .iter()
            .find(|r| r.request_id == request_id)
            .cloned())
    }

    async fn pending_requests(&self) -> Result<Vec<DataRequest>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .requests
            .iter()
            .filter(|r| r.job_status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn save_request(&self, request: &DataRequest) -> Result<bool, OracleError> {
        let mut tables = self.tables.write().await;
        match tables
            .requests
            .iter_mut()
            .find(|r| r.id == request.id && r.job_status == JobStatus::Pending)
        {
            Some(row) => {
                let (id, request_id) = (row.id, row.request_id.clone());
                *row = request.clone();
                row.id = id;
                row.request_id = request_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_fulfilled(
        &self,
        request_id: &str,
        fulfillment: &Fulfillment,
    ) -> Result<bool, OracleError> {
        let mut tables = self.tables.write().await;
        match tables
            .requests
            .iter_mut()
            .find(|r| r.request_id == request_id && r.job_status == JobStatus::Pending)
        {
            Some(row) => {
                row.set_status(RequestStatus::Success);
                row.status_reason = None;
                row.fulfill_tx_hash = Some(fulfillment.tx_hash.clone());
                row.fulfill_confirmed_block = fulfillment.block_number;
                row.fulfill_gas_used = fulfillment.gas_used;
                row.fulfill_gas_price = fulfillment.gas_price;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failed_fulfilment(
        &self,
        failed: &FailedFulfilment,
    ) -> Result<(), OracleError> {
        self.tables.write().await.failed.push(failed.clone());
        Ok(())
    }

    async fn failed_fulfilments(
        &self,
        request_id: &str,
    ) -> Result<Vec<FailedFulfilment>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .failed
            .iter()
            .filter(|f| f.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn last_block_seen(&self) -> Result<Option<u64>, OracleError> {
        Ok(self.tables.read().await.to_blocks.iter().max().copied())
    }

    async fn advance_last_block_seen(&self, block: u64) -> Result<bool, OracleError> {
        let mut tables = self.tables.write().await;
        match tables.to_blocks.iter().max() {
            Some(current) if *current >= block => Ok(false),
            _ => {
                tables.to_blocks.push(block);
                Ok(true)
            }
        }
    }

    async fn upsert_supported_pairs(&self, pairs: &[SupportedPair]) -> Result<(), OracleError> {
        let mut tables = self.tables.write().await;
        for pair in pairs {
            tables
                .supported_pairs
                .insert(pair.name.clone(), pair.clone());
        }
        Ok(())
    }

    async fn supported_pair(
        &self,
        base: &str,
        target: &str,
    ) -> Result<Option<SupportedPair>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .supported_pairs
            .values()
            .find(|p| p.base == base && p.target == target)
            .cloned())
    }

    async fn upsert_dex_pair(&self, pair: &DexPair) -> Result<(), OracleError> {
        let mut tables = self.tables.write().await;
        let key = (pair.dex.clone(), pair.pair.clone());
        if let Some(existing) = tables.dex_pairs.get(&key) {
            if keep_existing_pool(existing, pair) {
                return Ok(());
            }
        }
        tables.dex_pairs.insert(key, pair.clone());
        Ok(())
    }

    async fn dex_pair(
        &self,
        base: &str,
        target: &str,
        dex: &str,
    ) -> Result<Option<DexPair>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .dex_pairs
            .values()
            .filter(|p| p.dex == dex && p.matches(base, target))
            .max_by(|a, b| a.reserve_usd.total_cmp(&b.reserve_usd))
            .cloned())
    }

    async fn upsert_token_contract(&self, token: &TokenContract) -> Result<(), OracleError> {
        self.tables.write().await.token_contracts.insert(
            (token.symbol.clone(), token.chain.clone()),
            token.clone(),
        );
        Ok(())
    }

    async fn token_contract(
        &self,
        symbol: &str,
        chain: &str,
    ) -> Result<Option<TokenContract>, OracleError> {
        let tables = self.tables.read().await;
        Ok(tables
            .token_contracts
            .get(&(symbol.to_string(), chain.to_string()))
            .cloned())
    }

    async fn schema_version(&self) -> Result<Option<i32>, OracleError> {
        Ok(Some(SCHEMA_VERSION))
    }
}
