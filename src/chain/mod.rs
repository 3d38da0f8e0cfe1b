pub mod client;
pub mod contract;

use std::pin::Pin;

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures::Stream;

use crate::error::OracleError;

pub use client::AlloyChainClient;

/// Where an event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequestedEvent {
    pub consumer: Address,
    pub provider: Address,
    pub fee: U256,
    pub data: B256,
    pub request_id: B256,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFulfilledEvent {
    pub consumer: Address,
    pub provider: Address,
    pub request_id: B256,
    pub requested_data: U256,
    pub meta: EventMeta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    DataRequested(DataRequestedEvent),
    RequestFulfilled(RequestFulfilledEvent),
}

impl ChainEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            ChainEvent::DataRequested(e) => &e.meta,
            ChainEvent::RequestFulfilled(e) => &e.meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum EventKind {
    DataRequested,
    RequestFulfilled,
}

/// Receipt summary of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReceiptInfo {
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Mined(TxReceiptInfo),
}

/// Fully specified outgoing transaction. Signing happens in the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    pub to: Address,
    pub input: Bytes,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u128,
}

pub type EventStream = Pin<Box<dyn Stream<Item = ChainEvent> + Send>>;

/// Low-level chain access used by the ingestor, the scheduler and the submitter.
/// Event queries are already filtered to the router contract and this provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, OracleError>;

    async fn gas_price(&self) -> Result<u128, OracleError>;

    async fn pending_nonce(&self, address: Address) -> Result<u64, OracleError>;

    async fn transaction_status(&self, tx_hash: B256) -> Result<TxStatus, OracleError>;

    /// Logs of `kind` in `[from, to]`, optionally narrowed to one request id.
    async fn logs(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
        request_id: Option<B256>,
    ) -> Result<Vec<ChainEvent>, OracleError>;

    async fn subscribe(&self, kind: EventKind) -> Result<EventStream, OracleError>;

    /// Signs and broadcasts `tx`, returning its hash.
    async fn send_transaction(&self, tx: TxRequest) -> Result<B256, OracleError>;

    /// `eth_call` against `to` from the provider account.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, OracleError>;
}
