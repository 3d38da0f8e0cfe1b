use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use alloy::primitives::{address, Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use axum::Router;
use rstest::fixture;

use crate::chain::{
    ChainClient, ChainEvent, DataRequestedEvent, EventMeta, RequestFulfilledEvent,
    TxReceiptInfo, TxStatus,
};
use crate::store::MemoryStore;
use crate::submitter::TxSubmitter;

/// First anvil development key.
pub const PROVIDER_KEY: &str =
    "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const CONTRACT: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const CONSUMER: Address = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

pub fn signer() -> PrivateKeySigner {
    PROVIDER_KEY.parse().unwrap()
}

fn tagged_hash(tag: u8, n: u8) -> B256 {
    let mut word = [0u8; 32];
    word[0] = tag;
    word[31] = n;
    B256::from(word)
}

pub fn request_id(n: u8) -> B256 {
    B256::with_last_byte(n)
}

/// Hash of the transaction that emitted request `n`.
pub fn request_tx(n: u8) -> B256 {
    tagged_hash(0xaa, n)
}

/// Hash of the `n`-th fulfilment transaction.
pub fn fulfil_tx(n: u8) -> B256 {
    tagged_hash(0xff, n)
}

pub fn endpoint_word(text: &str) -> B256 {
    let mut word = [0u8; 32];
    word[..text.len()].copy_from_slice(text.as_bytes());
    B256::from(word)
}

pub fn data_requested(n: u8, endpoint: &str, block: u64) -> ChainEvent {
    ChainEvent::DataRequested(DataRequestedEvent {
        consumer: CONSUMER,
        provider: signer().address(),
        fee: U256::from(1_000u64),
        data: endpoint_word(endpoint),
        request_id: request_id(n),
        meta: EventMeta {
            block_number: block,
            tx_hash: request_tx(n),
            log_index: 0,
        },
    })
}

pub fn request_fulfilled(n: u8, block: u64, tx_hash: B256) -> ChainEvent {
    ChainEvent::RequestFulfilled(RequestFulfilledEvent {
        consumer: CONSUMER,
        provider: signer().address(),
        request_id: request_id(n),
        requested_data: U256::from(1u64),
        meta: EventMeta {
            block_number: block,
            tx_hash,
            log_index: 1,
        },
    })
}

pub fn mined(success: bool, block_number: u64) -> TxStatus {
    TxStatus::Mined(TxReceiptInfo {
        success,
        block_number,
        gas_used: 60_000,
        gas_price: 2_000_000_000,
    })
}

/// Chain height shared between a test and its mocked client.
#[derive(Clone, Default)]
pub struct Head(Arc<AtomicU64>);

impl Head {
    pub fn at(block: u64) -> Self {
        Self(Arc::new(AtomicU64::new(block)))
    }

    pub fn set(&self, block: u64) {
        self.0.store(block, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[fixture]
pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn submitter(chain: Arc<dyn ChainClient>) -> Arc<TxSubmitter> {
    Arc::new(TxSubmitter::new(chain, signer(), CONTRACT, 300_000, None))
}

/// Serves `router` on an ephemeral local port.
pub async fn spawn_http(router: Router) -> SocketAddr {
    let server = axum::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0)))
        .serve(router.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}
