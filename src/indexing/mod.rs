//! Historical backfill and live ingestion of router events.

pub mod status;

use std::sync::Arc;
use std::time::Instant;

use alloy::primitives::B256;
use tracing::instrument;

use crate::chain::{
    ChainClient, ChainEvent, DataRequestedEvent, EventKind, EventStream, RequestFulfilledEvent,
    TxStatus,
};
use crate::constants::{
    BACKFILL_PAGE_SIZE, JOBS_FINISHED, LAST_BLOCK_SEEN, REQUESTS_INGESTED,
    SUBSCRIPTION_BACKOFF_BASE, SUBSCRIPTION_MAX_BACKOFF,
};
use crate::endpoint::{self, decode_endpoint_bytes};
use crate::error::OracleError;
use crate::store::JobStore;
use crate::types::{Fulfillment, NewDataRequest, RequestStatus};
use crate::utils::{backoff_delay, retry_db, to_hex};

pub use status::{IngestorStatus, IngestorTracker};

pub struct Ingestor {
    store: Arc<dyn JobStore>,
    chain: Arc<dyn ChainClient>,
    first_block: u64,
    network: String,
    tracker: Arc<IngestorTracker>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn JobStore>,
        chain: Arc<dyn ChainClient>,
        first_block: u64,
        network: String,
        tracker: Arc<IngestorTracker>,
    ) -> Self {
        Self {
            store,
            chain,
            first_block,
            network,
            tracker,
        }
    }

    pub fn tracker(&self) -> Arc<IngestorTracker> {
        Arc::clone(&self.tracker)
    }

    /// First block to scan: the later of the configured start and the checkpoint.
    pub async fn start_block(&self) -> Result<u64, OracleError> {
        let seen = self.store.last_block_seen().await?.unwrap_or(0);
        Ok(self.first_block.max(seen))
    }

    /// Replays router logs from the start block to the current head, one
    /// page at a time: the page's `DataRequested` logs, then its
    /// `RequestFulfilled` logs, then the checkpoint moves to the page end.
    /// Returns the head that was reached.
    #[instrument(skip(self))]
    pub async fn backfill(&self) -> Result<u64, OracleError> {
        self.tracker.set_running(true).await;
        self.tracker.set_synced(false).await;

        let from = self.start_block().await?;
        let head = self.chain.block_number().await?;
        tracing::info!("[INGESTOR] Backfilling blocks {from}..={head}");

        let mut lo = from;
        while lo <= head {
            let hi = head.min(lo.saturating_add(BACKFILL_PAGE_SIZE - 1));
            for kind in [EventKind::DataRequested, EventKind::RequestFulfilled] {
                let events = self.chain.logs(kind, lo, hi, None).await?;
                if !events.is_empty() {
                    tracing::info!("[INGESTOR] {} {kind} events in {lo}..={hi}", events.len());
                }
                for event in events {
                    self.apply_event(event).await?;
                }
            }
            self.checkpoint(hi).await?;
            lo = hi + 1;
        }

        self.tracker.set_synced(true).await;
        tracing::info!("[INGESTOR] Backfill complete at block {head}");
        Ok(head)
    }

    /// Applies one live event to the store and moves the checkpoint.
    pub async fn handle_event(&self, event: ChainEvent) -> Result<(), OracleError> {
        let block = event.meta().block_number;
        self.apply_event(event).await?;
        self.checkpoint(block).await
    }

    async fn apply_event(&self, event: ChainEvent) -> Result<(), OracleError> {
        let result = match event {
            ChainEvent::DataRequested(e) => self.on_data_requested(e).await,
            ChainEvent::RequestFulfilled(e) => self.on_request_fulfilled(e).await,
        };
        match result {
            Ok(()) => {
                self.tracker.increment_events_processed(1).await;
                Ok(())
            }
            Err(e) => {
                self.tracker.record_error(e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn checkpoint(&self, block: u64) -> Result<(), OracleError> {
        let moved = retry_db("advance last_block_seen", || {
            self.store.advance_last_block_seen(block)
        })
        .await?;
        if moved {
            LAST_BLOCK_SEEN
                .with_label_values(&[&self.network])
                .set(block as i64);
        }
        self.tracker.update_processed_block(block).await;
        Ok(())
    }

    async fn on_data_requested(&self, event: DataRequestedEvent) -> Result<(), OracleError> {
        let request_id = to_hex(event.request_id);
        if self.store.get_request(&request_id).await?.is_some() {
            tracing::debug!("[INGESTOR] Duplicate DataRequested {request_id}, ignoring");
            return Ok(());
        }

        let endpoint_text = decode_endpoint_bytes(event.data.as_slice());
        let (is_adhoc, status, status_reason) = match endpoint::parse(&endpoint_text) {
            Ok(endpoint) => (endpoint.is_adhoc(), RequestStatus::Initialised, None),
            Err(e) => {
                tracing::warn!("[INGESTOR] {request_id}: {e}");
                (false, RequestStatus::FulfilmentFailed, Some(e.to_string()))
            }
        };
        let (gas_used, gas_price) = self.receipt_gas(event.meta.tx_hash).await;

        let new_request = NewDataRequest {
            request_id: request_id.clone(),
            consumer: event.consumer.to_checksum(None),
            provider: event.provider.to_checksum(None),
            endpoint_raw: to_hex(event.data),
            endpoint_text: endpoint_text.clone(),
            is_adhoc,
            fee: event.fee.saturating_to::<u64>(),
            request_block: event.meta.block_number,
            request_tx_hash: to_hex(event.meta.tx_hash),
            request_gas_used: gas_used,
            request_gas_price: gas_price,
            status,
            status_reason,
        };

        let inserted = retry_db("insert data request", || {
            self.store.insert_request(new_request.clone())
        })
        .await?;
        if inserted {
            let kind = if is_adhoc { "adhoc" } else { "api" };
            REQUESTS_INGESTED.with_label_values(&[kind]).inc();
            if status.is_terminal() {
                JOBS_FINISHED.with_label_values(&["fail"]).inc();
            }
            tracing::info!(
                "[INGESTOR] New request {request_id} ({endpoint_text}) at block {}",
                event.meta.block_number
            );
        }
        Ok(())
    }

    async fn on_request_fulfilled(&self, event: RequestFulfilledEvent) -> Result<(), OracleError> {
        let request_id = to_hex(event.request_id);
        if self.store.get_request(&request_id).await?.is_none() {
            tracing::debug!("[INGESTOR] RequestFulfilled for unknown {request_id}");
            return Ok(());
        }

        let (gas_used, gas_price) = self.receipt_gas(event.meta.tx_hash).await;
        let fulfillment = Fulfillment {
            tx_hash: to_hex(event.meta.tx_hash),
            block_number: event.meta.block_number,
            gas_used,
            gas_price,
        };
        let closed = retry_db("mark request fulfilled", || {
            self.store.mark_fulfilled(&request_id, &fulfillment)
        })
        .await?;
        if closed {
            JOBS_FINISHED.with_label_values(&["success"]).inc();
            tracing::info!(
                "[INGESTOR] Request {request_id} fulfilled at block {}",
                event.meta.block_number
            );
        }
        Ok(())
    }

    /// Gas metadata of an event's transaction. Missing receipts yield zeros.
    async fn receipt_gas(&self, tx_hash: B256) -> (u64, u128) {
        match self.chain.transaction_status(tx_hash).await {
            Ok(TxStatus::Mined(receipt)) => (receipt.gas_used, receipt.gas_price),
            Ok(TxStatus::Pending) => (0, 0),
            Err(e) => {
                tracing::debug!("[INGESTOR] No receipt for {tx_hash}: {e}");
                (0, 0)
            }
        }
    }

    /// Opens a live stream, retrying with exponential backoff. Panics once
    /// retries have gone on for longer than the backoff cap.
    pub async fn subscribe_with_backoff(&self, kind: EventKind) -> EventStream {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match self.chain.subscribe(kind).await {
                Ok(stream) => {
                    tracing::info!("[INGESTOR] Subscribed to {kind}");
                    self.tracker.set_stream_live(kind, true).await;
                    return stream;
                }
                Err(e) => {
                    let elapsed = started.elapsed();
                    if elapsed >= SUBSCRIPTION_MAX_BACKOFF {
                        panic!("[INGESTOR] Could not subscribe to {kind} after {elapsed:?}: {e}");
                    }
                    let delay = backoff_delay(SUBSCRIPTION_BACKOFF_BASE, attempt, SUBSCRIPTION_MAX_BACKOFF)
                        .min(SUBSCRIPTION_MAX_BACKOFF - elapsed);
                    tracing::warn!(
                        "[INGESTOR] Subscription to {kind} failed: {e}. Retrying in {delay:?}"
                    );
                    self.tracker.record_error(e.to_string()).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Marks a live stream as gone until it is reopened.
    pub async fn stream_closed(&self, kind: EventKind) {
        tracing::warn!("[INGESTOR] {kind} stream ended");
        self.tracker.set_stream_live(kind, false).await;
    }

    /// Moves the checkpoint to the chain head so the next start does not rescan.
    pub async fn checkpoint_head(&self) -> Result<u64, OracleError> {
        let head = self.chain.block_number().await?;
        self.checkpoint(head).await?;
        self.tracker.set_running(false).await;
        Ok(head)
    }
}
