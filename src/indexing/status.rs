use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chain::EventKind;

/// Consecutive failures tolerated before `/status` reports unhealthy.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestorStatus {
    pub is_running: bool,
    pub is_synced: bool,
    pub requests_stream_live: bool,
    pub fulfilments_stream_live: bool,
    pub last_processed_block: Option<u64>,
    pub events_processed: u64,
    pub error_count: u32,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

/// Shared view of the event ingestor's progress, served on `/status`.
pub struct IngestorTracker {
    status: RwLock<IngestorStatus>,
}

impl IngestorTracker {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(IngestorStatus::default()),
        }
    }
}

impl Default for IngestorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestorTracker {
    pub async fn set_running(&self, running: bool) {
        let mut status = self.status.write().await;
        status.is_running = running;
        if !running {
            status.is_synced = false;
            status.requests_stream_live = false;
            status.fulfilments_stream_live = false;
        }
    }

    pub async fn set_synced(&self, synced: bool) {
        let mut status = self.status.write().await;
        status.is_synced = synced;
        if synced {
            status.consecutive_errors = 0;
        }
    }

    pub async fn is_synced(&self) -> bool {
        self.status.read().await.is_synced
    }

    pub async fn set_stream_live(&self, kind: EventKind, live: bool) {
        let mut status = self.status.write().await;
        match kind {
            EventKind::DataRequested => status.requests_stream_live = live,
            EventKind::RequestFulfilled => status.fulfilments_stream_live = live,
        }
        if live {
            status.consecutive_errors = 0;
        }
    }

    /// Only ever moves the block forward.
    pub async fn update_processed_block(&self, block_number: u64) {
        let mut status = self.status.write().await;
        if status.last_processed_block.map_or(true, |b| block_number > b) {
            status.last_processed_block = Some(block_number);
        }
    }

    pub async fn increment_events_processed(&self, count: u64) {
        let mut status = self.status.write().await;
        status.events_processed += count;
        status.consecutive_errors = 0;
    }

    pub async fn record_error(&self, error: String) {
        let mut status = self.status.write().await;
        status.error_count += 1;
        status.consecutive_errors += 1;
        status.last_error = Some(error);
    }

    pub async fn get_status(&self) -> IngestorStatus {
        self.status.read().await.clone()
    }

    /// Running, caught up, both router streams open, and not failing
    /// repeatedly. Quiet periods without router events are healthy.
    pub async fn is_healthy(&self) -> bool {
        let status = self.status.read().await;
        status.is_running
            && status.is_synced
            && status.requests_stream_live
            && status.fulfilments_stream_live
            && status.consecutive_errors <= MAX_CONSECUTIVE_ERRORS
    }
}
