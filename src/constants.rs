use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    opts, register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec,
};

/// A job is forced to `FULFILMENT_FAILED` once it has been attempted this many times.
pub const MAX_ATTEMPTS: u32 = 3;
/// Blocks after which a request is abandoned (about an hour on a 15s chain).
pub const MAX_REQUEST_AGE_BLOCKS: u64 = 250;
/// Blocks to wait in `FETCHING_DATA` before retrying the fetch.
pub const FETCH_RETRY_BLOCKS: u64 = 5;
/// Blocks to wait in `TX_SENT` before reading the transaction status.
pub const SEND_CHECK_BLOCKS: u64 = 3;
/// `API_ERROR` and `TX_FAILED` jobs are retried once the request is older than this.
pub const RETRY_BACKOFF_BLOCKS: u64 = 5;

pub const API_TIMEOUT: Duration = Duration::from_secs(15);
pub const SUBGRAPH_TIMEOUT: Duration = Duration::from_secs(30);

pub const PAIR_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const SUPPORTED_PAIRS_CACHE_TTL: Duration = Duration::from_secs(60);

/// Historical backfill queries `eth_getLogs` this many blocks at a time.
pub const BACKFILL_PAGE_SIZE: u64 = 10_000;

/// Event ingestion retries a failed database write this many times.
pub const DB_RETRY_ATTEMPTS: u32 = 3;
pub const DB_RETRY_DELAY: Duration = Duration::from_secs(1);

pub const SUBSCRIPTION_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const SUBSCRIPTION_MAX_BACKOFF: Duration = Duration::from_secs(10 * 60);

pub const WEI_DECIMALS: i64 = 18;

lazy_static! {
    pub static ref REQUESTS_INGESTED: IntCounterVec = register_int_counter_vec!(
        opts!(
            "oracle_requests_ingested_total",
            "Number of DataRequested events stored, by endpoint kind."
        ),
        &["kind"]
    )
    .unwrap();
    pub static ref JOBS_FINISHED: IntCounterVec = register_int_counter_vec!(
        opts!(
            "oracle_jobs_finished_total",
            "Number of jobs that reached a terminal state."
        ),
        &["outcome"]
    )
    .unwrap();
    pub static ref LAST_BLOCK_SEEN: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "oracle_last_block_seen",
            "Highest block whose events have been durably observed."
        ),
        &["network"]
    )
    .unwrap();
    pub static ref RESOLUTION_FAILURES: IntCounterVec = register_int_counter_vec!(
        opts!(
            "oracle_resolution_failures_total",
            "Failed data resolutions, by source."
        ),
        &["source"]
    )
    .unwrap();
    pub static ref DEX_SAMPLES: IntCounterVec = register_int_counter_vec!(
        opts!(
            "oracle_dex_samples_total",
            "DEX price samples kept or rejected by the outlier filter."
        ),
        &["outcome"]
    )
    .unwrap();
    pub static ref TX_SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        opts!(
            "oracle_tx_submissions_total",
            "Outgoing transactions, by kind and result."
        ),
        &["kind", "result"]
    )
    .unwrap();
    pub static ref PENDING_JOBS: IntGaugeVec = register_int_gauge_vec!(
        opts!("oracle_pending_jobs", "Jobs still pending at the last tick."),
        &["network"]
    )
    .unwrap();
}
