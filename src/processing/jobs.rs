//! Periodic tick advancing each pending request through its lifecycle.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tracing::instrument;

use super::PriceResolver;
use crate::chain::{ChainClient, ChainEvent, EventKind, TxReceiptInfo, TxStatus};
use crate::constants::{
    FETCH_RETRY_BLOCKS, JOBS_FINISHED, MAX_ATTEMPTS, MAX_REQUEST_AGE_BLOCKS, PENDING_JOBS,
    RETRY_BACKOFF_BLOCKS, SEND_CHECK_BLOCKS,
};
use crate::endpoint;
use crate::error::OracleError;
use crate::store::JobStore;
use crate::submitter::TxSubmitter;
use crate::types::{DataRequest, FailedFulfilment, Fulfillment, RequestStatus};
use crate::utils::{log_tasks_results, to_hex};

pub const REASON_TOO_OLD: &str = "request too old";
pub const REASON_TOO_MANY_ATTEMPTS: &str = "too many failed attempts";
pub const REASON_REVERTED: &str = "transaction reverted";

pub struct JobScheduler {
    store: Arc<dyn JobStore>,
    chain: Arc<dyn ChainClient>,
    resolver: Arc<dyn PriceResolver>,
    submitter: Arc<TxSubmitter>,
    wait_confirmations: u64,
    network: String,
    ticking: AtomicBool,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        chain: Arc<dyn ChainClient>,
        resolver: Arc<dyn PriceResolver>,
        submitter: Arc<TxSubmitter>,
        wait_confirmations: u64,
        network: String,
    ) -> Self {
        Self {
            store,
            chain,
            resolver,
            submitter,
            wait_confirmations,
            network,
            ticking: AtomicBool::new(false),
        }
    }

    /// Advances every pending job once, in parallel. A tick that starts while
    /// the previous one is still running is skipped.
    pub async fn tick(self: &Arc<Self>) -> Result<usize, OracleError> {
        if self.ticking.swap(true, Ordering::SeqCst) {
            tracing::debug!("[JOBS] Previous tick still running, skipping");
            return Ok(0);
        }
        let result = self.run_tick().await;
        self.ticking.store(false, Ordering::SeqCst);
        result
    }

    async fn run_tick(self: &Arc<Self>) -> Result<usize, OracleError> {
        let now = self.chain.block_number().await?;
        let jobs = self.store.pending_requests().await?;
        PENDING_JOBS
            .with_label_values(&[&self.network])
            .set(jobs.len() as i64);
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.advance(job, now).await })
            })
            .collect();
        let results = futures::future::join_all(tasks).await;
        log_tasks_results("JOBS", results);
        Ok(count)
    }

    /// Runs the handler for the job's current status at chain height `now`.
    #[instrument(skip(self, job), fields(request_id = %job.request_id, status = %job.status))]
    pub async fn advance(&self, mut job: DataRequest, now: u64) -> Result<(), OracleError> {
        match job.status {
            RequestStatus::Success | RequestStatus::FulfilmentFailed => Ok(()),
            RequestStatus::TxSent => {
                if now.saturating_sub(job.fulfill_sent_block) < SEND_CHECK_BLOCKS {
                    return Ok(());
                }
                self.check_sent(job, now).await
            }
            RequestStatus::DataReady => {
                if self.age_capped(&mut job, now).await? {
                    return Ok(());
                }
                match job.price_result.clone() {
                    Some(price) => self.submit(job, price, now).await,
                    None => self.fetch_and_submit(job, now).await,
                }
            }
            RequestStatus::Initialised => {
                if self.capped(&mut job, now).await? {
                    return Ok(());
                }
                if job.age(now) >= self.wait_confirmations {
                    self.fetch_and_submit(job, now).await
                } else {
                    tracing::warn!(
                        "[JOBS] {} waiting for {} confirmations",
                        job.request_id,
                        self.wait_confirmations
                    );
                    Ok(())
                }
            }
            RequestStatus::FetchingData => {
                if self.capped(&mut job, now).await? {
                    return Ok(());
                }
                if now.saturating_sub(job.last_fetch_block) >= FETCH_RETRY_BLOCKS {
                    self.fetch_and_submit(job, now).await
                } else {
                    Ok(())
                }
            }
            RequestStatus::ApiError | RequestStatus::TxFailed => {
                if self.capped(&mut job, now).await? {
                    return Ok(());
                }
                if job.age(now) > RETRY_BACKOFF_BLOCKS {
                    self.fetch_and_submit(job, now).await
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn age_capped(&self, job: &mut DataRequest, now: u64) -> Result<bool, OracleError> {
        if job.age(now) > MAX_REQUEST_AGE_BLOCKS {
            self.finish_failed(job, REASON_TOO_OLD).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Age cap, then attempt cap. Returns whether the job was terminated.
    async fn capped(&self, job: &mut DataRequest, now: u64) -> Result<bool, OracleError> {
        if self.age_capped(job, now).await? {
            return Ok(true);
        }
        if job.attempts >= MAX_ATTEMPTS {
            self.finish_failed(job, REASON_TOO_MANY_ATTEMPTS).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn finish_failed(&self, job: &mut DataRequest, reason: &str) -> Result<(), OracleError> {
        job.fail(reason);
        if self.store.save_request(job).await? {
            JOBS_FINISHED.with_label_values(&["fail"]).inc();
            tracing::error!("[JOBS] {} failed: {reason}", job.request_id);
        }
        Ok(())
    }

    /// Persists `job`. `false` means the row was closed concurrently.
    async fn save(&self, job: &DataRequest) -> Result<bool, OracleError> {
        let saved = self.store.save_request(job).await?;
        if !saved {
            tracing::debug!("[JOBS] {} already closed, dropping update", job.request_id);
        }
        Ok(saved)
    }

    async fn fetch_and_submit(&self, mut job: DataRequest, now: u64) -> Result<(), OracleError> {
        let endpoint = match endpoint::parse(&job.endpoint_text) {
            Ok(endpoint) => endpoint,
            Err(e) => return self.finish_failed(&mut job, &e.to_string()).await,
        };

        // Counted before any external call so a crash still consumes the attempt.
        job.attempts += 1;
        job.last_fetch_block = now;
        job.set_status(RequestStatus::FetchingData);
        if !self.save(&job).await? {
            return Ok(());
        }
        tracing::info!(
            "[JOBS] {} fetching {} (attempt {}/{MAX_ATTEMPTS})",
            job.request_id,
            endpoint,
            job.attempts
        );

        match self.resolver.resolve(&endpoint).await {
            Ok(price) => {
                job.price_result = Some(price.clone());
                job.status_reason = None;
                job.set_status(RequestStatus::DataReady);
                if !self.save(&job).await? {
                    return Ok(());
                }
                self.submit(job, price, now).await
            }
            Err(e) => {
                tracing::warn!("[JOBS] {} resolution failed: {e}", job.request_id);
                job.status_reason = Some(e.to_string());
                job.set_status(RequestStatus::ApiError);
                self.save(&job).await.map(|_| ())
            }
        }
    }

    async fn submit(&self, mut job: DataRequest, price: String, now: u64) -> Result<(), OracleError> {
        let result = match fulfil_args(&job, &price) {
            Ok((request_id, price, consumer)) => {
                self.submitter.fulfill(request_id, price, consumer).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(sent) => {
                job.fulfill_tx_hash = Some(to_hex(sent.tx_hash));
                job.fulfill_sent_block = now;
                job.fulfill_gas_price = sent.gas_price;
                job.status_reason = None;
                job.set_status(RequestStatus::TxSent);
                tracing::info!("[JOBS] {} fulfilment sent", job.request_id);
            }
            Err(e) => {
                tracing::warn!("[JOBS] {} fulfilment not sent: {e}", job.request_id);
                self.store
                    .record_failed_fulfilment(&FailedFulfilment {
                        request_id: job.request_id.clone(),
                        tx_hash: String::new(),
                        gas_used: 0,
                        gas_price: 0,
                        reason: e.to_string(),
                    })
                    .await?;
                job.status_reason = Some(e.to_string());
                job.set_status(RequestStatus::TxFailed);
            }
        }
        self.save(&job).await.map(|_| ())
    }

    async fn check_sent(&self, mut job: DataRequest, now: u64) -> Result<(), OracleError> {
        let tx_hash = job
            .fulfill_tx_hash
            .as_deref()
            .and_then(|h| B256::from_str(h).ok());
        let Some(tx_hash) = tx_hash else {
            job.status_reason = Some("missing fulfilment tx hash".to_string());
            job.set_status(RequestStatus::TxFailed);
            return self.save(&job).await.map(|_| ());
        };

        match self.chain.transaction_status(tx_hash).await? {
            TxStatus::Pending => {
                if self.age_capped(&mut job, now).await? {
                    return Ok(());
                }
                tracing::debug!("[JOBS] {} tx {tx_hash} still pending", job.request_id);
                Ok(())
            }
            TxStatus::Mined(receipt) if receipt.success => {
                self.close_from_chain(&job, tx_hash, receipt, now).await
            }
            TxStatus::Mined(receipt) => {
                tracing::warn!("[JOBS] {} tx {tx_hash} reverted", job.request_id);
                self.store
                    .record_failed_fulfilment(&FailedFulfilment {
                        request_id: job.request_id.clone(),
                        tx_hash: to_hex(tx_hash),
                        gas_used: receipt.gas_used,
                        gas_price: receipt.gas_price,
                        reason: REASON_REVERTED.to_string(),
                    })
                    .await?;
                job.fulfill_gas_used = receipt.gas_used;
                job.fulfill_gas_price = receipt.gas_price;
                job.status_reason = Some(REASON_REVERTED.to_string());
                job.set_status(RequestStatus::TxFailed);
                if !self.save(&job).await? || self.capped(&mut job, now).await? {
                    return Ok(());
                }
                self.fetch_and_submit(job, now).await
            }
        }
    }

    /// Looks for the `RequestFulfilled` event of a mined fulfilment and closes the job.
    async fn close_from_chain(
        &self,
        job: &DataRequest,
        tx_hash: B256,
        receipt: TxReceiptInfo,
        now: u64,
    ) -> Result<(), OracleError> {
        let request_id = B256::from_str(&job.request_id)
            .map_err(|e| OracleError::Conversion(format!("request id {}: {e}", job.request_id)))?;
        let events = self
            .chain
            .logs(
                EventKind::RequestFulfilled,
                job.request_block,
                now,
                Some(request_id),
            )
            .await?;

        let event = events.iter().find_map(|event| match event {
            ChainEvent::RequestFulfilled(e) if e.request_id == request_id => Some(e),
            _ => None,
        });
        let fulfillment = match event {
            Some(event) => Fulfillment {
                tx_hash: to_hex(event.meta.tx_hash),
                block_number: event.meta.block_number,
                gas_used: receipt.gas_used,
                gas_price: receipt.gas_price,
            },
            None => {
                tracing::warn!(
                    "[JOBS] {} tx {tx_hash} succeeded without a RequestFulfilled log",
                    job.request_id
                );
                Fulfillment {
                    tx_hash: to_hex(tx_hash),
                    block_number: receipt.block_number,
                    gas_used: receipt.gas_used,
                    gas_price: receipt.gas_price,
                }
            }
        };

        if self
            .store
            .mark_fulfilled(&job.request_id, &fulfillment)
            .await?
        {
            JOBS_FINISHED.with_label_values(&["success"]).inc();
            tracing::info!("[JOBS] {} fulfilled", job.request_id);
        }
        Ok(())
    }
}

fn fulfil_args(job: &DataRequest, price: &str) -> Result<(B256, U256, Address), OracleError> {
    let request_id = B256::from_str(&job.request_id)
        .map_err(|e| OracleError::Conversion(format!("request id {}: {e}", job.request_id)))?;
    let price = U256::from_str_radix(price, 10)
        .map_err(|e| OracleError::Conversion(format!("price {price}: {e}")))?;
    let consumer = Address::from_str(&job.consumer)
        .map_err(|e| OracleError::Conversion(format!("consumer {}: {e}", job.consumer)))?;
    Ok((request_id, price, consumer))
}
