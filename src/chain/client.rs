use std::future::IntoFuture;
use std::time::Duration;

use alloy::network::{EthereumWallet, ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::contract::OracleRouter::{DataRequested, RequestFulfilled};
use super::{
    ChainClient, ChainEvent, DataRequestedEvent, EventKind, EventMeta, EventStream,
    RequestFulfilledEvent, TxReceiptInfo, TxRequest, TxStatus,
};
use crate::config::ChainConfig;
use crate::error::OracleError;

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ChainClient`] over alloy providers: HTTP for reads and writes, WebSocket
/// (when configured) for log subscriptions.
pub struct AlloyChainClient {
    http: DynProvider,
    ws_url: Option<String>,
    ws: Mutex<Option<DynProvider>>,
    contract: Address,
    provider_address: Address,
    chain_id: u64,
}

impl AlloyChainClient {
    pub fn connect(config: &ChainConfig, signer: PrivateKeySigner) -> Result<Self, OracleError> {
        let url = config
            .http_url
            .parse()
            .map_err(|e| OracleError::Config(format!("Invalid ETH_HTTP_URL: {e}")))?;
        let provider_address = signer.address();
        let http = ProviderBuilder::new()
            .disable_recommended_fillers()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        Ok(Self {
            http,
            ws_url: config.ws_url.clone(),
            ws: Mutex::new(None),
            contract: config.contract_address,
            provider_address,
            chain_id: config.network_id,
        })
    }

    fn filter(&self, kind: EventKind) -> Filter {
        let signature = match kind {
            EventKind::DataRequested => DataRequested::SIGNATURE_HASH,
            EventKind::RequestFulfilled => RequestFulfilled::SIGNATURE_HASH,
        };
        Filter::new()
            .address(self.contract)
            .event_signature(signature)
            .topic2(self.provider_address.into_word())
    }

    async fn ws_provider(&self, url: &str) -> Result<DynProvider, OracleError> {
        let mut guard = self.ws.lock().await;
        if let Some(provider) = guard.as_ref() {
            return Ok(provider.clone());
        }
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_ws(WsConnect::new(url))
            .await
            .map_err(|e| OracleError::Chain(format!("WebSocket connect failed: {e}")))?
            .erased();
        *guard = Some(provider.clone());
        Ok(provider)
    }
}

fn meta_of(log: &Log) -> EventMeta {
    EventMeta {
        block_number: log.block_number.unwrap_or_default(),
        tx_hash: log.transaction_hash.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
    }
}

/// Decodes a router log into a [`ChainEvent`]. Unknown or malformed logs yield `None`.
pub(crate) fn decode_log(kind: EventKind, log: &Log) -> Option<ChainEvent> {
    let meta = meta_of(log);
    match kind {
        EventKind::DataRequested => {
            let decoded = log.log_decode::<DataRequested>().ok()?;
            let event = decoded.inner.data;
            Some(ChainEvent::DataRequested(DataRequestedEvent {
                consumer: event.consumer,
                provider: event.provider,
                fee: event.fee,
                data: event.data,
                request_id: event.requestId,
                meta,
            }))
        }
        EventKind::RequestFulfilled => {
            let decoded = log.log_decode::<RequestFulfilled>().ok()?;
            let event = decoded.inner.data;
            Some(ChainEvent::RequestFulfilled(RequestFulfilledEvent {
                consumer: event.consumer,
                provider: event.provider,
                request_id: event.requestId,
                requested_data: event.requestedData,
                meta,
            }))
        }
    }
}

async fn with_timeout<T, E, F>(what: &str, fut: F) -> Result<T, OracleError>
where
    E: std::fmt::Display,
    F: IntoFuture<Output = Result<T, E>>,
{
    match timeout(RPC_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(OracleError::Chain(format!("{what}: {e}"))),
        Err(_) => Err(OracleError::Chain(format!(
            "{what}: timed out after {}s",
            RPC_TIMEOUT.as_secs()
        ))),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn block_number(&self) -> Result<u64, OracleError> {
        with_timeout("eth_blockNumber", self.http.get_block_number()).await
    }

    async fn gas_price(&self) -> Result<u128, OracleError> {
        with_timeout("eth_gasPrice", self.http.get_gas_price()).await
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, OracleError> {
        with_timeout(
            "eth_getTransactionCount",
            self.http.get_transaction_count(address).pending(),
        )
        .await
    }

    async fn transaction_status(&self, tx_hash: B256) -> Result<TxStatus, OracleError> {
        let receipt = with_timeout(
            "eth_getTransactionReceipt",
            self.http.get_transaction_receipt(tx_hash),
        )
        .await?;

        Ok(match receipt {
            None => TxStatus::Pending,
            Some(receipt) => match receipt.block_number() {
                None => TxStatus::Pending,
                Some(block_number) => TxStatus::Mined(TxReceiptInfo {
                    success: receipt.status(),
                    block_number,
                    gas_used: receipt.gas_used(),
                    gas_price: receipt.effective_gas_price(),
                }),
            },
        })
    }

    async fn logs(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
        request_id: Option<B256>,
    ) -> Result<Vec<ChainEvent>, OracleError> {
        let mut filter = self.filter(kind).from_block(from).to_block(to);
        if let (EventKind::RequestFulfilled, Some(id)) = (kind, request_id) {
            filter = filter.topic3(id);
        }
        let logs = with_timeout("eth_getLogs", self.http.get_logs(&filter)).await?;
        Ok(logs
            .iter()
            .filter_map(|log| decode_log(kind, log))
            .filter(|event| match (event, request_id) {
                (ChainEvent::DataRequested(e), Some(id)) => e.request_id == id,
                _ => true,
            })
            .collect())
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventStream, OracleError> {
        let filter = self.filter(kind);
        match &self.ws_url {
            Some(url) => {
                let provider = self.ws_provider(url).await?;
                let subscription = match provider.subscribe_logs(&filter).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        // Force a reconnect on the next attempt.
                        *self.ws.lock().await = None;
                        return Err(OracleError::Chain(format!("eth_subscribe: {e}")));
                    }
                };
                let stream = subscription.into_stream().filter_map(move |log| {
                    // The stream owns a provider handle so the socket outlives the caller.
                    let _provider = &provider;
                    futures::future::ready(decode_log(kind, &log))
                });
                Ok(Box::pin(stream))
            }
            None => {
                let poller = self
                    .http
                    .watch_logs(&filter)
                    .await
                    .map_err(|e| OracleError::Chain(format!("eth_newFilter: {e}")))?;
                let stream = poller
                    .into_stream()
                    .flat_map(futures::stream::iter)
                    .filter_map(move |log| futures::future::ready(decode_log(kind, &log)));
                Ok(Box::pin(stream))
            }
        }
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<B256, OracleError> {
        let request = TransactionRequest::default()
            .with_from(self.provider_address)
            .with_to(tx.to)
            .with_input(tx.input)
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit)
            .with_gas_price(tx.gas_price)
            .with_chain_id(self.chain_id);
        let pending =
            with_timeout("eth_sendRawTransaction", self.http.send_transaction(request)).await?;
        Ok(*pending.tx_hash())
    }

    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, OracleError> {
        let request = TransactionRequest::default()
            .with_from(self.provider_address)
            .with_to(to)
            .with_input(input);
        with_timeout("eth_call", self.http.call(request)).await
    }
}
