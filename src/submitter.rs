//! Builds, signs and sends transactions to the router on behalf of the provider.

use std::sync::Arc;

use alloy::primitives::{eip191_hash_message, keccak256, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::SolCall;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::chain::contract::OracleRouter;
use crate::chain::{ChainClient, TxRequest};
use crate::constants::TX_SUBMISSIONS;
use crate::error::OracleError;

/// A transaction that reached the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTx {
    pub tx_hash: B256,
    pub nonce: u64,
    pub gas_price: u128,
}

/// Hash the router recovers the provider from: the EIP-191 hash of
/// `keccak256(requestId || price || consumer)`.
pub fn fulfilment_hash(request_id: B256, price: U256, consumer: Address) -> B256 {
    let packed = [
        request_id.as_slice(),
        &price.to_be_bytes::<32>(),
        consumer.as_slice(),
    ]
    .concat();
    eip191_hash_message(keccak256(packed))
}

/// Caps the suggested gas price at `max` wei.
pub fn clamp_gas_price(suggested: u128, max: Option<u128>) -> u128 {
    match max {
        Some(max) if suggested > max => max,
        _ => suggested,
    }
}

pub struct TxSubmitter {
    chain: Arc<dyn ChainClient>,
    signer: PrivateKeySigner,
    contract: Address,
    gas_limit: u64,
    max_gas_price: Option<u128>,
    /// Next nonce this process expects to use.
    prev_tx_nonce: Mutex<u64>,
}

impl TxSubmitter {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: PrivateKeySigner,
        contract: Address,
        gas_limit: u64,
        max_gas_price: Option<u128>,
    ) -> Self {
        Self {
            chain,
            signer,
            contract,
            gas_limit,
            max_gas_price,
            prev_tx_nonce: Mutex::new(0),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Seeds the local nonce from the chain's pending nonce.
    pub async fn init_nonce(&self) -> Result<u64, OracleError> {
        let pending = self.chain.pending_nonce(self.address()).await?;
        *self.prev_tx_nonce.lock().await = pending;
        tracing::info!("[SUBMITTER] Provider {} starts at nonce {pending}", self.address());
        Ok(pending)
    }

    pub async fn prev_tx_nonce(&self) -> u64 {
        *self.prev_tx_nonce.lock().await
    }

    #[cfg(test)]
    pub(crate) async fn set_prev_tx_nonce(&self, nonce: u64) {
        *self.prev_tx_nonce.lock().await = nonce;
    }

    /// 65-byte `r || s || v` signature with `v` in `{27, 28}`.
    pub fn sign_fulfilment(
        &self,
        request_id: B256,
        price: U256,
        consumer: Address,
    ) -> Result<Bytes, OracleError> {
        let hash = fulfilment_hash(request_id, price, consumer);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| OracleError::Signing(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.r().to_be_bytes::<32>());
        out.extend_from_slice(&signature.s().to_be_bytes::<32>());
        out.push(27 + u8::from(signature.v()));
        Ok(Bytes::from(out))
    }

    #[instrument(skip(self), fields(request_id = %request_id))]
    pub async fn fulfill(
        &self,
        request_id: B256,
        price: U256,
        consumer: Address,
    ) -> Result<SentTx, OracleError> {
        let signature = self.sign_fulfilment(request_id, price, consumer)?;
        let input = OracleRouter::fulfillRequestCall {
            requestId: request_id,
            priceData: price,
            signature,
        }
        .abi_encode();
        self.send("fulfill", Bytes::from(input)).await
    }

    /// Sends a router call. The local nonce only moves in lock-step with the
    /// chain; a gap leaves it alone so the pending nonce drives the next send.
    pub async fn send(&self, kind: &str, input: Bytes) -> Result<SentTx, OracleError> {
        let mut prev = self.prev_tx_nonce.lock().await;

        let pending = self.chain.pending_nonce(self.address()).await?;
        let nonce = pending.max(*prev);
        let gas_price = clamp_gas_price(self.chain.gas_price().await?, self.max_gas_price);

        let tx = TxRequest {
            to: self.contract,
            input,
            nonce,
            gas_limit: self.gas_limit,
            gas_price,
        };

        let tx_hash = match self.chain.send_transaction(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                TX_SUBMISSIONS.with_label_values(&[kind, "error"]).inc();
                return Err(e);
            }
        };
        TX_SUBMISSIONS.with_label_values(&[kind, "sent"]).inc();

        let next = nonce + 1;
        if next.wrapping_sub(*prev) == 1 {
            *prev = next;
        } else {
            tracing::warn!(
                "[SUBMITTER] Nonce drift: sent {nonce} while local nonce is {}, not advancing",
                *prev
            );
        }

        tracing::info!("[SUBMITTER] {kind} tx {tx_hash} sent with nonce {nonce}");
        Ok(SentTx {
            tx_hash,
            nonce,
            gas_price,
        })
    }

    /// Read-only router call.
    pub async fn call(&self, input: Bytes) -> Result<Bytes, OracleError> {
        self.chain.call(self.contract, input).await
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{address, b256, Signature};

    use super::*;
    use crate::chain::MockChainClient;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn submitter(chain: MockChainClient, max_gas_price: Option<u128>) -> TxSubmitter {
        TxSubmitter::new(
            Arc::new(chain),
            KEY.parse().unwrap(),
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            300_000,
            max_gas_price,
        )
    }

    #[test]
    fn signature_recovers_provider_address() {
        let submitter = submitter(MockChainClient::new(), None);
        let request_id = b256!("00000000000000000000000000000000000000000000000000000000000000aa");
        let price = U256::from(50_000u64) * U256::from(10u64).pow(U256::from(18u64));
        let consumer = address!("70997970C51812dc3A010C7d01b50e0d17dc79C8");

        let sig = submitter.sign_fulfilment(request_id, price, consumer).unwrap();
        assert_eq!(sig.len(), 65);
        assert!(sig[64] == 27 || sig[64] == 28);

        let r = U256::from_be_slice(&sig[..32]);
        let s = U256::from_be_slice(&sig[32..64]);
        let recovered = Signature::new(r, s, sig[64] - 27 == 1)
            .recover_address_from_prehash(&fulfilment_hash(request_id, price, consumer))
            .unwrap();
        assert_eq!(recovered, submitter.address());
    }

    #[test]
    fn gas_price_is_clamped_exactly() {
        let cap = 50_000_000_000u128;
        assert_eq!(clamp_gas_price(cap + 1, Some(cap)), cap);
        assert_eq!(clamp_gas_price(cap, Some(cap)), cap);
        assert_eq!(clamp_gas_price(cap - 1, Some(cap)), cap - 1);
        assert_eq!(clamp_gas_price(u128::MAX, None), u128::MAX);
    }

    #[tokio::test]
    async fn nonce_advances_in_lock_step() {
        let mut chain = MockChainClient::new();
        chain.expect_pending_nonce().returning(|_| Ok(7));
        chain.expect_gas_price().returning(|| Ok(60_000_000_000));
        chain
            .expect_send_transaction()
            .withf(|tx| tx.gas_price == 50_000_000_000 && tx.gas_limit == 300_000)
            .returning(|tx| Ok(B256::with_last_byte(tx.nonce as u8)));

        let submitter = submitter(chain, Some(50_000_000_000));
        submitter.init_nonce().await.unwrap();

        let first = submitter.send("fulfill", Bytes::new()).await.unwrap();
        assert_eq!(first.nonce, 7);
        assert_eq!(submitter.prev_tx_nonce().await, 8);

        // The chain has not seen the first tx yet; the local nonce is the floor.
        let second = submitter.send("fulfill", Bytes::new()).await.unwrap();
        assert_eq!(second.nonce, 8);
        assert_eq!(submitter.prev_tx_nonce().await, 9);
    }

    #[tokio::test]
    async fn nonce_gap_is_not_advanced() {
        let mut chain = MockChainClient::new();
        let mut pending = vec![43u64, 42u64];
        chain
            .expect_pending_nonce()
            .times(2)
            .returning(move |_| Ok(pending.pop().unwrap()));
        chain.expect_gas_price().returning(|| Ok(1));
        chain
            .expect_send_transaction()
            .returning(|tx| Ok(B256::with_last_byte(tx.nonce as u8)));

        let submitter = submitter(chain, None);
        submitter.set_prev_tx_nonce(40).await;

        let sent = submitter.send("fulfill", Bytes::new()).await.unwrap();
        assert_eq!(sent.nonce, 42);
        assert_eq!(submitter.prev_tx_nonce().await, 40);

        let sent = submitter.send("fulfill", Bytes::new()).await.unwrap();
        assert_eq!(sent.nonce, 43);
        assert_eq!(submitter.prev_tx_nonce().await, 40);
    }

    #[tokio::test]
    async fn send_failure_keeps_the_nonce() {
        let mut chain = MockChainClient::new();
        chain.expect_pending_nonce().returning(|_| Ok(3));
        chain.expect_gas_price().returning(|| Ok(1));
        chain
            .expect_send_transaction()
            .returning(|_| Err(OracleError::Chain("nonce too low".into())));

        let submitter = submitter(chain, None);
        submitter.init_nonce().await.unwrap();
        let err = submitter.send("fulfill", Bytes::new()).await.unwrap_err();
        assert!(err.to_string().contains("nonce too low"));
        assert_eq!(submitter.prev_tx_nonce().await, 3);
    }

    #[tokio::test]
    async fn fulfill_encodes_the_router_call() {
        let mut chain = MockChainClient::new();
        chain.expect_pending_nonce().returning(|_| Ok(0));
        chain.expect_gas_price().returning(|| Ok(1));
        chain
            .expect_send_transaction()
            .withf(|tx| tx.input.starts_with(&OracleRouter::fulfillRequestCall::SELECTOR))
            .returning(|_| Ok(B256::repeat_byte(1)));

        let submitter = submitter(chain, None);
        let sent = submitter
            .fulfill(B256::repeat_byte(9), U256::from(1u64), Address::ZERO)
            .await
            .unwrap();
        assert_eq!(sent.tx_hash, B256::repeat_byte(1));
    }
}
