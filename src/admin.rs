//! Provider account management on the router: registration, fees, withdrawals.

use std::str::FromStr;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolValue};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::oneshot;

use crate::chain::contract::OracleRouter;
use crate::error::OracleError;
use crate::submitter::TxSubmitter;
use crate::utils::to_hex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AdminTaskKind {
    Register,
    SetFee,
    SetGranularFee,
    Withdraw,
    QueryWithdrawable,
    QueryFees,
    QueryGranularFees,
}

/// `fee_or_amount` may be sent as a JSON number or a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(u64),
    Text(String),
}

impl Amount {
    fn to_u256(&self) -> Result<U256, OracleError> {
        match self {
            Amount::Number(n) => Ok(U256::from(*n)),
            Amount::Text(text) => U256::from_str_radix(text.trim(), 10)
                .map_err(|e| OracleError::Conversion(format!("amount {text:?}: {e}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRequest {
    pub task: String,
    #[serde(default)]
    pub fee_or_amount: Option<Amount>,
    #[serde(default)]
    pub to_or_consumer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub task: String,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// An admin request travelling to the main loop, with its reply channel.
#[derive(Debug)]
pub struct AdminTask {
    pub request: AdminRequest,
    pub reply: oneshot::Sender<AdminResponse>,
}

impl AdminRequest {
    fn amount(&self) -> Result<U256, OracleError> {
        self.fee_or_amount
            .as_ref()
            .ok_or_else(|| OracleError::Config(format!("{} needs fee_or_amount", self.task)))?
            .to_u256()
    }

    fn address(&self) -> Result<Option<Address>, OracleError> {
        self.to_or_consumer
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| {
                Address::from_str(a)
                    .map_err(|e| OracleError::Conversion(format!("address {a:?}: {e}")))
            })
            .transpose()
    }

    fn required_address(&self) -> Result<Address, OracleError> {
        self.address()?
            .ok_or_else(|| OracleError::Config(format!("{} needs to_or_consumer", self.task)))
    }
}

/// Runs one admin task. Writes go through the submitter's nonce and gas policy.
pub async fn execute(submitter: &TxSubmitter, request: &AdminRequest) -> AdminResponse {
    let outcome = match AdminTaskKind::from_str(request.task.trim()) {
        Ok(kind) => run(submitter, kind, request).await,
        Err(_) => Err(OracleError::Config(format!(
            "unknown task {:?}",
            request.task
        ))),
    };

    match outcome {
        Ok(result) => AdminResponse {
            task: request.task.clone(),
            success: true,
            result: Some(result),
            error: None,
        },
        Err(e) => {
            tracing::warn!("[ADMIN] {} failed: {e}", request.task);
            AdminResponse {
                task: request.task.clone(),
                success: false,
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

async fn run(
    submitter: &TxSubmitter,
    kind: AdminTaskKind,
    request: &AdminRequest,
) -> Result<String, OracleError> {
    let provider = submitter.address();
    match kind {
        AdminTaskKind::Register => {
            let input = OracleRouter::registerAsProviderCall {
                minFee: request.amount()?,
            }
            .abi_encode();
            send(submitter, input).await
        }
        AdminTaskKind::SetFee => {
            let input = OracleRouter::setProviderMinFeeCall {
                newMinFee: request.amount()?,
            }
            .abi_encode();
            send(submitter, input).await
        }
        AdminTaskKind::SetGranularFee => {
            let input = OracleRouter::setProviderGranularFeeCall {
                consumer: request.required_address()?,
                newFee: request.amount()?,
            }
            .abi_encode();
            send(submitter, input).await
        }
        AdminTaskKind::Withdraw => {
            let amount = request.amount()?;
            let input = match request.address()? {
                Some(to) => OracleRouter::withdrawToCall { to, amount }.abi_encode(),
                None => OracleRouter::withdrawCall { amount }.abi_encode(),
            };
            send(submitter, input).await
        }
        AdminTaskKind::QueryWithdrawable => {
            let input = OracleRouter::getWithdrawableTokensCall { provider }.abi_encode();
            query_u256(submitter, input).await
        }
        AdminTaskKind::QueryFees => {
            let input = OracleRouter::getProviderMinFeeCall { provider }.abi_encode();
            query_u256(submitter, input).await
        }
        AdminTaskKind::QueryGranularFees => {
            let input = OracleRouter::getProviderGranularFeeCall {
                provider,
                consumer: request.required_address()?,
            }
            .abi_encode();
            query_u256(submitter, input).await
        }
    }
}

async fn send(submitter: &TxSubmitter, input: Vec<u8>) -> Result<String, OracleError> {
    let sent = submitter.send("admin", Bytes::from(input)).await?;
    Ok(to_hex(sent.tx_hash))
}

async fn query_u256(submitter: &TxSubmitter, input: Vec<u8>) -> Result<String, OracleError> {
    let output = submitter.call(Bytes::from(input)).await?;
    let value = <U256 as SolValue>::abi_decode(&output)
        .map_err(|e| OracleError::Chain(format!("cannot decode call result: {e}")))?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy::primitives::{address, B256};

    use super::*;
    use crate::chain::MockChainClient;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn submitter(chain: MockChainClient) -> TxSubmitter {
        TxSubmitter::new(
            Arc::new(chain),
            KEY.parse().unwrap(),
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
            300_000,
            None,
        )
    }

    fn request(task: &str, amount: Option<Amount>, to: Option<&str>) -> AdminRequest {
        AdminRequest {
            task: task.to_string(),
            fee_or_amount: amount,
            to_or_consumer: to.map(str::to_string),
        }
    }

    #[test]
    fn amount_accepts_numbers_and_strings() {
        let parsed: AdminRequest =
            serde_json::from_str(r#"{"task":"set_fee","fee_or_amount":"1000000000000000000000"}"#)
                .unwrap();
        assert_eq!(
            parsed.amount().unwrap(),
            U256::from(10u64).pow(U256::from(21u64))
        );
        let parsed: AdminRequest =
            serde_json::from_str(r#"{"task":"set_fee","fee_or_amount":7}"#).unwrap();
        assert_eq!(parsed.amount().unwrap(), U256::from(7u64));
    }

    #[tokio::test]
    async fn withdraw_to_encodes_the_recipient() {
        let mut chain = MockChainClient::new();
        chain.expect_pending_nonce().returning(|_| Ok(1));
        chain.expect_gas_price().returning(|| Ok(1));
        chain
            .expect_send_transaction()
            .withf(|tx| tx.input.starts_with(&OracleRouter::withdrawToCall::SELECTOR))
            .returning(|_| Ok(B256::repeat_byte(0xab)));

        let response = execute(
            &submitter(chain),
            &request(
                "withdraw",
                Some(Amount::Number(5)),
                Some("0x70997970C51812dc3A010C7d01b50e0d17dc79C8"),
            ),
        )
        .await;
        assert!(response.success, "{response:?}");
        assert_eq!(response.result.unwrap(), to_hex(B256::repeat_byte(0xab)));
    }

    #[tokio::test]
    async fn queries_decode_the_returned_word() {
        let mut chain = MockChainClient::new();
        chain
            .expect_call()
            .withf(|_, input| input.starts_with(&OracleRouter::getProviderMinFeeCall::SELECTOR))
            .returning(|_, _| Ok(Bytes::from(U256::from(42u64).abi_encode())));

        let response = execute(&submitter(chain), &request("query_fees", None, None)).await;
        assert_eq!(response.result.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn invalid_requests_fail_without_touching_the_chain() {
        let submitter = submitter(MockChainClient::new());

        let response = execute(&submitter, &request("mint", None, None)).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("unknown task"));

        let response = execute(
            &submitter,
            &request("set_granular_fee", Some(Amount::Number(1)), None),
        )
        .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("to_or_consumer"));
    }
}
