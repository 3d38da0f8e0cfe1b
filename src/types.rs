use strum::{Display, EnumString};

/// Fine-grained lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Initialised,
    FetchingData,
    DataReady,
    TxSent,
    ApiError,
    TxFailed,
    Success,
    FulfilmentFailed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Success | RequestStatus::FulfilmentFailed)
    }
}

/// Coarse job state. Only `Pending -> Success` and `Pending -> Fail` are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Success,
    Fail,
}

/// One row per observed `DataRequested` event.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    /// Insertion order, assigned by the store.
    pub id: i64,
    pub request_id: String,
    pub consumer: String,
    pub provider: String,
    pub endpoint_raw: String,
    pub endpoint_text: String,
    pub is_adhoc: bool,
    pub fee: u64,
    pub request_block: u64,
    pub request_tx_hash: String,
    pub request_gas_used: u64,
    pub request_gas_price: u128,
    pub last_fetch_block: u64,
    pub fulfill_tx_hash: Option<String>,
    pub fulfill_sent_block: u64,
    pub fulfill_confirmed_block: u64,
    pub fulfill_gas_used: u64,
    pub fulfill_gas_price: u128,
    pub price_result: Option<String>,
    pub attempts: u32,
    pub status: RequestStatus,
    pub job_status: JobStatus,
    pub status_reason: Option<String>,
}

impl DataRequest {
    /// Blocks elapsed since the request was emitted.
    pub fn age(&self, now_block: u64) -> u64 {
        now_block.saturating_sub(self.request_block)
    }

    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.job_status = match status {
            RequestStatus::Success => JobStatus::Success,
            RequestStatus::FulfilmentFailed => JobStatus::Fail,
            _ => JobStatus::Pending,
        };
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.set_status(RequestStatus::FulfilmentFailed);
        self.status_reason = Some(reason.into());
    }
}

/// Fields captured when a request is first seen on chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataRequest {
    pub request_id: String,
    pub consumer: String,
    pub provider: String,
    pub endpoint_raw: String,
    pub endpoint_text: String,
    pub is_adhoc: bool,
    pub fee: u64,
    pub request_block: u64,
    pub request_tx_hash: String,
    pub request_gas_used: u64,
    pub request_gas_price: u128,
    pub status: RequestStatus,
    pub status_reason: Option<String>,
}

impl NewDataRequest {
    pub fn into_request(self, id: i64) -> DataRequest {
        let mut request = DataRequest {
            id,
            request_id: self.request_id,
            consumer: self.consumer,
            provider: self.provider,
            endpoint_raw: self.endpoint_raw,
            endpoint_text: self.endpoint_text,
            is_adhoc: self.is_adhoc,
            fee: self.fee,
            request_block: self.request_block,
            request_tx_hash: self.request_tx_hash,
            request_gas_used: self.request_gas_used,
            request_gas_price: self.request_gas_price,
            last_fetch_block: 0,
            fulfill_tx_hash: None,
            fulfill_sent_block: 0,
            fulfill_confirmed_block: 0,
            fulfill_gas_used: 0,
            fulfill_gas_price: 0,
            price_result: None,
            attempts: 0,
            status: self.status,
            job_status: JobStatus::Pending,
            status_reason: self.status_reason,
        };
        request.set_status(self.status);
        request
    }
}

/// Fulfilment metadata recorded when the request is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fulfillment {
    pub tx_hash: String,
    pub block_number: u64,
    pub gas_used: u64,
    pub gas_price: u128,
}

/// Audit row for a fulfilment attempt that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFulfilment {
    pub request_id: String,
    pub tx_hash: String,
    pub gas_used: u64,
    pub gas_price: u128,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SupportedPair {
    pub name: String,
    pub base: String,
    pub target: String,
}

/// Cached pool of one DEX module, keyed by `(dex, pair)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DexPair {
    pub dex: String,
    /// `T0/T1` using canonical symbols.
    pub pair: String,
    pub t0_symbol: String,
    pub t1_symbol: String,
    pub contract_address: String,
    pub reserve_usd: f64,
}

impl DexPair {
    pub fn pair_name(t0: &str, t1: &str) -> String {
        format!("{t0}/{t1}")
    }

    pub fn matches(&self, base: &str, target: &str) -> bool {
        (self.t0_symbol == base && self.t1_symbol == target)
            || (self.t0_symbol == target && self.t1_symbol == base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContract {
    pub symbol: String,
    pub contract_address: String,
    pub chain: String,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_round_trips_through_its_column_text() {
        assert_eq!(RequestStatus::FulfilmentFailed.to_string(), "FULFILMENT_FAILED");
        assert_eq!(
            RequestStatus::from_str("TX_SENT").unwrap(),
            RequestStatus::TxSent
        );
        assert_eq!(JobStatus::Pending.to_string(), "PENDING");
    }

    #[test]
    fn job_status_follows_request_status() {
        let mut req = NewDataRequest {
            request_id: "0x01".into(),
            consumer: "0xc".into(),
            provider: "0xp".into(),
            endpoint_raw: "0x".into(),
            endpoint_text: "BTC.USD.PR".into(),
            is_adhoc: false,
            fee: 0,
            request_block: 10,
            request_tx_hash: "0xt".into(),
            request_gas_used: 0,
            request_gas_price: 0,
            status: RequestStatus::Initialised,
            status_reason: None,
        }
        .into_request(1);
        assert_eq!(req.job_status, JobStatus::Pending);
        req.set_status(RequestStatus::TxFailed);
        assert_eq!(req.job_status, JobStatus::Pending);
        req.fail("request too old");
        assert_eq!(req.job_status, JobStatus::Fail);
        assert_eq!(req.status_reason.as_deref(), Some("request too old"));
        assert_eq!(req.age(300), 290);
    }
}
