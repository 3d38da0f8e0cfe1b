use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::{AsChangeset, Insertable, Queryable, Selectable};
use num_bigint::{BigInt, ToBigInt};
use num_traits::ToPrimitive;

use crate::error::OracleError;
use crate::types::{
    DataRequest, DexPair, FailedFulfilment, JobStatus, NewDataRequest, RequestStatus,
    SupportedPair, TokenContract,
};

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::data_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DataRequestRow {
    pub id: i64,
    pub request_id: String,
    pub consumer: String,
    pub provider: String,
    pub endpoint_raw: String,
    pub endpoint_text: String,
    pub is_adhoc: bool,
    pub fee: i64,
    pub request_block: i64,
    pub request_tx_hash: String,
    pub request_gas_used: i64,
    pub request_gas_price: BigDecimal,
    pub last_fetch_block: i64,
    pub fulfill_tx_hash: Option<String>,
    pub fulfill_sent_block: i64,
    pub fulfill_confirmed_block: i64,
    pub fulfill_gas_used: i64,
    pub fulfill_gas_price: BigDecimal,
    pub price_result: Option<String>,
    pub attempts: i32,
    pub status: String,
    pub job_status: String,
    pub status_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::data_requests)]
pub struct NewDataRequestRow {
    pub request_id: String,
    pub consumer: String,
    pub provider: String,
    pub endpoint_raw: String,
    pub endpoint_text: String,
    pub is_adhoc: bool,
    pub fee: i64,
    pub request_block: i64,
    pub request_tx_hash: String,
    pub request_gas_used: i64,
    pub request_gas_price: BigDecimal,
    pub status: String,
    pub job_status: String,
    pub status_reason: Option<String>,
}

/// Mutable part of a request row. Identity and request metadata are never rewritten.
#[derive(AsChangeset)]
#[diesel(table_name = crate::schema::data_requests)]
#[diesel(treat_none_as_null = true)]
pub struct DataRequestChangeset {
    pub last_fetch_block: i64,
    pub fulfill_tx_hash: Option<String>,
    pub fulfill_sent_block: i64,
    pub fulfill_confirmed_block: i64,
    pub fulfill_gas_used: i64,
    pub fulfill_gas_price: BigDecimal,
    pub price_result: Option<String>,
    pub attempts: i32,
    pub status: String,
    pub job_status: String,
    pub status_reason: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::failed_fulfilment)]
pub struct NewFailedFulfilmentRow {
    pub request_id: String,
    pub tx_hash: String,
    pub gas_used: i64,
    pub gas_price: BigDecimal,
    pub reason: String,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = crate::schema::failed_fulfilment)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FailedFulfilmentRow {
    pub id: i64,
    pub request_id: String,
    pub tx_hash: String,
    pub gas_used: i64,
    pub gas_price: BigDecimal,
    pub reason: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::to_blocks)]
pub struct NewToBlockRow {
    pub last_block_seen: i64,
}

#[derive(Debug, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::supported_pairs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SupportedPairRow {
    pub name: String,
    pub base: String,
    pub target: String,
}

#[derive(Debug, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::dex_pairs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DexPairRow {
    pub dex: String,
    pub pair: String,
    pub t0_symbol: String,
    pub t1_symbol: String,
    pub contract_address: String,
    pub reserve_usd: f64,
}

#[derive(Debug, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::token_contracts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TokenContractRow {
    pub symbol: String,
    pub contract_address: String,
    pub chain: String,
}

pub(crate) fn u128_to_numeric(value: u128) -> BigDecimal {
    BigDecimal::new(BigInt::from(value), 0)
}

pub(crate) fn numeric_to_u128(value: &BigDecimal) -> u128 {
    value
        .to_bigint()
        .and_then(|v| v.to_u128())
        .unwrap_or_default()
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl TryFrom<DataRequestRow> for DataRequest {
    type Error = OracleError;

    fn try_from(row: DataRequestRow) -> Result<Self, Self::Error> {
        let status = RequestStatus::from_str(&row.status)
            .map_err(|e| OracleError::Conversion(format!("status {}: {e}", row.status)))?;
        let job_status = JobStatus::from_str(&row.job_status)
            .map_err(|e| OracleError::Conversion(format!("job_status {}: {e}", row.job_status)))?;

        Ok(DataRequest {
            id: row.id,
            request_id: row.request_id,
            consumer: row.consumer,
            provider: row.provider,
            endpoint_raw: row.endpoint_raw,
            endpoint_text: row.endpoint_text,
            is_adhoc: row.is_adhoc,
            fee: to_u64(row.fee),
            request_block: to_u64(row.request_block),
            request_tx_hash: row.request_tx_hash,
            request_gas_used: to_u64(row.request_gas_used),
            request_gas_price: numeric_to_u128(&row.request_gas_price),
            last_fetch_block: to_u64(row.last_fetch_block),
            fulfill_tx_hash: row.fulfill_tx_hash,
            fulfill_sent_block: to_u64(row.fulfill_sent_block),
            fulfill_confirmed_block: to_u64(row.fulfill_confirmed_block),
            fulfill_gas_used: to_u64(row.fulfill_gas_used),
            fulfill_gas_price: numeric_to_u128(&row.fulfill_gas_price),
            price_result: row.price_result,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            status,
            job_status,
            status_reason: row.status_reason,
        })
    }
}

impl From<&NewDataRequest> for NewDataRequestRow {
    fn from(new: &NewDataRequest) -> Self {
        let job_status = new.clone().into_request(0).job_status;
        Self {
            request_id: new.request_id.clone(),
            consumer: new.consumer.clone(),
            provider: new.provider.clone(),
            endpoint_raw: new.endpoint_raw.clone(),
            endpoint_text: new.endpoint_text.clone(),
            is_adhoc: new.is_adhoc,
            fee: to_i64(new.fee),
            request_block: to_i64(new.request_block),
            request_tx_hash: new.request_tx_hash.clone(),
            request_gas_used: to_i64(new.request_gas_used),
            request_gas_price: u128_to_numeric(new.request_gas_price),
            status: new.status.to_string(),
            job_status: job_status.to_string(),
            status_reason: new.status_reason.clone(),
        }
    }
}

impl From<&DataRequest> for DataRequestChangeset {
    fn from(request: &DataRequest) -> Self {
        Self {
            last_fetch_block: to_i64(request.last_fetch_block),
            fulfill_tx_hash: request.fulfill_tx_hash.clone(),
            fulfill_sent_block: to_i64(request.fulfill_sent_block),
            fulfill_confirmed_block: to_i64(request.fulfill_confirmed_block),
            fulfill_gas_used: to_i64(request.fulfill_gas_used),
            fulfill_gas_price: u128_to_numeric(request.fulfill_gas_price),
            price_result: request.price_result.clone(),
            attempts: i32::try_from(request.attempts).unwrap_or(i32::MAX),
            status: request.status.to_string(),
            job_status: request.job_status.to_string(),
            status_reason: request.status_reason.clone(),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }
}

impl From<&FailedFulfilment> for NewFailedFulfilmentRow {
    fn from(failed: &FailedFulfilment) -> Self {
        Self {
            request_id: failed.request_id.clone(),
            tx_hash: failed.tx_hash.clone(),
            gas_used: to_i64(failed.gas_used),
            gas_price: u128_to_numeric(failed.gas_price),
            reason: failed.reason.clone(),
        }
    }
}

impl From<FailedFulfilmentRow> for FailedFulfilment {
    fn from(row: FailedFulfilmentRow) -> Self {
        Self {
            request_id: row.request_id,
            tx_hash: row.tx_hash,
            gas_used: to_u64(row.gas_used),
            gas_price: numeric_to_u128(&row.gas_price),
            reason: row.reason,
        }
    }
}

impl From<SupportedPairRow> for SupportedPair {
    fn from(row: SupportedPairRow) -> Self {
        Self {
            name: row.name,
            base: row.base,
            target: row.target,
        }
    }
}

impl From<&SupportedPair> for SupportedPairRow {
    fn from(pair: &SupportedPair) -> Self {
        Self {
            name: pair.name.clone(),
            base: pair.base.clone(),
            target: pair.target.clone(),
        }
    }
}

impl From<DexPairRow> for DexPair {
    fn from(row: DexPairRow) -> Self {
        Self {
            dex: row.dex,
            pair: row.pair,
            t0_symbol: row.t0_symbol,
            t1_symbol: row.t1_symbol,
            contract_address: row.contract_address,
            reserve_usd: row.reserve_usd,
        }
    }
}

impl From<&DexPair> for DexPairRow {
    fn from(pair: &DexPair) -> Self {
        Self {
            dex: pair.dex.clone(),
            pair: pair.pair.clone(),
            t0_symbol: pair.t0_symbol.clone(),
            t1_symbol: pair.t1_symbol.clone(),
            contract_address: pair.contract_address.clone(),
            reserve_usd: pair.reserve_usd,
        }
    }
}

impl From<TokenContractRow> for TokenContract {
    fn from(row: TokenContractRow) -> Self {
        Self {
            symbol: row.symbol,
            contract_address: row.contract_address,
            chain: row.chain,
        }
    }
}

impl From<&TokenContract> for TokenContractRow {
    fn from(token: &TokenContract) -> Self {
        Self {
            symbol: token.symbol.clone(),
            contract_address: token.contract_address.clone(),
            chain: token.chain.clone(),
        }
    }
}
