use async_trait::async_trait;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use super::{keep_existing_pool, JobStore};
use crate::error::OracleError;
use crate::models::{
    u128_to_numeric, DataRequestChangeset, DataRequestRow, DexPairRow, FailedFulfilmentRow,
    NewDataRequestRow, NewFailedFulfilmentRow, SupportedPairRow, TokenContractRow,
};
use crate::schema::data_requests::dsl as requests_dsl;
use crate::schema::dex_pairs::dsl as dex_dsl;
use crate::schema::failed_fulfilment::dsl as failed_dsl;
use crate::schema::supported_pairs::dsl as pairs_dsl;
use crate::schema::to_blocks::dsl as blocks_dsl;
use crate::schema::token_contracts::dsl as tokens_dsl;
use crate::schema::version_info::dsl as version_dsl;
use crate::types::{
    DataRequest, DexPair, FailedFulfilment, Fulfillment, JobStatus, NewDataRequest,
    RequestStatus, SupportedPair, TokenContract,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<AsyncPgConnection>;

/// Builds the connection pool for `database_url`.
pub fn build_pool(database_url: &str) -> Result<PgPool, OracleError> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Pool::builder(config)
        .build()
        .map_err(|e| OracleError::Config(format!("Failed to build database pool: {e}")))
}

/// Applies pending embedded migrations on a blocking thread.
pub async fn run_migrations(database_url: &str) -> Result<(), OracleError> {
    let url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = AsyncConnectionWrapper::<AsyncPgConnection>::establish(&url)
            .map_err(|e| OracleError::Migration(e.to_string()))?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| OracleError::Migration(e.to_string()))?;
        for migration in applied {
            tracing::info!("Applied migration {}", migration);
        }
        Ok(())
    })
    .await
    .map_err(|e| OracleError::Migration(e.to_string()))?
}

/// Postgres-backed [`JobStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<Object<AsyncPgConnection>, OracleError> {
        self.pool.get().await.map_err(OracleError::Connection)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_request(&self, request: NewDataRequest) -> Result<bool, OracleError> {
        let mut conn = self.conn().await?;
        let row = NewDataRequestRow::from(&request);
        let inserted = diesel::insert_into(requests_dsl::data_requests)
            .values(&row)
            .on_conflict(requests_dsl::request_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(inserted > 0)
    }

    async fn get_request(&self, request_id: &str) -> Result<Option<DataRequest>, OracleError> {
        let mut conn = self.conn().await?;
        let row = requests_dsl::data_requests
            .filter(requests_dsl::request_id.eq(request_id))
            .select(DataRequestRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        row.map(DataRequest::try_from).transpose()
    }

    async fn pending_requests(&self) -> Result<Vec<DataRequest>, OracleError> {
        let mut conn = self.conn().await?;
        let rows = requests_dsl::data_requests
            .filter(requests_dsl::job_status.eq(JobStatus::Pending.to_string()))
            .order(requests_dsl::id.asc())
            .select(DataRequestRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(DataRequest::try_from).collect()
    }

    async fn save_request(&self, request: &DataRequest) -> Result<bool, OracleError> {
        let mut conn = self.conn().await?;
        let changes = DataRequestChangeset::from(request);
        let updated = diesel::update(
            requests_dsl::data_requests
                .filter(requests_dsl::id.eq(request.id))
                .filter(requests_dsl::job_status.eq(JobStatus::Pending.to_string())),
        )
        .set(&changes)
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn mark_fulfilled(
        &self,
        request_id: &str,
        fulfillment: &Fulfillment,
    ) -> Result<bool, OracleError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            requests_dsl::data_requests
                .filter(requests_dsl::request_id.eq(request_id))
                .filter(requests_dsl::job_status.eq(JobStatus::Pending.to_string())),
        )
        .set((
            requests_dsl::status.eq(RequestStatus::Success.to_string()),
            requests_dsl::job_status.eq(JobStatus::Success.to_string()),
            requests_dsl::status_reason.eq(None::<String>),
            requests_dsl::fulfill_tx_hash.eq(Some(fulfillment.tx_hash.clone())),
            requests_dsl::fulfill_confirmed_block
                .eq(i64::try_from(fulfillment.block_number).unwrap_or(i64::MAX)),
            requests_dsl::fulfill_gas_used
                .eq(i64::try_from(fulfillment.gas_used).unwrap_or(i64::MAX)),
            requests_dsl::fulfill_gas_price.eq(u128_to_numeric(fulfillment.gas_price)),
            requests_dsl::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    async fn record_failed_fulfilment(
        &self,
        failed: &FailedFulfilment,
    ) -> Result<(), OracleError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(failed_dsl::failed_fulfilment)
            .values(NewFailedFulfilmentRow::from(failed))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn failed_fulfilments(
        &self,
        request_id: &str,
    ) -> Result<Vec<FailedFulfilment>, OracleError> {
        let mut conn = self.conn().await?;
        let rows = failed_dsl::failed_fulfilment
            .filter(failed_dsl::request_id.eq(request_id))
            .order(failed_dsl::id.asc())
            .select(FailedFulfilmentRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(FailedFulfilment::from).collect())
    }

    async fn last_block_seen(&self) -> Result<Option<u64>, OracleError> {
        let mut conn = self.conn().await?;
        let block: Option<i64> = blocks_dsl::to_blocks
            .select(max(blocks_dsl::last_block_seen))
            .first(&mut conn)
            .await?;
        Ok(block.and_then(|b| u64::try_from(b).ok()))
    }

    async fn advance_last_block_seen(&self, block: u64) -> Result<bool, OracleError> {
        let mut conn = self.conn().await?;
        let block = i64::try_from(block)
            .map_err(|_| OracleError::Conversion(format!("block {block} overflows i64")))?;
        // Single statement so concurrent writers cannot move the checkpoint backwards.
        let inserted = diesel::sql_query(
            "INSERT INTO to_blocks (last_block_seen) \
             SELECT $1 WHERE $1 > COALESCE((SELECT MAX(last_block_seen) FROM to_blocks), -1)",
        )
        .bind::<BigInt, _>(block)
        .execute(&mut conn)
        .await?;
        Ok(inserted > 0)
    }

    async fn upsert_supported_pairs(&self, pairs: &[SupportedPair]) -> Result<(), OracleError> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let rows: Vec<SupportedPairRow> = pairs.iter().map(SupportedPairRow::from).collect();
        diesel::insert_into(pairs_dsl::supported_pairs)
            .values(&rows)
            .on_conflict(pairs_dsl::name)
            .do_update()
            .set((
                pairs_dsl::base.eq(excluded(pairs_dsl::base)),
                pairs_dsl::target.eq(excluded(pairs_dsl::target)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn supported_pair(
        &self,
        base: &str,
        target: &str,
    ) -> Result<Option<SupportedPair>, OracleError> {
        let mut conn = self.conn().await?;
        let row = pairs_dsl::supported_pairs
            .filter(pairs_dsl::base.eq(base))
            .filter(pairs_dsl::target.eq(target))
            .select(SupportedPairRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(SupportedPair::from))
    }

    async fn upsert_dex_pair(&self, pair: &DexPair) -> Result<(), OracleError> {
        let mut conn = self.conn().await?;
        let existing = dex_dsl::dex_pairs
            .filter(dex_dsl::dex.eq(&pair.dex))
            .filter(dex_dsl::pair.eq(&pair.pair))
            .select(DexPairRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        if let Some(existing) = existing {
            if keep_existing_pool(&DexPair::from(existing), pair) {
                return Ok(());
            }
        }

        let row = DexPairRow::from(pair);
        diesel::insert_into(dex_dsl::dex_pairs)
            .values(&row)
            .on_conflict((dex_dsl::dex, dex_dsl::pair))
            .do_update()
            .set(&row)
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn dex_pair(
        &self,
        base: &str,
        target: &str,
        dex: &str,
    ) -> Result<Option<DexPair>, OracleError> {
        let mut conn = self.conn().await?;
        let row = dex_dsl::dex_pairs
            .filter(dex_dsl::dex.eq(dex))
            .filter(
                dex_dsl::t0_symbol
                    .eq(base)
                    .and(dex_dsl::t1_symbol.eq(target))
                    .or(dex_dsl::t0_symbol.eq(target).and(dex_dsl::t1_symbol.eq(base))),
            )
            .order(dex_dsl::reserve_usd.desc())
            .select(DexPairRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(DexPair::from))
    }

    async fn upsert_token_contract(&self, token: &TokenContract) -> Result<(), OracleError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(tokens_dsl::token_contracts)
            .values(TokenContractRow::from(token))
            .on_conflict((tokens_dsl::symbol, tokens_dsl::chain))
            .do_update()
            .set(tokens_dsl::contract_address.eq(excluded(tokens_dsl::contract_address)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn token_contract(
        &self,
        symbol: &str,
        chain: &str,
    ) -> Result<Option<TokenContract>, OracleError> {
        let mut conn = self.conn().await?;
        let row = tokens_dsl::token_contracts
            .filter(tokens_dsl::symbol.eq(symbol))
            .filter(tokens_dsl::chain.eq(chain))
            .select(TokenContractRow::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(TokenContract::from))
    }

    async fn schema_version(&self) -> Result<Option<i32>, OracleError> {
        let mut conn = self.conn().await?;
        let version: Option<i32> = version_dsl::version_info
            .select(max(version_dsl::version))
            .first(&mut conn)
            .await?;
        Ok(version)
    }
}
