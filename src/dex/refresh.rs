//! Background crawl that fills the `dex_pairs` and `token_contracts` caches.

use std::sync::Arc;

use tracing::instrument;

use super::{canonical_symbol, is_valid_symbol, DexModule, SubgraphClient, PAGE_SIZE};
use crate::error::OracleError;
use crate::store::JobStore;
use crate::types::{DexPair, TokenContract};
use crate::utils::log_tasks_results;

/// Crawls every module in parallel. Module failures are logged, not returned.
#[instrument(skip_all)]
pub async fn refresh_dex_pairs(
    modules: Vec<Arc<dyn DexModule>>,
    client: SubgraphClient,
    store: Arc<dyn JobStore>,
) {
    let tasks: Vec<_> = modules
        .into_iter()
        .map(|module| {
            let client = client.clone();
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                crawl_module(module.as_ref(), &client, store.as_ref()).await
            })
        })
        .collect();

    let results = futures::future::join_all(tasks).await;
    log_tasks_results("DEX PAIRS", results);
}

/// Pages through one module's pairs until a short page. Returns how many pools were cached.
pub async fn crawl_module(
    module: &dyn DexModule,
    client: &SubgraphClient,
    store: &dyn JobStore,
) -> Result<usize, OracleError> {
    let mut cursor = String::new();
    let mut cached = 0;

    loop {
        let body = module.build_pairs_query(&cursor);
        let response = client.query(module.subgraph_url(), &body).await?;
        let page = module.decode_pairs(&response)?;

        for pool in &page {
            if !is_valid_symbol(&pool.token0.symbol) || !is_valid_symbol(&pool.token1.symbol) {
                tracing::debug!("[DEX PAIRS] {}: skipping pool {}", module.name(), pool.id);
                continue;
            }
            let t0 = canonical_symbol(&pool.token0.symbol);
            let t1 = canonical_symbol(&pool.token1.symbol);

            let pair = DexPair {
                dex: module.name().to_string(),
                pair: DexPair::pair_name(&t0, &t1),
                t0_symbol: t0.clone(),
                t1_symbol: t1.clone(),
                contract_address: pool.id.clone(),
                reserve_usd: pool.reserve_usd,
            };
            if let Err(e) = store.upsert_dex_pair(&pair).await {
                tracing::warn!(
                    "[DEX PAIRS] {}: failed to cache pool {}: {e}",
                    module.name(),
                    pool.id
                );
                continue;
            }
            for (symbol, token) in [(t0, &pool.token0), (t1, &pool.token1)] {
                let contract = TokenContract {
                    symbol,
                    contract_address: token.address.clone(),
                    chain: module.chain().to_string(),
                };
                if let Err(e) = store.upsert_token_contract(&contract).await {
                    tracing::warn!(
                        "[DEX PAIRS] {}: failed to cache token {}: {e}",
                        module.name(),
                        contract.symbol
                    );
                }
            }
            cached += 1;
        }

        match page.last() {
            Some(last) if page.len() >= PAGE_SIZE => cursor = last.id.clone(),
            _ => break,
        }
    }

    tracing::info!("[DEX PAIRS] {}: cached {cached} pools", module.name());
    Ok(cached)
}
