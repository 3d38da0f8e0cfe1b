//! Adhoc price resolution across DEX subgraphs.

pub mod refresh;
pub mod stats;
pub mod subgraph;
pub mod uniswap_v2;
pub mod uniswap_v3;

use std::collections::HashMap;
use std::sync::Arc;

use phf::phf_map;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::config::DexOverrides;
use crate::constants::{DEX_SAMPLES, RESOLUTION_FAILURES};
use crate::error::OracleError;
use crate::store::JobStore;

pub use subgraph::SubgraphClient;
pub use uniswap_v2::PairDex;
pub use uniswap_v3::PoolDex;

/// Page size of the pair crawl. A shorter page ends the crawl.
pub const PAGE_SIZE: usize = 1000;

pub const MODULE_NAMES: [&str; 4] = ["uniswapv2", "sushiswap", "pancakeswap", "uniswapv3"];

/// Wrapped natives are priced as the native asset.
static WRAPPED_SYMBOLS: phf::Map<&'static str, &'static str> = phf_map! {
    "WETH" => "ETH",
    "WBTC" => "BTC",
    "WBNB" => "BNB",
    "WMATIC" => "MATIC",
    "WAVAX" => "AVAX",
    "WFTM" => "FTM",
};

pub fn canonical_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    match WRAPPED_SYMBOLS.get(upper.as_str()) {
        Some(native) => native.to_string(),
        None => upper,
    }
}

/// Symbols with whitespace, NUL or replacement characters are not cached.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && !symbol
            .chars()
            .any(|c| c.is_whitespace() || c == '\0' || c == char::REPLACEMENT_CHARACTER)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub address: String,
    pub symbol: String,
}

/// One crawled pair or pool, in module-independent form.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInfo {
    pub id: String,
    pub token0: Token,
    pub token1: Token,
    pub reserve_usd: f64,
    pub tx_count: u64,
}

/// One price snapshot of a pair, as the subgraph reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuote {
    pub t0_symbol: String,
    pub t1_symbol: String,
    pub token0_price: String,
    pub token1_price: String,
}

impl PriceQuote {
    /// Price of `base` in the other token. Zero or unparseable samples are dropped.
    pub fn price_of(&self, base: &str) -> Option<f64> {
        let raw = if canonical_symbol(&self.t0_symbol) == base {
            &self.token1_price
        } else {
            &self.token0_price
        };
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p != 0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSettings {
    pub name: String,
    pub chain: String,
    pub subgraph_url: String,
    pub min_liquidity: f64,
    pub min_tx_count: u64,
    pub blocks_per_min: u64,
}

/// A DEX subgraph schema family. Query builders and decoders are pure; the
/// HTTP round trips go through [`SubgraphClient`].
pub trait DexModule: Send + Sync {
    fn settings(&self) -> &ModuleSettings;

    fn name(&self) -> &str {
        &self.settings().name
    }

    fn chain(&self) -> &str {
        &self.settings().chain
    }

    fn subgraph_url(&self) -> &str {
        &self.settings().subgraph_url
    }

    fn min_liquidity(&self) -> f64 {
        self.settings().min_liquidity
    }

    fn min_tx_count(&self) -> u64 {
        self.settings().min_tx_count
    }

    fn blocks_per_min(&self) -> u64 {
        self.settings().blocks_per_min
    }

    /// Body returning up to [`PAGE_SIZE`] pairs with an id after `cursor`.
    fn build_pairs_query(&self, cursor: &str) -> Value;

    /// Body returning the current price of `pair_address` and one snapshot
    /// per minute for the last `minutes` minutes.
    fn build_prices_query(
        &self,
        pair_address: &str,
        minutes: u64,
        current_block: u64,
        blocks_per_min: u64,
    ) -> Value;

    fn decode_pairs(&self, body: &Value) -> Result<Vec<PoolInfo>, OracleError>;

    fn decode_prices(&self, body: &Value) -> Result<Vec<PriceQuote>, OracleError> {
        subgraph::decode_price_quotes(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Pair,
    Pool,
}

struct Listing {
    name: &'static str,
    chain: &'static str,
    family: Family,
    subgraph_url: Option<&'static str>,
    blocks_per_min: u64,
    min_liquidity: f64,
    min_tx_count: u64,
}

const LISTINGS: [Listing; 4] = [
    Listing {
        name: "uniswapv2",
        chain: "ethereum",
        family: Family::Pair,
        subgraph_url: Some(
            "https://gateway.thegraph.com/api/{api_key}/subgraphs/id/A3Np3RQbaBA6oKJgiwDJeo5T3zrYfGHPWFYayMwtNDum",
        ),
        blocks_per_min: 5,
        min_liquidity: 10_000.0,
        min_tx_count: 100,
    },
    Listing {
        name: "sushiswap",
        chain: "ethereum",
        family: Family::Pair,
        subgraph_url: None,
        blocks_per_min: 5,
        min_liquidity: 10_000.0,
        min_tx_count: 100,
    },
    Listing {
        name: "pancakeswap",
        chain: "bsc",
        family: Family::Pair,
        subgraph_url: None,
        blocks_per_min: 20,
        min_liquidity: 10_000.0,
        min_tx_count: 100,
    },
    Listing {
        name: "uniswapv3",
        chain: "ethereum",
        family: Family::Pool,
        subgraph_url: Some(
            "https://gateway.thegraph.com/api/{api_key}/subgraphs/id/5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV",
        ),
        blocks_per_min: 5,
        min_liquidity: 10_000.0,
        min_tx_count: 100,
    },
];

/// Instantiates every module that has a usable subgraph URL.
pub fn build_modules(
    overrides: &HashMap<String, DexOverrides>,
    api_key: Option<&str>,
) -> Vec<Arc<dyn DexModule>> {
    let mut modules: Vec<Arc<dyn DexModule>> = Vec::new();
    for listing in &LISTINGS {
        let over = overrides.get(listing.name).cloned().unwrap_or_default();
        let Some(template) = over
            .subgraph_url
            .clone()
            .or_else(|| listing.subgraph_url.map(str::to_string))
        else {
            tracing::warn!("[DEX] No subgraph URL for {}, module disabled", listing.name);
            continue;
        };
        let subgraph_url = if template.contains("{api_key}") {
            match api_key {
                Some(key) => template.replace("{api_key}", key),
                None => {
                    tracing::warn!(
                        "[DEX] {} needs SUBGRAPH_API_KEY, module disabled",
                        listing.name
                    );
                    continue;
                }
            }
        } else {
            template
        };

        let settings = ModuleSettings {
            name: listing.name.to_string(),
            chain: listing.chain.to_string(),
            subgraph_url,
            min_liquidity: over.min_liquidity.unwrap_or(listing.min_liquidity),
            min_tx_count: over.min_tx_count.unwrap_or(listing.min_tx_count),
            blocks_per_min: listing.blocks_per_min,
        };
        match listing.family {
            Family::Pair => modules.push(Arc::new(PairDex::new(settings))),
            Family::Pool => modules.push(Arc::new(PoolDex::new(settings))),
        }
    }
    modules
}

/// Resolves adhoc endpoints from the cached pools of every module.
#[derive(Clone)]
pub struct DexAggregator {
    modules: Vec<Arc<dyn DexModule>>,
    client: SubgraphClient,
    store: Arc<dyn JobStore>,
}

impl DexAggregator {
    pub fn new(
        modules: Vec<Arc<dyn DexModule>>,
        client: SubgraphClient,
        store: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            modules,
            client,
            store,
        }
    }

    pub fn modules(&self) -> &[Arc<dyn DexModule>] {
        &self.modules
    }

    /// Outlier-filtered mean price of `base` in `target` over the last
    /// `minutes` minutes, in wei.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        base: &str,
        target: &str,
        minutes: u64,
    ) -> Result<String, OracleError> {
        let base = canonical_symbol(base);
        let target = canonical_symbol(target);

        let samples = self.collect_samples(&base, &target, minutes).await;
        if samples.is_empty() {
            RESOLUTION_FAILURES.with_label_values(&["dex"]).inc();
            return Err(OracleError::Dex(
                "no prices found on DEXs for pair".to_string(),
            ));
        }

        let filtered = stats::chauvenet(&samples);
        DEX_SAMPLES
            .with_label_values(&["kept"])
            .inc_by(filtered.kept.len() as u64);
        DEX_SAMPLES
            .with_label_values(&["rejected"])
            .inc_by((samples.len() - filtered.kept.len()) as u64);
        tracing::debug!(
            "[DEX] {base}/{target}: kept {}/{} samples (d_max {:?})",
            filtered.kept.len(),
            samples.len(),
            filtered.d_max
        );

        stats::wei_mean(&filtered.kept).inspect_err(|_| {
            RESOLUTION_FAILURES.with_label_values(&["dex"]).inc();
        })
    }

    /// Queries every module in parallel. Each module sends exactly one
    /// message, so the receive loop is sized to the module count.
    async fn collect_samples(&self, base: &str, target: &str, minutes: u64) -> Vec<f64> {
        let (tx, mut rx) = mpsc::channel(self.modules.len().max(1));

        for module in &self.modules {
            let tx = tx.clone();
            let module = Arc::clone(module);
            let client = self.client.clone();
            let store = Arc::clone(&self.store);
            let base = base.to_string();
            let target = target.to_string();
            tokio::spawn(async move {
                let result = module_prices(
                    module.as_ref(),
                    &client,
                    store.as_ref(),
                    &base,
                    &target,
                    minutes,
                )
                .await;
                let _ = tx.send((module.name().to_string(), result)).await;
            });
        }
        drop(tx);

        let mut pool = Vec::new();
        for _ in 0..self.modules.len() {
            match rx.recv().await {
                Some((_, Ok(prices))) => pool.extend(prices),
                Some((name, Err(e))) => {
                    tracing::warn!("[DEX] {name} failed for {base}/{target}: {e}");
                }
                None => break,
            }
        }
        pool
    }
}

async fn module_prices(
    module: &dyn DexModule,
    client: &SubgraphClient,
    store: &dyn JobStore,
    base: &str,
    target: &str,
    minutes: u64,
) -> Result<Vec<f64>, OracleError> {
    let Some(pair) = store.dex_pair(base, target, module.name()).await? else {
        return Ok(Vec::new());
    };
    if pair.reserve_usd < module.min_liquidity() {
        tracing::debug!(
            "[DEX] {} pool {} below liquidity threshold",
            module.name(),
            pair.contract_address
        );
        return Ok(Vec::new());
    }

    let current_block = client.current_block(module.subgraph_url()).await?;
    let body = module.build_prices_query(
        &pair.contract_address,
        minutes,
        current_block,
        module.blocks_per_min(),
    );
    let response = client.query(module.subgraph_url(), &body).await?;
    let quotes = module.decode_prices(&response)?;
    Ok(quotes.iter().filter_map(|q| q.price_of(base)).collect())
}
