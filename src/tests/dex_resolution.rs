use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use axum::{Json, Router};
use rstest::rstest;
use serde_json::{json, Value};

use super::common::*;
use crate::dex::refresh::crawl_module;
use crate::dex::{DexAggregator, DexModule, ModuleSettings, PairDex, PoolDex, SubgraphClient};
use crate::error::OracleError;
use crate::store::{JobStore, MemoryStore, MockJobStore};
use crate::types::DexPair;

const HEAD: u64 = 18_000_000;

fn settings(name: &str, subgraph_url: String) -> ModuleSettings {
    ModuleSettings {
        name: name.to_string(),
        chain: "ethereum".to_string(),
        subgraph_url,
        min_liquidity: 10_000.0,
        min_tx_count: 100,
        blocks_per_min: 5,
    }
}

fn quote(price: &str) -> Value {
    json!({
        "token0": { "symbol": "WETH" },
        "token1": { "symbol": "USDT" },
        "token0Price": "0",
        "token1Price": price,
    })
}

/// Answers `_meta` with a fixed head and any prices query with five samples,
/// one of them far from the rest.
async fn prices_subgraph(Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default();
    if query.contains("_meta") {
        return Json(json!({ "data": { "_meta": { "block": { "number": HEAD } } } }));
    }
    assert!(query.contains("p4:"), "unexpected query {query}");
    Json(json!({
        "data": {
            "p0": quote("100"),
            "p1": quote("101"),
            "p2": quote("99"),
            "p3": quote("100"),
            "p4": quote("1000"),
        }
    }))
}

async fn broken_subgraph() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

fn cached_pool(dex: &str, reserve_usd: f64) -> DexPair {
    DexPair {
        dex: dex.to_string(),
        pair: "ETH/USDT".to_string(),
        t0_symbol: "ETH".to_string(),
        t1_symbol: "USDT".to_string(),
        contract_address: "0x0d4a11d5eeaac28ec3f61d100daf4d40471f1852".to_string(),
        reserve_usd,
    }
}

fn aggregator(store: &Arc<MemoryStore>, modules: Vec<Arc<dyn DexModule>>) -> DexAggregator {
    DexAggregator::new(modules, SubgraphClient::new().unwrap(), store.clone())
}

#[rstest]
#[tokio::test]
async fn outlier_is_dropped_before_averaging(store: Arc<MemoryStore>) {
    let addr = spawn_http(
        Router::new()
            .route("/prices", post(prices_subgraph))
            .route("/broken", post(broken_subgraph)),
    )
    .await;
    store
        .upsert_dex_pair(&cached_pool("uniswapv2", 2_500_000.0))
        .await
        .unwrap();
    store
        .upsert_dex_pair(&cached_pool("sushiswap", 900_000.0))
        .await
        .unwrap();

    let modules: Vec<Arc<dyn DexModule>> = vec![
        Arc::new(PairDex::new(settings("uniswapv2", format!("http://{addr}/prices")))),
        Arc::new(PairDex::new(settings("sushiswap", format!("http://{addr}/broken")))),
        // No cached pool for this one, so it contributes nothing.
        Arc::new(PoolDex::new(settings("uniswapv3", format!("http://{addr}/broken")))),
    ];
    let dex = aggregator(&store, modules);

    let price = dex.resolve("WETH", "USDT", 4).await.unwrap();
    assert_eq!(price, "100000000000000000000");
}

#[rstest]
#[tokio::test]
async fn thin_pools_are_skipped(store: Arc<MemoryStore>) {
    let addr = spawn_http(Router::new().route("/prices", post(prices_subgraph))).await;
    store
        .upsert_dex_pair(&cached_pool("uniswapv2", 500.0))
        .await
        .unwrap();

    let modules: Vec<Arc<dyn DexModule>> = vec![Arc::new(PairDex::new(settings(
        "uniswapv2",
        format!("http://{addr}/prices"),
    )))];
    let dex = aggregator(&store, modules);

    let err = dex.resolve("ETH", "USDT", 4).await.unwrap_err();
    assert!(matches!(err, OracleError::Dex(ref msg) if msg == "no prices found on DEXs for pair"));
}

async fn pairs_subgraph(Json(body): Json<Value>) -> Json<Value> {
    let query = body["query"].as_str().unwrap_or_default();
    assert!(query.contains("id_gt: \"\""), "crawl must start from an empty cursor");
    Json(json!({
        "data": {
            "pairs": [
                {
                    "id": "0xPAIR1",
                    "token0": { "id": "0xC02AAA39B223FE8D0A0E5C4F27EAD9083C756CC2", "symbol": "WETH" },
                    "token1": { "id": "0xdac17f958d2ee523a2206206994597c13d831ec7", "symbol": "USDT" },
                    "reserveUSD": "2500000.5",
                    "txCount": "120000"
                },
                {
                    "id": "0xpair2",
                    "token0": { "id": "0x01", "symbol": "BAD SYMBOL" },
                    "token1": { "id": "0x02", "symbol": "USDT" },
                    "reserveUSD": "90000",
                    "txCount": "500"
                }
            ]
        }
    }))
}

#[rstest]
#[tokio::test]
async fn crawl_caches_valid_pools_and_tokens(store: Arc<MemoryStore>) {
    let addr = spawn_http(Router::new().route("/pairs", post(pairs_subgraph))).await;
    let module = PairDex::new(settings("uniswapv2", format!("http://{addr}/pairs")));

    let cached = crawl_module(&module, &SubgraphClient::new().unwrap(), store.as_ref())
        .await
        .unwrap();
    assert_eq!(cached, 1);

    let pool = store
        .dex_pair("USDT", "ETH", "uniswapv2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pool.pair, "ETH/USDT");
    assert_eq!(pool.contract_address, "0xpair1");
    assert_eq!(pool.reserve_usd, 2_500_000.5);

    let token = store
        .token_contract("ETH", "ethereum")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        token.contract_address,
        "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
    );
    assert!(store
        .dex_pair("BAD SYMBOL", "USDT", "uniswapv2")
        .await
        .unwrap()
        .is_none());
}

fn pair_json(id: &str, t0: (&str, &str), t1: (&str, &str)) -> Value {
    json!({
        "id": id,
        "token0": { "id": t0.0, "symbol": t0.1 },
        "token1": { "id": t1.0, "symbol": t1.1 },
        "reserveUSD": "750000",
        "txCount": "4000"
    })
}

/// A pairs page whose second pool has a symbol that is not valid UTF-8.
async fn mangled_pairs_subgraph() -> impl IntoResponse {
    let good = pair_json(
        "0xpair1",
        ("0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2", "WETH"),
        ("0xdac17f958d2ee523a2206206994597c13d831ec7", "USDT"),
    );
    let mut body = format!(
        r#"{{"data":{{"pairs":[{good},{{"id":"0xpair2","token0":{{"id":"0x01","symbol":"A"#
    )
    .into_bytes();
    body.extend_from_slice(&[0xff, 0xfe]);
    body.extend_from_slice(
        br#""},"token1":{"id":"0x02","symbol":"USDT"},"reserveUSD":"90000","txCount":"500"}]}}"#,
    );
    ([(header::CONTENT_TYPE, "application/json")], body)
}

#[rstest]
#[tokio::test]
async fn crawl_skips_symbols_that_are_not_utf8(store: Arc<MemoryStore>) {
    let addr = spawn_http(Router::new().route("/pairs", post(mangled_pairs_subgraph))).await;
    let module = PairDex::new(settings("uniswapv2", format!("http://{addr}/pairs")));

    let cached = crawl_module(&module, &SubgraphClient::new().unwrap(), store.as_ref())
        .await
        .unwrap();
    assert_eq!(cached, 1);
    assert!(store
        .dex_pair("ETH", "USDT", "uniswapv2")
        .await
        .unwrap()
        .is_some());
}

async fn two_pairs_subgraph() -> Json<Value> {
    Json(json!({
        "data": {
            "pairs": [
                pair_json(
                    "0xpair1",
                    ("0x10", "AVERYLONGSYMBOLTHATDOESNOTFITTHECOLUMN"),
                    ("0x11", "USDT"),
                ),
                pair_json("0xpair2", ("0x20", "WBTC"), ("0x21", "USDC")),
            ]
        }
    }))
}

#[tokio::test]
async fn crawl_keeps_going_when_a_row_is_rejected() {
    let addr = spawn_http(Router::new().route("/pairs", post(two_pairs_subgraph))).await;
    let module = PairDex::new(settings("uniswapv2", format!("http://{addr}/pairs")));

    let mut store = MockJobStore::new();
    store
        .expect_upsert_dex_pair()
        .withf(|pair| pair.contract_address == "0xpair1")
        .times(1)
        .returning(|_| {
            Err(OracleError::Database(DieselError::DatabaseError(
                DatabaseErrorKind::Unknown,
                Box::new("value too long for type character varying(64)".to_string()),
            )))
        });
    store
        .expect_upsert_dex_pair()
        .withf(|pair| pair.contract_address == "0xpair2" && pair.pair == "BTC/USDC")
        .times(1)
        .returning(|_| Ok(()));
    store
        .expect_upsert_token_contract()
        .withf(|token| token.symbol == "BTC" || token.symbol == "USDC")
        .times(2)
        .returning(|_| Ok(()));

    let cached = crawl_module(&module, &SubgraphClient::new().unwrap(), &store)
        .await
        .unwrap();
    assert_eq!(cached, 1);
}
