//! Pool-based subgraphs (Uniswap V3 schema).

use serde::Deserialize;
use serde_json::{json, Value};

use super::subgraph::{parse_number, prices_query};
use super::uniswap_v2::RawToken;
use super::{DexModule, ModuleSettings, PoolInfo, PAGE_SIZE};
use crate::error::OracleError;

pub struct PoolDex {
    settings: ModuleSettings,
}

impl PoolDex {
    pub fn new(settings: ModuleSettings) -> Self {
        Self { settings }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPool {
    id: String,
    token0: RawToken,
    token1: RawToken,
    #[serde(rename = "totalValueLockedUSD")]
    total_value_locked_usd: String,
    tx_count: String,
}

#[derive(Deserialize)]
struct PoolsData {
    pools: Vec<RawPool>,
}

#[derive(Deserialize)]
struct PoolsResponse {
    data: PoolsData,
}

impl DexModule for PoolDex {
    fn settings(&self) -> &ModuleSettings {
        &self.settings
    }

    fn build_pairs_query(&self, cursor: &str) -> Value {
        let query = format!(
            "{{ pools(first: {PAGE_SIZE}, orderBy: id, orderDirection: asc, \
             where: {{id_gt: \"{cursor}\", totalValueLockedUSD_gt: \"{}\", txCount_gt: \"{}\"}}) \
             {{ id token0 {{ id symbol }} token1 {{ id symbol }} totalValueLockedUSD txCount }} }}",
            self.min_liquidity(),
            self.min_tx_count()
        );
        json!({ "query": query })
    }

    fn build_prices_query(
        &self,
        pair_address: &str,
        minutes: u64,
        current_block: u64,
        blocks_per_min: u64,
    ) -> Value {
        prices_query("pool", pair_address, minutes, current_block, blocks_per_min)
    }

    fn decode_pairs(&self, body: &Value) -> Result<Vec<PoolInfo>, OracleError> {
        let response = PoolsResponse::deserialize(body)
            .map_err(|e| OracleError::Dex(format!("{}: bad pools page: {e}", self.name())))?;
        response
            .data
            .pools
            .into_iter()
            .map(|raw| {
                Ok(PoolInfo {
                    id: raw.id.to_lowercase(),
                    reserve_usd: parse_number(&raw.total_value_locked_usd, "totalValueLockedUSD")?,
                    tx_count: parse_number(&raw.tx_count, "txCount")?,
                    token0: raw.token0.into(),
                    token1: raw.token1.into(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> PoolDex {
        PoolDex::new(ModuleSettings {
            name: "uniswapv3".into(),
            chain: "ethereum".into(),
            subgraph_url: "http://localhost/v3".into(),
            min_liquidity: 10_000.0,
            min_tx_count: 100,
            blocks_per_min: 5,
        })
    }

    #[test]
    fn queries_pools_by_locked_value() {
        let body = module().build_pairs_query("");
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("pools(first: 1000"));
        assert!(query.contains("totalValueLockedUSD_gt: \"10000\""));

        let body = module().build_prices_query("0xPOOL", 1, 100, 5);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("p1: pool(id: \"0xpool\", block: {number: 95})"));
    }

    #[test]
    fn decodes_a_pools_page() {
        let body = json!({
            "data": { "pools": [{
                "id": "0x88e6",
                "token0": { "id": "0xa0b8", "symbol": "USDC" },
                "token1": { "id": "0xc02a", "symbol": "WETH" },
                "totalValueLockedUSD": "250000000.5",
                "txCount": "1000000"
            }]}
        });
        let pools = module().decode_pairs(&body).unwrap();
        assert_eq!(pools[0].token1.symbol, "WETH");
        assert_eq!(pools[0].reserve_usd, 250000000.5);
    }
}
