//! Pair-based subgraphs (Uniswap V2 schema and its forks).

use serde::Deserialize;
use serde_json::{json, Value};

use super::subgraph::{parse_number, prices_query};
use super::{DexModule, ModuleSettings, PoolInfo, Token, PAGE_SIZE};
use crate::error::OracleError;

pub struct PairDex {
    settings: ModuleSettings,
}

impl PairDex {
    pub fn new(settings: ModuleSettings) -> Self {
        Self { settings }
    }
}

#[derive(Deserialize)]
pub(crate) struct RawToken {
    pub(crate) id: String,
    pub(crate) symbol: String,
}

impl From<RawToken> for Token {
    fn from(raw: RawToken) -> Self {
        Token {
            address: raw.id.to_lowercase(),
            symbol: raw.symbol,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    id: String,
    token0: RawToken,
    token1: RawToken,
    #[serde(rename = "reserveUSD")]
    reserve_usd: String,
    tx_count: String,
}

#[derive(Deserialize)]
struct PairsData {
    pairs: Vec<RawPair>,
}

#[derive(Deserialize)]
struct PairsResponse {
    data: PairsData,
}

impl DexModule for PairDex {
    fn settings(&self) -> &ModuleSettings {
        &self.settings
    }

    fn build_pairs_query(&self, cursor: &str) -> Value {
        let query = format!(
            "{{ pairs(first: {PAGE_SIZE}, orderBy: id, orderDirection: asc, \
             where: {{id_gt: \"{cursor}\", reserveUSD_gt: \"{}\", txCount_gt: \"{}\"}}) \
             {{ id token0 {{ id symbol }} token1 {{ id symbol }} reserveUSD txCount }} }}",
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
        prices_query("pair", pair_address, minutes, current_block, blocks_per_min)
    }

    fn decode_pairs(&self, body: &Value) -> Result<Vec<PoolInfo>, OracleError> {
        let response = PairsResponse::deserialize(body)
            .map_err(|e| OracleError::Dex(format!("{}: bad pairs page: {e}", self.name())))?;
        response
            .data
            .pairs
            .into_iter()
            .map(|raw| {
                Ok(PoolInfo {
                    id: raw.id.to_lowercase(),
                    reserve_usd: parse_number(&raw.reserve_usd, "reserveUSD")?,
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

    fn module() -> PairDex {
        PairDex::new(ModuleSettings {
            name: "sushiswap".into(),
            chain: "ethereum".into(),
            subgraph_url: "http://localhost/sushi".into(),
            min_liquidity: 5000.0,
            min_tx_count: 10,
            blocks_per_min: 5,
        })
    }

    #[test]
    fn pairs_query_pages_by_id_with_thresholds() {
        let body = module().build_pairs_query("0x10");
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("pairs(first: 1000"));
        assert!(query.contains("id_gt: \"0x10\""));
        assert!(query.contains("reserveUSD_gt: \"5000\""));
        assert!(query.contains("txCount_gt: \"10\""));
    }

    #[test]
    fn decodes_a_pairs_page() {
        let body = json!({
            "data": { "pairs": [{
                "id": "0xABCD",
                "token0": { "id": "0xC02A", "symbol": "WETH" },
                "token1": { "id": "0xDAC1", "symbol": "USDT" },
                "reserveUSD": "123456.78",
                "txCount": "4242"
            }]}
        });
        let pools = module().decode_pairs(&body).unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].id, "0xabcd");
        assert_eq!(pools[0].token0.symbol, "WETH");
        assert_eq!(pools[0].token0.address, "0xc02a");
        assert_eq!(pools[0].reserve_usd, 123456.78);
        assert_eq!(pools[0].tx_count, 4242);
    }

    #[test]
    fn rejects_pages_with_bad_numbers() {
        let body = json!({
            "data": { "pairs": [{
                "id": "0x1",
                "token0": { "id": "0x2", "symbol": "A" },
                "token1": { "id": "0x3", "symbol": "B" },
                "reserveUSD": "lots",
                "txCount": "1"
            }]}
        });
        assert!(module().decode_pairs(&body).is_err());
    }
}
