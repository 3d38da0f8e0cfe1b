use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::PriceQuote;
use crate::constants::SUBGRAPH_TIMEOUT;
use crate::error::OracleError;

const PRICE_FIELDS: &str = "token0 { symbol } token1 { symbol } token0Price token1Price";

/// GraphQL-over-HTTP client shared by every DEX module.
#[derive(Debug, Clone)]
pub struct SubgraphClient {
    http: Client,
}

impl SubgraphClient {
    pub fn new() -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(SUBGRAPH_TIMEOUT)
            .build()
            .map_err(|e| OracleError::Dex(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// POSTs `body` and returns the decoded response. GraphQL `errors` are failures.
    pub async fn query(&self, url: &str, body: &Value) -> Result<Value, OracleError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| OracleError::Dex(format!("subgraph request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Dex(format!("subgraph returned {status}")));
        }

        // Token symbols are user-defined and may not be valid UTF-8.
        let bytes = response
            .bytes()
            .await
            .map_err(|e| OracleError::Dex(format!("subgraph response unreadable: {e}")))?;
        let value: Value = serde_json::from_str(&String::from_utf8_lossy(&bytes))
            .map_err(|e| OracleError::Dex(format!("invalid subgraph response: {e}")))?;
        if let Some(errors) = value.get("errors") {
            return Err(OracleError::Dex(format!("subgraph errors: {errors}")));
        }
        Ok(value)
    }

    /// Latest block indexed by the subgraph.
    pub async fn current_block(&self, url: &str) -> Result<u64, OracleError> {
        let body = json!({ "query": "{ _meta { block { number } } }" });
        let value = self.query(url, &body).await?;
        value
            .pointer("/data/_meta/block/number")
            .and_then(Value::as_u64)
            .ok_or_else(|| OracleError::Dex("subgraph did not report a block".to_string()))
    }
}

/// Aliased query: `p0` is the current price, `p{i}` the price `i` minutes ago.
pub(crate) fn prices_query(
    entity: &str,
    address: &str,
    minutes: u64,
    current_block: u64,
    blocks_per_min: u64,
) -> Value {
    let address = address.to_lowercase();
    let mut query = format!("{{ p0: {entity}(id: \"{address}\") {{ {PRICE_FIELDS} }}");
    for i in 1..=minutes {
        let Some(block) = current_block.checked_sub(i * blocks_per_min) else {
            break;
        };
        query.push_str(&format!(
            " p{i}: {entity}(id: \"{address}\", block: {{number: {block}}}) {{ {PRICE_FIELDS} }}"
        ));
    }
    query.push_str(" }");
    json!({ "query": query })
}

#[derive(Deserialize)]
struct RawSymbol {
    symbol: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuote {
    token0: RawSymbol,
    token1: RawSymbol,
    token0_price: String,
    token1_price: String,
}

/// Decodes every non-null aliased entry of a prices query. Snapshots taken
/// before the pair existed come back as `null` and are skipped.
pub(crate) fn decode_price_quotes(body: &Value) -> Result<Vec<PriceQuote>, OracleError> {
    let data = body
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| OracleError::Dex("subgraph response has no data".to_string()))?;

    Ok(data
        .values()
        .filter(|entry| !entry.is_null())
        .filter_map(|entry| RawQuote::deserialize(entry).ok())
        .map(|raw| PriceQuote {
            t0_symbol: raw.token0.symbol,
            t1_symbol: raw.token1.symbol,
            token0_price: raw.token0_price,
            token1_price: raw.token1_price,
        })
        .collect())
}

/// Subgraph numbers (`BigInt`, `BigDecimal`) arrive as strings.
pub(crate) fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, OracleError> {
    raw.trim()
        .parse()
        .map_err(|_| OracleError::Dex(format!("unparseable {what}: {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_walks_back_one_minute_per_alias() {
        let body = prices_query("pair", "0xABC", 3, 1000, 5);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("p0: pair(id: \"0xabc\")"));
        assert!(query.contains("p1: pair(id: \"0xabc\", block: {number: 995})"));
        assert!(query.contains("p3: pair(id: \"0xabc\", block: {number: 985})"));
        assert!(!query.contains("p4"));
    }

    #[test]
    fn zero_minutes_queries_only_the_current_price() {
        let body = prices_query("pool", "0xabc", 0, 1000, 5);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("p0: pool"));
        assert!(!query.contains("p1"));
    }

    #[test]
    fn history_stops_at_genesis() {
        let body = prices_query("pair", "0xabc", 60, 12, 5);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("block: {number: 2}"));
        assert!(!query.contains("p3"));
    }

    #[test]
    fn decodes_quotes_and_skips_nulls() {
        let body = json!({
            "data": {
                "p0": {
                    "token0": { "symbol": "WETH" },
                    "token1": { "symbol": "USDT" },
                    "token0Price": "0.0005",
                    "token1Price": "2000"
                },
                "p1": null,
                "p2": { "token0": { "symbol": "WETH" } }
            }
        });
        let quotes = decode_price_quotes(&body).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].token1_price, "2000");
        assert!(decode_price_quotes(&json!({ "errors": [] })).is_err());
    }
}
