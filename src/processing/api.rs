use std::sync::Arc;

use moka::future::Cache;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use crate::constants::{API_TIMEOUT, RESOLUTION_FAILURES, SUPPORTED_PAIRS_CACHE_TTL};
use crate::endpoint::Endpoint;
use crate::error::OracleError;
use crate::store::JobStore;
use crate::types::SupportedPair;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrice {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: RawPrice,
}

#[derive(Debug, Deserialize)]
struct RawCurrency {
    name: String,
    base: Option<String>,
    target: Option<String>,
}

impl RawCurrency {
    /// Falls back to splitting `name` on `/` or `-` when base/target are absent.
    fn into_pair(self) -> Option<SupportedPair> {
        let (base, target) = match (self.base, self.target) {
            (Some(base), Some(target)) => (base, target),
            _ => {
                let (base, target) = self.name.split_once(['/', '-'])?;
                (base.to_string(), target.to_string())
            }
        };
        Some(SupportedPair {
            name: self.name,
            base: base.trim().to_uppercase(),
            target: target.trim().to_uppercase(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrenciesResponse {
    List(Vec<RawCurrency>),
    Wrapped { currencies: Vec<RawCurrency> },
}

/// Resolves `PR` endpoints against the centralized price API.
#[derive(Clone)]
pub struct ApiResolver {
    http: Client,
    base_url: String,
    store: Arc<dyn JobStore>,
    pairs: Cache<(String, String), SupportedPair>,
}

impl ApiResolver {
    pub fn new(base_url: &str, store: Arc<dyn JobStore>) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| OracleError::Api(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
            pairs: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(SUPPORTED_PAIRS_CACHE_TTL)
                .build(),
        })
    }

    async fn supported_pair(&self, base: &str, target: &str) -> Result<SupportedPair, OracleError> {
        let key = (base.to_string(), target.to_string());
        if let Some(pair) = self.pairs.get(&key).await {
            return Ok(pair);
        }
        let pair = self
            .store
            .supported_pair(base, target)
            .await?
            .ok_or_else(|| OracleError::Api(format!("pair not supported: {base}/{target}")))?;
        self.pairs.insert(key, pair.clone()).await;
        Ok(pair)
    }

    /// Price of `endpoint` as the API reports it, in whole units.
    #[instrument(skip(self), fields(endpoint = %endpoint))]
    pub async fn resolve(&self, endpoint: &Endpoint) -> Result<String, OracleError> {
        let result = self.fetch_price(endpoint).await;
        if result.is_err() {
            RESOLUTION_FAILURES.with_label_values(&["api"]).inc();
        }
        result
    }

    async fn fetch_price(&self, endpoint: &Endpoint) -> Result<String, OracleError> {
        let suffix = endpoint
            .uri_suffix()
            .ok_or_else(|| OracleError::Api(format!("{endpoint} is not an API endpoint")))?;
        let pair = self.supported_pair(&endpoint.base, &endpoint.target).await?;
        let url = format!("{}/currency/{}/{}", self.base_url, pair.name, suffix);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Api(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OracleError::Api(format!("Failed to get response text: {}", e)))?;
        if status != StatusCode::OK {
            return Err(OracleError::Api(format!("{url} returned {status}: {body}")));
        }

        let parsed: PriceResponse = serde_json::from_str(&body).map_err(|e| {
            OracleError::Api(format!("Failed to parse JSON: {}. Response: {}", e, body))
        })?;
        Ok(match parsed.price {
            RawPrice::Text(text) => text,
            RawPrice::Number(number) => number.to_string(),
        })
    }

    /// Reloads the supported-pairs table from the API.
    #[instrument(skip(self))]
    pub async fn refresh_supported_pairs(&self) -> Result<usize, OracleError> {
        let url = format!("{}/currencies", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| OracleError::Api(e.to_string()))?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(OracleError::Api(format!("{url} returned {status}")));
        }

        let currencies = match response.json::<CurrenciesResponse>().await? {
            CurrenciesResponse::List(list) => list,
            CurrenciesResponse::Wrapped { currencies } => currencies,
        };
        let pairs: Vec<SupportedPair> = currencies
            .into_iter()
            .filter_map(RawCurrency::into_pair)
            .collect();

        self.store.upsert_supported_pairs(&pairs).await?;
        self.pairs.invalidate_all();
        tracing::info!("[API] Refreshed {} supported pairs", pairs.len());
        Ok(pairs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currencies_split_their_name_when_needed() {
        let pair = RawCurrency {
            name: "btc-usd".into(),
            base: None,
            target: None,
        }
        .into_pair()
        .unwrap();
        assert_eq!(pair.base, "BTC");
        assert_eq!(pair.target, "USD");
        assert_eq!(pair.name, "btc-usd");

        assert!(RawCurrency {
            name: "BTCUSD".into(),
            base: None,
            target: None
        }
        .into_pair()
        .is_none());
    }

    #[test]
    fn price_may_be_text_or_number() {
        let text: PriceResponse = serde_json::from_str(r#"{"price":"50000"}"#).unwrap();
        assert!(matches!(text.price, RawPrice::Text(ref p) if p == "50000"));
        let number: PriceResponse = serde_json::from_str(r#"{"price":50000.5}"#).unwrap();
        assert!(matches!(number.price, RawPrice::Number(ref n) if n.to_string() == "50000.5"));
    }
}
