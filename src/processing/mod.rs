pub mod api;
pub mod jobs;

use async_trait::async_trait;

use crate::dex::DexAggregator;
use crate::endpoint::{Endpoint, EndpointKind};
use crate::error::OracleError;
use crate::utils::decimal_to_wei;

pub use api::ApiResolver;
pub use jobs::JobScheduler;

/// Turns a parsed endpoint into the value written on chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceResolver: Send + Sync {
    /// Resolved value in wei, as a decimal string.
    async fn resolve(&self, endpoint: &Endpoint) -> Result<String, OracleError>;
}

/// Dispatches `PR` endpoints to the price API and `AD` endpoints to the DEX aggregator.
pub struct Resolver {
    api: ApiResolver,
    dex: DexAggregator,
}

impl Resolver {
    pub fn new(api: ApiResolver, dex: DexAggregator) -> Self {
        Self { api, dex }
    }
}

#[async_trait]
impl PriceResolver for Resolver {
    async fn resolve(&self, endpoint: &Endpoint) -> Result<String, OracleError> {
        match endpoint.kind {
            EndpointKind::Adhoc { minutes } => {
                self.dex
                    .resolve(&endpoint.base, &endpoint.target, minutes)
                    .await
            }
            EndpointKind::Api { .. } => {
                let price = self.api.resolve(endpoint).await?;
                Ok(decimal_to_wei(&price)?.to_string())
            }
        }
    }
}
