use diesel::result::Error as DieselError;
use diesel_async::pooled_connection::deadpool::PoolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Database error: {0}")]
    Database(#[from] DieselError),

    #[error("Connection pool error: {0}")]
    Connection(#[from] PoolError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("External API error: {0}")]
    Api(String),

    #[error("DEX error: {0}")]
    Dex(String),

    #[error("Data conversion error: {0}")]
    Conversion(String),

    #[error("On-chain RPC error: {0}")]
    Chain(String),

    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Signing error: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        OracleError::Api(e.to_string())
    }
}
