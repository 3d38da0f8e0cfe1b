use std::fmt::Display;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use tokio::task::JoinError;

use crate::constants::{DB_RETRY_ATTEMPTS, DB_RETRY_DELAY, WEI_DECIMALS};
use crate::error::OracleError;

/// Process or output the results of tokio tasks
pub(crate) fn log_tasks_results<T, E: Display>(
    category: &str,
    results: Vec<Result<Result<T, E>, JoinError>>,
) {
    for result in &results {
        match result {
            Ok(data) => match data {
                Ok(_) => tracing::debug!("[{category}]: Task finished successfully"),
                Err(e) => tracing::error!("[{category}]: Task failed with error: {e}"),
            },
            Err(e) => tracing::error!("[{category}]: Task failed with error: {:?}", e),
        }
    }
}

/// Exponential backoff `base * 2^attempt`, saturating at `cap`.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}

/// Runs a database operation, retrying transient failures.
pub(crate) async fn retry_db<T, F, Fut>(what: &str, mut op: F) -> Result<T, OracleError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OracleError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < DB_RETRY_ATTEMPTS => {
                tracing::warn!(
                    "[DB] {what} failed (attempt {attempt}/{DB_RETRY_ATTEMPTS}): {e}. Retrying..."
                );
                tokio::time::sleep(DB_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Scales a decimal string by 10^18, truncating any digits past the 18th decimal.
pub fn decimal_to_wei(value: &str) -> Result<BigInt, OracleError> {
    let decimal = BigDecimal::from_str(value.trim())
        .map_err(|e| OracleError::Conversion(format!("{value:?} is not a decimal: {e}")))?;
    let (wei, _) = (decimal * BigDecimal::new(BigInt::from(1), -WEI_DECIMALS))
        .with_scale(0)
        .into_bigint_and_exponent();
    Ok(wei)
}

/// Wei value of an `f64` ether amount, going through its shortest decimal form.
pub fn ether_to_wei(value: f64) -> Option<BigInt> {
    if !value.is_finite() {
        return None;
    }
    decimal_to_wei(&value.to_string()).ok()
}

/// `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", alloy::hex::encode(bytes))
}
