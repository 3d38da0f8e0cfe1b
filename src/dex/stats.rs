//! Outlier rejection and wei averaging for DEX price samples.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::error::OracleError;
use crate::utils::ether_to_wei;

pub const MAX_DMAX: u32 = 4;

pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation.
pub fn std_dev(samples: &[f64], mean: f64) -> f64 {
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    variance.sqrt()
}

/// Samples kept by Chauvenet's criterion and the threshold that kept them.
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub kept: Vec<f64>,
    /// `None` when no threshold kept anything and the raw pool is returned.
    pub d_max: Option<u32>,
}

/// Keeps samples whose z-score is within `d_max`, widening `d_max` from 1 to
/// [`MAX_DMAX`] until something survives.
pub fn chauvenet(samples: &[f64]) -> Filtered {
    if samples.is_empty() {
        return Filtered {
            kept: Vec::new(),
            d_max: None,
        };
    }

    let mu = mean(samples);
    let sigma = std_dev(samples, mu);
    if sigma == 0.0 || !sigma.is_finite() {
        return Filtered {
            kept: samples.to_vec(),
            d_max: Some(1),
        };
    }

    for d_max in 1..=MAX_DMAX {
        let kept: Vec<f64> = samples
            .iter()
            .copied()
            .filter(|x| (x - mu).abs() / sigma <= f64::from(d_max))
            .collect();
        if !kept.is_empty() {
            return Filtered {
                kept,
                d_max: Some(d_max),
            };
        }
    }

    Filtered {
        kept: samples.to_vec(),
        d_max: None,
    }
}

/// Mean of the samples in wei, as a decimal string. Non-positive samples are ignored.
pub fn wei_mean(samples: &[f64]) -> Result<String, OracleError> {
    let mut sum = BigInt::zero();
    let mut count = 0u64;
    for wei in samples.iter().filter_map(|x| ether_to_wei(*x)) {
        if wei.is_positive() {
            sum += wei;
            count += 1;
        }
    }

    if sum.is_zero() {
        return Err(OracleError::Dex(
            "cannot calculate mean, price is zero".to_string(),
        ));
    }
    Ok((sum / BigInt::from(count)).to_string())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn rejects_the_far_outlier_at_first_threshold() {
        let filtered = chauvenet(&[100.0, 101.0, 99.0, 100.0, 1000.0]);
        assert_eq!(filtered.kept, vec![100.0, 101.0, 99.0, 100.0]);
        assert_eq!(filtered.d_max, Some(1));
        assert_eq!(wei_mean(&filtered.kept).unwrap(), "100000000000000000000");
    }

    #[test]
    fn zero_deviation_keeps_everything() {
        let filtered = chauvenet(&[3.5, 3.5, 3.5]);
        assert_eq!(filtered.kept.len(), 3);
    }

    #[test]
    fn two_point_pool_survives_at_first_threshold() {
        // Both samples sit exactly one sigma away.
        let filtered = chauvenet(&[1.0, 3.0]);
        assert_eq!(filtered.kept, vec![1.0, 3.0]);
    }

    #[rstest]
    #[case(&[], "cannot calculate mean")]
    #[case(&[0.0, 0.0], "cannot calculate mean")]
    #[case(&[-1.0], "cannot calculate mean")]
    fn zero_mean_is_an_error(#[case] samples: &[f64], #[case] message: &str) {
        let err = wei_mean(samples).unwrap_err();
        assert!(err.to_string().contains(message));
    }

    #[test]
    fn mean_truncates_integer_division() {
        // (1 wei + 2 wei) / 2
        assert_eq!(wei_mean(&[1e-18, 2e-18]).unwrap(), "1");
        assert_eq!(wei_mean(&[0.5, 0.0, 1.5]).unwrap(), "1000000000000000000");
    }
}
