//! Fee resolution for candidate specs

use super::FeeSpec;
use crate::error::{Error, Result};
use crate::indexer::RecommendedFees;
use crate::monitor::ConflictConfig;

/// Observed rate scaled by the multiplier, capped at the configured maximum
pub fn smart_rate(observed_sat_per_vb: f64, policy: &ConflictConfig) -> f64 {
    (observed_sat_per_vb * policy.smart_fee_multiplier).min(policy.max_fee_rate_sat_vb)
}

fn rate_fee(sat_per_vb: f64, policy: &ConflictConfig) -> Result<u64> {
    if !sat_per_vb.is_finite() || sat_per_vb <= 0.0 {
        return Err(Error::validation(format!("fee rate {} must be positive", sat_per_vb)));
    }
    Ok((policy.size_estimate_vbytes as f64 * sat_per_vb).ceil() as u64)
}

/// Absolute fee in sat for `spec`. Zero fees and fees at or above the
/// sanity ceiling are validation errors.
pub fn resolve_fee(spec: &FeeSpec, policy: &ConflictConfig) -> Result<u64> {
    let fee = match spec {
        FeeSpec::Flat { sat } => *sat,
        FeeSpec::Rate { sat_per_vb, flat_sat } => rate_fee(*sat_per_vb, policy)?.max(*flat_sat),
        FeeSpec::Smart { observed_sat_per_vb } => {
            if !observed_sat_per_vb.is_finite() || *observed_sat_per_vb <= 0.0 {
                return Err(Error::validation(format!("observed fee rate {} must be positive", observed_sat_per_vb)));
            }
            rate_fee(smart_rate(*observed_sat_per_vb, policy), policy)?
        }
    };

    if fee == 0 {
        return Err(Error::validation("fee must be positive"));
    }
    if fee >= policy.max_fee_sat {
        return Err(Error::validation(format!("fee {} sat reaches the {} sat ceiling", fee, policy.max_fee_sat)));
    }
    Ok(fee)
}

impl FeeSpec {
    /// Smart spec from the indexer's half-hour estimate
    pub fn smart_from(fees: &RecommendedFees) -> Self {
        FeeSpec::Smart { observed_sat_per_vb: fees.half_hour_fee }
    }
}
