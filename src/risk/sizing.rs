//! Volatility-indexed short-weight sizing curve.

use crate::config::SizingConfig;
use crate::stats::DeviationBands;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;

/// Domain failures of the sizing curve. Callers retain the previous short
/// weight on any of these; sizing degrades, it never halts the pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum SizingError {
    #[error("volatility index level {0} is not a positive finite number")]
    NonPositiveIndex(Decimal),
    #[error("sizing curve log argument is non-positive at index level {0}")]
    LogDomain(Decimal),
    #[error("sizing curve is degenerate at index level {0}")]
    DegenerateCurve(Decimal),
}

/// Compute the short-weight scalar for the given index close.
///
/// The curve is `|-k / ln(c·atan(sqrt(v) / 10))|`, clamped into
/// `[floor, cap]`. Between the clamps it is monotone in `v` and smooth, so
/// small index moves never jump the position size: calm index levels sit on
/// the floor, elevated levels ride up to the cap. Below the regime
/// threshold (the spot band at
/// `regime_band_index`) the gentler secondary coefficient applies; at or
/// above it the primary coefficient does. An empty band set is treated as
/// the elevated regime.
pub fn short_weight(
    index_close: Decimal,
    bands: &DeviationBands,
    config: &SizingConfig,
) -> Result<Decimal, SizingError> {
    let v = index_close
        .to_f64()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or(SizingError::NonPositiveIndex(index_close))?;

    let elevated = bands
        .regime_threshold(config.regime_band_index)
        .map_or(true, |threshold| index_close >= threshold);
    let coefficient = if elevated {
        config.primary_coefficient
    } else {
        config.secondary_coefficient
    };
    let k = coefficient
        .to_f64()
        .ok_or(SizingError::DegenerateCurve(index_close))?;
    let scale = config
        .curve_scale
        .to_f64()
        .ok_or(SizingError::DegenerateCurve(index_close))?;

    let log_argument = scale * (v.sqrt() / 10.0).atan();
    if log_argument <= 0.0 {
        return Err(SizingError::LogDomain(index_close));
    }

    let denominator = log_argument.ln();
    if denominator == 0.0 {
        return Err(SizingError::DegenerateCurve(index_close));
    }

    let weight = Decimal::from_f64((-k / denominator).abs())
        .ok_or(SizingError::DegenerateCurve(index_close))?
        .round_dp(3);

    Ok(weight.clamp(config.short_weight_floor, config.short_weight_cap))
}
