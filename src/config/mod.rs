//! Configuration for the allocation engine.
//!
//! Loads settings from environment variables and config files, layered over
//! serde defaults.

use anyhow::{Context, Result};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Allocation and margin parameters
    #[serde(default)]
    pub allocation: AllocationConfig,
    /// Short-weight sizing curve parameters
    #[serde(default)]
    pub sizing: SizingConfig,
    /// Annual band recalibration parameters
    #[serde(default)]
    pub recalibration: RecalibrationConfig,
    /// Per-source rebalance cadences
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Total permitted gross exposure scalar before drawdown adjustment
    #[serde(default = "default_base_margin_multiplier")]
    pub base_margin_multiplier: Decimal,
    /// Starting drawdown floor, <= 0. The gain ratchet tightens it toward
    /// zero over the life of a run.
    #[serde(default)]
    pub initial_drawdown: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingConfig {
    /// Lower clamp for the short weight
    #[serde(default = "default_short_weight_floor")]
    pub short_weight_floor: Decimal,
    /// Upper clamp for the short weight
    #[serde(default = "default_short_weight_cap")]
    pub short_weight_cap: Decimal,
    /// Short weight before the first index observation arrives
    #[serde(default = "default_short_weight_cap")]
    pub initial_short_weight: Decimal,
    /// Curve numerator at or above the regime threshold
    #[serde(default = "default_primary_coefficient")]
    pub primary_coefficient: Decimal,
    /// Curve numerator below the regime threshold (calmer markets size
    /// on a gentler curve)
    #[serde(default = "default_secondary_coefficient")]
    pub secondary_coefficient: Decimal,
    /// Scale applied inside the curve's logarithm
    #[serde(default = "default_curve_scale")]
    pub curve_scale: Decimal,
    /// Index of the spot deviation band used as the regime threshold
    /// (2 = the 1-year mean)
    #[serde(default = "default_regime_band_index")]
    pub regime_band_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalibrationConfig {
    /// Reference volatility index symbol
    #[serde(default = "default_index_symbol")]
    pub index_symbol: String,
    /// Trailing daily observations fed into the band computation
    #[serde(default = "default_window")]
    pub window: usize,
    /// Calendar anchor month for the annual trigger
    #[serde(default = "default_anchor_month")]
    pub anchor_month: u32,
    /// Calendar anchor day for the annual trigger
    #[serde(default = "default_anchor_day")]
    pub anchor_day: u32,
    /// Maximum lookback-widening attempts when history under-returns
    #[serde(default = "default_max_widening")]
    pub max_widening: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Rebalance cadence for sources without an override, in hours.
    /// Decouples "how often we re-check" from "how long a signal is valid".
    #[serde(default = "default_rebalance_hours")]
    pub default_rebalance_hours: i64,
    /// Cadence overrides keyed by source id, in hours
    #[serde(default)]
    pub rebalance_hours_overrides: HashMap<String, i64>,
}

impl SourcesConfig {
    /// Resolve the rebalance cadence for a source.
    pub fn cadence_for(&self, source_id: &str) -> Duration {
        let hours = self
            .rebalance_hours_overrides
            .get(source_id)
            .copied()
            .unwrap_or(self.default_rebalance_hours);
        Duration::hours(hours)
    }
}

// Default value functions
fn default_base_margin_multiplier() -> Decimal {
    Decimal::new(133, 2) // 1.33
}

fn default_short_weight_floor() -> Decimal {
    Decimal::new(40, 2) // 0.40
}

fn default_short_weight_cap() -> Decimal {
    Decimal::new(78, 2) // 0.78
}

fn default_primary_coefficient() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_secondary_coefficient() -> Decimal {
    Decimal::new(44, 2) // 0.44
}

fn default_curve_scale() -> Decimal {
    Decimal::new(1225, 3) // 1.225
}

fn default_regime_band_index() -> usize {
    2
}

fn default_index_symbol() -> String {
    "VIX".to_string()
}

fn default_window() -> usize {
    4000
}

fn default_anchor_month() -> u32 {
    1
}

fn default_anchor_day() -> u32 {
    3
}

fn default_max_widening() -> usize {
    64
}

fn default_rebalance_hours() -> i64 {
    48 // twice the daily resolution of most sources
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("VOL"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.allocation.base_margin_multiplier > Decimal::ZERO,
            "base_margin_multiplier must be positive"
        );

        anyhow::ensure!(
            self.allocation.initial_drawdown <= Decimal::ZERO,
            "initial_drawdown must be zero or negative"
        );

        anyhow::ensure!(
            Decimal::ZERO < self.sizing.short_weight_floor
                && self.sizing.short_weight_floor <= self.sizing.short_weight_cap,
            "short weight clamps must satisfy 0 < floor <= cap"
        );

        anyhow::ensure!(
            self.recalibration.window >= 2,
            "recalibration window must hold at least two observations"
        );

        anyhow::ensure!(
            (1..=12).contains(&self.recalibration.anchor_month)
                && (1..=31).contains(&self.recalibration.anchor_day),
            "recalibration anchor must be a valid calendar date"
        );

        anyhow::ensure!(
            self.sources.default_rebalance_hours > 0
                && self
                    .sources
                    .rebalance_hours_overrides
                    .values()
                    .all(|h| *h > 0),
            "rebalance cadences must be positive"
        );

        Ok(())
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            base_margin_multiplier: default_base_margin_multiplier(),
            initial_drawdown: Decimal::ZERO,
        }
    }
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            short_weight_floor: default_short_weight_floor(),
            short_weight_cap: default_short_weight_cap(),
            initial_short_weight: default_short_weight_cap(),
            primary_coefficient: default_primary_coefficient(),
            secondary_coefficient: default_secondary_coefficient(),
            curve_scale: default_curve_scale(),
            regime_band_index: default_regime_band_index(),
        }
    }
}

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            index_symbol: default_index_symbol(),
            window: default_window(),
            anchor_month: default_anchor_month(),
            anchor_day: default_anchor_day(),
            max_widening: default_max_widening(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            default_rebalance_hours: default_rebalance_hours(),
            rebalance_hours_overrides: HashMap::new(),
        }
    }
}
