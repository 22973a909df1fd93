//! Core signal and target types.
//!
//! Strategy sources emit time-bounded directional [`Signal`]s; the
//! allocation layer turns the live signal set into [`Target`] percentages.

mod ledger;

pub use ledger::SignalLedger;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional opinion carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Desire a long position.
    Up,
    /// Desire a short position.
    Down,
    /// Explicitly desire no position ("I want flat", not "no opinion").
    Flat,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "Up"),
            Direction::Down => write!(f, "Down"),
            Direction::Flat => write!(f, "Flat"),
        }
    }
}

/// Composite signal identity: `(source_id, instrument_id, generated_at)`.
///
/// Used as an ordered-map key wherever signals need to be looked up, so
/// correctness never rests on reference identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalId {
    pub source_id: String,
    pub instrument_id: String,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.source_id, self.instrument_id, self.generated_at
        )
    }
}

/// A source's time-bounded directional opinion on one instrument.
///
/// Immutable once created. A source may emit multiple signals for the same
/// instrument over time; only the most recently generated active one counts
/// for target generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Identifier of the emitting strategy source.
    pub source_id: String,
    /// Instrument the opinion applies to.
    pub instrument_id: String,
    /// Trade direction.
    pub direction: Direction,
    /// Emission timestamp.
    pub generated_at: DateTime<Utc>,
    /// Expiry timestamp; the signal is dead once the clock reaches it.
    pub expires_at: DateTime<Utc>,
    /// Optional source-supplied sizing hint. Carried for audit; the
    /// equal-weight policy does not consume it.
    pub weight_hint: Option<Decimal>,
}

impl Signal {
    /// Create a signal with no weight hint.
    pub fn new(
        source_id: impl Into<String>,
        instrument_id: impl Into<String>,
        direction: Direction,
        generated_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            instrument_id: instrument_id.into(),
            direction,
            generated_at,
            expires_at,
            weight_hint: None,
        }
    }

    /// Composite identity key for this signal.
    pub fn id(&self) -> SignalId {
        SignalId {
            source_id: self.source_id.clone(),
            instrument_id: self.instrument_id.clone(),
            generated_at: self.generated_at,
        }
    }

    /// Whether the signal has not yet expired at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Requested portfolio allocation percentage for one instrument.
///
/// Pure value object: not persisted, recomputed every compile cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub instrument_id: String,
    /// Fraction of equity, signed (negative = short). 0 means flatten.
    pub target_percent: Decimal,
}

impl Target {
    pub fn new(instrument_id: impl Into<String>, target_percent: Decimal) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            target_percent,
        }
    }

    /// A flatten request: close any position in the instrument.
    pub fn flatten(instrument_id: impl Into<String>) -> Self {
        Self::new(instrument_id, Decimal::ZERO)
    }
}
