//! Historical market-data access.
//!
//! The engine never talks to a venue directly; it asks a [`HistoryProvider`]
//! for trailing closes. Venues sometimes under-return around holidays or
//! thin sessions, so [`ensure_closes`] widens the requested lookback until
//! the demanded length is met, bounded by a maximum number of attempts.

use crate::error::EngineError;
use rust_decimal::Decimal;
use std::fmt;
use tracing::debug;

/// Bar resolution for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Hourly,
    Daily,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Hourly => write!(f, "hourly"),
            Resolution::Daily => write!(f, "daily"),
        }
    }
}

/// Source of historical closing values, implemented by the (external)
/// market-data collaborator.
#[cfg_attr(test, mockall::automock)]
pub trait HistoryProvider {
    /// Trailing closes for `symbol`, oldest first. May return fewer than
    /// `lookback` bars when the venue has gaps.
    fn closes(
        &self,
        symbol: &str,
        lookback: usize,
        resolution: Resolution,
    ) -> anyhow::Result<Vec<Decimal>>;
}

/// Fetch exactly `length` trailing closes, widening the lookback one bar at
/// a time when the provider under-returns.
///
/// Fails with [`EngineError::InsufficientHistory`] once `max_widening`
/// attempts are exhausted.
pub fn ensure_closes<H: HistoryProvider + ?Sized>(
    provider: &H,
    symbol: &str,
    length: usize,
    resolution: Resolution,
    max_widening: usize,
) -> Result<Vec<Decimal>, EngineError> {
    let mut lookback = length;

    for attempt in 0..=max_widening {
        let closes = provider
            .closes(symbol, lookback, resolution)
            .map_err(EngineError::History)?;

        if closes.len() >= length {
            if attempt > 0 {
                debug!(
                    symbol,
                    length,
                    widened_to = lookback,
                    "history satisfied after widening lookback"
                );
            }
            let start = closes.len() - length;
            return Ok(closes[start..].to_vec());
        }

        lookback += 1;
    }

    Err(EngineError::InsufficientHistory {
        symbol: symbol.to_string(),
        requested: length,
        widened_to: lookback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_exact_return_passes_through() {
        let mut provider = MockHistoryProvider::new();
        provider
            .expect_closes()
            .returning(|_, lookback, _| Ok(vec![dec!(20); lookback]));

        let closes = ensure_closes(&provider, "VIX", 5, Resolution::Daily, 3).unwrap();
        assert_eq!(closes.len(), 5);
    }

    #[test]
    fn test_under_return_widens_until_satisfied() {
        let mut provider = MockHistoryProvider::new();
        // The venue is short two bars regardless of the request, so the
        // demanded 5 arrive once the lookback reaches 7.
        provider
            .expect_closes()
            .returning(|_, lookback, _| Ok(vec![dec!(20); lookback.saturating_sub(2)]));

        let closes = ensure_closes(&provider, "VIX", 5, Resolution::Daily, 10).unwrap();
        assert_eq!(closes.len(), 5);
    }

    #[test]
    fn test_over_return_truncates_to_most_recent() {
        let mut provider = MockHistoryProvider::new();
        provider
            .expect_closes()
            .returning(|_, _, _| Ok((1..=10).map(Decimal::from).collect()));

        let closes = ensure_closes(&provider, "VIX", 3, Resolution::Daily, 0).unwrap();
        assert_eq!(closes, vec![dec!(8), dec!(9), dec!(10)]);
    }

    #[test]
    fn test_widening_bound_produces_typed_failure() {
        let mut provider = MockHistoryProvider::new();
        provider.expect_closes().returning(|_, _, _| Ok(Vec::new()));

        let err = ensure_closes(&provider, "VIX", 5, Resolution::Daily, 3).unwrap_err();
        match err {
            EngineError::InsufficientHistory {
                symbol,
                requested,
                widened_to,
            } => {
                assert_eq!(symbol, "VIX");
                assert_eq!(requested, 5);
                assert_eq!(widened_to, 9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_provider_error_is_propagated() {
        let mut provider = MockHistoryProvider::new();
        provider
            .expect_closes()
            .returning(|_, _, _| Err(anyhow::anyhow!("venue unavailable")));

        let err = ensure_closes(&provider, "VIX", 5, Resolution::Daily, 3).unwrap_err();
        assert!(matches!(err, EngineError::History(_)));
    }
}
