//! Weight assignment and per-cycle target compilation.

use crate::config::SourcesConfig;
use crate::risk::RiskState;
use crate::signal::{Direction, Signal, SignalId, SignalLedger, Target};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Turns the live signal set into portfolio allocation targets.
///
/// One ledger per source, created lazily the first time a source id is
/// observed. Weights are recomputed from scratch every cycle from the
/// current risk state, so a regime or drawdown change re-sizes every open
/// decision on the next compilation.
pub struct AllocationCompiler {
    sources: SourcesConfig,
    ledgers: BTreeMap<String, SignalLedger>,
    /// Cross-source signal collection, pruned of expired entries each cycle.
    signals: Vec<Signal>,
    /// Instruments dropped from the universe since the last compile.
    /// Consumed exactly once.
    removed_instruments: Vec<String>,
}

impl AllocationCompiler {
    pub fn new(sources: SourcesConfig) -> Self {
        Self {
            sources,
            ledgers: BTreeMap::new(),
            signals: Vec::new(),
            removed_instruments: Vec::new(),
        }
    }

    pub fn ledger(&self, source_id: &str) -> Option<&SignalLedger> {
        self.ledgers.get(source_id)
    }

    /// Record a universe deselection. The instruments' signals are dropped
    /// from every ledger without error; the next compiled list carries
    /// exactly one flatten target per instrument.
    pub fn on_universe_change(&mut self, removed: Vec<String>) {
        if removed.is_empty() {
            return;
        }
        info!(instruments = ?removed, "instruments left the tracked universe");
        for ledger in self.ledgers.values_mut() {
            ledger.discard_instruments(&removed);
        }
        self.signals
            .retain(|s| !removed.contains(&s.instrument_id));
        for instrument in removed {
            if !self.removed_instruments.contains(&instrument) {
                self.removed_instruments.push(instrument);
            }
        }
    }

    /// Assign a weight to every currently-active signal.
    ///
    /// Only the globally latest active signal per instrument receives an
    /// entry; superseded signals miss the map and are skipped downstream.
    /// Long exposure is the margin multiplier split equally across all
    /// non-Flat decisions; short exposure is the volatility-indexed short
    /// weight under the same split.
    pub fn determine_weights(
        &self,
        now: DateTime<Utc>,
        risk: &RiskState,
    ) -> BTreeMap<SignalId, Decimal> {
        let mut last_active: BTreeMap<&str, &Signal> = BTreeMap::new();
        for signal in self.signals.iter().filter(|s| s.is_active(now)) {
            let entry = last_active
                .entry(signal.instrument_id.as_str())
                .or_insert(signal);
            if signal.generated_at >= entry.generated_at {
                *entry = signal;
            }
        }

        let count = last_active
            .values()
            .filter(|s| s.direction != Direction::Flat)
            .count();
        let base_percent = if count == 0 {
            Decimal::ZERO
        } else {
            risk.margin_multiplier() / Decimal::from(count)
        };

        let mut weights = BTreeMap::new();
        for signal in last_active.values() {
            let weight = match signal.direction {
                Direction::Up => base_percent,
                Direction::Down => -(risk.short_weight() / Decimal::from(count)),
                Direction::Flat => Decimal::ZERO,
            };
            weights.insert(signal.id(), weight);
        }

        debug!(
            active = self.signals.len(),
            sized = weights.len(),
            non_flat = count,
            margin_multiplier = %risk.margin_multiplier(),
            short_weight = %risk.short_weight(),
            "assigned cycle weights"
        );
        weights
    }

    /// Run one compilation cycle.
    ///
    /// Weights are determined first, then every ledger generates its
    /// targets against that snapshot, then universe-removal flattens are
    /// appended and expired signals pruned. Instruments with no active
    /// signal and no removal receive no target at all; silence is not a
    /// command to flatten.
    pub fn compile(
        &mut self,
        now: DateTime<Utc>,
        new_signals: &[Signal],
        risk: &RiskState,
    ) -> Vec<Target> {
        for signal in new_signals {
            self.ledgers
                .entry(signal.source_id.clone())
                .or_insert_with(|| {
                    debug!(source = %signal.source_id, "opening ledger for new source");
                    SignalLedger::new(
                        signal.source_id.clone(),
                        self.sources.cadence_for(&signal.source_id),
                    )
                });
            self.signals.push(signal.clone());
        }

        let weights = self.determine_weights(now, risk);

        let mut targets = Vec::new();
        for ledger in self.ledgers.values_mut() {
            targets.extend(ledger.create_targets(
                now,
                new_signals,
                &weights,
                &self.removed_instruments,
            ));
        }

        // One target per instrument per list, and a weighted target outranks
        // a flatten on collision: one source's expiry flatten must not erase
        // another source's live position. At most one weighted target can
        // exist per instrument because only the globally latest signal
        // resolves a weight; remaining collisions are duplicate flattens,
        // dropped after the first.
        let mut seen: HashSet<String> = targets
            .iter()
            .filter(|t| t.target_percent != Decimal::ZERO)
            .map(|t| t.instrument_id.clone())
            .collect();
        targets.retain(|t| {
            t.target_percent != Decimal::ZERO || seen.insert(t.instrument_id.clone())
        });

        for instrument in self.removed_instruments.drain(..) {
            if !seen.contains(&instrument) {
                targets.push(Target::flatten(instrument));
            }
        }

        self.signals.retain(|s| s.is_active(now));

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AllocationConfig, SizingConfig};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    // Hour-scale ticks with an hourly rebalance cadence, so cadence and
    // expiry interact within a short scenario.
    fn t(hours: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(hours * 3600, 0).unwrap()
    }

    fn risk() -> RiskState {
        // Base margin multiplier 1.3 to match the documented scenario.
        let allocation = AllocationConfig {
            base_margin_multiplier: dec!(1.3),
            ..AllocationConfig::default()
        };
        RiskState::new(&allocation, &SizingConfig::default(), dec!(1_000_000))
    }

    fn compiler() -> AllocationCompiler {
        AllocationCompiler::new(SourcesConfig {
            default_rebalance_hours: 1,
            ..SourcesConfig::default()
        })
    }

    fn signal(source: &str, instrument: &str, direction: Direction, gen: i64, exp: i64) -> Signal {
        Signal::new(source, instrument, direction, t(gen), t(exp))
    }

    fn target_for<'a>(targets: &'a [Target], instrument: &str) -> &'a Target {
        targets
            .iter()
            .find(|t| t.instrument_id == instrument)
            .unwrap_or_else(|| panic!("no target for {instrument}"))
    }

    #[test]
    fn test_documented_two_source_scenario() {
        // Source A: Up on X expiring at t=10. Source B: Up on Y expiring at
        // t=5. Margin multiplier 1.3.
        let mut compiler = compiler();
        let risk = risk();
        let a = signal("A", "X", Direction::Up, 0, 10);
        let b = signal("B", "Y", Direction::Up, 0, 5);

        let targets = compiler.compile(t(1), &[a, b], &risk);
        assert_eq!(targets.len(), 2);
        assert_eq!(target_for(&targets, "X").target_percent, dec!(0.65));
        assert_eq!(target_for(&targets, "Y").target_percent, dec!(0.65));

        // At t=6 Y has expired: X re-sizes to the full multiplier and Y is
        // flattened.
        let targets = compiler.compile(t(6), &[], &risk);
        assert_eq!(targets.len(), 2);
        assert_eq!(target_for(&targets, "X").target_percent, dec!(1.3));
        assert_eq!(target_for(&targets, "Y").target_percent, Decimal::ZERO);
    }

    #[test]
    fn test_up_weights_sum_to_margin_multiplier() {
        let mut compiler = compiler();
        let risk = risk();
        let signals: Vec<Signal> = (0..4)
            .map(|i| signal("A", &format!("I{i}"), Direction::Up, 0, 100))
            .collect();

        let targets = compiler.compile(t(1), &signals, &risk);

        let gross: Decimal = targets.iter().map(|t| t.target_percent).sum();
        assert_eq!(gross, dec!(1.3));
    }

    #[test]
    fn test_down_weight_is_short_weight_split() {
        let mut compiler = compiler();
        let mut risk = risk();
        risk.set_short_weight(dec!(0.78));

        let up = signal("A", "TQQQ", Direction::Up, 0, 100);
        let down = signal("A", "UVXY", Direction::Down, 0, 100);
        let targets = compiler.compile(t(1), &[up, down], &risk);

        assert_eq!(target_for(&targets, "TQQQ").target_percent, dec!(0.65));
        assert_eq!(target_for(&targets, "UVXY").target_percent, dec!(-0.39));
    }

    #[test]
    fn test_flat_signal_flattens_without_weight() {
        let mut compiler = compiler();
        let risk = risk();

        let flat = signal("A", "SPXL", Direction::Flat, 0, 100);
        let targets = compiler.compile(t(1), &[flat], &risk);

        assert_eq!(targets, vec![Target::flatten("SPXL")]);
    }

    #[test]
    fn test_global_supersession_across_sources() {
        // Two sources disagree on the same instrument; only the latest
        // generated signal gets sized, the other source's ledger flags an
        // error and emits nothing.
        let mut compiler = compiler();
        let risk = risk();
        let older = signal("A", "UVXY", Direction::Up, 0, 100);
        let newer = signal("B", "UVXY", Direction::Down, 10, 100);

        let targets = compiler.compile(t(20), &[older, newer], &risk);

        assert_eq!(targets.len(), 1);
        assert!(targets[0].target_percent < Decimal::ZERO);
        assert!(compiler
            .ledger("A")
            .unwrap()
            .error_instruments()
            .contains("UVXY"));
    }

    #[test]
    fn test_idempotent_no_op_within_tick() {
        let mut compiler = compiler();
        let risk = risk();
        let s = signal("A", "X", Direction::Up, 0, 100);

        let first = compiler.compile(t(1), &[s], &risk);
        assert_eq!(first.len(), 1);

        let second = compiler.compile(t(1), &[], &risk);
        assert!(second.is_empty());
    }

    #[test]
    fn test_flatten_on_removal_exactly_once() {
        let mut compiler = compiler();
        let risk = risk();
        let s = signal("A", "SQQQ", Direction::Up, 0, 100);
        compiler.compile(t(1), &[s], &risk);

        compiler.on_universe_change(vec!["SQQQ".to_string()]);
        let targets = compiler.compile(t(2), &[], &risk);

        let flattens: Vec<_> = targets
            .iter()
            .filter(|t| t.instrument_id == "SQQQ")
            .collect();
        assert_eq!(flattens.len(), 1);
        assert_eq!(flattens[0].target_percent, Decimal::ZERO);

        // The removal list is consumed: the next cycle is silent again.
        let targets = compiler.compile(t(3), &[], &risk);
        assert!(targets.is_empty());
    }

    #[test]
    fn test_removal_without_signals_still_flattens() {
        let mut compiler = compiler();
        let risk = risk();

        compiler.on_universe_change(vec!["GHOST".to_string()]);
        let targets = compiler.compile(t(1), &[], &risk);

        assert_eq!(targets, vec![Target::flatten("GHOST")]);
    }

    #[test]
    fn test_no_orphan_targets() {
        let mut compiler = compiler();
        let risk = risk();
        let s = signal("A", "X", Direction::Up, 0, 10);
        compiler.compile(t(1), &[s], &risk);

        // X expires: one flatten, then silence forever after.
        let targets = compiler.compile(t(11), &[], &risk);
        assert_eq!(targets, vec![Target::flatten("X")]);

        let targets = compiler.compile(t(50), &[], &risk);
        assert!(targets.is_empty());
    }

    #[test]
    fn test_no_duplicate_instruments_in_compiled_list() {
        let mut compiler = compiler();
        let risk = risk();
        let a = signal("A", "UVXY", Direction::Down, 0, 10);
        let b = signal("B", "UVXY", Direction::Down, 1, 12);
        compiler.compile(t(2), &[a, b], &risk);

        // Both sources' signals for the instrument expire together.
        let targets = compiler.compile(t(20), &[], &risk);

        let count = targets
            .iter()
            .filter(|t| t.instrument_id == "UVXY")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_expiry_flatten_yields_to_live_target_from_another_source() {
        // Source A's signal on X expires in the same cycle that source B
        // emits a live one. The live weighted target must win the merge
        // regardless of which source id sorts first.
        let mut compiler = compiler();
        let risk = risk();
        let a = signal("A", "X", Direction::Up, 0, 5);
        compiler.compile(t(1), &[a], &risk);

        let b = signal("B", "X", Direction::Up, 6, 20);
        let targets = compiler.compile(t(6), &[b], &risk);

        assert_eq!(targets.len(), 1);
        assert_eq!(target_for(&targets, "X").target_percent, dec!(1.3));
    }

    #[test]
    fn test_weights_track_risk_state_between_cycles() {
        let mut compiler = compiler();
        let mut risk = risk();
        risk.set_short_weight(dec!(0.78));

        let s = signal("A", "UVXY", Direction::Down, 0, 1000);
        let targets = compiler.compile(t(0), &[s.clone()], &risk);
        assert_eq!(target_for(&targets, "UVXY").target_percent, dec!(-0.78));

        // The volatility regime shifts; the same open decision re-sizes on
        // the next non-fast-path cycle.
        risk.set_short_weight(dec!(0.40));
        let next_rebalance = compiler.ledger("A").unwrap().next_rebalance().unwrap();
        let targets = compiler.compile(next_rebalance, &[], &risk);
        assert_eq!(target_for(&targets, "UVXY").target_percent, dec!(-0.40));
    }
}
