//! Per-source signal bookkeeping and target generation.

use super::{Direction, Signal, SignalId, Target};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Tracks the not-yet-expired signals of one strategy source and converts
/// them into allocation targets on its own rebalance cadence.
///
/// A ledger never produces a non-flatten target for an instrument without a
/// resolved weight; such instruments land in a per-cycle error set and are
/// skipped, leaving their last known target untouched.
pub struct SignalLedger {
    source_id: String,
    /// Arrival-ordered. May hold several signals for one instrument; the
    /// latest `generated_at` supersedes the rest for target generation while
    /// the older ones stay until expiry as audit history.
    signals: Vec<Signal>,
    /// Minimum `expires_at` among held signals; `None` = never.
    next_expiry: Option<DateTime<Utc>>,
    /// `None` until the first generation pass schedules one.
    next_rebalance: Option<DateTime<Utc>>,
    cadence: Duration,
    /// Instruments whose weight could not be resolved this cycle.
    error_instruments: HashSet<String>,
}

impl SignalLedger {
    /// Create an empty ledger for `source_id` with the given rebalance cadence.
    pub fn new(source_id: impl Into<String>, cadence: Duration) -> Self {
        Self {
            source_id: source_id.into(),
            signals: Vec::new(),
            next_expiry: None,
            next_rebalance: None,
            cadence,
            error_instruments: HashSet::new(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn next_expiry(&self) -> Option<DateTime<Utc>> {
        self.next_expiry
    }

    pub fn next_rebalance(&self) -> Option<DateTime<Utc>> {
        self.next_rebalance
    }

    /// Instruments skipped in the most recent generation pass.
    pub fn error_instruments(&self) -> &HashSet<String> {
        &self.error_instruments
    }

    /// Append a signal to the active set. Identity aside, no validation:
    /// signal quality is the emitting source's responsibility.
    pub fn admit(&mut self, signal: Signal) {
        debug_assert_eq!(signal.source_id, self.source_id);
        self.next_expiry = Some(match self.next_expiry {
            Some(t) => t.min(signal.expires_at),
            None => signal.expires_at,
        });
        self.signals.push(signal);
    }

    /// Drop every signal for the given instruments, without error. Used when
    /// instruments leave the tracked universe.
    pub fn discard_instruments(&mut self, instruments: &[String]) {
        let before = self.signals.len();
        self.signals
            .retain(|s| !instruments.contains(&s.instrument_id));
        if self.signals.len() != before {
            debug!(
                source = %self.source_id,
                dropped = before - self.signals.len(),
                "discarded signals for deselected instruments"
            );
            self.next_expiry = self.signals.iter().map(|s| s.expires_at).min();
        }
    }

    fn has_active(&self, instrument_id: &str, now: DateTime<Utc>) -> bool {
        self.signals
            .iter()
            .any(|s| s.instrument_id == instrument_id && s.is_active(now))
    }

    /// Generate this source's targets for the current cycle.
    ///
    /// `incoming` is the batch of signals that arrived this tick (all
    /// sources; the ledger admits only its own). `weights` is the per-cycle
    /// signal-to-weight map computed by the allocation compiler. `removed`
    /// lists instruments deselected from the universe since the last cycle.
    pub fn create_targets(
        &mut self,
        now: DateTime<Utc>,
        incoming: &[Signal],
        weights: &BTreeMap<SignalId, Decimal>,
        removed: &[String],
    ) -> Vec<Target> {
        let expiry_due = self.next_expiry.is_some_and(|t| now >= t);
        let rebalance_due = self.next_rebalance.map_or(true, |t| now >= t);

        // Fast path: nothing expired, no rebalance due, nothing arrived
        // anywhere this cycle and the universe is unchanged. A signal from
        // any source changes the weight split, so arrivals disable it even
        // for other sources' ledgers.
        if !expiry_due && !rebalance_due && incoming.is_empty() && removed.is_empty() {
            return Vec::new();
        }

        for signal in incoming {
            if signal.source_id == self.source_id {
                self.admit(signal.clone());
            }
        }

        let mut targets = Vec::new();

        // Partition out expired signals and flatten every instrument whose
        // signals all just ran out, unless it was error-flagged.
        let held = std::mem::take(&mut self.signals);
        let (active, expired): (Vec<Signal>, Vec<Signal>) =
            held.into_iter().partition(|s| s.is_active(now));
        self.signals = active;

        let mut seen_expired: HashSet<&str> = HashSet::new();
        for signal in &expired {
            if seen_expired.insert(signal.instrument_id.as_str())
                && !self.has_active(&signal.instrument_id, now)
                && !self.error_instruments.contains(&signal.instrument_id)
            {
                debug!(
                    source = %self.source_id,
                    instrument = %signal.instrument_id,
                    "all signals expired, flattening"
                );
                targets.push(Target::flatten(&signal.instrument_id));
            }
        }

        // Latest generated signal per instrument is the only one eligible to
        // produce a non-flatten target this cycle.
        let mut last_active: BTreeMap<&str, &Signal> = BTreeMap::new();
        for signal in &self.signals {
            let entry = last_active
                .entry(signal.instrument_id.as_str())
                .or_insert(signal);
            if signal.generated_at >= entry.generated_at {
                *entry = signal;
            }
        }

        self.error_instruments.clear();
        for signal in last_active.values() {
            if signal.direction == Direction::Flat {
                // Flat is an explicit "no position", independent of weights.
                targets.push(Target::flatten(&signal.instrument_id));
                continue;
            }
            match weights.get(&signal.id()) {
                Some(weight) => {
                    targets.push(Target::new(&signal.instrument_id, *weight));
                }
                None => {
                    warn!(
                        source = %self.source_id,
                        instrument = %signal.instrument_id,
                        generated_at = %signal.generated_at,
                        "no weight resolved for signal, skipping instrument this cycle"
                    );
                    self.error_instruments
                        .insert(signal.instrument_id.clone());
                }
            }
        }

        self.next_expiry = self.signals.iter().map(|s| s.expires_at).min();
        if rebalance_due {
            self.next_rebalance = Some(now + self.cadence);
        }

        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn ledger() -> SignalLedger {
        SignalLedger::new("alpha", Duration::hours(48))
    }

    fn signal(instrument: &str, direction: Direction, gen: i64, exp: i64) -> Signal {
        Signal::new("alpha", instrument, direction, t(gen), t(exp))
    }

    fn weights_for(signals: &[&Signal], weight: Decimal) -> BTreeMap<SignalId, Decimal> {
        signals.iter().map(|s| (s.id(), weight)).collect()
    }

    #[test]
    fn test_admit_tracks_next_expiry() {
        let mut ledger = ledger();
        assert_eq!(ledger.next_expiry(), None);

        ledger.admit(signal("UVXY", Direction::Down, 0, 100));
        assert_eq!(ledger.next_expiry(), Some(t(100)));

        ledger.admit(signal("TQQQ", Direction::Up, 0, 50));
        assert_eq!(ledger.next_expiry(), Some(t(50)));
    }

    #[test]
    fn test_create_targets_resolves_weights() {
        let mut ledger = ledger();
        let s = signal("UVXY", Direction::Down, 0, 100);
        let weights = weights_for(&[&s], dec!(-0.78));

        let targets = ledger.create_targets(t(1), &[s.clone()], &weights, &[]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].instrument_id, "UVXY");
        assert_eq!(targets[0].target_percent, dec!(-0.78));
    }

    #[test]
    fn test_unresolved_weight_is_skipped_and_flagged() {
        let mut ledger = ledger();
        let s = signal("UVXY", Direction::Down, 0, 100);

        let targets = ledger.create_targets(t(1), &[s], &BTreeMap::new(), &[]);

        assert!(targets.is_empty());
        assert!(ledger.error_instruments().contains("UVXY"));
    }

    #[test]
    fn test_flat_direction_bypasses_weight_map() {
        let mut ledger = ledger();
        let s = signal("TQQQ", Direction::Flat, 0, 100);

        // No weight entry at all, yet a flatten target comes out.
        let targets = ledger.create_targets(t(1), &[s], &BTreeMap::new(), &[]);

        assert_eq!(targets, vec![Target::flatten("TQQQ")]);
        assert!(ledger.error_instruments().is_empty());
    }

    #[test]
    fn test_expired_signals_produce_flatten_targets() {
        let mut ledger = ledger();
        let s = signal("UVXY", Direction::Down, 0, 10);
        let weights = weights_for(&[&s], dec!(-0.5));
        ledger.create_targets(t(1), &[s], &weights, &[]);

        // Past expiry, no new signals: a single flatten for the instrument.
        let targets = ledger.create_targets(t(20), &[], &BTreeMap::new(), &[]);

        assert_eq!(targets, vec![Target::flatten("UVXY")]);
        assert_eq!(ledger.next_expiry(), None);
    }

    #[test]
    fn test_superseding_signal_suppresses_expiry_flatten() {
        let mut ledger = ledger();
        let old = signal("UVXY", Direction::Down, 0, 10);
        let new = signal("UVXY", Direction::Down, 5, 100);
        let weights = weights_for(&[&old, &new], dec!(-0.5));
        ledger.create_targets(t(1), &[old], &weights, &[]);

        // Old signal expires but the replacement is still active, so the
        // instrument must not be flattened.
        let targets = ledger.create_targets(t(20), &[new.clone()], &weights, &[]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_percent, dec!(-0.5));
    }

    #[test]
    fn test_latest_generated_signal_wins() {
        let mut ledger = ledger();
        let older = signal("UVXY", Direction::Down, 0, 100);
        let newer = signal("UVXY", Direction::Up, 50, 100);

        let mut weights = BTreeMap::new();
        weights.insert(older.id(), dec!(-0.5));
        weights.insert(newer.id(), dec!(1.33));

        let targets = ledger.create_targets(t(60), &[older, newer], &weights, &[]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].target_percent, dec!(1.33));
    }

    #[test]
    fn test_fast_path_returns_empty() {
        let mut ledger = ledger();
        let s = signal("UVXY", Direction::Down, 0, 1000);
        let weights = weights_for(&[&s], dec!(-0.5));
        let first = ledger.create_targets(t(1), &[s], &weights, &[]);
        assert_eq!(first.len(), 1);

        // Same tick, nothing new: fast path.
        let second = ledger.create_targets(t(1), &[], &weights, &[]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_rebalance_cadence_advances() {
        let mut ledger = SignalLedger::new("alpha", Duration::hours(2));
        let s = signal("UVXY", Direction::Down, 0, 1_000_000);
        let weights = weights_for(&[&s], dec!(-0.5));

        ledger.create_targets(t(0), &[s], &weights, &[]);
        let next = ledger.next_rebalance().unwrap();
        assert_eq!(next, t(0) + Duration::hours(2));

        // Before the cadence fires the schedule is untouched.
        ledger.create_targets(t(3600), &[], &weights, &[]);
        assert_eq!(ledger.next_rebalance(), Some(next));

        // At the scheduled time it advances by one period.
        ledger.create_targets(next, &[], &weights, &[]);
        assert_eq!(ledger.next_rebalance(), Some(next + Duration::hours(2)));
    }

    #[test]
    fn test_discard_instruments_clears_state_without_error() {
        let mut ledger = ledger();
        ledger.admit(signal("UVXY", Direction::Down, 0, 100));
        ledger.admit(signal("TQQQ", Direction::Up, 0, 50));

        ledger.discard_instruments(&["UVXY".to_string()]);

        assert_eq!(ledger.next_expiry(), Some(t(50)));
        assert!(ledger.error_instruments().is_empty());

        // The discarded instrument no longer produces an expiry flatten.
        let targets = ledger.create_targets(t(200), &[], &BTreeMap::new(), &[]);
        assert_eq!(targets, vec![Target::flatten("TQQQ")]);
    }
}
