//! Interleaved reference scheduling and drift normalization.
//!
//! The light source intensity drifts over a long sweep. A second, physically
//! fixed detector watches the source; re-reading it every `reference_period`
//! positions gives a drift baseline to divide the primary readings by. The
//! reference detector never moves, so a reference measurement changes only
//! the reading, not the motor position.
//!
//! # Bracketed (buffered) mode
//!
//! The grid scan buffers each primary reading until the next reference
//! arrives. A pair of consecutive references brackets the primaries between
//! them; the drift baseline at each buffered reading is linearly interpolated
//! between the two bracket levels over acquisition order (not wall time), and
//! the reading is finalized as `raw / baseline`. The first and last reading of
//! a sweep are always bracketed, which costs one extra reference read at the
//! end of the sweep.
//!
//! # Online mode
//!
//! The profile walk decides thresholds at the moment of acquisition and
//! cannot wait for a closing bracket, so it normalizes against the most
//! recent reference level instead. Scheduling state is shared: online users
//! advance the visit counter with [`ReferenceNormalizer::mark_visit`].
//!
//! # Fallback
//!
//! A failed reference read falls back to the previous valid level; every
//! reading in a bracket with a fallback endpoint is flagged degraded. If no
//! reference ever succeeds, raw values pass through against a unit baseline,
//! all degraded. Reference failures never abort a sweep.

use crate::core::{lerp, Reading};
use tracing::debug;

/// Baselines smaller than this cannot be divided by; the raw value passes
/// through degraded instead.
const BASELINE_EPS: f64 = 1e-12;

/// Stateful drift normalizer shared by the profile and grid sweeps.
///
/// Drive it with the acquisition loop: call [`needs_reference`] before each
/// primary acquisition, feed the reference outcome with [`push_reference`] or
/// [`reference_failed`], then hand over the primary reading with
/// [`push_primary`] (bracketed mode) or normalize it immediately with
/// [`normalize_online`] plus [`mark_visit`] (online mode). Finalized readings
/// come back from the bracket-closing calls in acquisition order.
///
/// [`needs_reference`]: ReferenceNormalizer::needs_reference
/// [`push_reference`]: ReferenceNormalizer::push_reference
/// [`reference_failed`]: ReferenceNormalizer::reference_failed
/// [`push_primary`]: ReferenceNormalizer::push_primary
/// [`normalize_online`]: ReferenceNormalizer::normalize_online
/// [`mark_visit`]: ReferenceNormalizer::mark_visit
pub struct ReferenceNormalizer {
    period: u32,
    since_last: u32,
    opened: bool,
    last_level: Option<f64>,
    open_is_fallback: bool,
    pending: Vec<Reading>,
    references: Vec<Reading>,
}

impl ReferenceNormalizer {
    /// Normalizer taking a reference every `period` visited positions.
    pub fn new(period: u32) -> Self {
        ReferenceNormalizer {
            period,
            since_last: 0,
            opened: false,
            last_level: None,
            open_is_fallback: false,
            pending: Vec::new(),
            references: Vec::new(),
        }
    }

    /// Whether the next primary acquisition must be preceded by a reference
    /// measurement: true at the start of a sweep and every `period` visits
    /// thereafter.
    pub fn needs_reference(&self) -> bool {
        !self.opened || self.since_last >= self.period
    }

    /// Record a successful reference measurement. Closes the open bracket and
    /// returns its primaries, finalized in acquisition order.
    pub fn push_reference(&mut self, reading: Reading) -> Vec<Reading> {
        let level = reading.value;
        let finalized = self.close_bracket(Some(level), false);
        self.references.push(reading);
        self.last_level = Some(level);
        self.open_is_fallback = false;
        self.opened = true;
        self.since_last = 0;
        finalized
    }

    /// Record a failed reference measurement. The previous valid level closes
    /// the bracket instead and its readings degrade; the next bracket opens
    /// on the same fallback level. The schedule still counts the attempt, so
    /// a flaky reference channel is re-tried one period later, not every
    /// point.
    pub fn reference_failed(&mut self) -> Vec<Reading> {
        debug!(
            fallback_level = self.last_level,
            pending = self.pending.len(),
            "reference read failed, falling back"
        );
        let finalized = self.close_bracket(self.last_level, true);
        self.open_is_fallback = true;
        self.opened = true;
        self.since_last = 0;
        finalized
    }

    /// Buffer a primary reading until its closing bracket arrives. Counts as
    /// a visit.
    pub fn push_primary(&mut self, reading: Reading) {
        self.pending.push(reading);
        self.mark_visit();
    }

    /// Advance the visit counter without buffering (online mode).
    pub fn mark_visit(&mut self) {
        self.since_last += 1;
    }

    /// Normalize a raw value against the most recent reference level, for
    /// callers that cannot wait for a closing bracket. Returns the value and
    /// whether it is degraded (fallback level, or no reference yet).
    pub fn normalize_online(&self, raw: f64) -> (f64, bool) {
        match self.last_level {
            Some(level) if level.abs() > BASELINE_EPS => (raw / level, self.open_is_fallback),
            _ => (raw, true),
        }
    }

    /// Flush buffered primaries whose bracket will never close (aborted
    /// sweep). Finalized flat against the last reference level, degraded.
    pub fn finish(&mut self) -> Vec<Reading> {
        self.close_bracket(self.last_level, true)
    }

    /// Successful reference readings so far, in acquisition order.
    pub fn references(&self) -> &[Reading] {
        &self.references
    }

    /// Consume the normalizer, yielding the reference readings.
    pub fn into_references(self) -> Vec<Reading> {
        self.references
    }

    /// Finalize the open bracket against `close_level`. The opening endpoint
    /// is the current `last_level`; with both endpoints present the baseline
    /// is interpolated over acquisition order, with one it is flat, with
    /// neither it is unity.
    fn close_bracket(&mut self, close_level: Option<f64>, close_is_fallback: bool) -> Vec<Reading> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return pending;
        }
        let open_level = self.last_level;
        let bracket_degraded = self.open_is_fallback || close_is_fallback;
        let n = pending.len();
        pending
            .into_iter()
            .enumerate()
            .map(|(k, mut reading)| {
                let baseline = match (open_level, close_level) {
                    (Some(r0), Some(r1)) => lerp(r0, r1, (k + 1) as f64 / (n + 1) as f64),
                    (Some(r0), None) => r0,
                    (None, Some(r1)) => r1,
                    (None, None) => 1.0,
                };
                if baseline.abs() > BASELINE_EPS {
                    reading.value = reading.raw / baseline;
                    reading.degraded |= bracket_degraded;
                } else {
                    reading.value = reading.raw;
                    reading.degraded = true;
                }
                reading
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Position;

    fn sample(raw: f64) -> Reading {
        Reading::sample(raw, Position::new(0.0, 0.0, 55.0))
    }

    fn reference(value: f64) -> Reading {
        Reading::reference(value, Position::new(0.0, 0.0, 55.0))
    }

    #[test]
    fn test_interpolates_between_brackets() {
        let mut norm = ReferenceNormalizer::new(3);
        assert!(norm.needs_reference());
        assert!(norm.push_reference(reference(2.0)).is_empty());
        for raw in [4.0, 4.0, 4.0] {
            norm.push_primary(sample(raw));
        }
        assert!(norm.needs_reference());
        let out = norm.push_reference(reference(4.0));

        // Baselines 2.5, 3.0, 3.5 at bracket fractions 1/4, 2/4, 3/4.
        assert_eq!(out.len(), 3);
        assert!((out[0].value - 1.6).abs() < 1e-12);
        assert!((out[1].value - 4.0 / 3.0).abs() < 1e-12);
        assert!((out[2].value - 4.0 / 3.5).abs() < 1e-12);
        assert!(out.iter().all(|r| !r.degraded));
        assert!(out.iter().all(|r| r.raw == 4.0));
    }

    #[test]
    fn test_schedule_brackets_first_and_last() {
        let mut norm = ReferenceNormalizer::new(3);
        let mut finalized = Vec::new();
        let mut refs = 0;
        for _ in 0..7 {
            if norm.needs_reference() {
                finalized.extend(norm.push_reference(reference(2.0)));
                refs += 1;
            }
            norm.push_primary(sample(1.0));
        }
        // Closing bracket for the tail.
        finalized.extend(norm.push_reference(reference(2.0)));
        refs += 1;

        // ceil(7 / 3) = 3 nominal references plus the closing one.
        assert_eq!(refs, 4);
        assert_eq!(finalized.len(), 7);
        assert_eq!(norm.references().len(), 4);
        assert!(finalized.iter().all(|r| !r.degraded));
    }

    #[test]
    fn test_needs_reference_every_period() {
        let mut norm = ReferenceNormalizer::new(2);
        let mut fired = Vec::new();
        for i in 0..5 {
            if norm.needs_reference() {
                norm.push_reference(reference(1.0));
                fired.push(i);
            }
            norm.push_primary(sample(1.0));
        }
        assert_eq!(fired, vec![0, 2, 4]);
    }

    #[test]
    fn test_reference_failure_degrades_bracket() {
        let mut norm = ReferenceNormalizer::new(10);
        norm.push_reference(reference(2.0));
        norm.push_primary(sample(3.0));
        norm.push_primary(sample(5.0));

        // Closing read fails: flat fallback to the opening level.
        let out = norm.reference_failed();
        assert_eq!(out.len(), 2);
        assert!((out[0].value - 1.5).abs() < 1e-12);
        assert!((out[1].value - 2.5).abs() < 1e-12);
        assert!(out.iter().all(|r| r.degraded));

        // The next bracket opened on the fallback level, so it degrades too.
        norm.push_primary(sample(4.0));
        let out = norm.push_reference(reference(2.0));
        assert_eq!(out.len(), 1);
        assert!(out[0].degraded);
        assert!((out[0].value - 2.0).abs() < 1e-12);

        // After a success, brackets are clean again.
        norm.push_primary(sample(6.0));
        let out = norm.push_reference(reference(4.0));
        assert!(!out[0].degraded);
        assert!((out[0].value - 2.0).abs() < 1e-12); // baseline lerp(2, 4, 1/2) = 3

        // Failed reads are not recorded as references.
        assert_eq!(norm.references().len(), 3);
    }

    #[test]
    fn test_no_reference_ever_passes_raw_degraded() {
        let mut norm = ReferenceNormalizer::new(5);
        assert!(norm.needs_reference());
        norm.reference_failed();
        assert!(!norm.needs_reference(), "failed attempt still counts for the schedule");
        norm.push_primary(sample(7.0));

        let out = norm.finish();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 7.0);
        assert!(out[0].degraded);
        assert!(norm.references().is_empty());
    }

    #[test]
    fn test_online_normalization_tracks_latest_level() {
        let mut norm = ReferenceNormalizer::new(5);
        let (v, degraded) = norm.normalize_online(3.0);
        assert_eq!(v, 3.0);
        assert!(degraded);

        norm.push_reference(reference(2.0));
        let (v, degraded) = norm.normalize_online(3.0);
        assert!((v - 1.5).abs() < 1e-12);
        assert!(!degraded);

        norm.reference_failed();
        let (v, degraded) = norm.normalize_online(3.0);
        assert!((v - 1.5).abs() < 1e-12);
        assert!(degraded);
    }

    #[test]
    fn test_zero_baseline_passes_raw() {
        let mut norm = ReferenceNormalizer::new(5);
        norm.push_reference(reference(0.0));
        norm.push_primary(sample(3.0));
        let out = norm.push_reference(reference(0.0));
        assert_eq!(out[0].value, 3.0);
        assert!(out[0].degraded);
    }

    #[test]
    fn test_finish_flushes_open_bracket() {
        let mut norm = ReferenceNormalizer::new(10);
        norm.push_reference(reference(4.0));
        norm.push_primary(sample(8.0));
        norm.push_primary(sample(2.0));

        let out = norm.finish();
        assert_eq!(out.len(), 2);
        // Flat against the opening level, flagged for the missing bracket.
        assert!((out[0].value - 2.0).abs() < 1e-12);
        assert!((out[1].value - 0.5).abs() < 1e-12);
        assert!(out.iter().all(|r| r.degraded));
        assert!(norm.finish().is_empty());
    }
}
