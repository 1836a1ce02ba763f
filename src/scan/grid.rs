//! Polar grid acquisition.
//!
//! The grid plan is a sequence of ring positions: concentric rings every
//! `r_step` out to `r_max`, each ring populated so that the arc length
//! between neighbours never exceeds `arc_step`. The scanner visits the plan
//! in order, interleaves reference measurements every `reference_period`
//! points, and finalizes each primary reading against its drift bracket.
//!
//! The sweep is deliberately hard to kill: unreachable points are skipped,
//! unreadable points become NaN placeholders flagged degraded, failed
//! references fall back to the previous level. Only a motion fault or a
//! cancellation ends the run early, and even then the readings taken so far
//! come back in the outcome with [`Completion::Aborted`].

use std::f64::consts::TAU;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reference::ReferenceNormalizer;
use super::session::CancelToken;
use crate::config::{GridConfig, StatisticsConfig};
use crate::core::{Completion, Position, Reading};
use crate::daq::AcquisitionBackend;
use crate::error::ScanError;
use crate::motion::PositionController;

/// Angular layout of one ring of the grid.
pub trait ScanPattern {
    /// Angles (degrees, in `[0, 360)`) of the points on the ring at
    /// `radius`. Callers rely on the order being the visit order.
    fn ring_angles(&self, radius: f64) -> Vec<f64>;
}

/// Even arc-length layout: the point count per ring grows with the radius so
/// the spacing along the ring stays at or below `arc_step`. The centre ring
/// is a single point.
pub struct RingDensityPattern {
    arc_step: f64,
}

impl RingDensityPattern {
    /// Pattern with the given maximum arc spacing, mm.
    pub fn new(arc_step: f64) -> Self {
        RingDensityPattern { arc_step }
    }
}

impl ScanPattern for RingDensityPattern {
    fn ring_angles(&self, radius: f64) -> Vec<f64> {
        if radius <= 1e-9 {
            return vec![0.0];
        }
        let count = (TAU * radius / self.arc_step).ceil() as usize;
        (0..count).map(|k| k as f64 * 360.0 / count as f64).collect()
    }
}

/// The ordered positions of one grid sweep.
pub struct GridPlan {
    positions: Vec<Position>,
    rings: usize,
}

impl GridPlan {
    /// Lay out the plan: rings at integer multiples of `r_step` up to
    /// `r_max`, angles per ring from the pattern, all at the given focus
    /// height. Visit order is ring by ring, inside out.
    pub fn build(grid: &GridConfig, pattern: &dyn ScanPattern, height: f64) -> Self {
        let mut positions = Vec::new();
        let mut rings = 0;
        let mut k = 0u32;
        loop {
            let radius = f64::from(k) * grid.r_step;
            if radius > grid.r_max + 1e-9 {
                break;
            }
            for angle in pattern.ring_angles(radius) {
                positions.push(Position::new(radius, angle, height));
            }
            rings += 1;
            k += 1;
        }
        debug!(rings, points = positions.len(), "grid plan laid out");
        GridPlan { positions, rings }
    }

    /// Planned positions in visit order.
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Number of planned points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the plan has no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of rings, centre point included.
    pub fn rings(&self) -> usize {
        self.rings
    }
}

/// Everything a grid sweep produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridScanOutcome {
    /// Identifier shared by all artifacts of this run.
    pub run_id: Uuid,
    /// UTC time the sweep started.
    pub started_at: DateTime<Utc>,
    /// UTC time the sweep finished.
    pub finished_at: DateTime<Utc>,
    /// Whether the sweep covered the whole plan.
    pub completion: Completion,
    /// Finalized primary readings, in acquisition order. Aligned with the
    /// visited part of the plan: skipped points are absent, unreadable points
    /// are NaN placeholders.
    pub readings: Vec<Reading>,
    /// Reference readings, in acquisition order.
    pub references: Vec<Reading>,
    /// Planned points outside the travel limits, never visited.
    pub skipped: Vec<Position>,
}

/// Drives one grid sweep over borrowed session hardware.
pub struct GridScanner<'a> {
    controller: &'a mut PositionController,
    backend: &'a mut AcquisitionBackend,
    statistics: &'a StatisticsConfig,
    cancel: CancelToken,
}

impl<'a> GridScanner<'a> {
    /// Scanner over the session's controller and acquisition backend.
    pub fn new(
        controller: &'a mut PositionController,
        backend: &'a mut AcquisitionBackend,
        statistics: &'a StatisticsConfig,
        cancel: CancelToken,
    ) -> Self {
        GridScanner {
            controller,
            backend,
            statistics,
            cancel,
        }
    }

    /// Sweep the plan. Never fails outright: faults that end the sweep early
    /// are reported through [`Completion::Aborted`] and the readings taken up
    /// to that point stay in the outcome.
    pub async fn run(&mut self, plan: &GridPlan, run_id: Uuid) -> GridScanOutcome {
        let started_at = Utc::now();
        let mut normalizer = ReferenceNormalizer::new(self.statistics.reference_period);
        let mut readings: Vec<Reading> = Vec::new();
        let mut skipped: Vec<Position> = Vec::new();
        let mut abort_reason: Option<String> = None;
        let mut last_visited: Option<Position> = None;

        info!(%run_id, points = plan.len(), rings = plan.rings(), "starting grid scan");

        for position in plan.positions() {
            if self.cancel.is_cancelled() {
                warn!("grid scan cancelled");
                abort_reason = Some("cancelled".to_string());
                break;
            }
            if !self.controller.within_travel(position) {
                warn!(
                    radius = position.radius,
                    angle = position.angle,
                    "grid point outside the travel limits, skipping"
                );
                skipped.push(*position);
                continue;
            }
            if let Err(e) = self.controller.move_to(position).await {
                warn!(error = %e, "motion fault, aborting the sweep");
                abort_reason = Some(e.to_string());
                break;
            }
            last_visited = Some(*position);

            if normalizer.needs_reference() {
                match self.backend.measure_reference(position).await {
                    Ok(reading) => readings.extend(normalizer.push_reference(reading)),
                    Err(ScanError::Acquisition(reason)) => {
                        warn!(%reason, "reference read failed, falling back");
                        readings.extend(normalizer.reference_failed());
                    }
                    Err(e) => {
                        warn!(error = %e, "aborting the sweep");
                        abort_reason = Some(e.to_string());
                        break;
                    }
                }
            }

            match self.measure_block(position).await {
                Ok(reading) => normalizer.push_primary(reading),
                Err(ScanError::Acquisition(reason)) => {
                    warn!(
                        radius = position.radius,
                        angle = position.angle,
                        %reason,
                        "grid point unreadable, recording a degraded placeholder"
                    );
                    let mut placeholder = Reading::sample(f64::NAN, *position);
                    placeholder.degraded = true;
                    normalizer.push_primary(placeholder);
                }
                Err(e) => {
                    warn!(error = %e, "aborting the sweep");
                    abort_reason = Some(e.to_string());
                    break;
                }
            }
        }

        // Close the last bracket with a real reference so the final readings
        // are interpolated, not extrapolated.
        if abort_reason.is_none() {
            if let Some(position) = last_visited {
                match self.backend.measure_reference(&position).await {
                    Ok(reading) => readings.extend(normalizer.push_reference(reading)),
                    Err(ScanError::Acquisition(reason)) => {
                        warn!(%reason, "closing reference failed, falling back");
                        readings.extend(normalizer.reference_failed());
                    }
                    Err(e) => {
                        warn!(error = %e, "closing reference failed, aborting the sweep");
                        abort_reason = Some(e.to_string());
                    }
                }
            }
        }
        readings.extend(normalizer.finish());

        let completion = match abort_reason {
            None => Completion::Complete,
            Some(reason) => Completion::Aborted { reason },
        };
        info!(
            readings = readings.len(),
            references = normalizer.references().len(),
            skipped = skipped.len(),
            complete = completion.is_complete(),
            "grid scan finished"
        );
        GridScanOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completion,
            readings,
            references: normalizer.into_references(),
            skipped,
        }
    }

    /// Average of `readouts_per_position` acquisitions at one point, retried
    /// once as a whole on an acquisition failure.
    async fn measure_block(&mut self, position: &Position) -> crate::error::ScanResult<Reading> {
        match self.block_once(position).await {
            Ok(reading) => Ok(reading),
            Err(ScanError::Acquisition(reason)) => {
                warn!(%reason, "block acquisition failed, retrying once");
                self.block_once(position).await
            }
            Err(e) => Err(e),
        }
    }

    async fn block_once(&mut self, position: &Position) -> crate::error::ScanResult<Reading> {
        let n = self.statistics.readouts_per_position.max(1);
        let mut sum = 0.0;
        for _ in 0..n {
            sum += self.backend.measure(position).await?.raw;
        }
        Ok(Reading::sample(sum / f64::from(n), *position))
    }
}
