//! Radial profile scan along one angular ray.
//!
//! The centre finder needs to know where the bulb rim sits on each ray. The
//! walk starts at `profile_r_start` outside the bulb and steps toward
//! `profile_r_stop` (direction follows the sign of `stop - start`; inward is
//! the calibration convention), reading the normalized intensity at each
//! radius.
//!
//! # Walk phases
//!
//! - Coarse: `coarse_step` spacing. The first `plateau_samples` readings set
//!   the outside plateau; the edge threshold is `threshold_factor` times that
//!   level. Threshold comparisons use the magnitude of the normalized signal.
//! - Hand-off: when a coarse reading reaches the threshold, the walk backs up
//!   to the last below-threshold radius and re-enters that interval at
//!   `fine_step` spacing, so the crossing ends up straddled by fine samples.
//! - Fine: continues until the last `plateau_samples` readings sit at or
//!   above threshold and agree to within `plateau_tolerance` (the inside
//!   plateau), or until the walk passes `profile_r_stop`.
//!
//! The edge radius is interpolated to the threshold level between the last
//! below-threshold sample and the first at-or-above fine sample, which
//! removes most of the step-size bias. A ray may also end without an edge;
//! the centre finder excludes such rays.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fit::EdgePoint;
use super::reference::ReferenceNormalizer;
use super::session::CancelToken;
use crate::config::CentreFinderConfig;
use crate::core::Position;
use crate::daq::AcquisitionBackend;
use crate::error::{ScanError, ScanResult};
use crate::motion::PositionController;

/// One reading of a radial profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSample {
    /// Scan radius, mm.
    pub radius: f64,
    /// Uncorrected backend value.
    pub raw_value: f64,
    /// Drift-normalized value (online, against the latest reference).
    pub normalized_value: f64,
}

/// A completed ray: its samples in walk order and the detected edge, if any.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RadialProfile {
    /// Ray angle, degrees.
    pub angle: f64,
    /// Samples in walk order. Monotone in radius apart from the single
    /// coarse-to-fine hand-off, which re-enters the last coarse interval.
    pub samples: Vec<ProfileSample>,
    /// Threshold crossing, when the ray found one.
    pub edge: Option<EdgePoint>,
}

/// Walks one ray of the calibration scan.
pub struct ProfileScanner<'a> {
    controller: &'a mut PositionController,
    backend: &'a mut AcquisitionBackend,
    normalizer: &'a mut ReferenceNormalizer,
    params: &'a CentreFinderConfig,
    height: f64,
    cancel: &'a CancelToken,
}

impl<'a> ProfileScanner<'a> {
    /// Scanner over borrowed session hardware. The normalizer is shared with
    /// the rest of the calibration run so the reference schedule spans rays.
    pub fn new(
        controller: &'a mut PositionController,
        backend: &'a mut AcquisitionBackend,
        normalizer: &'a mut ReferenceNormalizer,
        params: &'a CentreFinderConfig,
        height: f64,
        cancel: &'a CancelToken,
    ) -> Self {
        ProfileScanner {
            controller,
            backend,
            normalizer,
            params,
            height,
            cancel,
        }
    }

    /// Walk the ray at `angle` and return its profile.
    ///
    /// Per-sample acquisition failures are retried once; a second failure
    /// abandons the ray with the acquisition error (the caller excludes the
    /// angle). Motion faults and cancellation propagate unchanged. A ray that
    /// leaves the travel volume simply ends there.
    pub async fn run(&mut self, angle: f64) -> ScanResult<RadialProfile> {
        let start = self.params.profile_r_start;
        let stop = self.params.profile_r_stop;
        let direction = (stop - start).signum();
        let mut r = start;
        let mut samples: Vec<ProfileSample> = Vec::new();
        let mut threshold: Option<f64> = None;
        let mut fine = false;
        let mut last_below: Option<(f64, f64)> = None;
        let mut edge_radius: Option<f64> = None;
        let mut fine_levels: Vec<f64> = Vec::new();

        debug!(angle, start, stop, "scanning radial profile");

        loop {
            if past_stop(r, stop, direction) {
                break;
            }
            self.cancel.check()?;

            let position = Position::new(r, angle, self.height);
            if !self.controller.within_travel(&position) {
                warn!(angle, radius = r, "ray left the travel volume, stopping");
                break;
            }
            self.controller.move_to(&position).await?;

            if self.normalizer.needs_reference() {
                match self.backend.measure_reference(&position).await {
                    Ok(reading) => {
                        self.normalizer.push_reference(reading);
                    }
                    Err(ScanError::Acquisition(reason)) => {
                        warn!(angle, %reason, "reference read failed during profile");
                        self.normalizer.reference_failed();
                    }
                    Err(e) => return Err(e),
                }
            }

            let raw = self.acquire_with_retry(&position).await?;
            self.normalizer.mark_visit();
            let (normalized, _) = self.normalizer.normalize_online(raw);
            samples.push(ProfileSample {
                radius: r,
                raw_value: raw,
                normalized_value: normalized,
            });
            let level = normalized.abs();

            if !fine {
                if threshold.is_none() && samples.len() >= self.params.plateau_samples {
                    let plateau = samples[..self.params.plateau_samples]
                        .iter()
                        .map(|s| s.normalized_value.abs())
                        .sum::<f64>()
                        / self.params.plateau_samples as f64;
                    let th = self.params.threshold_factor * plateau;
                    debug!(angle, plateau, threshold = th, "edge threshold set");
                    threshold = Some(th);
                }
                match threshold {
                    Some(th) if level >= th => {
                        // Crossed on a coarse step: back up so fine samples
                        // straddle the crossing.
                        let back = r - direction * self.params.coarse_step;
                        fine = true;
                        r = back + direction * self.params.fine_step;
                        continue;
                    }
                    _ => {
                        last_below = Some((r, level));
                        r += direction * self.params.coarse_step;
                    }
                }
            } else {
                let th = threshold.unwrap_or(f64::INFINITY);
                fine_levels.push(level);
                if level < th {
                    last_below = Some((r, level));
                } else if edge_radius.is_none() {
                    edge_radius = Some(interpolate_edge(last_below, r, level, th));
                }
                if inside_plateau(
                    &fine_levels,
                    th,
                    self.params.plateau_samples,
                    self.params.plateau_tolerance,
                ) {
                    debug!(angle, radius = r, "inside plateau reached");
                    break;
                }
                r += direction * self.params.fine_step;
            }
        }

        let edge = edge_radius.map(|radius| EdgePoint { angle, radius });
        match &edge {
            Some(e) => debug!(angle, edge_radius = e.radius, "edge found"),
            None => debug!(angle, "no edge on this ray"),
        }
        Ok(RadialProfile {
            angle,
            samples,
            edge,
        })
    }

    async fn acquire_with_retry(&mut self, position: &Position) -> ScanResult<f64> {
        match self.backend.measure(position).await {
            Ok(reading) => Ok(reading.raw),
            Err(ScanError::Acquisition(reason)) => {
                warn!(
                    radius = position.radius,
                    %reason,
                    "acquisition failed, retrying once"
                );
                Ok(self.backend.measure(position).await?.raw)
            }
            Err(e) => Err(e),
        }
    }
}

fn past_stop(r: f64, stop: f64, direction: f64) -> bool {
    if direction < 0.0 {
        r < stop - 1e-9
    } else {
        r > stop + 1e-9
    }
}

/// Interpolate the radius where the signal reaches `threshold` between the
/// last below-threshold sample and the first at-or-above sample.
fn interpolate_edge(last_below: Option<(f64, f64)>, r: f64, level: f64, threshold: f64) -> f64 {
    match last_below {
        Some((rb, lb)) if (level - lb).abs() > 1e-12 => {
            rb + (threshold - lb) * (r - rb) / (level - lb)
        }
        Some((rb, _)) => (rb + r) / 2.0,
        None => r,
    }
}

/// Whether the tail of the fine-phase readings has settled on the inside
/// plateau: all at or above threshold, relative spread within tolerance.
fn inside_plateau(levels: &[f64], threshold: f64, window: usize, tolerance: f64) -> bool {
    if levels.len() < window {
        return false;
    }
    let tail = &levels[levels.len() - window..];
    if tail.iter().any(|v| *v < threshold) {
        return false;
    }
    let mean = tail.iter().sum::<f64>() / window as f64;
    if mean.abs() < 1e-12 {
        return false;
    }
    let min = tail.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = tail.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    (max - min) / mean <= tolerance
}
