//! Bulb-centre calibration.
//!
//! The nominal scan origin comes from the bench survey and is only good to a
//! millimetre or two. Calibration measures where the bulb actually sits: it
//! reads the intensity at the nominal centre, walks a radial profile along
//! each calibration ray, and fits a circle through the per-ray edge radii.
//! The fitted centre, expressed as an `(x, y)` offset from the nominal
//! origin, is what the grid scan applies to every stage target.
//!
//! Individual rays are allowed to fail. A ray whose acquisition gives up, or
//! that finds no edge, or whose edge lands outside the walk range, is
//! excluded and calibration continues; only when excluded rays reach a
//! majority, or fewer than three edge points remain, does the run end with
//! [`ScanError::InsufficientData`]. Motion faults and cancellation abort the
//! run immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::fit::{fit_circle, CentreEstimate, EdgePoint};
use super::profile::{ProfileScanner, RadialProfile};
use super::reference::ReferenceNormalizer;
use super::session::CancelToken;
use crate::config::{CentreFinderConfig, ScanConfig};
use crate::core::Position;
use crate::daq::AcquisitionBackend;
use crate::error::{ScanError, ScanResult};
use crate::motion::PositionController;

/// Everything a calibration run produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    /// Identifier shared by all artifacts of this run.
    pub run_id: Uuid,
    /// UTC time the calibration started.
    pub started_at: DateTime<Utc>,
    /// UTC time the calibration finished.
    pub finished_at: DateTime<Utc>,
    /// Fitted centre offset and radius.
    pub estimate: CentreEstimate,
    /// Edge points the fit used, one per successful ray.
    pub edge_points: Vec<EdgePoint>,
    /// Rays excluded from the fit, by angle.
    pub excluded_angles: Vec<f64>,
    /// Normalized intensity at the nominal centre, measured before the rays.
    /// NaN when the reading failed twice.
    pub centre_intensity: f64,
    /// Full radial profiles, retained when `save_all_profiles` is set.
    pub profiles: Vec<RadialProfile>,
}

/// Ray angles for an angular step, covering `[0, 360)` degrees.
pub(crate) fn calibration_angles(ang_step: f64) -> Vec<f64> {
    let mut angles = Vec::new();
    let mut a = 0.0;
    while a < 360.0 - 1e-9 {
        angles.push(a);
        a += ang_step;
    }
    angles
}

fn within_walk_range(radius: f64, finder: &CentreFinderConfig) -> bool {
    let lo = finder.profile_r_start.min(finder.profile_r_stop);
    let hi = finder.profile_r_start.max(finder.profile_r_stop);
    radius >= lo - 1e-9 && radius <= hi + 1e-9
}

/// Runs the calibration sequence over borrowed session hardware.
pub struct CentreFinder<'a> {
    controller: &'a mut PositionController,
    backend: &'a mut AcquisitionBackend,
    config: &'a ScanConfig,
    cancel: CancelToken,
}

impl<'a> CentreFinder<'a> {
    /// Finder over the session's controller and acquisition backend.
    pub fn new(
        controller: &'a mut PositionController,
        backend: &'a mut AcquisitionBackend,
        config: &'a ScanConfig,
        cancel: CancelToken,
    ) -> Self {
        CentreFinder {
            controller,
            backend,
            config,
            cancel,
        }
    }

    /// Run the full calibration: centre intensity, one profile per ray, then
    /// the circle fit.
    ///
    /// # Errors
    ///
    /// [`ScanError::InsufficientData`] when a majority of rays is excluded,
    /// fewer than three edge points remain, the points are degenerate, or the
    /// fitted radius is implausible against the configured bulb radius.
    /// Motion faults and cancellation propagate as themselves.
    pub async fn run(&mut self, run_id: Uuid) -> ScanResult<CalibrationOutcome> {
        self.cancel.check()?;
        let started_at = Utc::now();
        let finder = &self.config.centre_finder;
        let height = self.config.motors.z_at_pmt_centre;
        let angles = calibration_angles(finder.ang_step);
        info!(%run_id, rays = angles.len(), "starting centre calibration");

        // The reference schedule spans the whole calibration, centre reading
        // included.
        let mut normalizer = ReferenceNormalizer::new(self.config.statistics.reference_period);
        let centre_intensity = self.centre_intensity(&mut normalizer, height).await?;

        let mut profiles: Vec<RadialProfile> = Vec::new();
        let mut edge_points: Vec<EdgePoint> = Vec::new();
        let mut excluded_angles: Vec<f64> = Vec::new();
        for &angle in &angles {
            self.cancel.check()?;
            let mut scanner = ProfileScanner::new(
                self.controller,
                self.backend,
                &mut normalizer,
                finder,
                height,
                &self.cancel,
            );
            match scanner.run(angle).await {
                Ok(profile) => {
                    match profile.edge {
                        Some(point) if within_walk_range(point.radius, finder) => {
                            edge_points.push(point);
                        }
                        Some(point) => {
                            warn!(
                                angle,
                                radius = point.radius,
                                "edge outside the walk range, excluding ray"
                            );
                            excluded_angles.push(angle);
                        }
                        None => {
                            warn!(angle, "no edge on this ray, excluding it");
                            excluded_angles.push(angle);
                        }
                    }
                    if finder.save_all_profiles {
                        profiles.push(profile);
                    }
                }
                Err(ScanError::Acquisition(reason)) => {
                    warn!(angle, %reason, "ray abandoned after repeated acquisition failures");
                    excluded_angles.push(angle);
                }
                Err(e) => return Err(e),
            }
        }

        if excluded_angles.len() * 2 > angles.len() {
            return Err(ScanError::InsufficientData(format!(
                "{} of {} calibration rays excluded",
                excluded_angles.len(),
                angles.len()
            )));
        }
        if edge_points.len() < 3 {
            return Err(ScanError::InsufficientData(format!(
                "only {} edge points, a circle fit needs 3",
                edge_points.len()
            )));
        }

        let estimate = fit_circle(&edge_points)?;
        let nominal = finder.pmt_bulb_radius;
        if (estimate.fitted_radius - nominal).abs() > 0.5 * nominal {
            return Err(ScanError::InsufficientData(format!(
                "fitted radius {:.2} mm is implausible for a {nominal} mm bulb",
                estimate.fitted_radius
            )));
        }

        info!(
            x_offset = estimate.x_offset,
            y_offset = estimate.y_offset,
            fitted_radius = estimate.fitted_radius,
            residual_rms = estimate.residual_rms,
            "centre calibrated"
        );
        Ok(CalibrationOutcome {
            run_id,
            started_at,
            finished_at: Utc::now(),
            estimate,
            edge_points,
            excluded_angles,
            centre_intensity,
            profiles,
        })
    }

    /// Normalized intensity at the nominal centre. Retried once; a second
    /// acquisition failure gives NaN rather than aborting the calibration.
    async fn centre_intensity(
        &mut self,
        normalizer: &mut ReferenceNormalizer,
        height: f64,
    ) -> ScanResult<f64> {
        let position = Position::new(0.0, 0.0, height);
        self.controller.move_to(&position).await?;

        if normalizer.needs_reference() {
            match self.backend.measure_reference(&position).await {
                Ok(reading) => {
                    normalizer.push_reference(reading);
                }
                Err(ScanError::Acquisition(reason)) => {
                    warn!(%reason, "reference read failed at the nominal centre");
                    normalizer.reference_failed();
                }
                Err(e) => return Err(e),
            }
        }

        let raw = match self.backend.measure(&position).await {
            Ok(reading) => reading.raw,
            Err(ScanError::Acquisition(reason)) => {
                warn!(%reason, "centre intensity read failed, retrying once");
                match self.backend.measure(&position).await {
                    Ok(reading) => reading.raw,
                    Err(ScanError::Acquisition(reason)) => {
                        warn!(%reason, "centre intensity unavailable for this run");
                        normalizer.mark_visit();
                        return Ok(f64::NAN);
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        normalizer.mark_visit();
        let (value, _) = normalizer.normalize_online(raw);
        Ok(value)
    }
}
