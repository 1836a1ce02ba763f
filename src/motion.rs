//! Motorized stage control.
//!
//! The scanner moves a light fibre over the PMT surface with three linear
//! axes. [`MotorDriver`] is the narrow hardware seam (one implementation per
//! vendor protocol, plus the simulated stage in [`crate::sim`]);
//! [`PositionController`] owns a driver and maps scan-plane polar positions
//! onto axis targets, applying the calibrated centre offset, the bulb
//! curvature height correction and the travel-limit checks.
//!
//! All driver calls are wrapped in the configured move timeout; an elapsed
//! timeout surfaces as a motion error, which is fatal to the session.

use crate::config::MotorsConfig;
use crate::core::{Axis, Position};
use crate::error::{ScanError, ScanResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Low-level interface to one three-axis motor bench.
///
/// Implementations perform the vendor I/O for a single move or position
/// query. They do not validate targets against the scan geometry; the
/// [`PositionController`] has already done that when a call arrives.
///
/// # Errors
///
/// Implementations report stage faults as [`ScanError::Motion`]. A fault
/// leaves the physical position uncertain, so callers never retry
/// automatically.
#[async_trait]
pub trait MotorDriver: Send {
    /// Move one axis to an absolute position in mm and wait until it settles.
    async fn move_to(&mut self, axis: Axis, target_mm: f64) -> ScanResult<()>;

    /// Read back the current absolute position of one axis in mm.
    async fn position(&mut self, axis: Axis) -> ScanResult<f64>;
}

/// Height correction for the curved bulb surface, keyed by scan radius.
///
/// The fibre must stay at a constant distance from the glass, so the focus
/// axis follows the bulb profile: `z = height + dz(radius)`. Tables come from
/// the `curvature_tables` configuration map and are interpolated linearly,
/// clamped at both ends. The `"default"` mapping is the identity (flat
/// window).
#[derive(Clone, Debug)]
pub enum CurvatureMap {
    /// No height correction.
    Identity,
    /// Piecewise-linear `(radius_mm, dz_mm)` profile.
    Table(Vec<(f64, f64)>),
}

impl CurvatureMap {
    /// Resolve the mapping named in the motors configuration.
    ///
    /// # Errors
    ///
    /// Returns a motion error if the named table is missing; configuration
    /// validation normally catches this earlier.
    pub fn from_config(motors: &MotorsConfig) -> ScanResult<Self> {
        if motors.pmt_curvature_mapping == "default" {
            return Ok(CurvatureMap::Identity);
        }
        let table = motors
            .curvature_tables
            .get(&motors.pmt_curvature_mapping)
            .ok_or_else(|| {
                ScanError::motion(format!(
                    "curvature table '{}' not configured",
                    motors.pmt_curvature_mapping
                ))
            })?;
        Ok(CurvatureMap::Table(
            table.iter().map(|row| (row[0], row[1])).collect(),
        ))
    }

    /// Height correction in mm at the given scan radius.
    pub fn dz(&self, radius: f64) -> f64 {
        match self {
            CurvatureMap::Identity => 0.0,
            CurvatureMap::Table(rows) => {
                if rows.is_empty() {
                    return 0.0;
                }
                let first = rows[0];
                let last = rows[rows.len() - 1];
                if radius <= first.0 {
                    return first.1;
                }
                if radius >= last.0 {
                    return last.1;
                }
                for pair in rows.windows(2) {
                    let (r0, dz0) = pair[0];
                    let (r1, dz1) = pair[1];
                    if radius <= r1 {
                        let t = (radius - r0) / (r1 - r0);
                        return crate::core::lerp(dz0, dz1, t);
                    }
                }
                last.1
            }
        }
    }
}

/// Maps scan-plane positions onto stage axis targets and executes moves.
///
/// The scan plane is polar around the PMT centre. The controller translates a
/// [`Position`] into stage coordinates as
///
/// ```text
/// x = origin_x + offset_x + r·cos(θ)
/// y = origin_y + offset_y + r·sin(θ)
/// z = height   + dz(r)
/// ```
///
/// where `origin` is the configured nominal centre, `offset` is the result of
/// the centre-finding calibration and `dz` the bulb curvature correction.
pub struct PositionController {
    driver: Box<dyn MotorDriver>,
    curvature: CurvatureMap,
    origin: (f64, f64),
    offset: (f64, f64),
    travel: (f64, f64),
    move_timeout: Duration,
}

impl PositionController {
    /// Build a controller over a connected driver.
    ///
    /// # Errors
    ///
    /// Fails if the configured curvature mapping cannot be resolved.
    pub fn new(driver: Box<dyn MotorDriver>, motors: &MotorsConfig) -> ScanResult<Self> {
        let curvature = CurvatureMap::from_config(motors)?;
        Ok(PositionController {
            driver,
            curvature,
            origin: (motors.scan_origin[0], motors.scan_origin[1]),
            offset: (0.0, 0.0),
            travel: (motors.travel_min, motors.travel_max),
            move_timeout: Duration::from_millis(motors.move_timeout_ms),
        })
    }

    /// Apply the centre offset found by calibration. Subsequent moves are
    /// relative to the corrected centre.
    pub fn set_centre_offset(&mut self, x_offset: f64, y_offset: f64) {
        debug!(x_offset, y_offset, "applying centre offset");
        self.offset = (x_offset, y_offset);
    }

    /// Stage-frame axis targets for a scan position.
    pub fn stage_target(&self, position: &Position) -> (f64, f64, f64) {
        let (dx, dy) = position.to_cartesian();
        let x = self.origin.0 + self.offset.0 + dx;
        let y = self.origin.1 + self.offset.1 + dy;
        let z = position.height + self.curvature.dz(position.radius);
        (x, y, z)
    }

    /// Whether a scan position maps inside the travel limits on all axes.
    pub fn within_travel(&self, position: &Position) -> bool {
        let (x, y, z) = self.stage_target(position);
        [x, y, z]
            .iter()
            .all(|v| *v >= self.travel.0 && *v <= self.travel.1)
    }

    /// Move all three axes to a scan position.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Motion`] when the target violates a travel limit,
    /// when the driver reports a fault, or when a single-axis move exceeds the
    /// move timeout.
    pub async fn move_to(&mut self, position: &Position) -> ScanResult<()> {
        let (x, y, z) = self.stage_target(position);
        for (axis, target) in [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)] {
            if target < self.travel.0 || target > self.travel.1 {
                return Err(ScanError::motion(format!(
                    "target {:.3} mm out of range [{:.1}, {:.1}] for axis {}",
                    target, self.travel.0, self.travel.1, axis
                )));
            }
        }
        debug!(
            r = position.radius,
            phi = position.angle,
            x,
            y,
            z,
            "moving stage"
        );
        for (axis, target) in [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)] {
            tokio::time::timeout(self.move_timeout, self.driver.move_to(axis, target))
                .await
                .map_err(|_| {
                    ScanError::motion(format!(
                        "axis {} move to {:.3} mm timed out after {} ms",
                        axis,
                        target,
                        self.move_timeout.as_millis()
                    ))
                })??;
        }
        Ok(())
    }

    /// Read back the current stage position `(x, y, z)` in mm.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Motion`] on a driver fault or query timeout.
    pub async fn current_position(&mut self) -> ScanResult<(f64, f64, f64)> {
        let mut out = [0.0f64; 3];
        for axis in Axis::ALL {
            out[axis.index()] = tokio::time::timeout(self.move_timeout, self.driver.position(axis))
                .await
                .map_err(|_| {
                    ScanError::motion(format!(
                        "axis {} position query timed out after {} ms",
                        axis,
                        self.move_timeout.as_millis()
                    ))
                })??;
        }
        Ok((out[0], out[1], out[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every move; optionally fails, optionally hangs.
    struct TestDriver {
        targets: Arc<Mutex<Vec<(Axis, f64)>>>,
        fail: bool,
        hang: bool,
    }

    impl TestDriver {
        fn new(targets: Arc<Mutex<Vec<(Axis, f64)>>>) -> Self {
            TestDriver {
                targets,
                fail: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl MotorDriver for TestDriver {
        async fn move_to(&mut self, axis: Axis, target_mm: f64) -> ScanResult<()> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(ScanError::motion(format!("axis {axis} stalled")));
            }
            self.targets.lock().unwrap().push((axis, target_mm));
            Ok(())
        }

        async fn position(&mut self, axis: Axis) -> ScanResult<f64> {
            let targets = self.targets.lock().unwrap();
            Ok(targets
                .iter()
                .rev()
                .find(|t| t.0 == axis)
                .map_or(0.0, |t| t.1))
        }
    }

    fn motors_config() -> MotorsConfig {
        MotorsConfig {
            scan_origin: [51.0, 51.0],
            ..MotorsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_move_maps_polar_to_stage_frame() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let driver = TestDriver::new(targets.clone());
        let mut ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        ctl.move_to(&Position::new(10.0, 0.0, 55.0)).await.unwrap();
        let recorded = targets.lock().unwrap().clone();
        assert_eq!(recorded.len(), 3);
        assert!((recorded[0].1 - 61.0).abs() < 1e-9); // x = 51 + 10
        assert!((recorded[1].1 - 51.0).abs() < 1e-9); // y = 51 + 0
        assert!((recorded[2].1 - 55.0).abs() < 1e-9); // z = height, flat map
    }

    #[tokio::test]
    async fn test_centre_offset_shifts_targets() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let driver = TestDriver::new(targets.clone());
        let mut ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        ctl.set_centre_offset(-1.5, 2.0);
        ctl.move_to(&Position::new(0.0, 0.0, 55.0)).await.unwrap();
        let recorded = targets.lock().unwrap().clone();
        assert!((recorded[0].1 - 49.5).abs() < 1e-9);
        assert!((recorded[1].1 - 53.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_out_of_travel_target_is_motion_error() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let driver = TestDriver::new(targets.clone());
        let mut ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        // origin 51 + 60 > travel_max 102
        let err = ctl
            .move_to(&Position::new(60.0, 0.0, 55.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Motion(_)));
        assert!(err.to_string().contains("out of range"));
        assert!(targets.lock().unwrap().is_empty(), "no axis may have moved");
    }

    #[tokio::test]
    async fn test_position_read_back() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let driver = TestDriver::new(targets);
        let mut ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        ctl.move_to(&Position::new(10.0, 0.0, 55.0)).await.unwrap();
        let (x, y, z) = ctl.current_position().await.unwrap();
        assert!((x - 61.0).abs() < 1e-9);
        assert!((y - 51.0).abs() < 1e-9);
        assert!((z - 55.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_within_travel_check() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let driver = TestDriver::new(targets);
        let ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        assert!(ctl.within_travel(&Position::new(41.0, 180.0, 55.0)));
        assert!(!ctl.within_travel(&Position::new(60.0, 0.0, 55.0)));
    }

    #[tokio::test]
    async fn test_driver_fault_propagates() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let mut driver = TestDriver::new(targets);
        driver.fail = true;
        let mut ctl = PositionController::new(Box::new(driver), &motors_config()).unwrap();

        let err = ctl
            .move_to(&Position::new(1.0, 0.0, 55.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stalled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_timeout_is_motion_error() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let mut driver = TestDriver::new(targets);
        driver.hang = true;
        let mut cfg = motors_config();
        cfg.move_timeout_ms = 50;
        let mut ctl = PositionController::new(Box::new(driver), &cfg).unwrap();

        let err = ctl
            .move_to(&Position::new(1.0, 0.0, 55.0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_curvature_interpolates_and_clamps() {
        let map = CurvatureMap::Table(vec![(0.0, 0.0), (20.0, 1.0), (40.0, 5.0)]);
        assert_eq!(map.dz(-3.0), 0.0);
        assert!((map.dz(10.0) - 0.5).abs() < 1e-12);
        assert!((map.dz(30.0) - 3.0).abs() < 1e-12);
        assert_eq!(map.dz(60.0), 5.0);
        assert_eq!(CurvatureMap::Identity.dz(25.0), 0.0);
    }

    #[test]
    fn test_curvature_from_config_resolves_named_table() {
        let mut motors = motors_config();
        motors.pmt_curvature_mapping = "r12354".into();
        motors
            .curvature_tables
            .insert("r12354".into(), vec![[0.0, 0.0], [40.0, 4.0]]);
        let map = CurvatureMap::from_config(&motors).unwrap();
        assert!((map.dz(20.0) - 2.0).abs() < 1e-12);

        motors.pmt_curvature_mapping = "missing".into();
        assert!(CurvatureMap::from_config(&motors).is_err());
    }
}
