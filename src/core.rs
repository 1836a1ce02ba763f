//! Core data types shared across the scanner.
//!
//! Everything here is a plain value: positions in the scan plane, finalized
//! readings, acquisition time windows and the completion status of a run.
//! The types are serde-serializable so the binary layer can export them
//! without conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One motorized stage axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal axis of the scan plane.
    X,
    /// Vertical axis of the scan plane.
    Y,
    /// Focus axis, perpendicular to the scan plane.
    Z,
}

impl Axis {
    /// All axes in controller order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index of this axis into the serial-port list and driver arrays.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
        }
    }
}

/// A scan-plane position in polar coordinates, plus the session focus height.
///
/// Radius and angle are relative to the nominal scan origin; the centre offset
/// found by calibration is applied by the position controller, not stored
/// here. Invariants: `radius >= 0`, `angle` in `[0, 360)`. Both are enforced
/// by [`Position::new`], which maps a negative radius onto the opposite ray.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Radial distance from the scan origin, in mm.
    pub radius: f64,
    /// Polar angle in degrees, normalized to `[0, 360)`.
    pub angle: f64,
    /// Focus height in mm, fixed per session.
    pub height: f64,
}

impl Position {
    /// Build a position, normalizing the invariants.
    ///
    /// A negative radius is folded onto the opposite ray
    /// (`(-r, a)` becomes `(r, a + 180)`), and the angle is wrapped into
    /// `[0, 360)`.
    pub fn new(radius: f64, angle: f64, height: f64) -> Self {
        let (radius, angle) = if radius < 0.0 {
            (-radius, angle + 180.0)
        } else {
            (radius, angle)
        };
        Position {
            radius,
            angle: angle.rem_euclid(360.0),
            height,
        }
    }

    /// Cartesian projection `(x, y)` of the polar coordinates, in mm.
    pub fn to_cartesian(&self) -> (f64, f64) {
        let phi = self.angle.to_radians();
        (self.radius * phi.cos(), self.radius * phi.sin())
    }

    /// Build a position from Cartesian scan-plane coordinates.
    pub fn from_cartesian(x: f64, y: f64, height: f64) -> Self {
        let radius = (x * x + y * y).sqrt();
        let angle = y.atan2(x).to_degrees();
        Position::new(radius, angle, height)
    }
}

/// An open time interval over a waveform's time axis, in nanoseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (exclusive), ns.
    pub tmin: f64,
    /// Window end (exclusive), ns.
    pub tmax: f64,
}

impl TimeWindow {
    /// Build a window. Bounds are validated at configuration time.
    pub fn new(tmin: f64, tmax: f64) -> Self {
        TimeWindow { tmin, tmax }
    }

    /// Whether time `t` (ns) lies inside the window.
    pub fn contains(&self, t: f64) -> bool {
        t > self.tmin && t < self.tmax
    }
}

/// One finalized acquisition result.
///
/// Immutable after creation: primary readings are built by the reference
/// normalizer once their drift bracket closes, reference readings at the
/// moment of the reference measurement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Drift-corrected value. Equals `raw` for reference readings.
    pub value: f64,
    /// Uncorrected value as delivered by the acquisition backend.
    pub raw: f64,
    /// True for reference-channel measurements.
    pub is_reference: bool,
    /// True when reference fallback or the retry budget was involved.
    pub degraded: bool,
    /// Stage position at acquisition time.
    pub position: Position,
    /// Acquisition timestamp (UTC).
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Build a reference-channel reading. Reference values are never
    /// drift-corrected, so `value == raw`.
    pub fn reference(value: f64, position: Position) -> Self {
        Reading {
            value,
            raw: value,
            is_reference: true,
            degraded: false,
            position,
            timestamp: Utc::now(),
        }
    }

    /// Build a primary-channel reading fresh off the acquisition backend.
    /// `value` equals `raw` until the reference normalizer finalizes it.
    pub fn sample(raw: f64, position: Position) -> Self {
        Reading {
            value: raw,
            raw,
            is_reference: false,
            degraded: false,
            position,
            timestamp: Utc::now(),
        }
    }
}

/// How a grid run ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Completion {
    /// Every planned position was visited (or deliberately skipped).
    Complete,
    /// The run stopped early; partial readings were kept.
    Aborted {
        /// Human-readable cause, e.g. the motion fault that stopped the run.
        reason: String,
    },
}

impl Completion {
    /// Abort with a cause.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Completion::Aborted {
            reason: reason.into(),
        }
    }

    /// True only for [`Completion::Complete`].
    pub fn is_complete(&self) -> bool {
        matches!(self, Completion::Complete)
    }
}

/// Linear interpolation between `a` and `b` at parameter `t` in `[0, 1]`.
pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
