//! Least-squares circle fit over detected edge points.
//!
//! The bulb rim is located as one edge radius per angular ray; fitting a
//! circle through those points yields the centre offset the grid scan will
//! apply, the fitted rim radius, and a residual figure for fit quality.
//!
//! The fit linearizes the circle equation (the algebraic, Kasa form): with
//! `x² + y² = 2·x₀·x + 2·y₀·y + c` the unknowns enter linearly and one
//! least-squares solve yields centre and radius. Points are shifted to their
//! centroid and scaled before the solve, which keeps the system conditioned
//! for rims far from the scan origin.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Where one radial profile crossed the edge threshold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgePoint {
    /// Ray angle in the scan plane, degrees.
    pub angle: f64,
    /// Crossing radius along the ray, mm.
    pub radius: f64,
}

impl EdgePoint {
    /// Cartesian scan-plane coordinates of the crossing.
    pub fn to_cartesian(&self) -> (f64, f64) {
        let rad = self.angle.to_radians();
        (self.radius * rad.cos(), self.radius * rad.sin())
    }
}

/// Result of the circle fit: the PMT centre relative to the scan origin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CentreEstimate {
    /// Centre offset along x, mm.
    pub x_offset: f64,
    /// Centre offset along y, mm.
    pub y_offset: f64,
    /// Fitted rim radius, mm.
    pub fitted_radius: f64,
    /// Root-mean-square of the radial residuals, mm.
    pub residual_rms: f64,
}

/// Fit a circle through the edge points, minimizing the linearized algebraic
/// error.
///
/// # Errors
///
/// Returns [`ScanError::InsufficientData`] for fewer than 3 points, or for a
/// degenerate set (coincident or collinear points) that does not determine a
/// circle.
pub fn fit_circle(points: &[EdgePoint]) -> ScanResult<CentreEstimate> {
    let n = points.len();
    if n < 3 {
        return Err(ScanError::InsufficientData(format!(
            "circle fit needs at least 3 edge points, got {n}"
        )));
    }

    let cartesian: Vec<(f64, f64)> = points.iter().map(EdgePoint::to_cartesian).collect();

    // Shift to the centroid and scale to mean distance sqrt(2).
    let inv_n = 1.0 / n as f64;
    let mx = cartesian.iter().map(|p| p.0).sum::<f64>() * inv_n;
    let my = cartesian.iter().map(|p| p.1).sum::<f64>() * inv_n;
    let mean_dist = cartesian
        .iter()
        .map(|p| ((p.0 - mx).powi(2) + (p.1 - my).powi(2)).sqrt())
        .sum::<f64>()
        * inv_n;
    if mean_dist < 1e-12 {
        return Err(ScanError::InsufficientData(
            "edge points are coincident".into(),
        ));
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;

    // Design matrix rows [2x, 2y, 1] against x² + y² in normalized coords.
    let mut design = DMatrix::<f64>::zeros(n, 3);
    let mut rhs = DVector::<f64>::zeros(n);
    for (i, &(px, py)) in cartesian.iter().enumerate() {
        let x = (px - mx) * scale;
        let y = (py - my) * scale;
        design[(i, 0)] = 2.0 * x;
        design[(i, 1)] = 2.0 * y;
        design[(i, 2)] = 1.0;
        rhs[i] = x * x + y * y;
    }

    let svd = design.svd(true, true);
    if svd.rank(1e-9) < 3 {
        return Err(ScanError::InsufficientData(
            "edge points are collinear, no unique circle".into(),
        ));
    }
    let solution = svd
        .solve(&rhs, 1e-12)
        .map_err(|msg| ScanError::InsufficientData(format!("circle fit failed: {msg}")))?;

    let (cx, cy, c) = (solution[0], solution[1], solution[2]);
    let radius_norm = (c + cx * cx + cy * cy).max(0.0).sqrt();

    let x_offset = mx + cx / scale;
    let y_offset = my + cy / scale;
    let fitted_radius = radius_norm / scale;

    // Geometric residuals back in the unscaled frame.
    let residual_sq = cartesian
        .iter()
        .map(|p| {
            let dist = ((p.0 - x_offset).powi(2) + (p.1 - y_offset).powi(2)).sqrt();
            (dist - fitted_radius).powi(2)
        })
        .sum::<f64>()
        * inv_n;

    Ok(CentreEstimate {
        x_offset,
        y_offset,
        fitted_radius,
        residual_rms: residual_sq.sqrt(),
    })
}
