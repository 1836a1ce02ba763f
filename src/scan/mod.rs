//! Scan pipeline: centre calibration and grid acquisition.
//!
//! Assembled leaf-first:
//!
//! - [`reference`]: interleaved reference scheduling and drift normalization.
//! - [`profile`]: the two-phase radial walk producing one intensity profile
//!   per angular ray.
//! - [`fit`]: the least-squares circle fit over detected edge points.
//! - [`centre`]: orchestrates profiles over all rays into a centre estimate.
//! - [`grid`]: the production polar grid sweep around the found centre.
//! - [`session`]: exclusive owner of the hardware handles and entry point for
//!   both runs.

pub mod centre;
pub mod fit;
pub mod grid;
pub mod profile;
pub mod reference;
pub mod session;

pub use centre::{CalibrationOutcome, CentreFinder};
pub use fit::{fit_circle, CentreEstimate, EdgePoint};
pub use grid::{GridPlan, GridScanOutcome, GridScanner, RingDensityPattern, ScanPattern};
pub use profile::{ProfileSample, ProfileScanner, RadialProfile};
pub use reference::ReferenceNormalizer;
pub use session::{CancelToken, ScanSession};
