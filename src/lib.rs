//! Core library for the PMT surface scanner.
//!
//! This library contains the scan-plane geometry, the motion and acquisition
//! driver seams, drift normalization against a reference detector, and the
//! two scan pipelines: centre-finding calibration and polar grid
//! acquisition. It is used by the command-line binary and the integration
//! tests; a simulated bench stands in for the real hardware in both.

pub mod config;
pub mod core;
pub mod daq;
pub mod error;
pub mod motion;
pub mod scan;
pub mod sim;
