//! Scanner configuration using Figment.
//!
//! Strongly-typed configuration for a scan session, loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `PMT_SCAN_` (overrides)
//!
//! Section and key names follow the bench's measurement configuration
//! (`cfg_motors`, `cfg_statistics`, `cfg_DAQ`, `cfg_grid`,
//! `cfg_centre_finder`, `cfg_paths`).
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated with a double underscore:
//!
//! ```text
//! PMT_SCAN_CFG_GRID__R_MAX=41
//! PMT_SCAN_CFG_STATISTICS__REFERENCE_PERIOD=20
//! ```
//!
//! # Example
//!
//! ```toml
//! [cfg_motors]
//! COM_motors = ["COM9", "COM10", "COM11"]
//! scan_origin = [51.0, 51.0]
//! z_at_PMT_centre = 55.0
//! PMT_curvature_mapping = "default"
//!
//! [cfg_statistics]
//! readouts_per_position = 10
//! reference_period = 30
//!
//! [cfg_DAQ.picoscope]
//! sampling_interval = 0.8e-9
//! baseline_tmin = 0.0
//! baseline_tmax = 30.0
//! primary_channel = "A"
//! reference_channel = "B"
//!
//! [cfg_grid]
//! r_max = 41.0
//! r_step = 1.25
//!
//! [cfg_centre_finder]
//! ang_step = 45.0
//! profile_r_start = 50.0
//! profile_r_stop = 20.0
//! coarse_step = 5.0
//! fine_step = 0.5
//! PMT_bulb_radius = 40.0
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File/env extraction failed.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// Values parsed but are logically invalid.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Top-level scan configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Motorized stage settings.
    #[serde(rename = "cfg_motors", default)]
    pub motors: MotorsConfig,
    /// Averaging and reference scheduling.
    #[serde(rename = "cfg_statistics", default)]
    pub statistics: StatisticsConfig,
    /// Acquisition backend selection and parameters.
    #[serde(rename = "cfg_DAQ", default)]
    pub daq: DaqConfig,
    /// Grid plan extent and resolution.
    #[serde(rename = "cfg_grid", default)]
    pub grid: GridConfig,
    /// Centre-finder and radial-profile parameters.
    #[serde(rename = "cfg_centre_finder", default)]
    pub centre_finder: CentreFinderConfig,
    /// Artifact output paths used by the binary.
    #[serde(rename = "cfg_paths", default)]
    pub paths: PathsConfig,
}

/// Motorized stage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorsConfig {
    /// Serial ports bound to the X, Y, Z axes, in that order.
    #[serde(rename = "COM_motors", default = "default_com_motors")]
    pub com_motors: Vec<String>,
    /// Stage-frame `[x, y]` of the nominal PMT centre, mm. The calibrated
    /// offset is added on top of this.
    #[serde(default = "default_scan_origin")]
    pub scan_origin: [f64; 2],
    /// Fixed focus height for the scan session, mm.
    #[serde(rename = "z_at_PMT_centre", default = "default_z_at_pmt_centre")]
    pub z_at_pmt_centre: f64,
    /// Name of the curvature lookup table correcting height vs radius;
    /// `"default"` selects the identity mapping.
    #[serde(rename = "PMT_curvature_mapping", default = "default_curvature_mapping")]
    pub pmt_curvature_mapping: String,
    /// Named curvature tables: rows of `[radius_mm, dz_mm]` with strictly
    /// increasing radius.
    #[serde(default)]
    pub curvature_tables: HashMap<String, Vec<[f64; 2]>>,
    /// Lower travel limit common to all axes, mm.
    #[serde(default = "default_travel_min")]
    pub travel_min: f64,
    /// Upper travel limit common to all axes, mm.
    #[serde(default = "default_travel_max")]
    pub travel_max: f64,
    /// Per-move timeout, milliseconds.
    #[serde(default = "default_move_timeout_ms")]
    pub move_timeout_ms: u64,
}

impl Default for MotorsConfig {
    fn default() -> Self {
        MotorsConfig {
            com_motors: default_com_motors(),
            scan_origin: default_scan_origin(),
            z_at_pmt_centre: default_z_at_pmt_centre(),
            pmt_curvature_mapping: default_curvature_mapping(),
            curvature_tables: HashMap::new(),
            travel_min: default_travel_min(),
            travel_max: default_travel_max(),
            move_timeout_ms: default_move_timeout_ms(),
        }
    }
}

/// Averaging and reference scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// Acquisition calls averaged into one grid-point value.
    #[serde(default = "default_readouts_per_position")]
    pub readouts_per_position: u32,
    /// Grid points between interleaved reference measurements.
    #[serde(default = "default_reference_period")]
    pub reference_period: u32,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        StatisticsConfig {
            readouts_per_position: default_readouts_per_position(),
            reference_period: default_reference_period(),
        }
    }
}

/// Acquisition backend selection. Exactly one of the two variant tables must
/// be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Per-read timeout, milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Oscilloscope (waveform) backend parameters.
    #[serde(default)]
    pub picoscope: Option<PicoscopeConfig>,
    /// Picoammeter (current meter) backend parameters.
    #[serde(default)]
    pub picoamp: Option<PicoampConfig>,
}

impl Default for DaqConfig {
    fn default() -> Self {
        DaqConfig {
            read_timeout_ms: default_read_timeout_ms(),
            picoscope: None,
            picoamp: None,
        }
    }
}

/// Waveform backend parameters. Time windows are in nanoseconds over the
/// trace's time axis; the sampling interval is in seconds as the scope driver
/// expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicoscopeConfig {
    /// Requested sampling interval, seconds. Hardware snaps to the nearest
    /// supported value; analysis uses the actual interval the trace reports.
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval: f64,
    /// Primary-channel baseline window start, ns.
    #[serde(default = "default_baseline_tmin")]
    pub baseline_tmin: f64,
    /// Primary-channel baseline window end, ns.
    #[serde(default = "default_baseline_tmax")]
    pub baseline_tmax: f64,
    /// Half-width of the pulse integration window around the peak, ns.
    #[serde(default = "default_pulse_halfwidth")]
    pub pulse_halfwidth: f64,
    /// Reference-channel baseline window start, ns.
    #[serde(default = "default_reference_baseline_tmin")]
    pub reference_baseline_tmin: f64,
    /// Reference-channel baseline window end, ns.
    #[serde(default = "default_reference_baseline_tmax")]
    pub reference_baseline_tmax: f64,
    /// Reference-channel signal window start, ns.
    #[serde(default = "default_reference_signal_tmin")]
    pub reference_signal_tmin: f64,
    /// Reference-channel signal window end, ns.
    #[serde(default = "default_reference_signal_tmax")]
    pub reference_signal_tmax: f64,
    /// Scope channel carrying the scanned PMT ("A".."D").
    #[serde(default = "default_primary_scope_channel")]
    pub primary_channel: String,
    /// Scope channel carrying the reference PMT ("A".."D").
    #[serde(default = "default_reference_scope_channel")]
    pub reference_channel: String,
}

impl Default for PicoscopeConfig {
    fn default() -> Self {
        PicoscopeConfig {
            sampling_interval: default_sampling_interval(),
            baseline_tmin: default_baseline_tmin(),
            baseline_tmax: default_baseline_tmax(),
            pulse_halfwidth: default_pulse_halfwidth(),
            reference_baseline_tmin: default_reference_baseline_tmin(),
            reference_baseline_tmax: default_reference_baseline_tmax(),
            reference_signal_tmin: default_reference_signal_tmin(),
            reference_signal_tmax: default_reference_signal_tmax(),
            primary_channel: default_primary_scope_channel(),
            reference_channel: default_reference_scope_channel(),
        }
    }
}

/// Current-meter backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PicoampConfig {
    /// Serial port of the picoammeter.
    #[serde(rename = "COM", default = "default_picoamp_com")]
    pub com: String,
    /// Raw current samples averaged per read.
    #[serde(default = "default_count_per_read")]
    pub count_per_read: u32,
    /// Meter channel carrying the scanned PMT.
    #[serde(default)]
    pub primary_channel: u8,
    /// Meter channel carrying the reference detector.
    #[serde(default = "default_reference_meter_channel")]
    pub reference_channel: u8,
}

impl Default for PicoampConfig {
    fn default() -> Self {
        PicoampConfig {
            com: default_picoamp_com(),
            count_per_read: default_count_per_read(),
            primary_channel: 0,
            reference_channel: default_reference_meter_channel(),
        }
    }
}

/// Grid plan extent and resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Largest ring radius, mm.
    #[serde(default = "default_r_max")]
    pub r_max: f64,
    /// Radial spacing between rings, mm.
    #[serde(default = "default_r_step")]
    pub r_step: f64,
    /// Target arc length between neighbouring points on a ring, mm. Sets the
    /// angular density of the shipped scan pattern.
    #[serde(default = "default_arc_step")]
    pub arc_step: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            r_max: default_r_max(),
            r_step: default_r_step(),
            arc_step: default_arc_step(),
        }
    }
}

/// Centre-finder and radial-profile parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentreFinderConfig {
    /// Angular spacing of calibration rays, degrees.
    #[serde(default = "default_ang_step")]
    pub ang_step: f64,
    /// Radial walk start, mm.
    #[serde(default = "default_profile_r_start")]
    pub profile_r_start: f64,
    /// Radial walk stop, mm. Start above stop means the walk moves inward.
    #[serde(default = "default_profile_r_stop")]
    pub profile_r_stop: f64,
    /// Step size before the edge is detected, mm.
    #[serde(default = "default_coarse_step")]
    pub coarse_step: f64,
    /// Step size after the edge is detected, mm.
    #[serde(default = "default_fine_step")]
    pub fine_step: f64,
    /// Nominal bulb radius, mm; sanity bound for the fitted circle.
    #[serde(rename = "PMT_bulb_radius", default = "default_pmt_bulb_radius")]
    pub pmt_bulb_radius: f64,
    /// Edge threshold as a multiple of the outside-bulb plateau level.
    #[serde(default = "default_threshold_factor")]
    pub threshold_factor: f64,
    /// Samples used to estimate a plateau (outside baseline and inside stop).
    #[serde(default = "default_plateau_samples")]
    pub plateau_samples: usize,
    /// Relative spread below which consecutive fine samples count as a
    /// plateau.
    #[serde(default = "default_plateau_tolerance")]
    pub plateau_tolerance: f64,
    /// Retain every radial profile in the calibration outcome.
    #[serde(default)]
    pub save_all_profiles: bool,
}

impl Default for CentreFinderConfig {
    fn default() -> Self {
        CentreFinderConfig {
            ang_step: default_ang_step(),
            profile_r_start: default_profile_r_start(),
            profile_r_stop: default_profile_r_stop(),
            coarse_step: default_coarse_step(),
            fine_step: default_fine_step(),
            pmt_bulb_radius: default_pmt_bulb_radius(),
            threshold_factor: default_threshold_factor(),
            plateau_samples: default_plateau_samples(),
            plateau_tolerance: default_plateau_tolerance(),
            save_all_profiles: false,
        }
    }
}

/// Artifact output paths used by the binary layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where the calibration outcome is written (JSON).
    #[serde(default = "default_centre_file")]
    pub centre_file: PathBuf,
    /// Where the grid-scan outcome is written (JSON).
    #[serde(default = "default_readings_file")]
    pub readings_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            centre_file: default_centre_file(),
            readings_file: default_readings_file(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_com_motors() -> Vec<String> {
    vec!["COM9".into(), "COM10".into(), "COM11".into()]
}

fn default_scan_origin() -> [f64; 2] {
    [51.0, 51.0]
}

fn default_z_at_pmt_centre() -> f64 {
    55.0
}

fn default_curvature_mapping() -> String {
    "default".into()
}

fn default_travel_min() -> f64 {
    0.0
}

fn default_travel_max() -> f64 {
    102.0
}

fn default_move_timeout_ms() -> u64 {
    30_000
}

fn default_readouts_per_position() -> u32 {
    10
}

fn default_reference_period() -> u32 {
    30
}

fn default_read_timeout_ms() -> u64 {
    5_000
}

fn default_sampling_interval() -> f64 {
    0.8e-9
}

fn default_baseline_tmin() -> f64 {
    0.0
}

fn default_baseline_tmax() -> f64 {
    30.0
}

fn default_pulse_halfwidth() -> f64 {
    15.0
}

fn default_reference_baseline_tmin() -> f64 {
    0.0
}

fn default_reference_baseline_tmax() -> f64 {
    30.0
}

fn default_reference_signal_tmin() -> f64 {
    60.0
}

fn default_reference_signal_tmax() -> f64 {
    90.0
}

fn default_primary_scope_channel() -> String {
    "A".into()
}

fn default_reference_scope_channel() -> String {
    "B".into()
}

fn default_picoamp_com() -> String {
    "COM13".into()
}

fn default_count_per_read() -> u32 {
    10
}

fn default_reference_meter_channel() -> u8 {
    1
}

fn default_r_max() -> f64 {
    41.0
}

fn default_r_step() -> f64 {
    1.25
}

fn default_arc_step() -> f64 {
    2.5
}

fn default_ang_step() -> f64 {
    45.0
}

fn default_profile_r_start() -> f64 {
    50.0
}

fn default_profile_r_stop() -> f64 {
    20.0
}

fn default_coarse_step() -> f64 {
    5.0
}

fn default_fine_step() -> f64 {
    0.5
}

fn default_pmt_bulb_radius() -> f64 {
    40.0
}

fn default_threshold_factor() -> f64 {
    3.0
}

fn default_plateau_samples() -> usize {
    3
}

fn default_plateau_tolerance() -> f64 {
    0.1
}

fn default_centre_file() -> PathBuf {
    PathBuf::from("artifacts/centre_estimate.json")
}

fn default_readings_file() -> PathBuf {
    PathBuf::from("artifacts/grid_readings.json")
}

/// Map a scope channel letter to its driver index.
pub(crate) fn scope_channel_index(channel: &str) -> Option<u8> {
    match channel {
        "A" => Some(0),
        "B" => Some(1),
        "C" => Some(2),
        "D" => Some(3),
        _ => None,
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl ScanConfig {
    /// Load configuration from the default path and environment variables.
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`PMT_SCAN_` prefix)
    /// 2. `config/scan.toml`
    ///
    /// After loading, the configuration is validated.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be loaded or validation
    /// fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config/scan.toml")
    }

    /// Load configuration from a specific file path plus environment
    /// overrides.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file (relative or absolute)
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be loaded or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("PMT_SCAN_").split("__"))
            .extract()
            .map_err(ConfigError::Load)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration after loading.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError::Validation`] with a descriptive message for
    /// any failed rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_motors()?;
        self.validate_statistics()?;
        self.validate_daq()?;
        self.validate_grid()?;
        self.validate_centre_finder()?;
        Ok(())
    }

    fn validate_motors(&self) -> Result<(), ConfigError> {
        let m = &self.motors;
        if m.com_motors.len() != 3 {
            return Err(ConfigError::Validation(format!(
                "COM_motors must list exactly 3 serial ports (one per axis), got {}",
                m.com_motors.len()
            )));
        }
        if m.travel_min >= m.travel_max {
            return Err(ConfigError::Validation(format!(
                "travel_min {} must be below travel_max {}",
                m.travel_min, m.travel_max
            )));
        }
        for (axis, v) in ["x", "y"].iter().zip(m.scan_origin) {
            if v < m.travel_min || v > m.travel_max {
                return Err(ConfigError::Validation(format!(
                    "scan_origin {axis} = {v} outside travel range [{}, {}]",
                    m.travel_min, m.travel_max
                )));
            }
        }
        if m.z_at_pmt_centre < m.travel_min || m.z_at_pmt_centre > m.travel_max {
            return Err(ConfigError::Validation(format!(
                "z_at_PMT_centre {} outside travel range [{}, {}]",
                m.z_at_pmt_centre, m.travel_min, m.travel_max
            )));
        }
        if m.move_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "move_timeout_ms must be > 0".into(),
            ));
        }
        if m.pmt_curvature_mapping != "default" {
            let table = m.curvature_tables.get(&m.pmt_curvature_mapping).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "PMT_curvature_mapping '{}' has no matching entry in curvature_tables",
                    m.pmt_curvature_mapping
                ))
            })?;
            if table.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "curvature table '{}' is empty",
                    m.pmt_curvature_mapping
                )));
            }
            let mut last_r = f64::NEG_INFINITY;
            for row in table {
                if row[0] < 0.0 || row[0] <= last_r {
                    return Err(ConfigError::Validation(format!(
                        "curvature table '{}' rows must have non-negative, strictly increasing radius",
                        m.pmt_curvature_mapping
                    )));
                }
                last_r = row[0];
            }
        }
        Ok(())
    }

    fn validate_statistics(&self) -> Result<(), ConfigError> {
        if self.statistics.readouts_per_position == 0 {
            return Err(ConfigError::Validation(
                "readouts_per_position must be >= 1".into(),
            ));
        }
        if self.statistics.reference_period == 0 {
            return Err(ConfigError::Validation(
                "reference_period must be >= 1".into(),
            ));
        }
        Ok(())
    }

    fn validate_daq(&self) -> Result<(), ConfigError> {
        let d = &self.daq;
        if d.read_timeout_ms == 0 {
            return Err(ConfigError::Validation("read_timeout_ms must be > 0".into()));
        }
        match (&d.picoscope, &d.picoamp) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "Configure exactly one DAQ backend, got both picoscope and picoamp".into(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::Validation(
                    "Configure exactly one DAQ backend: cfg_DAQ.picoscope or cfg_DAQ.picoamp"
                        .into(),
                ))
            }
            (Some(scope), None) => Self::validate_picoscope(scope)?,
            (None, Some(amp)) => Self::validate_picoamp(amp)?,
        }
        Ok(())
    }

    fn validate_picoscope(scope: &PicoscopeConfig) -> Result<(), ConfigError> {
        if scope.sampling_interval <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "sampling_interval {} must be > 0",
                scope.sampling_interval
            )));
        }
        if scope.pulse_halfwidth <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "pulse_halfwidth {} must be > 0",
                scope.pulse_halfwidth
            )));
        }
        for (name, tmin, tmax) in [
            ("baseline", scope.baseline_tmin, scope.baseline_tmax),
            (
                "reference_baseline",
                scope.reference_baseline_tmin,
                scope.reference_baseline_tmax,
            ),
            (
                "reference_signal",
                scope.reference_signal_tmin,
                scope.reference_signal_tmax,
            ),
        ] {
            if tmin >= tmax {
                return Err(ConfigError::Validation(format!(
                    "picoscope {name} window invalid: tmin {tmin} must be below tmax {tmax}"
                )));
            }
        }
        for (role, channel) in [
            ("primary_channel", &scope.primary_channel),
            ("reference_channel", &scope.reference_channel),
        ] {
            if scope_channel_index(channel).is_none() {
                return Err(ConfigError::Validation(format!(
                    "picoscope {role} '{channel}' invalid. Must be one of: A, B, C, D"
                )));
            }
        }
        if scope.primary_channel == scope.reference_channel {
            return Err(ConfigError::Validation(format!(
                "picoscope primary and reference channel must differ, both are '{}'",
                scope.primary_channel
            )));
        }
        Ok(())
    }

    fn validate_picoamp(amp: &PicoampConfig) -> Result<(), ConfigError> {
        if amp.com.is_empty() {
            return Err(ConfigError::Validation(
                "picoamp COM port cannot be empty".into(),
            ));
        }
        if amp.count_per_read == 0 {
            return Err(ConfigError::Validation(
                "picoamp count_per_read must be >= 1".into(),
            ));
        }
        if amp.primary_channel == amp.reference_channel {
            return Err(ConfigError::Validation(format!(
                "picoamp primary and reference channel must differ, both are {}",
                amp.primary_channel
            )));
        }
        Ok(())
    }

    fn validate_grid(&self) -> Result<(), ConfigError> {
        let g = &self.grid;
        if g.r_max < 0.0 {
            return Err(ConfigError::Validation(format!(
                "r_max {} must be >= 0",
                g.r_max
            )));
        }
        if g.r_step <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "r_step {} must be > 0",
                g.r_step
            )));
        }
        if g.arc_step <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "arc_step {} must be > 0",
                g.arc_step
            )));
        }
        Ok(())
    }

    fn validate_centre_finder(&self) -> Result<(), ConfigError> {
        let c = &self.centre_finder;
        if c.ang_step <= 0.0 || c.ang_step > 360.0 {
            return Err(ConfigError::Validation(format!(
                "ang_step {} must be in (0, 360]",
                c.ang_step
            )));
        }
        if c.profile_r_start < 0.0 || c.profile_r_stop < 0.0 {
            return Err(ConfigError::Validation(format!(
                "profile radii must be >= 0, got start {} stop {}",
                c.profile_r_start, c.profile_r_stop
            )));
        }
        if c.profile_r_start == c.profile_r_stop {
            return Err(ConfigError::Validation(
                "profile_r_start and profile_r_stop must differ".into(),
            ));
        }
        if c.coarse_step <= 0.0 || c.fine_step <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "step sizes must be > 0, got coarse {} fine {}",
                c.coarse_step, c.fine_step
            )));
        }
        if c.fine_step > c.coarse_step {
            return Err(ConfigError::Validation(format!(
                "fine_step {} must not exceed coarse_step {}",
                c.fine_step, c.coarse_step
            )));
        }
        if c.pmt_bulb_radius <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "PMT_bulb_radius {} must be > 0",
                c.pmt_bulb_radius
            )));
        }
        if c.threshold_factor <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "threshold_factor {} must be > 0",
                c.threshold_factor
            )));
        }
        if c.plateau_samples == 0 {
            return Err(ConfigError::Validation(
                "plateau_samples must be >= 1".into(),
            ));
        }
        if c.plateau_tolerance <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "plateau_tolerance {} must be > 0",
                c.plateau_tolerance
            )));
        }
        Ok(())
    }
}
