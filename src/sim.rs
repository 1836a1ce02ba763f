//! Simulated scanner bench.
//!
//! Deterministic stand-ins for the motor and acquisition drivers so the whole
//! pipeline runs without hardware. One shared bench state carries the stage
//! position, the seeded noise generator and the acquisition tick driving the
//! source drift, so the motor and acquisition halves stay consistent: what the
//! detector "sees" depends on where the stage was last moved.
//!
//! # Model
//!
//! - The PMT responds with a logistic edge profile: full response well inside
//!   the bulb, a small `background` outside, rolling off over `edge_width` mm
//!   at the rim.
//! - Source intensity drifts sinusoidally over acquisition ticks and applies
//!   to the primary and reference channels alike, which is exactly what
//!   reference normalization cancels.
//! - Waveform reads synthesize a Gaussian pulse near 75 ns on a flat
//!   baseline; current reads return scalar sample blocks. Both advance the
//!   same tick counter.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::trace;

use crate::config::{scope_channel_index, ScanConfig};
use crate::core::Axis;
use crate::daq::{AcquisitionDriver, WaveformTrace};
use crate::error::{ScanError, ScanResult};
use crate::motion::MotorDriver;

/// Pulse arrival time on synthesized traces, ns.
const PULSE_T0_NS: f64 = 75.0;
/// Gaussian pulse width on synthesized traces, ns.
const PULSE_SIGMA_NS: f64 = 3.0;
/// Synthesized trace length, ns.
const TRACE_SPAN_NS: f64 = 120.0;
/// Smallest sampling interval the simulated scope will snap to, ns.
const MIN_INTERVAL_NS: f64 = 0.8;

// =============================================================================
// Bench parameters and shared state
// =============================================================================

/// Physical parameters of the simulated bench.
#[derive(Clone, Debug)]
pub struct SimParams {
    /// True bulb centre in stage coordinates `(x, y)`, mm.
    pub centre: (f64, f64),
    /// True bulb radius, mm.
    pub bulb_radius: f64,
    /// Logistic roll-off width at the rim, mm.
    pub edge_width: f64,
    /// Response fraction outside the bulb (stray light floor).
    pub background: f64,
    /// Full-response primary pulse amplitude, mV.
    pub pulse_mv: f64,
    /// Reference pulse amplitude before drift, mV.
    pub reference_mv: f64,
    /// Fractional amplitude of the sinusoidal source drift.
    pub drift_amplitude: f64,
    /// Drift period in acquisition ticks.
    pub drift_period: f64,
    /// Fractional uniform noise per acquired sample.
    pub noise: f64,
    /// Driver index of the scanned-PMT channel.
    pub primary_channel: u8,
    /// Driver index of the reference channel.
    pub reference_channel: u8,
    /// RNG seed for reproducible noise.
    pub seed: u64,
}

impl Default for SimParams {
    fn default() -> Self {
        SimParams {
            centre: (51.8, 50.4),
            bulb_radius: 40.0,
            edge_width: 0.8,
            background: 0.02,
            pulse_mv: 120.0,
            reference_mv: 80.0,
            drift_amplitude: 0.0,
            drift_period: 600.0,
            noise: 0.0,
            primary_channel: 0,
            reference_channel: 1,
            seed: 7,
        }
    }
}

impl SimParams {
    /// Derive bench parameters from the scan configuration. Channels follow
    /// the configured DAQ variant; the tube runs a few mm under the nominal
    /// radius and sits slightly off the nominal origin, the way a real mount
    /// does, so calibration has an offset to find.
    pub fn from_config(config: &ScanConfig, seed: u64) -> Self {
        let (primary_channel, reference_channel) = match (&config.daq.picoscope, &config.daq.picoamp)
        {
            (Some(scope), _) => (
                scope_channel_index(&scope.primary_channel).unwrap_or(0),
                scope_channel_index(&scope.reference_channel).unwrap_or(1),
            ),
            (None, Some(amp)) => (amp.primary_channel, amp.reference_channel),
            (None, None) => (0, 1),
        };
        SimParams {
            centre: (
                config.motors.scan_origin[0] + 0.8,
                config.motors.scan_origin[1] - 0.6,
            ),
            bulb_radius: config.centre_finder.pmt_bulb_radius - 5.0,
            drift_amplitude: 0.08,
            drift_period: 600.0,
            noise: 0.01,
            primary_channel,
            reference_channel,
            seed,
            ..SimParams::default()
        }
    }

    /// Geometric response at stage position `(x, y)`: 1 well inside the bulb,
    /// `background` outside, logistic roll-off at the rim.
    fn response(&self, x: f64, y: f64) -> f64 {
        let d = ((x - self.centre.0).powi(2) + (y - self.centre.1).powi(2)).sqrt();
        self.background
            + (1.0 - self.background) / (1.0 + ((d - self.bulb_radius) / self.edge_width).exp())
    }

    /// Source intensity factor at the given acquisition tick.
    fn drift(&self, ticks: u64) -> f64 {
        if self.drift_amplitude == 0.0 {
            return 1.0;
        }
        1.0 + self.drift_amplitude * (TAU * ticks as f64 / self.drift_period).sin()
    }
}

struct BenchState {
    stage: [f64; 3],
    rng: StdRng,
    ticks: u64,
}

/// The simulated bench. Hands out motor and acquisition drivers sharing one
/// stage state.
///
/// # Example
///
/// ```rust,ignore
/// let bench = SimBench::new(SimParams::from_config(&config, 7));
/// let controller = PositionController::new(Box::new(bench.motor()), &config.motors)?;
/// let backend = AcquisitionBackend::from_config(Box::new(bench.acquisition()), &config.daq)?;
/// ```
pub struct SimBench {
    params: SimParams,
    state: Arc<RwLock<BenchState>>,
}

impl SimBench {
    /// Create a bench with the stage parked at the origin.
    pub fn new(params: SimParams) -> Self {
        let state = BenchState {
            stage: [0.0; 3],
            rng: StdRng::seed_from_u64(params.seed),
            ticks: 0,
        };
        SimBench {
            params,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// A motor driver over the shared stage state.
    pub fn motor(&self) -> SimMotorDriver {
        SimMotorDriver {
            state: Arc::clone(&self.state),
        }
    }

    /// An acquisition driver over the shared stage state.
    pub fn acquisition(&self) -> SimAcquisitionDriver {
        SimAcquisitionDriver {
            params: self.params.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

// =============================================================================
// SimMotorDriver
// =============================================================================

/// Simulated three-axis stage. Moves settle instantly after a short delay.
pub struct SimMotorDriver {
    state: Arc<RwLock<BenchState>>,
}

#[async_trait]
impl MotorDriver for SimMotorDriver {
    async fn move_to(&mut self, axis: Axis, target_mm: f64) -> ScanResult<()> {
        sleep(Duration::from_micros(200)).await;
        self.state.write().await.stage[axis.index()] = target_mm;
        trace!(axis = ?axis, target_mm, "sim stage moved");
        Ok(())
    }

    async fn position(&mut self, axis: Axis) -> ScanResult<f64> {
        Ok(self.state.read().await.stage[axis.index()])
    }
}

// =============================================================================
// SimAcquisitionDriver
// =============================================================================

/// Simulated scope/meter front-end reading out the bulb response at the
/// current stage position.
pub struct SimAcquisitionDriver {
    params: SimParams,
    state: Arc<RwLock<BenchState>>,
}

impl SimAcquisitionDriver {
    /// Undrifted signal level for `channel` with the stage at `stage`, or
    /// `None` when the channel is not wired.
    fn level(&self, stage: &[f64; 3], channel: u8) -> Option<f64> {
        if channel == self.params.primary_channel {
            Some(self.params.pulse_mv * self.params.response(stage[0], stage[1]))
        } else if channel == self.params.reference_channel {
            Some(self.params.reference_mv)
        } else {
            None
        }
    }
}

#[async_trait]
impl AcquisitionDriver for SimAcquisitionDriver {
    async fn read_waveform(
        &mut self,
        channel: u8,
        requested_interval_s: f64,
    ) -> ScanResult<WaveformTrace> {
        let amplitude = {
            let mut state = self.state.write().await;
            state.ticks += 1;
            let base = self.level(&state.stage, channel).ok_or_else(|| {
                ScanError::acquisition(format!("simulated scope has no channel {channel}"))
            })?;
            let drift = self.params.drift(state.ticks);
            let jitter = if self.params.noise == 0.0 {
                0.0
            } else {
                self.params.noise * state.rng.gen_range(-1.0..=1.0)
            };
            base * drift * (1.0 + jitter)
        };
        Ok(synthesize_trace(amplitude, requested_interval_s))
    }

    async fn read_current(&mut self, channel: u8, count: u32) -> ScanResult<Vec<f64>> {
        let mut state = self.state.write().await;
        state.ticks += 1;
        let base = self.level(&state.stage, channel).ok_or_else(|| {
            ScanError::acquisition(format!("simulated meter has no channel {channel}"))
        })?;
        let drift = self.params.drift(state.ticks);
        let samples = (0..count)
            .map(|_| {
                let jitter = if self.params.noise == 0.0 {
                    0.0
                } else {
                    self.params.noise * state.rng.gen_range(-1.0..=1.0)
                };
                base * drift * (1.0 + jitter)
            })
            .collect();
        Ok(samples)
    }
}

/// Gaussian pulse of the given amplitude on a flat zero baseline.
fn synthesize_trace(amplitude_mv: f64, requested_interval_s: f64) -> WaveformTrace {
    // Snap the way real scope drivers do: never below the hardware step.
    let interval_ns = (requested_interval_s * 1e9).max(MIN_INTERVAL_NS);
    let n = (TRACE_SPAN_NS / interval_ns).ceil() as usize + 1;
    let samples = (0..n)
        .map(|i| {
            let t = i as f64 * interval_ns;
            let arg = (t - PULSE_T0_NS) / PULSE_SIGMA_NS;
            amplitude_mv * (-0.5 * arg * arg).exp()
        })
        .collect();
    WaveformTrace {
        samples,
        interval_ns,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
