//! End-to-end pipeline tests over the simulated bench.
//!
//! These drive the public session API the way the binary does: open a
//! session, calibrate, sweep the grid, inspect the outcome. The simulated
//! bench provides a bulb offset from the nominal origin plus source drift
//! and per-sample noise, so the assertions are about what the pipeline
//! recovers end to end, not about plumbing. Sessions take a process-wide
//! lock, hence `#[serial]`.

use async_trait::async_trait;
use pmt_scan::config::{DaqConfig, GridConfig, PicoampConfig, ScanConfig, StatisticsConfig};
use pmt_scan::core::Completion;
use pmt_scan::daq::{AcquisitionDriver, WaveformTrace};
use pmt_scan::error::{ScanError, ScanResult};
use pmt_scan::scan::{CentreEstimate, GridPlan, RingDensityPattern, ScanSession};
use pmt_scan::sim::{SimBench, SimParams};
use serial_test::serial;

/// Current-meter backend, five small rings (66 points), default statistics.
fn base_config() -> ScanConfig {
    ScanConfig {
        daq: DaqConfig {
            picoamp: Some(PicoampConfig::default()),
            ..DaqConfig::default()
        },
        grid: GridConfig {
            r_max: 10.0,
            r_step: 2.5,
            arc_step: 2.5,
        },
        ..ScanConfig::default()
    }
}

fn open_sim_session(config: &ScanConfig, seed: u64) -> ScanSession {
    let bench = SimBench::new(SimParams::from_config(config, seed));
    ScanSession::new(
        config.clone(),
        Box::new(bench.motor()),
        Box::new(bench.acquisition()),
    )
    .unwrap()
}

fn flat_estimate() -> CentreEstimate {
    CentreEstimate {
        x_offset: 0.0,
        y_offset: 0.0,
        fitted_radius: 35.0,
        residual_rms: 0.0,
    }
}

fn relative_spread(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    (max - min) / mean
}

#[tokio::test]
#[serial]
async fn test_pipeline_recovers_centre_and_sweeps_grid() {
    let config = base_config();
    let mut session = open_sim_session(&config, 7);

    // The simulated tube sits (+0.8, -0.6) mm off the nominal origin.
    let calibration = session.find_centre().await.unwrap();
    assert!(calibration.excluded_angles.is_empty());
    assert!(
        (calibration.estimate.x_offset - 0.8).abs() < 0.3,
        "x offset {}",
        calibration.estimate.x_offset
    );
    assert!(
        (calibration.estimate.y_offset + 0.6).abs() < 0.3,
        "y offset {}",
        calibration.estimate.y_offset
    );

    let outcome = session.run_grid(&calibration.estimate).await;
    assert!(outcome.completion.is_complete());
    assert!(outcome.skipped.is_empty());

    let plan = GridPlan::build(
        &config.grid,
        &RingDensityPattern::new(config.grid.arc_step),
        config.motors.z_at_pmt_centre,
    );
    assert_eq!(outcome.readings.len(), plan.len());
    // Opening reference, one every 30 points, and the closing bracket.
    assert_eq!(outcome.references.len(), 4);
    assert!(outcome.readings.iter().all(|r| !r.value.is_nan()));
    assert_eq!(outcome.run_id, calibration.run_id);
}

#[tokio::test]
#[serial]
async fn test_reference_normalization_cancels_drift() {
    // One readout per position so every reading sees the instantaneous
    // drift; short reference period so brackets stay tight.
    let config = ScanConfig {
        daq: DaqConfig {
            picoamp: Some(PicoampConfig::default()),
            ..DaqConfig::default()
        },
        grid: GridConfig {
            r_max: 2.5,
            r_step: 1.25,
            arc_step: 2.5,
        },
        statistics: StatisticsConfig {
            readouts_per_position: 1,
            reference_period: 3,
        },
        ..ScanConfig::default()
    };
    // A tenth of drift over the sweep, no noise, bulb centred: any spread in
    // the normalized values is normalization error.
    let params = SimParams {
        centre: (51.0, 51.0),
        bulb_radius: 35.0,
        drift_amplitude: 0.1,
        drift_period: 40.0,
        ..SimParams::default()
    };
    let bench = SimBench::new(params);
    let mut session = ScanSession::new(
        config,
        Box::new(bench.motor()),
        Box::new(bench.acquisition()),
    )
    .unwrap();

    let outcome = session.run_grid(&flat_estimate()).await;
    assert!(outcome.completion.is_complete());
    assert_eq!(outcome.readings.len(), 12);
    assert!(outcome.readings.iter().all(|r| !r.degraded));

    let raw: Vec<f64> = outcome.readings.iter().map(|r| r.raw).collect();
    let normalized: Vec<f64> = outcome.readings.iter().map(|r| r.value).collect();
    assert!(
        relative_spread(&raw) > 0.05,
        "raw spread {}",
        relative_spread(&raw)
    );
    assert!(
        relative_spread(&normalized) < 0.02,
        "normalized spread {}",
        relative_spread(&normalized)
    );
}

#[tokio::test]
#[serial]
async fn test_same_seed_reproduces_the_run() {
    let config = base_config();
    let mut runs: Vec<Vec<(f64, f64)>> = Vec::new();
    for _ in 0..2 {
        let mut session = open_sim_session(&config, 42);
        let calibration = session.find_centre().await.unwrap();
        let outcome = session.run_grid(&calibration.estimate).await;
        assert!(outcome.completion.is_complete());
        runs.push(outcome.readings.iter().map(|r| (r.raw, r.value)).collect());
    }
    assert_eq!(runs[0], runs[1]);
}

#[tokio::test]
#[serial]
async fn test_cancellation_flows_through_the_session() {
    let config = base_config();
    let mut session = open_sim_session(&config, 7);
    session.cancel_token().cancel();

    let outcome = session.run_grid(&flat_estimate()).await;
    assert_eq!(
        outcome.completion,
        Completion::Aborted {
            reason: "cancelled".to_string()
        }
    );
    assert!(outcome.readings.is_empty());

    let err = session.find_centre().await.unwrap_err();
    assert!(matches!(err, ScanError::Cancelled));
}

// =============================================================================
// Reference dropout
// =============================================================================

/// Constant-level meter whose reference channel fails on the given
/// reference calls (1-based).
struct FlakyReferenceMeter {
    reference_failures: Vec<u32>,
    reference_calls: u32,
}

#[async_trait]
impl AcquisitionDriver for FlakyReferenceMeter {
    async fn read_waveform(
        &mut self,
        _channel: u8,
        _requested_interval_s: f64,
    ) -> ScanResult<WaveformTrace> {
        Err(ScanError::acquisition("meter has no waveform path"))
    }

    async fn read_current(&mut self, channel: u8, count: u32) -> ScanResult<Vec<f64>> {
        if channel == 1 {
            self.reference_calls += 1;
            if self.reference_failures.contains(&self.reference_calls) {
                return Err(ScanError::acquisition("reference dropout"));
            }
            return Ok(vec![2.0; count as usize]);
        }
        Ok(vec![5.0; count as usize])
    }
}

#[tokio::test]
#[serial]
async fn test_reference_dropout_degrades_but_completes() {
    let config = ScanConfig {
        daq: DaqConfig {
            picoamp: Some(PicoampConfig::default()),
            ..DaqConfig::default()
        },
        grid: GridConfig {
            r_max: 2.5,
            r_step: 1.25,
            arc_step: 2.5,
        },
        statistics: StatisticsConfig {
            readouts_per_position: 2,
            reference_period: 5,
        },
        ..ScanConfig::default()
    };
    let bench = SimBench::new(SimParams::default());
    let meter = FlakyReferenceMeter {
        reference_failures: vec![2],
        reference_calls: 0,
    };
    let mut session =
        ScanSession::new(config, Box::new(bench.motor()), Box::new(meter)).unwrap();

    let outcome = session.run_grid(&flat_estimate()).await;

    // The dropout never aborts the sweep; it degrades the brackets on
    // either side of the missing reference.
    assert!(outcome.completion.is_complete());
    assert_eq!(outcome.readings.len(), 12);
    assert_eq!(outcome.references.len(), 3);
    let degraded: Vec<bool> = outcome.readings.iter().map(|r| r.degraded).collect();
    assert_eq!(degraded.iter().filter(|d| **d).count(), 10);
    assert!(!degraded[10] && !degraded[11]);
    // Normalization carried on against the fallback level.
    for reading in &outcome.readings {
        assert!((reading.value - 2.5).abs() < 1e-9, "value {}", reading.value);
    }
}
