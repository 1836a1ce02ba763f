//! Data acquisition backends.
//!
//! The scanner reads out the PMT through one of two interchangeable hardware
//! paths: an oscilloscope digitizing full voltage traces (pulse mode) or a
//! picoammeter sampling the anode current directly (current mode). Both are
//! reduced here to the same contract: one scalar per channel per call.
//!
//! # Layers
//!
//! - [`AcquisitionDriver`]: the narrow hardware seam. One implementation per
//!   vendor SDK, plus the simulated bench in [`crate::sim`]. A driver only
//!   moves raw samples; it never interprets them.
//! - [`analysis`]: pure waveform numerics (baseline estimation, windowed pulse
//!   integration), testable without hardware.
//! - [`AcquisitionBackend`]: the tagged union over the two variants. The
//!   variant dispatch lives in [`AcquisitionBackend::measure`] and
//!   [`AcquisitionBackend::measure_reference`] and nowhere else; everything
//!   downstream (profile scan, grid scan) is variant-agnostic.
//!
//! Every driver call is wrapped in the configured read timeout; an elapsed
//! timeout surfaces as an acquisition error. Backends never retry; the retry
//! policy belongs to the calling component.

pub mod analysis;

use crate::config::{scope_channel_index, DaqConfig};
use crate::core::{Position, Reading};
use crate::error::{ScanError, ScanResult};
use analysis::{mean, PulseAnalysis};
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

/// One digitized trace as delivered by a waveform driver.
///
/// The hardware snaps the requested sampling interval to the nearest value it
/// supports, so the trace carries the interval actually used; the time axis is
/// derived from it, never from the requested value.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformTrace {
    /// Voltage samples in mV, uniformly spaced.
    pub samples: Vec<f64>,
    /// Actual sampling interval in ns.
    pub interval_ns: f64,
}

impl WaveformTrace {
    /// Time of sample `i` on the trace's own axis, ns.
    pub fn time_at(&self, i: usize) -> f64 {
        i as f64 * self.interval_ns
    }

    /// Trace duration in ns (time of the last sample).
    pub fn duration_ns(&self) -> f64 {
        match self.samples.len() {
            0 => 0.0,
            n => self.time_at(n - 1),
        }
    }
}

/// Low-level interface to the acquisition hardware.
///
/// Implementations perform the vendor I/O for a single capture. Channel
/// indices are zero-based driver indices (scope letters map via the
/// configuration layer).
///
/// # Errors
///
/// Implementations report hardware faults as [`ScanError::Acquisition`].
/// Timeouts are enforced by the backend wrapper, not by the driver.
#[async_trait]
pub trait AcquisitionDriver: Send {
    /// Capture one voltage trace on `channel` at (approximately) the requested
    /// sampling interval in seconds.
    async fn read_waveform(
        &mut self,
        channel: u8,
        requested_interval_s: f64,
    ) -> ScanResult<WaveformTrace>;

    /// Take `count` raw current samples on `channel`.
    async fn read_current(&mut self, channel: u8, count: u32) -> ScanResult<Vec<f64>>;
}

/// Oscilloscope-style backend: dual-channel traces, time-windowed
/// baseline/signal integration.
pub struct WaveformBackend {
    driver: Box<dyn AcquisitionDriver>,
    read_timeout: Duration,
    sampling_interval_s: f64,
    primary_channel: u8,
    reference_channel: u8,
    analysis: PulseAnalysis,
}

impl WaveformBackend {
    async fn capture(&mut self, channel: u8) -> ScanResult<WaveformTrace> {
        let trace = tokio::time::timeout(
            self.read_timeout,
            self.driver.read_waveform(channel, self.sampling_interval_s),
        )
        .await
        .map_err(|_| {
            ScanError::acquisition(format!(
                "waveform read on channel {} timed out after {} ms",
                channel,
                self.read_timeout.as_millis()
            ))
        })??;
        if trace.samples.len() < 2 {
            return Err(ScanError::acquisition(format!(
                "waveform read on channel {} returned {} samples",
                channel,
                trace.samples.len()
            )));
        }
        if trace.interval_ns <= 0.0 {
            return Err(ScanError::acquisition(format!(
                "waveform read on channel {} reported non-positive interval {}",
                channel, trace.interval_ns
            )));
        }
        trace!(
            channel,
            samples = trace.samples.len(),
            interval_ns = trace.interval_ns,
            "captured trace"
        );
        Ok(trace)
    }
}

/// Picoammeter backend: repeated scalar current reads, averaged per call.
pub struct CurrentMeterBackend {
    driver: Box<dyn AcquisitionDriver>,
    read_timeout: Duration,
    count_per_read: u32,
    primary_channel: u8,
    reference_channel: u8,
}

impl CurrentMeterBackend {
    async fn read_mean(&mut self, channel: u8) -> ScanResult<f64> {
        let samples = tokio::time::timeout(
            self.read_timeout,
            self.driver.read_current(channel, self.count_per_read),
        )
        .await
        .map_err(|_| {
            ScanError::acquisition(format!(
                "current read on channel {} timed out after {} ms",
                channel,
                self.read_timeout.as_millis()
            ))
        })??;
        if samples.is_empty() {
            return Err(ScanError::acquisition(format!(
                "current read on channel {channel} returned no samples"
            )));
        }
        Ok(mean(&samples))
    }
}

/// The two interchangeable acquisition paths, behind one contract:
/// `measure(position) -> Reading`.
pub enum AcquisitionBackend {
    /// Oscilloscope (picoscope) path.
    Waveform(WaveformBackend),
    /// Picoammeter (picoamp) path.
    CurrentMeter(CurrentMeterBackend),
}

impl AcquisitionBackend {
    /// Build the backend selected by the DAQ configuration over a connected
    /// driver.
    ///
    /// # Errors
    ///
    /// Fails when neither or both variants are configured, or a scope channel
    /// letter does not map to a driver index; configuration validation
    /// normally catches these earlier.
    pub fn from_config(driver: Box<dyn AcquisitionDriver>, daq: &DaqConfig) -> ScanResult<Self> {
        let read_timeout = Duration::from_millis(daq.read_timeout_ms);
        match (&daq.picoscope, &daq.picoamp) {
            (Some(scope), None) => {
                let primary_channel = scope_channel_index(&scope.primary_channel)
                    .ok_or_else(|| {
                        ScanError::acquisition(format!(
                            "unknown scope channel '{}'",
                            scope.primary_channel
                        ))
                    })?;
                let reference_channel = scope_channel_index(&scope.reference_channel)
                    .ok_or_else(|| {
                        ScanError::acquisition(format!(
                            "unknown scope channel '{}'",
                            scope.reference_channel
                        ))
                    })?;
                Ok(AcquisitionBackend::Waveform(WaveformBackend {
                    driver,
                    read_timeout,
                    sampling_interval_s: scope.sampling_interval,
                    primary_channel,
                    reference_channel,
                    analysis: PulseAnalysis::from_scope_config(scope),
                }))
            }
            (None, Some(amp)) => Ok(AcquisitionBackend::CurrentMeter(CurrentMeterBackend {
                driver,
                read_timeout,
                count_per_read: amp.count_per_read,
                primary_channel: amp.primary_channel,
                reference_channel: amp.reference_channel,
            })),
            _ => Err(ScanError::acquisition(
                "exactly one DAQ backend must be configured",
            )),
        }
    }

    /// Short variant name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionBackend::Waveform(_) => "waveform",
            AcquisitionBackend::CurrentMeter(_) => "current-meter",
        }
    }

    /// Acquire one primary-channel scalar at the given scan position.
    ///
    /// The returned reading is not yet drift-corrected (`value == raw`); the
    /// reference normalizer finalizes it.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Acquisition`] on a driver fault or read timeout.
    /// Never retried here; retry policy belongs to the caller.
    pub async fn measure(&mut self, position: &Position) -> ScanResult<Reading> {
        let raw = match self {
            AcquisitionBackend::Waveform(b) => {
                let trace = b.capture(b.primary_channel).await?;
                b.analysis.primary_value(&trace)?
            }
            AcquisitionBackend::CurrentMeter(b) => b.read_mean(b.primary_channel).await?,
        };
        Ok(Reading::sample(raw, *position))
    }

    /// Acquire one reference-channel scalar.
    ///
    /// The reference detector is physically fixed; `position` only records
    /// where in the scan the measurement was scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Acquisition`] on a driver fault or read timeout.
    pub async fn measure_reference(&mut self, position: &Position) -> ScanResult<Reading> {
        let value = match self {
            AcquisitionBackend::Waveform(b) => {
                let trace = b.capture(b.reference_channel).await?;
                b.analysis.reference_value(&trace)?
            }
            AcquisitionBackend::CurrentMeter(b) => b.read_mean(b.reference_channel).await?,
        };
        Ok(Reading::reference(value, *position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PicoampConfig, PicoscopeConfig};
    use std::sync::{Arc, Mutex};

    /// Replays scripted traces/current blocks, recording the channels asked
    /// for; optionally fails or hangs.
    struct ScriptedDriver {
        trace: WaveformTrace,
        currents: Vec<f64>,
        channels_seen: Arc<Mutex<Vec<u8>>>,
        fail: bool,
        hang: bool,
    }

    impl ScriptedDriver {
        fn new() -> Self {
            // Flat 2 mV baseline with a 10 mV flat-top pulse in 70..80 ns.
            let interval_ns = 0.8;
            let samples = (0..256)
                .map(|i| {
                    let t = i as f64 * interval_ns;
                    if t > 70.0 && t < 80.0 {
                        12.0
                    } else {
                        2.0
                    }
                })
                .collect();
            ScriptedDriver {
                trace: WaveformTrace {
                    samples,
                    interval_ns,
                },
                currents: vec![1.0, 2.0, 3.0, 4.0],
                channels_seen: Arc::new(Mutex::new(Vec::new())),
                fail: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl AcquisitionDriver for ScriptedDriver {
        async fn read_waveform(
            &mut self,
            channel: u8,
            _requested_interval_s: f64,
        ) -> ScanResult<WaveformTrace> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(ScanError::acquisition("channel fault"));
            }
            self.channels_seen.lock().unwrap().push(channel);
            Ok(self.trace.clone())
        }

        async fn read_current(&mut self, channel: u8, count: u32) -> ScanResult<Vec<f64>> {
            if self.fail {
                return Err(ScanError::acquisition("channel fault"));
            }
            self.channels_seen.lock().unwrap().push(channel);
            Ok(self.currents.iter().copied().take(count as usize).collect())
        }
    }

    fn scope_daq_config() -> DaqConfig {
        DaqConfig {
            picoscope: Some(PicoscopeConfig::default()),
            ..DaqConfig::default()
        }
    }

    fn meter_daq_config() -> DaqConfig {
        DaqConfig {
            picoamp: Some(PicoampConfig {
                count_per_read: 3,
                ..PicoampConfig::default()
            }),
            ..DaqConfig::default()
        }
    }

    fn origin() -> Position {
        Position::new(0.0, 0.0, 55.0)
    }

    #[tokio::test]
    async fn test_waveform_measure_integrates_pulse() {
        let driver = Box::new(ScriptedDriver::new());
        let mut backend = AcquisitionBackend::from_config(driver, &scope_daq_config()).unwrap();
        assert_eq!(backend.kind(), "waveform");

        let reading = backend.measure(&origin()).await.unwrap();
        assert!(!reading.is_reference);
        assert_eq!(reading.value, reading.raw);
        // 10 mV over ~10 ns; trapezoid edges blur by at most one sample each.
        assert!(
            (reading.raw - 100.0).abs() < 20.0,
            "pulse integral {} far from 10 mV x 10 ns",
            reading.raw
        );
    }

    #[tokio::test]
    async fn test_waveform_channels_follow_config() {
        let driver = Box::new(ScriptedDriver::new());
        let seen = Arc::clone(&driver.channels_seen);
        let mut backend = AcquisitionBackend::from_config(driver, &scope_daq_config()).unwrap();

        backend.measure(&origin()).await.unwrap();
        backend.measure_reference(&origin()).await.unwrap();
        // Default config maps primary "A" -> 0, reference "B" -> 1.
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_meter_measure_averages_samples() {
        let driver = Box::new(ScriptedDriver::new());
        let mut backend = AcquisitionBackend::from_config(driver, &meter_daq_config()).unwrap();
        assert_eq!(backend.kind(), "current-meter");

        let reading = backend.measure(&origin()).await.unwrap();
        // Mean of the first 3 scripted samples.
        assert!((reading.raw - 2.0).abs() < 1e-12);

        let reference = backend.measure_reference(&origin()).await.unwrap();
        assert!(reference.is_reference);
        assert_eq!(reference.value, reference.raw);
    }

    #[tokio::test]
    async fn test_driver_fault_is_acquisition_error() {
        let mut driver = Box::new(ScriptedDriver::new());
        driver.fail = true;
        let mut backend = AcquisitionBackend::from_config(driver, &meter_daq_config()).unwrap();

        let err = backend.measure(&origin()).await.unwrap_err();
        assert!(matches!(err, ScanError::Acquisition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_is_acquisition_error() {
        let mut driver = Box::new(ScriptedDriver::new());
        driver.hang = true;
        let mut daq = scope_daq_config();
        daq.read_timeout_ms = 50;
        let mut backend = AcquisitionBackend::from_config(driver, &daq).unwrap();

        let err = backend.measure(&origin()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_rejects_unconfigured_backend() {
        let driver = Box::new(ScriptedDriver::new());
        assert!(AcquisitionBackend::from_config(driver, &DaqConfig::default()).is_err());
    }

    #[test]
    fn test_trace_time_axis() {
        let trace = WaveformTrace {
            samples: vec![0.0; 5],
            interval_ns: 0.8,
        };
        assert_eq!(trace.time_at(0), 0.0);
        assert!((trace.time_at(3) - 2.4).abs() < 1e-12);
        assert!((trace.duration_ns() - 3.2).abs() < 1e-12);
    }
}
