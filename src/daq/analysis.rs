//! Waveform numerics for the pulse-mode backend.
//!
//! Pure functions over a captured trace: estimate the baseline from a
//! pre-pulse window, locate the pulse as the largest baseline deviation, and
//! integrate the deviation over a window centred on it. The reference channel
//! uses fixed windows instead, because its pulse is driven by the flasher and
//! does not move on the time axis.
//!
//! All times are in nanoseconds on the trace's own axis; areas come out in
//! mV ns. Integrals are signed, so negative-going PMT pulses produce negative
//! areas.

use super::WaveformTrace;
use crate::config::PicoscopeConfig;
use crate::core::TimeWindow;
use crate::error::{ScanError, ScanResult};

/// Windowing parameters for reducing a trace pair to two scalars.
#[derive(Clone, Debug)]
pub struct PulseAnalysis {
    baseline: TimeWindow,
    pulse_halfwidth: f64,
    reference_baseline: TimeWindow,
    reference_signal: TimeWindow,
}

impl PulseAnalysis {
    /// Take the analysis windows from the scope configuration.
    pub fn from_scope_config(scope: &PicoscopeConfig) -> Self {
        PulseAnalysis {
            baseline: TimeWindow::new(scope.baseline_tmin, scope.baseline_tmax),
            pulse_halfwidth: scope.pulse_halfwidth,
            reference_baseline: TimeWindow::new(
                scope.reference_baseline_tmin,
                scope.reference_baseline_tmax,
            ),
            reference_signal: TimeWindow::new(
                scope.reference_signal_tmin,
                scope.reference_signal_tmax,
            ),
        }
    }

    /// Reduce a primary-channel trace to the pulse area.
    ///
    /// The baseline is the mean over the pre-pulse window. The pulse is
    /// located as the sample with the largest absolute deviation from that
    /// baseline anywhere on the trace, and the deviation is integrated over
    /// `t_peak +- pulse_halfwidth`.
    ///
    /// # Errors
    ///
    /// Fails when the baseline window contains no samples or the pulse window
    /// holds fewer than two, which happens when the capture is shorter than
    /// the configured windows assume.
    pub fn primary_value(&self, trace: &WaveformTrace) -> ScanResult<f64> {
        let baseline = windowed_mean(trace, &self.baseline, "baseline")?;
        let mut peak = 0;
        let mut peak_deviation = 0.0;
        for (i, s) in trace.samples.iter().enumerate() {
            let deviation = (s - baseline).abs();
            if deviation > peak_deviation {
                peak_deviation = deviation;
                peak = i;
            }
        }
        let t_peak = trace.time_at(peak);
        let window = TimeWindow::new(t_peak - self.pulse_halfwidth, t_peak + self.pulse_halfwidth);
        integrate_deviation(trace, &window, baseline, "pulse")
    }

    /// Reduce a reference-channel trace to the flasher pulse area, using the
    /// fixed reference windows.
    ///
    /// # Errors
    ///
    /// Fails when either reference window falls outside the captured trace.
    pub fn reference_value(&self, trace: &WaveformTrace) -> ScanResult<f64> {
        let baseline = windowed_mean(trace, &self.reference_baseline, "reference baseline")?;
        integrate_deviation(trace, &self.reference_signal, baseline, "reference signal")
    }
}

/// Arithmetic mean. Callers guarantee a non-empty slice.
pub(crate) fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

fn windowed_mean(trace: &WaveformTrace, window: &TimeWindow, what: &str) -> ScanResult<f64> {
    let samples: Vec<f64> = trace
        .samples
        .iter()
        .enumerate()
        .filter(|(i, _)| window.contains(trace.time_at(*i)))
        .map(|(_, s)| *s)
        .collect();
    if samples.is_empty() {
        return Err(ScanError::acquisition(format!(
            "{what} window ({}, {}) ns contains no samples, trace spans {:.1} ns",
            window.tmin,
            window.tmax,
            trace.duration_ns()
        )));
    }
    Ok(mean(&samples))
}

fn integrate_deviation(
    trace: &WaveformTrace,
    window: &TimeWindow,
    baseline: f64,
    what: &str,
) -> ScanResult<f64> {
    let deviations: Vec<f64> = trace
        .samples
        .iter()
        .enumerate()
        .filter(|(i, _)| window.contains(trace.time_at(*i)))
        .map(|(_, s)| s - baseline)
        .collect();
    if deviations.len() < 2 {
        return Err(ScanError::acquisition(format!(
            "{what} window ({}, {}) ns holds {} samples, need at least 2 to integrate",
            window.tmin,
            window.tmax,
            deviations.len()
        )));
    }
    // Uniform spacing, so the trapezoid rule collapses to a weighted sum.
    let interior: f64 = deviations[1..deviations.len() - 1].iter().sum();
    let edges = (deviations[0] + deviations[deviations.len() - 1]) / 2.0;
    Ok(trace.interval_ns * (interior + edges))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace_with(interval_ns: f64, n: usize, f: impl Fn(f64) -> f64) -> WaveformTrace {
        let samples = (0..n).map(|i| f(i as f64 * interval_ns)).collect();
        WaveformTrace {
            samples,
            interval_ns,
        }
    }

    fn default_analysis() -> PulseAnalysis {
        PulseAnalysis::from_scope_config(&PicoscopeConfig::default())
    }

    #[test]
    fn test_flat_trace_has_zero_area() {
        let trace = trace_with(0.8, 256, |_| 5.0);
        let area = default_analysis().primary_value(&trace).unwrap();
        assert!(area.abs() < 1e-9);
    }

    #[test]
    fn test_flat_top_pulse_area() {
        // 10 mV above a 2 mV baseline for 70 < t < 80 ns: twelve samples land
        // on the flat top at 0.8 ns spacing.
        let trace = trace_with(0.8, 256, |t| if t > 70.0 && t < 80.0 { 12.0 } else { 2.0 });
        let area = default_analysis().primary_value(&trace).unwrap();
        assert!((area - 96.0).abs() < 1e-6, "area {area}");
    }

    #[test]
    fn test_area_scales_with_amplitude() {
        let single = trace_with(0.8, 256, |t| if t > 70.0 && t < 80.0 { 12.0 } else { 2.0 });
        let double = trace_with(0.8, 256, |t| if t > 70.0 && t < 80.0 { 22.0 } else { 2.0 });
        let analysis = default_analysis();
        let a1 = analysis.primary_value(&single).unwrap();
        let a2 = analysis.primary_value(&double).unwrap();
        assert!((a2 - 2.0 * a1).abs() < 1e-6);
    }

    #[test]
    fn test_negative_pulse_keeps_sign() {
        let trace = trace_with(0.8, 256, |t| if t > 70.0 && t < 80.0 { -8.0 } else { 2.0 });
        let area = default_analysis().primary_value(&trace).unwrap();
        assert!((area + 96.0).abs() < 1e-6, "area {area}");
    }

    #[test]
    fn test_reference_uses_fixed_windows() {
        // 4 mV over the 60..90 ns flasher window above a 1 mV baseline.
        let trace = trace_with(0.8, 256, |t| if t > 60.0 && t < 90.0 { 5.0 } else { 1.0 });
        let area = default_analysis().reference_value(&trace).unwrap();
        assert!((area - 120.0).abs() < 8.0, "area {area}");
    }

    #[test]
    fn test_rejects_trace_shorter_than_window() {
        // 64 samples at 0.8 ns span 50 ns; the reference signal window starts
        // at 60 ns, so nothing falls inside it.
        let trace = trace_with(0.8, 64, |_| 1.0);
        let err = default_analysis().reference_value(&trace).unwrap_err();
        assert!(err.to_string().contains("holds 0 samples"));
    }

    #[test]
    fn test_rejects_single_sample_window() {
        let analysis = PulseAnalysis {
            baseline: TimeWindow::new(-1.0, 50.0),
            pulse_halfwidth: 10.0,
            reference_baseline: TimeWindow::new(-1.0, 50.0),
            reference_signal: TimeWindow::new(60.0, 90.0),
        };
        // 40 ns spacing leaves exactly one sample inside the pulse window.
        let trace = trace_with(40.0, 3, |t| if t > 70.0 { 9.0 } else { 1.0 });
        let err = analysis.primary_value(&trace).unwrap_err();
        assert!(err.to_string().contains("at least 2"));
    }
}
