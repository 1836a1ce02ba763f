//! Exclusive scan session over the bench hardware.
//!
//! One stage, one acquisition chain: two concurrent scans would fight over
//! the motors, so session construction takes a process-wide lock and fails
//! with [`ScanError::SessionActive`] while another session is alive. The lock
//! releases when the session drops, faulted runs included.
//!
//! Cancellation is cooperative. The [`CancelToken`] handed out by the
//! session is checked at position boundaries; a move or acquisition already
//! in flight finishes first, so the hardware is never left mid-command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::centre::{CalibrationOutcome, CentreFinder};
use super::fit::CentreEstimate;
use super::grid::{GridPlan, GridScanOutcome, GridScanner, RingDensityPattern};
use crate::config::ScanConfig;
use crate::daq::{AcquisitionBackend, AcquisitionDriver};
use crate::error::{ScanError, ScanResult};
use crate::motion::{MotorDriver, PositionController};

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Holds the process-wide session lock for as long as it lives.
struct SessionGuard;

impl SessionGuard {
    fn acquire() -> ScanResult<Self> {
        if SESSION_ACTIVE.swap(true, Ordering::Acquire) {
            return Err(ScanError::SessionActive);
        }
        Ok(SessionGuard)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Cooperative cancellation flag shared between the scan loops and whoever
/// wants to stop them (a signal handler, typically). Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with [`ScanError::Cancelled`] once cancellation is requested.
    pub fn check(&self) -> ScanResult<()> {
        if self.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        Ok(())
    }
}

/// An open scan session: exclusive hardware access, a run identifier shared
/// by all artifacts, and the calibrate-then-scan operations.
///
/// # Example
///
/// ```rust,ignore
/// let mut session = ScanSession::new(config, motor, acquisition)?;
/// let calibration = session.find_centre().await?;
/// let outcome = session.run_grid(&calibration.estimate).await;
/// ```
pub struct ScanSession {
    config: ScanConfig,
    controller: PositionController,
    backend: AcquisitionBackend,
    cancel: CancelToken,
    run_id: Uuid,
    _guard: SessionGuard,
}

impl ScanSession {
    /// Open a session over the given drivers.
    ///
    /// # Errors
    ///
    /// [`ScanError::SessionActive`] while another session is alive; a motion
    /// or acquisition error when the controller or backend rejects its
    /// configuration.
    pub fn new(
        config: ScanConfig,
        motor: Box<dyn MotorDriver>,
        acquisition: Box<dyn AcquisitionDriver>,
    ) -> ScanResult<Self> {
        let guard = SessionGuard::acquire()?;
        let controller = PositionController::new(motor, &config.motors)?;
        let backend = AcquisitionBackend::from_config(acquisition, &config.daq)?;
        let run_id = Uuid::new_v4();
        info!(%run_id, backend = backend.kind(), "scan session opened");
        Ok(ScanSession {
            config,
            controller,
            backend,
            cancel: CancelToken::new(),
            run_id,
            _guard: guard,
        })
    }

    /// Identifier stamped on every artifact of this session.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Token that cancels this session's scans.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the centre calibration. Always measures in the nominal frame:
    /// any previously applied centre offset is cleared first.
    pub async fn find_centre(&mut self) -> ScanResult<CalibrationOutcome> {
        self.controller.set_centre_offset(0.0, 0.0);
        let mut finder = CentreFinder::new(
            &mut self.controller,
            &mut self.backend,
            &self.config,
            self.cancel.clone(),
        );
        finder.run(self.run_id).await
    }

    /// Sweep the configured grid with the calibrated centre offset applied
    /// to every stage target.
    pub async fn run_grid(&mut self, estimate: &CentreEstimate) -> GridScanOutcome {
        self.controller
            .set_centre_offset(estimate.x_offset, estimate.y_offset);
        let pattern = RingDensityPattern::new(self.config.grid.arc_step);
        let plan = GridPlan::build(
            &self.config.grid,
            &pattern,
            self.config.motors.z_at_pmt_centre,
        );
        let mut scanner = GridScanner::new(
            &mut self.controller,
            &mut self.backend,
            &self.config.statistics,
            self.cancel.clone(),
        );
        scanner.run(&plan, self.run_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DaqConfig, PicoampConfig};
    use crate::sim::{SimBench, SimParams};
    use serial_test::serial;

    fn sim_config() -> ScanConfig {
        ScanConfig {
            daq: DaqConfig {
                picoamp: Some(PicoampConfig::default()),
                ..DaqConfig::default()
            },
            ..ScanConfig::default()
        }
    }

    fn open_session() -> ScanResult<ScanSession> {
        let bench = SimBench::new(SimParams::default());
        ScanSession::new(
            sim_config(),
            Box::new(bench.motor()),
            Box::new(bench.acquisition()),
        )
    }

    #[test]
    fn test_cancel_token_shares_state() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    #[serial]
    async fn test_second_session_is_rejected() {
        let first = open_session().unwrap();
        let second = open_session();
        assert!(matches!(second, Err(ScanError::SessionActive)));
        drop(first);
    }

    #[tokio::test]
    #[serial]
    async fn test_lock_releases_on_drop() {
        {
            let session = open_session().unwrap();
            assert!(!session.run_id().is_nil());
        }
        let reopened = open_session().unwrap();
        assert!(!reopened.cancel_token().is_cancelled());
    }
}
