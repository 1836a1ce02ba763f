//! Command-line front end for the PMT surface scanner.
//!
//! Subcommands run against the simulated bench; the driver traits are where
//! the real motor and DAQ backends plug in. Configuration comes from a TOML
//! file plus `PMT_SCAN_`-prefixed environment overrides; outcomes land as
//! JSON artifacts at the paths in the `cfg_paths` table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use pmt_scan::config::ScanConfig;
use pmt_scan::core::Completion;
use pmt_scan::scan::{
    CalibrationOutcome, CentreEstimate, GridPlan, RingDensityPattern, ScanSession,
};
use pmt_scan::sim::{SimBench, SimParams};

#[derive(Parser)]
#[command(name = "pmt_scan")]
#[command(about = "Motorized PMT surface scanner: centre calibration and grid acquisition")]
#[command(version)]
struct Cli {
    /// Path to the scan configuration (TOML).
    #[arg(long, default_value = "config/scan.toml")]
    config: PathBuf,

    /// Seed for the simulated bench.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the grid plan for the current configuration.
    Plan,
    /// Find the bulb centre and write the calibration artifact.
    Calibrate,
    /// Sweep the grid using a previously saved calibration.
    Scan,
    /// Calibrate, then sweep the grid, in one session.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ScanConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Plan => print_plan(&config),
        Commands::Calibrate => {
            let mut session = open_session(&config, cli.seed)?;
            let outcome = session.find_centre().await?;
            write_json(&config.paths.centre_file, &outcome)?;
            println!(
                "centre offset ({:+.3}, {:+.3}) mm, fitted radius {:.2} mm, residual rms {:.3} mm -> {}",
                outcome.estimate.x_offset,
                outcome.estimate.y_offset,
                outcome.estimate.fitted_radius,
                outcome.estimate.residual_rms,
                config.paths.centre_file.display()
            );
            Ok(())
        }
        Commands::Scan => {
            let estimate = read_centre(&config.paths.centre_file)?;
            let mut session = open_session(&config, cli.seed)?;
            run_grid(&mut session, &estimate, &config).await
        }
        Commands::Run => {
            let mut session = open_session(&config, cli.seed)?;
            let calibration = session.find_centre().await?;
            write_json(&config.paths.centre_file, &calibration)?;
            run_grid(&mut session, &calibration.estimate, &config).await
        }
    }
}

fn print_plan(config: &ScanConfig) -> anyhow::Result<()> {
    let pattern = RingDensityPattern::new(config.grid.arc_step);
    let plan = GridPlan::build(&config.grid, &pattern, config.motors.z_at_pmt_centre);
    let outermost = plan.positions().last().map_or(0.0, |p| p.radius);
    println!(
        "{} rings, {} points, outermost radius {:.2} mm",
        plan.rings(),
        plan.len(),
        outermost
    );
    Ok(())
}

/// Open a scan session over the simulated bench and hook Ctrl-C up to its
/// cancel token.
fn open_session(config: &ScanConfig, seed: u64) -> anyhow::Result<ScanSession> {
    let params = SimParams::from_config(config, seed);
    let bench = SimBench::new(params);
    let session = ScanSession::new(
        config.clone(),
        Box::new(bench.motor()),
        Box::new(bench.acquisition()),
    )?;
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling at the next position");
            cancel.cancel();
        }
    });
    Ok(session)
}

async fn run_grid(
    session: &mut ScanSession,
    estimate: &CentreEstimate,
    config: &ScanConfig,
) -> anyhow::Result<()> {
    let outcome = session.run_grid(estimate).await;
    // The artifact is written even for an aborted sweep; partial data is
    // still data.
    write_json(&config.paths.readings_file, &outcome)?;
    let degraded = outcome.readings.iter().filter(|r| r.degraded).count();
    println!(
        "{} readings ({} degraded), {} references, {} skipped -> {}",
        outcome.readings.len(),
        degraded,
        outcome.references.len(),
        outcome.skipped.len(),
        config.paths.readings_file.display()
    );
    match outcome.completion {
        Completion::Complete => Ok(()),
        Completion::Aborted { reason } => anyhow::bail!("grid scan aborted: {reason}"),
    }
}

fn read_centre(path: &Path) -> anyhow::Result<CentreEstimate> {
    let text = std::fs::read_to_string(path).with_context(|| {
        format!(
            "reading calibration artifact {} (run `calibrate` first)",
            path.display()
        )
    })?;
    let outcome: CalibrationOutcome =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(outcome.estimate)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "artifact written");
    Ok(())
}
