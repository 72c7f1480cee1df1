//! ota-apply - apply, pre-check and housekeep OTA update packages

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use ota_safeguard::{InstallFilesStep, PackageDescriptor, SnapshotStore, UpdateEngine, VehicleState};
use std::{path::PathBuf, process};

/// Exit code when the target may be left inconsistent.
const EXIT_ESCALATE: i32 = 2;

#[derive(Parser)]
#[command(name = "ota-apply")]
#[command(about = "Transactional over-the-air updates for a directory tree", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./ota-safeguard.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a package to a target directory
    Apply {
        /// Path to the package manifest
        #[arg(short, long)]
        manifest: PathBuf,
        /// Directory to update
        #[arg(short, long)]
        target: PathBuf,
        /// Vehicle state file; checked for applicability and updated on success
        #[arg(long)]
        vehicle_state: Option<PathBuf>,
    },

    /// Check a package's files and signature without applying it
    Verify {
        /// Path to the package manifest
        #[arg(short, long)]
        manifest: PathBuf,
    },

    /// Delete old snapshots beyond the configured keep count
    Prune,
}

fn main() {
    match run_application() {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run_application() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    let config = ota_safeguard::init(cli.config.as_deref()).context("failed to initialise")?;
    let mut engine = UpdateEngine::from_config(&config).context("failed to build update engine")?;

    match cli.command {
        Commands::Apply {
            manifest,
            target,
            vehicle_state,
        } => {
            let package = PackageDescriptor::from_manifest(&manifest)
                .with_context(|| format!("failed to load manifest {}", manifest.display()))?;

            let mut vehicle = match &vehicle_state {
                Some(path) => Some(
                    VehicleState::load_state(path)
                        .with_context(|| format!("failed to load vehicle state {}", path.display()))?,
                ),
                None => None,
            };
            if let Some(state) = &vehicle {
                if !state.is_update_applicable(package.version()) {
                    println!(
                        "Skipping '{}': version {} is not newer than installed {}",
                        package.package_id(),
                        package.version(),
                        state.current_version
                    );
                    return Ok(0);
                }
            }

            engine.add_update_step(InstallFilesStep);
            let report = engine.run_transaction(&package, &target);
            match &report.failure {
                None => println!("Applied '{}' {} to {}", package.package_id(), package.version(), target.display()),
                Some(e) => println!("Update '{}' {}: {}", package.package_id(), report.outcome, e),
            }

            if report.needs_escalation() {
                eprintln!("Target {} needs manual recovery", target.display());
                return Ok(EXIT_ESCALATE);
            }
            if !report.is_success() {
                return Ok(1);
            }

            if let (Some(state), Some(path)) = (vehicle.as_mut(), vehicle_state.as_ref()) {
                state.record_update(package.package_id(), package.version(), Utc::now());
                state
                    .save_state(path)
                    .with_context(|| format!("update applied but vehicle state {} was not saved", path.display()))?;
            }
            Ok(0)
        }
        Commands::Verify { manifest } => {
            let package = PackageDescriptor::from_manifest(&manifest)
                .with_context(|| format!("failed to load manifest {}", manifest.display()))?;
            engine.verify_package(&package)?;
            println!(
                "'{}' {} verified: {} files, {} bytes",
                package.package_id(),
                package.version(),
                package.files().len(),
                package.total_size()
            );
            Ok(0)
        }
        Commands::Prune => {
            let removed = engine.snapshot_store_mut().apply_retention()?;
            println!("Removed {} snapshot(s)", removed.len());
            for id in &removed {
                println!("  {}", id);
            }
            println!("{} snapshot(s) kept", engine.snapshot_store().list_snapshots().len());
            Ok(0)
        }
    }
}
