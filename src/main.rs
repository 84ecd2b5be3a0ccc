//! Refurbix - Disk imaging and restore for computer refurbishment triage
//!
//! A CLI tool that images and restores disks on retired computers and
//! computes the partition plans used to prepare them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod disk;
mod task;
mod utils;

use crate::config::TriageConfig;
use crate::disk::detection::{list_disks, probe_disk, Disk};
use crate::disk::planner::{make_efi_partition_plan, make_usb_stick_partition_plan, print_plan_summary};
use crate::task::imaging::{ImagingTask, RestoreTask};
use crate::task::runner::{drive_task, ProgressSink};
use crate::task::{Task, TaskState};
use crate::utils::error::RefurbixError;
use crate::utils::prompt::{prompt_select, warn_confirm};
use crate::utils::signal::install_signal_handlers;

#[derive(Parser)]
#[command(name = "refurbix")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Dry run mode - show the worker invocation without running it
    #[arg(short = 'n', long, global = true)]
    dry_run: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a compressed image of a partition
    Image {
        /// Source disk device (e.g., /dev/sda)
        #[arg(short, long)]
        device: Option<String>,

        /// Partition identifier (label, number, or device path)
        #[arg(short, long, default_value = "Linux")]
        partition: String,

        /// Destination image file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Restore a compressed image onto a partition
    Restore {
        /// Target disk device (e.g., /dev/sda)
        #[arg(short, long)]
        device: Option<String>,

        /// Partition identifier (label, number, or device path)
        #[arg(short, long, default_value = "Linux")]
        partition: String,

        /// Source image file
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Compute and print a partition plan for a disk
    Plan {
        /// Target disk device (e.g., /dev/sda)
        #[arg(short, long)]
        device: Option<String>,

        /// Plan for bootable USB media instead of an installed system
        #[arg(long)]
        usb: bool,

        /// Partition label for the USB data partition
        #[arg(long)]
        label: Option<String>,

        /// Plan for EFI boot
        #[arg(long)]
        efi: bool,

        /// ext4 tool version on the target (e.g., "1.42")
        #[arg(long)]
        ext4_version: Option<String>,
    },

    /// List available disks
    ListDisks {
        /// Show all block devices, not just suitable targets
        #[arg(short, long)]
        all: bool,
    },

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "refurbix.toml")]
        output: String,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let dry_run = cli.dry_run;
    if dry_run {
        info!("Running in dry-run mode - no worker will be spawned");
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Image {
            device,
            partition,
            output,
        } => {
            cmd_image(&config, device, &partition, &output, dry_run)?;
        }
        Commands::Restore {
            device,
            partition,
            source,
        } => {
            cmd_restore(&config, device, &partition, source, dry_run)?;
        }
        Commands::Plan {
            device,
            usb,
            label,
            efi,
            ext4_version,
        } => {
            cmd_plan(&config, device, usb, label.as_deref(), efi, ext4_version.as_deref())?;
        }
        Commands::ListDisks { all } => {
            cmd_list_disks(all)?;
        }
        Commands::GenerateConfig { output } => {
            cmd_generate_config(&output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<TriageConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path);
            Ok(TriageConfig::from_file(path)?)
        }
        None => Ok(TriageConfig::default()),
    }
}

/// Probe the given device, or let the user pick one from the list.
fn resolve_disk(device: Option<String>) -> Result<Disk> {
    if let Some(device) = device {
        return Ok(probe_disk(&device)?);
    }

    let mut disks = list_disks(false)?;
    if disks.is_empty() {
        return Err(RefurbixError::DeviceNotFound("no suitable disks".to_string()).into());
    }
    let choice = prompt_select("Select disk", &disks, 0)?;
    Ok(disks.swap_remove(choice))
}

fn require_root(dry_run: bool) -> Result<()> {
    if !dry_run && !nix::unistd::geteuid().is_root() {
        return Err(RefurbixError::NotRoot.into());
    }
    Ok(())
}

/// Renders task progress as an indicatif bar.
struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    fn new(description: &str) -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .expect("valid progress template")
                .progress_chars("#>-"),
        );
        bar.println(description.to_string());
        Self { bar }
    }
}

impl ProgressSink for ConsoleSink {
    fn on_state(&mut self, state: TaskState) {
        if state.is_terminal() {
            self.bar.finish();
        }
    }

    fn on_progress(&mut self, percent: f64, message: &str, eta_secs: f64) {
        self.bar.set_position(percent.round() as u64);
        self.bar
            .set_message(format!("{} (est {}s)", message, eta_secs.round() as i64));
    }
}

/// Run a prepared task under the console sink and report the outcome.
fn run_task(task: &mut dyn Task, poll_interval: Duration) -> Result<()> {
    install_signal_handlers();

    let mut sink = ConsoleSink::new(task.description());
    let state = drive_task(task, poll_interval, &mut sink)?;

    match state {
        TaskState::Succeeded => {
            println!("{}", "✓ Completed successfully".green());
            Ok(())
        }
        TaskState::Cancelled => {
            println!("{}", "Cancelled".yellow());
            Ok(())
        }
        _ => Err(anyhow::anyhow!("{}", task.message())),
    }
}

fn cmd_image(
    config: &TriageConfig,
    device: Option<String>,
    partition: &str,
    output: &std::path::Path,
    dry_run: bool,
) -> Result<()> {
    require_root(dry_run)?;
    let disk = resolve_disk(device)?;

    if dry_run {
        let part = disk
            .find_partition(partition)
            .ok_or_else(|| RefurbixError::Configuration(format!("No partition {}", partition)))?;
        println!(
            "  [dry-run] {} {} {}",
            config.workers.imaging,
            part.device_path,
            output.display()
        );
        return Ok(());
    }

    config.ensure_workers()?;
    let mut task = ImagingTask::new(disk, partition, output, &config.workers.imaging);
    run_task(&mut task, config.poll_interval())
}

fn cmd_restore(
    config: &TriageConfig,
    device: Option<String>,
    partition: &str,
    source: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    require_root(dry_run)?;
    let disk = resolve_disk(device)?;

    if dry_run {
        let part = disk
            .find_partition(partition)
            .ok_or_else(|| RefurbixError::Configuration(format!("No partition {}", partition)))?;
        let source = source
            .ok_or_else(|| RefurbixError::Configuration("restore requires a source image".to_string()))?;
        println!(
            "  [dry-run] {} {} {}",
            config.workers.restore,
            source.display(),
            part.device_path
        );
        return Ok(());
    }

    let source_size = match &source {
        Some(path) => std::fs::metadata(path)
            .map_err(|e| {
                RefurbixError::Configuration(format!(
                    "cannot read source image {}: {}",
                    path.display(),
                    e
                ))
            })?
            .len(),
        None => 0,
    };

    let warning = format!(
        "This will OVERWRITE partition {} on {}. This operation cannot be undone!",
        partition, disk.device_path
    );
    if !warn_confirm(&warning)? {
        return Err(RefurbixError::UserCancelled.into());
    }

    config.ensure_workers()?;
    let mut task = RestoreTask::new(
        disk,
        partition,
        source.as_deref(),
        source_size,
        &config.workers.restore,
    )?;
    run_task(&mut task, config.poll_interval())
}

fn cmd_plan(
    config: &TriageConfig,
    device: Option<String>,
    usb: bool,
    label: Option<&str>,
    efi: bool,
    ext4_version: Option<&str>,
) -> Result<()> {
    let disk = resolve_disk(device)?;
    let efi_boot = efi || config.plan.efi_boot;
    let ext4_version = ext4_version.or(config.plan.ext4_version.as_deref());

    let plan = if usb {
        make_usb_stick_partition_plan(&disk, label, ext4_version, efi_boot)
    } else {
        make_efi_partition_plan(&disk, ext4_version, efi_boot)
    };

    println!("Disk: {}", disk);
    print_plan_summary(&plan, disk.size_mib());
    Ok(())
}

fn cmd_list_disks(all: bool) -> Result<()> {
    let disks = list_disks(all)?;

    if disks.is_empty() {
        println!("No suitable disks found.");
        return Ok(());
    }

    println!(
        "{:<15} {:>10} {:<20} {:<6} {}",
        "DEVICE", "SIZE", "MODEL", "TYPE", "PARTITIONS"
    );
    println!("{}", "-".repeat(70));

    for disk in disks {
        let device = if disk.removable {
            disk.device_path.yellow().to_string()
        } else {
            disk.device_path.clone()
        };
        let partitions = disk
            .partitions
            .iter()
            .map(|p| p.label.clone().unwrap_or_else(|| p.number.to_string()))
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<15} {:>10} {:<20} {:<6} {}",
            device,
            disk.size_human(),
            disk.model.as_deref().unwrap_or("-"),
            disk.device_type,
            if partitions.is_empty() { "-".to_string() } else { partitions }
        );
    }

    Ok(())
}

fn cmd_generate_config(output: &str) -> Result<()> {
    let sample = TriageConfig::sample();
    let content = toml::to_string_pretty(&sample)?;
    std::fs::write(output, content)?;
    println!("✓ Sample configuration written to {}", output);
    Ok(())
}
