use anyhow::{Result, anyhow, bail};
use bootstick_core::config::ProvisionConfig;
use bootstick_core::device::Device;
use bootstick_core::pipeline::{Outcome, Provisioner};
use bootstick_core::progress::{Reporter, Severity};
use bootstick_core::request::{BootMode, FileSystem, ProvisionRequest};
use bootstick_core::system::{HostSystem, System};
use bootstick_core::tools::{ToolReport, check_tools};
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bootstick")]
#[command(about = "Create bootable USB drives from ISO images", version)]
struct Cli {
    /// Increase log verbosity (-v for info, -vv for debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn a removable device into bootable media from an ISO image
    Write {
        /// ISO image to write
        #[arg(required = true)]
        image: PathBuf,

        /// Target device, e.g. /dev/sdb (asked for interactively if omitted)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Boot mode of the target machine: uefi or legacy
        #[arg(short, long, default_value = "uefi")]
        mode: BootMode,

        /// File system for the boot partition: fat32, ntfs or exfat
        #[arg(long = "fs", default_value = "fat32")]
        file_system: FileSystem,

        /// Volume label (derived from the image name if omitted)
        #[arg(short, long)]
        label: Option<String>,

        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,

        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// List available removable devices
    List,
    /// Report which of the required external tools are installed
    Check,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Presents an interactive menu for the user to select a device.
fn select_device(devices: &[Device], prompt: &str) -> Result<Device> {
    if devices.is_empty() {
        return Err(anyhow!("No removable devices found."));
    }

    let items: Vec<String> = devices.iter().map(|d| d.to_string()).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;

    Ok(devices[selection].clone())
}

/// Presents a final "Yes/No" confirmation to the user.
fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}

fn print_tool_report(report: &ToolReport) {
    if report.missing_required.is_empty() {
        println!("{} All required tools are installed.", style("OK:").green().bold());
    } else {
        println!(
            "{} Missing required tools: {}",
            style("ERROR:").red().bold(),
            report.missing_required.join(", ")
        );
    }
    if !report.missing_optional.is_empty() {
        println!(
            "{} Missing optional tools: {}",
            style("WARNING:").yellow().bold(),
            report.missing_optional.join(", ")
        );
    }
    let hints = report.install_hints();
    if !hints.is_empty() {
        println!("\nInstall them with:");
        for hint in hints {
            println!("  {hint}");
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Feeds pipeline progress into a progress bar, and log lines above it.
struct CliReporter {
    bar: ProgressBar,
}

impl Reporter for CliReporter {
    fn report(&self, percent: u8, status: &str) {
        self.bar.set_position(u64::from(percent));
        self.bar.set_message(status.to_string());
    }

    fn log(&self, message: &str, severity: Severity) {
        let tag = match severity {
            Severity::Info => style(severity).dim(),
            Severity::Warning => style(severity).yellow().bold(),
            Severity::Error => style(severity).red().bold(),
            Severity::Success => style(severity).green().bold(),
        };
        self.bar.println(format!("[{tag}] {message}"));
    }
}

fn write(
    image: PathBuf,
    device: Option<PathBuf>,
    mode: BootMode,
    file_system: FileSystem,
    label: Option<String>,
    yes: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = ProvisionConfig::load(config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");
    if !is_root() && config.privilege_command.is_none() {
        println!(
            "{} Not running as root. Most steps need root privileges; \
             run with sudo or set privilege_command.",
            style("WARNING:").yellow().bold()
        );
    }

    let system: Arc<dyn System> =
        Arc::new(HostSystem::with_privilege_command(config.privilege_command.clone()));

    let tools = check_tools(system.as_ref());
    if !tools.is_ready() {
        print_tool_report(&tools);
        bail!("Required tools are missing.");
    }

    let device = match device {
        Some(path) => path,
        None => {
            let devices = bootstick_core::platform::get_removable_devices()?;
            select_device(&devices, "Select the target device to WRITE to")?.path
        }
    };

    let mut builder = ProvisionRequest::builder(&image, &device)
        .boot_mode(mode)
        .file_system(file_system);
    if let Some(label) = label {
        builder = builder.label(label);
    }
    let request = builder.build()?;

    println!(
        "{} This will erase all data on '{}'.",
        style("WARNING:").red().bold(),
        device.display(),
    );
    println!("  Device:      {}", style(device.display()).cyan());
    println!("  Image:       {}", style(image.display()).cyan());
    println!(
        "  Boot mode:   {} ({})",
        style(request.boot_mode()).cyan(),
        request.scheme()
    );
    println!("  File system: {}", style(request.file_system()).cyan());
    println!("  Label:       {}", style(request.label()).cyan());
    println!();

    if !yes && !confirm_operation("Are you sure you want to proceed?")? {
        println!("Write operation cancelled.");
        return Ok(());
    }

    println!();

    // A run cannot be stopped half-way without leaving the device in pieces,
    // so the first Ctrl+C only warns.
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nAborted. The device is probably unusable and must be written again.");
            std::process::exit(130);
        }
        eprintln!(
            "\n{} Interrupting now leaves the device half-written. \
             Press Ctrl+C again to abort anyway.",
            style("WARNING:").yellow().bold()
        );
    })?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.green/black}] {pos:>3}% {msg}")?
            .progress_chars("■ "),
    );
    bar.enable_steady_tick(Duration::from_millis(200));

    let provisioner = Provisioner::new(system, config);
    let reporter = Arc::new(CliReporter { bar: bar.clone() });
    let report = provisioner.start(request, reporter)?.join();

    match report.outcome {
        Outcome::Succeeded => {
            bar.finish_with_message("Complete!");
            println!(
                "\n✨ {} is ready to boot from {}.",
                style(device.display()).cyan(),
                style(image.display()).cyan()
            );
            Ok(())
        }
        Outcome::Failed(reason) => {
            bar.abandon_with_message("❌ Operation failed.");
            Err(anyhow!("{reason} (failed while {})", report.stage))
        }
        Outcome::InProgress => Err(anyhow!("provisioning ended without an outcome")),
    }
}

fn list() -> Result<()> {
    let devices = bootstick_core::platform::get_removable_devices()?;
    if devices.is_empty() {
        println!("No removable devices found.");
        return Ok(());
    }

    println!("Found {} removable devices:", devices.len());
    println!(
        "\n  {:<15} {:<24} {:>7}  {}",
        "DEVICE", "MODEL", "SIZE", "LOCATION"
    );
    println!("  {:-<15} {:-<24} {:->7}  {:-<20}", "", "", "", "");
    for device in devices {
        let location = if device.mount_point.is_empty() {
            "(Not mounted)".to_string()
        } else {
            device.mount_point
        };
        println!(
            "  {:<15} {:<24} {:>7}  {}",
            device.path.display(),
            device.model,
            device.size,
            location
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Write {
            image,
            device,
            mode,
            file_system,
            label,
            yes,
            config,
        } => write(image, device, mode, file_system, label, yes, config),
        Commands::List => list(),
        Commands::Check => {
            let report = check_tools(&HostSystem::new());
            print_tool_report(&report);
            if !report.is_ready() {
                bail!("Required tools are missing.");
            }
            Ok(())
        }
    }
}
