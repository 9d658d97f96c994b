use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use copy_ledger_core::{
    Device, DeviceType, EngineConfig, FileLocation, FileSafety, ScanEvent, ScanMode,
};
use copy_ledger_service::{init_engine, Engine, StartScan};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "copy-ledger",
    version,
    about = "Track where every copy of your files lives and which ones have no backup."
)]
struct Cli {
    /// Catalog database file. Overrides `database_path` from the config.
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// TOML config file.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Detect, list and classify storage devices.
    #[command(subcommand)]
    Devices(DeviceCommands),
    /// Fingerprint every file under a path and record where it lives.
    Scan(ScanArgs),
    /// Copy counts and safety for one content hash.
    Safety(HashArgs),
    /// Every recorded location of one content hash.
    Locations(HashArgs),
    /// Files without a cold copy.
    Unsafe,
    /// Duplicate groups ranked by reclaimable bytes.
    Waste(WasteArgs),
    /// Files recorded on one device.
    Files(DeviceArgs),
    /// Catalog totals.
    Stats,
    /// List a directory, directories first.
    Browse(BrowseArgs),
    /// Show environment, catalog and detected device information.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum DeviceCommands {
    /// Enumerate attached devices and record them.
    Detect,
    /// Show registered devices.
    List,
    /// Classify a device as hot, cold or unknown.
    SetType(SetTypeArgs),
    /// Register a mount point detection does not report.
    Register(RegisterArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliDeviceType {
    Hot,
    Cold,
    Unknown,
}

impl From<CliDeviceType> for DeviceType {
    fn from(value: CliDeviceType) -> Self {
        match value {
            CliDeviceType::Hot => DeviceType::Hot,
            CliDeviceType::Cold => DeviceType::Cold,
            CliDeviceType::Unknown => DeviceType::Unknown,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliScanMode {
    Quick,
    Full,
}

impl From<CliScanMode> for ScanMode {
    fn from(value: CliScanMode) -> Self {
        match value {
            CliScanMode::Quick => ScanMode::Quick,
            CliScanMode::Full => ScanMode::Full,
        }
    }
}

#[derive(Debug, Args)]
struct SetTypeArgs {
    #[arg(value_name = "DEVICE_ID")]
    device_id: String,
    #[arg(value_name = "TYPE")]
    device_type: CliDeviceType,
}

#[derive(Debug, Args)]
struct RegisterArgs {
    #[arg(value_name = "MOUNT")]
    mount: PathBuf,
    #[arg(long)]
    label: Option<String>,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    #[arg(long, default_value = "full")]
    mode: CliScanMode,

    /// Glob or substring excludes, in addition to the configured ones.
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1, action = ArgAction::Append)]
    exclude: Vec<String>,

    /// Delete index rows for files that no longer exist under PATH.
    #[arg(long)]
    reconcile: bool,
}

#[derive(Debug, Args)]
struct HashArgs {
    #[arg(value_name = "HASH")]
    hash: String,
}

#[derive(Debug, Args)]
struct WasteArgs {
    /// Only groups wasting at least this many bytes.
    #[arg(long, value_name = "BYTES")]
    threshold: Option<u64>,
}

#[derive(Debug, Args)]
struct DeviceArgs {
    #[arg(value_name = "DEVICE_ID")]
    device_id: String,
}

#[derive(Debug, Args)]
struct BrowseArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    let engine = init_engine(config).context("failed to open copy-ledger engine")?;
    let json = cli.json;

    match cli.command {
        Commands::Devices(command) => run_devices_command(engine, command, json),
        Commands::Scan(args) => run_scan_command(engine, args, json),
        Commands::Safety(args) => {
            let safety = engine.file_safety(&args.hash)?;
            match safety {
                Some(safety) => output(json, &safety, print_safety),
                None => {
                    if json {
                        println!("null");
                    } else {
                        println!("No locations recorded for {}", args.hash);
                    }
                    Ok(())
                }
            }
        }
        Commands::Locations(args) => {
            let locations = engine.file_locations(&args.hash)?;
            output(json, &locations, |locations| print_locations(locations))
        }
        Commands::Unsafe => {
            let unsafe_files = engine.unsafe_files()?;
            output(json, &unsafe_files, |files| {
                println!("{} file(s) without a cold copy:", files.len());
                for file in files {
                    println!(
                        "- {} {} copies={} hot={} cold={} {}",
                        short_hash(&file.content_hash),
                        human_bytes(file.file_size),
                        file.total_copies,
                        file.hot_copies,
                        file.cold_copies,
                        file.representative_name
                    );
                }
            })
        }
        Commands::Waste(args) => {
            let candidates = engine.waste_candidates(args.threshold)?;
            output(json, &candidates, |candidates| {
                let total = candidates
                    .iter()
                    .fold(0_u64, |sum, c| sum.saturating_add(c.wasted_bytes));
                println!(
                    "{} duplicate group(s), {} reclaimable:",
                    candidates.len(),
                    human_bytes(total)
                );
                for candidate in candidates {
                    println!(
                        "- {} {} x{} wasted={} {}",
                        short_hash(&candidate.content_hash),
                        human_bytes(candidate.file_size),
                        candidate.total_copies,
                        human_bytes(candidate.wasted_bytes),
                        candidate.representative_name
                    );
                }
            })
        }
        Commands::Files(args) => {
            let files = engine.files_on_device(&args.device_id)?;
            output(json, &files, |files| print_locations(files))
        }
        Commands::Stats => {
            let stats = engine.dashboard_stats()?;
            output(json, &stats, |stats| {
                println!("Distinct files: {}", stats.total_files);
                println!("Locations: {}", stats.total_locations);
                println!("Unsafe files: {}", stats.unsafe_files);
                println!("Devices: {}", stats.total_devices);
                println!("Distinct content size: {}", human_bytes(stats.total_size_bytes));
            })
        }
        Commands::Browse(args) => {
            let entries = engine.browse_directory(&args.path)?;
            output(json, &entries, |entries| {
                for entry in entries {
                    if entry.is_dir {
                        println!("{}/", entry.name);
                    } else {
                        println!("{} ({})", entry.name, human_bytes(entry.size));
                    }
                }
            })
        }
        Commands::Doctor => run_doctor_command(engine, json),
    }
}

fn run_devices_command(engine: &Engine, command: DeviceCommands, json: bool) -> Result<()> {
    match command {
        DeviceCommands::Detect => {
            let report = engine.detect_devices()?;
            output(json, &report, |report| {
                println!("Detected {} device(s).", report.devices.len());
                print_devices(&report.devices);
                for failure in &report.failures {
                    println!(
                        "Failed [{}] {}: {}",
                        failure.source,
                        failure.mount_point.as_deref().unwrap_or("-"),
                        failure.reason
                    );
                }
            })
        }
        DeviceCommands::List => {
            let devices = engine.list_devices()?;
            output(json, &devices, |devices| print_devices(devices))
        }
        DeviceCommands::SetType(args) => {
            let device = engine.set_device_type(&args.device_id, args.device_type.into())?;
            output(json, &device, |device| {
                println!("{} is now {}", device.label, device.device_type)
            })
        }
        DeviceCommands::Register(args) => {
            let device = engine.register_device(&args.mount, args.label)?;
            output(json, &device, |device| {
                println!("Registered {} ({}) at {}", device.label, device.id, device.mount_point)
            })
        }
    }
}

fn run_scan_command(engine: &Engine, args: ScanArgs, json: bool) -> Result<()> {
    let handle = engine.start_scan(StartScan {
        target: args.path,
        mode: args.mode.into(),
        excludes: args.exclude,
        reconcile: args.reconcile.then_some(true),
    })?;
    debug!("scan {} running", handle.scan_id());

    for event in handle.iter() {
        if json {
            println!(
                "{}",
                serde_json::to_string(&event).context("failed to serialize scan event")?
            );
            continue;
        }
        match event {
            ScanEvent::Started { total_files } => println!("Scanning {total_files} file(s)..."),
            ScanEvent::Progress { scanned, total } => println!("  {scanned}/{total}"),
            ScanEvent::FileHashed { .. } => {}
            ScanEvent::Error { message } => println!("Warning: {message}"),
            ScanEvent::Finished {
                scanned,
                hashed,
                added,
                removed,
            } => println!(
                "Finished: {scanned} scanned, {hashed} hashed, {added} added, {removed} removed."
            ),
            ScanEvent::Cancelled { scanned, total } => {
                println!("Cancelled after {scanned}/{total} file(s).")
            }
            ScanEvent::Failed { reason } => println!("Failed: {reason}"),
        }
    }

    let summary = handle.join()?;
    debug!("scan {} ended as {:?}", summary.scan_id, summary.state);
    Ok(())
}

fn run_doctor_command(engine: &Engine, json: bool) -> Result<()> {
    let info = engine.doctor()?;
    output(json, &info, |info| {
        println!("OS: {} ({})", info.os, info.arch);
        if let Some(current_dir) = &info.current_dir {
            println!("Current directory: {}", current_dir);
        }
        println!(
            "Catalog: {} (schema v{})",
            info.catalog_path.as_deref().unwrap_or("in memory"),
            info.schema_version
        );
        println!("Registered devices: {}", info.registered_devices);
        println!("Attached devices: {}", info.attached.len());
        for device in &info.attached {
            println!(
                "- {} [{}] total={} free={} type={} removable={}",
                device.label,
                device.mount_point,
                human_bytes(device.total_bytes),
                human_bytes(device.available_bytes),
                device.device_type,
                device.is_removable
            );
        }
        for failure in &info.detection_failures {
            println!("Detection failure [{}]: {}", failure.source, failure.reason);
        }
        for note in &info.notes {
            println!("Note: {}", note);
        }
    })
}

fn output<T: Serialize>(json: bool, value: &T, render: impl FnOnce(&T)) -> Result<()> {
    if json {
        let payload = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        println!("{payload}");
    } else {
        render(value);
    }
    Ok(())
}

fn print_devices(devices: &[Device]) {
    for device in devices {
        println!(
            "- {} {} [{}] {} free of {} last seen {}",
            device.id,
            device.label,
            device.mount_point,
            human_bytes(device.available_bytes),
            human_bytes(device.total_bytes),
            device.last_seen.format("%Y-%m-%d %H:%M")
        );
        println!("  type={}", device.device_type);
    }
}

fn print_locations(locations: &[FileLocation]) {
    for location in locations {
        println!(
            "- {} {} {} ({}, {})",
            location.device_id,
            location.file_path,
            human_bytes(location.file_size),
            short_hash(&location.content_hash),
            location.scan_mode
        );
    }
}

fn print_safety(safety: &FileSafety) {
    println!("{} ({})", safety.representative_name, human_bytes(safety.file_size));
    println!("Hash: {}", safety.content_hash);
    println!(
        "Copies: {} total, {} hot, {} cold",
        safety.total_copies, safety.hot_copies, safety.cold_copies
    );
    println!(
        "Safe: {}{}",
        if safety.is_safe { "yes" } else { "no" },
        if safety.fully_verified {
            ""
        } else {
            " (includes quick-mode matches)"
        }
    );
    print_locations(&safety.locations);
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{human_bytes, short_hash, Cli, Commands, DeviceCommands};

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "copy-ledger",
            "devices",
            "set-type",
            "drive-1",
            "cold",
            "--json",
            "--db",
            "/tmp/ledger.db",
        ])
        .expect("parses");
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Devices(DeviceCommands::SetType(_))
        ));
    }

    #[test]
    fn scan_collects_repeated_excludes() {
        let cli = Cli::try_parse_from([
            "copy-ledger",
            "scan",
            "/media/backup",
            "--mode",
            "quick",
            "--exclude",
            "**/*.tmp",
            "--exclude",
            "node_modules",
        ])
        .expect("parses");
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.exclude.len(), 2);
        assert!(!args.reconcile);
    }

    #[test]
    fn exclude_takes_one_value_before_the_path() {
        let cli = Cli::try_parse_from([
            "copy-ledger",
            "scan",
            "--exclude",
            "cache",
            "/media/backup",
        ])
        .expect("parses");
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.path, std::path::PathBuf::from("/media/backup"));
        assert_eq!(args.exclude, vec!["cache".to_string()]);
    }

    #[test]
    fn human_bytes_scales_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1536), "1.5 KB");
        assert_eq!(short_hash("abc"), "abc");
    }
}
