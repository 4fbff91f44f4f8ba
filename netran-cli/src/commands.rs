use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use netran_accounting::TrafficAccountant;
use netran_capture::{PcapCapture, PcapDeviceLookup};
use netran_config::NetranConfig;
use netran_core::{DeviceInfo, DeviceLookup};
use netran_engine::{Orchestrator, PipelineSettings, ShutdownReport};
use netran_telemetry::MetricsRecorder;
use tokio::signal;
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use validator::Validate;

const WATCHDOG_PERIOD: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "netran", version, about)]
pub struct Cli {
    /// Configuration file (defaults to config/netran.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List capture devices, or resolve one by name or address
    Devices(DevicesArgs),
    /// Capture and account traffic until interrupted
    Run(RunArgs),
    /// Print the effective configuration as YAML
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct DevicesArgs {
    /// Device name or IP address to resolve
    #[arg(short, long)]
    pub lookup: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Device name or IP address (overrides capture.device)
    #[arg(short, long)]
    pub device: Option<String>,
    /// Measurement destination (overrides accounting.destination)
    #[arg(long)]
    pub destination: Option<IpAddr>,
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub duration: Option<u64>,
    /// Primitive debug level, 0-3 (overrides telemetry.debug_level)
    #[arg(long)]
    pub debug: Option<u8>,
    /// Print Prometheus metrics after shutdown
    #[arg(long)]
    pub metrics: bool,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<NetranConfig> {
    let config = match path {
        Some(path) => NetranConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NetranConfig::load().context("loading configuration")?,
    };
    Ok(config)
}

pub fn print_config(config: &NetranConfig) -> anyhow::Result<ExitCode> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(ExitCode::SUCCESS)
}

pub fn list_devices(args: DevicesArgs) -> anyhow::Result<ExitCode> {
    let lookup = PcapDeviceLookup::new();

    if let Some(filter) = args.lookup.as_deref() {
        return match lookup.find(Some(filter))? {
            Some(device) => {
                print_device(&device);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("no device matches {filter:?}");
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let devices = lookup.list()?;
    if devices.is_empty() {
        eprintln!("no capture devices found (missing capture permissions?)");
        return Ok(ExitCode::FAILURE);
    }
    for device in &devices {
        print_device(device);
    }
    match lookup.find(None)? {
        Some(default) => println!("default: {}", default.name),
        None => println!("default: <none>"),
    }
    Ok(ExitCode::SUCCESS)
}

fn print_device(device: &DeviceInfo) {
    let addresses: Vec<String> = device.addresses.iter().map(ToString::to_string).collect();
    let mut flags = Vec::new();
    if device.up {
        flags.push("up");
    }
    if device.loopback {
        flags.push("loopback");
    }
    println!(
        "{:<16} [{}] {} {}",
        device.name,
        flags.join(","),
        addresses.join(" "),
        device.description.as_deref().unwrap_or("")
    );
}

pub async fn run_pipeline(args: RunArgs, mut config: NetranConfig) -> anyhow::Result<ExitCode> {
    if let Some(device) = args.device {
        config.capture.device = Some(device);
    }
    if let Some(destination) = args.destination {
        config.accounting.destination = destination;
    }
    if let Some(level) = args.debug {
        config.telemetry.debug_level = level;
    }
    config.validate().context("invalid command line overrides")?;

    let settings = PipelineSettings::from(&config);
    let capture = PcapCapture::new(config.capture.max_blocks_per_batch);

    let mut pipeline = match Orchestrator::init(
        &settings,
        &PcapDeviceLookup::new(),
        capture,
        TrafficAccountant::new(),
        MetricsRecorder::new()?,
    ) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            stage("init", Err(e.to_string()));
            return Ok(ExitCode::FAILURE);
        }
    };
    stage("init", Ok(()));
    info!(
        device = %pipeline.device().name,
        destination = %settings.destination,
        "pipeline ready"
    );

    let started = pipeline.start();
    stage("start", started.as_ref().map(|_| ()).map_err(ToString::to_string));

    if started.is_ok() {
        let reason = tokio::select! {
            result = signal::ctrl_c() => match result {
                Ok(()) => "interrupted",
                Err(e) => {
                    warn!(error = %e, "cannot listen for Ctrl-C");
                    "signal handler failed"
                }
            },
            _ = elapsed(args.duration) => "duration elapsed",
            _ = watchdog(&pipeline) => "worker terminated",
        };
        info!(reason, "stopping pipeline");
    }

    // stop() joins threads with bounded waits; keep it off the runtime.
    let (pipeline, report) = spawn_blocking(move || {
        let report = pipeline.stop();
        (pipeline, report)
    })
    .await?;

    let clean = started.is_ok() && report.is_clean();
    print_report(&report);

    let statistics = pipeline.statistics();
    print_counters("accounting", &statistics.accounting);
    print_counters("capture", &statistics.capture);

    if args.metrics || config.telemetry.metrics {
        println!("{}", pipeline.metrics().gather_metrics()?);
    }

    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn elapsed(duration: Option<u64>) {
    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Resolves once either worker thread has exited on its own.
async fn watchdog<C, A>(pipeline: &Orchestrator<C, A>)
where
    C: netran_core::CapturePrimitive,
    A: netran_core::AccountingPrimitive,
{
    let mut tick = tokio::time::interval(WATCHDOG_PERIOD);
    loop {
        tick.tick().await;
        if !pipeline.is_running() {
            return;
        }
    }
}

fn stage(name: &str, result: Result<(), String>) {
    match result {
        Ok(()) => println!("{name}: ok"),
        Err(detail) => println!("{name}: FAILED ({detail})"),
    }
}

fn print_report(report: &ShutdownReport) {
    let accounting = &report.accounting;
    match &accounting.outcome {
        Ok(run) => println!(
            "accounting run: ok ({} batches, {} blocks, max {} blocks per batch)",
            run.batches_accounted, run.blocks_accounted, run.max_block_count
        ),
        Err(e) => println!("accounting run: FAILED ({e})"),
    }
    if accounting.close_code == 0 {
        stage("accounting stop", Ok(()));
    } else {
        stage(
            "accounting stop",
            Err(format!("close returned {}", accounting.close_code)),
        );
    }

    let capture = &report.capture;
    match &capture.outcome {
        Ok(run) => println!(
            "capture run: ok ({} queued, {} discarded, {} saturation waits)",
            run.batches_queued, run.batches_discarded, run.saturation_waits
        ),
        Err(e) => println!("capture run: FAILED ({e})"),
    }
    if capture.status.is_ok() {
        stage("capture stop", Ok(()));
    } else {
        stage(
            "capture stop",
            Err(format!(
                "{} (code {})",
                capture.status.message, capture.status.code
            )),
        );
    }
}

fn print_counters(component: &str, counters: &netran_core::Counters) {
    println!("{component} statistics:");
    for (name, value) in counters {
        println!("  {name:<24} {value}");
    }
}
