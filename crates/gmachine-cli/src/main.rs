use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gmachine_core::{GMachineConfig, SnapshotSource, TrainingActivity};
use gmachine_services::{
    backend_for, DisplayMetrics, DisplaySurface, HardwareProbe, HardwareUnit, MetricsSink,
    SyntheticSampler, SyntheticSource, TelemetryScheduler, TelemetrySource, TrainingEvent,
    TrainingSimulator,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "gmachine_services=info,gmachine_cli=info";

#[derive(Parser)]
#[command(name = "gmachine")]
#[command(about = "G-Machine - GPU telemetry with synthetic fallback", long_about = None)]
struct Cli {
    /// Config file (defaults to <config_dir>/gmachine/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream GPU telemetry to the console
    Monitor(MonitorArgs),

    /// Probe hardware once and print the sensor tree
    Probe,
}

#[derive(Args, Default)]
struct MonitorArgs {
    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Skip hardware probing and always use synthetic readings
    #[arg(long)]
    synthetic: bool,

    /// Run the simulated training loop alongside the monitor
    #[arg(short, long)]
    train: bool,

    /// Number of training epochs
    #[arg(long)]
    epochs: Option<u32>,

    /// Delay between training epochs
    #[arg(long)]
    epoch_delay_ms: Option<u64>,

    /// Telemetry sampling interval
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = GMachineConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("Failed to load config from {}", path.display()),
            None => "Failed to load config".to_string(),
        })?;

    match cli.command {
        Some(Commands::Monitor(args)) => cmd_monitor(config, args).await?,
        Some(Commands::Probe) => cmd_probe(&config)?,
        None => cmd_monitor(config, MonitorArgs::default()).await?,
    }

    Ok(())
}

fn apply_overrides(config: &mut GMachineConfig, args: &MonitorArgs) -> Result<()> {
    if let Some(interval_ms) = args.interval_ms {
        config.telemetry.interval_ms = interval_ms;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }
    if let Some(delay) = args.epoch_delay_ms {
        config.training.epoch_delay_ms = delay;
    }
    config.validate().context("Invalid command line override")?;
    Ok(())
}

async fn cmd_monitor(mut config: GMachineConfig, args: MonitorArgs) -> Result<()> {
    apply_overrides(&mut config, &args)?;

    let activity = TrainingActivity::new();
    let source: Box<dyn TelemetrySource> = if args.synthetic {
        Box::new(SyntheticSource::new(
            SyntheticSampler::new(config.synthetic.clone()),
            activity.clone(),
        ))
    } else {
        Box::new(HardwareProbe::new(backend_for(&config.telemetry), &config))
    };

    let scheduler = TelemetryScheduler::new(
        source,
        SyntheticSampler::new(config.synthetic.clone()),
        activity.clone(),
        Duration::from_millis(config.telemetry.interval_ms),
    );
    let mut handle = scheduler.start();
    let mut sink = MetricsSink::with_surface(Box::new(ConsoleSurface::new(args.output)));

    let (mut events, cancel) = if args.train {
        TrainingSimulator::new(config.training.clone(), activity).start()
    } else {
        // closed channel; its branch is disabled below
        let (_tx, rx) = mpsc::channel(1);
        (rx, CancellationToken::new())
    };
    let mut training_open = args.train;

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = sleep_until(deadline) => break,
            event = events.recv(), if training_open => match event {
                Some(event) => print_training_event(&event, args.output)?,
                None => training_open = false,
            },
            _ = poll.tick() => {
                handle.drain_into(&mut sink);
            }
        }
    }

    cancel.cancel();
    let stats = handle.shutdown();
    handle.drain_into(&mut sink);

    if let Some(stats) = stats {
        info!(
            ticks = stats.ticks,
            real = stats.real,
            synthetic = stats.synthetic,
            read_failures = stats.read_failures,
            dropped = stats.dropped,
            published = sink.published(),
            "Monitor stopped"
        );
    }

    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn print_training_event(event: &TrainingEvent, output: OutputFormat) -> Result<()> {
    if output == OutputFormat::Json {
        let value = match event {
            TrainingEvent::Started {
                epochs,
                batch_size,
                learning_rate,
            } => serde_json::json!({
                "event": "started",
                "epochs": epochs,
                "batch_size": batch_size,
                "learning_rate": learning_rate,
            }),
            TrainingEvent::Epoch {
                epoch,
                epochs,
                loss,
                accuracy,
            } => serde_json::json!({
                "event": "epoch",
                "epoch": epoch,
                "epochs": epochs,
                "loss": loss,
                "accuracy": accuracy,
            }),
            TrainingEvent::Checkpoint { epoch, file } => serde_json::json!({
                "event": "checkpoint",
                "epoch": epoch,
                "file": file,
            }),
            TrainingEvent::Completed { epochs } => {
                serde_json::json!({ "event": "completed", "epochs": epochs })
            }
            TrainingEvent::Cancelled { epoch } => {
                serde_json::json!({ "event": "cancelled", "epoch": epoch })
            }
        };
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    match event {
        TrainingEvent::Started {
            epochs,
            batch_size,
            learning_rate,
        } => {
            println!();
            println!("Training started");
            println!("  Epochs:        {}", epochs);
            println!("  Batch size:    {}", batch_size);
            println!("  Learning rate: {}", learning_rate);
            println!();
        }
        TrainingEvent::Epoch {
            epoch,
            epochs,
            loss,
            accuracy,
        } => println!(
            "Epoch {}/{} - Loss: {:.4} - Accuracy: {:.4}",
            epoch, epochs, loss, accuracy
        ),
        TrainingEvent::Checkpoint { file, .. } => println!("Checkpoint saved: {}", file),
        TrainingEvent::Completed { .. } => println!("Training completed successfully!"),
        TrainingEvent::Cancelled { epoch } => println!("Training stopped after epoch {}", epoch),
    }
    Ok(())
}

/// Prints one line per published snapshot.
///
/// Field setters only record values; the line is emitted by `set_source`,
/// which the sink calls last.
struct ConsoleSurface {
    output: OutputFormat,
    current: DisplayMetrics,
}

impl ConsoleSurface {
    fn new(output: OutputFormat) -> Self {
        Self {
            output,
            current: DisplayMetrics {
                gpu_usage_text: String::new(),
                gpu_usage_gauge: 0.0,
                vram_text: String::new(),
                vram_gauge: 0.0,
                temperature_text: String::new(),
                temperature_gauge: 0.0,
                source: SnapshotSource::Synthetic,
            },
        }
    }

    fn render(&self) -> Result<String> {
        let m = &self.current;
        Ok(match self.output {
            OutputFormat::Table => format!(
                "[{:<9}] GPU {:>6} | VRAM {:>12} ({:>3.0}%) | Temp {:>5}",
                m.source.label(),
                m.gpu_usage_text,
                m.vram_text,
                m.vram_gauge,
                m.temperature_text,
            ),
            OutputFormat::Json => serde_json::to_string(m)?,
        })
    }
}

impl DisplaySurface for ConsoleSurface {
    fn set_gpu_usage(&mut self, text: &str, gauge: f64) {
        self.current.gpu_usage_text = text.to_string();
        self.current.gpu_usage_gauge = gauge;
    }

    fn set_vram_text(&mut self, text: &str) {
        self.current.vram_text = text.to_string();
    }

    fn set_vram_gauge(&mut self, gauge: f64) {
        self.current.vram_gauge = gauge;
    }

    fn set_temperature(&mut self, text: &str, gauge: f64) {
        self.current.temperature_text = text.to_string();
        self.current.temperature_gauge = gauge;
    }

    fn set_source(&mut self, source: SnapshotSource) {
        self.current.source = source;
        match self.render() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to render telemetry: {}", e),
        }
    }
}

fn cmd_probe(config: &GMachineConfig) -> Result<()> {
    let mut probe = HardwareProbe::new(backend_for(&config.telemetry), config);

    println!();
    println!("Hardware Probe:");
    println!("{:-<40}", "");
    println!("  Backend:    {:?}", config.telemetry.backend);
    println!("  Sysfs root: {}", config.telemetry.sysfs_root.display());
    println!("  State:      {:?}", probe.state());
    println!("  Capability: {:?}", probe.capability());
    println!();

    let mut found = false;
    for unit in probe.units() {
        print_unit(unit, 1);
        found = true;
    }
    if !found {
        println!("  No hardware units found");
    }

    if probe.capability().is_available() {
        match probe.refresh() {
            Ok(snapshot) => {
                println!();
                println!("Current Reading:");
                println!("{:-<40}", "");
                println!("  GPU Load:    {:.1}%", snapshot.gpu_load_pct);
                println!(
                    "  VRAM:        {:.1}/{:.1}GB",
                    snapshot.vram_used_gb, snapshot.vram_total_gb
                );
                println!("  Temperature: {:.0}°C", snapshot.gpu_temp_c);
            }
            Err(e) => println!("  Read failed: {}", e),
        }
    }
    println!();

    probe.release();
    Ok(())
}

fn print_unit(unit: &HardwareUnit, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{} ({:?})", indent, unit.name, unit.kind);
    for sensor in &unit.sensors {
        let value = match sensor.value {
            Some(v) => format!("{:.1}{}", v, sensor.kind.unit()),
            None => "-".to_string(),
        };
        println!("{}  {:<20} {}", indent, sensor.name, value);
    }
    for sub in &unit.sub_units {
        print_unit(sub, depth + 1);
    }
}
