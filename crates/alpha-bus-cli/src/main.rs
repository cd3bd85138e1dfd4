use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use alpha_bus::{BusConfig, BusRegistry, BusReturn, BusSend, ChannelStats, Segment};
use anyhow::{bail, ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod settings;
mod signal;

use signal::{Meter, SignalGenerator, SignalKind};

const METER_INTERVAL: Duration = Duration::from_millis(33);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = cli.bus_config()?;
    match cli.command {
        Commands::Status(args) => execute_status(&config, args),
        Commands::Clear(args) => execute_clear(&config, args),
        Commands::Send(args) => execute_send(&config, args),
        Commands::Monitor(args) => execute_monitor(&config, args),
        Commands::Unlink => execute_unlink(&config),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Inspect and drive the shared audio bus")]
struct Cli {
    /// Bus config file (JSON). Defaults to the per-user config when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the segment name.
    #[arg(long, global = true)]
    segment: Option<String>,
    /// Override the directory holding the segment.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn bus_config(&self) -> Result<BusConfig> {
        let mut config = settings::load(self.config.as_deref())?;
        if let Some(segment) = &self.segment {
            config.segment_name = segment.clone();
        }
        if let Some(dir) = &self.dir {
            config.directory = Some(dir.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show writer counts and buffer levels for every channel.
    Status(StatusArgs),
    /// Drop buffered audio on one channel or all of them.
    Clear(ClearArgs),
    /// Act as a source and stream a test signal into a channel.
    Send(SendArgs),
    /// Act as a sink and print levels for a channel.
    Monitor(MonitorArgs),
    /// Remove the named segment so the next user starts fresh.
    Unlink,
}

#[derive(Args)]
struct StatusArgs {
    /// Print machine-readable JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ClearArgs {
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(1..=32),
        required_unless_present = "all",
        conflicts_with = "all"
    )]
    channel: Option<u32>,
    #[arg(long)]
    all: bool,
}

#[derive(Args)]
struct SendArgs {
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=32))]
    channel: u32,
    /// Length of the stream.
    #[arg(long)]
    seconds: f64,
    #[arg(long, value_enum, default_value_t = SignalKind::Sine)]
    signal: SignalKind,
    /// Sine frequency in Hz.
    #[arg(long, default_value_t = 440.0)]
    frequency: f32,
    /// Frames per block.
    #[arg(long, default_value_t = 512)]
    block: usize,
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
}

#[derive(Args)]
struct MonitorArgs {
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=32))]
    channel: u32,
    /// Frames per block.
    #[arg(long, default_value_t = 512)]
    block: usize,
    /// Stop after this long. Runs until interrupted otherwise.
    #[arg(long)]
    seconds: Option<f64>,
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,
}

#[derive(Serialize)]
struct StatusReport {
    segment: Option<PathBuf>,
    mapped: bool,
    channels: Vec<ChannelStats>,
}

fn open_bus(config: &BusConfig) -> Result<BusRegistry> {
    BusRegistry::try_open(config)
        .with_context(|| format!("failed to open bus segment '{}'", config.segment_name))
}

/// Attaches without creating, for commands that inspect or administer a bus
/// other processes set up.
fn attach_bus(config: &BusConfig) -> Result<BusRegistry> {
    BusRegistry::try_attach(config)
        .with_context(|| format!("failed to attach to bus segment '{}'", config.segment_name))
}

fn run_length(seconds: f64) -> Result<Duration> {
    ensure!(
        seconds.is_finite() && seconds > 0.0,
        "duration must be a positive number of seconds, got {seconds}"
    );
    Duration::try_from_secs_f64(seconds)
        .with_context(|| format!("duration of {seconds} seconds is out of range"))
}

fn block_period(block: usize, sample_rate: u32) -> Result<Duration> {
    ensure!(block > 0, "block size must be at least one frame");
    ensure!(sample_rate > 0, "sample rate must be positive");
    Ok(Duration::from_secs_f64(block as f64 / f64::from(sample_rate)))
}

fn execute_status(config: &BusConfig, args: StatusArgs) -> Result<()> {
    let bus = match BusRegistry::try_attach(config) {
        Ok(bus) => bus,
        Err(err) => {
            info!(%err, "bus segment unavailable");
            BusRegistry::unmapped()
        }
    };
    let report = StatusReport {
        segment: bus.segment().and_then(Segment::path).map(PathBuf::from),
        mapped: bus.is_initialized(),
        channels: bus.snapshot(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match &report.segment {
        Some(path) => println!("Segment {}", path.display()),
        None => println!("Segment '{}' offline", config.segment_name),
    }
    for stats in &report.channels {
        let marker = if stats.is_idle() { ' ' } else { '*' };
        println!("{marker} {stats}");
    }
    Ok(())
}

fn execute_clear(config: &BusConfig, args: ClearArgs) -> Result<()> {
    let bus = attach_bus(config)?;
    match args.channel {
        Some(channel) if !args.all => {
            bus.clear_channel(channel);
            println!("Cleared channel {channel}");
        }
        _ => {
            bus.clear_all();
            println!("Cleared all channels");
        }
    }
    Ok(())
}

fn execute_send(config: &BusConfig, args: SendArgs) -> Result<()> {
    let period = block_period(args.block, args.sample_rate)?;
    let length = run_length(args.seconds)?;

    let bus = Arc::new(open_bus(config)?);
    let mut send = BusSend::new(Arc::clone(&bus), args.channel);
    if !send.is_registered() {
        bail!(
            "channel {} refused the writer registration ({} active)",
            args.channel,
            bus.active_writers(args.channel)
        );
    }

    let mut generator = SignalGenerator::new(args.signal, args.frequency, args.sample_rate);
    let mut block = vec![0.0f32; args.block];
    let blocks =
        (length.as_secs_f64() * f64::from(args.sample_rate) / args.block as f64).ceil() as u64;
    info!(
        channel = args.channel,
        blocks,
        signal = ?args.signal,
        "streaming test signal"
    );

    let start = Instant::now();
    for index in 1..=blocks {
        generator.fill(&mut block);
        send.process(&block, None);
        let due = start + period.mul_f64(index as f64);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    println!(
        "Sent {} frames to channel {}",
        blocks * args.block as u64,
        args.channel
    );
    Ok(())
}

fn execute_monitor(config: &BusConfig, args: MonitorArgs) -> Result<()> {
    let period = block_period(args.block, args.sample_rate)?;
    let length = args.seconds.map(run_length).transpose()?;
    let bus = Arc::new(open_bus(config)?);
    let mut ret = BusReturn::new(Arc::clone(&bus), args.channel).with_keep_alive(false);

    let mut left = vec![0.0f32; args.block];
    let mut right = vec![0.0f32; args.block];
    let mut meter = Meter::default();
    let mut underruns = 0u32;

    let start = Instant::now();
    let stop = match length {
        Some(length) => Some(
            start
                .checked_add(length)
                .context("monitor duration is out of range")?,
        ),
        None => None,
    };
    let mut last_report = start;
    let mut index = 0u64;

    loop {
        let now = Instant::now();
        if stop.is_some_and(|stop| now >= stop) {
            break;
        }

        if ret.process(&mut left, Some(&mut right)) == 0 {
            underruns += 1;
        }
        meter.push(&left);
        meter.push(&right);

        if now.duration_since(last_report) >= METER_INTERVAL {
            let reading = meter.take();
            println!(
                "ch {:>2} | writers {:>2} | peak {:>7.1} dBFS | rms {:>7.1} dBFS | buffered {:>6} | underruns {}",
                args.channel,
                ret.active_writers(),
                reading.peak_dbfs(),
                reading.rms_dbfs(),
                bus.num_available(args.channel),
                underruns
            );
            underruns = 0;
            last_report = now;
        }

        index += 1;
        let due = start + period.mul_f64(index as f64);
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }
    Ok(())
}

fn execute_unlink(config: &BusConfig) -> Result<()> {
    let removed = Segment::unlink(config)
        .with_context(|| format!("failed to unlink bus segment '{}'", config.segment_name))?;
    if removed {
        println!("Removed segment '{}'", config.segment_name);
    } else {
        println!("Segment '{}' was not present", config.segment_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_overrides_apply_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "alpha-bus",
            "status",
            "--segment",
            "studio-b",
            "--dir",
            dir.path().to_str().unwrap(),
            "--config",
            dir.path().join("absent.json").to_str().unwrap(),
        ])
        .unwrap();
        assert!(cli.bus_config().is_err());

        let cli = Cli::try_parse_from([
            "alpha-bus",
            "--segment",
            "studio-b",
            "--dir",
            dir.path().to_str().unwrap(),
            "unlink",
        ])
        .unwrap();
        let config = cli.bus_config().unwrap();
        assert_eq!(config.segment_name, "studio-b");
        assert_eq!(config.directory.as_deref(), Some(dir.path()));
    }

    #[test]
    fn channel_arguments_are_range_checked() {
        assert!(Cli::try_parse_from(["alpha-bus", "monitor", "--channel", "0"]).is_err());
        assert!(Cli::try_parse_from(["alpha-bus", "monitor", "--channel", "33"]).is_err());
        assert!(Cli::try_parse_from(["alpha-bus", "clear"]).is_err());
        assert!(Cli::try_parse_from(["alpha-bus", "clear", "--channel", "3", "--all"]).is_err());
        assert!(Cli::try_parse_from(["alpha-bus", "clear", "--all"]).is_ok());
        assert!(Cli::try_parse_from(["alpha-bus", "send", "--channel", "32", "--seconds", "1"]).is_ok());
    }

    #[test]
    fn clear_and_unlink_operate_on_named_segment() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::in_directory(dir.path(), "cli");

        let bus = open_bus(&config).unwrap();
        bus.write_to_channel(4, &[0.5; 64], None);
        execute_clear(
            &config,
            ClearArgs {
                channel: Some(4),
                all: false,
            },
        )
        .unwrap();
        assert_eq!(bus.num_available(4), 0);

        execute_unlink(&config).unwrap();
        assert!(!config.segment_path().unwrap().exists());
    }

    #[test]
    fn short_send_reaches_the_bus() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::in_directory(dir.path(), "cli-send");
        let bus = open_bus(&config).unwrap();

        execute_send(
            &config,
            SendArgs {
                channel: 9,
                seconds: 0.005,
                signal: SignalKind::Sine,
                frequency: 440.0,
                block: 128,
                sample_rate: 48_000,
            },
        )
        .unwrap();
        assert_eq!(bus.total_written(9), 256);
        assert_eq!(bus.active_writers(9), 0);
    }

    fn monitor_args(seconds: Option<f64>) -> MonitorArgs {
        MonitorArgs {
            channel: 3,
            block: 64,
            seconds,
            sample_rate: 48_000,
        }
    }

    #[test]
    fn bad_durations_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::in_directory(dir.path(), "cli-durations");

        for seconds in [-1.0, 0.0, f64::NAN, f64::INFINITY, 1.0e300] {
            let err = execute_monitor(&config, monitor_args(Some(seconds))).unwrap_err();
            assert!(err.to_string().contains("duration"), "{err}");

            let err = execute_send(
                &config,
                SendArgs {
                    channel: 3,
                    seconds,
                    signal: SignalKind::Noise,
                    frequency: 440.0,
                    block: 64,
                    sample_rate: 48_000,
                },
            )
            .unwrap_err();
            assert!(err.to_string().contains("duration"), "{err}");
        }
        assert!(!config.segment_path().unwrap().exists());
    }

    #[test]
    fn short_monitor_drains_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::in_directory(dir.path(), "cli-monitor");
        let bus = open_bus(&config).unwrap();
        bus.write_to_channel(3, &[0.5; 256], None);

        execute_monitor(&config, monitor_args(Some(0.02))).unwrap();
        assert_eq!(bus.total_read(3), 256);
    }

    #[test]
    fn status_and_clear_do_not_create_a_segment() {
        let dir = tempfile::tempdir().unwrap();
        let config = BusConfig::in_directory(dir.path(), "cli-absent");

        execute_status(&config, StatusArgs { json: true }).unwrap();
        assert!(execute_clear(
            &config,
            ClearArgs {
                channel: None,
                all: true,
            },
        )
        .is_err());
        assert!(!config.segment_path().unwrap().exists());
    }
}
