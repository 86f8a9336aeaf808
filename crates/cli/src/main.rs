use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use native_decoder::{create_backend, describe_platform_decoder, CodecKind, DecoderConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use stream_bridge::nal::nal_units;
use stream_bridge::{
    BridgeConfig, BridgeController, CsdStore, MimeType, Packet, StreamInfo, StreamSource,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod annexb;
mod source;

use annexb::{nal_type_name, split_access_units};
use source::{FileStreamSource, HeadlessTarget};

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Stream bridge CLI - replay and inspect camera elementary streams")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an Annex-B elementary stream through the decode pipeline
    Replay {
        /// Elementary stream file (.h264 / .h265)
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = CodecArg::H264)]
        codec: CodecArg,

        /// Width reported by the stream metadata (0 = unknown)
        #[arg(long, default_value_t = 0)]
        width: u32,

        /// Height reported by the stream metadata (0 = unknown)
        #[arg(long, default_value_t = 0)]
        height: u32,

        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Pace delivery at the stream frame rate
        #[arg(long)]
        realtime: bool,

        /// Bridge configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List NAL unit types and check that decoder init data is present
    Probe {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = CodecArg::H264)]
        codec: CodecArg,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which decoder backend this build uses
    Decoders,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CodecArg {
    H264,
    H265,
}

impl CodecArg {
    fn kind(self) -> CodecKind {
        match self {
            CodecArg::H264 => CodecKind::H264,
            CodecArg::H265 => CodecKind::H265,
        }
    }

    fn mime(self) -> MimeType {
        match self {
            CodecArg::H264 => MimeType::H264,
            CodecArg::H265 => MimeType::H265,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Replay {
            file,
            codec,
            width,
            height,
            fps,
            realtime,
            config,
        } => replay_command(&file, codec, width, height, fps, realtime, config.as_deref()),
        Commands::Probe { file, codec, json } => probe_command(&file, codec, json),
        Commands::Decoders => decoders_command(),
    }
}

fn replay_command(
    file: &Path,
    codec: CodecArg,
    width: u32,
    height: u32,
    fps: u32,
    realtime: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => BridgeConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let units = split_access_units(&data, codec.kind());
    ensure!(!units.is_empty(), "no NAL units found in {}", file.display());
    info!(
        "Replaying {} access units from {:?} ({} bytes)",
        units.len(),
        file,
        data.len()
    );

    let info = StreamInfo {
        width: width as i32,
        height: height as i32,
        frame_rate: fps as i32,
        mime_type: Some(codec.mime()),
        presentation_time_ms: None,
    };
    let interval = realtime.then(|| Duration::from_secs(1) / fps.max(1));
    let total = units.len() as u64;
    let source = Arc::new(FileStreamSource::new(units, info, interval));

    let provided = source.clone();
    let bridge = BridgeController::new(
        config,
        Box::new(move || Some(provided.clone() as Arc<dyn StreamSource>)),
        create_backend(DecoderConfig::default()),
    );
    let target = Arc::new(HeadlessTarget::new(1));
    bridge.start_or_update(target.clone(), width, height);
    ensure!(bridge.is_started(), "bridge failed to start");

    let budget = Duration::from_secs(5) + interval.unwrap_or_default() * total as u32;
    ensure!(
        source.wait_finished(budget),
        "stream delivery did not finish within {budget:?}"
    );
    wait_for_quiet(&target, Duration::from_millis(200), Duration::from_secs(5));

    let received = bridge.client_stats().unwrap_or_default();
    bridge.stop();

    println!("Access units: {total}");
    println!("Delivered:    {}", source.delivered());
    println!("Received:     {} ({} bytes)", received.frames, received.bytes);
    println!("Presented:    {}", target.presented());
    println!("Last PTS:     {} us", target.last_pts_us());
    println!("Keep-alive:   {}", source.keep_alive_requested());
    Ok(())
}

/// Wait until the target stops receiving frames for `quiet`, at most `limit`
fn wait_for_quiet(target: &HeadlessTarget, quiet: Duration, limit: Duration) {
    let started = Instant::now();
    let mut last = target.presented();
    let mut last_change = Instant::now();
    while started.elapsed() < limit && last_change.elapsed() < quiet {
        thread::sleep(Duration::from_millis(10));
        let now = target.presented();
        if now != last {
            last = now;
            last_change = Instant::now();
        }
    }
}

#[derive(Serialize)]
struct ProbeReport {
    file: String,
    codec: String,
    bytes: usize,
    access_units: usize,
    nal_units: BTreeMap<String, usize>,
    init_data_ready: bool,
}

fn probe_command(file: &Path, codec: CodecArg, json: bool) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let kind = codec.kind();

    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for unit in nal_units(&data, kind) {
        *counts.entry(unit.nal_type).or_default() += 1;
    }

    let mut csd = CsdStore::new();
    csd.update_from(&Packet {
        bytes: data.clone(),
        pts_us: 0,
        codec: codec.mime(),
        width: 0,
        height: 0,
        frame_rate: 0,
    });

    let report = ProbeReport {
        file: file.display().to_string(),
        codec: kind.mime().to_string(),
        bytes: data.len(),
        access_units: split_access_units(&data, kind).len(),
        nal_units: counts
            .iter()
            .map(|(t, n)| (format!("{t:02} {}", nal_type_name(*t, kind)), *n))
            .collect(),
        init_data_ready: csd.is_ready_for(kind),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} ({}, {} bytes)", report.file, report.codec, report.bytes);
    println!("Access units: {}", report.access_units);
    println!("NAL units:");
    for (name, count) in &report.nal_units {
        println!("  {name:<10} {count}");
    }
    println!(
        "Decoder init data: {}",
        if report.init_data_ready {
            "complete"
        } else {
            "missing"
        }
    );
    Ok(())
}

fn decoders_command() -> Result<()> {
    info!("Detecting decoder backend...");
    println!("{}", describe_platform_decoder());
    Ok(())
}
