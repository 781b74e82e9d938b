//! Local echo harness: every captured block is fed straight back as an inbound
//! chunk, so the microphone is heard through the speakers with one block of
//! latency plus the output lead.
//!
//! ```text
//! parley-loopback [--list-devices] [--seconds N] [--config PATH]
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use parley_core::{
    audio::{list_input_devices, list_output_devices, DeviceInfo},
    codec::EncodedBlock,
    EngineConfig, ParleyEngine,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    list_devices: bool,
    seconds: u64,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        list_devices: false,
        seconds: 10,
        config: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--list-devices" => args.list_devices = true,
            "--seconds" => {
                let raw = it.next().context("--seconds needs a value")?;
                args.seconds = raw
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {raw}"))?;
            }
            "--config" => {
                args.config = Some(PathBuf::from(it.next().context("--config needs a path")?));
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

fn print_devices(label: &str, devices: &[DeviceInfo]) {
    println!("{label}:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for d in devices {
        let mut tags = Vec::new();
        if d.is_default {
            tags.push("default");
        }
        if d.is_loopback_like {
            tags.push("loopback?");
        }
        if tags.is_empty() {
            println!("  {}", d.name);
        } else {
            println!("  {} [{}]", d.name, tags.join(", "));
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("parley_core=info,parley_loopback=info")
        }))
        .init();

    let args = parse_args()?;
    if args.list_devices {
        print_devices("Input devices", &list_input_devices());
        print_devices("Output devices", &list_output_devices());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::default(),
    };

    let (block_tx, block_rx) = crossbeam_channel::unbounded::<EncodedBlock>();
    let engine = ParleyEngine::start(config, block_tx).context("failed to start engine")?;
    engine.on_open()?;
    engine
        .start_recording()
        .context("failed to start recording")?;
    info!(seconds = args.seconds, "echoing microphone to speakers");

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    while Instant::now() < deadline {
        match block_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(block) => engine.on_audio_chunk(block.data, Some(block.mime_type.as_str()))?,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("engine dropped its outbound sink");
                break;
            }
        }
    }

    engine.stop_recording()?;
    engine.on_close("loopback finished")?;
    let stats = engine.diagnostics_snapshot();
    info!(
        sent = stats.blocks_sent,
        scheduled = stats.chunks_scheduled,
        dropped = stats.chunks_dropped,
        "loopback done"
    );
    engine.shutdown();
    Ok(())
}
