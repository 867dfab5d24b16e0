//! Command-line front end: print a file's format, metadata and envelope.

use std::path::PathBuf;

use wavepeek::{AudioFileHandle, EngineConfig, config, logging};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }

    let Some(args) = CliArgs::parse(std::env::args().skip(1)) else {
        eprintln!("Usage: wavepeek <audio-file> [--points N]");
        std::process::exit(2);
    };

    let engine_config = config::load_or_default().unwrap_or_else(|err| {
        tracing::warn!("Config unavailable, using defaults: {err}");
        EngineConfig::default()
    });
    let point_count = args.points.unwrap_or(engine_config.default_point_count);

    let handle = AudioFileHandle::open(&args.path)?;
    let native = handle.native_format();
    println!("File:      {}", handle.path().display());
    println!(
        "Format:    {} Hz, {} ch, {:?}",
        native.sample_rate, native.channels, native.encoding
    );
    println!("Frames:    {}", handle.total_native_frames());
    println!("Duration:  {:.3} s", handle.duration_seconds());

    let mut tags: Vec<_> = handle.metadata().iter().collect();
    tags.sort_by(|(a, _), (b, _)| a.cmp(b));
    for (key, value) in tags {
        println!("Tag:       {key} = {value}");
    }

    let envelope = handle.waveform(point_count)?;
    println!("Envelope:  {} points per channel", envelope.point_count());
    for (index, channel) in envelope.channels().iter().enumerate() {
        let peak = channel.iter().copied().fold(0.0_f32, f32::max);
        let mean = if channel.is_empty() {
            0.0
        } else {
            channel.iter().sum::<f32>() / channel.len() as f32
        };
        println!("Channel {index}: peak rms {peak:.4}, mean rms {mean:.4}");
    }

    Ok(())
}

struct CliArgs {
    path: PathBuf,
    points: Option<usize>,
}

impl CliArgs {
    fn parse(mut args: impl Iterator<Item = String>) -> Option<Self> {
        let mut path = None;
        let mut points = None;
        while let Some(arg) = args.next() {
            if arg == "--points" {
                points = Some(args.next()?.parse().ok()?);
            } else if path.is_none() {
                path = Some(PathBuf::from(arg));
            } else {
                return None;
            }
        }
        Some(Self {
            path: path?,
            points,
        })
    }
}
