//! modloom CLI: import a tracker module and print what was recovered.
//!
//! Usage:
//!   ml-cli path/to/file.xm
//!   ml-cli path/to/file.ahx --subsong 2
//!   ml-cli path/to/file.mod --config import.toml --detect

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ml_formats::registry;
use ml_formats::{ImportOptions, Importer};
use ml_ir::{Instrument, Song};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ml-cli")]
#[command(about = "Import a tracker module and summarize the result")]
struct Args {
    /// Module file to import
    file: PathBuf,

    /// Sub-song to import, for formats holding several
    #[arg(short, long)]
    subsong: Option<usize>,

    /// TOML file with dispatcher options
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List every detector that accepts the file before importing
    #[arg(long)]
    detect: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let options = match &args.config {
        Some(path) => load_options(path)?,
        None => ImportOptions::default(),
    };

    let data = fs::read(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let filename = args.file.to_string_lossy();

    if args.detect {
        let matches: Vec<&str> = registry::FORMATS
            .iter()
            .filter(|e| (e.detect)(&data, Some(&filename)))
            .map(|e| e.name)
            .collect();
        println!("Detected: {}", if matches.is_empty() { "nothing".to_string() } else { matches.join(", ") });
    }

    let song = Importer::new(options).import_module(&data, &filename, args.subsong)?;
    print_summary(&song);

    if let Err(violation) = song.validate() {
        tracing::warn!(%violation, "imported song breaks an invariant");
    }
    Ok(())
}

fn load_options(path: &PathBuf) -> Result<ImportOptions> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn print_summary(song: &Song) {
    println!("Title:       {}", song.title);
    println!("Format:      {}", song.format);
    println!("Channels:    {}", song.channel_count());
    println!("Patterns:    {}", song.patterns.len());
    println!("Orders:      {} (restart {})", song.song_length(), song.restart_position);
    println!("Tempo:       {} BPM, Speed: {}", song.initial_tempo, song.initial_speed);

    let placeholders = song.instruments.iter().filter(|i| i.is_placeholder()).count();
    println!(
        "Instruments: {} ({} placeholders)",
        song.instruments.len(),
        placeholders
    );
    for inst in song.instruments.iter().filter(|i| !i.name.is_empty() || !i.is_placeholder()) {
        println!("  {:02X} {:<32} {}", inst.id, inst.name.as_str(), describe(inst));
    }
}

fn describe(inst: &Instrument) -> String {
    match inst.sample() {
        Some(sample) => format!(
            "{} frames, {}-bit, {} Hz{}",
            sample.len(),
            sample.data.bits(),
            sample.sample_rate,
            if sample.has_loop() { ", looped" } else { "" }
        ),
        None => format!("{:?}", inst.kind),
    }
}
