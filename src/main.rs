//! Command-line interface for the LI log converter.
//!
//! This binary converts LI binary log files to comma-separated text or
//! NumPy array files, and can dump stream metadata as JSON.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{info, LevelFilter};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use lilog_parser::{CsvWriter, LogReader, NpyWriter};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Convert LI binary log files to CSV or NumPy arrays",
    long_about = "Convert LI binary log files (.li) to comma-separated text or NumPy .npy arrays.\n\n\
                  Output files are written next to the inputs with the extension replaced."
)]
struct Args {
    /// Input .li files (with --stdin: the single name the output is derived from)
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: Format,

    /// Read log bytes from standard input instead of the named file
    #[arg(long)]
    stdin: bool,

    /// Print stream metadata as JSON instead of converting
    #[arg(long)]
    info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Comma-separated text
    Csv,
    /// NumPy array file
    Npy,
}

impl Format {
    fn extension(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Npy => "npy",
        }
    }
}

#[derive(Debug, Serialize)]
struct ChannelInfo {
    number: u8,
    field_count: u64,
}

#[derive(Debug, Serialize)]
struct StreamInfo {
    instrument_id: u64,
    instrument_version: u64,
    time_step: f64,
    start_time: i64,
    start_offset: f64,
    channel_mask: u8,
    row_bytes: u64,
    channels: Vec<ChannelInfo>,
    format_string: String,
    header_string: String,
}

fn stream_info(bytes: &[u8]) -> Result<StreamInfo> {
    let mut reader = LogReader::new();
    reader.put(bytes);

    let channel_mask = reader.channel_mask()?;
    let mut channels = Vec::new();
    for number in 1..=8u8 {
        if channel_mask >> (number - 1) & 1 == 1 {
            channels.push(ChannelInfo {
                number,
                field_count: reader.field_count(number)?,
            });
        }
    }
    Ok(StreamInfo {
        instrument_id: reader.instrument_id()?,
        instrument_version: reader.instrument_version()?,
        time_step: reader.time_step()?,
        start_time: reader.start_time()?,
        start_offset: reader.start_offset()?,
        channel_mask,
        row_bytes: reader.row_bytes()?,
        channels,
        format_string: reader.format_string()?.to_string(),
        header_string: reader.header_string()?.to_string(),
    })
}

fn print_info(input: &mut dyn Read, name: &Path) -> Result<()> {
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    let info = stream_info(&bytes)
        .map_err(|e| anyhow::anyhow!("'{}': {}", name.display(), e))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn convert_one_file(input: &mut dyn Read, input_name: &Path, format: Format) -> Result<()> {
    info!("Processing: {}", input_name.display());
    let start_time = Instant::now();

    let output_path = input_name.with_extension(format.extension());
    let output = File::create(&output_path)?;

    let stats = match format {
        Format::Csv => CsvWriter::new().convert(input, output)?,
        Format::Npy => NpyWriter::new().convert(input, output)?,
    };

    info!("   ├─ {}", stats.summary());
    info!(
        "   └─ ✓ {} in {:.2?}",
        output_path.display(),
        start_time.elapsed()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    if args.stdin && args.files.len() != 1 {
        anyhow::bail!("--stdin takes exactly one FILE to derive the output name from");
    }

    let total_start = Instant::now();
    let mut failures = 0usize;

    for path in &args.files {
        let result = (|| -> Result<()> {
            let mut input: Box<dyn Read> = if args.stdin {
                Box::new(std::io::stdin().lock())
            } else {
                Box::new(File::open(path).map_err(|e| {
                    anyhow::anyhow!("could not open '{}': {}", path.display(), e)
                })?)
            };
            if args.info {
                print_info(&mut input, path)
            } else {
                convert_one_file(&mut input, path, args.format)
            }
        })();

        if let Err(e) = result {
            // Keep going with the remaining files; any partial output
            // file is left behind
            log::error!("   └─ ✗ {}: {}", path.display(), e);
            failures += 1;
        }
    }

    if args.files.len() > 1 {
        info!(
            "Processed {} file(s) ({} failed) in {:.2?}",
            args.files.len(),
            failures,
            total_start.elapsed()
        );
    }
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
