use clap::{Parser, Subcommand};
use snapio::config::SnapshotConfig;
use snapio::dtype::{Array, Endian};
use snapio::layout::CountsLayout;
use snapio::record::{Mode, RecordFile};
use snapio::snapshot::Snapshot;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapio", about = "Inspect record-framed simulation snapshot files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk every record and verify its length markers
    Records {
        input: PathBuf,
        /// Control word type: i4 (default), u4, i8, u8
        #[arg(short, long, default_value = "i4")]
        control: String,
        /// Byte order of the file
        #[arg(long)]
        big_endian: bool,
    },
    /// Decode and print the header
    Header {
        input: PathBuf,
        /// JSON snapshot configuration
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Load header and blocks, splitting blocks by header particle counts
    Load {
        input: PathBuf,
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Records ──────────────────────────────────────────────────────────
        Commands::Records { input, control, big_endian } => {
            let endian = if big_endian { Endian::Big } else { Endian::Little };
            let mut rf = RecordFile::open(&input, Mode::Read, &control, endian)?;
            println!("{:>6} {:>14} {:>14}", "Record", "Offset", "Length");
            let mut n = 0usize;
            loop {
                let offset = rf.position();
                match rf.try_read_raw()? {
                    Some(payload) => {
                        println!("{:>6} {:>14} {:>14}", n, offset, payload.len());
                        n += 1;
                    }
                    None => break,
                }
            }
            println!("{} record(s), {} bytes, all markers consistent", n, rf.position());
        }

        // ── Header ───────────────────────────────────────────────────────────
        Commands::Header { input, config } => {
            let cfg = SnapshotConfig::from_json_file(&config)?;
            let endian = cfg.record.endian;
            let mut rf = RecordFile::open_with(&input, Mode::Read, cfg.record)?;
            let header = snapio::Header::read(&mut rf, &cfg.header)?;
            println!("Header of {} ({:?} endian)", input.display(), endian);
            for (name, value) in header.iter() {
                println!("  {:<16} {:<4} {}", name, value.dtype(), summarize(value));
            }
        }

        // ── Load ─────────────────────────────────────────────────────────────
        Commands::Load { input, config } => {
            let cfg = SnapshotConfig::from_json_file(&config)?;
            let mut snap = Snapshot::new(&input, cfg, CountsLayout);
            snap.load()?;
            let ptypes = snap.ptypes().ok_or("snapshot has no particle types")?;
            println!("Snapshot {}", input.display());
            let total = ptypes.total().map_or_else(|| "overflow".to_owned(), |t| t.to_string());
            println!("  Particle counts {:?} (total {})", ptypes.counts(), total);
            for name in snap.block_names() {
                println!("  Block {}", name);
                for (ptype, entry) in snap.block(name).unwrap_or_default().iter().enumerate() {
                    match entry {
                        Some(arr) => println!("    type {}  {:<4} shape {:?}", ptype, arr.dtype(), arr.shape()),
                        None      => println!("    type {}  -", ptype),
                    }
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn summarize(value: &Array) -> String {
    const SHOWN: usize = 8;
    let head = value.slice(0..value.len().min(SHOWN)).unwrap_or_else(|| value.clone());
    let body = match &head {
        Array::F4(v) => format!("{:?}", v),
        Array::F8(v) => format!("{:?}", v),
        other => format!("{:?}", other.to_i128_vec().unwrap_or_default()),
    };
    if value.len() > SHOWN {
        format!("{} ... ({} values)", body.trim_end_matches(']'), value.len())
    } else {
        body
    }
}
