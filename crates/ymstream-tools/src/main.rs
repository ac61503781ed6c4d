use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use ymstream::FmChannels;
use ymstream::chip::FM_CHANNEL_COUNT;

mod simulate;
mod vgm;

#[derive(Parser)]
#[command(
    name = "ymstream",
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
    long_about = None
)]
struct Cli {
    /// Log more (-v info, -vv debug, -vvv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and command statistics
    Info {
        /// Input VGM/VGZ file, or `-` for stdin
        file: PathBuf,
    },
    /// Strip ADPCM data blocks and rewrite the header for streaming
    Preprocess {
        /// Input VGM/VGZ file, or `-` for stdin
        file: PathBuf,
        /// Output path for the stripped stream
        #[arg(short, long)]
        output: PathBuf,
        /// Directory to write each sample block to
        #[arg(long)]
        pcm_dir: Option<PathBuf>,
    },
    /// Stream a file through the firmware with simulated hardware
    Simulate {
        /// Input VGM/VGZ file, or `-` for stdin
        file: PathBuf,
        /// Stop after the stream has ended this many times
        #[arg(short, long, default_value_t = 1)]
        loops: u32,
        /// FM channels the log may key on, e.g. `1,2,6`, `all` or `none`
        #[arg(short, long, value_parser = parse_mask, default_value = "all")]
        mask: FmChannels,
        /// Drop pitch writes for channels outside the mask
        #[arg(long)]
        pitch_filter: bool,
        /// Silence ADPCM from the start
        #[arg(long)]
        mute_pcm: bool,
        /// Report the chip busy on every Nth readiness check
        #[arg(long, value_parser = clap::value_parser!(u64).range(2..))]
        busy_every: Option<u64>,
        /// Give up after this much playback time
        #[arg(long, default_value_t = 600)]
        max_seconds: u64,
        /// Log every register write the player issues
        #[arg(long)]
        trace_writes: bool,
    },
}

/// Parse a comma separated list of one-based FM channels.
fn parse_mask(value: &str) -> Result<FmChannels, String> {
    match value.trim() {
        "all" => return Ok(FmChannels::all()),
        "none" | "" => return Ok(FmChannels::empty()),
        _ => {}
    }

    let mut mask = FmChannels::empty();
    for part in value.split(',') {
        let channel: usize = part
            .trim()
            .parse()
            .map_err(|_| format!("not a channel number: {:?}", part))?;
        if !(1..=FM_CHANNEL_COUNT).contains(&channel) {
            return Err(format!(
                "channel {} out of range 1-{}",
                channel, FM_CHANNEL_COUNT
            ));
        }
        mask |= FmChannels::channel(channel - 1);
    }
    Ok(mask)
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Info { file } => {
            let data = vgm::read_vgm_as_vec(&file)?;
            vgm::info(&file, &data)?;
        }
        Commands::Preprocess {
            file,
            output,
            pcm_dir,
        } => {
            let data = vgm::read_vgm_as_vec(&file)?;
            vgm::preprocess_file(&data, &output, pcm_dir.as_deref())?;
        }
        Commands::Simulate {
            file,
            loops,
            mask,
            pitch_filter,
            mute_pcm,
            busy_every,
            max_seconds,
            trace_writes,
        } => {
            let data = vgm::read_vgm_as_vec(&file)?;
            let options = simulate::Options {
                loops,
                mask,
                pitch_filter,
                mute_pcm,
                busy_every: busy_every.unwrap_or(0),
                max_seconds,
                trace_writes,
            };
            simulate::run(&data, &options)?;
        }
    }

    Ok(())
}
