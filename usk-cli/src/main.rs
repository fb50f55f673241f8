mod logger;
mod replay;
mod trace;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::io;
use usk_matrix::boards;

#[derive(Parser)]
#[command(name = "usk-cli")]
#[command(about = "Split keyboard matrix scanner tools")]
struct Cli {
    /// Show scanner diagnostics (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in board presets
    Boards,
    /// Replay a scan trace against a simulated board and print key events
    Replay {
        /// Path to the trace file
        trace: String,
        /// Board preset, overriding the trace's `board` line
        #[arg(short, long)]
        board: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.command {
        Command::Boards => {
            for config in boards::ALL {
                println!(
                    "{:<18} {}x{} main matrix, debounce {}, settle {}us",
                    config.name,
                    config.main.row_count(),
                    config.main.col_count(),
                    config.debounce,
                    config.settle_us
                );
                for peripheral in config.peripherals {
                    println!(
                        "{:<18}   + {} at {}: {}x{} from row {}",
                        "",
                        peripheral.name,
                        peripheral.address,
                        peripheral.topology.row_count(),
                        peripheral.topology.col_count(),
                        peripheral.topology.row_offset
                    );
                }
            }
        }
        Command::Replay { trace, board } => {
            let contents =
                fs::read_to_string(&trace).with_context(|| format!("reading {}", trace))?;
            let parsed = trace::parse_trace(&contents).context("parsing trace")?;

            let name = board
                .or_else(|| parsed.board.clone())
                .unwrap_or_else(|| boards::USK_RIGHT.name.to_string());
            let config = boards::find(&name).with_context(|| {
                format!("unknown board `{}` (see `usk-cli boards`)", name)
            })?;

            println!("Board: {}", config.name);
            replay::run(config, &parsed, &mut io::stdout().lock())
                .with_context(|| format!("replaying {}", trace))?;
        }
    }

    Ok(())
}
