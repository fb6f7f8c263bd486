use anyhow::Result;
use bpsr_common::log;
use clap::Parser;

mod args;
mod commands;
mod output;

use args::{Args, Commands};

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.quiet {
        log::init(args.log_level.clone());
    }
    match args.command {
        Some(Commands::Live(args)) => commands::live::run(args)?,
        Some(Commands::Replay(args)) => commands::replay::run(args)?,
        None => {}
    }
    Ok(())
}
