use anyhow::Result;
use clap::Parser;

use osmix::cli::{Cli, Commands};
use osmix::commands::{export, info, route, search, tile};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Info(args) => info(&cli, args),
        Commands::Search(args) => search(&cli, args),
        Commands::Route(args) => route(&cli, args),
        Commands::Export(args) => export(&cli, args),
        Commands::Tile(args) => tile(&cli, args),
    }
}
