use clap::ColorChoice;
use colored::Colorize;
use std::{
    io::{IsTerminal, stderr},
    process,
};
use trailmux::{Args, Commands, Config, Logger};

async fn run() -> anyhow::Result<()> {
    let args = Args::parse_normalized();

    colored::control::set_override(match args.color {
        ColorChoice::Always => true,
        ColorChoice::Auto => stderr().is_terminal(),
        ColorChoice::Never => false,
    });

    Logger::init(args.verbose, args.quiet)?;
    let config = Config::from_env();
    Logger::set_level(args.verbose, args.quiet, config.debug);

    match args.command {
        Commands::Get(args) => args.execute(config).await?,
        Commands::Tools(args) => args.execute(config).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{}: {}", "error".bold().red(), e);
        process::exit(1);
    }
}
