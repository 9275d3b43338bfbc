mod cli;
mod config;
mod error;
mod output;
mod pipeline;
mod report;
mod runner;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting cirun - Declarative CI Pipeline Runner");
    cli.execute().await?;

    Ok(())
}
