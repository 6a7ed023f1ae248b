//! SchoolIntel CLI: sales-intelligence dossiers for UK schools.
//!
//! Researches a school with parallel web searches and model extraction, then
//! enriches the result with finance, inspection and vacancy data.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
