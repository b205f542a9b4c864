// src/main.rs
use anyhow::Result;
use clap::Parser;
use market_data_pipeline::cli::{execute_command, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment
    dotenv::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Parse command line arguments
    let cli = Cli::parse();

    execute_command(cli).await
}
