use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use workbook_patch_mcp::{CliArgs, ServerConfig, run_server};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = CliArgs::parse();
    let config = ServerConfig::from_args(cli)?;
    run_server(config).await
}

fn init_tracing() {
    // stdout carries the stdio transport
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("workbook_patch_mcp=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
