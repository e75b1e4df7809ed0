pub mod a1;
pub mod config;
pub mod errors;
pub mod formula;
pub mod host;
pub mod patch;
pub mod security;
pub mod server;
pub mod state;
pub mod styles;
pub mod tools;

pub use config::{CliArgs, ServerConfig, TransportKind};
pub use server::WorkbookPatchServer;

use anyhow::Result;
use std::sync::Arc;

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let server = WorkbookPatchServer::new(config.clone()).await?;
    tracing::info!(
        transport = %config.transport,
        workspace = %config.workspace_root.display(),
        default_backend = %config.default_backend,
        "starting workbook patch server"
    );
    match config.transport {
        TransportKind::Stdio => server.run_stdio().await,
        TransportKind::Http => server.run_http().await,
    }
}
