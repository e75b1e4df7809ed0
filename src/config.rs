use crate::tools::param_enums::PatchBackend;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8079";
const DEFAULT_TOOL_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_MAX_RESPONSE_BYTES: u64 = 2_000_000;
const DEFAULT_LARGE_OPS_THRESHOLD: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[value(alias = "stream-http", alias = "stream_http")]
    #[serde(alias = "stream-http", alias = "stream_http")]
    Http,
    Stdio,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Http => write!(f, "http"),
            TransportKind::Stdio => write!(f, "stdio"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workspace_root: PathBuf,
    pub enabled_tools: Option<HashSet<String>>,
    pub transport: TransportKind,
    pub http_bind_address: SocketAddr,
    pub tool_timeout_ms: Option<u64>,
    pub max_response_bytes: Option<u64>,
    /// Backend used when a request leaves `backend` at `auto`.
    pub default_backend: PatchBackend,
    /// Executable speaking the host automation bridge protocol.
    pub host_bridge_command: Option<PathBuf>,
    pub host_bridge_args: Vec<String>,
    /// Op count above which a batching warning is emitted.
    pub large_ops_threshold: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            enabled_tools: None,
            transport: TransportKind::Stdio,
            http_bind_address: default_bind_address(),
            tool_timeout_ms: Some(DEFAULT_TOOL_TIMEOUT_MS),
            max_response_bytes: Some(DEFAULT_MAX_RESPONSE_BYTES),
            default_backend: PatchBackend::Auto,
            host_bridge_command: None,
            host_bridge_args: Vec::new(),
            large_ops_threshold: Some(DEFAULT_LARGE_OPS_THRESHOLD),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    DEFAULT_HTTP_BIND
        .parse()
        .expect("default bind address valid")
}

impl ServerConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            workspace_root: cli_workspace_root,
            enabled_tools: cli_enabled_tools,
            transport: cli_transport,
            http_bind: cli_http_bind,
            tool_timeout_ms: cli_tool_timeout_ms,
            max_response_bytes: cli_max_response_bytes,
            default_backend: cli_default_backend,
            host_bridge: cli_host_bridge,
            host_bridge_arg: cli_host_bridge_args,
            large_ops_threshold: cli_large_ops_threshold,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            workspace_root: file_workspace_root,
            enabled_tools: file_enabled_tools,
            transport: file_transport,
            http_bind: file_http_bind,
            tool_timeout_ms: file_tool_timeout_ms,
            max_response_bytes: file_max_response_bytes,
            default_backend: file_default_backend,
            host_bridge_command: file_host_bridge_command,
            host_bridge_args: file_host_bridge_args,
            large_ops_threshold: file_large_ops_threshold,
        } = file_config;

        let workspace_root = cli_workspace_root
            .or(file_workspace_root)
            .unwrap_or_else(|| PathBuf::from("."));

        let enabled_tools = cli_enabled_tools
            .or(file_enabled_tools)
            .map(|tools| {
                tools
                    .into_iter()
                    .map(|tool| tool.trim().to_ascii_lowercase())
                    .filter(|tool| !tool.is_empty())
                    .collect::<HashSet<_>>()
            })
            .filter(|set| !set.is_empty());

        let transport = cli_transport
            .or(file_transport)
            .unwrap_or(TransportKind::Stdio);

        let http_bind_address = cli_http_bind
            .or(file_http_bind)
            .unwrap_or_else(default_bind_address);

        let tool_timeout_ms = cli_tool_timeout_ms
            .or(file_tool_timeout_ms)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS);
        let tool_timeout_ms = if tool_timeout_ms == 0 {
            None
        } else {
            Some(tool_timeout_ms)
        };

        let max_response_bytes = cli_max_response_bytes
            .or(file_max_response_bytes)
            .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES);
        let max_response_bytes = if max_response_bytes == 0 {
            None
        } else {
            Some(max_response_bytes)
        };

        let default_backend = cli_default_backend
            .or(file_default_backend)
            .unwrap_or_default();

        let host_bridge_command = cli_host_bridge
            .or(file_host_bridge_command)
            .filter(|path| !path.as_os_str().is_empty());
        let host_bridge_args = cli_host_bridge_args
            .or(file_host_bridge_args)
            .unwrap_or_default();

        let large_ops_threshold = cli_large_ops_threshold
            .or(file_large_ops_threshold)
            .unwrap_or(DEFAULT_LARGE_OPS_THRESHOLD);
        let large_ops_threshold = if large_ops_threshold == 0 {
            None
        } else {
            Some(large_ops_threshold)
        };

        Ok(Self {
            workspace_root,
            enabled_tools,
            transport,
            http_bind_address,
            tool_timeout_ms,
            max_response_bytes,
            default_backend,
            host_bridge_command,
            host_bridge_args,
            large_ops_threshold,
        })
    }

    pub fn ensure_workspace_root(&self) -> Result<()> {
        anyhow::ensure!(
            self.workspace_root.exists(),
            "workspace root {:?} does not exist",
            self.workspace_root
        );
        anyhow::ensure!(
            self.workspace_root.is_dir(),
            "workspace root {:?} is not a directory",
            self.workspace_root
        );
        Ok(())
    }

    /// Relative paths are resolved under workspace_root.
    pub fn resolve_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.workspace_root.join(relative)
        }
    }

    pub fn is_tool_enabled(&self, tool: &str) -> bool {
        match &self.enabled_tools {
            Some(set) => set.contains(&tool.to_ascii_lowercase()),
            None => true,
        }
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_ms.and_then(|ms| {
            if ms > 0 {
                Some(Duration::from_millis(ms))
            } else {
                None
            }
        })
    }

    pub fn max_response_bytes(&self) -> Option<usize> {
        self.max_response_bytes.and_then(|bytes| {
            if bytes > 0 {
                Some(bytes as usize)
            } else {
                None
            }
        })
    }
}

#[derive(Parser, Debug, Default, Clone)]
#[command(
    name = "workbook-patch-mcp",
    about = "MCP server that applies structured patch operations to Excel workbooks",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_WORKSPACE",
        value_name = "DIR",
        help = "Workspace root; workbook paths must resolve inside it"
    )]
    pub workspace_root: Option<PathBuf>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_ENABLED_TOOLS",
        value_name = "TOOL",
        value_delimiter = ',',
        help = "Restrict execution to the provided tool names"
    )]
    pub enabled_tools: Option<Vec<String>>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_TRANSPORT",
        value_enum,
        value_name = "TRANSPORT",
        help = "Transport to expose (stdio or http)"
    )]
    pub transport: Option<TransportKind>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_HTTP_BIND",
        value_name = "ADDR",
        help = "HTTP bind address when using http transport"
    )]
    pub http_bind: Option<SocketAddr>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_TOOL_TIMEOUT_MS",
        value_name = "MS",
        help = "Tool request timeout in milliseconds (default: 120000; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub tool_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_MAX_RESPONSE_BYTES",
        value_name = "BYTES",
        help = "Max response size in bytes (default: 2000000; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub max_response_bytes: Option<u64>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_DEFAULT_BACKEND",
        value_name = "BACKEND",
        help = "Backend used when a request asks for auto (auto, host, in_process)",
        value_parser = parse_backend
    )]
    pub default_backend: Option<PatchBackend>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_HOST_BRIDGE",
        value_name = "FILE",
        help = "Executable that drives the host spreadsheet application"
    )]
    pub host_bridge: Option<PathBuf>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_HOST_BRIDGE_ARGS",
        value_name = "ARG",
        value_delimiter = ',',
        help = "Extra arguments passed to the host bridge executable"
    )]
    pub host_bridge_arg: Option<Vec<String>>,

    #[arg(
        long,
        env = "WORKBOOK_PATCH_MCP_LARGE_OPS_THRESHOLD",
        value_name = "N",
        help = "Warn when a request carries more ops than this (default: 200; 0 disables)",
        value_parser = clap::value_parser!(usize)
    )]
    pub large_ops_threshold: Option<usize>,
}

fn parse_backend(value: &str) -> Result<PatchBackend, String> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|err| err.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    workspace_root: Option<PathBuf>,
    enabled_tools: Option<Vec<String>>,
    transport: Option<TransportKind>,
    http_bind: Option<SocketAddr>,
    tool_timeout_ms: Option<u64>,
    max_response_bytes: Option<u64>,
    default_backend: Option<PatchBackend>,
    host_bridge_command: Option<PathBuf>,
    host_bridge_args: Option<Vec<String>>,
    large_ops_threshold: Option<usize>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn zero_disables_limits() {
        let config = ServerConfig::from_args(CliArgs {
            tool_timeout_ms: Some(0),
            max_response_bytes: Some(0),
            large_ops_threshold: Some(0),
            ..CliArgs::default()
        })
        .unwrap();
        assert!(config.tool_timeout().is_none());
        assert!(config.max_response_bytes().is_none());
        assert!(config.large_ops_threshold.is_none());
        assert_eq!(config.transport, TransportKind::Stdio);
    }

    #[test]
    fn cli_wins_over_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "enabled_tools: [patch_workbook]\ndefault_backend: host\nlarge_ops_threshold: 50\nhost_bridge_command: /opt/bridge"
        )
        .unwrap();
        let config = ServerConfig::from_args(CliArgs {
            config: Some(file.path().to_path_buf()),
            default_backend: Some(PatchBackend::InProcess),
            ..CliArgs::default()
        })
        .unwrap();
        assert_eq!(config.default_backend, PatchBackend::InProcess);
        assert_eq!(config.large_ops_threshold, Some(50));
        assert!(config.is_tool_enabled("PATCH_WORKBOOK"));
        assert!(!config.is_tool_enabled("make_workbook"));
        assert_eq!(
            config.host_bridge_command.as_deref(),
            Some(Path::new("/opt/bridge"))
        );
    }

    #[test]
    fn backend_flag_accepts_dashed_form() {
        assert_eq!(parse_backend("in-process"), Ok(PatchBackend::InProcess));
        assert!(parse_backend("cloud").is_err());
    }
}
