use crate::config::ServerConfig;
use crate::errors::InvalidParamsError;
use crate::patch::model::{MakeRequestInput, PatchOpKind, PatchRequestInput, PatchResult};
use crate::patch::schema::{build_mini_schema_text, op_spec, supported_chart_types_csv};
use crate::state::AppState;
use crate::tools;
use anyhow::{Result, anyhow};
use rmcp::{
    ErrorData as McpError, Json, ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    transport::streamable_http_server::{
        StreamableHttpService, session::local::LocalSessionManager,
    },
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use strum::IntoEnumIterator;
use thiserror::Error;
use {once_cell::sync::Lazy, regex::Regex};

const BASE_INSTRUCTIONS: &str = "\
Workbook Patch MCP: apply structured edit operations to Excel workbooks (.xlsx/.xlsm/.xls).

WORKFLOW:
1) list_patch_ops to see every op kind with required/optional fields and an example
2) patch_workbook with {xlsx_path, ops:[...]} to edit an existing workbook
3) make_workbook with {out_path, ops:[...]} to create a new workbook and edit it in one call

OUTPUT:
- By default the result is written next to the input as <name>_patched.<ext>. Use out_dir/out_name to choose.
- on_conflict: overwrite (default), skip, or rename (<name>_1.<ext>, <name>_2.<ext>, ...).
- Results carry patch_diff (before/after per op), inverse_ops, formula_issues, warnings, error, and engine.

BACKENDS:
- backend=auto (default) uses host automation when available, otherwise the in-process engine.
- dry_run, return_inverse_ops, preflight_formula_check and restore_design_snapshot need the in-process engine.
- create_chart needs host automation and cannot be mixed with apply_table_style in one request.
- .xls files need host automation and reject design ops.

OPS:
- Ops may omit sheet when a top-level sheet is set (except add_sheet).
- Values starting with '=' are rejected unless auto_formula=true; prefer set_formula.
- Style ops take exactly one of cell or range and touch at most 10,000 cells.";

fn build_instructions() -> String {
    let mut instructions = BASE_INSTRUCTIONS.to_string();
    instructions.push_str("\n\nCHART TYPES: ");
    instructions.push_str(&supported_chart_types_csv());
    instructions.push_str("\n\n");
    instructions.push_str(&build_mini_schema_text());
    instructions
}

#[derive(Clone)]
pub struct WorkbookPatchServer {
    state: Arc<AppState>,
    tool_router: ToolRouter<WorkbookPatchServer>,
}

impl WorkbookPatchServer {
    pub async fn new(config: Arc<ServerConfig>) -> Result<Self> {
        config.ensure_workspace_root()?;
        let state = Arc::new(AppState::new(config));
        Ok(Self::from_state(state))
    }

    pub fn from_state(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    pub async fn run_stdio(self) -> Result<()> {
        let service = self
            .serve(stdio())
            .await
            .inspect_err(|error| tracing::error!("serving error: {:?}", error))?;
        service.waiting().await?;
        Ok(())
    }

    pub async fn run_http(self) -> Result<()> {
        let bind = self.state.config().http_bind_address;
        let service = StreamableHttpService::new(
            move || Ok(self.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        let router = axum::Router::new().nest_service("/mcp", service);
        let listener = tokio::net::TcpListener::bind(bind).await?;
        tracing::info!(address = %bind, "serving streamable http at /mcp");
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        Ok(())
    }

    fn ensure_tool_enabled(&self, tool: &str) -> Result<()> {
        tracing::info!(tool = tool, "tool invocation requested");
        if self.state.config().is_tool_enabled(tool) {
            Ok(())
        } else {
            Err(ToolDisabledError::new(tool).into())
        }
    }

    async fn run_tool_with_timeout<T, F>(&self, tool: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        T: Serialize,
    {
        let result = if let Some(timeout_duration) = self.state.config().tool_timeout() {
            match tokio::time::timeout(timeout_duration, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!(
                    "tool '{}' timed out after {}ms",
                    tool,
                    timeout_duration.as_millis()
                )),
            }
        } else {
            fut.await
        }?;

        self.ensure_response_size(tool, &result)?;
        Ok(result)
    }

    fn ensure_response_size<T: Serialize>(&self, tool: &str, value: &T) -> Result<()> {
        let Some(limit) = self.state.config().max_response_bytes() else {
            return Ok(());
        };
        let payload = serde_json::to_vec(value)
            .map_err(|e| anyhow!("failed to serialize response for {}: {}", tool, e))?;
        if payload.len() > limit {
            return Err(ResponseTooLargeError::new(tool, payload.len(), limit).into());
        }
        Ok(())
    }
}

#[tool_router]
impl WorkbookPatchServer {
    #[tool(
        name = "patch_workbook",
        description = "Apply ordered patch operations to an existing workbook and write the result"
    )]
    pub async fn patch_workbook(
        &self,
        Parameters(params): Parameters<PatchRequestInput>,
    ) -> Result<Json<PatchResult>, McpError> {
        self.ensure_tool_enabled("patch_workbook")
            .map_err(|e| to_mcp_error_for_tool("patch_workbook", e))?;
        self.run_tool_with_timeout(
            "patch_workbook",
            tools::patch_workbook(self.state.clone(), params),
        )
        .await
        .map(Json)
        .map_err(|e| to_mcp_error_for_tool("patch_workbook", e))
    }

    #[tool(
        name = "make_workbook",
        description = "Create a new workbook at out_path and apply patch operations to it"
    )]
    pub async fn make_workbook(
        &self,
        Parameters(params): Parameters<MakeRequestInput>,
    ) -> Result<Json<PatchResult>, McpError> {
        self.ensure_tool_enabled("make_workbook")
            .map_err(|e| to_mcp_error_for_tool("make_workbook", e))?;
        self.run_tool_with_timeout(
            "make_workbook",
            tools::make_workbook(self.state.clone(), params),
        )
        .await
        .map(Json)
        .map_err(|e| to_mcp_error_for_tool("make_workbook", e))
    }

    #[tool(
        name = "list_patch_ops",
        description = "List patch op kinds with required/optional fields, constraints, aliases and an example"
    )]
    pub async fn list_patch_ops(
        &self,
        Parameters(params): Parameters<tools::ListPatchOpsParams>,
    ) -> Result<Json<tools::ListPatchOpsResponse>, McpError> {
        self.ensure_tool_enabled("list_patch_ops")
            .map_err(|e| to_mcp_error_for_tool("list_patch_ops", e))?;
        self.run_tool_with_timeout(
            "list_patch_ops",
            tools::list_patch_ops(self.state.clone(), params),
        )
        .await
        .map(Json)
        .map_err(|e| to_mcp_error_for_tool("list_patch_ops", e))
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for WorkbookPatchServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(build_instructions()),
            ..ServerInfo::default()
        }
    }
}

fn to_mcp_error_for_tool(tool: &str, error: anyhow::Error) -> McpError {
    if error.is::<ToolDisabledError>() || error.is::<ResponseTooLargeError>() {
        return McpError::invalid_request(error.to_string(), None);
    }

    if let Some(inv) = error.downcast_ref::<InvalidParamsError>() {
        let example = inv
            .path()
            .filter(|path| path.starts_with("ops"))
            .and_then(|_| op_example(inv.message()))
            .or_else(|| tool_minimal_example(tool));
        let msg = format_invalid_params_message(
            tool,
            inv.message(),
            inv.path(),
            &tool_variants(inv.message()),
            example,
        );
        return McpError::invalid_params(msg, None);
    }

    if let Some(serde_err) = error.downcast_ref::<serde_json::Error>() {
        let problem = serde_err.to_string();
        let mut variants = extract_expected_variants(&problem);
        if variants.is_empty() {
            variants = tool_variants(&problem);
        }
        let msg = format_invalid_params_message(
            tool,
            &problem,
            infer_path(&problem).as_deref(),
            &variants,
            tool_minimal_example(tool),
        );
        return McpError::invalid_params(msg, None);
    }

    // serde failures can arrive stringified through anyhow::bail! paths.
    let problem = format!("{error:#}");
    if looks_like_invalid_params(&problem) {
        let msg = format_invalid_params_message(
            tool,
            &problem,
            infer_path(&problem).as_deref(),
            &tool_variants(&problem),
            tool_minimal_example(tool),
        );
        return McpError::invalid_params(msg, None);
    }

    McpError::internal_error(problem, None)
}

fn format_invalid_params_message(
    tool: &str,
    problem: &str,
    path: Option<&str>,
    variants: &[String],
    example: Option<&'static str>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Invalid params for tool '{tool}': {problem}"));

    if let Some(path) = path {
        out.push_str(&format!("\npath: {path}"));
    }

    if !variants.is_empty() {
        out.push_str("\nvalid variants: ");
        out.push_str(&variants.join(", "));
    }

    if let Some(example) = example {
        out.push_str("\nexample: ");
        out.push_str(example);
    }

    out
}

fn tool_minimal_example(tool: &str) -> Option<&'static str> {
    match tool {
        "patch_workbook" => Some(
            r#"{"xlsx_path":"book.xlsx","sheet":"Sheet1","ops":[{"op":"set_value","cell":"A1","value":"Hello"}]}"#,
        ),
        "make_workbook" => Some(
            r#"{"out_path":"new.xlsx","sheet":"Data","ops":[{"op":"set_range_values","range":"A1:B1","values":[["Name","Qty"]]}]}"#,
        ),
        "list_patch_ops" => Some(r#"{"op":"set_style"}"#),
        _ => None,
    }
}

/// Example for the op kind named in `problem`; longer names win so `set_value_if` beats `set_value`.
fn op_example(problem: &str) -> Option<&'static str> {
    let mut kinds: Vec<PatchOpKind> = PatchOpKind::iter().collect();
    kinds.sort_by_key(|kind| std::cmp::Reverse(kind.as_ref().len()));
    kinds
        .into_iter()
        .find(|kind| problem.contains(kind.as_ref()))
        .map(|kind| op_spec(kind).example)
}

fn infer_path(problem: &str) -> Option<String> {
    static OPS_INDEX_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"ops\[(\d+)\]").expect("regex"));
    let p = problem.to_ascii_lowercase();
    if p.contains("on_conflict") {
        return Some("on_conflict".to_string());
    }
    if p.contains("backend") && p.contains("variant") {
        return Some("backend".to_string());
    }
    OPS_INDEX_RE
        .captures(problem)
        .and_then(|caps| caps.get(1))
        .map(|index| format!("ops[{}]", index.as_str()))
}

fn tool_variants(problem: &str) -> Vec<String> {
    let p = problem.to_ascii_lowercase();
    let variants: &[&str] = if p.contains("on_conflict") {
        &["overwrite", "skip", "rename"]
    } else if p.contains("backend") && p.contains("variant") {
        &["auto", "host", "in_process"]
    } else if p.contains("chart_type") {
        return supported_chart_types_csv()
            .split(", ")
            .map(str::to_string)
            .collect();
    } else {
        &[]
    };
    variants.iter().map(|v| (*v).to_string()).collect()
}

fn looks_like_invalid_params(problem: &str) -> bool {
    let p = problem.to_ascii_lowercase();

    p.contains("missing field")
        || p.contains("unknown field")
        || p.contains("unknown variant")
        || p.contains("did not match any variant")
        || p.contains("must be an object")
        || p.contains("invalid patch operation")
}

fn extract_expected_variants(problem: &str) -> Vec<String> {
    static EXPECTED_TAIL_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"expected(?: one of)? (?P<tail>.*)$").expect("regex"));
    static BACKTICK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`([^`]+)`").expect("regex"));

    let Some(caps) = EXPECTED_TAIL_RE.captures(problem) else {
        return Vec::new();
    };
    let tail = caps.name("tail").map(|m| m.as_str()).unwrap_or("");
    BACKTICK_RE
        .captures_iter(tail)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod typed_errors_tests {
    use super::to_mcp_error_for_tool;
    use crate::errors::InvalidParamsError;
    use crate::tools::param_enums::OnConflict;
    use rmcp::model::ErrorCode;

    #[test]
    fn invalid_params_carry_path_and_example() {
        let err = InvalidParamsError::new("patch_workbook", "Input file not found: /w/missing.xlsx")
            .with_path("xlsx_path");
        let mcp = to_mcp_error_for_tool("patch_workbook", err.into());
        assert_eq!(mcp.code, ErrorCode::INVALID_PARAMS);
        assert!(mcp.message.contains("path: xlsx_path"));
        assert!(mcp.message.contains("example: "));
    }

    #[test]
    fn enum_mistakes_list_variants() {
        let err = serde_json::from_value::<OnConflict>(serde_json::json!("replace")).unwrap_err();
        let mcp = to_mcp_error_for_tool("patch_workbook", anyhow::Error::new(err));
        assert_eq!(mcp.code, ErrorCode::INVALID_PARAMS);
        assert!(mcp.message.contains("overwrite"));
    }

    #[test]
    fn op_level_mistakes_show_that_ops_example() {
        let err = InvalidParamsError::new(
            "patch_workbook",
            "ops[2]: set_fill_color does not accept color; use fill_color.",
        )
        .with_path("ops[2].color");
        let mcp = to_mcp_error_for_tool("patch_workbook", err.into());
        assert!(mcp.message.contains(r#"example: {"op":"set_fill_color""#), "{}", mcp.message);
    }

    #[test]
    fn other_failures_are_internal() {
        let mcp = to_mcp_error_for_tool("patch_workbook", anyhow::anyhow!("disk on fire"));
        assert_eq!(mcp.code, ErrorCode::INTERNAL_ERROR);
    }
}

#[derive(Debug, Error)]
#[error("tool '{tool_name}' is disabled by server configuration")]
struct ToolDisabledError {
    tool_name: String,
}

impl ToolDisabledError {
    fn new(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Error)]
#[error(
    "tool '{tool_name}' response too large ({size} bytes > {limit} bytes); reduce request size or split the batch"
)]
struct ResponseTooLargeError {
    tool_name: String,
    size: usize,
    limit: usize,
}

impl ResponseTooLargeError {
    fn new(tool_name: &str, size: usize, limit: usize) -> Self {
        Self {
            tool_name: tool_name.to_ascii_lowercase(),
            size,
            limit,
        }
    }
}
