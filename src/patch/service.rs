//! Request orchestration: paths, conflict policy, engine choice and fallback.

use crate::a1::CellAddress;
use crate::config::ServerConfig;
use crate::errors::InvalidParamsError;
use crate::formula::has_errors;
use crate::host::{HostAvailability, HostLauncher};
use crate::patch::backend::in_process::create_seed_workbook;
use crate::patch::backend::{BackendOutcome, HostBackend, InProcessBackend, PatchApplier, PatchJob};
use crate::patch::errors::PatchOpError;
use crate::patch::model::{
    FormulaIssue, FormulaIssueLevel, MakeRequest, PatchDiffItem, PatchErrorDetail, PatchOp, PatchOpKind,
    PatchOptions, PatchRequest, PatchResult, PatchStatus,
};
use crate::patch::selector::{
    SelectionInput, allow_auto_fallback, contains_design_ops, contains_kind, requires_in_process,
    select_engine,
};
use crate::patch::validate::validate_request_constraints;
use crate::security::{canonicalize_and_enforce_within_workspace, create_dir_within_workspace, sanitize_filename_component};
use crate::tools::param_enums::{OnConflict, PatchBackend, PatchEngine};
use anyhow::{Context, Result, anyhow, bail};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use uuid::Uuid;

pub const PATCH_TOOL: &str = "patch_workbook";
pub const MAKE_TOOL: &str = "make_workbook";

const SUPPORTED_EXTENSIONS: &[&str] = &[".xlsx", ".xlsm", ".xls"];
const PATCHED_SUFFIX: &str = "_patched";
const DEFAULT_SHEET: &str = "Sheet1";
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

const IN_PROCESS_LOSS_WARNING: &str =
    "In-process editing may drop shapes, charts, or other unsupported elements.";
const FORCED_IN_PROCESS_WARNING: &str = "Using in-process backend due to patch request constraints.";
const DRY_RUN_SKIP_WARNING: &str =
    "Dry-run mode ignores on_conflict=skip and simulates patch without writing.";

pub struct PatchService {
    config: Arc<ServerConfig>,
    launcher: Option<Arc<dyn HostLauncher>>,
    /// One host automation session at a time.
    host_session: Mutex<()>,
}

impl PatchService {
    pub fn new(config: Arc<ServerConfig>, launcher: Option<Arc<dyn HostLauncher>>) -> Self {
        Self {
            config,
            launcher,
            host_session: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn host_availability(&self) -> HostAvailability {
        match &self.launcher {
            Some(launcher) => launcher.availability(),
            None => HostAvailability::unavailable("host automation bridge is not configured"),
        }
    }

    pub fn run_patch(&self, request: PatchRequest) -> Result<PatchResult> {
        self.patch_with(request, PATCH_TOOL)
    }

    /// Create a workbook at `out_path` and apply `ops` to it.
    pub fn run_make(&self, request: MakeRequest) -> Result<PatchResult> {
        let output = self.config.resolve_path(&request.out_path);
        if output.is_dir() {
            return Err(invalid(MAKE_TOOL, "out_path", format!(
                "Output path is a directory: {}",
                output.display()
            )));
        }
        let extension = ensure_supported_extension(&output, MAKE_TOOL, "out_path")?;
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.workspace_root.clone());
        let parent = create_dir_within_workspace(&self.config.workspace_root, &parent, MAKE_TOOL, "out_path")?;
        let file_name = output
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| invalid(MAKE_TOOL, "out_path", "out_path must include a file name"))?
            .to_string();

        let options = self.effective_options(&request.ops, request.options, MAKE_TOOL)?;
        if extension == ".xls" {
            if options.backend == PatchBackend::InProcess {
                return Err(invalid(MAKE_TOOL, "backend", "backend='in_process' cannot edit .xls files."));
            }
            if options.needs_extended_features() {
                return Err(invalid(
                    MAKE_TOOL,
                    "out_path",
                    ".xls creation does not support dry_run, return_inverse_ops, or preflight_formula_check.",
                ));
            }
            if !self.host_availability().available {
                return Err(invalid(
                    MAKE_TOOL,
                    "out_path",
                    ".xls editing requires host automation in this environment.",
                ));
            }
        }

        let initial_sheet = initial_sheet_name(request.sheet.as_deref(), &request.ops);
        let stem = output
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("workbook");
        let seed = SeedWorkbook(parent.join(format!(
            ".{stem}_make_seed_{}{extension}",
            Uuid::new_v4().simple()
        )));
        tracing::debug!(seed = %seed.0.display(), initial_sheet = %initial_sheet, "creating seed workbook");
        if extension == ".xls" {
            let launcher = self
                .launcher
                .as_ref()
                .ok_or_else(|| anyhow!("host automation bridge is not configured"))?;
            let _session = self.host_session.lock();
            launcher
                .create(&seed.0, &initial_sheet)
                .context("host workbook creation failed")?;
        } else {
            create_seed_workbook(&seed.0, &initial_sheet)?;
        }

        let patch = PatchRequest {
            xlsx_path: seed.0.clone(),
            ops: request.ops,
            sheet: request.sheet,
            out_dir: Some(parent),
            out_name: Some(file_name),
            options: request.options,
        };
        self.patch_with(patch, MAKE_TOOL)
    }

    fn patch_with(&self, request: PatchRequest, tool: &'static str) -> Result<PatchResult> {
        let input = self.resolve_input(&request.xlsx_path, tool)?;
        let extension = ensure_supported_extension(&input, tool, "xlsx_path")?;
        let output = self.resolve_output(
            &input,
            request.out_dir.as_deref(),
            request.out_name.as_deref(),
            tool,
        )?;

        let mut warnings = Vec::new();
        if let Some(threshold) = self.config.large_ops_threshold {
            if request.ops.len() > threshold {
                warnings.push(format!(
                    "Large patch request: {} ops. Recommended maximum is {threshold}; consider splitting into batches.",
                    request.ops.len()
                ));
            }
        }

        let has_chart = contains_kind(&request.ops, PatchOpKind::CreateChart);
        if has_chart && contains_kind(&request.ops, PatchOpKind::ApplyTableStyle) {
            return Err(invalid(
                tool,
                "ops",
                "create_chart and apply_table_style cannot be combined in one patch request. \
                 create_chart is host-only, and a patch request runs on a single backend engine. \
                 Run them in separate requests to isolate chart and table operations.",
            ));
        }
        if extension == ".xls" && contains_design_ops(&request.ops) {
            return Err(invalid(
                tool,
                "ops",
                "Design operations are not supported for .xls files. Convert to .xlsx/.xlsm first.",
            ));
        }

        let options = self.effective_options(&request.ops, request.options, tool)?;
        if extension == ".xls" && options.needs_extended_features() {
            return Err(invalid(
                tool,
                "xlsx_path",
                ".xls editing does not support dry_run, return_inverse_ops, or preflight_formula_check.",
            ));
        }
        let host = self.host_availability();
        let engine = select_engine(SelectionInput::new(&request.ops, &options, &extension, host.available))
            .map_err(|err| invalid(tool, "backend", err.to_string()))?;

        let conflict = apply_conflict_policy(output, options.on_conflict)?;
        let output = conflict.path;
        let out_path = output.display().to_string();
        warnings.extend(conflict.warning);
        if conflict.skip {
            if !options.dry_run {
                tracing::info!(tool, out_path = %out_path, "output exists; skipping write");
                return Ok(PatchResult::empty(out_path, engine, warnings));
            }
            warnings.push(DRY_RUN_SKIP_WARNING.to_string());
        }

        if engine == PatchEngine::InProcess {
            if options.backend == PatchBackend::Auto && !host.available {
                let reason = host.reason.as_deref().unwrap_or("unknown reason");
                warnings.push(format!("Host automation unavailable: {reason}"));
            }
            if requires_in_process(&request.ops, &options) {
                warnings.push(FORCED_IN_PROCESS_WARNING.to_string());
            }
        }

        tracing::info!(
            tool,
            input = %input.display(),
            output = %out_path,
            ops = request.ops.len(),
            engine = %engine,
            dry_run = options.dry_run,
            "applying patch"
        );

        if engine == PatchEngine::Host {
            let launcher = self
                .launcher
                .clone()
                .ok_or_else(|| anyhow!("host automation bridge is not configured"))?;
            let backend = HostBackend::new(launcher);
            let fallback = allow_auto_fallback(options.backend, has_chart, &extension);
            let host_result = {
                let _session = self.host_session.lock();
                execute(&backend, &request.ops, options, &input, &output)
            };
            match host_result {
                Ok(outcome) => {
                    warnings.extend(outcome.warnings);
                    warnings.extend(skip_warnings(&outcome.diff));
                    let mut result = PatchResult::empty(out_path, PatchEngine::Host, warnings);
                    result.patch_diff = outcome.diff;
                    return Ok(result);
                }
                Err(err) => match err.downcast_ref::<PatchOpError>() {
                    Some(op_err) => {
                        let host_failure =
                            op_err.is_host_runtime_error() || op_err.raw_host_message.is_some();
                        if !(fallback && host_failure) {
                            tracing::info!(op_index = op_err.index, error = %op_err, "host patch op failed");
                            return Ok(error_result(out_path, warnings, op_err.detail(), PatchEngine::Host));
                        }
                        tracing::warn!(error = %op_err, "host patch failed; falling back to in-process");
                        warnings.push(format!(
                            "Host patch failed; falling back to in-process. ({op_err})"
                        ));
                    }
                    None => {
                        if !fallback {
                            bail!("Host patch failed: {err:#}");
                        }
                        tracing::warn!(error = %format!("{err:#}"), "host patch failed; falling back to in-process");
                        warnings.push(format!(
                            "Host patch failed; falling back to in-process. ({err:#})"
                        ));
                    }
                },
            }
        }

        let outcome = match execute(&InProcessBackend, &request.ops, options, &input, &output) {
            Ok(outcome) => outcome,
            Err(err) => match err.downcast::<PatchOpError>() {
                Ok(op_err) => {
                    tracing::info!(op_index = op_err.index, error = %op_err, "in-process patch op failed");
                    return Ok(error_result(out_path, warnings, op_err.detail(), PatchEngine::InProcess));
                }
                Err(err) => return Err(err),
            },
        };

        let BackendOutcome {
            diff,
            inverse_ops,
            formula_issues,
            warnings: backend_warnings,
        } = outcome;
        warnings.extend(backend_warnings);
        if !options.dry_run {
            warnings.push(IN_PROCESS_LOSS_WARNING.to_string());
        }
        warnings.extend(skip_warnings(&diff));

        if !options.dry_run && options.preflight_formula_check && has_errors(&formula_issues) {
            if let Some(issue) = formula_issues
                .iter()
                .find(|issue| issue.level == FormulaIssueLevel::Error)
            {
                let detail = preflight_error(issue, &request.ops);
                tracing::info!(sheet = %issue.sheet, cell = %issue.cell, "formula health check blocked write");
                let mut result = error_result(out_path, warnings, detail, PatchEngine::InProcess);
                result.formula_issues = formula_issues;
                return Ok(result);
            }
        }

        Ok(PatchResult {
            out_path,
            patch_diff: diff,
            inverse_ops,
            formula_issues,
            warnings,
            error: None,
            engine: PatchEngine::InProcess,
        })
    }

    /// `auto` defers to the configured default; the constraints are checked again on the result.
    fn effective_options(
        &self,
        ops: &[PatchOp],
        mut options: PatchOptions,
        tool: &'static str,
    ) -> Result<PatchOptions> {
        if options.backend == PatchBackend::Auto {
            options.backend = self.config.default_backend;
        }
        validate_request_constraints(ops, &options).map_err(|err| err.into_invalid_params(tool))?;
        Ok(options)
    }

    fn resolve_input(&self, path: &Path, tool: &'static str) -> Result<PathBuf> {
        let resolved = self.config.resolve_path(path);
        if !resolved.exists() {
            return Err(invalid(tool, "xlsx_path", format!(
                "Input file not found: {}",
                resolved.display()
            )));
        }
        if !resolved.is_file() {
            return Err(invalid(tool, "xlsx_path", format!(
                "Input path is not a file: {}",
                resolved.display()
            )));
        }
        canonicalize_and_enforce_within_workspace(&self.config.workspace_root, &resolved, tool, "xlsx_path")
    }

    fn resolve_output(
        &self,
        input: &Path,
        out_dir: Option<&Path>,
        out_name: Option<&str>,
        tool: &'static str,
    ) -> Result<PathBuf> {
        let dir = match out_dir {
            Some(dir) => self.config.resolve_path(dir),
            None => input
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("input path has no parent directory: {}", input.display()))?,
        };
        let dir = create_dir_within_workspace(&self.config.workspace_root, &dir, tool, "out_dir")?;
        let name = output_file_name(input, out_name);
        let output = dir.join(name);
        ensure_supported_extension(&output, tool, "out_name")?;
        Ok(output)
    }
}

/// Run `backend` against a staged sibling of `output`; the stage replaces `output`
/// only once the batch has succeeded.
fn skip_warnings(diff: &[PatchDiffItem]) -> impl Iterator<Item = String> + '_ {
    diff.iter()
        .filter(|item| item.status == PatchStatus::Skipped)
        .map(|item| {
            format!(
                "Skipped op[{}] {} at {}!{} due to condition mismatch.",
                item.op_index,
                item.op,
                item.sheet,
                item.cell.as_deref().unwrap_or_default()
            )
        })
}

fn execute(
    backend: &dyn PatchApplier,
    ops: &[PatchOp],
    options: PatchOptions,
    input: &Path,
    output: &Path,
) -> Result<BackendOutcome> {
    if options.dry_run {
        return backend.apply(&PatchJob {
            ops,
            options,
            input,
            output,
        });
    }
    let staged = stage_output(output)?;
    let outcome = backend.apply(&PatchJob {
        ops,
        options,
        input,
        output: &staged,
    })?;
    if staged.exists() {
        staged
            .persist(output)
            .map_err(|err| anyhow!("failed to move staged workbook to {}: {}", output.display(), err.error))?;
    } else if !(options.preflight_formula_check && has_errors(&outcome.formula_issues)) {
        bail!("backend did not write workbook {}", output.display());
    }
    Ok(outcome)
}

fn stage_output(output: &Path) -> Result<TempPath> {
    let dir = output
        .parent()
        .ok_or_else(|| anyhow!("output path has no parent directory: {}", output.display()))?;
    let stem = output
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("workbook");
    let ext = output
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(&format!(".tmp{ext}"))
        .tempfile_in(dir)
        .with_context(|| format!("failed to stage output in {}", dir.display()))?
        .into_temp_path();
    // backends expect to create the file themselves
    fs::remove_file(&staged)
        .with_context(|| format!("failed to clear staged output {}", staged.display()))?;
    Ok(staged)
}

/// Removes the make seed on every exit path.
struct SeedWorkbook(PathBuf);

impl Drop for SeedWorkbook {
    fn drop(&mut self) {
        if self.0.exists() {
            if let Err(err) = fs::remove_file(&self.0) {
                tracing::warn!(seed = %self.0.display(), error = %err, "failed to remove seed workbook");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictOutcome {
    pub path: PathBuf,
    pub warning: Option<String>,
    pub skip: bool,
}

pub fn apply_conflict_policy(path: PathBuf, policy: OnConflict) -> Result<ConflictOutcome> {
    if !path.exists() {
        return Ok(ConflictOutcome {
            path,
            warning: None,
            skip: false,
        });
    }
    match policy {
        OnConflict::Overwrite => Ok(ConflictOutcome {
            path,
            warning: None,
            skip: false,
        }),
        OnConflict::Skip => Ok(ConflictOutcome {
            warning: Some(format!("Output exists; skipping write: {}", display_name(&path))),
            path,
            skip: true,
        }),
        OnConflict::Rename => {
            let renamed = next_available_path(&path)?;
            Ok(ConflictOutcome {
                warning: Some(format!("Output exists; renamed to: {}", display_name(&renamed))),
                path: renamed,
                skip: false,
            })
        }
    }
}

/// First `{stem}_{n}{suffix}` sibling of `path` that does not exist.
pub fn next_available_path(path: &Path) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("workbook");
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let dir = path.parent().unwrap_or(Path::new(""));
    (1..MAX_RENAME_ATTEMPTS)
        .map(|n| dir.join(format!("{stem}_{n}{suffix}")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| anyhow!("Failed to find available output path for {}", path.display()))
}

/// `out_name` (suffix inherited from the input when missing), else `{stem}_patched{suffix}`.
pub fn output_file_name(input: &Path, out_name: Option<&str>) -> String {
    let suffix = input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    if let Some(name) = out_name.map(str::trim).filter(|name| !name.is_empty()) {
        let name = sanitize_filename_component(name);
        if Path::new(&name).extension().is_some() {
            return name;
        }
        return format!("{name}{suffix}");
    }
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("workbook");
    if stem.to_ascii_lowercase().ends_with(PATCHED_SUFFIX) {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}{PATCHED_SUFFIX}{suffix}")
    }
}

/// Seed sheet for make: the requested sheet unless an `add_sheet` op would collide with it.
pub fn initial_sheet_name(sheet: Option<&str>, ops: &[PatchOp]) -> String {
    let Some(requested) = sheet.map(str::trim).filter(|s| !s.is_empty()) else {
        return DEFAULT_SHEET.to_string();
    };
    let lowered = requested.to_lowercase();
    let collides = ops.iter().any(|op| {
        matches!(op, PatchOp::AddSheet(add) if add.sheet.trim().to_lowercase() == lowered)
    });
    if collides {
        DEFAULT_SHEET.to_string()
    } else {
        requested.to_string()
    }
}

fn ensure_supported_extension(path: &Path, tool: &'static str, field: &'static str) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(invalid(tool, field, format!("Unsupported file extension: {extension}")));
    }
    Ok(extension)
}

fn preflight_error(issue: &FormulaIssue, ops: &[PatchOp]) -> PatchErrorDetail {
    let address = CellAddress::parse(&issue.cell).ok();
    let origin = ops.iter().enumerate().find(|(_, op)| {
        op.sheet() == issue.sheet
            && match (op.footprint(), address) {
                (Some(bounds), Some(address)) => bounds.contains(address),
                _ => false,
            }
    });
    let (op_index, op) = match origin {
        Some((index, op)) => (index as i64, op.kind()),
        None => (-1, PatchOpKind::SetValue),
    };
    PatchErrorDetail {
        op_index,
        op,
        sheet: issue.sheet.clone(),
        cell: Some(issue.cell.clone()),
        message: format!("Formula health check failed: {}", issue.message),
        hint: None,
        expected_fields: Vec::new(),
        example_op: None,
        error_code: None,
        failed_field: None,
        raw_com_message: None,
    }
}

fn error_result(
    out_path: String,
    warnings: Vec<String>,
    detail: PatchErrorDetail,
    engine: PatchEngine,
) -> PatchResult {
    let mut result = PatchResult::empty(out_path, engine, warnings);
    result.error = Some(detail);
    result
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn invalid(tool: &'static str, field: &str, message: impl Into<String>) -> anyhow::Error {
    InvalidParamsError::at(tool, field, message).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::model::AddSheetOp;

    #[test]
    fn default_output_names_avoid_double_suffix() {
        assert_eq!(output_file_name(Path::new("/w/book.xlsx"), None), "book_patched.xlsx");
        assert_eq!(output_file_name(Path::new("/w/book_PATCHED.xlsm"), None), "book_PATCHED.xlsm");
        assert_eq!(output_file_name(Path::new("/w/book.xlsx"), Some("report")), "report.xlsx");
        assert_eq!(output_file_name(Path::new("/w/book.xlsx"), Some("  ")), "book_patched.xlsx");
        assert_eq!(output_file_name(Path::new("/w/book.xlsx"), Some("a/b.xlsm")), "a_b.xlsm");
    }

    #[test]
    fn rename_picks_first_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.xlsx");
        fs::write(&target, b"x").unwrap();
        fs::write(dir.path().join("out_1.xlsx"), b"x").unwrap();
        let outcome = apply_conflict_policy(target.clone(), OnConflict::Rename).unwrap();
        assert_eq!(outcome.path, dir.path().join("out_2.xlsx"));
        assert_eq!(outcome.warning.as_deref(), Some("Output exists; renamed to: out_2.xlsx"));
        assert!(!outcome.skip);

        let skipped = apply_conflict_policy(target.clone(), OnConflict::Skip).unwrap();
        assert!(skipped.skip);
        assert_eq!(skipped.warning.as_deref(), Some("Output exists; skipping write: out.xlsx"));

        let overwrite = apply_conflict_policy(target.clone(), OnConflict::Overwrite).unwrap();
        assert_eq!(overwrite.path, target);
        assert!(overwrite.warning.is_none());
    }

    #[test]
    fn seed_sheet_yields_to_add_sheet() {
        let ops = vec![PatchOp::AddSheet(AddSheetOp {
            sheet: "data".to_string(),
        })];
        assert_eq!(initial_sheet_name(Some(" Data "), &ops), "Sheet1");
        assert_eq!(initial_sheet_name(Some("Summary"), &ops), "Summary");
        assert_eq!(initial_sheet_name(None, &[]), "Sheet1");
        assert_eq!(initial_sheet_name(Some("   "), &[]), "Sheet1");
    }

    #[test]
    fn unsupported_extensions_are_invalid_params() {
        let err = ensure_supported_extension(Path::new("a.csv"), PATCH_TOOL, "xlsx_path").unwrap_err();
        let invalid = err.downcast_ref::<InvalidParamsError>().unwrap();
        assert_eq!(invalid.message(), "Unsupported file extension: .csv");
        assert_eq!(ensure_supported_extension(Path::new("a.XLSM"), PATCH_TOOL, "xlsx_path").unwrap(), ".xlsm");
    }
}
