use crate::patch::model::{PatchOp, PatchOpKind, PatchOptions};
use crate::tools::param_enums::{PatchBackend, PatchEngine};
use anyhow::{Result, bail};

/// Everything the engine choice depends on.
#[derive(Debug, Clone, Copy)]
pub struct SelectionInput<'a> {
    pub requested: PatchBackend,
    /// Lowercased extension including the dot, e.g. `.xlsx`.
    pub extension: &'a str,
    pub has_chart_op: bool,
    pub needs_in_process: bool,
    pub host_available: bool,
}

impl<'a> SelectionInput<'a> {
    pub fn new(ops: &[PatchOp], options: &PatchOptions, extension: &'a str, host_available: bool) -> Self {
        Self {
            requested: options.backend,
            extension,
            has_chart_op: contains_kind(ops, PatchOpKind::CreateChart),
            needs_in_process: requires_in_process(ops, options),
            host_available,
        }
    }
}

pub fn contains_kind(ops: &[PatchOp], kind: PatchOpKind) -> bool {
    ops.iter().any(|op| op.kind() == kind)
}

pub fn contains_design_ops(ops: &[PatchOp]) -> bool {
    ops.iter().any(|op| op.kind().is_design())
}

/// Dry-run, inverse ops, preflight and snapshot restore only exist in-process.
pub fn requires_in_process(ops: &[PatchOp], options: &PatchOptions) -> bool {
    options.needs_extended_features() || contains_kind(ops, PatchOpKind::RestoreDesignSnapshot)
}

pub fn select_engine(input: SelectionInput<'_>) -> Result<PatchEngine> {
    let is_xls = input.extension == ".xls";
    match input.requested {
        PatchBackend::InProcess => {
            if input.has_chart_op {
                bail!("create_chart is supported only on host backend.");
            }
            if is_xls {
                bail!("backend='in_process' cannot edit .xls files.");
            }
            return Ok(PatchEngine::InProcess);
        }
        PatchBackend::Host => {
            if !input.host_available {
                bail!("backend='host' requires host automation availability.");
            }
            return Ok(PatchEngine::Host);
        }
        PatchBackend::Auto => {}
    }
    if is_xls {
        if !input.host_available {
            bail!(".xls editing requires host automation in this environment.");
        }
        return Ok(PatchEngine::Host);
    }
    if input.needs_in_process {
        if input.has_chart_op {
            bail!(
                "create_chart does not support dry_run, return_inverse_ops, or preflight_formula_check."
            );
        }
        return Ok(PatchEngine::InProcess);
    }
    if input.host_available {
        return Ok(PatchEngine::Host);
    }
    if input.has_chart_op {
        bail!("create_chart requires host automation availability in this environment.");
    }
    Ok(PatchEngine::InProcess)
}

/// Whether a host failure may be retried once in-process.
pub fn allow_auto_fallback(requested: PatchBackend, has_chart_op: bool, extension: &str) -> bool {
    requested == PatchBackend::Auto
        && !has_chart_op
        && matches!(extension, ".xlsx" | ".xlsm")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(requested: PatchBackend, extension: &str) -> SelectionInput<'_> {
        SelectionInput {
            requested,
            extension,
            has_chart_op: false,
            needs_in_process: false,
            host_available: true,
        }
    }

    #[test]
    fn explicit_in_process_rejects_charts_and_xls() {
        let mut sel = input(PatchBackend::InProcess, ".xlsx");
        assert_eq!(select_engine(sel).unwrap(), PatchEngine::InProcess);
        sel.has_chart_op = true;
        assert!(select_engine(sel).is_err());
        let sel = input(PatchBackend::InProcess, ".xls");
        assert!(select_engine(sel).unwrap_err().to_string().contains(".xls"));
    }

    #[test]
    fn explicit_host_requires_availability() {
        let mut sel = input(PatchBackend::Host, ".xlsx");
        assert_eq!(select_engine(sel).unwrap(), PatchEngine::Host);
        sel.host_available = false;
        assert!(select_engine(sel).is_err());
    }

    #[test]
    fn auto_prefers_host_unless_extended_features_are_needed() {
        let mut sel = input(PatchBackend::Auto, ".xlsx");
        assert_eq!(select_engine(sel).unwrap(), PatchEngine::Host);
        sel.needs_in_process = true;
        assert_eq!(select_engine(sel).unwrap(), PatchEngine::InProcess);
        sel.has_chart_op = true;
        assert!(select_engine(sel).is_err());
    }

    #[test]
    fn auto_without_host() {
        let mut sel = input(PatchBackend::Auto, ".xlsm");
        sel.host_available = false;
        assert_eq!(select_engine(sel).unwrap(), PatchEngine::InProcess);
        sel.has_chart_op = true;
        assert!(select_engine(sel).is_err());
        let mut xls = input(PatchBackend::Auto, ".xls");
        assert_eq!(select_engine(xls).unwrap(), PatchEngine::Host);
        xls.host_available = false;
        assert!(select_engine(xls).is_err());
    }

    #[test]
    fn fallback_only_for_auto_openxml_without_charts() {
        assert!(allow_auto_fallback(PatchBackend::Auto, false, ".xlsx"));
        assert!(!allow_auto_fallback(PatchBackend::Host, false, ".xlsx"));
        assert!(!allow_auto_fallback(PatchBackend::Auto, true, ".xlsx"));
        assert!(!allow_auto_fallback(PatchBackend::Auto, false, ".xls"));
    }
}
