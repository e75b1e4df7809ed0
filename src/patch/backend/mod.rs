//! Backends that apply validated operations to a workbook file.

pub mod host;
pub mod in_process;

use crate::patch::model::{
    DesignSnapshot, PatchDiffItem, PatchOp, PatchOpKind, PatchOptions, PatchStatus, PatchValue,
    PatchValueKind, RestoreDesignSnapshotOp, ScalarValue, SetFormulaOp, SetStyleOp, SetValueOp,
};
use crate::tools::param_enums::{HorizontalAlign, PatchEngine, VerticalAlign};
use anyhow::{Result, bail};
use std::collections::HashSet;
use std::path::Path;

pub use host::HostBackend;
pub use in_process::InProcessBackend;

/// Column width used when nothing better is known.
pub const DEFAULT_COLUMN_WIDTH: f64 = 8.43;

const SUMMARY_PREVIEW_LIMIT: usize = 5;

/// One backend invocation.
#[derive(Debug, Clone, Copy)]
pub struct PatchJob<'a> {
    pub ops: &'a [PatchOp],
    pub options: PatchOptions,
    pub input: &'a Path,
    /// Where the patched workbook is written; not written on dry-run.
    pub output: &'a Path,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BackendOutcome {
    pub diff: Vec<PatchDiffItem>,
    /// Already reversed so replaying them in order undoes the batch.
    pub inverse_ops: Vec<PatchOp>,
    pub formula_issues: Vec<crate::patch::model::FormulaIssue>,
    pub warnings: Vec<String>,
}

/// Applies a batch of operations. A failing op surfaces as a
/// [`crate::patch::errors::PatchOpError`] inside the returned error.
pub trait PatchApplier: Send + Sync {
    fn engine(&self) -> PatchEngine;
    fn apply(&self, job: &PatchJob<'_>) -> Result<BackendOutcome>;
}

/// What a single-cell op writes.
#[derive(Debug, Clone, PartialEq)]
pub enum CellWrite {
    Value(Option<ScalarValue>),
    Formula(String),
}

impl CellWrite {
    pub fn as_patch_value(&self) -> Option<PatchValue> {
        match self {
            Self::Value(None) => None,
            Self::Value(Some(value)) => Some(PatchValue::new(PatchValueKind::Value, Some(value.clone()))),
            Self::Formula(formula) => Some(PatchValue::described(PatchValueKind::Formula, formula.clone())),
        }
    }
}

/// Values starting with `=` become formulas only when `auto_formula` is set.
pub fn resolve_value_write(
    value: Option<&ScalarValue>,
    auto_formula: bool,
    kind: PatchOpKind,
) -> Result<CellWrite> {
    match value {
        Some(ScalarValue::Text(text)) if text.starts_with('=') => {
            if !auto_formula {
                bail!("{kind} rejects values starting with '='.");
            }
            Ok(CellWrite::Formula(text.clone()))
        }
        other => Ok(CellWrite::Value(other.cloned())),
    }
}

/// The write performed by a single-cell op, or `None` when its condition fails.
pub fn planned_cell_write(
    op: &PatchOp,
    before: Option<&PatchValue>,
    auto_formula: bool,
) -> Result<Option<CellWrite>> {
    let write = match op {
        PatchOp::SetValue(op) => resolve_value_write(op.value.as_ref(), auto_formula, PatchOpKind::SetValue)?,
        PatchOp::SetFormula(op) => CellWrite::Formula(op.formula.clone()),
        PatchOp::SetValueIf(op) => {
            if !condition_matches(before, op.expected.as_ref()) {
                return Ok(None);
            }
            resolve_value_write(op.value.as_ref(), auto_formula, PatchOpKind::SetValueIf)?
        }
        PatchOp::SetFormulaIf(op) => {
            if !condition_matches(before, op.expected.as_ref()) {
                return Ok(None);
            }
            CellWrite::Formula(op.formula.clone())
        }
        other => bail!("{} is not a single-cell operation.", other.kind()),
    };
    Ok(Some(write))
}

/// Conditional ops compare the current literal (or formula text) with `expected`.
pub fn condition_matches(before: Option<&PatchValue>, expected: Option<&ScalarValue>) -> bool {
    let current = before.and_then(|value| value.value.as_ref());
    current == expected
}

pub fn applied_item(
    index: usize,
    op: &PatchOp,
    cell: Option<String>,
    before: Option<PatchValue>,
    after: Option<PatchValue>,
) -> PatchDiffItem {
    PatchDiffItem {
        op_index: index,
        op: op.kind(),
        sheet: op.sheet().to_string(),
        cell,
        before,
        after,
        status: PatchStatus::Applied,
    }
}

pub fn skipped_item(index: usize, op: &PatchOp, cell: String, before: Option<PatchValue>) -> PatchDiffItem {
    PatchDiffItem {
        op_index: index,
        op: op.kind(),
        sheet: op.sheet().to_string(),
        cell: Some(cell),
        after: before.clone(),
        before,
        status: PatchStatus::Skipped,
    }
}

pub fn style_item(index: usize, op: &PatchOp, cell: Option<String>, summary: impl Into<String>) -> PatchDiffItem {
    applied_item(
        index,
        op,
        cell,
        None,
        Some(PatchValue::described(PatchValueKind::Style, summary)),
    )
}

pub fn dimension_item(index: usize, op: &PatchOp, summary: impl Into<String>) -> PatchDiffItem {
    applied_item(
        index,
        op,
        None,
        None,
        Some(PatchValue::described(PatchValueKind::Dimension, summary)),
    )
}

/// Inverse of a cell write: restore the literal or formula, or clear the cell.
pub fn inverse_cell_op(sheet: &str, cell: &str, before: Option<&PatchValue>) -> PatchOp {
    match before {
        Some(PatchValue {
            kind: PatchValueKind::Formula,
            value: Some(formula),
        }) => PatchOp::SetFormula(SetFormulaOp {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            formula: formula.to_string(),
        }),
        Some(previous) => PatchOp::SetValue(SetValueOp {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            value: previous.value.clone(),
        }),
        None => PatchOp::SetValue(SetValueOp {
            sheet: sheet.to_string(),
            cell: cell.to_string(),
            value: None,
        }),
    }
}

/// Empty snapshots never produce an undo step.
pub fn restore_snapshot_op(sheet: &str, snapshot: DesignSnapshot) -> Option<PatchOp> {
    if snapshot.is_empty() {
        return None;
    }
    Some(PatchOp::RestoreDesignSnapshot(RestoreDesignSnapshotOp {
        sheet: sheet.to_string(),
        design_snapshot: snapshot,
    }))
}

/// `A, B, C, D, E, ... (7)`
pub fn summarize_targets<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        return "(0)".to_string();
    }
    let mut preview = values
        .iter()
        .take(SUMMARY_PREVIEW_LIMIT)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if values.len() > SUMMARY_PREVIEW_LIMIT {
        preview.push_str(", ...");
    }
    format!("{preview} ({})", values.len())
}

pub fn clamp_width(width: f64, min_width: Option<f64>, max_width: Option<f64>) -> f64 {
    let mut clamped = width;
    if let Some(min) = min_width {
        clamped = clamped.max(min);
    }
    if let Some(max) = max_width {
        clamped = clamped.min(max);
    }
    clamped
}

pub fn dimensions_summary(rows: Option<&[u32]>, columns: Option<&[String]>) -> String {
    let mut parts = Vec::new();
    if let Some(rows) = rows {
        parts.push(format!("rows={}", summarize_targets(rows)));
    }
    if let Some(columns) = columns {
        parts.push(format!("columns={}", summarize_targets(columns)));
    }
    parts.join(", ")
}

pub fn auto_fit_summary(columns: &[String], min_width: Option<f64>, max_width: Option<f64>) -> String {
    let mut parts = vec![format!("columns={}", summarize_targets(columns))];
    if let Some(min) = min_width {
        parts.push(format!("min_width={min}"));
    }
    if let Some(max) = max_width {
        parts.push(format!("max_width={max}"));
    }
    parts.join(", ")
}

fn or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

pub fn alignment_summary(
    horizontal: Option<HorizontalAlign>,
    vertical: Option<VerticalAlign>,
    wrap_text: Option<bool>,
) -> String {
    format!(
        "horizontal={},vertical={},wrap_text={}",
        or_none(horizontal),
        or_none(vertical),
        or_none(wrap_text)
    )
}

/// Colors are echoed in their `#`-prefixed normalized form.
pub fn set_style_summary(op: &SetStyleOp) -> String {
    let mut parts = Vec::new();
    if let Some(bold) = op.bold {
        parts.push(format!("bold={bold}"));
    }
    if let Some(size) = op.font_size {
        parts.push(format!("font_size={size}"));
    }
    if let Some(color) = &op.color {
        parts.push(format!("color={color}"));
    }
    if let Some(fill) = &op.fill_color {
        parts.push(format!("fill_color={fill}"));
    }
    if let Some(h) = op.horizontal_align {
        parts.push(format!("horizontal_align={h}"));
    }
    if let Some(v) = op.vertical_align {
        parts.push(format!("vertical_align={v}"));
    }
    if let Some(wrap) = op.wrap_text {
        parts.push(format!("wrap_text={wrap}"));
    }
    parts.join(";")
}

pub fn table_summary(name: &str, style: &str) -> String {
    format!("table={name};table_style={style}")
}

/// Next free `TableN` name.
pub fn next_table_name(taken: &HashSet<String>) -> String {
    (1u32..)
        .map(|n| format!("Table{n}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| "Table".to_string())
}

/// Non-empty cells other than the top-left one lose their value when merged.
pub fn merge_value_loss_warning(sheet: &str, range: &str, risky_cells: &[String]) -> Option<String> {
    if risky_cells.is_empty() {
        return None;
    }
    Some(format!(
        "merge_cells may clear non-top-left values at {sheet}!{range}: {}",
        risky_cells.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::model::{SetValueIfOp, Target};

    #[test]
    fn summaries_preview_five_and_count() {
        let cols: Vec<String> = ["A", "B", "C", "D", "E", "F", "G"].iter().map(|s| s.to_string()).collect();
        assert_eq!(summarize_targets(&cols), "A, B, C, D, E, ... (7)");
        assert_eq!(summarize_targets(&[2u32, 4]), "2, 4 (2)");
        assert_eq!(summarize_targets::<u32>(&[]), "(0)");
    }

    #[test]
    fn clamp_respects_both_bounds() {
        assert_eq!(clamp_width(62.0, Some(8.0), Some(40.0)), 40.0);
        assert_eq!(clamp_width(3.0, Some(8.0), None), 8.0);
        assert_eq!(clamp_width(12.0, None, None), 12.0);
    }

    #[test]
    fn equals_prefixed_values_need_auto_formula() {
        let value = ScalarValue::text("=A1+1");
        let err = resolve_value_write(Some(&value), false, PatchOpKind::SetValue).unwrap_err();
        assert_eq!(err.to_string(), "set_value rejects values starting with '='.");
        assert_eq!(
            resolve_value_write(Some(&value), true, PatchOpKind::SetValue).unwrap(),
            CellWrite::Formula("=A1+1".to_string())
        );
    }

    #[test]
    fn mismatched_condition_plans_nothing() {
        let op = PatchOp::SetValueIf(SetValueIfOp {
            sheet: "S".to_string(),
            cell: "A1".to_string(),
            expected: Some(ScalarValue::text("old")),
            value: Some(ScalarValue::text("new")),
        });
        let before = PatchValue::new(PatchValueKind::Value, Some(ScalarValue::text("other")));
        assert_eq!(planned_cell_write(&op, Some(&before), false).unwrap(), None);
        let before = PatchValue::new(PatchValueKind::Value, Some(ScalarValue::text("old")));
        assert!(planned_cell_write(&op, Some(&before), false).unwrap().is_some());
    }

    #[test]
    fn numeric_conditions_compare_by_value() {
        let before = PatchValue::new(PatchValueKind::Value, Some(ScalarValue::Int(3)));
        assert!(condition_matches(Some(&before), Some(&ScalarValue::Float(3.0))));
        assert!(condition_matches(None, None));
        assert!(!condition_matches(None, Some(&ScalarValue::Int(0))));
    }

    #[test]
    fn inverse_restores_formula_or_clears() {
        let before = PatchValue::described(PatchValueKind::Formula, "=B1");
        assert!(matches!(
            inverse_cell_op("S", "A1", Some(&before)),
            PatchOp::SetFormula(SetFormulaOp { ref formula, .. }) if formula == "=B1"
        ));
        assert!(matches!(
            inverse_cell_op("S", "A1", None),
            PatchOp::SetValue(SetValueOp { value: None, .. })
        ));
    }

    #[test]
    fn next_table_name_skips_taken() {
        let taken: HashSet<String> = ["Table1".to_string(), "Table2".to_string()].into();
        assert_eq!(next_table_name(&taken), "Table3");
    }

    #[test]
    fn empty_snapshot_has_no_inverse() {
        assert!(restore_snapshot_op("S", DesignSnapshot::default()).is_none());
    }

    #[test]
    fn set_style_summary_lists_present_fields() {
        let op = SetStyleOp {
            sheet: "S".to_string(),
            target: Target::Range("A1:B1".to_string()),
            bold: Some(true),
            font_size: None,
            color: None,
            fill_color: Some("#D9E1F2".to_string()),
            horizontal_align: Some(HorizontalAlign::Center),
            vertical_align: None,
            wrap_text: None,
        };
        assert_eq!(
            set_style_summary(&op),
            "bold=true;fill_color=#D9E1F2;horizontal_align=center"
        );
    }
}
