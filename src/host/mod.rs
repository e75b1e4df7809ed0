//! Host spreadsheet-application automation.
//!
//! The host backend never talks to an application directly. It drives a
//! [`HostWorkbookAdapter`] obtained from a [`HostLauncher`]; the shipped
//! launcher is [`bridge::BridgeLauncher`], which speaks JSON lines to an
//! external bridge executable.

pub mod bridge;
pub mod protocol;

use crate::patch::model::ScalarValue;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host automation bridge is not configured")]
    NotConfigured,
    #[error("failed to start host automation bridge '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host automation bridge protocol error: {0}")]
    Protocol(String),
    #[error("{message}")]
    Automation { message: String, code: Option<i64> },
    #[error("host automation session is closed")]
    Closed,
}

impl HostError {
    /// Raw diagnostic text worth surfacing to callers, if this came from the host.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Automation {
                message,
                code: Some(code),
            } => Some(format!("{message} (HRESULT {code:#010X})", code = *code as i32)),
            Self::Automation { message, code: None } => Some(message.clone()),
            _ => None,
        }
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAvailability {
    pub available: bool,
    pub reason: Option<String>,
}

impl HostAvailability {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason.into()),
        }
    }
}

/// Starts one automation session per request.
pub trait HostLauncher: Send + Sync {
    fn availability(&self) -> HostAvailability;

    /// Start the application and open `path` in it.
    fn open(&self, path: &Path) -> HostResult<Box<dyn HostWorkbookAdapter>>;

    /// Create an empty workbook at `path` whose only sheet is `initial_sheet`.
    fn create(&self, path: &Path, initial_sheet: &str) -> HostResult<()>;

    fn name(&self) -> &'static str;
}

/// Cell content as the host reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCell {
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub value: Option<ScalarValue>,
}

/// Style attributes to apply to a range. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    /// BGR integer as used by the automation surface.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_color: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_alignment: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_alignment: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
    /// Thin black edges on every cell of the range.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub grid_border: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTable {
    pub name: String,
    /// Address as reported by the host; may carry `$` or a sheet prefix.
    pub address: String,
}

/// Where a table's source comes from in one add attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TableSource {
    RangeObject(String),
    Address(String),
}

impl TableSource {
    pub fn describe(&self) -> String {
        match self {
            Self::RangeObject(_) => "range_api".to_string(),
            Self::Address(address) => format!("address:{address}"),
        }
    }
}

/// One call shape for the host's table-add method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum TableAddShape {
    Positional { arity: u8 },
    Keyword { with_headers: bool },
}

impl TableAddShape {
    pub fn signature(self) -> &'static str {
        match self {
            Self::Positional { arity: 2 } => "Add(1, Source)",
            Self::Positional { arity: 4 } => "Add(1, Source, None, 1)",
            Self::Positional { arity: 5 } => "Add(1, Source, None, 1, None)",
            Self::Positional { .. } => "Add(1, Source, None, 1, None, None)",
            Self::Keyword { with_headers: false } => "Add(SourceType=1, Source=...)",
            Self::Keyword { with_headers: true } => {
                "Add(SourceType=1, Source=..., XlListObjectHasHeaders=1)"
            }
        }
    }
}

/// Table-add call shapes, tried in order until one succeeds.
pub const TABLE_ADD_SHAPES: &[TableAddShape] = &[
    TableAddShape::Positional { arity: 2 },
    TableAddShape::Positional { arity: 4 },
    TableAddShape::Positional { arity: 5 },
    TableAddShape::Positional { arity: 6 },
    TableAddShape::Keyword {
        with_headers: false,
    },
    TableAddShape::Keyword { with_headers: true },
];

/// Table properties that accept a style name, tried in order.
pub const TABLE_STYLE_ATTRIBUTES: &[&str] = &["TableStyle", "TableStyle2"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableAddCall {
    pub source: TableSource,
    pub shape: TableAddShape,
}

/// A range on a possibly different sheet than the chart's own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetRange {
    pub sheet: String,
    pub range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSeriesPlan {
    pub values: SheetRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Fully resolved chart creation request for the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPlan {
    pub chart_type_id: i32,
    pub anchor_cell: String,
    pub width: f64,
    pub height: f64,
    /// Range bound through SetSourceData before series are adjusted.
    pub source: SheetRange,
    pub series: Vec<ChartSeriesPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<SheetRange>,
    /// 1 = rows, 2 = columns.
    pub plot_by: i32,
    pub name_series_by_index: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis_title: Option<String>,
}

/// Explicit automation surface the host backend is written against.
pub trait HostWorkbookAdapter {
    fn sheet_names(&mut self) -> HostResult<Vec<String>>;
    /// Append a sheet after the last one.
    fn add_sheet(&mut self, name: &str) -> HostResult<()>;

    fn read_cell(&mut self, sheet: &str, cell: &str) -> HostResult<HostCell>;
    fn write_value(&mut self, sheet: &str, cell: &str, value: Option<&ScalarValue>) -> HostResult<()>;
    fn write_formula(&mut self, sheet: &str, cell: &str, formula: &str) -> HostResult<()>;
    fn write_range_values(
        &mut self,
        sheet: &str,
        range: &str,
        values: &[Vec<Option<ScalarValue>>],
    ) -> HostResult<()>;

    fn set_style(&mut self, sheet: &str, range: &str, style: &HostStyle) -> HostResult<()>;
    fn set_row_height(&mut self, sheet: &str, row: u32, height: f64) -> HostResult<()>;
    fn set_column_width(&mut self, sheet: &str, column: &str, width: f64) -> HostResult<()>;
    /// Auto-fit a column and report its resulting width.
    fn auto_fit_column(&mut self, sheet: &str, column: &str) -> HostResult<Option<f64>>;
    /// Index of the last used column, 0 when the sheet is empty.
    fn last_used_column(&mut self, sheet: &str) -> HostResult<u32>;

    fn merge(&mut self, sheet: &str, range: &str) -> HostResult<()>;
    fn unmerge(&mut self, sheet: &str, range: &str) -> HostResult<()>;
    /// Merged areas intersecting `range`, as addresses without `$`.
    fn merged_areas(&mut self, sheet: &str, range: &str) -> HostResult<Vec<String>>;

    fn tables(&mut self, sheet: &str) -> HostResult<Vec<HostTable>>;
    /// Attempt one table-add call shape; returns the host's name for the new table.
    fn add_table(&mut self, sheet: &str, call: &TableAddCall) -> HostResult<String>;
    fn rename_table(&mut self, sheet: &str, table: &str, name: &str) -> HostResult<()>;
    fn set_table_style(&mut self, sheet: &str, table: &str, attribute: &str, style: &str) -> HostResult<()>;

    fn chart_names(&mut self, sheet: &str) -> HostResult<Vec<String>>;
    /// Create a chart and return its object name.
    fn add_chart(&mut self, sheet: &str, plan: &ChartPlan) -> HostResult<String>;

    fn save_as(&mut self, path: &Path) -> HostResult<()>;
    fn close(&mut self) -> HostResult<()>;
    fn quit(&mut self) -> HostResult<()>;
    /// Forced termination when a graceful quit failed.
    fn kill(&mut self);
}

/// Close the workbook and stop the application without ever failing.
pub fn shutdown_quietly(adapter: &mut dyn HostWorkbookAdapter) {
    if let Err(err) = adapter.close() {
        tracing::warn!(error = %err, "host workbook close failed");
    }
    if let Err(err) = adapter.quit() {
        tracing::warn!(error = %err, "host quit failed; killing process");
        adapter.kill();
    }
}

/// Try each call variant in order; return the first success or every failure label.
pub fn try_variants<V, T>(
    variants: impl IntoIterator<Item = V>,
    mut label: impl FnMut(&V) -> String,
    mut attempt: impl FnMut(&V) -> HostResult<T>,
) -> Result<T, Vec<String>> {
    let mut errors = Vec::new();
    for variant in variants {
        match attempt(&variant) {
            Ok(value) => return Ok(value),
            Err(err) => errors.push(format!("{} -> {err}", label(&variant))),
        }
    }
    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_variants_stops_at_first_success() {
        let mut seen = Vec::new();
        let result = try_variants(
            [1, 2, 3],
            |n| format!("v{n}"),
            |n| {
                seen.push(*n);
                if *n == 2 {
                    Ok("ok")
                } else {
                    Err(HostError::Protocol("nope".to_string()))
                }
            },
        );
        assert_eq!(result, Ok("ok"));
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn try_variants_collects_every_failure() {
        let result: Result<(), _> = try_variants(
            TABLE_ADD_SHAPES.iter().copied(),
            |shape| shape.signature().to_string(),
            |_| {
                Err(HostError::Automation {
                    message: "bad".to_string(),
                    code: None,
                })
            },
        );
        let errors = result.unwrap_err();
        assert_eq!(errors.len(), TABLE_ADD_SHAPES.len());
        assert_eq!(errors[0], "Add(1, Source) -> bad");
    }

    #[test]
    fn automation_diagnostics_carry_code() {
        let err = HostError::Automation {
            message: "Range.Merge failed".to_string(),
            code: Some(-2146827284),
        };
        assert_eq!(
            err.diagnostic().as_deref(),
            Some("Range.Merge failed (HRESULT 0x800A03EC)")
        );
        assert!(HostError::Closed.diagnostic().is_none());
    }
}
