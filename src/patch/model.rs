use crate::a1::RangeBounds;
use crate::tools::param_enums::{
    HorizontalAlign, OnConflict, PatchBackend, PatchEngine, VerticalAlign,
};
use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
    AsRefStr,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatchOpKind {
    SetValue,
    SetFormula,
    AddSheet,
    SetRangeValues,
    FillFormula,
    SetValueIf,
    SetFormulaIf,
    DrawGridBorder,
    SetBold,
    SetFontSize,
    SetFontColor,
    SetFillColor,
    SetDimensions,
    AutoFitColumns,
    MergeCells,
    UnmergeCells,
    SetAlignment,
    SetStyle,
    ApplyTableStyle,
    CreateChart,
    RestoreDesignSnapshot,
}

impl PatchOpKind {
    /// Kinds that touch styles, dimensions, merges or tables.
    pub fn is_design(self) -> bool {
        matches!(
            self,
            Self::DrawGridBorder
                | Self::SetBold
                | Self::SetFontSize
                | Self::SetFontColor
                | Self::SetFillColor
                | Self::SetDimensions
                | Self::AutoFitColumns
                | Self::MergeCells
                | Self::UnmergeCells
                | Self::SetAlignment
                | Self::SetStyle
                | Self::ApplyTableStyle
                | Self::RestoreDesignSnapshot
        )
    }
}

/// A literal cell value as it travels through requests and diffs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Single cell or rectangular range targeted by a style operation.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Cell(String),
    Range(String),
}

impl Target {
    pub fn label(&self) -> &str {
        match self {
            Self::Cell(cell) => cell,
            Self::Range(range) => range,
        }
    }

    pub fn bounds(&self) -> Result<RangeBounds> {
        match self {
            Self::Cell(cell) => RangeBounds::parse_cell_or_range(cell),
            Self::Range(range) => RangeBounds::parse(range),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetValueOp {
    pub sheet: String,
    pub cell: String,
    pub value: Option<ScalarValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFormulaOp {
    pub sheet: String,
    pub cell: String,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AddSheetOp {
    pub sheet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetRangeValuesOp {
    pub sheet: String,
    pub range: String,
    pub values: Vec<Vec<Option<ScalarValue>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FillFormulaOp {
    pub sheet: String,
    pub range: String,
    pub base_cell: String,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetValueIfOp {
    pub sheet: String,
    pub cell: String,
    pub expected: Option<ScalarValue>,
    pub value: Option<ScalarValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFormulaIfOp {
    pub sheet: String,
    pub cell: String,
    pub expected: Option<ScalarValue>,
    pub formula: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DrawGridBorderOp {
    pub sheet: String,
    pub base_cell: String,
    pub row_count: u32,
    pub col_count: u32,
}

impl DrawGridBorderOp {
    pub fn bounds(&self) -> Result<RangeBounds> {
        let origin = crate::a1::CellAddress::parse(&self.base_cell)?;
        RangeBounds::from_origin(origin, self.row_count, self.col_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetBoldOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFontSizeOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    pub font_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFontColorOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFillColorOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    pub fill_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetDimensionsOp {
    pub sheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_height: Option<f64>,
    /// Normalized column labels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AutoFitColumnsOp {
    pub sheet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RangeOp {
    pub sheet: String,
    pub range: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetAlignmentOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_align: Option<HorizontalAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_align: Option<VerticalAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetStyleOp {
    pub sheet: String,
    #[serde(flatten)]
    pub target: Target,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horizontal_align: Option<HorizontalAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_align: Option<VerticalAlign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_text: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct ApplyTableStyleOp {
    pub sheet: String,
    pub range: String,
    pub style: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct CreateChartOp {
    pub sheet: String,
    pub chart_type: String,
    /// One or more ranges, optionally sheet-qualified.
    pub data_range: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_range: Option<String>,
    pub anchor_cell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub titles_from_data: bool,
    pub series_from_rows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct RestoreDesignSnapshotOp {
    pub sheet: String,
    pub design_snapshot: DesignSnapshot,
}

/// A validated patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    SetValue(SetValueOp),
    SetFormula(SetFormulaOp),
    AddSheet(AddSheetOp),
    SetRangeValues(SetRangeValuesOp),
    FillFormula(FillFormulaOp),
    SetValueIf(SetValueIfOp),
    SetFormulaIf(SetFormulaIfOp),
    DrawGridBorder(DrawGridBorderOp),
    SetBold(SetBoldOp),
    SetFontSize(SetFontSizeOp),
    SetFontColor(SetFontColorOp),
    SetFillColor(SetFillColorOp),
    SetDimensions(SetDimensionsOp),
    AutoFitColumns(AutoFitColumnsOp),
    MergeCells(RangeOp),
    UnmergeCells(RangeOp),
    SetAlignment(SetAlignmentOp),
    SetStyle(SetStyleOp),
    ApplyTableStyle(ApplyTableStyleOp),
    CreateChart(CreateChartOp),
    RestoreDesignSnapshot(RestoreDesignSnapshotOp),
}

impl PatchOp {
    pub fn kind(&self) -> PatchOpKind {
        match self {
            Self::SetValue(_) => PatchOpKind::SetValue,
            Self::SetFormula(_) => PatchOpKind::SetFormula,
            Self::AddSheet(_) => PatchOpKind::AddSheet,
            Self::SetRangeValues(_) => PatchOpKind::SetRangeValues,
            Self::FillFormula(_) => PatchOpKind::FillFormula,
            Self::SetValueIf(_) => PatchOpKind::SetValueIf,
            Self::SetFormulaIf(_) => PatchOpKind::SetFormulaIf,
            Self::DrawGridBorder(_) => PatchOpKind::DrawGridBorder,
            Self::SetBold(_) => PatchOpKind::SetBold,
            Self::SetFontSize(_) => PatchOpKind::SetFontSize,
            Self::SetFontColor(_) => PatchOpKind::SetFontColor,
            Self::SetFillColor(_) => PatchOpKind::SetFillColor,
            Self::SetDimensions(_) => PatchOpKind::SetDimensions,
            Self::AutoFitColumns(_) => PatchOpKind::AutoFitColumns,
            Self::MergeCells(_) => PatchOpKind::MergeCells,
            Self::UnmergeCells(_) => PatchOpKind::UnmergeCells,
            Self::SetAlignment(_) => PatchOpKind::SetAlignment,
            Self::SetStyle(_) => PatchOpKind::SetStyle,
            Self::ApplyTableStyle(_) => PatchOpKind::ApplyTableStyle,
            Self::CreateChart(_) => PatchOpKind::CreateChart,
            Self::RestoreDesignSnapshot(_) => PatchOpKind::RestoreDesignSnapshot,
        }
    }

    pub fn sheet(&self) -> &str {
        match self {
            Self::SetValue(op) => &op.sheet,
            Self::SetFormula(op) => &op.sheet,
            Self::AddSheet(op) => &op.sheet,
            Self::SetRangeValues(op) => &op.sheet,
            Self::FillFormula(op) => &op.sheet,
            Self::SetValueIf(op) => &op.sheet,
            Self::SetFormulaIf(op) => &op.sheet,
            Self::DrawGridBorder(op) => &op.sheet,
            Self::SetBold(op) => &op.sheet,
            Self::SetFontSize(op) => &op.sheet,
            Self::SetFontColor(op) => &op.sheet,
            Self::SetFillColor(op) => &op.sheet,
            Self::SetDimensions(op) => &op.sheet,
            Self::AutoFitColumns(op) => &op.sheet,
            Self::MergeCells(op) | Self::UnmergeCells(op) => &op.sheet,
            Self::SetAlignment(op) => &op.sheet,
            Self::SetStyle(op) => &op.sheet,
            Self::ApplyTableStyle(op) => &op.sheet,
            Self::CreateChart(op) => &op.sheet,
            Self::RestoreDesignSnapshot(op) => &op.sheet,
        }
    }

    /// Cell or range label used when reporting on this op.
    pub fn location(&self) -> Option<String> {
        match self {
            Self::SetValue(op) => Some(op.cell.clone()),
            Self::SetFormula(op) => Some(op.cell.clone()),
            Self::SetValueIf(op) => Some(op.cell.clone()),
            Self::SetFormulaIf(op) => Some(op.cell.clone()),
            Self::SetRangeValues(op) => Some(op.range.clone()),
            Self::FillFormula(op) => Some(op.range.clone()),
            Self::DrawGridBorder(op) => Some(op.base_cell.clone()),
            Self::SetBold(op) => Some(op.target.label().to_string()),
            Self::SetFontSize(op) => Some(op.target.label().to_string()),
            Self::SetFontColor(op) => Some(op.target.label().to_string()),
            Self::SetFillColor(op) => Some(op.target.label().to_string()),
            Self::SetAlignment(op) => Some(op.target.label().to_string()),
            Self::SetStyle(op) => Some(op.target.label().to_string()),
            Self::MergeCells(op) | Self::UnmergeCells(op) => Some(op.range.clone()),
            Self::ApplyTableStyle(op) => Some(op.range.clone()),
            Self::CreateChart(op) => Some(op.anchor_cell.clone()),
            Self::AddSheet(_)
            | Self::SetDimensions(_)
            | Self::AutoFitColumns(_)
            | Self::RestoreDesignSnapshot(_) => None,
        }
    }

    /// Rectangle touched by this op, when it has one.
    pub fn footprint(&self) -> Option<RangeBounds> {
        match self {
            Self::DrawGridBorder(op) => op.bounds().ok(),
            _ => self
                .location()
                .and_then(|label| RangeBounds::parse_cell_or_range(&label).ok()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BorderSideSnapshot {
    pub style: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BorderSnapshot {
    pub cell: String,
    #[serde(default)]
    pub top: BorderSideSnapshot,
    #[serde(default)]
    pub right: BorderSideSnapshot,
    #[serde(default)]
    pub bottom: BorderSideSnapshot,
    #[serde(default)]
    pub left: BorderSideSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FontSnapshot {
    pub cell: String,
    pub bold: Option<bool>,
    pub size: Option<f64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FillSnapshot {
    pub cell: String,
    pub fill_type: Option<String>,
    pub start_color: Option<String>,
    pub end_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AlignmentSnapshot {
    pub cell: String,
    pub horizontal: Option<String>,
    pub vertical: Option<String>,
    pub wrap_text: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergeStateSnapshot {
    pub scope: String,
    #[serde(default)]
    pub ranges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RowDimensionSnapshot {
    pub row: u32,
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnDimensionSnapshot {
    pub column: String,
    pub width: Option<f64>,
}

/// Prior style, dimension and merge state captured before a design op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DesignSnapshot {
    #[serde(default)]
    pub borders: Vec<BorderSnapshot>,
    #[serde(default)]
    pub fonts: Vec<FontSnapshot>,
    #[serde(default)]
    pub fills: Vec<FillSnapshot>,
    #[serde(default)]
    pub alignments: Vec<AlignmentSnapshot>,
    #[serde(default)]
    pub merge_state: Option<MergeStateSnapshot>,
    #[serde(default)]
    pub row_dimensions: Vec<RowDimensionSnapshot>,
    #[serde(default)]
    pub column_dimensions: Vec<ColumnDimensionSnapshot>,
}

impl DesignSnapshot {
    pub fn is_empty(&self) -> bool {
        self.borders.is_empty()
            && self.fonts.is_empty()
            && self.fills.is_empty()
            && self.alignments.is_empty()
            && self.merge_state.is_none()
            && self.row_dimensions.is_empty()
            && self.column_dimensions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchValueKind {
    Value,
    Formula,
    Sheet,
    Style,
    Dimension,
    Chart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchValue {
    pub kind: PatchValueKind,
    pub value: Option<ScalarValue>,
}

impl PatchValue {
    pub fn new(kind: PatchValueKind, value: Option<ScalarValue>) -> Self {
        Self { kind, value }
    }

    pub fn described(kind: PatchValueKind, text: impl Into<String>) -> Self {
        Self::new(kind, Some(ScalarValue::Text(text.into())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchDiffItem {
    pub op_index: usize,
    pub op: PatchOpKind,
    pub sheet: String,
    pub cell: Option<String>,
    pub before: Option<PatchValue>,
    pub after: Option<PatchValue>,
    pub status: PatchStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FormulaIssueLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FormulaIssueCode {
    InvalidToken,
    RefError,
    NameError,
    Div0Error,
    ValueError,
    NaError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormulaIssue {
    pub sheet: String,
    pub cell: String,
    pub level: FormulaIssueLevel,
    pub code: FormulaIssueCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PatchErrorDetail {
    pub op_index: i64,
    pub op: PatchOpKind,
    pub sheet: String,
    pub cell: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_com_message: Option<String>,
}

/// Tool input for `patch_workbook`. Operations are validated into [`PatchRequest`].
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PatchRequestInput {
    /// Workbook to patch (.xlsx, .xlsm or .xls).
    pub xlsx_path: PathBuf,
    /// Ordered operations, as objects or JSON-encoded object strings.
    pub ops: Vec<serde_json::Value>,
    /// Default sheet for ops that omit one (never used by add_sheet).
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    #[serde(default)]
    pub out_name: Option<String>,
    #[serde(default)]
    pub on_conflict: OnConflict,
    /// Allow string values starting with '=' to be written as formulas.
    #[serde(default)]
    pub auto_formula: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub return_inverse_ops: bool,
    #[serde(default)]
    pub preflight_formula_check: bool,
    #[serde(default)]
    pub backend: PatchBackend,
}

/// Tool input for `make_workbook`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MakeRequestInput {
    /// Path of the workbook to create.
    pub out_path: PathBuf,
    #[serde(default)]
    pub ops: Vec<serde_json::Value>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub on_conflict: OnConflict,
    #[serde(default)]
    pub auto_formula: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub return_inverse_ops: bool,
    #[serde(default)]
    pub preflight_formula_check: bool,
    #[serde(default)]
    pub backend: PatchBackend,
}

/// Flags shared by patch and make requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchOptions {
    pub on_conflict: OnConflict,
    pub auto_formula: bool,
    pub dry_run: bool,
    pub return_inverse_ops: bool,
    pub preflight_formula_check: bool,
    pub backend: PatchBackend,
}

impl PatchOptions {
    /// Dry-run, inverse ops and preflight all need the in-memory document.
    pub fn needs_extended_features(&self) -> bool {
        self.dry_run || self.return_inverse_ops || self.preflight_formula_check
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchRequest {
    pub xlsx_path: PathBuf,
    pub ops: Vec<PatchOp>,
    pub sheet: Option<String>,
    pub out_dir: Option<PathBuf>,
    pub out_name: Option<String>,
    pub options: PatchOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeRequest {
    pub out_path: PathBuf,
    pub ops: Vec<PatchOp>,
    pub sheet: Option<String>,
    pub options: PatchOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PatchResult {
    pub out_path: String,
    pub patch_diff: Vec<PatchDiffItem>,
    pub inverse_ops: Vec<PatchOp>,
    pub formula_issues: Vec<FormulaIssue>,
    pub warnings: Vec<String>,
    pub error: Option<PatchErrorDetail>,
    pub engine: PatchEngine,
}

impl PatchResult {
    pub fn empty(out_path: String, engine: PatchEngine, warnings: Vec<String>) -> Self {
        Self {
            out_path,
            patch_diff: Vec::new(),
            inverse_ops: Vec::new(),
            formula_issues: Vec::new(),
            warnings,
            error: None,
            engine,
        }
    }
}
