//! Field and operation validation.
//!
//! Ops arrive here already normalized (see [`crate::patch::normalize`]). Each
//! kind has one validator registered in [`VALIDATORS`]; the validator reads
//! the raw map through [`OpFields`] and builds the typed [`PatchOp`].

use crate::a1::{MAX_COLS, MAX_ROWS, RangeBounds, column_index_to_label, column_label_to_index, is_cell_reference};
use crate::patch::errors::OpValidationError;
use crate::patch::model::{
    AddSheetOp, ApplyTableStyleOp, AutoFitColumnsOp, CreateChartOp, DesignSnapshot,
    DrawGridBorderOp, FillFormulaOp, MakeRequest, MakeRequestInput, PatchOp, PatchOpKind,
    PatchOptions, PatchRequest, PatchRequestInput, RangeOp, RestoreDesignSnapshotOp, ScalarValue,
    SetAlignmentOp, SetBoldOp, SetDimensionsOp, SetFillColorOp, SetFontColorOp, SetFontSizeOp,
    SetFormulaIfOp, SetFormulaOp, SetRangeValuesOp, SetStyleOp, SetValueIfOp, SetValueOp, Target,
};
use crate::patch::normalize::{RawOp, build_patch_op_error_message, normalize_ops};
use crate::patch::schema::{normalize_chart_type, op_names, op_spec, supported_chart_types_csv};
use crate::styles::normalize_hex_input;
use crate::tools::param_enums::{HorizontalAlign, PatchBackend, VerticalAlign};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::str::FromStr;

/// Upper bound on cells a single style operation may touch.
pub const MAX_STYLE_TARGET_CELLS: u64 = 10_000;

static CHART_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<sheet>(?:'(?:[^']|'')+'|[^!]+)!)?(?P<start>[A-Za-z]{1,3}[1-9][0-9]*):(?P<end>[A-Za-z]{1,3}[1-9][0-9]*)$",
    )
    .expect("regex")
});

type FieldResult<T> = Result<T, OpValidationError>;
type OpValidator = fn(&OpFields<'_>) -> FieldResult<PatchOp>;

static VALIDATORS: &[(PatchOpKind, OpValidator)] = &[
    (PatchOpKind::AddSheet, validate_add_sheet),
    (PatchOpKind::SetValue, validate_set_value),
    (PatchOpKind::SetFormula, validate_set_formula),
    (PatchOpKind::SetRangeValues, validate_set_range_values),
    (PatchOpKind::FillFormula, validate_fill_formula),
    (PatchOpKind::SetValueIf, validate_set_value_if),
    (PatchOpKind::SetFormulaIf, validate_set_formula_if),
    (PatchOpKind::DrawGridBorder, validate_draw_grid_border),
    (PatchOpKind::SetBold, validate_set_bold),
    (PatchOpKind::SetFontSize, validate_set_font_size),
    (PatchOpKind::SetFontColor, validate_set_font_color),
    (PatchOpKind::SetFillColor, validate_set_fill_color),
    (PatchOpKind::SetDimensions, validate_set_dimensions),
    (PatchOpKind::AutoFitColumns, validate_auto_fit_columns),
    (PatchOpKind::MergeCells, validate_merge_cells),
    (PatchOpKind::UnmergeCells, validate_unmerge_cells),
    (PatchOpKind::SetAlignment, validate_set_alignment),
    (PatchOpKind::SetStyle, validate_set_style),
    (PatchOpKind::ApplyTableStyle, validate_apply_table_style),
    (PatchOpKind::CreateChart, validate_create_chart),
    (PatchOpKind::RestoreDesignSnapshot, validate_restore_design_snapshot),
];

/// Read-only view over one normalized op, with typed field accessors.
pub struct OpFields<'a> {
    index: usize,
    kind: PatchOpKind,
    raw: &'a RawOp,
}

impl<'a> OpFields<'a> {
    fn name(&self) -> &'static str {
        self.kind.into()
    }

    fn fail(&self, field: &str, message: impl Into<String>) -> OpValidationError {
        OpValidationError::at(self.index, message).with_field(field)
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.raw.get(field).filter(|v| !v.is_null())
    }

    fn require<T>(&self, field: &str, value: Option<T>) -> FieldResult<T> {
        value.ok_or_else(|| self.fail(field, format!("{} requires {field}.", self.name())))
    }

    fn string(&self, field: &str) -> FieldResult<Option<&'a str>> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.fail(field, format!("{} {field} must be a string.", self.name()))),
        }
    }

    fn sheet(&self) -> FieldResult<String> {
        let sheet = self.require("sheet", self.string("sheet")?)?;
        if sheet.trim().is_empty() {
            return Err(self.fail("sheet", "sheet must not be empty."));
        }
        Ok(sheet.to_string())
    }

    fn a1_cell(&self, field: &str, label: &str) -> FieldResult<Option<String>> {
        let Some(raw) = self.string(field)? else {
            return Ok(None);
        };
        let candidate = raw.trim();
        if !is_cell_reference(candidate) {
            return Err(self.fail(field, format!("Invalid {label} reference: {raw}")));
        }
        Ok(Some(candidate.to_ascii_uppercase()))
    }

    fn cell(&self) -> FieldResult<Option<String>> {
        self.a1_cell("cell", "cell")
    }

    fn range(&self) -> FieldResult<Option<String>> {
        let Some(raw) = self.string("range")? else {
            return Ok(None);
        };
        let candidate = raw.trim();
        let valid = candidate
            .split_once(':')
            .is_some_and(|(start, end)| is_cell_reference(start) && is_cell_reference(end));
        if !valid {
            return Err(self.fail("range", format!("Invalid range reference: {raw}")));
        }
        Ok(Some(candidate.to_ascii_uppercase()))
    }

    fn number(&self, field: &str) -> FieldResult<Option<f64>> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.fail(field, format!("{} {field} must be a number.", self.name()))),
        }
    }

    fn positive_dimension(&self, field: &str) -> FieldResult<Option<f64>> {
        let value = self.number(field)?;
        if value.is_some_and(|v| v <= 0.0) {
            return Err(self.fail(field, "min_width/max_width/width/height must be > 0."));
        }
        Ok(value)
    }

    fn count(&self, field: &str) -> FieldResult<Option<i64>> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => as_integer(value).map(Some).ok_or_else(|| {
                self.fail(field, format!("{} {field} must be an integer.", self.name()))
            }),
        }
    }

    fn boolean(&self, field: &str) -> FieldResult<Option<bool>> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.fail(field, format!("{} {field} must be a boolean.", self.name()))),
        }
    }

    /// Scalar field where JSON null is a legal value; the key itself must exist.
    fn nullable_scalar(&self, field: &str) -> FieldResult<Option<ScalarValue>> {
        if !self.raw.contains_key(field) {
            return Err(self.fail(field, format!("{} requires {field}.", self.name())));
        }
        match self.raw.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => scalar_from_json(value)
                .map(Some)
                .ok_or_else(|| self.fail(field, format!("{} {field} must be a scalar.", self.name()))),
        }
    }

    fn formula(&self) -> FieldResult<String> {
        let formula = self.require("formula", self.string("formula")?)?;
        if !formula.starts_with('=') {
            return Err(self.fail(
                "formula",
                format!("{} requires formula starting with '='.", self.name()),
            ));
        }
        Ok(formula.to_string())
    }

    fn color(&self, field: &str) -> FieldResult<Option<String>> {
        match self.string(field)? {
            None => Ok(None),
            Some(raw) => normalize_hex_input(raw, field)
                .map(Some)
                .map_err(|err| self.fail(field, err.to_string())),
        }
    }

    fn text(&self, field: &str) -> FieldResult<Option<String>> {
        match self.string(field)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Err(self.fail(
                field,
                "style/table_name/chart_name/chart_title/x_axis_title/y_axis_title must not be empty when provided.",
            )),
            Some(raw) => Ok(Some(raw.trim().to_string())),
        }
    }

    fn rows(&self) -> FieldResult<Option<Vec<u32>>> {
        let Some(value) = self.get("rows") else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.fail("rows", "rows must contain positive integers."))?;
        if items.is_empty() {
            return Err(self.fail("rows", "rows must not be empty."));
        }
        items
            .iter()
            .map(|item| {
                as_integer(item)
                    .filter(|n| *n >= 1)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| self.fail("rows", "rows must contain positive integers."))
                    .and_then(|row| {
                        if row > MAX_ROWS {
                            Err(self.fail("rows", format!("Row {row} is beyond the last sheet row ({MAX_ROWS}).")))
                        } else {
                            Ok(row)
                        }
                    })
            })
            .collect::<FieldResult<Vec<_>>>()
            .map(Some)
    }

    /// Column identifiers as labels, deduplicated in first-seen order.
    fn columns(&self) -> FieldResult<Option<Vec<String>>> {
        let Some(value) = self.get("columns") else {
            return Ok(None);
        };
        let items = match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        if items.is_empty() {
            return Err(self.fail("columns", "columns must not be empty."));
        }
        let mut labels: Vec<String> = Vec::with_capacity(items.len());
        for item in &items {
            let label = self.column_identifier(item)?;
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        Ok(Some(labels))
    }

    fn column_identifier(&self, item: &Value) -> FieldResult<String> {
        if let Some(n) = as_integer(item) {
            if n < 1 {
                return Err(self.fail("columns", "columns numeric values must be positive."));
            }
            let index = u32::try_from(n)
                .ok()
                .filter(|index| *index <= MAX_COLS)
                .ok_or_else(|| self.fail("columns", format!("Invalid column identifier: {n}")))?;
            return column_index_to_label(index)
                .map_err(|_| self.fail("columns", format!("Invalid column identifier: {n}")));
        }
        let Some(raw) = item.as_str() else {
            return Err(self.fail("columns", format!("Invalid column identifier: {item}")));
        };
        let label = raw.trim().to_ascii_uppercase();
        let valid = (1..=3).contains(&label.len())
            && label.bytes().all(|b| b.is_ascii_uppercase())
            && column_label_to_index(&label).is_ok_and(|index| index <= MAX_COLS);
        if !valid {
            return Err(self.fail("columns", format!("Invalid column identifier: {raw}")));
        }
        Ok(label)
    }

    /// Exactly one of `cell`/`range`, size-capped for style ops.
    fn style_target(&self) -> FieldResult<Target> {
        let target = match (self.cell()?, self.range()?) {
            (Some(cell), None) => Target::Cell(cell),
            (None, Some(range)) => Target::Range(range),
            _ => {
                return Err(self.fail(
                    "cell",
                    format!("{} requires exactly one of cell or range.", self.name()),
                ));
            }
        };
        let count = target
            .bounds()
            .map(|bounds| bounds.cell_count())
            .map_err(|err| self.fail("range", err.to_string()))?;
        if count > MAX_STYLE_TARGET_CELLS {
            return Err(self.fail(
                "range",
                format!("{} target exceeds max cells: {MAX_STYLE_TARGET_CELLS}.", self.name()),
            ));
        }
        Ok(target)
    }

    fn horizontal_align(&self) -> FieldResult<Option<HorizontalAlign>> {
        match self.string("horizontal_align")? {
            None => Ok(None),
            Some(raw) => HorizontalAlign::parse(raw).map(Some).ok_or_else(|| {
                self.fail(
                    "horizontal_align",
                    format!(
                        "horizontal_align must be one of: {}.",
                        HorizontalAlign::VARIANTS.join(", ")
                    ),
                )
            }),
        }
    }

    fn vertical_align(&self) -> FieldResult<Option<VerticalAlign>> {
        match self.string("vertical_align")? {
            None => Ok(None),
            Some(raw) => VerticalAlign::parse(raw).map(Some).ok_or_else(|| {
                self.fail(
                    "vertical_align",
                    format!(
                        "vertical_align must be one of: {}.",
                        VerticalAlign::VARIANTS.join(", ")
                    ),
                )
            }),
        }
    }

    fn chart_range(&self, field: &str, raw: &str) -> FieldResult<String> {
        normalize_chart_range(raw).ok_or_else(|| {
            self.fail(field, format!("Invalid chart range reference: {raw}"))
        })
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn scalar_from_json(value: &Value) -> Option<ScalarValue> {
    match value {
        Value::Bool(b) => Some(ScalarValue::Bool(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(ScalarValue::Int)
            .or_else(|| n.as_f64().map(ScalarValue::Float)),
        Value::String(s) => Some(ScalarValue::Text(s.clone())),
        _ => None,
    }
}

/// Uppercase the endpoints of an optionally sheet-qualified `A1:B2` range.
pub fn normalize_chart_range(value: &str) -> Option<String> {
    let caps = CHART_RANGE_RE.captures(value.trim())?;
    let sheet = caps.name("sheet").map(|m| m.as_str()).unwrap_or("");
    Some(format!(
        "{sheet}{}:{}",
        caps["start"].to_ascii_uppercase(),
        caps["end"].to_ascii_uppercase()
    ))
}

/// Split a chart range into its unquoted sheet name (if any) and local `A1:B2` part.
pub fn split_chart_range(value: &str) -> Option<(Option<String>, String)> {
    let caps = CHART_RANGE_RE.captures(value.trim())?;
    let local = format!(
        "{}:{}",
        caps["start"].to_ascii_uppercase(),
        caps["end"].to_ascii_uppercase()
    );
    let sheet = caps.name("sheet").map(|m| {
        let token = m.as_str().trim_end_matches('!');
        match token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
            Some(quoted) => quoted.replace("''", "'"),
            None => token.to_string(),
        }
    });
    Some((sheet, local))
}

fn validate_add_sheet(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::AddSheet(AddSheetOp { sheet: f.sheet()? }))
}

fn validate_set_value(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetValue(SetValueOp {
        sheet: f.sheet()?,
        cell: f.require("cell", f.cell()?)?,
        value: f.nullable_scalar("value")?,
    }))
}

fn validate_set_formula(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetFormula(SetFormulaOp {
        sheet: f.sheet()?,
        cell: f.require("cell", f.cell()?)?,
        formula: f.formula()?,
    }))
}

fn validate_set_range_values(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let range = f.require("range", f.range()?)?;
    let raw_values = f.require("values", f.get("values"))?;
    let rows = raw_values
        .as_array()
        .ok_or_else(|| f.fail("values", "set_range_values requires rectangular values."))?;
    if rows.is_empty() {
        return Err(f.fail("values", "set_range_values requires non-empty values."));
    }
    let mut values = Vec::with_capacity(rows.len());
    let mut width = None;
    for row in rows {
        let cells = row
            .as_array()
            .ok_or_else(|| f.fail("values", "set_range_values requires rectangular values."))?;
        if cells.is_empty() {
            return Err(f.fail("values", "set_range_values values rows must not be empty."));
        }
        if *width.get_or_insert(cells.len()) != cells.len() {
            return Err(f.fail("values", "set_range_values requires rectangular values."));
        }
        let parsed = cells
            .iter()
            .map(|cell| match cell {
                Value::Null => Ok(None),
                other => scalar_from_json(other)
                    .map(Some)
                    .ok_or_else(|| f.fail("values", "set_range_values values must be scalars.")),
            })
            .collect::<FieldResult<Vec<_>>>()?;
        values.push(parsed);
    }
    Ok(PatchOp::SetRangeValues(SetRangeValuesOp { sheet, range, values }))
}

fn validate_fill_formula(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::FillFormula(FillFormulaOp {
        sheet: f.sheet()?,
        range: f.require("range", f.range()?)?,
        base_cell: f.require("base_cell", f.a1_cell("base_cell", "base_cell")?)?,
        formula: f.formula()?,
    }))
}

fn validate_set_value_if(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetValueIf(SetValueIfOp {
        sheet: f.sheet()?,
        cell: f.require("cell", f.cell()?)?,
        expected: f.nullable_scalar("expected")?,
        value: f.nullable_scalar("value")?,
    }))
}

fn validate_set_formula_if(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetFormulaIf(SetFormulaIfOp {
        sheet: f.sheet()?,
        cell: f.require("cell", f.cell()?)?,
        expected: f.nullable_scalar("expected")?,
        formula: f.formula()?,
    }))
}

fn validate_draw_grid_border(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let base_cell = f.require("base_cell", f.a1_cell("base_cell", "base_cell")?)?;
    let (Some(rows), Some(cols)) = (f.count("row_count")?, f.count("col_count")?) else {
        return Err(f.fail(
            "row_count",
            "draw_grid_border requires row_count and col_count.",
        ));
    };
    if rows < 1 || cols < 1 {
        return Err(f.fail(
            "row_count",
            "draw_grid_border requires row_count >= 1 and col_count >= 1.",
        ));
    }
    let too_large = || {
        f.fail(
            "row_count",
            format!("draw_grid_border target exceeds max cells: {MAX_STYLE_TARGET_CELLS}."),
        )
    };
    if (rows as u64).saturating_mul(cols as u64) > MAX_STYLE_TARGET_CELLS {
        return Err(too_large());
    }
    let row_count = u32::try_from(rows).map_err(|_| too_large())?;
    let col_count = u32::try_from(cols).map_err(|_| too_large())?;
    let op = DrawGridBorderOp {
        sheet,
        base_cell,
        row_count,
        col_count,
    };
    op.bounds().map_err(|err| f.fail("base_cell", err.to_string()))?;
    Ok(PatchOp::DrawGridBorder(op))
}

fn validate_set_bold(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetBold(SetBoldOp {
        sheet: f.sheet()?,
        target: f.style_target()?,
        bold: f.boolean("bold")?.unwrap_or(true),
    }))
}

fn validate_set_font_size(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let target = f.style_target()?;
    let font_size = f.require("font_size", f.number("font_size")?)?;
    if font_size <= 0.0 {
        return Err(f.fail("font_size", "set_font_size font_size must be > 0."));
    }
    Ok(PatchOp::SetFontSize(SetFontSizeOp {
        sheet,
        target,
        font_size,
    }))
}

fn validate_set_font_color(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetFontColor(SetFontColorOp {
        sheet: f.sheet()?,
        target: f.style_target()?,
        color: f.require("color", f.color("color")?)?,
    }))
}

fn validate_set_fill_color(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::SetFillColor(SetFillColorOp {
        sheet: f.sheet()?,
        target: f.style_target()?,
        fill_color: f.require("fill_color", f.color("fill_color")?)?,
    }))
}

fn validate_set_dimensions(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let rows = f.rows()?;
    let columns = f.columns()?;
    let row_height = f.number("row_height")?;
    let column_width = f.number("column_width")?;
    if rows.is_none() && columns.is_none() {
        return Err(f.fail("rows", "set_dimensions requires rows and/or columns."));
    }
    if rows.is_some() && row_height.is_none() {
        return Err(f.fail(
            "row_height",
            "set_dimensions requires row_height when rows is provided.",
        ));
    }
    if columns.is_some() && column_width.is_none() {
        return Err(f.fail(
            "column_width",
            "set_dimensions requires column_width when columns is provided.",
        ));
    }
    if row_height.is_some_and(|h| h <= 0.0) {
        return Err(f.fail("row_height", "set_dimensions row_height must be > 0."));
    }
    if column_width.is_some_and(|w| w <= 0.0) {
        return Err(f.fail("column_width", "set_dimensions column_width must be > 0."));
    }
    Ok(PatchOp::SetDimensions(SetDimensionsOp {
        sheet,
        rows,
        row_height,
        columns,
        column_width,
    }))
}

fn validate_auto_fit_columns(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let columns = f.columns()?;
    let min_width = f.positive_dimension("min_width")?;
    let max_width = f.positive_dimension("max_width")?;
    if matches!((min_width, max_width), (Some(min), Some(max)) if min > max) {
        return Err(f.fail("min_width", "auto_fit_columns requires min_width <= max_width."));
    }
    Ok(PatchOp::AutoFitColumns(AutoFitColumnsOp {
        sheet,
        columns,
        min_width,
        max_width,
    }))
}

fn validate_merge_cells(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let range = f.require("range", f.range()?)?;
    let bounds = RangeBounds::parse(&range).map_err(|err| f.fail("range", err.to_string()))?;
    if bounds.cell_count() < 2 {
        return Err(f.fail("range", "merge_cells requires a multi-cell range."));
    }
    Ok(PatchOp::MergeCells(RangeOp { sheet, range }))
}

fn validate_unmerge_cells(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::UnmergeCells(RangeOp {
        sheet: f.sheet()?,
        range: f.require("range", f.range()?)?,
    }))
}

fn validate_set_alignment(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let horizontal_align = f.horizontal_align()?;
    let vertical_align = f.vertical_align()?;
    let wrap_text = f.boolean("wrap_text")?;
    if horizontal_align.is_none() && vertical_align.is_none() && wrap_text.is_none() {
        return Err(f.fail(
            "horizontal_align",
            "set_alignment requires at least one of horizontal_align, vertical_align, or wrap_text.",
        ));
    }
    Ok(PatchOp::SetAlignment(SetAlignmentOp {
        sheet,
        target: f.style_target()?,
        horizontal_align,
        vertical_align,
        wrap_text,
    }))
}

fn validate_set_style(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let op = SetStyleOp {
        sheet,
        target: f.style_target()?,
        bold: f.boolean("bold")?,
        font_size: f.number("font_size")?,
        color: f.color("color")?,
        fill_color: f.color("fill_color")?,
        horizontal_align: f.horizontal_align()?,
        vertical_align: f.vertical_align()?,
        wrap_text: f.boolean("wrap_text")?,
    };
    let has_any = op.bold.is_some()
        || op.font_size.is_some()
        || op.color.is_some()
        || op.fill_color.is_some()
        || op.horizontal_align.is_some()
        || op.vertical_align.is_some()
        || op.wrap_text.is_some();
    if !has_any {
        return Err(f.fail(
            "bold",
            "set_style requires at least one style field from: bold, font_size, color, fill_color, horizontal_align, vertical_align, wrap_text.",
        ));
    }
    if op.font_size.is_some_and(|size| size <= 0.0) {
        return Err(f.fail("font_size", "set_style font_size must be > 0."));
    }
    Ok(PatchOp::SetStyle(op))
}

fn validate_apply_table_style(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    Ok(PatchOp::ApplyTableStyle(ApplyTableStyleOp {
        sheet: f.sheet()?,
        range: f.require("range", f.range()?)?,
        style: f.require("style", f.text("style")?)?,
        table_name: f.text("table_name")?,
    }))
}

fn validate_create_chart(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let raw_type = f.require("chart_type", f.string("chart_type")?)?;
    let chart_type = normalize_chart_type(raw_type).ok_or_else(|| {
        f.fail(
            "chart_type",
            format!("chart_type must be one of: {}.", supported_chart_types_csv()),
        )
    })?;
    let data_range = match f.require("data_range", f.get("data_range"))? {
        Value::String(raw) => vec![f.chart_range("data_range", raw)?],
        Value::Array(items) => {
            if items.is_empty() {
                return Err(f.fail("data_range", "data_range list must not be empty."));
            }
            items
                .iter()
                .map(|item| match item.as_str() {
                    Some(raw) => f.chart_range("data_range", raw),
                    None => Err(f.fail(
                        "data_range",
                        format!("Invalid chart range reference: {item}"),
                    )),
                })
                .collect::<FieldResult<Vec<_>>>()?
        }
        other => {
            return Err(f.fail(
                "data_range",
                format!("Invalid chart range reference: {other}"),
            ));
        }
    };
    let category_range = f
        .string("category_range")?
        .map(|raw| f.chart_range("category_range", raw))
        .transpose()?;
    Ok(PatchOp::CreateChart(CreateChartOp {
        sheet,
        chart_type: chart_type.to_string(),
        data_range,
        category_range,
        anchor_cell: f.require("anchor_cell", f.a1_cell("anchor_cell", "anchor_cell")?)?,
        chart_name: f.text("chart_name")?,
        width: f.positive_dimension("width")?,
        height: f.positive_dimension("height")?,
        titles_from_data: f.boolean("titles_from_data")?.unwrap_or(true),
        series_from_rows: f.boolean("series_from_rows")?.unwrap_or(false),
        chart_title: f.text("chart_title")?,
        x_axis_title: f.text("x_axis_title")?,
        y_axis_title: f.text("y_axis_title")?,
    }))
}

fn validate_restore_design_snapshot(f: &OpFields<'_>) -> FieldResult<PatchOp> {
    let sheet = f.sheet()?;
    let raw = f.require("design_snapshot", f.get("design_snapshot"))?;
    let design_snapshot: DesignSnapshot = serde_json::from_value(raw.clone()).map_err(|err| {
        f.fail(
            "design_snapshot",
            format!("restore_design_snapshot design_snapshot is invalid: {err}"),
        )
    })?;
    Ok(PatchOp::RestoreDesignSnapshot(RestoreDesignSnapshotOp {
        sheet,
        design_snapshot,
    }))
}

/// Validate one normalized op into its typed form.
pub fn validate_op(index: usize, raw: &RawOp) -> Result<PatchOp, OpValidationError> {
    let name = match raw.get("op") {
        Some(Value::String(name)) => name.trim(),
        _ => {
            return Err(OpValidationError::at(
                index,
                build_patch_op_error_message(index, "missing op"),
            )
            .with_field("op"));
        }
    };
    let kind = PatchOpKind::from_str(name).map_err(|_| {
        OpValidationError::at(
            index,
            format!(
                "Unknown op '{name}' at ops[{index}]. Supported ops: {}.",
                op_names().join(", ")
            ),
        )
        .with_field("op")
    })?;

    let spec = op_spec(kind);
    if let Some(field) = raw
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, _)| key)
        .find(|key| !spec.accepts(key))
    {
        return Err(
            OpValidationError::at(index, format!("{kind} does not accept {field}.")).with_field(field),
        );
    }

    let validator = VALIDATORS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, validator)| *validator)
        .ok_or_else(|| OpValidationError::at(index, format!("No validator registered for {kind}.")))?;
    validator(&OpFields { index, kind, raw })
}

pub fn validate_ops(ops: &[RawOp]) -> Result<Vec<PatchOp>, OpValidationError> {
    ops.iter()
        .enumerate()
        .map(|(index, raw)| validate_op(index, raw))
        .collect()
}

/// Normalize and validate a raw op list in one step.
pub fn parse_ops(ops: Vec<Value>, top_level_sheet: Option<&str>) -> Result<Vec<PatchOp>, OpValidationError> {
    validate_ops(&normalize_ops(ops, top_level_sheet)?)
}

/// Request-wide rules that combine op kinds with backend and feature flags.
pub fn validate_request_constraints(
    ops: &[PatchOp],
    options: &PatchOptions,
) -> Result<(), OpValidationError> {
    let has_chart = ops.iter().any(|op| op.kind() == PatchOpKind::CreateChart);
    if has_chart && options.backend == PatchBackend::InProcess {
        return Err(OpValidationError::new(
            "create_chart is supported only on host backend; backend='in_process' is not allowed.",
        )
        .with_field("backend"));
    }
    if options.backend == PatchBackend::Host {
        if options.needs_extended_features() {
            return Err(OpValidationError::new(
                "backend='host' does not support dry_run, return_inverse_ops, or preflight_formula_check.",
            )
            .with_field("backend"));
        }
        if ops
            .iter()
            .any(|op| op.kind() == PatchOpKind::RestoreDesignSnapshot)
        {
            return Err(OpValidationError::new(
                "backend='host' does not support restore_design_snapshot operation.",
            )
            .with_field("backend"));
        }
    }
    if has_chart && options.needs_extended_features() {
        return Err(OpValidationError::new(
            "create_chart does not support dry_run, return_inverse_ops, or preflight_formula_check.",
        ));
    }
    Ok(())
}

impl PatchRequest {
    pub fn from_input(input: PatchRequestInput) -> Result<Self, OpValidationError> {
        let options = PatchOptions {
            on_conflict: input.on_conflict,
            auto_formula: input.auto_formula,
            dry_run: input.dry_run,
            return_inverse_ops: input.return_inverse_ops,
            preflight_formula_check: input.preflight_formula_check,
            backend: input.backend,
        };
        let ops = parse_ops(input.ops, input.sheet.as_deref())?;
        validate_request_constraints(&ops, &options)?;
        Ok(Self {
            xlsx_path: input.xlsx_path,
            ops,
            sheet: input.sheet,
            out_dir: input.out_dir,
            out_name: input.out_name,
            options,
        })
    }
}

impl MakeRequest {
    pub fn from_input(input: MakeRequestInput) -> Result<Self, OpValidationError> {
        let options = PatchOptions {
            on_conflict: input.on_conflict,
            auto_formula: input.auto_formula,
            dry_run: input.dry_run,
            return_inverse_ops: input.return_inverse_ops,
            preflight_formula_check: input.preflight_formula_check,
            backend: input.backend,
        };
        let ops = parse_ops(input.ops, input.sheet.as_deref())?;
        validate_request_constraints(&ops, &options)?;
        Ok(Self {
            out_path: input.out_path,
            ops,
            sheet: input.sheet,
            options,
        })
    }
}
