//! Backend that edits the workbook's object model directly.

use super::{
    BackendOutcome, CellWrite, DEFAULT_COLUMN_WIDTH, PatchApplier, PatchJob, alignment_summary,
    applied_item, auto_fit_summary, clamp_width, dimension_item, dimensions_summary,
    inverse_cell_op, merge_value_loss_warning, next_table_name, planned_cell_write, restore_snapshot_op,
    set_style_summary, skipped_item, style_item, table_summary,
};
use crate::a1::{CellAddress, RangeBounds, column_index_to_label, column_label_to_index};
use crate::formula::{has_errors, scan_formula, translate_formula};
use crate::patch::errors::PatchOpError;
use crate::patch::model::{
    ApplyTableStyleOp, AutoFitColumnsOp, ColumnDimensionSnapshot, DesignSnapshot,
    DrawGridBorderOp, FillFormulaOp, FormulaIssue, MergeStateSnapshot, PatchDiffItem, PatchOp,
    PatchOptions, PatchValue, PatchValueKind, RangeOp, RowDimensionSnapshot, ScalarValue,
    SetAlignmentOp, SetDimensionsOp, SetRangeValuesOp, SetStyleOp, Target,
};
use crate::styles::{
    alignment_snapshot, apply_solid_fill, apply_thin_border, border_snapshot, fill_snapshot,
    font_snapshot, hex_to_argb, horizontal_to_umya, restore_alignment, restore_borders,
    restore_fill, restore_font, vertical_to_umya,
};
use crate::tools::param_enums::PatchEngine;
use anyhow::{Context, Result, anyhow, bail, ensure};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use umya_spreadsheet::structs::{Table, TableColumn, TableStyleInfo};
use umya_spreadsheet::{Cell, Spreadsheet, Style, Worksheet};

#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessBackend;

impl PatchApplier for InProcessBackend {
    fn engine(&self) -> PatchEngine {
        PatchEngine::InProcess
    }

    fn apply(&self, job: &PatchJob<'_>) -> Result<BackendOutcome> {
        if has_xls_extension(job.input) {
            bail!("backend='in_process' cannot edit .xls files.");
        }
        let mut book = umya_spreadsheet::reader::xlsx::read(job.input)
            .with_context(|| format!("failed to open workbook {}", job.input.display()))?;
        let mut outcome = apply_ops_to_book(&mut book, job.ops, &job.options)?;
        if job.options.preflight_formula_check {
            outcome.formula_issues = collect_formula_issues(&book);
        }
        let blocked = job.options.preflight_formula_check && has_errors(&outcome.formula_issues);
        if !job.options.dry_run && !blocked {
            umya_spreadsheet::writer::xlsx::write(&book, job.output)
                .with_context(|| format!("failed to write workbook {}", job.output.display()))?;
        }
        Ok(outcome)
    }
}

fn has_xls_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xls"))
}

/// Write an empty workbook whose only sheet is `initial_sheet`.
pub fn create_seed_workbook(path: &Path, initial_sheet: &str) -> Result<()> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();
    book.new_sheet(initial_sheet)
        .map_err(|e| anyhow!("failed to create sheet '{initial_sheet}': {e}"))?;
    umya_spreadsheet::writer::xlsx::write(&book, path)
        .with_context(|| format!("failed to write workbook {}", path.display()))?;
    Ok(())
}

/// Apply every op in order; the first failure aborts the batch.
pub fn apply_ops_to_book(
    book: &mut Spreadsheet,
    ops: &[PatchOp],
    options: &PatchOptions,
) -> Result<BackendOutcome> {
    let mut outcome = BackendOutcome::default();
    for (index, op) in ops.iter().enumerate() {
        let (item, inverse) = apply_op(book, op, index, options, &mut outcome.warnings)
            .map_err(|err| anyhow::Error::new(PatchOpError::from_error(index, op, &err)))?;
        tracing::debug!(index, op = %op.kind(), sheet = op.sheet(), status = ?item.status, "applied op");
        if options.return_inverse_ops && item.status == crate::patch::model::PatchStatus::Applied {
            outcome.inverse_ops.extend(inverse);
        }
        outcome.diff.push(item);
    }
    outcome.inverse_ops.reverse();
    Ok(outcome)
}

type Applied = (PatchDiffItem, Option<PatchOp>);

fn apply_op(
    book: &mut Spreadsheet,
    op: &PatchOp,
    index: usize,
    options: &PatchOptions,
    warnings: &mut Vec<String>,
) -> Result<Applied> {
    if let PatchOp::AddSheet(add) = op {
        if book.get_sheet_by_name(&add.sheet).is_some() {
            bail!("Sheet already exists: {}", add.sheet);
        }
        book.new_sheet(add.sheet.as_str())
            .map_err(|e| anyhow!("failed to create sheet '{}': {e}", add.sheet))?;
        let after = PatchValue::described(PatchValueKind::Sheet, add.sheet.clone());
        return Ok((applied_item(index, op, None, None, Some(after)), None));
    }
    if let PatchOp::ApplyTableStyle(table) = op {
        let taken = table_names(book);
        let sheet = sheet_mut(book, op.sheet())?;
        return apply_table_style(sheet, op, table, index, &taken);
    }
    let sheet = sheet_mut(book, op.sheet())?;
    match op {
        PatchOp::SetValue(_) | PatchOp::SetFormula(_) | PatchOp::SetValueIf(_) | PatchOp::SetFormulaIf(_) => {
            apply_cell_op(sheet, op, index, options.auto_formula)
        }
        PatchOp::SetRangeValues(values) => set_range_values(sheet, op, values, index),
        PatchOp::FillFormula(fill) => fill_formula(sheet, op, fill, index),
        PatchOp::DrawGridBorder(border) => draw_grid_border(sheet, op, border, index),
        PatchOp::SetBold(set) => {
            let bold = set.bold;
            restyle_fonts(sheet, op, &set.target, index, format!("bold={bold}"), |style| {
                style.get_font_mut().set_bold(bold);
            })
        }
        PatchOp::SetFontSize(set) => {
            let size = set.font_size;
            restyle_fonts(sheet, op, &set.target, index, format!("font_size={size}"), |style| {
                style.get_font_mut().set_size(size);
            })
        }
        PatchOp::SetFontColor(set) => {
            let argb = hex_to_argb(&set.color);
            restyle_fonts(sheet, op, &set.target, index, format!("font_color={}", set.color), |style| {
                style.get_font_mut().get_color_mut().set_argb(argb.as_str());
            })
        }
        PatchOp::SetFillColor(set) => {
            let cells = target_cells(&set.target)?;
            let snapshot = DesignSnapshot {
                fills: cells.iter().map(|c| fill_snapshot(c, &style_of(sheet, c))).collect(),
                ..DesignSnapshot::default()
            };
            let argb = hex_to_argb(&set.fill_color);
            for cell in &cells {
                apply_solid_fill(sheet.get_cell_mut(cell.as_str()).get_style_mut(), &argb);
            }
            Ok((
                style_item(index, op, Some(set.target.label().to_string()), format!("fill={}", set.fill_color)),
                restore_snapshot_op(op.sheet(), snapshot),
            ))
        }
        PatchOp::SetDimensions(dims) => set_dimensions(sheet, op, dims, index),
        PatchOp::AutoFitColumns(fit) => auto_fit_columns(sheet, op, fit, index),
        PatchOp::MergeCells(merge) => merge_cells(sheet, op, merge, index, warnings),
        PatchOp::UnmergeCells(unmerge) => unmerge_cells(sheet, op, unmerge, index),
        PatchOp::SetAlignment(align) => set_alignment(sheet, op, align, index),
        PatchOp::SetStyle(set) => set_style(sheet, op, set, index),
        PatchOp::RestoreDesignSnapshot(restore) => {
            restore_design_snapshot(sheet, &restore.design_snapshot)?;
            Ok((style_item(index, op, None, "design_snapshot_restored"), None))
        }
        PatchOp::CreateChart(chart) => {
            bail!("create_chart is supported only on host backend (sheet={}).", chart.sheet)
        }
        PatchOp::AddSheet(_) | PatchOp::ApplyTableStyle(_) => {
            bail!("{} must be applied at workbook level.", op.kind())
        }
    }
}

fn sheet_mut<'a>(book: &'a mut Spreadsheet, name: &str) -> Result<&'a mut Worksheet> {
    book.get_sheet_by_name_mut(name)
        .ok_or_else(|| anyhow!("Sheet not found: {name}"))
}

fn target_cells(target: &Target) -> Result<Vec<String>> {
    Ok(target.bounds()?.cells().map(|c| c.label()).collect())
}

fn style_of(sheet: &Worksheet, cell: &str) -> Style {
    sheet
        .get_cell(cell)
        .map(|c| c.get_style().clone())
        .unwrap_or_default()
}

fn normalize_formula(text: &str) -> String {
    if text.starts_with('=') {
        text.to_string()
    } else {
        format!("={text}")
    }
}

fn scalar_from_cell(cell: &Cell) -> Option<ScalarValue> {
    let raw = cell.get_value();
    if raw.is_empty() {
        return None;
    }
    let value = match cell.get_data_type() {
        "b" => ScalarValue::Bool(raw.eq_ignore_ascii_case("true") || raw == "1"),
        "n" => raw
            .parse::<i64>()
            .map(ScalarValue::Int)
            .or_else(|_| raw.parse::<f64>().map(ScalarValue::Float))
            .unwrap_or_else(|_| ScalarValue::text(raw.to_string())),
        _ => ScalarValue::text(raw.to_string()),
    };
    Some(value)
}

/// Current content of a cell: its formula when it has one, else its literal.
pub fn read_cell(sheet: &Worksheet, cell: &str) -> Option<PatchValue> {
    let cell = sheet.get_cell(cell)?;
    if cell.is_formula() {
        return Some(PatchValue::described(
            PatchValueKind::Formula,
            normalize_formula(cell.get_formula()),
        ));
    }
    scalar_from_cell(cell).map(|value| PatchValue::new(PatchValueKind::Value, Some(value)))
}

fn write_cell(sheet: &mut Worksheet, cell: &str, write: &CellWrite) {
    let target = sheet.get_cell_mut(cell);
    target.get_cell_value_mut().remove_formula();
    match write {
        CellWrite::Formula(formula) => {
            target.set_formula(formula.strip_prefix('=').unwrap_or(formula).to_string());
        }
        CellWrite::Value(None) => {
            target.set_value_string(String::new());
        }
        CellWrite::Value(Some(ScalarValue::Bool(b))) => {
            target.set_value_bool(*b);
        }
        CellWrite::Value(Some(ScalarValue::Int(i))) => {
            target.set_value_number(*i as f64);
        }
        CellWrite::Value(Some(ScalarValue::Float(f))) => {
            target.set_value_number(*f);
        }
        CellWrite::Value(Some(ScalarValue::Text(text))) => {
            target.set_value_string(text.clone());
        }
    }
}

fn apply_cell_op(sheet: &mut Worksheet, op: &PatchOp, index: usize, auto_formula: bool) -> Result<Applied> {
    let cell = op
        .location()
        .ok_or_else(|| anyhow!("{} requires cell.", op.kind()))?;
    let before = read_cell(sheet, &cell);
    let Some(write) = planned_cell_write(op, before.as_ref(), auto_formula)? else {
        return Ok((skipped_item(index, op, cell, before), None));
    };
    write_cell(sheet, &cell, &write);
    let inverse = inverse_cell_op(op.sheet(), &cell, before.as_ref());
    Ok((
        applied_item(index, op, Some(cell), before, write.as_patch_value()),
        Some(inverse),
    ))
}

fn set_range_values(sheet: &mut Worksheet, op: &PatchOp, set: &SetRangeValuesOp, index: usize) -> Result<Applied> {
    let bounds = RangeBounds::parse(&set.range)?;
    ensure!(
        set.values.len() == bounds.rows() as usize,
        "set_range_values values height does not match range."
    );
    ensure!(
        set.values.iter().all(|row| row.len() == bounds.cols() as usize),
        "set_range_values values width does not match range."
    );
    for (r, row) in set.values.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            let cell = CellAddress::new(bounds.min_col + c as u32, bounds.min_row + r as u32);
            write_cell(sheet, &cell.label(), &CellWrite::Value(value.clone()));
        }
    }
    let after = PatchValue::described(PatchValueKind::Value, format!("{}x{}", bounds.rows(), bounds.cols()));
    Ok((applied_item(index, op, Some(set.range.clone()), None, Some(after)), None))
}

fn fill_formula(sheet: &mut Worksheet, op: &PatchOp, fill: &FillFormulaOp, index: usize) -> Result<Applied> {
    let bounds = RangeBounds::parse(&fill.range)?;
    ensure!(
        bounds.rows() == 1 || bounds.cols() == 1,
        "fill_formula range must be a single row or a single column."
    );
    let origin = CellAddress::parse(&fill.base_cell)?;
    for cell in bounds.cells() {
        let formula = translate_formula(&fill.formula, origin, cell)?;
        write_cell(sheet, &cell.label(), &CellWrite::Formula(formula));
    }
    let after = PatchValue::described(PatchValueKind::Formula, fill.formula.clone());
    Ok((applied_item(index, op, Some(fill.range.clone()), None, Some(after)), None))
}

fn draw_grid_border(sheet: &mut Worksheet, op: &PatchOp, border: &DrawGridBorderOp, index: usize) -> Result<Applied> {
    let bounds = border.bounds()?;
    let cells: Vec<String> = bounds.cells().map(|c| c.label()).collect();
    let snapshot = DesignSnapshot {
        borders: cells.iter().map(|c| border_snapshot(c, &style_of(sheet, c))).collect(),
        ..DesignSnapshot::default()
    };
    for cell in &cells {
        apply_thin_border(sheet.get_cell_mut(cell.as_str()).get_style_mut());
    }
    let label = format!("{}:{}", border.base_cell, bounds.bottom_right());
    Ok((
        style_item(index, op, Some(label), "grid_border(thin,black)"),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn restyle_fonts(
    sheet: &mut Worksheet,
    op: &PatchOp,
    target: &Target,
    index: usize,
    summary: String,
    mut apply: impl FnMut(&mut Style),
) -> Result<Applied> {
    let cells = target_cells(target)?;
    let snapshot = DesignSnapshot {
        fonts: cells.iter().map(|c| font_snapshot(c, &style_of(sheet, c))).collect(),
        ..DesignSnapshot::default()
    };
    for cell in &cells {
        apply(sheet.get_cell_mut(cell.as_str()).get_style_mut());
    }
    Ok((
        style_item(index, op, Some(target.label().to_string()), summary),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn row_height(sheet: &Worksheet, row: u32) -> Option<f64> {
    sheet
        .get_row_dimension(&row)
        .map(|dim| *dim.get_height())
        .filter(|height| *height > 0.0)
}

fn column_width(sheet: &Worksheet, column: &str) -> Option<f64> {
    sheet
        .get_column_dimension(column)
        .map(|dim| *dim.get_width())
        .filter(|width| *width > 0.0)
}

fn set_row_height(sheet: &mut Worksheet, row: u32, height: Option<f64>) {
    let dim = sheet.get_row_dimension_mut(&row);
    match height {
        Some(height) => {
            dim.set_height(height);
            dim.set_custom_height(true);
        }
        None => {
            dim.set_height(0.0);
            dim.set_custom_height(false);
        }
    }
}

fn set_column_width(sheet: &mut Worksheet, column: &str, width: Option<f64>) {
    match width {
        Some(width) => {
            sheet.get_column_dimension_mut(column).set_width(width);
        }
        // A column that never had a dimension goes back to the default width.
        None => {
            if sheet.get_column_dimension(column).is_some() {
                sheet
                    .get_column_dimension_mut(column)
                    .set_width(DEFAULT_COLUMN_WIDTH);
            }
        }
    }
}

fn set_dimensions(sheet: &mut Worksheet, op: &PatchOp, dims: &SetDimensionsOp, index: usize) -> Result<Applied> {
    let mut snapshot = DesignSnapshot::default();
    let mut touched_rows = None;
    let mut touched_columns = None;
    if let (Some(rows), Some(height)) = (&dims.rows, dims.row_height) {
        for &row in rows {
            snapshot.row_dimensions.push(RowDimensionSnapshot {
                row,
                height: row_height(sheet, row),
            });
            set_row_height(sheet, row, Some(height));
        }
        touched_rows = Some(rows.as_slice());
    }
    if let (Some(columns), Some(width)) = (&dims.columns, dims.column_width) {
        for column in columns {
            snapshot.column_dimensions.push(ColumnDimensionSnapshot {
                column: column.clone(),
                width: column_width(sheet, column),
            });
            set_column_width(sheet, column, Some(width));
        }
        touched_columns = Some(columns.as_slice());
    }
    Ok((
        dimension_item(index, op, dimensions_summary(touched_rows, touched_columns)),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn display_length(text: &str) -> usize {
    text.lines().map(|line| line.chars().count()).max().unwrap_or(0)
}

fn used_columns(sheet: &Worksheet) -> Vec<String> {
    let used: BTreeSet<u32> = sheet
        .get_cell_collection()
        .into_iter()
        .filter(|cell| !cell.get_value().is_empty())
        .map(|cell| *cell.get_coordinate().get_col_num())
        .collect();
    used.into_iter()
        .filter_map(|col| column_index_to_label(col).ok())
        .collect()
}

fn auto_fit_columns(sheet: &mut Worksheet, op: &PatchOp, fit: &AutoFitColumnsOp, index: usize) -> Result<Applied> {
    let columns = match &fit.columns {
        Some(columns) => columns.clone(),
        None => {
            let used = used_columns(sheet);
            if used.is_empty() { vec!["A".to_string()] } else { used }
        }
    };
    ensure!(!columns.is_empty(), "auto_fit_columns could not resolve target columns.");
    let targets: HashSet<u32> = columns
        .iter()
        .map(|label| column_label_to_index(label))
        .collect::<Result<_>>()?;
    let mut max_lengths: BTreeMap<u32, usize> = BTreeMap::new();
    for cell in sheet.get_cell_collection() {
        let col = *cell.get_coordinate().get_col_num();
        if !targets.contains(&col) {
            continue;
        }
        let text = cell.get_value();
        if text.is_empty() {
            continue;
        }
        let entry = max_lengths.entry(col).or_default();
        *entry = (*entry).max(display_length(&text));
    }
    let mut snapshot = DesignSnapshot::default();
    for column in &columns {
        let current = column_width(sheet, column);
        snapshot.column_dimensions.push(ColumnDimensionSnapshot {
            column: column.clone(),
            width: current,
        });
        let max_len = column_label_to_index(column)
            .ok()
            .and_then(|col| max_lengths.get(&col).copied())
            .unwrap_or(0);
        let estimate = if max_len > 0 {
            max_len as f64 + 2.0
        } else {
            current.unwrap_or(DEFAULT_COLUMN_WIDTH)
        };
        set_column_width(sheet, column, Some(clamp_width(estimate, fit.min_width, fit.max_width)));
    }
    Ok((
        dimension_item(index, op, auto_fit_summary(&columns, fit.min_width, fit.max_width)),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn normalize_merge_label(raw: &str) -> String {
    raw.replace('$', "").to_ascii_uppercase()
}

fn merged_ranges(sheet: &Worksheet) -> Vec<String> {
    sheet
        .get_merge_cells()
        .iter()
        .map(|range| normalize_merge_label(&range.get_range()))
        .collect()
}

fn intersecting_merges(sheet: &Worksheet, scope: &RangeBounds) -> Vec<String> {
    let mut hits: Vec<String> = merged_ranges(sheet)
        .into_iter()
        .filter(|label| {
            RangeBounds::parse_cell_or_range(label).is_ok_and(|bounds| bounds.intersects(scope))
        })
        .collect();
    hits.sort();
    hits
}

fn remove_merges(sheet: &mut Worksheet, labels: &[String]) {
    sheet
        .get_merge_cells_mut()
        .retain(|range| !labels.contains(&normalize_merge_label(&range.get_range())));
}

fn merge_cells(
    sheet: &mut Worksheet,
    op: &PatchOp,
    merge: &RangeOp,
    index: usize,
    warnings: &mut Vec<String>,
) -> Result<Applied> {
    let bounds = RangeBounds::parse(&merge.range)?;
    let overlapped = intersecting_merges(sheet, &bounds);
    if !overlapped.is_empty() {
        bail!(
            "merge_cells range overlaps existing merged ranges: {}.",
            overlapped.join(", ")
        );
    }
    let top_left = bounds.top_left();
    let risky: Vec<String> = bounds
        .cells()
        .filter(|cell| *cell != top_left)
        .filter(|cell| {
            sheet
                .get_cell(cell.label().as_str())
                .is_some_and(|c| c.is_formula() || !c.get_value().is_empty())
        })
        .map(|cell| cell.label())
        .collect();
    warnings.extend(merge_value_loss_warning(&merge.sheet, &merge.range, &risky));
    let snapshot = DesignSnapshot {
        merge_state: Some(MergeStateSnapshot {
            scope: merge.range.clone(),
            ranges: Vec::new(),
        }),
        ..DesignSnapshot::default()
    };
    sheet.add_merge_cells(bounds.label());
    Ok((
        style_item(index, op, Some(merge.range.clone()), format!("merged={}", merge.range)),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn unmerge_cells(sheet: &mut Worksheet, op: &PatchOp, unmerge: &RangeOp, index: usize) -> Result<Applied> {
    let bounds = RangeBounds::parse(&unmerge.range)?;
    let targets = intersecting_merges(sheet, &bounds);
    remove_merges(sheet, &targets);
    let summary = format!("unmerged={}", targets.len());
    let snapshot = DesignSnapshot {
        merge_state: Some(MergeStateSnapshot {
            scope: unmerge.range.clone(),
            ranges: targets,
        }),
        ..DesignSnapshot::default()
    };
    Ok((
        style_item(index, op, Some(unmerge.range.clone()), summary),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn set_alignment(sheet: &mut Worksheet, op: &PatchOp, align: &SetAlignmentOp, index: usize) -> Result<Applied> {
    let cells = target_cells(&align.target)?;
    let snapshot = DesignSnapshot {
        alignments: cells.iter().map(|c| alignment_snapshot(c, &style_of(sheet, c))).collect(),
        ..DesignSnapshot::default()
    };
    for cell in &cells {
        let alignment = sheet.get_cell_mut(cell.as_str()).get_style_mut().get_alignment_mut();
        if let Some(h) = align.horizontal_align {
            alignment.set_horizontal(horizontal_to_umya(h));
        }
        if let Some(v) = align.vertical_align {
            alignment.set_vertical(vertical_to_umya(v));
        }
        if let Some(wrap) = align.wrap_text {
            alignment.set_wrap_text(wrap);
        }
    }
    let summary = alignment_summary(align.horizontal_align, align.vertical_align, align.wrap_text);
    Ok((
        style_item(index, op, Some(align.target.label().to_string()), summary),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn set_style(sheet: &mut Worksheet, op: &PatchOp, set: &SetStyleOp, index: usize) -> Result<Applied> {
    let cells = target_cells(&set.target)?;
    let mut snapshot = DesignSnapshot::default();
    for cell in &cells {
        let style = style_of(sheet, cell);
        snapshot.fonts.push(font_snapshot(cell, &style));
        snapshot.fills.push(fill_snapshot(cell, &style));
        snapshot.alignments.push(alignment_snapshot(cell, &style));
    }
    let font_argb = set.color.as_deref().map(hex_to_argb);
    let fill_argb = set.fill_color.as_deref().map(hex_to_argb);
    let touches_alignment =
        set.horizontal_align.is_some() || set.vertical_align.is_some() || set.wrap_text.is_some();
    for cell in &cells {
        let style = sheet.get_cell_mut(cell.as_str()).get_style_mut();
        let font = style.get_font_mut();
        if let Some(bold) = set.bold {
            font.set_bold(bold);
        }
        if let Some(size) = set.font_size {
            font.set_size(size);
        }
        if let Some(argb) = &font_argb {
            font.get_color_mut().set_argb(argb.as_str());
        }
        if let Some(argb) = &fill_argb {
            apply_solid_fill(style, argb);
        }
        if touches_alignment {
            let alignment = style.get_alignment_mut();
            if let Some(h) = set.horizontal_align {
                alignment.set_horizontal(horizontal_to_umya(h));
            }
            if let Some(v) = set.vertical_align {
                alignment.set_vertical(vertical_to_umya(v));
            }
            if let Some(wrap) = set.wrap_text {
                alignment.set_wrap_text(wrap);
            }
        }
    }
    Ok((
        style_item(index, op, Some(set.target.label().to_string()), set_style_summary(set)),
        restore_snapshot_op(op.sheet(), snapshot),
    ))
}

fn table_names(book: &Spreadsheet) -> HashSet<String> {
    book.get_sheet_collection()
        .iter()
        .flat_map(|sheet| sheet.get_tables().iter().map(|t| t.get_name().to_string()))
        .collect()
}

fn table_ranges(sheet: &Worksheet) -> Vec<(String, String)> {
    sheet
        .get_tables()
        .iter()
        .map(|table| {
            let (start, end) = table.get_area();
            let label = format!("{}:{}", start.get_coordinate(), end.get_coordinate());
            (table.get_name().to_string(), label.replace('$', ""))
        })
        .collect()
}

fn apply_table_style(
    sheet: &mut Worksheet,
    op: &PatchOp,
    table: &ApplyTableStyleOp,
    index: usize,
    taken: &HashSet<String>,
) -> Result<Applied> {
    let bounds = RangeBounds::parse(&table.range)?;
    for (name, existing) in table_ranges(sheet) {
        let overlaps = RangeBounds::parse_cell_or_range(&existing).is_ok_and(|b| b.intersects(&bounds));
        if overlaps {
            bail!("apply_table_style range intersects existing table '{name}' ({existing}).");
        }
    }
    let name = table.table_name.clone().unwrap_or_else(|| next_table_name(taken));
    if taken.contains(&name) {
        bail!("Table name already exists: {name}");
    }
    let start = bounds.top_left().label();
    let end = bounds.bottom_right().label();
    let mut new_table = Table::new(&name, (start.as_str(), end.as_str()));
    new_table.set_display_name(&name);
    for (offset, col) in (bounds.min_col..=bounds.max_col).enumerate() {
        let header = sheet
            .get_cell((col, bounds.min_row))
            .map(|cell| cell.get_value().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| format!("Column{}", offset + 1));
        new_table.add_column(TableColumn::new(&header));
    }
    new_table.set_style_info(Some(TableStyleInfo::new(&table.style, false, false, true, false)));
    sheet.add_table(new_table);
    Ok((
        style_item(index, op, Some(table.range.clone()), table_summary(&name, &table.style)),
        None,
    ))
}

/// Put back merges, cell styles and dimensions captured before a design op.
pub fn restore_design_snapshot(sheet: &mut Worksheet, snapshot: &DesignSnapshot) -> Result<()> {
    if let Some(merge_state) = &snapshot.merge_state {
        let scope = RangeBounds::parse_cell_or_range(&merge_state.scope)?;
        let current = intersecting_merges(sheet, &scope);
        remove_merges(sheet, &current);
        for range in &merge_state.ranges {
            sheet.add_merge_cells(normalize_merge_label(range));
        }
    }
    for border in &snapshot.borders {
        restore_borders(sheet.get_cell_mut(border.cell.as_str()).get_style_mut(), border);
    }
    for font in &snapshot.fonts {
        restore_font(sheet.get_cell_mut(font.cell.as_str()).get_style_mut(), font);
    }
    for fill in &snapshot.fills {
        restore_fill(sheet.get_cell_mut(fill.cell.as_str()).get_style_mut(), fill);
    }
    for alignment in &snapshot.alignments {
        restore_alignment(sheet.get_cell_mut(alignment.cell.as_str()).get_style_mut(), alignment);
    }
    for row in &snapshot.row_dimensions {
        set_row_height(sheet, row.row, row.height);
    }
    for column in &snapshot.column_dimensions {
        set_column_width(sheet, &column.column, column.width);
    }
    Ok(())
}

/// Scan every formula in the workbook for error tokens, in sheet then row-major order.
pub fn collect_formula_issues(book: &Spreadsheet) -> Vec<FormulaIssue> {
    let mut issues = Vec::new();
    for sheet in book.get_sheet_collection() {
        let mut formulas: Vec<(CellAddress, String)> = sheet
            .get_cell_collection()
            .into_iter()
            .filter(|cell| cell.is_formula())
            .map(|cell| {
                let coordinate = cell.get_coordinate();
                (
                    CellAddress::new(*coordinate.get_col_num(), *coordinate.get_row_num()),
                    normalize_formula(cell.get_formula()),
                )
            })
            .collect();
        formulas.sort_by(|a, b| a.0.cmp(&b.0));
        for (address, formula) in formulas {
            issues.extend(scan_formula(sheet.get_name(), &address.label(), &formula));
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::model::{
        SetFillColorOp, SetValueIfOp, SetValueOp,
    };

    fn book_with(sheet: &str, cells: &[(&str, &str)]) -> Spreadsheet {
        let mut book = umya_spreadsheet::new_file_empty_worksheet();
        let ws = book.new_sheet(sheet).unwrap();
        for (cell, value) in cells {
            ws.get_cell_mut(*cell).set_value_string(value.to_string());
        }
        book
    }

    fn options() -> PatchOptions {
        PatchOptions {
            return_inverse_ops: true,
            ..PatchOptions::default()
        }
    }

    #[test]
    fn set_value_records_before_after_and_inverse() {
        let mut book = book_with("Sheet1", &[("A1", "old")]);
        let ops = vec![PatchOp::SetValue(SetValueOp {
            sheet: "Sheet1".to_string(),
            cell: "A1".to_string(),
            value: Some(ScalarValue::text("new")),
        })];
        let outcome = apply_ops_to_book(&mut book, &ops, &options()).unwrap();
        let item = &outcome.diff[0];
        assert_eq!(item.before.as_ref().unwrap().value, Some(ScalarValue::text("old")));
        assert_eq!(item.after.as_ref().unwrap().value, Some(ScalarValue::text("new")));
        assert_matches::assert_matches!(
            &outcome.inverse_ops[0],
            PatchOp::SetValue(SetValueOp { value: Some(ScalarValue::Text(v)), .. }) if v == "old"
        );
        let sheet = book.get_sheet_by_name("Sheet1").unwrap();
        assert_eq!(sheet.get_cell("A1").unwrap().get_value(), "new");
    }

    #[test]
    fn condition_mismatch_is_skipped_without_inverse() {
        let mut book = book_with("Sheet1", &[("A1", "current")]);
        let ops = vec![PatchOp::SetValueIf(SetValueIfOp {
            sheet: "Sheet1".to_string(),
            cell: "A1".to_string(),
            expected: Some(ScalarValue::text("other")),
            value: Some(ScalarValue::text("new")),
        })];
        let outcome = apply_ops_to_book(&mut book, &ops, &options()).unwrap();
        assert_eq!(outcome.diff[0].status, crate::patch::model::PatchStatus::Skipped);
        assert_eq!(outcome.diff[0].before, outcome.diff[0].after);
        assert!(outcome.inverse_ops.is_empty());
    }

    #[test]
    fn fill_color_inverse_restores_prior_fill() {
        let mut book = book_with("Sheet1", &[("A1", "x")]);
        let before = fill_snapshot("A1", &style_of(book.get_sheet_by_name("Sheet1").unwrap(), "A1"));
        let ops = vec![PatchOp::SetFillColor(SetFillColorOp {
            sheet: "Sheet1".to_string(),
            target: Target::Cell("A1".to_string()),
            fill_color: "#FFD966".to_string(),
        })];
        let outcome = apply_ops_to_book(&mut book, &ops, &options()).unwrap();
        let applied = fill_snapshot("A1", &style_of(book.get_sheet_by_name("Sheet1").unwrap(), "A1"));
        assert_eq!(applied.start_color.as_deref(), Some("FFFFD966"));
        apply_ops_to_book(&mut book, &outcome.inverse_ops, &PatchOptions::default()).unwrap();
        let restored = fill_snapshot("A1", &style_of(book.get_sheet_by_name("Sheet1").unwrap(), "A1"));
        assert_eq!(restored, before);
    }

    #[test]
    fn failures_carry_the_op_index() {
        let mut book = book_with("Sheet1", &[]);
        let ops = vec![PatchOp::SetValue(SetValueOp {
            sheet: "Missing".to_string(),
            cell: "A1".to_string(),
            value: None,
        })];
        let err = apply_ops_to_book(&mut book, &ops, &options()).unwrap_err();
        let op_err = err.downcast_ref::<PatchOpError>().unwrap();
        assert_eq!(op_err.index, 0);
        assert_eq!(op_err.message, "Sheet not found: Missing");
    }

    #[test]
    fn formula_issues_are_found_per_sheet() {
        let mut book = book_with("Sheet1", &[]);
        book.get_sheet_by_name_mut("Sheet1")
            .unwrap()
            .get_cell_mut("B2")
            .set_formula("SUM(#REF!)");
        let issues = collect_formula_issues(&book);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].cell, "B2");
        assert_eq!(issues[0].sheet, "Sheet1");
    }
}
