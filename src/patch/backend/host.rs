//! Backend that drives a live spreadsheet application through [`HostWorkbookAdapter`].

use super::{
    BackendOutcome, CellWrite, DEFAULT_COLUMN_WIDTH, PatchApplier, PatchJob, alignment_summary,
    applied_item, auto_fit_summary, clamp_width, dimension_item, dimensions_summary,
    next_table_name, planned_cell_write, set_style_summary, skipped_item, style_item,
    table_summary,
};
use crate::a1::{CellAddress, RangeBounds, column_index_to_label};
use crate::formula::translate_formula;
use crate::host::{
    ChartPlan, ChartSeriesPlan, HostCell, HostLauncher, HostStyle, HostWorkbookAdapter, SheetRange,
    TABLE_ADD_SHAPES, TABLE_STYLE_ATTRIBUTES, TableAddCall, TableSource, shutdown_quietly,
    try_variants,
};
use crate::patch::errors::PatchOpError;
use crate::patch::model::{
    ApplyTableStyleOp, AutoFitColumnsOp, CreateChartOp, PatchDiffItem, PatchOp, PatchValue,
    PatchValueKind, SetRangeValuesOp, Target,
};
use crate::patch::schema::{chart_type_id, supported_chart_types_csv};
use crate::patch::validate::split_chart_range;
use crate::styles::hex_to_host_rgb;
use crate::tools::param_enums::PatchEngine;
use anyhow::{Context, Result, anyhow, bail, ensure};
use std::collections::HashSet;
use std::sync::Arc;

const DEFAULT_CHART_WIDTH: f64 = 360.0;
const DEFAULT_CHART_HEIGHT: f64 = 220.0;
const TABLE_ERROR_TAIL: usize = 4;

pub struct HostBackend {
    launcher: Arc<dyn HostLauncher>,
}

impl HostBackend {
    pub fn new(launcher: Arc<dyn HostLauncher>) -> Self {
        Self { launcher }
    }
}

impl PatchApplier for HostBackend {
    fn engine(&self) -> PatchEngine {
        PatchEngine::Host
    }

    fn apply(&self, job: &PatchJob<'_>) -> Result<BackendOutcome> {
        // every host run ends in save_as
        ensure!(!job.options.dry_run, "host automation cannot run a dry-run patch");
        tracing::debug!(launcher = self.launcher.name(), input = %job.input.display(), "opening workbook on host");
        let mut session = self.launcher.open(job.input)?;
        let result = apply_ops(session.as_mut(), job.ops, job.options.auto_formula).and_then(|diff| {
            session
                .save_as(job.output)
                .with_context(|| format!("failed to save workbook {}", job.output.display()))?;
            Ok(diff)
        });
        shutdown_quietly(session.as_mut());
        Ok(BackendOutcome {
            diff: result?,
            ..BackendOutcome::default()
        })
    }
}

/// Apply every op through `adapter`; the first failure aborts the batch.
pub fn apply_ops(
    adapter: &mut dyn HostWorkbookAdapter,
    ops: &[PatchOp],
    auto_formula: bool,
) -> Result<Vec<PatchDiffItem>> {
    let mut sheets = adapter.sheet_names()?;
    let mut diff = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let item = apply_op(adapter, &mut sheets, op, index, auto_formula)
            .map_err(|err| anyhow::Error::new(PatchOpError::from_error(index, op, &err)))?;
        tracing::debug!(index, op = %op.kind(), sheet = op.sheet(), "applied op on host");
        diff.push(item);
    }
    Ok(diff)
}

fn apply_op(
    adapter: &mut dyn HostWorkbookAdapter,
    sheets: &mut Vec<String>,
    op: &PatchOp,
    index: usize,
    auto_formula: bool,
) -> Result<PatchDiffItem> {
    if let PatchOp::AddSheet(add) = op {
        if sheets.contains(&add.sheet) {
            bail!("Sheet already exists: {}", add.sheet);
        }
        adapter.add_sheet(&add.sheet)?;
        sheets.push(add.sheet.clone());
        let after = PatchValue::described(PatchValueKind::Sheet, add.sheet.clone());
        return Ok(applied_item(index, op, None, None, Some(after)));
    }
    let sheet = op.sheet();
    if !sheets.iter().any(|name| name == sheet) {
        bail!("Sheet not found: {sheet}");
    }
    match op {
        PatchOp::SetValue(_) | PatchOp::SetFormula(_) | PatchOp::SetValueIf(_) | PatchOp::SetFormulaIf(_) => {
            apply_cell_op(adapter, op, index, auto_formula)
        }
        PatchOp::SetRangeValues(values) => set_range_values(adapter, op, values, index),
        PatchOp::FillFormula(fill) => {
            let bounds = RangeBounds::parse(&fill.range)?;
            ensure!(
                bounds.rows() == 1 || bounds.cols() == 1,
                "fill_formula range must be a single row or a single column."
            );
            let origin = CellAddress::parse(&fill.base_cell)?;
            for cell in bounds.cells() {
                let formula = translate_formula(&fill.formula, origin, cell)?;
                adapter.write_formula(sheet, &cell.label(), &formula)?;
            }
            let after = PatchValue::described(PatchValueKind::Formula, fill.formula.clone());
            Ok(applied_item(index, op, Some(fill.range.clone()), None, Some(after)))
        }
        PatchOp::DrawGridBorder(border) => {
            let bounds = border.bounds()?;
            let style = HostStyle {
                grid_border: true,
                ..HostStyle::default()
            };
            adapter.set_style(sheet, &bounds.label(), &style)?;
            let label = format!("{}:{}", border.base_cell, bounds.bottom_right());
            Ok(style_item(index, op, Some(label), "grid_border(thin,black)"))
        }
        PatchOp::SetBold(set) => {
            let style = HostStyle {
                bold: Some(set.bold),
                ..HostStyle::default()
            };
            restyle(adapter, op, &set.target, index, &style, format!("bold={}", set.bold))
        }
        PatchOp::SetFontSize(set) => {
            let style = HostStyle {
                font_size: Some(set.font_size),
                ..HostStyle::default()
            };
            restyle(adapter, op, &set.target, index, &style, format!("font_size={}", set.font_size))
        }
        PatchOp::SetFontColor(set) => {
            let style = HostStyle {
                font_color: Some(hex_to_host_rgb(&set.color)),
                ..HostStyle::default()
            };
            restyle(adapter, op, &set.target, index, &style, format!("font_color={}", set.color))
        }
        PatchOp::SetFillColor(set) => {
            let style = HostStyle {
                fill_color: Some(hex_to_host_rgb(&set.fill_color)),
                ..HostStyle::default()
            };
            restyle(adapter, op, &set.target, index, &style, format!("fill={}", set.fill_color))
        }
        PatchOp::SetDimensions(dims) => {
            let mut touched_rows = None;
            let mut touched_columns = None;
            if let (Some(rows), Some(height)) = (&dims.rows, dims.row_height) {
                for &row in rows {
                    adapter.set_row_height(sheet, row, height)?;
                }
                touched_rows = Some(rows.as_slice());
            }
            if let (Some(columns), Some(width)) = (&dims.columns, dims.column_width) {
                for column in columns {
                    adapter.set_column_width(sheet, column, width)?;
                }
                touched_columns = Some(columns.as_slice());
            }
            Ok(dimension_item(index, op, dimensions_summary(touched_rows, touched_columns)))
        }
        PatchOp::AutoFitColumns(fit) => auto_fit_columns(adapter, op, fit, index),
        PatchOp::MergeCells(merge) => {
            adapter.merge(sheet, &merge.range)?;
            Ok(style_item(index, op, Some(merge.range.clone()), format!("merged={}", merge.range)))
        }
        PatchOp::UnmergeCells(unmerge) => {
            let areas = adapter.merged_areas(sheet, &unmerge.range)?;
            for area in &areas {
                adapter.unmerge(sheet, area)?;
            }
            Ok(style_item(
                index,
                op,
                Some(unmerge.range.clone()),
                format!("unmerged={}", areas.len()),
            ))
        }
        PatchOp::SetAlignment(align) => {
            let style = HostStyle {
                horizontal_alignment: align.horizontal_align.map(|h| h.host_code()),
                vertical_alignment: align.vertical_align.map(|v| v.host_code()),
                wrap_text: align.wrap_text,
                ..HostStyle::default()
            };
            let summary = alignment_summary(align.horizontal_align, align.vertical_align, align.wrap_text);
            restyle(adapter, op, &align.target, index, &style, summary)
        }
        PatchOp::SetStyle(set) => {
            let style = HostStyle {
                bold: set.bold,
                font_size: set.font_size,
                font_color: set.color.as_deref().map(hex_to_host_rgb),
                fill_color: set.fill_color.as_deref().map(hex_to_host_rgb),
                horizontal_alignment: set.horizontal_align.map(|h| h.host_code()),
                vertical_alignment: set.vertical_align.map(|v| v.host_code()),
                wrap_text: set.wrap_text,
                grid_border: false,
            };
            restyle(adapter, op, &set.target, index, &style, set_style_summary(set))
        }
        PatchOp::ApplyTableStyle(table) => apply_table_style(adapter, op, table, index),
        PatchOp::CreateChart(chart) => create_chart(adapter, sheets, op, chart, index),
        PatchOp::RestoreDesignSnapshot(_) => {
            bail!("restore_design_snapshot is supported only on in-process backend.")
        }
        PatchOp::AddSheet(_) => bail!("add_sheet must be applied at workbook level."),
    }
}

fn host_cell_value(cell: HostCell) -> Option<PatchValue> {
    if let Some(formula) = cell.formula.filter(|f| f.starts_with('=')) {
        return Some(PatchValue::described(PatchValueKind::Formula, formula));
    }
    cell.value
        .map(|value| PatchValue::new(PatchValueKind::Value, Some(value)))
}

fn apply_cell_op(
    adapter: &mut dyn HostWorkbookAdapter,
    op: &PatchOp,
    index: usize,
    auto_formula: bool,
) -> Result<PatchDiffItem> {
    let cell = op
        .location()
        .ok_or_else(|| anyhow!("{} requires cell.", op.kind()))?;
    let before = host_cell_value(adapter.read_cell(op.sheet(), &cell)?);
    let Some(write) = planned_cell_write(op, before.as_ref(), auto_formula)? else {
        return Ok(skipped_item(index, op, cell, before));
    };
    match &write {
        CellWrite::Formula(formula) => adapter.write_formula(op.sheet(), &cell, formula)?,
        CellWrite::Value(value) => adapter.write_value(op.sheet(), &cell, value.as_ref())?,
    }
    Ok(applied_item(index, op, Some(cell), before, write.as_patch_value()))
}

fn set_range_values(
    adapter: &mut dyn HostWorkbookAdapter,
    op: &PatchOp,
    set: &SetRangeValuesOp,
    index: usize,
) -> Result<PatchDiffItem> {
    let bounds = RangeBounds::parse(&set.range)?;
    ensure!(
        set.values.len() == bounds.rows() as usize,
        "set_range_values values height does not match range."
    );
    ensure!(
        set.values.iter().all(|row| row.len() == bounds.cols() as usize),
        "set_range_values values width does not match range."
    );
    adapter.write_range_values(op.sheet(), &set.range, &set.values)?;
    let after = PatchValue::described(PatchValueKind::Value, format!("{}x{}", bounds.rows(), bounds.cols()));
    Ok(applied_item(index, op, Some(set.range.clone()), None, Some(after)))
}

fn restyle(
    adapter: &mut dyn HostWorkbookAdapter,
    op: &PatchOp,
    target: &Target,
    index: usize,
    style: &HostStyle,
    summary: String,
) -> Result<PatchDiffItem> {
    adapter.set_style(op.sheet(), target.label(), style)?;
    Ok(style_item(index, op, Some(target.label().to_string()), summary))
}

fn auto_fit_columns(
    adapter: &mut dyn HostWorkbookAdapter,
    op: &PatchOp,
    fit: &AutoFitColumnsOp,
    index: usize,
) -> Result<PatchDiffItem> {
    let columns = match &fit.columns {
        Some(columns) => columns.clone(),
        None => match adapter.last_used_column(op.sheet())? {
            0 => vec!["A".to_string()],
            last => (1..=last)
                .map(column_index_to_label)
                .collect::<Result<Vec<_>>>()?,
        },
    };
    ensure!(!columns.is_empty(), "auto_fit_columns could not resolve target columns.");
    for column in &columns {
        let fitted = adapter
            .auto_fit_column(op.sheet(), column)?
            .unwrap_or(DEFAULT_COLUMN_WIDTH);
        adapter.set_column_width(op.sheet(), column, clamp_width(fitted, fit.min_width, fit.max_width))?;
    }
    Ok(dimension_item(index, op, auto_fit_summary(&columns, fit.min_width, fit.max_width)))
}

/// Host addresses may look like `=Sheet1!$A$1:$C$4`; reduce them to `A1:C4`.
pub fn normalize_table_address(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_eq = trimmed.strip_prefix('=').unwrap_or(trimmed).replace('$', "");
    let local = match without_eq.rsplit_once('!') {
        Some((_, local)) => local,
        None => without_eq.as_str(),
    };
    local.trim().trim_matches('\'').to_ascii_uppercase()
}

fn apply_table_style(
    adapter: &mut dyn HostWorkbookAdapter,
    op: &PatchOp,
    table: &ApplyTableStyleOp,
    index: usize,
) -> Result<PatchDiffItem> {
    let sheet = op.sheet();
    let bounds = RangeBounds::parse(&table.range)?;
    let existing = adapter.tables(sheet)?;
    for current in &existing {
        let address = normalize_table_address(&current.address);
        if address.is_empty() {
            continue;
        }
        if RangeBounds::parse_cell_or_range(&address).is_ok_and(|b| b.intersects(&bounds)) {
            bail!(
                "apply_table_style range intersects existing table '{}' ({address}).",
                current.name
            );
        }
    }
    let taken: HashSet<String> = existing.into_iter().map(|t| t.name).collect();
    let name = table.table_name.clone().unwrap_or_else(|| next_table_name(&taken));
    if taken.contains(&name) {
        bail!("Table name already exists: {name}");
    }

    let sources = [
        TableSource::RangeObject(table.range.clone()),
        TableSource::Address(table.range.clone()),
    ];
    let calls = sources.iter().flat_map(|source| {
        TABLE_ADD_SHAPES.iter().map(move |shape| TableAddCall {
            source: source.clone(),
            shape: *shape,
        })
    });
    let created = try_variants(
        calls,
        |call| format!("{} [{}]", call.shape.signature(), call.source.describe()),
        |call| adapter.add_table(sheet, call),
    )
    .map_err(|errors| {
        let tail = &errors[errors.len().saturating_sub(TABLE_ERROR_TAIL)..];
        anyhow!(
            "apply_table_style failed to add table after signature retries. {}",
            tail.join(" | ")
        )
    })?;
    if created != name {
        adapter.rename_table(sheet, &created, &name)?;
    }
    try_variants(
        TABLE_STYLE_ATTRIBUTES.iter().copied(),
        |attribute| attribute.to_string(),
        |attribute| adapter.set_table_style(sheet, &name, attribute, &table.style),
    )
    .map_err(|errors| {
        anyhow!(
            "apply_table_style invalid table style: '{}'. ({})",
            table.style,
            errors.last().map(String::as_str).unwrap_or("no style attribute accepted")
        )
    })?;
    Ok(style_item(index, op, Some(table.range.clone()), table_summary(&name, &table.style)))
}

fn resolve_chart_range(raw: &str, field: &str, own_sheet: &str, sheets: &[String]) -> Result<SheetRange> {
    let (qualifier, range) =
        split_chart_range(raw).ok_or_else(|| anyhow!("Invalid chart range reference in {field}: {raw}"))?;
    let sheet = match qualifier {
        Some(name) => {
            if !sheets.contains(&name) {
                bail!("create_chart sheet not found for range reference: {name}");
            }
            name
        }
        None => own_sheet.to_string(),
    };
    Ok(SheetRange { sheet, range })
}

/// Resolve chart type, source ranges and categories into a host chart request.
///
/// With several data ranges and no category range, the first range supplies categories.
pub fn plan_chart(op: &CreateChartOp, sheets: &[String]) -> Result<ChartPlan> {
    let chart_type_id = chart_type_id(&op.chart_type).ok_or_else(|| {
        anyhow!("create_chart chart_type must be one of: {}.", supported_chart_types_csv())
    })?;
    ensure!(!op.data_range.is_empty(), "create_chart data_range list must not be empty.");
    let mut data = op
        .data_range
        .iter()
        .map(|raw| resolve_chart_range(raw, "data_range", &op.sheet, sheets))
        .collect::<Result<Vec<_>>>()?;
    let mut categories = op
        .category_range
        .as_deref()
        .map(|raw| resolve_chart_range(raw, "category_range", &op.sheet, sheets))
        .transpose()?;

    let series = if data.len() == 1 {
        Vec::new()
    } else {
        if categories.is_none() {
            categories = Some(data.remove(0));
        }
        data.iter()
            .enumerate()
            .map(|(i, values)| ChartSeriesPlan {
                values: values.clone(),
                name: (!op.titles_from_data).then(|| format!("Series {}", i + 1)),
            })
            .collect()
    };

    Ok(ChartPlan {
        chart_type_id,
        anchor_cell: op.anchor_cell.clone(),
        width: op.width.unwrap_or(DEFAULT_CHART_WIDTH),
        height: op.height.unwrap_or(DEFAULT_CHART_HEIGHT),
        source: data[0].clone(),
        series,
        categories,
        plot_by: if op.series_from_rows { 1 } else { 2 },
        name_series_by_index: !op.titles_from_data,
        chart_name: op.chart_name.clone(),
        chart_title: op.chart_title.clone(),
        x_axis_title: op.x_axis_title.clone(),
        y_axis_title: op.y_axis_title.clone(),
    })
}

fn create_chart(
    adapter: &mut dyn HostWorkbookAdapter,
    sheets: &[String],
    op: &PatchOp,
    chart: &CreateChartOp,
    index: usize,
) -> Result<PatchDiffItem> {
    let plan = plan_chart(chart, sheets)?;
    if let Some(name) = &chart.chart_name {
        if adapter.chart_names(&chart.sheet)?.contains(name) {
            bail!("create_chart chart_name already exists: {name}");
        }
    }
    let created = adapter.add_chart(&chart.sheet, &plan)?;
    let label = chart.chart_name.clone().unwrap_or(created);
    let summary = format!(
        "type={};data={};anchor={};name={label}",
        chart.chart_type,
        chart.data_range.join(","),
        chart.anchor_cell
    );
    let after = PatchValue::described(PatchValueKind::Chart, summary);
    Ok(applied_item(index, op, Some(chart.anchor_cell.clone()), None, Some(after)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(data: &[&str], category: Option<&str>) -> CreateChartOp {
        CreateChartOp {
            sheet: "Sheet1".to_string(),
            chart_type: "line".to_string(),
            data_range: data.iter().map(|s| s.to_string()).collect(),
            category_range: category.map(str::to_string),
            anchor_cell: "F2".to_string(),
            chart_name: None,
            width: None,
            height: None,
            titles_from_data: true,
            series_from_rows: false,
            chart_title: None,
            x_axis_title: None,
            y_axis_title: None,
        }
    }

    fn sheets() -> Vec<String> {
        vec!["Sheet1".to_string(), "Sales 2026".to_string()]
    }

    #[test]
    fn single_range_binds_source_directly() {
        let plan = plan_chart(&chart(&["A1:B5"], None), &sheets()).unwrap();
        assert_eq!(plan.chart_type_id, 4);
        assert_eq!(plan.source.range, "A1:B5");
        assert_eq!(plan.source.sheet, "Sheet1");
        assert!(plan.series.is_empty());
        assert!(plan.categories.is_none());
        assert_eq!((plan.width, plan.height), (360.0, 220.0));
        assert_eq!(plan.plot_by, 2);
    }

    #[test]
    fn first_of_several_ranges_becomes_categories() {
        let plan = plan_chart(
            &chart(&["A2:A13", "'Sales 2026'!B2:B13", "C2:C13"], None),
            &sheets(),
        )
        .unwrap();
        assert_eq!(plan.categories.unwrap().range, "A2:A13");
        assert_eq!(plan.series.len(), 2);
        assert_eq!(plan.series[0].values.sheet, "Sales 2026");
        assert_eq!(plan.source, plan.series[0].values);
    }

    #[test]
    fn explicit_categories_keep_every_data_range() {
        let mut op = chart(&["B2:B13", "C2:C13"], Some("A2:A13"));
        op.titles_from_data = false;
        let plan = plan_chart(&op, &sheets()).unwrap();
        assert_eq!(plan.series.len(), 2);
        assert_eq!(plan.series[1].name.as_deref(), Some("Series 2"));
        assert!(plan.name_series_by_index);
    }

    #[test]
    fn unknown_sheet_prefix_is_rejected() {
        let err = plan_chart(&chart(&["Missing!A1:A3"], None), &sheets()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "create_chart sheet not found for range reference: Missing"
        );
    }

    #[test]
    fn table_addresses_normalize() {
        assert_eq!(normalize_table_address("=Sheet1!$a$1:$C$4"), "A1:C4");
        assert_eq!(normalize_table_address("'My Sheet'!B2:D9"), "B2:D9");
        assert_eq!(normalize_table_address(""), "");
    }
}
