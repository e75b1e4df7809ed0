#![allow(dead_code)]
//! In-memory stand-in for the host automation surface, backed by umya so that
//! saved outputs can be inspected like real workbooks.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use umya_spreadsheet::Spreadsheet;
use workbook_patch_mcp::a1::RangeBounds;
use workbook_patch_mcp::host::{
    ChartPlan, HostAvailability, HostCell, HostError, HostLauncher, HostResult, HostStyle,
    HostTable, HostWorkbookAdapter, TableAddCall, TableSource,
};
use workbook_patch_mcp::patch::backend::in_process::read_cell;
use workbook_patch_mcp::patch::model::{PatchValueKind, ScalarValue};

#[derive(Debug, Default)]
pub struct FakeHostState {
    pub unavailable_reason: Option<String>,
    /// Only this add-table signature succeeds (any when `None`).
    pub accepted_table_signature: Option<&'static str>,
    /// Reject range-object sources so only address sources succeed.
    pub reject_range_object_source: bool,
    /// Name the host assigns to new tables before any rename.
    pub host_table_name: Option<String>,
    pub valid_table_styles: Vec<String>,
    /// Command name that raises an automation fault with an HRESULT.
    pub fail_command: Option<&'static str>,
    pub quit_fails: bool,
    pub calls: Vec<String>,
    pub tables: HashMap<String, Vec<HostTable>>,
    pub charts: Vec<(String, ChartPlan)>,
    pub styles: Vec<(String, String, HostStyle)>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub kills: usize,
}

#[derive(Clone, Default)]
pub struct FakeHost {
    pub state: Arc<Mutex<FakeHostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(self, f: impl FnOnce(&mut FakeHostState)) -> Self {
        f(&mut self.state.lock());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }
}

impl HostLauncher for FakeHost {
    fn availability(&self) -> HostAvailability {
        match &self.state.lock().unavailable_reason {
            Some(reason) => HostAvailability::unavailable(reason.clone()),
            None => HostAvailability::available(),
        }
    }

    fn open(&self, path: &Path) -> HostResult<Box<dyn HostWorkbookAdapter>> {
        let book = umya_spreadsheet::reader::xlsx::read(path)
            .map_err(|e| HostError::Protocol(format!("cannot open {}: {e}", path.display())))?;
        let mut state = self.state.lock();
        state.sessions_opened += 1;
        state.calls.push("open".to_string());
        Ok(Box::new(FakeSession {
            book,
            state: self.state.clone(),
        }))
    }

    fn create(&self, path: &Path, initial_sheet: &str) -> HostResult<()> {
        let mut book = umya_spreadsheet::new_file_empty_worksheet();
        book.new_sheet(initial_sheet)
            .map_err(|e| automation(e.to_string()))?;
        umya_spreadsheet::writer::xlsx::write(&book, path)
            .map_err(|e| automation(e.to_string()))?;
        self.state.lock().calls.push(format!("create:{initial_sheet}"));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

fn automation(message: impl Into<String>) -> HostError {
    HostError::Automation {
        message: message.into(),
        code: None,
    }
}

pub struct FakeSession {
    book: Spreadsheet,
    state: Arc<Mutex<FakeHostState>>,
}

impl FakeSession {
    fn record(&self, command: &str) -> HostResult<()> {
        let mut state = self.state.lock();
        state.calls.push(command.to_string());
        if state.fail_command == Some(command) {
            return Err(HostError::Automation {
                message: format!("{command} failed in host"),
                code: Some(-2147352567),
            });
        }
        Ok(())
    }

    fn sheet(&mut self, name: &str) -> HostResult<&mut umya_spreadsheet::Worksheet> {
        self.book
            .get_sheet_by_name_mut(name)
            .ok_or_else(|| automation(format!("no sheet {name}")))
    }
}

fn write_scalar(cell: &mut umya_spreadsheet::Cell, value: Option<&ScalarValue>) {
    cell.get_cell_value_mut().remove_formula();
    match value {
        None => {
            cell.set_value_string(String::new());
        }
        Some(ScalarValue::Bool(b)) => {
            cell.set_value_bool(*b);
        }
        Some(ScalarValue::Int(i)) => {
            cell.set_value_number(*i as f64);
        }
        Some(ScalarValue::Float(f)) => {
            cell.set_value_number(*f);
        }
        Some(ScalarValue::Text(s)) => {
            cell.set_value_string(s.clone());
        }
    }
}

impl HostWorkbookAdapter for FakeSession {
    fn sheet_names(&mut self) -> HostResult<Vec<String>> {
        self.record("sheet_names")?;
        Ok(self
            .book
            .get_sheet_collection()
            .iter()
            .map(|ws| ws.get_name().to_string())
            .collect())
    }

    fn add_sheet(&mut self, name: &str) -> HostResult<()> {
        self.record("add_sheet")?;
        self.book
            .new_sheet(name)
            .map(|_| ())
            .map_err(|e| automation(e.to_string()))
    }

    fn read_cell(&mut self, sheet: &str, cell: &str) -> HostResult<HostCell> {
        self.record("read_cell")?;
        let ws = self.sheet(sheet)?;
        Ok(match read_cell(ws, cell) {
            Some(value) if value.kind == PatchValueKind::Formula => HostCell {
                formula: value.value.map(|v| v.to_string()),
                value: None,
            },
            Some(value) => HostCell {
                formula: None,
                value: value.value,
            },
            None => HostCell::default(),
        })
    }

    fn write_value(&mut self, sheet: &str, cell: &str, value: Option<&ScalarValue>) -> HostResult<()> {
        self.record("write_value")?;
        write_scalar(self.sheet(sheet)?.get_cell_mut(cell), value);
        Ok(())
    }

    fn write_formula(&mut self, sheet: &str, cell: &str, formula: &str) -> HostResult<()> {
        self.record("write_formula")?;
        let target = self.sheet(sheet)?.get_cell_mut(cell);
        target.get_cell_value_mut().remove_formula();
        target.set_formula(formula.trim_start_matches('=').to_string());
        Ok(())
    }

    fn write_range_values(
        &mut self,
        sheet: &str,
        range: &str,
        values: &[Vec<Option<ScalarValue>>],
    ) -> HostResult<()> {
        self.record("write_range_values")?;
        let bounds = RangeBounds::parse(range).map_err(|e| automation(e.to_string()))?;
        let ws = self.sheet(sheet)?;
        for (r, row) in values.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                let cell = ws.get_cell_mut((bounds.min_col + c as u32, bounds.min_row + r as u32));
                write_scalar(cell, value.as_ref());
            }
        }
        Ok(())
    }

    fn set_style(&mut self, sheet: &str, range: &str, style: &HostStyle) -> HostResult<()> {
        self.record("set_style")?;
        self.state
            .lock()
            .styles
            .push((sheet.to_string(), range.to_string(), style.clone()));
        Ok(())
    }

    fn set_row_height(&mut self, sheet: &str, row: u32, height: f64) -> HostResult<()> {
        self.record("set_row_height")?;
        self.sheet(sheet)?.get_row_dimension_mut(&row).set_height(height);
        Ok(())
    }

    fn set_column_width(&mut self, sheet: &str, column: &str, width: f64) -> HostResult<()> {
        self.record("set_column_width")?;
        self.sheet(sheet)?.get_column_dimension_mut(column).set_width(width);
        Ok(())
    }

    fn auto_fit_column(&mut self, _sheet: &str, _column: &str) -> HostResult<Option<f64>> {
        self.record("auto_fit_column")?;
        Ok(Some(30.0))
    }

    fn last_used_column(&mut self, sheet: &str) -> HostResult<u32> {
        self.record("last_used_column")?;
        let ws = self.sheet(sheet)?;
        Ok(ws
            .get_cell_collection()
            .iter()
            .map(|cell| *cell.get_coordinate().get_col_num())
            .max()
            .unwrap_or(0))
    }

    fn merge(&mut self, sheet: &str, range: &str) -> HostResult<()> {
        self.record("merge")?;
        self.sheet(sheet)?.add_merge_cells(range);
        Ok(())
    }

    fn unmerge(&mut self, sheet: &str, range: &str) -> HostResult<()> {
        self.record("unmerge")?;
        let range = range.to_string();
        self.sheet(sheet)?
            .get_merge_cells_mut()
            .retain(|merged| merged.get_range() != range);
        Ok(())
    }

    fn merged_areas(&mut self, sheet: &str, range: &str) -> HostResult<Vec<String>> {
        self.record("merged_areas")?;
        let scope = RangeBounds::parse_cell_or_range(range).map_err(|e| automation(e.to_string()))?;
        Ok(self
            .sheet(sheet)?
            .get_merge_cells()
            .iter()
            .map(|merged| merged.get_range())
            .filter(|label| {
                RangeBounds::parse_cell_or_range(label).is_ok_and(|b| b.intersects(&scope))
            })
            .collect())
    }

    fn tables(&mut self, sheet: &str) -> HostResult<Vec<HostTable>> {
        self.record("tables")?;
        Ok(self.state.lock().tables.get(sheet).cloned().unwrap_or_default())
    }

    fn add_table(&mut self, sheet: &str, call: &TableAddCall) -> HostResult<String> {
        self.record("add_table")?;
        let mut state = self.state.lock();
        if state.reject_range_object_source && matches!(call.source, TableSource::RangeObject(_)) {
            return Err(automation("Range object rejected"));
        }
        if let Some(signature) = state.accepted_table_signature {
            if call.shape.signature() != signature {
                return Err(automation("Invalid number of parameters"));
            }
        }
        let address = match &call.source {
            TableSource::RangeObject(range) | TableSource::Address(range) => range.clone(),
        };
        let existing = state.tables.values().map(Vec::len).sum::<usize>();
        let assigned = state
            .host_table_name
            .clone()
            .unwrap_or_else(|| format!("Table{}", existing + 1));
        state.tables.entry(sheet.to_string()).or_default().push(HostTable {
            name: assigned.clone(),
            address: format!("${}", address.replace(':', ":$")),
        });
        Ok(assigned)
    }

    fn rename_table(&mut self, sheet: &str, table: &str, name: &str) -> HostResult<()> {
        self.record("rename_table")?;
        let mut state = self.state.lock();
        let tables = state.tables.entry(sheet.to_string()).or_default();
        let entry = tables
            .iter_mut()
            .find(|t| t.name == table)
            .ok_or_else(|| automation(format!("no table {table}")))?;
        entry.name = name.to_string();
        Ok(())
    }

    fn set_table_style(&mut self, _sheet: &str, _table: &str, attribute: &str, style: &str) -> HostResult<()> {
        self.record(&format!("set_table_style:{attribute}"))?;
        let state = self.state.lock();
        if !state.valid_table_styles.is_empty() && !state.valid_table_styles.iter().any(|s| s == style) {
            return Err(automation(format!("Unknown table style {style}")));
        }
        Ok(())
    }

    fn chart_names(&mut self, sheet: &str) -> HostResult<Vec<String>> {
        self.record("chart_names")?;
        Ok(self
            .state
            .lock()
            .charts
            .iter()
            .filter(|(s, _)| s == sheet)
            .filter_map(|(_, plan)| plan.chart_name.clone())
            .collect())
    }

    fn add_chart(&mut self, sheet: &str, plan: &ChartPlan) -> HostResult<String> {
        self.record("add_chart")?;
        let mut state = self.state.lock();
        state.charts.push((sheet.to_string(), plan.clone()));
        Ok(format!("Chart {}", state.charts.len()))
    }

    fn save_as(&mut self, path: &Path) -> HostResult<()> {
        self.record("save_as")?;
        umya_spreadsheet::writer::xlsx::write(&self.book, path).map_err(|e| automation(e.to_string()))
    }

    fn close(&mut self) -> HostResult<()> {
        let mut state = self.state.lock();
        state.calls.push("close".to_string());
        state.sessions_closed += 1;
        Ok(())
    }

    fn quit(&mut self) -> HostResult<()> {
        let mut state = self.state.lock();
        state.calls.push("quit".to_string());
        if state.quit_fails {
            return Err(automation("application busy"));
        }
        Ok(())
    }

    fn kill(&mut self) {
        let mut state = self.state.lock();
        state.calls.push("kill".to_string());
        state.kills += 1;
    }
}
