use super::protocol::{BridgeRequest, decode_response, encode_request};
use super::{
    ChartPlan, HostAvailability, HostCell, HostError, HostLauncher, HostResult, HostStyle,
    HostTable, HostWorkbookAdapter, TableAddCall,
};
use crate::patch::model::ScalarValue;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Launches the configured bridge executable, one process per session.
#[derive(Debug, Clone)]
pub struct BridgeLauncher {
    command: PathBuf,
    args: Vec<String>,
}

impl BridgeLauncher {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    fn resolve_command(&self) -> Option<PathBuf> {
        if self.command.components().count() > 1 || self.command.is_absolute() {
            return self.command.is_file().then(|| self.command.clone());
        }
        let paths = std::env::var_os("PATH")?;
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&self.command))
            .find(|candidate| candidate.is_file())
    }

    fn spawn(&self) -> HostResult<BridgeSession> {
        let command = self.resolve_command().ok_or(HostError::NotConfigured)?;
        let mut child = Command::new(&command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| HostError::Spawn {
                command: command.display().to_string(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HostError::Protocol("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HostError::Protocol("bridge stdout unavailable".to_string()))?;
        tracing::debug!(command = %command.display(), pid = child.id(), "host bridge started");
        Ok(BridgeSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 0,
            finished: false,
        })
    }
}

impl HostLauncher for BridgeLauncher {
    fn availability(&self) -> HostAvailability {
        match self.resolve_command() {
            Some(_) => HostAvailability::available(),
            None => HostAvailability::unavailable(format!(
                "host bridge executable not found: {}",
                self.command.display()
            )),
        }
    }

    fn open(&self, path: &Path) -> HostResult<Box<dyn HostWorkbookAdapter>> {
        let mut session = self.spawn()?;
        if let Err(err) = session.call("open", json!({ "path": path })) {
            session.kill();
            return Err(err);
        }
        Ok(Box::new(session))
    }

    fn create(&self, path: &Path, initial_sheet: &str) -> HostResult<()> {
        let mut session = self.spawn()?;
        let created = session.call(
            "create_workbook",
            json!({ "path": path, "sheet": initial_sheet }),
        );
        if session.quit().is_err() {
            session.kill();
        }
        created.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "bridge"
    }
}

/// A live bridge process with one open workbook.
pub struct BridgeSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    finished: bool,
}

impl BridgeSession {
    fn call(&mut self, cmd: &str, params: Value) -> HostResult<Value> {
        if self.finished {
            return Err(HostError::Closed);
        }
        self.next_id += 1;
        let id = self.next_id;
        let line = encode_request(&BridgeRequest { id, cmd, params })?;
        self.stdin
            .write_all(line.as_bytes())
            .and_then(|_| self.stdin.flush())
            .map_err(|err| HostError::Protocol(format!("failed to send '{cmd}': {err}")))?;
        let mut response = String::new();
        let read = self
            .stdout
            .read_line(&mut response)
            .map_err(|err| HostError::Protocol(format!("failed to read '{cmd}' response: {err}")))?;
        if read == 0 {
            self.finished = true;
            return Err(HostError::Protocol(format!(
                "bridge exited before answering '{cmd}'"
            )));
        }
        decode_response(&response, id)?.into_result()
    }

    fn call_as<T: DeserializeOwned>(&mut self, cmd: &str, params: Value) -> HostResult<T> {
        let data = self.call(cmd, params)?;
        serde_json::from_value(data)
            .map_err(|err| HostError::Protocol(format!("unexpected '{cmd}' payload: {err}")))
    }

    fn call_unit(&mut self, cmd: &str, params: Value) -> HostResult<()> {
        self.call(cmd, params).map(|_| ())
    }
}

impl HostWorkbookAdapter for BridgeSession {
    fn sheet_names(&mut self) -> HostResult<Vec<String>> {
        self.call_as("sheet_names", json!({}))
    }

    fn add_sheet(&mut self, name: &str) -> HostResult<()> {
        self.call_unit("add_sheet", json!({ "name": name }))
    }

    fn read_cell(&mut self, sheet: &str, cell: &str) -> HostResult<HostCell> {
        self.call_as("read_cell", json!({ "sheet": sheet, "cell": cell }))
    }

    fn write_value(&mut self, sheet: &str, cell: &str, value: Option<&ScalarValue>) -> HostResult<()> {
        self.call_unit(
            "write_value",
            json!({ "sheet": sheet, "cell": cell, "value": value }),
        )
    }

    fn write_formula(&mut self, sheet: &str, cell: &str, formula: &str) -> HostResult<()> {
        self.call_unit(
            "write_formula",
            json!({ "sheet": sheet, "cell": cell, "formula": formula }),
        )
    }

    fn write_range_values(
        &mut self,
        sheet: &str,
        range: &str,
        values: &[Vec<Option<ScalarValue>>],
    ) -> HostResult<()> {
        self.call_unit(
            "write_range",
            json!({ "sheet": sheet, "range": range, "values": values }),
        )
    }

    fn set_style(&mut self, sheet: &str, range: &str, style: &HostStyle) -> HostResult<()> {
        self.call_unit(
            "set_style",
            json!({ "sheet": sheet, "range": range, "style": style }),
        )
    }

    fn set_row_height(&mut self, sheet: &str, row: u32, height: f64) -> HostResult<()> {
        self.call_unit(
            "set_row_height",
            json!({ "sheet": sheet, "row": row, "height": height }),
        )
    }

    fn set_column_width(&mut self, sheet: &str, column: &str, width: f64) -> HostResult<()> {
        self.call_unit(
            "set_column_width",
            json!({ "sheet": sheet, "column": column, "width": width }),
        )
    }

    fn auto_fit_column(&mut self, sheet: &str, column: &str) -> HostResult<Option<f64>> {
        self.call_as("autofit_column", json!({ "sheet": sheet, "column": column }))
    }

    fn last_used_column(&mut self, sheet: &str) -> HostResult<u32> {
        self.call_as("last_used_column", json!({ "sheet": sheet }))
    }

    fn merge(&mut self, sheet: &str, range: &str) -> HostResult<()> {
        self.call_unit("merge", json!({ "sheet": sheet, "range": range }))
    }

    fn unmerge(&mut self, sheet: &str, range: &str) -> HostResult<()> {
        self.call_unit("unmerge", json!({ "sheet": sheet, "range": range }))
    }

    fn merged_areas(&mut self, sheet: &str, range: &str) -> HostResult<Vec<String>> {
        self.call_as("merged_areas", json!({ "sheet": sheet, "range": range }))
    }

    fn tables(&mut self, sheet: &str) -> HostResult<Vec<HostTable>> {
        self.call_as("tables", json!({ "sheet": sheet }))
    }

    fn add_table(&mut self, sheet: &str, call: &TableAddCall) -> HostResult<String> {
        self.call_as("add_table", json!({ "sheet": sheet, "call": call }))
    }

    fn rename_table(&mut self, sheet: &str, table: &str, name: &str) -> HostResult<()> {
        self.call_unit(
            "rename_table",
            json!({ "sheet": sheet, "table": table, "name": name }),
        )
    }

    fn set_table_style(&mut self, sheet: &str, table: &str, attribute: &str, style: &str) -> HostResult<()> {
        self.call_unit(
            "set_table_style",
            json!({ "sheet": sheet, "table": table, "attribute": attribute, "style": style }),
        )
    }

    fn chart_names(&mut self, sheet: &str) -> HostResult<Vec<String>> {
        self.call_as("chart_names", json!({ "sheet": sheet }))
    }

    fn add_chart(&mut self, sheet: &str, plan: &ChartPlan) -> HostResult<String> {
        self.call_as("add_chart", json!({ "sheet": sheet, "plan": plan }))
    }

    fn save_as(&mut self, path: &Path) -> HostResult<()> {
        self.call_unit("save_as", json!({ "path": path }))
    }

    fn close(&mut self) -> HostResult<()> {
        self.call_unit("close", json!({}))
    }

    fn quit(&mut self) -> HostResult<()> {
        self.call_unit("quit", json!({}))?;
        self.finished = true;
        self.child
            .wait()
            .map_err(|err| HostError::Protocol(format!("failed to reap bridge: {err}")))?;
        Ok(())
    }

    fn kill(&mut self) {
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if !self.finished {
            self.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_executable_is_unavailable() {
        let launcher = BridgeLauncher::new("/nonexistent/workbook-host-bridge", Vec::new());
        let availability = launcher.availability();
        assert!(!availability.available);
        assert!(availability.reason.unwrap().contains("not found"));
        assert!(matches!(
            launcher.open(Path::new("x.xlsx")),
            Err(HostError::NotConfigured)
        ));
    }
}
