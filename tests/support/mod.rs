#![allow(dead_code)]

pub mod builders;
pub mod fake_host;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use umya_spreadsheet::Spreadsheet;
use workbook_patch_mcp::config::ServerConfig;
use workbook_patch_mcp::host::HostLauncher;
use workbook_patch_mcp::patch::service::PatchService;
use workbook_patch_mcp::state::AppState;
use workbook_patch_mcp::tools::param_enums::PatchBackend;

pub use fake_host::{FakeHost, FakeHostState};

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let root = tempdir
            .path()
            .canonicalize()
            .expect("canonical workspace root");
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write a workbook whose first sheet is `Sheet1`, after `f` has filled it.
    pub fn create_workbook<F>(&self, relative: &str, f: F) -> PathBuf
    where
        F: FnOnce(&mut Spreadsheet),
    {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut book = umya_spreadsheet::new_file();
        f(&mut book);
        umya_spreadsheet::writer::xlsx::write(&book, &path).expect("write workbook");
        path
    }

    pub fn read_workbook(&self, relative: &str) -> Spreadsheet {
        umya_spreadsheet::reader::xlsx::read(self.path(relative)).expect("read workbook")
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig {
            workspace_root: self.root.clone(),
            default_backend: PatchBackend::Auto,
            ..ServerConfig::default()
        }
    }

    pub fn config_with<F>(&self, f: F) -> ServerConfig
    where
        F: FnOnce(&mut ServerConfig),
    {
        let mut config = self.config();
        f(&mut config);
        config
    }

    /// Service without any host automation.
    pub fn service(&self) -> PatchService {
        PatchService::new(Arc::new(self.config()), None)
    }

    pub fn service_with_host(&self, host: &FakeHost) -> PatchService {
        let launcher: Arc<dyn HostLauncher> = Arc::new(host.clone());
        PatchService::new(Arc::new(self.config()), Some(launcher))
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new_with_launcher(Arc::new(self.config()), None))
    }

    pub fn app_state_with_host(&self, host: &FakeHost) -> Arc<AppState> {
        let launcher: Arc<dyn HostLauncher> = Arc::new(host.clone());
        Arc::new(AppState::new_with_launcher(
            Arc::new(self.config()),
            Some(launcher),
        ))
    }
}

/// Text shown for a cell, or `None` when the cell does not exist.
pub fn cell_text(book: &Spreadsheet, sheet: &str, cell: &str) -> Option<String> {
    book.get_sheet_by_name(sheet)
        .and_then(|ws| ws.get_cell(cell))
        .map(|c| c.get_value().to_string())
}

pub fn cell_formula(book: &Spreadsheet, sheet: &str, cell: &str) -> Option<String> {
    book.get_sheet_by_name(sheet)
        .and_then(|ws| ws.get_cell(cell))
        .filter(|c| c.is_formula())
        .map(|c| c.get_formula().to_string())
}
