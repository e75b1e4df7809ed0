use anyhow::Result;
use serde_json::json;
use support::{FakeHost, TestWorkspace, cell_text};
use workbook_patch_mcp::errors::InvalidParamsError;
use workbook_patch_mcp::patch::model::MakeRequestInput;
use workbook_patch_mcp::tools::param_enums::PatchEngine;
use workbook_patch_mcp::tools::make_workbook;

mod support;

fn request(value: serde_json::Value) -> MakeRequestInput {
    serde_json::from_value(value).expect("make request input")
}

fn sheet_names(book: &umya_spreadsheet::Spreadsheet) -> Vec<String> {
    book.get_sheet_collection()
        .iter()
        .map(|sheet| sheet.get_name().to_string())
        .collect()
}

fn seed_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains("_make_seed_"))
        .collect()
}

#[tokio::test(flavor = "current_thread")]
async fn creates_nested_workbook_with_requested_sheet() -> Result<()> {
    let workspace = TestWorkspace::new();

    let result = make_workbook(
        workspace.app_state(),
        request(json!({
            "out_path": "reports/q1.xlsx",
            "sheet": "Summary",
            "ops": [
                {"op": "set_value", "cell": "A1", "value": "Total"},
                {"op": "add_sheet", "sheet": "Data"},
                {"op": "set_value", "sheet": "Data", "cell": "B2", "value": 3.5},
            ],
        })),
    )
    .await?;

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.engine, PatchEngine::InProcess);
    assert!(result.out_path.ends_with("q1.xlsx"));

    let book = workspace.read_workbook("reports/q1.xlsx");
    assert_eq!(sheet_names(&book), vec!["Summary", "Data"]);
    assert_eq!(cell_text(&book, "Summary", "A1").as_deref(), Some("Total"));
    assert_eq!(cell_text(&book, "Data", "B2").as_deref(), Some("3.5"));
    assert!(seed_files(&workspace.path("reports")).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn seed_sheet_falls_back_when_add_sheet_claims_the_name() -> Result<()> {
    let workspace = TestWorkspace::new();

    let result = make_workbook(
        workspace.app_state(),
        request(json!({
            "out_path": "fresh.xlsx",
            "sheet": "Data",
            "ops": [{"op": "add_sheet", "sheet": "Data"}],
        })),
    )
    .await?;

    assert!(result.error.is_none(), "{:?}", result.error);
    let book = workspace.read_workbook("fresh.xlsx");
    assert_eq!(sheet_names(&book), vec!["Sheet1", "Data"]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn failed_make_removes_seed_and_writes_nothing() -> Result<()> {
    let workspace = TestWorkspace::new();

    let result = make_workbook(
        workspace.app_state(),
        request(json!({
            "out_path": "broken.xlsx",
            "ops": [{"op": "set_value", "sheet": "Nope", "cell": "A1", "value": 1}],
        })),
    )
    .await?;

    assert!(result.error.is_some());
    assert!(!workspace.path("broken.xlsx").exists());
    assert!(seed_files(workspace.root()).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_workbooks_are_created_through_host() -> Result<()> {
    let workspace = TestWorkspace::new();
    let host = FakeHost::new();

    let result = make_workbook(
        workspace.app_state_with_host(&host),
        request(json!({
            "out_path": "legacy.xls",
            "sheet": "Report",
            "ops": [{"op": "set_value", "cell": "C2", "value": "from host"}],
        })),
    )
    .await?;

    assert!(result.error.is_none(), "{:?}", result.error);
    assert_eq!(result.engine, PatchEngine::Host);
    assert!(host.calls().contains(&"create:Report".to_string()));
    assert!(workspace.path("legacy.xls").exists());
    assert!(seed_files(workspace.root()).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn legacy_workbooks_require_host() -> Result<()> {
    let workspace = TestWorkspace::new();

    let err = make_workbook(
        workspace.app_state(),
        request(json!({"out_path": "legacy.xls", "ops": []})),
    )
    .await
    .unwrap_err();
    let invalid = err.downcast_ref::<InvalidParamsError>().expect("invalid params");
    assert_eq!(invalid.path(), Some("out_path"));
    assert!(invalid.message().contains("requires host automation"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn output_paths_are_checked() -> Result<()> {
    let workspace = TestWorkspace::new();
    std::fs::create_dir_all(workspace.path("folder.xlsx"))?;

    let err = make_workbook(
        workspace.app_state(),
        request(json!({"out_path": "folder.xlsx", "ops": []})),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().starts_with("Output path is a directory"));

    let err = make_workbook(
        workspace.app_state(),
        request(json!({"out_path": "notes.csv", "ops": []})),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "Unsupported file extension: .csv");
    Ok(())
}
