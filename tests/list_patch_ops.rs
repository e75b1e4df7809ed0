use anyhow::Result;
use support::TestWorkspace;
use workbook_patch_mcp::errors::InvalidParamsError;
use workbook_patch_mcp::patch::PatchOpKind;
use workbook_patch_mcp::tools::{ListPatchOpsParams, list_patch_ops};

mod support;

#[tokio::test(flavor = "current_thread")]
async fn lists_every_op_in_declaration_order() -> Result<()> {
    let workspace = TestWorkspace::new();
    let response = list_patch_ops(workspace.app_state(), ListPatchOpsParams::default()).await?;

    assert_eq!(response.ops.len(), 21);
    assert_eq!(response.ops[0].op, PatchOpKind::SetValue);
    assert_eq!(response.ops[20].op, PatchOpKind::RestoreDesignSnapshot);
    for schema in &response.ops {
        assert!(schema.example.get("op").is_some(), "{} example has no op", schema.op);
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn filters_by_name_and_describes_sheet_resolution() -> Result<()> {
    let workspace = TestWorkspace::new();
    let response = list_patch_ops(
        workspace.app_state(),
        ListPatchOpsParams {
            op: Some(" Set_Fill_Color ".to_string()),
        },
    )
    .await?;

    assert_eq!(response.ops.len(), 1);
    let schema = &response.ops[0];
    assert_eq!(schema.op, PatchOpKind::SetFillColor);
    assert!(schema.required.contains(&"sheet (or top-level sheet)".to_string()));
    assert!(schema
        .constraints
        .iter()
        .any(|c| c == "op.sheet overrides top-level sheet when both are set"));

    let add_sheet = list_patch_ops(
        workspace.app_state(),
        ListPatchOpsParams {
            op: Some("add_sheet".to_string()),
        },
    )
    .await?;
    assert!(add_sheet.ops[0]
        .constraints
        .iter()
        .any(|c| c == "top-level sheet is not used for add_sheet"));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_op_names_the_supported_ones() -> Result<()> {
    let workspace = TestWorkspace::new();
    let err = list_patch_ops(
        workspace.app_state(),
        ListPatchOpsParams {
            op: Some("paint_cells".to_string()),
        },
    )
    .await
    .unwrap_err();

    let invalid = err.downcast_ref::<InvalidParamsError>().expect("invalid params");
    assert_eq!(invalid.path(), Some("op"));
    assert!(invalid.message().starts_with("Unknown op 'paint_cells'. Supported ops: set_value, "));
    Ok(())
}
