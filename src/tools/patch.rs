use crate::errors::InvalidParamsError;
use crate::patch::model::{MakeRequest, MakeRequestInput, PatchOpKind, PatchRequest, PatchRequestInput, PatchResult};
use crate::patch::schema::{PatchOpSchema, list_patch_op_schemas, op_names, op_spec};
use crate::patch::service::{MAKE_TOOL, PATCH_TOOL};
use crate::state::AppState;
use anyhow::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub async fn patch_workbook(state: Arc<AppState>, params: PatchRequestInput) -> Result<PatchResult> {
    let request = PatchRequest::from_input(params).map_err(|err| err.into_invalid_params(PATCH_TOOL))?;
    let service = state.service();
    tokio::task::spawn_blocking(move || service.run_patch(request)).await?
}

pub async fn make_workbook(state: Arc<AppState>, params: MakeRequestInput) -> Result<PatchResult> {
    let request = MakeRequest::from_input(params).map_err(|err| err.into_invalid_params(MAKE_TOOL))?;
    let service = state.service();
    tokio::task::spawn_blocking(move || service.run_make(request)).await?
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListPatchOpsParams {
    /// Restrict the listing to one op kind, e.g. `set_fill_color`.
    #[serde(default)]
    pub op: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListPatchOpsResponse {
    pub ops: Vec<PatchOpSchema>,
}

pub async fn list_patch_ops(_state: Arc<AppState>, params: ListPatchOpsParams) -> Result<ListPatchOpsResponse> {
    let Some(name) = params.op.as_deref().map(str::trim).filter(|name| !name.is_empty()) else {
        return Ok(ListPatchOpsResponse {
            ops: list_patch_op_schemas(),
        });
    };
    let kind = PatchOpKind::from_str(&name.to_ascii_lowercase()).map_err(|_| {
        InvalidParamsError::at(
            "list_patch_ops",
            "op",
            format!("Unknown op '{name}'. Supported ops: {}", op_names().join(", ")),
        )
    })?;
    Ok(ListPatchOpsResponse {
        ops: vec![PatchOpSchema::from_spec(op_spec(kind))],
    })
}
