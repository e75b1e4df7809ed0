pub mod param_enums;
pub mod patch;

pub use patch::{
    ListPatchOpsParams, ListPatchOpsResponse, list_patch_ops, make_workbook, patch_workbook,
};
