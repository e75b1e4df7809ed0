//! Patch operation model, validation, backends and request orchestration.

pub mod backend;
pub mod errors;
pub mod model;
pub mod normalize;
pub mod schema;
pub mod selector;
pub mod service;
pub mod validate;

pub use errors::{OpValidationError, PatchOpError};
pub use model::{MakeRequest, PatchOp, PatchOpKind, PatchRequest, PatchResult};
pub use service::PatchService;
