pub mod health;
pub mod translate;

pub use health::{has_errors, scan_formula};
pub use translate::translate_formula;
