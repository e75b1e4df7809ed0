use thiserror::Error;

/// A caller mistake in a tool request; reported to the client as invalid params.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InvalidParamsError {
    tool: &'static str,
    message: String,
    /// Request field at fault, e.g. `out_dir` or `ops[3].fill_color`.
    path: Option<String>,
}

impl InvalidParamsError {
    pub fn new(tool: &'static str, message: impl Into<String>) -> Self {
        Self {
            tool,
            message: message.into(),
            path: None,
        }
    }

    /// Shorthand for `new(..).with_path(field)`.
    pub fn at(tool: &'static str, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(tool, message).with_path(field)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn tool(&self) -> &'static str {
        self.tool
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}
