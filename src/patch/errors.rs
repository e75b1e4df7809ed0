use crate::errors::InvalidParamsError;
use crate::host::HostError;
use crate::patch::model::{PatchErrorDetail, PatchOp, PatchOpKind};
use thiserror::Error;

/// Request-shape failure raised before any workbook is touched.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct OpValidationError {
    index: Option<usize>,
    field: Option<String>,
    message: String,
}

impl OpValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn at(index: usize, message: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_invalid_params(self, tool: &'static str) -> InvalidParamsError {
        let path = self.path();
        let invalid = InvalidParamsError::new(tool, self.message);
        match path {
            Some(path) => invalid.with_path(path),
            None => invalid,
        }
    }

    /// JSON-pointer-ish location such as `ops[2].range`.
    pub fn path(&self) -> Option<String> {
        match (self.index, self.field.as_deref()) {
            (Some(index), Some(field)) => Some(format!("ops[{index}].{field}")),
            (Some(index), None) => Some(format!("ops[{index}]")),
            (None, Some(field)) => Some(field.to_string()),
            (None, None) => None,
        }
    }
}

/// Failure of one operation while a batch was being applied.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PatchOpError {
    pub index: usize,
    pub kind: PatchOpKind,
    pub sheet: String,
    pub cell: Option<String>,
    pub message: String,
    /// Diagnostic text from the host application, when the failure came from it.
    pub raw_host_message: Option<String>,
}

impl PatchOpError {
    pub fn new(index: usize, op: &PatchOp, message: impl Into<String>) -> Self {
        let message = message.into();
        let raw_host_message = host_diagnostic_in_text(&message);
        Self {
            index,
            kind: op.kind(),
            sheet: op.sheet().to_string(),
            cell: op.location(),
            message,
            raw_host_message,
        }
    }

    pub fn from_error(index: usize, op: &PatchOp, err: &anyhow::Error) -> Self {
        if let Some(existing) = err.downcast_ref::<PatchOpError>() {
            return Self {
                index: existing.index,
                kind: existing.kind,
                sheet: existing.sheet.clone(),
                cell: existing.cell.clone(),
                message: existing.message.clone(),
                raw_host_message: existing.raw_host_message.clone(),
            };
        }
        let message = format!("{err:#}");
        let raw_host_message = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<HostError>())
            .and_then(HostError::diagnostic)
            .or_else(|| host_diagnostic_in_text(&message));
        Self {
            index,
            kind: op.kind(),
            sheet: op.sheet().to_string(),
            cell: op.location(),
            message,
            raw_host_message,
        }
    }

    pub fn error_code(&self) -> &'static str {
        classify(&self.message, self.raw_host_message.is_some()).0
    }

    pub fn is_host_runtime_error(&self) -> bool {
        self.error_code() == "com_runtime_error"
    }

    pub fn detail(&self) -> PatchErrorDetail {
        let (error_code, failed_field) = classify(&self.message, self.raw_host_message.is_some());
        let guidance = guidance_for(self.kind, &self.message);
        PatchErrorDetail {
            op_index: self.index as i64,
            op: self.kind,
            sheet: self.sheet.clone(),
            cell: self.cell.clone(),
            message: self.message.clone(),
            hint: guidance.as_ref().map(|g| g.hint.to_string()),
            expected_fields: guidance
                .as_ref()
                .map(|g| g.expected_fields.iter().map(|f| (*f).to_string()).collect())
                .unwrap_or_default(),
            example_op: guidance.as_ref().map(|g| g.example.to_string()),
            error_code: Some(error_code.to_string()),
            failed_field: failed_field.map(str::to_string),
            raw_com_message: self.raw_host_message.clone(),
        }
    }
}

fn host_diagnostic_in_text(message: &str) -> Option<String> {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("hresult") || message.contains("-2147") {
        Some(message.to_string())
    } else {
        None
    }
}

const KNOWN_ERRORS: &[(&str, &str, Option<&str>)] = &[
    ("chart_type must be one of", "chart_type_invalid", Some("chart_type")),
    ("chart_name already exists", "chart_name_conflict", Some("chart_name")),
    ("table name already exists", "table_name_conflict", Some("table_name")),
    ("intersects existing table", "table_range_intersection", Some("range")),
    ("invalid table style", "table_style_invalid", Some("style")),
    ("failed to add table", "list_object_add_failed", Some("range")),
    ("requires host table api", "com_api_missing", Some("range")),
    ("requires host table style api", "com_api_missing", Some("style")),
    ("requires range and style", "invalid_parameter", Some("range/style")),
    ("requires chart_type", "invalid_parameter", Some("chart_type")),
    ("requires data_range", "invalid_parameter", Some("data_range")),
    ("requires anchor_cell", "invalid_parameter", Some("anchor_cell")),
];

/// Map a failure message to a stable error code and the field most likely at fault.
pub fn classify(message: &str, has_host_diagnostic: bool) -> (&'static str, Option<&'static str>) {
    let lowered = message.to_ascii_lowercase();
    let chart_field = if lowered.contains("category") {
        "category_range"
    } else {
        "data_range"
    };
    if lowered.contains("invalid chart range reference") {
        return ("invalid_range", Some(chart_field));
    }
    if lowered.contains("sheet not found") {
        return ("sheet_not_found", Some(chart_field));
    }
    if let Some((_, code, field)) = KNOWN_ERRORS
        .iter()
        .find(|(needle, _, _)| lowered.contains(needle))
    {
        return (code, *field);
    }
    if has_host_diagnostic {
        return ("com_runtime_error", None);
    }
    ("operation_failed", None)
}

struct Guidance {
    hint: &'static str,
    expected_fields: &'static [&'static str],
    example: &'static str,
}

fn guidance_for(kind: PatchOpKind, message: &str) -> Option<Guidance> {
    let lowered = message.to_ascii_lowercase();
    let guidance = match kind {
        PatchOpKind::SetFillColor
            if message.contains("does not accept color") || message.contains("requires fill_color") =>
        {
            Guidance {
                hint: "set_fill_color takes its color in 'fill_color', not 'color'.",
                expected_fields: &["op", "sheet", "cell or range", "fill_color"],
                example: r##"{"op":"set_fill_color","sheet":"Sheet1","cell":"A1","fill_color":"#FFD966"}"##,
            }
        }
        PatchOpKind::SetAlignment if message.contains("requires at least one of") => Guidance {
            hint: "Provide horizontal_align, vertical_align or wrap_text (aliases 'horizontal' and 'vertical' are accepted).",
            expected_fields: &[
                "op",
                "sheet",
                "cell or range",
                "horizontal_align/vertical_align/wrap_text",
            ],
            example: r#"{"op":"set_alignment","sheet":"Sheet1","range":"A1:B1","horizontal_align":"center"}"#,
        },
        PatchOpKind::SetStyle if message.contains("requires at least one style field") => Guidance {
            hint: "set_style needs at least one style attribute besides the target.",
            expected_fields: &[
                "op",
                "sheet",
                "cell or range",
                "bold/font_size/color/fill_color/horizontal_align/vertical_align/wrap_text",
            ],
            example: r##"{"op":"set_style","sheet":"Sheet1","range":"A1:B1","bold":true,"fill_color":"#D9E1F2","horizontal_align":"center"}"##,
        },
        PatchOpKind::CreateChart if message.contains("Invalid chart range reference") => Guidance {
            hint: "data_range and category_range must be A1 ranges; quote sheet names with spaces like 'Sheet Name'!A1:B10.",
            expected_fields: &["op", "sheet", "chart_type", "data_range", "anchor_cell"],
            example: r#"{"op":"create_chart","sheet":"Sheet1","chart_type":"line","data_range":["Sheet1!B2:B13","Sheet1!C2:C13"],"anchor_cell":"F2"}"#,
        },
        PatchOpKind::CreateChart if lowered.contains("sheet not found") => Guidance {
            hint: "Check the sheet prefix of the range; names with spaces must be quoted like 'Sheet Name'.",
            expected_fields: &["data_range/category_range"],
            example: r#"{"op":"create_chart","sheet":"Sheet1","chart_type":"line","data_range":"'Sales 2026'!B2:C13","anchor_cell":"F2"}"#,
        },
        PatchOpKind::ApplyTableStyle if lowered.contains("invalid table style") => Guidance {
            hint: "Use a built-in table style name such as TableStyleMedium2 or TableStyleLight9.",
            expected_fields: &["op", "sheet", "range", "style"],
            example: r#"{"op":"apply_table_style","sheet":"Sheet1","range":"A1:D11","style":"TableStyleMedium2"}"#,
        },
        PatchOpKind::ApplyTableStyle if lowered.contains("failed to add table") => Guidance {
            hint: "Make sure range is a contiguous A1 block with a header row and does not overlap another table.",
            expected_fields: &["op", "sheet", "range", "style"],
            example: r#"{"op":"apply_table_style","sheet":"Sheet1","range":"A1:D11","style":"TableStyleMedium2"}"#,
        },
        _ => return None,
    };
    Some(guidance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::model::{RangeOp, SetFillColorOp, Target};

    fn fill_op() -> PatchOp {
        PatchOp::SetFillColor(SetFillColorOp {
            sheet: "Sheet1".to_string(),
            target: Target::Cell("A1".to_string()),
            fill_color: "#FFFFFF".to_string(),
        })
    }

    #[test]
    fn known_messages_map_to_codes_and_fields() {
        assert_eq!(
            classify("Invalid chart range reference in category_range: X", false),
            ("invalid_range", Some("category_range"))
        );
        assert_eq!(
            classify("Chart data sheet not found: Foo", false),
            ("sheet_not_found", Some("data_range"))
        );
        assert_eq!(
            classify("Table name already exists: Sales", true),
            ("table_name_conflict", Some("table_name"))
        );
        assert_eq!(classify("boom (HRESULT 0x800A03EC)", true), ("com_runtime_error", None));
        assert_eq!(classify("boom", false), ("operation_failed", None));
    }

    #[test]
    fn host_codes_in_text_count_as_diagnostics() {
        let op = PatchOp::MergeCells(RangeOp {
            sheet: "S".to_string(),
            range: "A1:B1".to_string(),
        });
        let err = PatchOpError::new(0, &op, "automation call failed: -2147352567");
        assert!(err.is_host_runtime_error());
        let detail = err.detail();
        assert_eq!(detail.error_code.as_deref(), Some("com_runtime_error"));
        assert!(detail.raw_com_message.is_some());
        assert_eq!(detail.cell.as_deref(), Some("A1:B1"));
    }

    #[test]
    fn fill_color_mistake_gets_hint_and_example() {
        let err = PatchOpError::new(3, &fill_op(), "set_fill_color does not accept color.");
        let detail = err.detail();
        assert_eq!(detail.op_index, 3);
        assert!(detail.hint.is_some());
        assert!(detail.expected_fields.contains(&"fill_color".to_string()));
        assert!(detail.example_op.unwrap().contains("fill_color"));
        assert_eq!(detail.error_code.as_deref(), Some("operation_failed"));
    }

    #[test]
    fn automation_errors_in_chain_are_diagnostics() {
        let err = anyhow::Error::new(HostError::Automation {
            message: "Range.Merge failed".to_string(),
            code: Some(-2146827284),
        })
        .context("merge_cells failed");
        let op_err = PatchOpError::from_error(1, &fill_op(), &err);
        assert!(op_err.is_host_runtime_error());
        assert!(op_err.message.starts_with("merge_cells failed"));
    }

    #[test]
    fn validation_error_paths() {
        let err = OpValidationError::at(2, "bad").with_field("range");
        assert_eq!(err.path().as_deref(), Some("ops[2].range"));
        assert_eq!(OpValidationError::new("x").path(), None);
    }
}
