//! Request-shape normalization that runs before validation.
//!
//! The stages are independent and applied in order: string coercion, alias
//! resolution, `draw_grid_border` range shorthand expansion, then top-level
//! sheet defaulting.

use crate::a1::parse_range_geometry;
use crate::patch::errors::OpValidationError;
use crate::patch::model::PatchOpKind;
use crate::patch::schema::alias_map;
use serde_json::{Map, Value};
use std::str::FromStr;

pub type RawOp = Map<String, Value>;

const OBJECT_FORM_EXAMPLE: &str = r#"{"op":"set_value","sheet":"Sheet1","cell":"A1","value":"sample"}"#;

pub fn build_patch_op_error_message(index: usize, reason: &str) -> String {
    format!(
        "Invalid patch operation at ops[{index}]: {reason}. Use object form like {OBJECT_FORM_EXAMPLE}."
    )
}

pub fn build_missing_sheet_message(index: usize, op_name: &str) -> String {
    let target = if op_name.is_empty() { "<unknown>" } else { op_name };
    format!(
        "ops[{index}] ({target}) is missing sheet. Set op.sheet, or set top-level sheet for non-add_sheet ops. For add_sheet, op.sheet (or alias name) is required."
    )
}

/// Run every normalization stage over a request's op list.
pub fn normalize_ops(ops: Vec<Value>, top_level_sheet: Option<&str>) -> Result<Vec<RawOp>, OpValidationError> {
    let top_level_sheet = normalize_top_level_sheet(top_level_sheet);
    let mut out = Vec::with_capacity(ops.len());
    for (index, raw) in ops.into_iter().enumerate() {
        let mut op = coerce_patch_op(raw, index)?;
        resolve_aliases(&mut op, index)?;
        expand_grid_border_shorthand(&mut op, index)?;
        resolve_sheet(&mut op, index, top_level_sheet.as_deref())?;
        out.push(op);
    }
    Ok(out)
}

pub fn normalize_top_level_sheet(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .map(str::to_string)
}

/// Accept an object, or a string holding a JSON object.
pub fn coerce_patch_op(raw: Value, index: usize) -> Result<RawOp, OpValidationError> {
    let invalid = |reason: &str| {
        OpValidationError::at(index, build_patch_op_error_message(index, reason))
    };
    match raw {
        Value::Object(map) => Ok(map),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(invalid("empty string"));
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(invalid("JSON value must be an object")),
                Err(_) => Err(invalid("invalid JSON")),
            }
        }
        _ => Err(invalid("operation must be an object")),
    }
}

pub fn op_kind_of(op: &RawOp) -> Option<PatchOpKind> {
    op.get("op")
        .and_then(Value::as_str)
        .and_then(|name| PatchOpKind::from_str(name).ok())
}

/// Rename alias keys to their canonical names for the op's kind.
pub fn resolve_aliases(op: &mut RawOp, index: usize) -> Result<(), OpValidationError> {
    let Some(kind) = op_kind_of(op) else {
        return Ok(());
    };
    for (alias, canonical) in alias_map(kind) {
        let Some(alias_value) = op.remove(*alias) else {
            continue;
        };
        match op.get(*canonical) {
            Some(existing) if existing != &alias_value => {
                return Err(OpValidationError::at(
                    index,
                    build_patch_op_error_message(
                        index,
                        &format!("conflicting fields: '{canonical}' and alias '{alias}'"),
                    ),
                )
                .with_field(*canonical));
            }
            Some(_) => {}
            None => {
                op.insert((*canonical).to_string(), alias_value);
            }
        }
    }
    Ok(())
}

/// Expand `draw_grid_border` `range` into `base_cell` + `row_count` + `col_count`.
pub fn expand_grid_border_shorthand(op: &mut RawOp, index: usize) -> Result<(), OpValidationError> {
    if op_kind_of(op) != Some(PatchOpKind::DrawGridBorder) || !op.contains_key("range") {
        return Ok(());
    }
    let fail = |reason: &str| {
        OpValidationError::at(index, build_patch_op_error_message(index, reason)).with_field("range")
    };
    if ["base_cell", "row_count", "col_count"]
        .iter()
        .any(|key| op.contains_key(*key))
    {
        return Err(fail(
            "draw_grid_border does not allow mixing 'range' with 'base_cell/row_count/col_count'",
        ));
    }
    let Some(range) = op.get("range").and_then(Value::as_str) else {
        return Err(fail("draw_grid_border range must be a string A1 range"));
    };
    let (start, rows, cols) =
        parse_range_geometry(range).map_err(|_| fail("draw_grid_border range must be like 'A1:C3'"))?;
    op.remove("range");
    op.insert("base_cell".to_string(), Value::String(start));
    op.insert("row_count".to_string(), Value::from(rows));
    op.insert("col_count".to_string(), Value::from(cols));
    Ok(())
}

/// Fill a missing op sheet from the request default. `add_sheet` never defaults.
pub fn resolve_sheet(
    op: &mut RawOp,
    index: usize,
    top_level_sheet: Option<&str>,
) -> Result<(), OpValidationError> {
    let op_name = op.get("op").and_then(Value::as_str).unwrap_or("").to_string();
    let has_sheet = op.get("sheet").is_some_and(|v| !v.is_null());
    if has_sheet {
        return Ok(());
    }
    let missing = || {
        OpValidationError::at(index, build_missing_sheet_message(index, &op_name)).with_field("sheet")
    };
    if op_name == PatchOpKind::AddSheet.as_ref() {
        return Err(missing());
    }
    let Some(sheet) = top_level_sheet else {
        return Err(missing());
    };
    op.insert("sheet".to_string(), Value::String(sheet.to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one(op: Value, sheet: Option<&str>) -> Result<RawOp, OpValidationError> {
        normalize_ops(vec![op], sheet).map(|mut ops| ops.remove(0))
    }

    #[test]
    fn json_string_ops_are_parsed() {
        let op = one(
            json!(r#"{"op":"set_value","sheet":"S","cell":"A1","value":1}"#),
            None,
        )
        .unwrap();
        assert_eq!(op["cell"], "A1");

        let err = one(json!("[1,2]"), None).unwrap_err();
        assert!(err.to_string().contains("JSON value must be an object"));
        let err = one(json!("  "), None).unwrap_err();
        assert!(err.to_string().starts_with("Invalid patch operation at ops[0]: empty string"));
    }

    #[test]
    fn aliases_rename_or_conflict() {
        let op = one(json!({"op":"set_dimensions","sheet":"S","col":["A"],"width":12}), None).unwrap();
        assert_eq!(op["columns"], json!(["A"]));
        assert_eq!(op["column_width"], json!(12));
        assert!(!op.contains_key("width"));

        let same = one(json!({"op":"set_fill_color","sheet":"S","cell":"A1","color":"#FFFFFF","fill_color":"#FFFFFF"}), None).unwrap();
        assert!(!same.contains_key("color"));

        let err = one(json!({"op":"set_fill_color","sheet":"S","cell":"A1","color":"#000000","fill_color":"#FFFFFF"}), None).unwrap_err();
        assert!(err.to_string().contains("conflicting fields: 'fill_color' and alias 'color'"));
    }

    #[test]
    fn aliases_are_scoped_to_their_kind() {
        let op = one(json!({"op":"set_font_color","sheet":"S","cell":"A1","color":"#000000"}), None).unwrap();
        assert_eq!(op["color"], "#000000");
        assert!(!op.contains_key("fill_color"));
    }

    #[test]
    fn grid_border_range_shorthand_expands() {
        let op = one(json!({"op":"draw_grid_border","sheet":"S","range":"c3:a1"}), None).unwrap();
        assert_eq!(op["base_cell"], "A1");
        assert_eq!(op["row_count"], 3);
        assert_eq!(op["col_count"], 3);
        assert!(!op.contains_key("range"));

        let err = one(json!({"op":"draw_grid_border","sheet":"S","range":"A1:B2","row_count":2}), None).unwrap_err();
        assert!(err.to_string().contains("does not allow mixing"));
    }

    #[test]
    fn top_level_sheet_fills_gaps_but_not_add_sheet() {
        let op = one(json!({"op":"set_value","cell":"A1","value":"x"}), Some(" Data ")).unwrap();
        assert_eq!(op["sheet"], "Data");

        let op = one(json!({"op":"set_value","sheet":"Own","cell":"A1","value":"x"}), Some("Data")).unwrap();
        assert_eq!(op["sheet"], "Own");

        let err = one(json!({"op":"add_sheet"}), Some("Data")).unwrap_err();
        assert!(err.to_string().starts_with("ops[0] (add_sheet) is missing sheet."));

        let op = one(json!({"op":"add_sheet","name":"New"}), None).unwrap();
        assert_eq!(op["sheet"], "New");

        let err = one(json!({"op":"set_bold","cell":"A1"}), Some("   ")).unwrap_err();
        assert!(err.to_string().contains("(set_bold) is missing sheet"));
    }
}
