use crate::patch::model::PatchOpKind;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::Serialize;
use strum::IntoEnumIterator;

/// Static vocabulary of one operation kind.
#[derive(Debug)]
pub struct OpSpec {
    pub kind: PatchOpKind,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub constraints: &'static [&'static str],
    pub example: &'static str,
    /// `(alias, canonical)` pairs resolved before validation.
    pub aliases: &'static [(&'static str, &'static str)],
    /// Display-only shorthand that expands into several fields.
    pub shorthand: Option<(&'static str, &'static str)>,
}

impl OpSpec {
    pub fn accepts(&self, field: &str) -> bool {
        field == "op" || self.required.contains(&field) || self.optional.contains(&field)
    }
}

const STYLE_TARGET: &str = "exactly one of cell or range";
const HEX_COLOR: &str = "hex color (#RRGGBB or #AARRGGBB)";

static OP_SPECS: &[OpSpec] = &[
    OpSpec {
        kind: PatchOpKind::SetValue,
        description: "Set a scalar value to one cell.",
        required: &["sheet", "cell", "value"],
        optional: &[],
        constraints: &[
            "cell target only",
            "use auto_formula=true to allow values starting with '='",
        ],
        example: r#"{"op":"set_value","sheet":"Sheet1","cell":"A1","value":"Hello"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetFormula,
        description: "Set one formula string to one cell.",
        required: &["sheet", "cell", "formula"],
        optional: &[],
        constraints: &["formula must start with '='"],
        example: r#"{"op":"set_formula","sheet":"Sheet1","cell":"B2","formula":"=SUM(B1:B10)"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::AddSheet,
        description: "Add a new worksheet by name.",
        required: &["sheet"],
        optional: &[],
        constraints: &["sheet name must be unique in workbook"],
        example: r#"{"op":"add_sheet","sheet":"Data"}"#,
        aliases: &[("name", "sheet")],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetRangeValues,
        description: "Set a 2D values matrix to a rectangular range.",
        required: &["sheet", "range", "values"],
        optional: &[],
        constraints: &["values shape must match range rows x cols"],
        example: r#"{"op":"set_range_values","sheet":"Sheet1","range":"A1:B2","values":[[1,2],[3,4]]}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::FillFormula,
        description: "Fill a base formula across target range.",
        required: &["sheet", "range", "base_cell", "formula"],
        optional: &[],
        constraints: &[
            "formula must start with '='",
            "range must be a single row or a single column",
        ],
        example: r#"{"op":"fill_formula","sheet":"Sheet1","range":"C2:C10","base_cell":"C2","formula":"=A2+B2"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetValueIf,
        description: "Set value when current value matches expected.",
        required: &["sheet", "cell", "expected", "value"],
        optional: &[],
        constraints: &["no-op when expected mismatch"],
        example: r#"{"op":"set_value_if","sheet":"Sheet1","cell":"A1","expected":"old","value":"new"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetFormulaIf,
        description: "Set formula when current value matches expected.",
        required: &["sheet", "cell", "expected", "formula"],
        optional: &[],
        constraints: &["formula must start with '='", "no-op when expected mismatch"],
        example: r#"{"op":"set_formula_if","sheet":"Sheet1","cell":"C5","expected":0,"formula":"=A5+B5"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::DrawGridBorder,
        description: "Draw thin black borders for a rectangular region.",
        required: &["sheet", "base_cell", "row_count", "col_count"],
        optional: &[],
        constraints: &["row_count > 0", "col_count > 0", "or use range shorthand alias"],
        example: r#"{"op":"draw_grid_border","sheet":"Sheet1","base_cell":"A1","row_count":5,"col_count":4}"#,
        aliases: &[],
        shorthand: Some(("range", "base_cell + row_count + col_count")),
    },
    OpSpec {
        kind: PatchOpKind::SetBold,
        description: "Apply bold font to one cell or one range.",
        required: &["sheet"],
        optional: &["cell", "range", "bold"],
        constraints: &[STYLE_TARGET],
        example: r#"{"op":"set_bold","sheet":"Sheet1","range":"A1:D1","bold":true}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetFontSize,
        description: "Apply font size to one cell or one range.",
        required: &["sheet", "font_size"],
        optional: &["cell", "range"],
        constraints: &[STYLE_TARGET, "font_size > 0"],
        example: r#"{"op":"set_font_size","sheet":"Sheet1","cell":"A1","font_size":14}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetFontColor,
        description: "Apply font color to one cell or one range.",
        required: &["sheet", "color"],
        optional: &["cell", "range"],
        constraints: &[STYLE_TARGET, HEX_COLOR],
        example: r##"{"op":"set_font_color","sheet":"Sheet1","range":"A1:D1","color":"#1F4E79"}"##,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetFillColor,
        description: "Apply fill color to one cell or one range.",
        required: &["sheet", "fill_color"],
        optional: &["cell", "range"],
        constraints: &[STYLE_TARGET, HEX_COLOR],
        example: r##"{"op":"set_fill_color","sheet":"Sheet1","range":"A1:D1","fill_color":"#D9E1F2"}"##,
        aliases: &[("color", "fill_color")],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetDimensions,
        description: "Set row height and/or column width.",
        required: &["sheet"],
        optional: &["rows", "columns", "row_height", "column_width"],
        constraints: &[
            "at least one of row_height or column_width",
            "row_height > 0, column_width > 0",
        ],
        example: r#"{"op":"set_dimensions","sheet":"Sheet1","rows":[1,2],"row_height":22,"columns":["A","B"],"column_width":18}"#,
        aliases: &[
            ("row", "rows"),
            ("col", "columns"),
            ("height", "row_height"),
            ("width", "column_width"),
        ],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::AutoFitColumns,
        description: "Auto-fit column widths with optional width bounds.",
        required: &["sheet"],
        optional: &["columns", "min_width", "max_width"],
        constraints: &[
            "columns optional (uses used columns when omitted)",
            "min_width > 0, max_width > 0 when provided",
            "min_width <= max_width when both are provided",
        ],
        example: r#"{"op":"auto_fit_columns","sheet":"Sheet1","columns":["A",2],"min_width":8,"max_width":40}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::MergeCells,
        description: "Merge one rectangular range.",
        required: &["sheet", "range"],
        optional: &[],
        constraints: &["range must be rectangular", "range must cover more than one cell"],
        example: r#"{"op":"merge_cells","sheet":"Sheet1","range":"A1:C1"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::UnmergeCells,
        description: "Unmerge merged cells intersecting range.",
        required: &["sheet", "range"],
        optional: &[],
        constraints: &["range must be rectangular"],
        example: r#"{"op":"unmerge_cells","sheet":"Sheet1","range":"A1:C1"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetAlignment,
        description: "Set alignment flags to one cell or one range.",
        required: &["sheet"],
        optional: &["cell", "range", "horizontal_align", "vertical_align", "wrap_text"],
        constraints: &[STYLE_TARGET, "specify at least one alignment field"],
        example: r#"{"op":"set_alignment","sheet":"Sheet1","range":"A1:D1","horizontal_align":"center","vertical_align":"center","wrap_text":true}"#,
        aliases: &[("horizontal", "horizontal_align"), ("vertical", "vertical_align")],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::SetStyle,
        description: "Apply multiple style attributes in one op.",
        required: &["sheet"],
        optional: &[
            "cell",
            "range",
            "bold",
            "font_size",
            "color",
            "fill_color",
            "horizontal_align",
            "vertical_align",
            "wrap_text",
        ],
        constraints: &[
            STYLE_TARGET,
            "specify at least one style field",
            "font_size > 0",
            "target cell count <= style limit",
        ],
        example: r##"{"op":"set_style","sheet":"Sheet1","range":"A1:D1","bold":true,"color":"#FFFFFF","fill_color":"#1F3864","horizontal_align":"center"}"##,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::ApplyTableStyle,
        description: "Create table and apply Excel table style.",
        required: &["sheet", "range", "style"],
        optional: &["table_name"],
        constraints: &[
            "range must include header row",
            "table name must be unique when provided",
            "range must not intersect existing table",
        ],
        example: r#"{"op":"apply_table_style","sheet":"Sheet1","range":"A1:D11","style":"TableStyleMedium9","table_name":"SalesTable"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::CreateChart,
        description: "Create a chart object from one or more source ranges (host backend only).",
        required: &["sheet", "chart_type", "data_range", "anchor_cell"],
        optional: &[
            "category_range",
            "chart_name",
            "width",
            "height",
            "titles_from_data",
            "series_from_rows",
            "chart_title",
            "x_axis_title",
            "y_axis_title",
        ],
        constraints: &[
            "chart_type: line, column, bar, area, pie, doughnut, scatter, radar",
            "data_range accepts one range or a list of ranges (optionally Sheet!A1:B2)",
            "not available with dry_run, return_inverse_ops, or preflight_formula_check",
        ],
        example: r#"{"op":"create_chart","sheet":"Sheet1","chart_type":"line","data_range":"A1:C10","anchor_cell":"E2","chart_title":"Trend"}"#,
        aliases: &[],
        shorthand: None,
    },
    OpSpec {
        kind: PatchOpKind::RestoreDesignSnapshot,
        description: "Internal inverse op to restore style snapshot.",
        required: &["sheet", "design_snapshot"],
        optional: &[],
        constraints: &["internal use for inverse operations"],
        example: r#"{"op":"restore_design_snapshot","sheet":"Sheet1","design_snapshot":{"fonts":[]}}"#,
        aliases: &[],
        shorthand: None,
    },
];

pub fn op_spec(kind: PatchOpKind) -> &'static OpSpec {
    OP_SPECS
        .iter()
        .find(|spec| spec.kind == kind)
        .unwrap_or(&OP_SPECS[0])
}

pub fn alias_map(kind: PatchOpKind) -> &'static [(&'static str, &'static str)] {
    op_spec(kind).aliases
}

pub fn op_names() -> Vec<&'static str> {
    PatchOpKind::iter().map(<&'static str>::from).collect()
}

/// Chart type names with their host automation identifiers.
pub const CHART_TYPES: &[(&str, i32)] = &[
    ("line", 4),
    ("column", 51),
    ("bar", 57),
    ("area", 1),
    ("pie", 5),
    ("doughnut", -4120),
    ("scatter", -4169),
    ("radar", -4151),
];

const CHART_TYPE_ALIASES: &[(&str, &str)] = &[
    ("column_clustered", "column"),
    ("bar_clustered", "bar"),
    ("xy_scatter", "scatter"),
    ("donut", "doughnut"),
];

pub fn supported_chart_types_csv() -> String {
    CHART_TYPES
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn normalize_chart_type(value: &str) -> Option<&'static str> {
    let candidate = value.trim().to_ascii_lowercase();
    let canonical = CHART_TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == candidate)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(candidate.as_str());
    CHART_TYPES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(name, _)| *name)
}

pub fn chart_type_id(value: &str) -> Option<i32> {
    let canonical = normalize_chart_type(value)?;
    CHART_TYPES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, id)| *id)
}

/// Display form of an [`OpSpec`] returned by `list_patch_ops`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PatchOpSchema {
    pub op: PatchOpKind,
    pub description: String,
    pub required: Vec<String>,
    pub optional: Vec<String>,
    pub constraints: Vec<String>,
    pub example: serde_json::Value,
    pub aliases: IndexMap<String, String>,
}

impl PatchOpSchema {
    /// Applies the top-level sheet resolution notes to the raw spec.
    pub fn from_spec(spec: &OpSpec) -> Self {
        let is_add_sheet = spec.kind == PatchOpKind::AddSheet;
        let required = spec
            .required
            .iter()
            .map(|field| {
                if *field == "sheet" && !is_add_sheet {
                    "sheet (or top-level sheet)".to_string()
                } else {
                    (*field).to_string()
                }
            })
            .collect();
        let mut constraints: Vec<String> =
            spec.constraints.iter().map(|c| (*c).to_string()).collect();
        if is_add_sheet {
            constraints.push("top-level sheet is not used for add_sheet".to_string());
        } else {
            constraints.push("op.sheet overrides top-level sheet when both are set".to_string());
        }
        let mut aliases: IndexMap<String, String> = spec
            .aliases
            .iter()
            .map(|(alias, canonical)| ((*alias).to_string(), (*canonical).to_string()))
            .collect();
        if let Some((alias, expansion)) = spec.shorthand {
            aliases.insert(alias.to_string(), expansion.to_string());
        }
        aliases.sort_keys();

        Self {
            op: spec.kind,
            description: spec.description.to_string(),
            required,
            optional: spec.optional.iter().map(|f| (*f).to_string()).collect(),
            constraints,
            example: serde_json::from_str(spec.example).unwrap_or(serde_json::Value::Null),
            aliases,
        }
    }
}

pub fn list_patch_op_schemas() -> Vec<PatchOpSchema> {
    PatchOpKind::iter()
        .map(|kind| PatchOpSchema::from_spec(op_spec(kind)))
        .collect()
}

/// Human-readable summary embedded in the server instructions.
pub fn build_mini_schema_text() -> String {
    let mut lines = vec![
        "Mini op schema (required/optional/constraints/example/aliases):".to_string(),
        "Sheet resolution: non-add_sheet ops allow top-level sheet fallback; op.sheet overrides top-level sheet.".to_string(),
    ];
    let or_none = |items: &[String]| {
        if items.is_empty() {
            "(none)".to_string()
        } else {
            items.join(", ")
        }
    };
    for schema in list_patch_op_schemas() {
        lines.push(format!("- {}: {}", schema.op, schema.description));
        lines.push(format!("  required: {}", or_none(&schema.required)));
        lines.push(format!("  optional: {}", or_none(&schema.optional)));
        lines.push(format!("  constraints: {}", or_none(&schema.constraints)));
        lines.push(format!("  example: {}", schema.example));
        let aliases = schema
            .aliases
            .iter()
            .map(|(alias, canonical)| format!("{alias} -> {canonical}"))
            .collect::<Vec<_>>();
        lines.push(format!("  aliases: {}", or_none(&aliases)));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_spec_with_parseable_example() {
        for kind in PatchOpKind::iter() {
            let spec = op_spec(kind);
            assert_eq!(spec.kind, kind);
            let example: serde_json::Value = serde_json::from_str(spec.example).unwrap();
            assert_eq!(example["op"], kind.as_ref());
        }
    }

    #[test]
    fn chart_type_aliases_resolve() {
        assert_eq!(normalize_chart_type(" Donut "), Some("doughnut"));
        assert_eq!(chart_type_id("xy_scatter"), Some(-4169));
        assert_eq!(normalize_chart_type("bubble"), None);
        assert!(supported_chart_types_csv().starts_with("line, column"));
    }

    #[test]
    fn display_schema_marks_top_level_sheet_fallback() {
        let schemas = list_patch_op_schemas();
        let set_value = schemas.iter().find(|s| s.op == PatchOpKind::SetValue).unwrap();
        assert_eq!(set_value.required[0], "sheet (or top-level sheet)");
        let add_sheet = schemas.iter().find(|s| s.op == PatchOpKind::AddSheet).unwrap();
        assert_eq!(add_sheet.required[0], "sheet");
        assert_eq!(add_sheet.aliases.get("name").map(String::as_str), Some("sheet"));
        let border = schemas
            .iter()
            .find(|s| s.op == PatchOpKind::DrawGridBorder)
            .unwrap();
        assert!(border.aliases.contains_key("range"));
    }
}
