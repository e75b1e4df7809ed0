use crate::a1::CellAddress;
use anyhow::{Result, anyhow, bail};
use formualizer_parse::parser::ReferenceType;
use formualizer_parse::pretty::canonical_formula;
use formualizer_parse::{ASTNode, ASTNodeType};

pub fn parse_formula(formula: &str) -> Result<ASTNode> {
    let trimmed = formula.trim();
    let with_equals = if trimmed.starts_with('=') {
        trimmed.to_string()
    } else {
        format!("={trimmed}")
    };
    formualizer_parse::parse(&with_equals)
        .map_err(|e| anyhow!("failed to parse formula '{formula}': {}", e.message))
}

/// Rewrite `formula`, written for `origin`, as it would read when copied to `target`.
/// Absolute references keep their position.
pub fn translate_formula(formula: &str, origin: CellAddress, target: CellAddress) -> Result<String> {
    if origin == target {
        return Ok(formula.to_string());
    }
    let ast = parse_formula(formula)?;
    let delta_col = target.col as i64 - origin.col as i64;
    let delta_row = target.row as i64 - origin.row as i64;
    let shifted = shift_formula_ast(&ast, delta_col as i32, delta_row as i32)?;
    Ok(if shifted.starts_with('=') {
        shifted
    } else {
        format!("={shifted}")
    })
}

pub fn shift_formula_ast(ast: &ASTNode, delta_col: i32, delta_row: i32) -> Result<String> {
    let mut shifted = ast.clone();
    shift_refs_in_place(&mut shifted, delta_col, delta_row)?;
    Ok(canonical_formula(&shifted))
}

fn shift_refs_in_place(node: &mut ASTNode, delta_col: i32, delta_row: i32) -> Result<()> {
    match &mut node.node_type {
        ASTNodeType::Reference {
            original,
            reference,
        } => {
            shift_reference_in_place(original, reference, delta_col, delta_row)?;
        }
        ASTNodeType::UnaryOp { expr, .. } => {
            shift_refs_in_place(expr, delta_col, delta_row)?;
        }
        ASTNodeType::BinaryOp { left, right, .. } => {
            shift_refs_in_place(left, delta_col, delta_row)?;
            shift_refs_in_place(right, delta_col, delta_row)?;
        }
        ASTNodeType::Function { args, .. } => {
            for arg in args.iter_mut() {
                shift_refs_in_place(arg, delta_col, delta_row)?;
            }
        }
        ASTNodeType::Array(rows) => {
            for row in rows.iter_mut() {
                for cell in row.iter_mut() {
                    shift_refs_in_place(cell, delta_col, delta_row)?;
                }
            }
        }
        ASTNodeType::Literal(_) => {}
    }
    Ok(())
}

fn shift_reference_in_place(
    original: &mut String,
    reference: &mut ReferenceType,
    delta_col: i32,
    delta_row: i32,
) -> Result<()> {
    match reference {
        ReferenceType::Cell {
            row,
            col,
            row_abs,
            col_abs,
            ..
        } => {
            *col = shift_u32(*col, *col_abs, delta_col)?;
            *row = shift_u32(*row, *row_abs, delta_row)?;
        }
        ReferenceType::Range {
            start_row,
            start_col,
            end_row,
            end_col,
            start_row_abs,
            start_col_abs,
            end_row_abs,
            end_col_abs,
            ..
        } => {
            *start_col = shift_opt_u32(*start_col, *start_col_abs, delta_col)?;
            *end_col = shift_opt_u32(*end_col, *end_col_abs, delta_col)?;
            *start_row = shift_opt_u32(*start_row, *start_row_abs, delta_row)?;
            *end_row = shift_opt_u32(*end_row, *end_row_abs, delta_row)?;
        }
        ReferenceType::Table(_) | ReferenceType::NamedRange(_) | ReferenceType::External(_) => {}
    }
    *original = reference.to_string();
    Ok(())
}

fn shift_u32(value: u32, abs: bool, delta: i32) -> Result<u32> {
    if abs || delta == 0 {
        return Ok(value);
    }
    let shifted = value as i64 + delta as i64;
    if shifted < 1 {
        bail!("fill would move a reference before A1");
    }
    Ok(shifted as u32)
}

fn shift_opt_u32(value: Option<u32>, abs: bool, delta: i32) -> Result<Option<u32>> {
    value.map(|v| shift_u32(v, abs, delta)).transpose()
}
