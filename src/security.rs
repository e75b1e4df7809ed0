use crate::errors::InvalidParamsError;
use anyhow::{Context, Result, anyhow};
use std::fs;
use std::path::{Path, PathBuf};

/// Canonicalize `candidate` and ensure it remains within `workspace_root`.
///
/// This is symlink-aware: we canonicalize both the workspace root and the candidate path.
///
/// If `candidate` does not exist, we canonicalize its parent directory and then re-join
/// the final path segment, which is sufficient for boundary enforcement prior to a write.
pub fn canonicalize_and_enforce_within_workspace(
    workspace_root: &Path,
    candidate: &Path,
    tool: &'static str,
    field: &'static str,
) -> Result<PathBuf> {
    let workspace_root = canonical_root(workspace_root)?;

    let canonical_candidate = if candidate.exists() {
        candidate.canonicalize().map_err(|e| {
            InvalidParamsError::at(tool, field, format!("{field} could not be canonicalized: {e}"))
        })?
    } else {
        let parent = candidate.parent().ok_or_else(|| {
            InvalidParamsError::at(tool, field, format!("{field} must have a parent directory"))
        })?;
        let file_name = candidate.file_name().ok_or_else(|| {
            InvalidParamsError::at(tool, field, format!("{field} must include a file name"))
        })?;

        let canonical_parent = parent.canonicalize().map_err(|e| {
            InvalidParamsError::at(tool, field, format!("{field} parent directory could not be canonicalized: {e}"))
        })?;

        canonical_parent.join(file_name)
    };

    enforce_within(&workspace_root, &canonical_candidate, tool, field)?;
    Ok(canonical_candidate)
}

/// Create `dir` (and missing ancestors) after checking that its nearest existing
/// ancestor lies inside `workspace_root`. Returns the canonical directory.
pub fn create_dir_within_workspace(
    workspace_root: &Path,
    dir: &Path,
    tool: &'static str,
    field: &'static str,
) -> Result<PathBuf> {
    let workspace_root = canonical_root(workspace_root)?;
    let existing = dir
        .ancestors()
        .find(|ancestor| ancestor.exists())
        .ok_or_else(|| {
            InvalidParamsError::at(tool, field, format!("{field} has no existing ancestor directory"))
        })?;
    let canonical_existing = existing.canonicalize().map_err(|e| {
        InvalidParamsError::at(tool, field, format!("{field} could not be canonicalized: {e}"))
    })?;
    let remainder = dir.strip_prefix(existing).unwrap_or(Path::new(""));
    if remainder
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(InvalidParamsError::at(tool, field, format!("{field} must not contain '..' segments"))
            .into());
    }
    enforce_within(&workspace_root, &canonical_existing.join(remainder), tool, field)?;

    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("failed to canonicalize {}", dir.display()))
}

fn canonical_root(workspace_root: &Path) -> Result<PathBuf> {
    workspace_root
        .canonicalize()
        .map_err(|e| anyhow!("failed to canonicalize workspace_root: {e}"))
}

fn enforce_within(workspace_root: &Path, candidate: &Path, tool: &'static str, field: &'static str) -> Result<()> {
    if !candidate.starts_with(workspace_root) {
        return Err(InvalidParamsError::at(tool, field, format!(
            "{field} must be within workspace_root after canonicalization (got '{}', workspace_root='{}')",
            candidate.display(),
            workspace_root.display(),
        ))
        .into());
    }
    Ok(())
}

/// Reduce a user-supplied output name to its final path segment.
///
/// Separators become `_` and `.`/`..` are replaced, so the result is always safe to join.
pub fn sanitize_filename_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_control() || ch == '/' || ch == '\\' {
            out.push('_');
        } else {
            out.push(ch);
        }
    }

    if out == "." || out == ".." {
        return "_".to_string();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_outside_workspace_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let err = canonicalize_and_enforce_within_workspace(
            root.path(),
            &other.path().join("book.xlsx"),
            "patch_workbook",
            "xlsx_path",
        )
        .unwrap_err();
        let invalid = err.downcast_ref::<InvalidParamsError>().unwrap();
        assert_eq!(invalid.path(), Some("xlsx_path"));
    }

    #[test]
    fn nested_output_dirs_are_created_inside_workspace() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("out").join("nested");
        let created = create_dir_within_workspace(root.path(), &dir, "patch_workbook", "out_dir").unwrap();
        assert!(created.is_dir());
        let escape = root.path().join("out").join("..").join("..").join("escape");
        assert!(create_dir_within_workspace(root.path(), &escape, "patch_workbook", "out_dir").is_err());
    }

    #[test]
    fn filename_components_lose_separators() {
        assert_eq!(sanitize_filename_component("a/b\\c.xlsx"), "a_b_c.xlsx");
        assert_eq!(sanitize_filename_component(".."), "_");
    }
}
