use crate::patch::model::{FormulaIssue, FormulaIssueCode, FormulaIssueLevel};

const ERROR_TOKENS: &[(&str, FormulaIssueCode, FormulaIssueLevel)] = &[
    ("#REF!", FormulaIssueCode::RefError, FormulaIssueLevel::Error),
    ("#NAME?", FormulaIssueCode::NameError, FormulaIssueLevel::Error),
    ("#DIV/0!", FormulaIssueCode::Div0Error, FormulaIssueLevel::Error),
    ("#VALUE!", FormulaIssueCode::ValueError, FormulaIssueLevel::Error),
    ("#N/A", FormulaIssueCode::NaError, FormulaIssueLevel::Warning),
];

/// Scan one formula's text for error literals and a doubled `=`.
pub fn scan_formula(sheet: &str, cell: &str, formula: &str) -> Vec<FormulaIssue> {
    let normalized = formula.to_ascii_uppercase();
    let mut issues = Vec::new();
    let issue = |level, code, message: String| FormulaIssue {
        sheet: sheet.to_string(),
        cell: cell.to_string(),
        level,
        code,
        message,
    };
    if normalized.contains("==") {
        issues.push(issue(
            FormulaIssueLevel::Warning,
            FormulaIssueCode::InvalidToken,
            "Formula contains duplicated '=' token.".to_string(),
        ));
    }
    for (token, code, level) in ERROR_TOKENS {
        if normalized.contains(token) {
            issues.push(issue(
                *level,
                *code,
                format!("Formula contains error token {token}."),
            ));
        }
    }
    issues
}

pub fn has_errors(issues: &[FormulaIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == FormulaIssueLevel::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_tokens_are_reported_with_levels() {
        let issues = scan_formula("Sheet1", "B2", "=SUM(#REF!)+IFERROR(X,#N/A)");
        let codes: Vec<_> = issues.iter().map(|i| (i.code, i.level)).collect();
        assert_eq!(
            codes,
            vec![
                (FormulaIssueCode::RefError, FormulaIssueLevel::Error),
                (FormulaIssueCode::NaError, FormulaIssueLevel::Warning),
            ]
        );
        assert!(has_errors(&issues));
    }

    #[test]
    fn doubled_equals_is_only_a_warning() {
        let issues = scan_formula("S", "A1", "==A2");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, FormulaIssueCode::InvalidToken);
        assert!(!has_errors(&issues));
    }

    #[test]
    fn clean_formula_has_no_issues() {
        assert!(scan_formula("S", "A1", "=A2+1").is_empty());
    }
}
