//! Section delimiters, generalized from `sa_contextpack::injection`'s
//! `format_workspace_section` to `format_issue_section` (SPEC_FULL §4.5).

pub fn format_section(name: &str, content: &str) -> String {
    format!("=== {name} ===\n{content}\n=== END_{name} ===\n")
}
