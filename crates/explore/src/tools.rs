//! ExploreAgent's five tools (spec §4.7, §6): `grep`, `glob`, `read_file`,
//! `bash`, `code_graph`. Generalizes the teacher's `sa_tools::exec`/
//! `file_ops` (process session bookkeeping, truncated+buffered output,
//! workspace-root path containment) to read-only, allowlisted commands
//! only — no arbitrary shell (SPEC_FULL §4.7).

use std::path::{Component, Path, PathBuf};

use regex::Regex;

use relay_domain::error::{Error, Result};

const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Directories never walked by `grep`/`glob` — build output and VCS
/// internals that would otherwise dominate every search.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", ".venv"];

fn validate_path(root: &Path, raw: &str) -> Result<PathBuf> {
    let rel = Path::new(raw);
    if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::Validation(format!("path escapes root: {raw}")));
    }
    Ok(root.join(rel))
}

/// Largest byte index `<= limit` that lands on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, limit: usize) -> usize {
    if limit >= s.len() {
        return s.len();
    }
    let mut idx = limit;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn truncate(mut s: String, byte_limit: usize) -> String {
    if s.len() <= byte_limit {
        return s;
    }
    let boundary = floor_char_boundary(&s, byte_limit);
    s.truncate(boundary);
    s.push_str(TRUNCATION_MARKER);
    s
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        if SKIP_DIRS.contains(&name.as_ref()) {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out);
        } else {
            out.push(path);
        }
    }
}

/// `read_file{path, max_bytes?}` — returns file contents truncated to
/// the per-tool byte limit, with an explicit truncation marker
/// (SPEC_FULL §4.7 determinism expectation).
pub fn read_file(root: &Path, path: &str, byte_limit: usize) -> Result<String> {
    let resolved = validate_path(root, path)?;
    let content = std::fs::read_to_string(&resolved)
        .map_err(|e| Error::Validation(format!("read_file {path}: {e}")))?;
    Ok(truncate(content, byte_limit))
}

/// `grep{pattern, path?}` — regex search across files under `root`
/// (or `root/path` when given), returning `path:line: text` per match.
pub fn grep(root: &Path, pattern: &str, path: Option<&str>, byte_limit: usize) -> Result<String> {
    let re = Regex::new(pattern).map_err(|e| Error::Validation(format!("bad grep pattern: {e}")))?;
    let search_root = match path {
        Some(p) => validate_path(root, p)?,
        None => root.to_path_buf(),
    };
    let mut files = Vec::new();
    if search_root.is_file() {
        files.push(search_root);
    } else {
        walk(root, &search_root, &mut files);
    }
    files.sort();

    let mut out = String::new();
    let mut matches = 0usize;
    for file in files {
        let Ok(content) = std::fs::read_to_string(&file) else {
            continue;
        };
        for (i, line) in content.lines().enumerate() {
            if re.is_match(line) {
                let rel = file.strip_prefix(root).unwrap_or(&file);
                out.push_str(&format!("{}:{}: {}\n", rel.display(), i + 1, line));
                matches += 1;
            }
        }
    }
    if matches == 0 {
        out.push_str("(no matches)");
    }
    Ok(truncate(out, byte_limit))
}

/// Translates a restricted glob (`*`, `**`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '|' | '^' | '$' | '[' | ']' | '{' | '}' | '\\' => {
                re.push('\\');
                re.push(c);
            }
            other => re.push(other),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::Validation(format!("bad glob pattern: {e}")))
}

/// `glob{pattern}` — lists relative paths under `root` matching a
/// `*`/`**`/`?` glob pattern.
pub fn glob(root: &Path, pattern: &str, byte_limit: usize) -> Result<String> {
    let re = glob_to_regex(pattern)?;
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();

    let mut out = String::new();
    let mut count = 0usize;
    for file in files {
        let rel = file.strip_prefix(root).unwrap_or(&file);
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if re.is_match(&rel_str) {
            out.push_str(&rel_str);
            out.push('\n');
            count += 1;
        }
    }
    if count == 0 {
        out.push_str("(no matches)");
    }
    Ok(truncate(out, byte_limit))
}

/// `bash{command}` — runs the command only if its first whitespace
/// token is in `allowlist` (spec §4.7: "whitelisted read-only
/// commands"); anything else is rejected before a process is ever
/// spawned.
pub async fn bash(root: &Path, command: &str, allowlist: &[String], byte_limit: usize) -> Result<String> {
    let program = command.split_whitespace().next().unwrap_or("");
    if !allowlist.iter().any(|a| a == program) {
        return Err(Error::Validation(format!(
            "command '{program}' is not in the read-only allowlist"
        )));
    }
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| Error::Validation(format!("bash exec failed: {e}")))?;
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.stderr.is_empty() {
        combined.push_str("\n--- stderr ---\n");
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    Ok(truncate(combined, byte_limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
        std::fs::create_dir_all(dir.path().join("src/sub")).unwrap();
        std::fs::write(dir.path().join("src/sub/lib.rs"), "pub fn helper() {}\n").unwrap();
        dir
    }

    #[test]
    fn read_file_rejects_traversal() {
        let dir = workspace();
        let err = read_file(dir.path(), "../etc/passwd", 1000).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn read_file_truncates_with_marker() {
        let dir = workspace();
        let out = read_file(dir.path(), "main.rs", 5).unwrap();
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn grep_finds_matches_with_relative_path_and_line_number() {
        let dir = workspace();
        let out = grep(dir.path(), "helper", None, 10_000).unwrap();
        assert!(out.contains("src/sub/lib.rs:1:"));
    }

    #[test]
    fn grep_reports_no_matches_explicitly() {
        let dir = workspace();
        let out = grep(dir.path(), "nonexistent_symbol_xyz", None, 10_000).unwrap();
        assert_eq!(out, "(no matches)");
    }

    #[test]
    fn glob_matches_nested_double_star() {
        let dir = workspace();
        let out = glob(dir.path(), "src/**/*.rs", 10_000).unwrap();
        assert!(out.contains("src/sub/lib.rs"));
        assert!(!out.contains("main.rs\n") || out.contains("src/sub/lib.rs"));
    }

    #[tokio::test]
    async fn bash_rejects_commands_outside_allowlist() {
        let dir = workspace();
        let allow = vec!["ls".to_string()];
        let err = bash(dir.path(), "rm -rf /", &allow, 1000).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn bash_runs_allowlisted_command() {
        let dir = workspace();
        let allow = vec!["ls".to_string()];
        let out = bash(dir.path(), "ls", &allow, 1000).await.unwrap();
        assert!(out.contains("main.rs"));
    }
}
