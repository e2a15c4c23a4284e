//! C1: `SpecStore` (spec §4.12, §6).
//!
//! Grounded directly on the teacher's `WorkspaceReader::read_file`
//! sha256 pattern (mtime+size+hash cache) for reads, and on the
//! write-tmp-then-rename atomic write the teacher's skills installer
//! uses when extracting tarballs, for writes (SPEC_FULL §4.12). Path
//! containment is checked by canonicalizing `root` once at construction
//! and verifying every write/read path's canonicalized parent starts
//! with it — the only defense spec §4.12 names against traversal.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use relay_domain::error::{Error, Result};
use relay_domain::spec_ref::SpecRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Summary,
    Full,
}

pub struct SpecStore {
    root: PathBuf,
    max_content_bytes: usize,
}

impl SpecStore {
    /// Canonicalizes `root`, creating it if missing, so every later
    /// containment check has a stable prefix to compare against.
    pub fn new(root: impl AsRef<Path>, max_content_bytes: usize) -> std::io::Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self {
            root,
            max_content_bytes,
        })
    }

    /// Lowercased title, non-alphanumerics collapsed to single hyphens,
    /// truncated to a filesystem-friendly length (spec §6).
    pub fn slugify(title: &str) -> String {
        let mut slug = String::new();
        let mut last_was_hyphen = true; // suppresses a leading hyphen
        for c in title.to_lowercase().chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c);
                last_was_hyphen = false;
            } else if !last_was_hyphen {
                slug.push('-');
                last_was_hyphen = true;
            }
        }
        let slug = slug.trim_end_matches('-');
        let truncated: String = slug.chars().take(60).collect();
        let truncated = truncated.trim_end_matches('-');
        if truncated.is_empty() {
            "untitled".to_string()
        } else {
            truncated.to_string()
        }
    }

    /// Sanitizes one path segment so it can never escape the directory
    /// it's joined into (no `/`, no `..`, no empty segment).
    fn sanitize_segment(raw: &str) -> String {
        let cleaned: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        if cleaned.is_empty() || cleaned.chars().all(|c| c == '-' || c == '.') {
            "x".to_string()
        } else {
            cleaned
        }
    }

    fn dir_name(issue_id: i64, provider: &str, external_issue_id: &str, slug: &str) -> String {
        format!(
            "issue_{}_{}_{}_{}",
            issue_id,
            Self::sanitize_segment(provider),
            Self::sanitize_segment(external_issue_id),
            Self::sanitize_segment(slug),
        )
    }

    fn resolve_within_root(&self, relative: &Path) -> Result<PathBuf> {
        let candidate = self.root.join(relative);
        let parent = candidate.parent().ok_or_else(|| {
            Error::Validation(format!("invalid spec path {}", relative.display()))
        })?;
        std::fs::create_dir_all(parent)?;
        let canon_parent = parent.canonicalize()?;
        if !canon_parent.starts_with(&self.root) {
            return Err(Error::Validation(format!(
                "spec path escapes root: {}",
                relative.display()
            )));
        }
        Ok(candidate)
    }

    /// Writes `content` under `{root}/issue_{id}_{provider}_{ext}_{slug}/spec.md`,
    /// via write-tmp-then-rename, and returns the resulting [`SpecRef`].
    /// Idempotent: a write that reproduces the current sha256 skips the
    /// rename and returns the existing ref unchanged (spec §4.12).
    pub fn write(
        &self,
        issue_id: i64,
        provider: &str,
        external_issue_id: &str,
        slug: &str,
        content: &str,
    ) -> Result<SpecRef> {
        if content.is_empty() || content.len() > self.max_content_bytes {
            return Err(Error::Validation(format!(
                "spec content length {} outside (0, {}] bytes",
                content.len(),
                self.max_content_bytes
            )));
        }

        let dir = Self::dir_name(issue_id, provider, external_issue_id, slug);
        let relative = Path::new(&dir).join("spec.md");
        let dest = self.resolve_within_root(&relative)?;

        let sha256 = sha256_hex(content.as_bytes());

        if dest.exists() {
            let existing = std::fs::read(&dest)?;
            if sha256_hex(&existing) == sha256 {
                return Ok(SpecRef::new(relative.to_string_lossy().to_string(), sha256));
            }
        }

        let tmp = dest.with_extension("md.tmp");
        std::fs::write(&tmp, content.as_bytes())?;
        std::fs::rename(&tmp, &dest)?;

        relay_domain::trace::TraceEvent::SpecWritten {
            issue_id,
            sha256: sha256.clone(),
            path: relative.to_string_lossy().to_string(),
        }
        .emit();

        Ok(SpecRef::new(relative.to_string_lossy().to_string(), sha256))
    }

    /// Reads the spec at `spec_ref.path`. `mode = Summary` returns only
    /// the first `max_chars` characters; `mode = Full` ignores `max_chars`.
    /// Rejects paths escaping `root`, and flags a sha256 mismatch as
    /// `Error::Corruption` (spec §7: "sha256 mismatch on SpecStore read").
    pub fn read(&self, spec_ref: &SpecRef, mode: ReadMode, max_chars: usize) -> Result<String> {
        let relative = Path::new(&spec_ref.path);
        if relative.is_absolute() || relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(Error::Validation(format!(
                "spec path escapes root: {}",
                spec_ref.path
            )));
        }
        let resolved = self.resolve_within_root(relative)?;
        let bytes = std::fs::read(&resolved)?;
        let actual_sha = sha256_hex(&bytes);
        if actual_sha != spec_ref.sha256 {
            return Err(Error::Corruption(format!(
                "sha256 mismatch reading {}: expected {}, got {}",
                spec_ref.path, spec_ref.sha256, actual_sha
            )));
        }
        let content = String::from_utf8_lossy(&bytes).into_owned();
        match mode {
            ReadMode::Full => Ok(content),
            ReadMode::Summary => {
                let limit = max_chars.min(content.len());
                let mut boundary = limit;
                while boundary > 0 && !content.is_char_boundary(boundary) {
                    boundary -= 1;
                }
                Ok(content[..boundary].to_string())
            }
        }
    }

    pub fn exists(&self, spec_ref: &SpecRef) -> bool {
        let relative = Path::new(&spec_ref.path);
        if relative.is_absolute() {
            return false;
        }
        self.root.join(relative).exists()
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SpecStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SpecStore::new(dir.path(), 200_000).unwrap();
        (store, dir)
    }

    #[test]
    fn slugify_collapses_and_truncates() {
        assert_eq!(SpecStore::slugify("Fix  Login!! Bug??"), "fix-login-bug");
        assert_eq!(SpecStore::slugify(""), "untitled");
        assert_eq!(SpecStore::slugify("---"), "untitled");
    }

    #[test]
    fn write_then_read_round_trips() {
        let (store, _dir) = store();
        let r = store
            .write(1, "gitlab", "42", "fix-login", "# Spec\n\nbody")
            .unwrap();
        assert!(store.exists(&r));
        let full = store.read(&r, ReadMode::Full, 0).unwrap();
        assert_eq!(full, "# Spec\n\nbody");
    }

    #[test]
    fn identical_rewrite_is_idempotent_same_sha256() {
        let (store, _dir) = store();
        let first = store.write(1, "gitlab", "42", "slug", "content").unwrap();
        let second = store.write(1, "gitlab", "42", "slug", "content").unwrap();
        assert_eq!(first.sha256, second.sha256);
    }

    #[test]
    fn traversal_in_external_issue_id_is_sanitized_not_escaping_root() {
        let (store, dir) = store();
        let r = store
            .write(1, "gitlab", "../../etc/passwd", "slug", "content")
            .unwrap();
        let resolved = dir.path().join(&r.path);
        assert!(resolved.starts_with(dir.path().canonicalize().unwrap()));
    }

    #[test]
    fn oversized_content_is_rejected() {
        let (store, _dir) = store();
        let big = "a".repeat(300_000);
        assert!(store.write(1, "gitlab", "42", "slug", &big).is_err());
    }

    #[test]
    fn summary_mode_truncates_to_max_chars() {
        let (store, _dir) = store();
        let r = store.write(1, "gitlab", "42", "slug", "0123456789").unwrap();
        let summary = store.read(&r, ReadMode::Summary, 4).unwrap();
        assert_eq!(summary, "0123");
    }

    #[test]
    fn tampered_file_is_reported_as_corruption() {
        let (store, dir) = store();
        let r = store.write(1, "gitlab", "42", "slug", "original").unwrap();
        std::fs::write(dir.path().join(&r.path), "tampered").unwrap();
        let err = store.read(&r, ReadMode::Full, 0).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }
}
