use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content-addressed handle to a stored markdown spec artifact (spec §3,
/// §6). This is the value serialized into `issues.spec`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpecRef {
    pub version: u32,
    pub backend: SpecBackend,
    pub path: String,
    pub updated_at: DateTime<Utc>,
    pub sha256: String,
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecBackend {
    Local,
    S3,
}

impl SpecRef {
    pub fn new(path: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            version: 1,
            backend: SpecBackend::Local,
            path: path.into(),
            updated_at: Utc::now(),
            sha256: sha256.into(),
            format: "markdown".to_string(),
        }
    }
}
