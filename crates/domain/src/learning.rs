use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningType {
    ProjectStandards,
    CodebaseStandards,
    DomainKnowledge,
}

/// Workspace-scoped reusable knowledge (spec §3), eligible for retrieval
/// in later issues within the same workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: i64,
    pub workspace_id: i64,
    #[serde(rename = "type")]
    pub kind: LearningType,
    pub content: String,
    pub source_context: String,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl Learning {
    /// De-duplication key used by `update_learnings` (spec §4.10: "de-duplicate
    /// by (type, content-hash)").
    pub fn dedupe_key(kind: LearningType, content: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{kind:?}").as_bytes());
        hasher.update(b"\0");
        hasher.update(content.trim().as_bytes());
        hex::encode(hasher.finalize())
    }
}
