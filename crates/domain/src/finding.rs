use serde::{Deserialize, Serialize};

/// Structured code observation (spec §3). Created only by `update_findings`;
/// never mutated, only replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub issue_id: i64,
    pub synthesis: String,
    pub sources: Vec<FindingSource>,
    pub is_core: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSource {
    /// `"path:line"` or a symbol qualified name.
    pub location: String,
    pub excerpt: Option<String>,
}
