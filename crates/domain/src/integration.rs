use serde::{Deserialize, Serialize};

/// Out of scope is "organization/workspace/user CRUD", but `EngagementDetector`
/// and `EventIngestor` both read this record; its CRUD lives elsewhere
/// (spec §1 non-goals; SPEC_FULL §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub id: i64,
    pub workspace_id: i64,
    pub provider: String,
    pub external_project_id: Option<String>,
    pub enabled: bool,
    pub service_account: ServiceAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub username: String,
    pub user_id: String,
}
