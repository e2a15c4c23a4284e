mod engagement;
mod explore;
mod orchestrator;
mod planner;
mod specgen;
mod specstore;

pub use engagement::*;
pub use explore::*;
pub use orchestrator::*;
pub use planner::*;
pub use specgen::*;
pub use specstore::*;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shape the ambient config tree is read into. Loading (env/file discovery)
/// is an external collaborator (spec §1 non-goals); this crate only owns
/// the shape and a couple of convenience constructors for tests and for
/// whatever loader wraps this.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub explore: ExploreConfig,
    #[serde(default)]
    pub specgen: SpecGenConfig,
    #[serde(default)]
    pub specstore: SpecStoreConfig,
    #[serde(default)]
    pub engagement: EngagementConfig,
}

impl RelayConfig {
    pub fn from_str(s: &str) -> crate::error::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_str(&raw)
    }
}
