//! `code_graph` — the read-only code-graph retrieval interface spec §1
//! keeps external to this repo's scope. The ExploreAgent consumes only
//! this trait; [`NullCodeGraph`] stands in for the real extractor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use relay_domain::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeGraphHit {
    pub symbol: String,
    pub location: String,
    pub snippet: String,
}

#[async_trait]
pub trait CodeGraph: Send + Sync {
    async fn query(&self, q: &str) -> Result<Vec<CodeGraphHit>>;
}

/// Always returns no hits — the real extractor lives outside this
/// repo's scope (spec §1).
pub struct NullCodeGraph;

#[async_trait]
impl CodeGraph for NullCodeGraph {
    async fn query(&self, _q: &str) -> Result<Vec<CodeGraphHit>> {
        Ok(Vec::new())
    }
}
