//! C8: `ExploreAgent` (spec §4.7) — a bounded code-retrieval sub-agent
//! the Planner calls inline via its `explore` tool.

pub mod agent;
pub mod code_graph;
pub mod tools;

pub use agent::{ExploreAgent, ExploreReport};
pub use code_graph::{CodeGraph, CodeGraphHit, NullCodeGraph};
