//! Planner context assembly (spec §4.5) — the user-message structured
//! document, plus the shared conversation-XML renderer re-exported from
//! `relay-domain` (used by both `relay-planner` and `relay-specgen`).

pub mod builder;
pub mod injection;
pub mod truncation;

pub use builder::{PlannerContextBuilder, SpecStub};
pub use relay_domain::conversation::render_conversation_xml;
