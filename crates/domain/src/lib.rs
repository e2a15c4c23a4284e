//! Shared types, error taxonomy, and action taxonomy for the Relay
//! thinking pipeline. Every other `relay-*` crate depends on this one;
//! it depends on nothing internal.

pub mod action;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event_log;
pub mod finding;
pub mod gap;
pub mod integration;
pub mod issue;
pub mod learning;
pub mod llm_eval;
pub mod mentions;
pub mod spec_ref;
pub mod trace;

pub use error::{Error, Result};
