//! C2: the `Stores` facade (spec §5 — "Stores are the only mutable
//! shared resource; all mutations pass through the transactional
//! runner"). Callers take `S: Stores` generically; there is no
//! `Arc<dyn Stores>` because `TransactionRunner::run_txn` is generic
//! over its closure and return type, which rules out a trait object
//! (see DESIGN.md).

pub mod mem;
pub mod sqlite;
pub mod traits;

pub use mem::MemStores;
pub use sqlite::SqliteStores;
pub use traits::{
    BoxFuture, EventLogInsertOutcome, EventLogStore, FindingStore, GapStore, IntegrationStore,
    IssueStatus, IssueStore, IssueUpsert, LearningStore, LlmEvalStore, NewEventLog, NewFindingRow,
    NewGapRow, NewLearningRow, StoreTxn, Stores, TransactionRunner,
};
