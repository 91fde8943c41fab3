//! Message synchronization
//!
//! [`MessageList`] keeps one conversation's messages ordered and
//! de-duplicated; [`MessageSyncEngine`] feeds it from initial loads and the
//! live push channel.

pub mod engine;
pub mod list;

pub use engine::{IngestOrigin, IngestOutcome, LoadOutcome, MessageSyncEngine};
pub use list::{InsertOutcome, MessageList, ReconcileOutcome};
