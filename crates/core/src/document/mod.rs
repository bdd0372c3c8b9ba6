//! Fiscal documents queued for delivery to the tax authority.
//!
//! A document is created once its signed XML has been stored, then driven by
//! the scheduler through the delivery state machine in [`transition`].

mod content;
mod sqlite_store;
mod store;
pub mod transition;
mod types;

pub use content::{analyze, ContentError, DocumentContent};
pub use sqlite_store::SqliteDocumentStore;
pub use store::{DocumentError, DocumentFilter, DocumentStore, DocumentUpdate, NewDocument};
pub use transition::{Outcome, Transition, TransitionError, TransitionPolicy};
pub use types::{Document, DocumentStatus, DocumentType, UnsupportedDocumentType};
