//! Fiscal document numbering.
//!
//! Each (namespace, taxpayer, document type) owns one sequence of numeros
//! under a configured serie. Numbers are issued without gaps or repeats.

mod allocator;
mod sqlite_store;
mod store;
mod strategy;
mod types;

pub use allocator::SequentialAllocator;
pub use sqlite_store::SqliteFiscalNumberStore;
pub use store::FiscalNumberStore;
pub use strategy::{NumberingStrategy, StrategyKind, StrategyRegistry};
pub use types::{AllocationError, FiscalNumber, NumberKey};
