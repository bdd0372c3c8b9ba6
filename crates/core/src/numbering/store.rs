//! Fiscal number storage trait.

use super::types::{AllocationError, FiscalNumber, NumberKey};

/// Trait for fiscal number storage backends.
///
/// Rows are only ever written through `insert_first` and `compare_and_set`,
/// so every change is a conditional write that fails rather than overwrites.
pub trait FiscalNumberStore: Send + Sync {
    /// Current state of a sequence.
    fn find(&self, key: &NumberKey) -> Result<Option<FiscalNumber>, AllocationError>;

    /// Create a sequence. Returns `false` when the key already exists.
    fn insert_first(&self, number: &FiscalNumber) -> Result<bool, AllocationError>;

    /// Store `numero` if the row is still at `expected_version`, bumping the
    /// version. Returns `false` when another writer got there first.
    fn compare_and_set(
        &self,
        key: &NumberKey,
        expected_version: u32,
        numero: u32,
    ) -> Result<bool, AllocationError>;
}
