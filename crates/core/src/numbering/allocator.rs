//! Gap-free sequential number allocation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::NumberingConfig;
use crate::document::DocumentType;
use crate::metrics;

use super::{AllocationError, FiscalNumber, FiscalNumberStore, NumberKey};

/// Issues strictly increasing numeros per (namespace, taxpayer, document type).
///
/// Allocation is read-increment-write guarded by the row version. A writer
/// that loses the race re-reads and tries again, up to
/// `max_conflict_retries` extra attempts.
pub struct SequentialAllocator {
    store: Arc<dyn FiscalNumberStore>,
    config: NumberingConfig,
}

impl SequentialAllocator {
    pub fn new(store: Arc<dyn FiscalNumberStore>, config: &NumberingConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Allocate the next number for a key.
    pub fn allocate(
        &self,
        namespace: &str,
        taxpayer_id: &str,
        document_type: DocumentType,
    ) -> Result<FiscalNumber, AllocationError> {
        let key = NumberKey::new(namespace, taxpayer_id, document_type);
        let attempts = self.config.max_conflict_retries.saturating_add(1);

        for attempt in 1..=attempts {
            if let Some(number) = self.try_allocate(&key)? {
                metrics::NUMBERS_ALLOCATED
                    .with_label_values(&[document_type.as_str()])
                    .inc();
                debug!(
                    key = %key,
                    serie = %number.serie,
                    numero = number.numero,
                    attempt,
                    "Allocated fiscal number"
                );
                return Ok(number);
            }

            metrics::ALLOCATION_CONFLICTS.inc();
            debug!(key = %key, attempt, "Allocation conflict, retrying");
            std::thread::yield_now();
        }

        warn!(key = %key, attempts, "Allocation abandoned after repeated conflicts");
        Err(AllocationError::Conflict { attempts })
    }

    /// One optimistic attempt. `None` means another writer won the race.
    fn try_allocate(&self, key: &NumberKey) -> Result<Option<FiscalNumber>, AllocationError> {
        match self.store.find(key)? {
            None => {
                let first = FiscalNumber::first(key, self.config.serie_for(key.document_type.as_str()));
                if self.store.insert_first(&first)? {
                    info!(key = %key, serie = %first.serie, "Started numbering sequence");
                    Ok(Some(first))
                } else {
                    Ok(None)
                }
            }
            Some(current) => {
                let numero = current
                    .numero
                    .checked_add(1)
                    .ok_or_else(|| AllocationError::Exhausted(key.to_string()))?;
                let version = current.version.wrapping_add(1);

                if self.store.compare_and_set(key, current.version, numero)? {
                    Ok(Some(FiscalNumber {
                        numero,
                        version,
                        ..current
                    }))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
