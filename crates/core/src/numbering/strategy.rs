//! Numbering strategies and their registry.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::NumberingConfig;
use crate::document::DocumentType;

use super::{AllocationError, FiscalNumber, FiscalNumberStore, SequentialAllocator};

/// Strategy identifiers accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Numbers issued by [`SequentialAllocator`].
    Sequential,
    /// The caller supplies the number; nothing is allocated.
    None,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Sequential => "sequential",
            StrategyKind::None => "none",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(StrategyKind::Sequential),
            "none" => Ok(StrategyKind::None),
            other => Err(AllocationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A resolved numbering strategy.
#[derive(Clone)]
pub enum NumberingStrategy {
    Sequential(Arc<SequentialAllocator>),
    None,
}

impl NumberingStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            NumberingStrategy::Sequential(_) => StrategyKind::Sequential,
            NumberingStrategy::None => StrategyKind::None,
        }
    }

    /// Allocate a number, or `None` when the strategy does not number documents.
    pub fn allocate(
        &self,
        namespace: &str,
        taxpayer_id: &str,
        document_type: DocumentType,
    ) -> Result<Option<FiscalNumber>, AllocationError> {
        match self {
            NumberingStrategy::Sequential(allocator) => allocator
                .allocate(namespace, taxpayer_id, document_type)
                .map(Some),
            NumberingStrategy::None => Ok(None),
        }
    }
}

impl std::fmt::Debug for NumberingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// Strategy per document type, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    default: NumberingStrategy,
    by_type: HashMap<DocumentType, NumberingStrategy>,
}

impl StrategyRegistry {
    pub fn from_config(
        config: &NumberingConfig,
        store: Arc<dyn FiscalNumberStore>,
    ) -> Result<Self, AllocationError> {
        let sequential = Arc::new(SequentialAllocator::new(store, config));
        let build = |kind: StrategyKind| match kind {
            StrategyKind::Sequential => NumberingStrategy::Sequential(Arc::clone(&sequential)),
            StrategyKind::None => NumberingStrategy::None,
        };

        let default = build(config.default_strategy.parse()?);

        let mut by_type = HashMap::new();
        for (document_type, strategy) in &config.strategies {
            let document_type: DocumentType = document_type.parse()?;
            by_type.insert(document_type, build(strategy.parse()?));
        }

        Ok(Self { default, by_type })
    }

    pub fn resolve(&self, document_type: DocumentType) -> &NumberingStrategy {
        self.by_type.get(&document_type).unwrap_or(&self.default)
    }

    /// Allocate through the strategy configured for `document_type`.
    pub fn allocate(
        &self,
        namespace: &str,
        taxpayer_id: &str,
        document_type: &str,
    ) -> Result<Option<FiscalNumber>, AllocationError> {
        let document_type: DocumentType = document_type.parse()?;
        self.resolve(document_type)
            .allocate(namespace, taxpayer_id, document_type)
    }
}
