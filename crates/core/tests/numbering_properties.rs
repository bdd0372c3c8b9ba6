//! Numbering integration tests.
//!
//! These tests run the allocator against a file-backed SQLite store, the way
//! the daemon uses it.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use courier_core::config::NumberingConfig;
use courier_core::document::DocumentType;
use courier_core::{FiscalNumberStore, SequentialAllocator, SqliteFiscalNumberStore, StrategyRegistry};

const RUC: &str = "20123456789";

struct TestHarness {
    store: Arc<SqliteFiscalNumberStore>,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SqliteFiscalNumberStore::new(&temp_dir.path().join("courier.db"))
            .expect("Failed to create number store");
        Self {
            store: Arc::new(store),
            _temp_dir: temp_dir,
        }
    }

    fn allocator(&self, config: &NumberingConfig) -> SequentialAllocator {
        SequentialAllocator::new(Arc::clone(&self.store) as Arc<dyn FiscalNumberStore>, config)
    }
}

#[test]
fn test_fresh_key_counts_from_one() {
    let harness = TestHarness::new();
    let allocator = harness.allocator(&NumberingConfig::default());

    let first = allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    let second = allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    let third = allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();

    assert_eq!((first.serie.as_str(), first.numero), ("F001", 1));
    assert_eq!((second.serie.as_str(), second.numero), ("F001", 2));
    assert_eq!((third.serie.as_str(), third.numero), ("F001", 3));
}

#[test]
fn test_concurrent_allocations_are_contiguous() {
    let harness = TestHarness::new();
    let config = NumberingConfig {
        max_conflict_retries: 1_000,
        ..NumberingConfig::default()
    };
    let allocator = Arc::new(harness.allocator(&config));

    for _ in 0..3 {
        allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    }

    let callers = 16;
    let numbers: Vec<u32> = thread::scope(|scope| {
        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                scope.spawn(move || {
                    allocator
                        .allocate("acme", RUC, DocumentType::Invoice)
                        .expect("allocation failed")
                        .numero
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let issued: BTreeSet<u32> = numbers.iter().copied().collect();
    assert_eq!(issued.len(), callers, "duplicate numbers issued: {:?}", numbers);
    assert_eq!(issued, (4..4 + callers as u32).collect::<BTreeSet<_>>());
}

#[test]
fn test_keys_are_independent() {
    let harness = TestHarness::new();
    let allocator = harness.allocator(&NumberingConfig::default());

    allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();

    let other_type = allocator.allocate("acme", RUC, DocumentType::CreditNote).unwrap();
    let other_company = allocator.allocate("acme", "20999999999", DocumentType::Invoice).unwrap();
    let other_namespace = allocator.allocate("globex", RUC, DocumentType::Invoice).unwrap();

    assert_eq!(other_type.numero, 1);
    assert_eq!(other_company.numero, 1);
    assert_eq!(other_namespace.numero, 1);
}

#[test]
fn test_numbers_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("courier.db");
    let config = NumberingConfig::default();

    {
        let store = Arc::new(SqliteFiscalNumberStore::new(&path).unwrap());
        let allocator = SequentialAllocator::new(store, &config);
        allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
        allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    }

    let store = Arc::new(SqliteFiscalNumberStore::new(&path).unwrap());
    let allocator = SequentialAllocator::new(store, &config);
    let next = allocator.allocate("acme", RUC, DocumentType::Invoice).unwrap();
    assert_eq!(next.numero, 3);
}

#[test]
fn test_none_strategy_leaves_sequences_alone() {
    let harness = TestHarness::new();
    let mut config = NumberingConfig::default();
    config
        .strategies
        .insert("summary_documents".to_string(), "none".to_string());
    let registry = StrategyRegistry::from_config(
        &config,
        Arc::clone(&harness.store) as Arc<dyn FiscalNumberStore>,
    )
    .unwrap();

    let none = registry.allocate("acme", RUC, "summary_documents").unwrap();
    assert!(none.is_none());

    let key = courier_core::numbering::NumberKey::new("acme", RUC, DocumentType::SummaryDocuments);
    assert!(harness.store.find(&key).unwrap().is_none());

    let invoice = registry.allocate("acme", RUC, "invoice").unwrap().unwrap();
    assert_eq!(invoice.numero, 1);
}
