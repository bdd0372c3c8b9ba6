pub mod config;
pub mod document;
pub mod metrics;
pub mod numbering;
pub mod scheduler;
pub mod sender;
pub mod service;
pub mod signing;
pub mod storage;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
    SenderConfig,
};
pub use document::{
    Document, DocumentError, DocumentFilter, DocumentStatus, DocumentStore, DocumentType,
    SqliteDocumentStore,
};
pub use numbering::{
    AllocationError, FiscalNumber, FiscalNumberStore, SequentialAllocator, SqliteFiscalNumberStore,
    StrategyRegistry,
};
pub use scheduler::{DeliveryScheduler, SchedulerConfig, SchedulerError, SchedulerStatus};
pub use sender::{DocumentSender, SunatSender};
pub use service::{DeliveryService, ServiceError};
pub use signing::{SigningError, XmlSigner};
pub use storage::{BlobStore, FsBlobStore, StorageError};
