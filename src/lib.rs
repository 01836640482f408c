pub mod adapters;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;

pub use config::{AppConfig, DeliveryConfig};
pub use delivery::{
    AccountRegistry, AgentCapabilities, CapabilityCheck, DeliveryPorts, DeliveryService,
    OwnershipResolver, SweepSummary, Transport,
};
pub use domain::{
    AckResult, AckStage, CloseOrder, CommandAck, CoreMessage, DeliveryStatus, ErrorCode,
    ExecuteOrder, JournalEntry,
};
pub use error::{RelayError, Result, StoreError};
pub use persistence::{
    DeliveryJournal, MemoryJournal, MemoryRetryEventLog, PgDeliveryJournal, PgRetryEventLog,
    RetryEventLog, StorageRetry,
};
pub use services::DeliveryMetrics;
