//! Persistence Layer for Delivery State
//!
//! This module provides the durable side of command delivery:
//! - Delivery journal keyed by command id (PostgreSQL or in-memory)
//! - Append-only retry event log for audit
//! - Storage retry wrapper shielding journal writes from transient failures

pub mod journal;
pub mod memory;
pub mod retry_events;
pub mod storage_retry;

pub use journal::{DeliveryJournal, PgDeliveryJournal, StoreResult};
pub use memory::{MemoryJournal, MemoryRetryEventLog};
pub use retry_events::{PgRetryEventLog, RetryEventLog};
pub use storage_retry::StorageRetry;
