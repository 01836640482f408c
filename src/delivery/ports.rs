//! Collaborators consumed by the delivery service.
//!
//! The connection layer owns executors and their accounts; the delivery
//! service only asks who owns an account, whether an executor speaks the
//! acknowledgement protocol, and to hand a message to a named executor.

use async_trait::async_trait;

use crate::domain::CoreMessage;
use crate::error::Result;

/// Maps a trading account to the executor currently connected for it
#[cfg_attr(test, mockall::automock)]
pub trait OwnershipResolver: Send + Sync {
    fn get_owner(&self, account_id: &str) -> Option<String>;
}

/// Reports whether an executor emits delivery acknowledgements
#[cfg_attr(test, mockall::automock)]
pub trait CapabilityCheck: Send + Sync {
    fn supports_lossless_delivery(&self, agent_id: &str) -> bool;
}

/// Hands a message to an executor's outbound stream.
///
/// Implementations must fail promptly instead of blocking on a dead link;
/// any error sends the command down the backoff path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, agent_id: &str, message: &CoreMessage) -> Result<()>;
}
