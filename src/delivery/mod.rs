//! Reliable command delivery from the core to executors.
//!
//! - `service`: scheduling, dispatch, acknowledgement handling
//! - `reconciler`: periodic replay of overdue journal entries
//! - `registry`: account ownership and executor capability maps
//! - `ports`: collaborator traits implemented by the connection layer

pub mod ports;
pub mod reconciler;
pub mod registry;
pub mod service;

pub use ports::{CapabilityCheck, OwnershipResolver, Transport};
pub use reconciler::SweepSummary;
pub use registry::{AccountRegistry, AgentCapabilities, OwnershipRecord};
pub use service::{DeliveryPorts, DeliveryService};
