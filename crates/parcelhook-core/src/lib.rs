//! Core domain types for parcelhook.
//!
//! Retry records, shipment snapshots, the error taxonomy, the clock
//! abstraction, collaborator contracts and the Postgres repositories shared by
//! the retry subsystem and the HTTP surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod flow;
pub mod models;
pub mod registry;
pub mod storage;
pub mod time;

pub use error::{CallbackError, CoreError, ErrorKind, FlowError, Result};
pub use flow::{CallbackFlow, RegistryFlow, ShipmentRepository};
pub use models::{
    FailedCallback, RetryId, RetryRecord, RetryStatus, Shipment, ShipmentId, ShipmentStatus,
};
pub use registry::{Capabilities, Capability, Provider, ProviderRegistry, RegistryError};
pub use time::{Clock, RealClock, TestClock};
