//! Parcelhook HTTP API.
//!
//! Receives provider callbacks over HTTP, hands them to the callback ingress
//! and maps the outcome to a status code. Also owns configuration loading and
//! the token-authenticated provider built from it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use parcelhook_core::storage::Storage;
use parcelhook_retry::CallbackIngress;

pub mod config;
pub mod handlers;
pub mod providers;
pub mod server;

pub use config::{Config, ProviderConfig};
pub use providers::{build_registry, TokenProvider};
pub use server::{create_router, shutdown_signal, start_server};

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Callback ingress.
    pub ingress: Arc<CallbackIngress>,
    /// Database handle for readiness checks, absent when running without one.
    pub storage: Option<Arc<Storage>>,
}

impl AppState {
    /// Creates state backed by `ingress` with no database.
    pub fn new(ingress: Arc<CallbackIngress>) -> Self {
        Self { ingress, storage: None }
    }

    /// Attaches the database used by the readiness check.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<Storage>) -> Self {
        self.storage = Some(storage);
        self
    }
}
