//! Provider registry and capability descriptors.
//!
//! The registry is an ordinary value built once by the composition root and
//! shared through an `Arc`. Providers declare the optional operations they
//! support through [`Capabilities`]; callers check the descriptor before
//! invoking an operation so unsupported calls fail with a predictable
//! [`FlowError::Unsupported`].

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    error::FlowError,
    models::{Shipment, ShipmentStatus},
};

/// Optional operation a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Issues shipping labels.
    IssueLabel,
    /// Can be polled for the current shipment status.
    PullStatus,
    /// Pushes status changes through webhook callbacks.
    PushCallback,
    /// Can cancel a shipment.
    Cancel,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 4] = [Self::IssueLabel, Self::PullStatus, Self::PushCallback, Self::Cancel];

    const fn bit(self) -> u8 {
        match self {
            Self::IssueLabel => 1,
            Self::PullStatus => 1 << 1,
            Self::PushCallback => 1 << 2,
            Self::Cancel => 1 << 3,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IssueLabel => write!(f, "label issuance"),
            Self::PullStatus => write!(f, "status polling"),
            Self::PushCallback => write!(f, "push callbacks"),
            Self::Cancel => write!(f, "cancellation"),
        }
    }
}

/// Set of capabilities supported by a provider.
///
/// # Example
///
/// ```
/// use parcelhook_core::registry::{Capabilities, Capability};
///
/// let caps = Capabilities::empty().with(Capability::PushCallback);
/// assert!(caps.supports(Capability::PushCallback));
/// assert!(!caps.supports(Capability::Cancel));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No optional operations.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns a copy with `capability` added.
    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    /// Returns true if `capability` is in the set.
    pub const fn supports(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Iterates over the supported capabilities.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.supports(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

fn unsupported(provider: &str, capability: Capability) -> FlowError {
    FlowError::Unsupported { provider: provider.to_string(), capability: capability.to_string() }
}

/// A delivery provider integration.
///
/// Only callback handling is exercised by the retry subsystem. Optional
/// operations default to [`FlowError::Unsupported`], and the capability
/// descriptor must agree with which methods are overridden.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Unique slug used in callback URLs and on shipments.
    fn slug(&self) -> &str;

    /// Human-readable provider name.
    fn display_name(&self) -> &str {
        self.slug()
    }

    /// Optional operations this provider supports.
    fn capabilities(&self) -> Capabilities;

    /// Verifies that a callback genuinely comes from the provider.
    async fn verify_callback(
        &self,
        _shipment: &Shipment,
        _payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<(), FlowError> {
        Err(unsupported(self.slug(), Capability::PushCallback))
    }

    /// Interprets a verified callback as a new shipment status.
    async fn handle_callback(
        &self,
        _shipment: &Shipment,
        _payload: &serde_json::Value,
        _headers: &HashMap<String, String>,
    ) -> Result<ShipmentStatus, FlowError> {
        Err(unsupported(self.slug(), Capability::PushCallback))
    }

    /// Fetches the current status from the provider.
    async fn fetch_status(&self, _shipment: &Shipment) -> Result<ShipmentStatus, FlowError> {
        Err(unsupported(self.slug(), Capability::PullStatus))
    }

    /// Cancels the shipment with the provider.
    async fn cancel(&self, _shipment: &Shipment) -> Result<bool, FlowError> {
        Err(unsupported(self.slug(), Capability::Cancel))
    }
}

/// Errors raised while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A provider with the same slug is already registered.
    #[error("provider {0} is already registered")]
    DuplicateSlug(String),
}

/// Registry of providers keyed by slug.
#[derive(Debug, Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under its slug.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateSlug` if the slug is taken.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<(), RegistryError> {
        let slug = provider.slug().to_string();
        if self.providers.contains_key(&slug) {
            return Err(RegistryError::DuplicateSlug(slug));
        }
        tracing::debug!(provider = %slug, capabilities = ?provider.capabilities(), "registered provider");
        self.providers.insert(slug, provider);
        Ok(())
    }

    /// Looks up a provider by slug.
    pub fn get_by_slug(&self, slug: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(slug).cloned()
    }

    /// Looks up a provider and checks that it supports `capability`.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::UnknownProvider` or `FlowError::Unsupported`.
    pub fn require(
        &self,
        slug: &str,
        capability: Capability,
    ) -> Result<Arc<dyn Provider>, FlowError> {
        let provider =
            self.get_by_slug(slug).ok_or_else(|| FlowError::UnknownProvider(slug.to_string()))?;
        if !provider.capabilities().supports(capability) {
            return Err(unsupported(slug, capability));
        }
        Ok(provider)
    }

    /// Registered slugs in sorted order.
    pub fn slugs(&self) -> Vec<&str> {
        let mut slugs: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        slugs.sort_unstable();
        slugs
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
