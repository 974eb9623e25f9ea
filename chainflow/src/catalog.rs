//! The step catalog: canonical order plus adapter registry.
//!
//! Built once at process start and shared by reference with the dispatcher
//! and registration. Every process taking part in dispatch must build an
//! identical catalog.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::adapters::{BwaAligner, Ciri2Processor, SrrDataManager, StepAdapter, ToolConfigSource};
#[cfg(feature = "http-adapters")]
use crate::adapters::{GoAnnotationFetcher, UniProtDataPreparer};
use crate::core::InputMapping;
use crate::order::CanonicalOrder;

/// Canonical order, default input mappings and the adapter bound to each name.
#[derive(Clone)]
pub struct StepCatalog {
    order: CanonicalOrder,
    adapters: HashMap<String, Arc<dyn StepAdapter>>,
}

impl fmt::Debug for StepCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bound: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        bound.sort_unstable();
        f.debug_struct("StepCatalog")
            .field("order", &self.order.names())
            .field("adapters", &bound)
            .finish()
    }
}

impl StepCatalog {
    /// Creates a catalog without adapters.
    #[must_use]
    pub fn new(order: CanonicalOrder) -> Self {
        Self {
            order,
            adapters: HashMap::new(),
        }
    }

    /// Binds an adapter under its own name.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn StepAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Binds an adapter under its own name, replacing any previous binding.
    pub fn register(&mut self, adapter: Arc<dyn StepAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// The circRNA chain with every built-in adapter bound.
    #[must_use]
    pub fn circ_rna(source: Arc<ToolConfigSource>) -> Self {
        let catalog = Self::new(CanonicalOrder::circ_rna())
            .with_adapter(Arc::new(SrrDataManager::new(Arc::clone(&source))))
            .with_adapter(Arc::new(BwaAligner::new(Arc::clone(&source))))
            .with_adapter(Arc::new(Ciri2Processor::new(Arc::clone(&source))));
        #[cfg(feature = "http-adapters")]
        let catalog = catalog
            .with_adapter(Arc::new(UniProtDataPreparer::new(Arc::clone(&source))))
            .with_adapter(Arc::new(GoAnnotationFetcher::new(source)));
        catalog
    }

    /// Returns the canonical order.
    #[must_use]
    pub fn order(&self) -> &CanonicalOrder {
        &self.order
    }

    /// Returns the adapter bound to `name`.
    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<Arc<dyn StepAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Returns the default input mapping of `name`.
    #[must_use]
    pub fn default_mapping(&self, name: &str) -> InputMapping {
        self.order.default_mapping(name)
    }

    /// Canonical names that have no adapter bound.
    #[must_use]
    pub fn unbound(&self) -> Vec<&str> {
        self.order
            .names()
            .iter()
            .map(String::as_str)
            .filter(|name| !self.adapters.contains_key(*name))
            .collect()
    }
}
