//! Binary Template Store
//!
//! Reference captures per format, keyed by variant name. Every format has a
//! `default` variant; others are added from descriptor tables. Templates are
//! shared immutably, so encoding always works on a private copy.

pub mod loader;

use std::collections::BTreeMap;
use std::sync::Arc;

/// Variant name of a format's primary template
pub const DEFAULT_VARIANT: &str = "default";

/// Named templates per format
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, BTreeMap<String, Arc<[u8]>>>,
}

impl TemplateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn insert(&mut self, format_id: &str, variant: &str, bytes: impl Into<Arc<[u8]>>) {
        self.templates
            .entry(format_id.to_string())
            .or_default()
            .insert(variant.to_string(), bytes.into());
    }

    /// Shared handle to a template
    pub fn get(&self, format_id: &str, variant: &str) -> Option<Arc<[u8]>> {
        self.templates.get(format_id)?.get(variant).cloned()
    }

    /// The `default` template of a format
    pub fn default_for(&self, format_id: &str) -> Option<Arc<[u8]>> {
        self.get(format_id, DEFAULT_VARIANT)
    }

    /// Variant names of a format in name order
    pub fn variants(&self, format_id: &str) -> Vec<&str> {
        self.templates
            .get(format_id)
            .map(|variants| variants.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Formats with at least one template
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Total number of templates
    pub fn len(&self) -> usize {
        self.templates.values().map(BTreeMap::len).sum()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
