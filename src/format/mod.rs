//! Format Adapters & Catalog
//!
//! A [`Format`] binds an adapter (signature, header checks, recompute hook)
//! to a template and the registry whose offsets are relative to it. The
//! [`FormatCatalog`] holds every format known to the process; it is built
//! once at startup and only read afterwards.
//!
//! Supported formats:
//! - `3xosc`: FL Studio 3xOsc `.fst` captures ([`ThreeOscAdapter`])
//! - `serum`: VST2 `.fxp` program files of a wavetable synth ([`FxpAdapter`])

pub mod fxp;
pub mod three_osc;

pub use fxp::FxpAdapter;
pub use three_osc::ThreeOscAdapter;

use crate::codec::{field, RangePolicy};
use crate::registry::{DescriptorTable, FieldDescriptor, ParameterRegistry};
use crate::template::{loader, TemplateStore, DEFAULT_VARIANT};
use crate::{PatchError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Whether a format's files always have the template's length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthKind {
    /// Every file has exactly the template's length
    Fixed,
    /// Files may be longer than the field extent (trailing chunks, more slots)
    Variable,
}

/// Length constraint a blob must satisfy for a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthRule {
    /// Exactly this many bytes
    Fixed(usize),
    /// At least this many bytes
    Variable {
        /// Minimum length (the registry's field extent)
        min: usize,
    },
}

impl LengthRule {
    /// Check a blob length against the rule
    pub fn check(&self, len: usize) -> Result<()> {
        match *self {
            LengthRule::Fixed(expected) if len != expected => Err(PatchError::MalformedPreset(
                format!("expected exactly {expected} bytes, got {len}"),
            )),
            LengthRule::Variable { min } if len < min => Err(PatchError::MalformedPreset(format!(
                "expected at least {min} bytes, got {len}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Per-format specialization
pub trait FormatAdapter: Send + Sync + fmt::Debug {
    /// Stable identifier used by callers and descriptor tables
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// File extension without the dot
    fn extension(&self) -> &str;

    /// Fixed or variable file length
    fn length_kind(&self) -> LengthKind;

    /// Check the file signature
    fn sniff(&self, data: &[u8]) -> bool;

    /// Structural checks beyond the length rule (magic, header fields)
    fn validate(&self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Recompute length/checksum fields after all overwrites
    fn finalize(&self, _data: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Descriptors known for this format out of the box
    fn seed_fields(&self) -> Vec<FieldDescriptor>;

    /// Template skeleton; seeded defaults are written over it
    fn factory_skeleton(&self) -> Vec<u8>;
}

/// Every adapter compiled into the crate
pub fn builtin_adapters() -> Vec<Arc<dyn FormatAdapter>> {
    vec![Arc::new(ThreeOscAdapter), Arc::new(FxpAdapter)]
}

/// Detect a built-in format from magic bytes
pub fn detect_format(data: &[u8]) -> Option<&'static str> {
    if ThreeOscAdapter.sniff(data) {
        Some(three_osc::FORMAT_ID)
    } else if FxpAdapter.sniff(data) {
        Some(fxp::FORMAT_ID)
    } else {
        None
    }
}

/// A binary layout: adapter, template and registry
#[derive(Debug, Clone)]
pub struct Format {
    adapter: Arc<dyn FormatAdapter>,
    template: Arc<[u8]>,
    registry: ParameterRegistry,
}

impl Format {
    /// Bind a template and descriptor list to an adapter
    pub fn new(
        adapter: Arc<dyn FormatAdapter>,
        template: Vec<u8>,
        fields: Vec<FieldDescriptor>,
    ) -> Result<Self> {
        adapter.validate(&template)?;
        let registry = ParameterRegistry::new(fields, template.len())?;
        let format = Format {
            adapter,
            template: template.into(),
            registry,
        };
        format.report_template_drift();
        Ok(format)
    }

    /// Built-in format: adapter seed registry over its factory template
    pub fn builtin(adapter: Arc<dyn FormatAdapter>) -> Result<Self> {
        let mut template = adapter.factory_skeleton();
        let registry = ParameterRegistry::new(adapter.seed_fields(), template.len())?;
        for field in registry.iter() {
            let resolved = field::resolve(field, &field.default, RangePolicy::Reject)?;
            field::write(field, resolved.bits, &mut template)?;
        }
        adapter.finalize(&mut template)?;
        adapter.validate(&template)?;
        Ok(Format {
            adapter,
            template: template.into(),
            registry,
        })
    }

    /// Same adapter and template with another registry (e.g. after promotion)
    pub fn with_registry(&self, registry: ParameterRegistry) -> Result<Self> {
        if registry.extent() > self.template.len() {
            return Err(PatchError::RegistryConflict(format!(
                "registry extent {} exceeds the {}-byte '{}' template",
                registry.extent(),
                self.template.len(),
                self.id()
            )));
        }
        Ok(Format {
            adapter: Arc::clone(&self.adapter),
            template: Arc::clone(&self.template),
            registry,
        })
    }

    /// Format identifier
    pub fn id(&self) -> &str {
        self.adapter.id()
    }

    /// Human-readable name
    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    /// The format adapter
    pub fn adapter(&self) -> &dyn FormatAdapter {
        self.adapter.as_ref()
    }

    /// Default template bytes
    pub fn template(&self) -> &[u8] {
        &self.template
    }

    /// Descriptor registry
    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    /// Length constraint for blobs of this format
    pub fn length_rule(&self) -> LengthRule {
        match self.adapter.length_kind() {
            LengthKind::Fixed => LengthRule::Fixed(self.template.len()),
            LengthKind::Variable => LengthRule::Variable {
                min: self.registry.extent(),
            },
        }
    }

    /// Check a blob length against [`length_rule`](Self::length_rule)
    pub fn check_length(&self, len: usize) -> Result<()> {
        self.length_rule().check(len)
    }

    /// Log fields whose template bytes do not hold the declared default
    fn report_template_drift(&self) {
        for field in self.registry.iter() {
            match field::read(field, &self.template) {
                Ok(value) if value != field::normalize(field, &field.default) => warn!(
                    format = self.id(),
                    field = %field.name,
                    template = %value,
                    default = %field.default,
                    "template value differs from descriptor default"
                ),
                _ => {}
            }
        }
    }
}

/// All formats known to the process, with their template variants
#[derive(Debug, Clone, Default)]
pub struct FormatCatalog {
    formats: BTreeMap<String, Format>,
    templates: TemplateStore,
}

impl FormatCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every built-in adapter with its factory template
    pub fn builtin() -> Result<Self> {
        let mut catalog = FormatCatalog::new();
        for adapter in builtin_adapters() {
            catalog.insert(Format::builtin(adapter)?)?;
        }
        Ok(catalog)
    }

    /// Load every descriptor table (`*.json`) in `dir`
    ///
    /// Each table names its adapter and template file; variants listed in the
    /// table are loaded into the template store.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let adapters: BTreeMap<String, Arc<dyn FormatAdapter>> = builtin_adapters()
            .into_iter()
            .map(|adapter| (adapter.id().to_string(), adapter))
            .collect();

        let mut catalog = FormatCatalog::new();
        for table_path in loader::table_paths(dir)? {
            let table = DescriptorTable::load(&table_path)?;
            let adapter = adapters
                .get(&table.format)
                .cloned()
                .ok_or_else(|| PatchError::UnknownFormat(table.format.clone()))?;
            let template = loader::read_template(dir, &table.template)?;
            let format = Format::new(adapter, template, table.fields)?;
            let id = format.id().to_string();
            catalog.insert(format)?;
            for (variant, file) in &table.variants {
                let bytes = loader::read_template(dir, file)?;
                catalog.add_variant(&id, variant, bytes)?;
            }
            info!(
                format = %id,
                table = %table_path.display(),
                fields = catalog.get(&id)?.registry().len(),
                "loaded descriptor table"
            );
        }
        Ok(catalog)
    }

    /// Register a format; identifiers must be unique
    pub fn insert(&mut self, format: Format) -> Result<()> {
        let id = format.id().to_string();
        if self.formats.contains_key(&id) {
            return Err(PatchError::RegistryConflict(format!(
                "format '{id}' is registered twice"
            )));
        }
        self.templates
            .insert(&id, DEFAULT_VARIANT, Arc::clone(&format.template));
        self.formats.insert(id, format);
        Ok(())
    }

    /// Add a named template variant for an existing format
    pub fn add_variant(&mut self, format_id: &str, variant: &str, bytes: Vec<u8>) -> Result<()> {
        let format = self.get(format_id)?;
        format.check_length(bytes.len())?;
        format.adapter().validate(&bytes)?;
        self.templates.insert(format_id, variant, bytes);
        Ok(())
    }

    /// Look up a format
    pub fn get(&self, id: &str) -> Result<&Format> {
        self.formats
            .get(id)
            .ok_or_else(|| PatchError::UnknownFormat(id.to_string()))
    }

    /// Look up a field of a format
    pub fn lookup(&self, format_id: &str, name: &str) -> Result<&FieldDescriptor> {
        self.get(format_id)?
            .registry()
            .lookup(name)
            .ok_or_else(|| PatchError::UnknownField(name.to_string()))
    }

    /// First format whose adapter recognises the signature
    pub fn detect(&self, data: &[u8]) -> Option<&Format> {
        self.formats
            .values()
            .find(|format| format.adapter().sniff(data))
    }

    /// Iterate formats in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &Format> {
        self.formats.values()
    }

    /// Registered identifiers
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }

    /// Number of formats
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Check if no format is registered
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Template variants of every format
    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }
}
