//! Codec Engine
//!
//! Converts between a [`SemanticPreset`] and the bytes of a preset file.
//!
//! Encoding overlays every registered field, in ascending offset order, onto a
//! private copy of the format's template and then runs the adapter's
//! recompute hook. Decoding reads every registered field and returns the
//! bytes nobody describes as a residual map, so that
//! [`Codec::reencode`] reproduces the original capture byte-for-byte.
//!
//! Nothing is returned on failure: a preset is either fully encoded or
//! rejected with the offending field named in the error.

pub(crate) mod field;

use crate::format::{Format, FormatCatalog};
use crate::registry::{FieldDescriptor, ParamValue, ParameterRegistry};
use crate::{PatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with a value outside its field's range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Fail with [`PatchError::ValueOutOfRange`], or with
    /// [`PatchError::TypeMismatch`] for values the field cannot store exactly
    #[default]
    Reject,
    /// Clamp into range and report a [`CodecWarning::Clamped`]; values the
    /// field cannot store exactly are rounded and reported as
    /// [`CodecWarning::Quantized`]
    Clamp,
}

/// What to do with a preset key that has no descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFieldPolicy {
    /// Skip it and report a [`CodecWarning::UnknownField`]
    #[default]
    Warn,
    /// Fail with [`PatchError::UnknownField`]
    Reject,
}

/// Codec behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Out-of-range handling at encode time
    pub range_policy: RangePolicy,
    /// Unknown key handling at encode time
    pub unknown_fields: UnknownFieldPolicy,
}

impl CodecConfig {
    /// Parse a configuration from JSON (missing keys take defaults)
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Clamp out-of-range values instead of rejecting them
    pub fn clamping(mut self) -> Self {
        self.range_policy = RangePolicy::Clamp;
        self
    }

    /// Reject unknown keys instead of warning
    pub fn strict(mut self) -> Self {
        self.unknown_fields = UnknownFieldPolicy::Reject;
        self
    }
}

/// Parameter name to value mapping for one format
///
/// Encode accepts any value kind the field can resolve. Decode returns the
/// normal form: labels for labelled uint fields (plain integers past the
/// last label), `Int` for other integer fields, `Float` for fixed-point and
/// float fields and `Bool` for flags. [`normalized`](Self::normalized) maps a
/// preset to that form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemanticPreset(BTreeMap<String, ParamValue>);

impl SemanticPreset {
    /// Create an empty preset
    pub fn new() -> Self {
        SemanticPreset(BTreeMap::new())
    }

    /// Parse a JSON object of `name: value` pairs
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Set a value, returning the previous one
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder-style [`set`](Self::set)
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Look up a value
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Remove a value
    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    /// Iterate `(name, value)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Parameter names in name order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the preset has no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill every field the preset leaves out with its default
    pub fn with_defaults(&self, registry: &ParameterRegistry) -> Self {
        let mut full = self.clone();
        for field in registry.iter() {
            full.0
                .entry(field.name.clone())
                .or_insert_with(|| field.default.clone());
        }
        full
    }
}

impl SemanticPreset {
    /// Convert every registered value to the form decode returns
    pub fn normalized(&self, registry: &ParameterRegistry) -> Self {
        self.iter()
            .map(|(name, value)| {
                let value = match registry.lookup(name) {
                    Some(field) => field::normalize(field, value),
                    None => value.clone(),
                };
                (name.to_string(), value)
            })
            .collect()
    }
}

impl FromIterator<(String, ParamValue)> for SemanticPreset {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        SemanticPreset(iter.into_iter().collect())
    }
}

/// Immutable bytes of one preset file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBlob(Arc<[u8]>);

impl BinaryBlob {
    /// Borrow the bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy the bytes out
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<Vec<u8>> for BinaryBlob {
    fn from(bytes: Vec<u8>) -> Self {
        BinaryBlob(bytes.into())
    }
}

impl From<&[u8]> for BinaryBlob {
    fn from(bytes: &[u8]) -> Self {
        BinaryBlob(bytes.into())
    }
}

impl Deref for BinaryBlob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for BinaryBlob {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Bytes not described by any (non-flag) field, keyed by offset
///
/// Each entry is a maximal run. Bytes shared by packed flags appear with the
/// declared flag bits cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Residuals(BTreeMap<usize, Vec<u8>>);

impl Residuals {
    /// Collect the residual runs of `data`
    pub fn collect(registry: &ParameterRegistry, data: &[u8]) -> Self {
        let coverage = Coverage::of(registry, data.len());
        let mut regions = BTreeMap::new();
        let mut run: Option<(usize, Vec<u8>)> = None;
        for (i, &byte) in data.iter().enumerate() {
            let kept = match coverage.at(i) {
                ByteCover::Field => None,
                ByteCover::Free => Some(byte),
                ByteCover::Flags(mask) => Some(byte & !mask),
            };
            match kept {
                Some(byte) => run.get_or_insert_with(|| (i, Vec::new())).1.push(byte),
                None => {
                    if let Some((start, bytes)) = run.take() {
                        regions.insert(start, bytes);
                    }
                }
            }
        }
        if let Some((start, bytes)) = run {
            regions.insert(start, bytes);
        }
        Residuals(regions)
    }

    /// Iterate `(offset, bytes)` in offset order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u8])> {
        self.0.iter().map(|(&offset, bytes)| (offset, bytes.as_slice()))
    }

    /// The run starting at `offset`
    pub fn get(&self, offset: usize) -> Option<&[u8]> {
        self.0.get(&offset).map(Vec::as_slice)
    }

    /// Replace or add a run
    pub fn insert(&mut self, offset: usize, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.0.insert(offset, bytes)
    }

    /// Number of runs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no runs
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total residual bytes
    pub fn total_bytes(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

impl FromIterator<(usize, Vec<u8>)> for Residuals {
    fn from_iter<I: IntoIterator<Item = (usize, Vec<u8>)>>(iter: I) -> Self {
        Residuals(iter.into_iter().collect())
    }
}

/// Non-fatal observation made while encoding or decoding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodecWarning {
    /// Preset key without a descriptor; ignored
    UnknownField {
        /// The key
        name: String,
    },
    /// Value moved into range under [`RangePolicy::Clamp`]
    Clamped {
        /// Field name
        field: String,
        /// Value asked for
        requested: f64,
        /// Value written
        applied: f64,
    },
    /// Value rounded to the nearest one the field can store
    Quantized {
        /// Field name
        field: String,
        /// Value asked for
        requested: f64,
        /// Value written
        applied: f64,
    },
    /// Capture holds a value outside the declared range
    DecodedOutOfRange {
        /// Field name
        field: String,
        /// Value found
        value: ParamValue,
    },
}

impl fmt::Display for CodecWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecWarning::UnknownField { name } => write!(f, "unknown field '{name}' ignored"),
            CodecWarning::Clamped {
                field,
                requested,
                applied,
            } => write!(f, "'{field}' clamped from {requested} to {applied}"),
            CodecWarning::Quantized {
                field,
                requested,
                applied,
            } => write!(f, "'{field}' rounded from {requested} to {applied}"),
            CodecWarning::DecodedOutOfRange { field, value } => {
                write!(f, "'{field}' holds out-of-range value {value}")
            }
        }
    }
}

/// Result of a successful encode
#[derive(Debug, Clone, PartialEq)]
pub struct Encoded {
    /// The preset file
    pub blob: BinaryBlob,
    /// Unknown keys, clamped and rounded values
    pub warnings: Vec<CodecWarning>,
}

/// Result of a successful decode
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPreset {
    /// Format the blob was decoded as
    pub format_id: String,
    /// Length of the decoded blob
    pub length: usize,
    /// Every registered field's value
    pub values: SemanticPreset,
    /// Bytes outside every field
    pub residuals: Residuals,
    /// Out-of-range values found in the capture
    pub warnings: Vec<CodecWarning>,
}

/// What covers a byte of a blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteCover {
    Free,
    Field,
    Flags(u8),
}

/// Per-byte coverage map of a registry over a blob
pub(crate) struct Coverage(Vec<ByteCover>);

impl Coverage {
    pub(crate) fn of(registry: &ParameterRegistry, len: usize) -> Self {
        let mut cover = vec![ByteCover::Free; len];
        for field in registry.iter() {
            for (i, index) in field.byte_range().enumerate() {
                let Some(slot) = cover.get_mut(index) else {
                    break;
                };
                *slot = if field.is_flag() {
                    let bits = field::flag_bits_in_byte(field, i);
                    match *slot {
                        ByteCover::Free => ByteCover::Flags(bits),
                        ByteCover::Flags(mask) => ByteCover::Flags(mask | bits),
                        ByteCover::Field => ByteCover::Field,
                    }
                } else {
                    ByteCover::Field
                };
            }
        }
        Coverage(cover)
    }

    pub(crate) fn at(&self, index: usize) -> ByteCover {
        self.0.get(index).copied().unwrap_or(ByteCover::Free)
    }

    fn touches_field(&self, start: usize, end: usize) -> bool {
        (start..end).any(|i| self.at(i) == ByteCover::Field)
    }
}

fn check_unknown_keys(
    format: &Format,
    preset: &SemanticPreset,
    config: &CodecConfig,
    warnings: &mut Vec<CodecWarning>,
) -> Result<()> {
    for name in preset.names() {
        if format.registry().lookup(name).is_some() {
            continue;
        }
        match config.unknown_fields {
            UnknownFieldPolicy::Reject => return Err(PatchError::UnknownField(name.to_string())),
            UnknownFieldPolicy::Warn => {
                warn!(format = format.id(), field = name, "ignoring unknown field");
                warnings.push(CodecWarning::UnknownField {
                    name: name.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn write_field(
    field: &FieldDescriptor,
    value: &ParamValue,
    config: &CodecConfig,
    out: &mut [u8],
    warnings: &mut Vec<CodecWarning>,
) -> Result<()> {
    let resolved = field::resolve(field, value, config.range_policy)?;
    if let Some((requested, applied)) = resolved.clamped {
        warn!(field = %field.name, requested, applied, "clamped out-of-range value");
        warnings.push(CodecWarning::Clamped {
            field: field.name.clone(),
            requested,
            applied,
        });
    }
    if let Some((requested, applied)) = resolved.quantized {
        warn!(field = %field.name, requested, applied, "rounded value to storable precision");
        warnings.push(CodecWarning::Quantized {
            field: field.name.clone(),
            requested,
            applied,
        });
    }
    field::write(field, resolved.bits, out)
}

/// Overlay `preset` onto `base` and run the format's recompute hook
fn encode_onto(
    format: &Format,
    mut out: Vec<u8>,
    preset: &SemanticPreset,
    config: &CodecConfig,
) -> Result<Encoded> {
    let registry = format.registry();
    if out.len() < registry.extent() {
        return Err(PatchError::MalformedPreset(format!(
            "{}-byte base is shorter than the {}-byte field extent of '{}'",
            out.len(),
            registry.extent(),
            format.id()
        )));
    }

    let mut warnings = Vec::new();
    check_unknown_keys(format, preset, config, &mut warnings)?;

    for field in registry.iter() {
        let (value, explicit) = match preset.get(&field.name) {
            Some(value) => (value, true),
            None => (&field.default, false),
        };
        write_field(field, value, config, &mut out, &mut warnings)?;
        debug!(field = %field.name, offset = field.offset, explicit, "field written");
    }

    format.adapter().finalize(&mut out)?;
    Ok(Encoded {
        blob: BinaryBlob::from(out),
        warnings,
    })
}

/// Encode a preset onto the format's default template
pub fn encode(format: &Format, preset: &SemanticPreset, config: &CodecConfig) -> Result<Encoded> {
    encode_onto(format, format.template().to_vec(), preset, config)
}

/// Encode a preset onto an explicit template of the same format
pub fn encode_on(
    format: &Format,
    template: &[u8],
    preset: &SemanticPreset,
    config: &CodecConfig,
) -> Result<Encoded> {
    format.check_length(template.len())?;
    encode_onto(format, template.to_vec(), preset, config)
}

/// Decode every registered field of `data`
pub fn decode(format: &Format, data: &[u8]) -> Result<DecodedPreset> {
    format.check_length(data.len())?;
    format.adapter().validate(data)?;

    let mut values = SemanticPreset::new();
    let mut warnings = Vec::new();
    for field in format.registry().iter() {
        let value = field::read(field, data)?;
        if !field::in_range(field, &value) {
            warn!(field = %field.name, %value, "decoded value outside declared range");
            warnings.push(CodecWarning::DecodedOutOfRange {
                field: field.name.clone(),
                value: value.clone(),
            });
        }
        values.set(field.name.clone(), value);
    }

    Ok(DecodedPreset {
        format_id: format.id().to_string(),
        length: data.len(),
        values,
        residuals: Residuals::collect(format.registry(), data),
        warnings,
    })
}

/// Rebuild a blob from a decoded preset, residual bytes included
pub fn reencode(format: &Format, decoded: &DecodedPreset, config: &CodecConfig) -> Result<Encoded> {
    if decoded.format_id != format.id() {
        return Err(PatchError::MalformedPreset(format!(
            "preset was decoded as '{}', not '{}'",
            decoded.format_id,
            format.id()
        )));
    }
    format.check_length(decoded.length)?;

    let mut base = format.template().to_vec();
    base.resize(decoded.length, 0);
    let coverage = Coverage::of(format.registry(), decoded.length);
    for (offset, bytes) in decoded.residuals.iter() {
        let end = offset + bytes.len();
        if end > decoded.length {
            return Err(PatchError::MalformedPreset(format!(
                "residual run [{offset}..{end}) lies outside a {}-byte blob",
                decoded.length
            )));
        }
        if coverage.touches_field(offset, end) {
            return Err(PatchError::MalformedPreset(format!(
                "residual run [{offset}..{end}) overlaps a registered field"
            )));
        }
        base[offset..end].copy_from_slice(bytes);
    }

    encode_onto(format, base, &decoded.values, config)
}

/// Format-aware front end over a [`FormatCatalog`]
#[derive(Debug, Clone)]
pub struct Codec {
    catalog: Arc<FormatCatalog>,
    config: CodecConfig,
}

impl Codec {
    /// Create a codec over a loaded catalog
    pub fn new(catalog: FormatCatalog, config: CodecConfig) -> Self {
        Codec {
            catalog: Arc::new(catalog),
            config,
        }
    }

    /// Codec over the built-in formats with default configuration
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(FormatCatalog::builtin()?, CodecConfig::default()))
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: CodecConfig) -> Self {
        self.config = config;
        self
    }

    /// The format catalog
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// The active configuration
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode onto the default template of `format_id`
    pub fn encode(&self, format_id: &str, preset: &SemanticPreset) -> Result<Encoded> {
        encode(self.catalog.get(format_id)?, preset, &self.config)
    }

    /// Encode onto a named template variant of `format_id`
    pub fn encode_variant(
        &self,
        format_id: &str,
        variant: &str,
        preset: &SemanticPreset,
    ) -> Result<Encoded> {
        let format = self.catalog.get(format_id)?;
        let template = self
            .catalog
            .templates()
            .get(format_id, variant)
            .ok_or_else(|| {
                PatchError::UnknownFormat(format!("{format_id} (no template variant '{variant}')"))
            })?;
        encode_on(format, &template, preset, &self.config)
    }

    /// Decode `data` as `format_id`
    pub fn decode(&self, format_id: &str, data: &[u8]) -> Result<DecodedPreset> {
        decode(self.catalog.get(format_id)?, data)
    }

    /// Decode `data` after sniffing its format from magic bytes
    pub fn decode_auto(&self, data: &[u8]) -> Result<DecodedPreset> {
        let format = self.catalog.detect(data).ok_or_else(|| {
            PatchError::UnknownFormat("no registered format matches the file signature".into())
        })?;
        decode(format, data)
    }

    /// Re-encode a decoded preset, carrying its residual bytes through
    pub fn reencode(&self, decoded: &DecodedPreset) -> Result<Encoded> {
        reencode(self.catalog.get(&decoded.format_id)?, decoded, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Encoding, ValueRange};

    fn codec() -> Codec {
        Codec::builtin().unwrap()
    }

    #[test]
    fn test_empty_preset_reproduces_template() {
        let codec = codec();
        for id in ["3xosc", "serum"] {
            let encoded = codec.encode(id, &SemanticPreset::new()).unwrap();
            let format = codec.catalog().get(id).unwrap();
            assert_eq!(encoded.blob.as_bytes(), format.template());
            assert!(encoded.warnings.is_empty());
        }
    }

    #[test]
    fn test_unknown_format() {
        let result = codec().encode("dx7", &SemanticPreset::new());
        assert!(matches!(result, Err(PatchError::UnknownFormat(_))));
    }

    #[test]
    fn test_unknown_field_warns_by_default() {
        let preset = SemanticPreset::new().with("foo", 1i64);
        let encoded = codec().encode("3xosc", &preset).unwrap();
        assert_eq!(
            encoded.warnings,
            vec![CodecWarning::UnknownField { name: "foo".into() }]
        );
    }

    #[test]
    fn test_unknown_field_rejected_in_strict_mode() {
        let codec = codec().with_config(CodecConfig::default().strict());
        let preset = SemanticPreset::new().with("foo", 1i64);
        assert!(matches!(
            codec.encode("3xosc", &preset),
            Err(PatchError::UnknownField(name)) if name == "foo"
        ));
    }

    #[test]
    fn test_out_of_range_produces_no_blob() {
        let preset = SemanticPreset::new()
            .with("osc1_coarse", 3i64)
            .with("osc2_coarse", 99i64);
        let result = codec().encode("3xosc", &preset);
        assert!(matches!(
            result,
            Err(PatchError::ValueOutOfRange { field, .. }) if field == "osc2_coarse"
        ));
    }

    #[test]
    fn test_clamp_policy_reports_warning() {
        let codec = codec().with_config(CodecConfig::default().clamping());
        let preset = SemanticPreset::new().with("osc2_coarse", 99i64);
        let encoded = codec.encode("3xosc", &preset).unwrap();
        assert_eq!(
            encoded.warnings,
            vec![CodecWarning::Clamped {
                field: "osc2_coarse".into(),
                requested: 99.0,
                applied: 24.0
            }]
        );
        let decoded = codec.decode("3xosc", &encoded.blob).unwrap();
        assert_eq!(decoded.values.get("osc2_coarse"), Some(&ParamValue::Int(24)));
    }

    #[test]
    fn test_inexact_values_are_rejected_by_default() {
        let codec = codec();
        let mix = SemanticPreset::new().with("mix_osc1", 0.335);
        assert!(matches!(
            codec.encode("3xosc", &mix),
            Err(PatchError::TypeMismatch { field, .. }) if field == "mix_osc1"
        ));
        let pan = SemanticPreset::new().with("osc_a_pan", 0.1);
        assert!(matches!(
            codec.encode("serum", &pan),
            Err(PatchError::TypeMismatch { field, .. }) if field == "osc_a_pan"
        ));
    }

    #[test]
    fn test_inexact_values_are_reported_when_lenient() {
        let codec = codec().with_config(CodecConfig::default().clamping());
        let preset = SemanticPreset::new().with("mix_osc1", 0.335);
        let encoded = codec.encode("3xosc", &preset).unwrap();
        assert_eq!(
            encoded.warnings,
            vec![CodecWarning::Quantized {
                field: "mix_osc1".into(),
                requested: 0.335,
                applied: 0.34
            }]
        );
        let decoded = codec.decode("3xosc", &encoded.blob).unwrap();
        assert_eq!(decoded.values.get("mix_osc1"), Some(&ParamValue::Float(0.34)));

        let preset = SemanticPreset::new().with("osc_a_pan", 0.1);
        let encoded = codec.encode("serum", &preset).unwrap();
        assert!(matches!(
            encoded.warnings.as_slice(),
            [CodecWarning::Quantized { field, .. }] if field == "osc_a_pan"
        ));
    }

    #[test]
    fn test_decode_returns_normal_form() {
        let codec = codec();
        let format = codec.catalog().get("3xosc").unwrap();
        let preset = SemanticPreset::new()
            .with("mix_osc1", 1i64)
            .with("osc1_shape", "Saw")
            .with("osc2_shape", 3i64);
        let encoded = codec.encode("3xosc", &preset).unwrap();
        let decoded = codec.decode("3xosc", &encoded.blob).unwrap();

        assert_eq!(decoded.values.get("mix_osc1"), Some(&ParamValue::Float(1.0)));
        assert_eq!(decoded.values.get("osc1_shape"), Some(&ParamValue::Label("saw".into())));
        assert_eq!(decoded.values.get("osc2_shape"), Some(&ParamValue::Label("square".into())));
        assert_eq!(
            decoded.values,
            preset.with_defaults(format.registry()).normalized(format.registry())
        );
        assert!(decoded.warnings.is_empty());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let codec = codec();
        let template = codec.catalog().get("3xosc").unwrap().template().to_vec();
        let result = codec.decode("3xosc", &template[..template.len() - 1]);
        assert!(matches!(result, Err(PatchError::MalformedPreset(_))));
    }

    #[test]
    fn test_decode_auto_sniffs_format() {
        let codec = codec();
        let fxp = codec.encode("serum", &SemanticPreset::new()).unwrap();
        assert_eq!(codec.decode_auto(&fxp.blob).unwrap().format_id, "serum");
        assert!(matches!(
            codec.decode_auto(b"RIFF....WAVE"),
            Err(PatchError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_residuals_skip_fields_and_mask_flags() {
        let fields = vec![
            FieldDescriptor::new(
                "level",
                2,
                2,
                Encoding::UInt,
                ValueRange::new(0.0, 1000.0),
                ParamValue::Int(0),
            ),
            FieldDescriptor::new(
                "hq",
                5,
                1,
                Encoding::Flag { mask: 0x80 },
                ValueRange::unit(),
                ParamValue::Bool(false),
            ),
        ];
        let registry = ParameterRegistry::new(fields, 8).unwrap();
        let data = [1u8, 2, 0xAA, 0xBB, 3, 0xFF, 4, 5];
        let residuals = Residuals::collect(&registry, &data);

        assert_eq!(residuals.get(0), Some(&[1u8, 2][..]));
        assert_eq!(residuals.get(4), Some(&[3u8, 0x7F, 4, 5][..]));
        assert_eq!(residuals.len(), 2);
        assert_eq!(residuals.total_bytes(), 6);
    }

    #[test]
    fn test_reencode_rejects_residual_over_field() {
        let codec = codec();
        let template = codec.catalog().get("3xosc").unwrap().template().to_vec();
        let mut decoded = codec.decode("3xosc", &template).unwrap();
        decoded.residuals.insert(239, vec![0; 4]);
        assert!(matches!(
            codec.reencode(&decoded),
            Err(PatchError::MalformedPreset(_))
        ));
    }

    #[test]
    fn test_config_from_json() {
        let config = CodecConfig::from_json(r#"{ "range_policy": "clamp" }"#).unwrap();
        assert_eq!(config.range_policy, RangePolicy::Clamp);
        assert_eq!(config.unknown_fields, UnknownFieldPolicy::Warn);
    }

    #[test]
    fn test_preset_json_values() {
        let preset =
            SemanticPreset::from_json(r#"{ "osc1_shape": "saw", "mix_osc1": 0.5, "osc2_detune": 12 }"#)
                .unwrap();
        assert_eq!(preset.get("osc1_shape"), Some(&ParamValue::Label("saw".into())));
        assert_eq!(preset.get("mix_osc1"), Some(&ParamValue::Float(0.5)));
        assert_eq!(preset.get("osc2_detune"), Some(&ParamValue::Int(12)));
    }
}
