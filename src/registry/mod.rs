//! Parameter Registry
//!
//! Static table mapping a semantic parameter name to the place and shape of
//! its value inside a preset file.
//!
//! Features:
//! - [`FieldDescriptor`]: offset, width, encoding, byte order, range, default
//! - Construction-time validation (width, representable range, defaults)
//! - Non-overlap check across a format, except single-bit flags packed into
//!   the same word
//! - Offset-ordered iteration for deterministic encoding passes

pub mod table;

pub use table::DescriptorTable;

use crate::codec::field;
use crate::codec::RangePolicy;
use crate::{PatchError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

/// Registry shared with an offline discovery session.
///
/// Promotion takes the write lock; encode/decode paths work on an immutable
/// snapshot owned by their [`Format`](crate::Format).
pub type SharedRegistry = Arc<RwLock<ParameterRegistry>>;

/// Widths a field may occupy, in bytes
pub const FIELD_WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Byte order of a multi-byte field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Least significant byte first (FL Studio state blobs)
    #[default]
    Little,
    /// Most significant byte first (VST2 `.fxp` files)
    Big,
}

impl ByteOrder {
    /// Read up to 8 bytes as an unsigned word
    pub fn read(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
            ByteOrder::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }

    /// Write the low `out.len()` bytes of `value`
    pub fn write(self, value: u64, out: &mut [u8]) {
        let width = out.len();
        for i in 0..width {
            let byte = (value >> (8 * i)) as u8;
            match self {
                ByteOrder::Little => out[i] = byte,
                ByteOrder::Big => out[width - 1 - i] = byte,
            }
        }
    }

    /// Shift of the `index`-th stored byte inside a `width`-byte word
    pub(crate) fn byte_shift(self, index: usize, width: usize) -> usize {
        match self {
            ByteOrder::Little => 8 * index,
            ByteOrder::Big => 8 * (width - 1 - index),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::Little => write!(f, "little"),
            ByteOrder::Big => write!(f, "big"),
        }
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(ByteOrder::Little),
            "big" | "be" => Ok(ByteOrder::Big),
            other => Err(format!("unknown byte order '{other}' (expected little or big)")),
        }
    }
}

/// How a field's value is represented in its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Unsigned integer
    #[serde(rename = "uint")]
    UInt,
    /// Two's complement signed integer
    Int,
    /// Integer holding `round(value * scale)`
    Fixed {
        /// Raw units per semantic unit
        scale: u32,
        /// Raw integer is two's complement
        #[serde(default)]
        signed: bool,
    },
    /// IEEE-754 float (width 4 or 8)
    Float,
    /// Single bit inside the field's word
    Flag {
        /// Bit mask (exactly one bit set)
        mask: u64,
    },
}

impl Encoding {
    /// Whether values must be whole numbers
    pub fn is_integral(&self) -> bool {
        matches!(self, Encoding::UInt | Encoding::Int)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::UInt => write!(f, "uint"),
            Encoding::Int => write!(f, "int"),
            Encoding::Fixed {
                scale,
                signed: false,
            } => write!(f, "fixed:{scale}"),
            Encoding::Fixed {
                scale,
                signed: true,
            } => write!(f, "sfixed:{scale}"),
            Encoding::Float => write!(f, "float"),
            Encoding::Flag { mask } => write!(f, "flag:0x{mask:X}"),
        }
    }
}

impl FromStr for Encoding {
    type Err = String;

    /// Parses `uint`, `int`, `float`, `fixed:<scale>`, `sfixed:<scale>`, `flag:<mask>`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (kind, arg) = match lower.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (lower.as_str(), None),
        };
        let parse_arg = |arg: Option<&str>| -> std::result::Result<u64, String> {
            let arg = arg.ok_or_else(|| format!("encoding '{kind}' needs an argument"))?;
            let parsed = match arg.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => arg.parse::<u64>(),
            };
            parsed.map_err(|e| format!("bad argument '{arg}' for '{kind}': {e}"))
        };
        match kind {
            "uint" => Ok(Encoding::UInt),
            "int" => Ok(Encoding::Int),
            "float" => Ok(Encoding::Float),
            "fixed" | "sfixed" => {
                let scale = u32::try_from(parse_arg(arg)?)
                    .map_err(|_| "fixed-point scale does not fit in 32 bits".to_string())?;
                Ok(Encoding::Fixed {
                    scale,
                    signed: kind == "sfixed",
                })
            }
            "flag" => Ok(Encoding::Flag {
                mask: parse_arg(arg)?,
            }),
            other => Err(format!("unknown encoding '{other}'")),
        }
    }
}

/// Inclusive `[min, max]` range of semantic values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct ValueRange {
    /// Lowest accepted value
    pub min: f64,
    /// Highest accepted value
    pub max: f64,
}

impl ValueRange {
    /// Create a new range
    pub const fn new(min: f64, max: f64) -> Self {
        ValueRange { min, max }
    }

    /// The `[0, 1]` range used by booleans and normalized parameters
    pub const fn unit() -> Self {
        ValueRange::new(0.0, 1.0)
    }

    /// Check if a value lies inside the range (NaN never does)
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp a value into the range
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

impl From<[f64; 2]> for ValueRange {
    fn from(bounds: [f64; 2]) -> Self {
        ValueRange::new(bounds[0], bounds[1])
    }
}

impl From<ValueRange> for [f64; 2] {
    fn from(range: ValueRange) -> Self {
        [range.min, range.max]
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

impl FromStr for ValueRange {
    type Err = String;

    /// Parses `min,max`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (min, max) = s
            .split_once(',')
            .ok_or_else(|| format!("range '{s}' must look like min,max"))?;
        let min = min.trim().parse::<f64>().map_err(|e| e.to_string())?;
        let max = max.trim().parse::<f64>().map_err(|e| e.to_string())?;
        Ok(ValueRange::new(min, max))
    }
}

/// A typed semantic value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Toggle
    Bool(bool),
    /// Whole number
    Int(i64),
    /// Real number
    Float(f64),
    /// Named choice, resolved through a field's labels
    Label(String),
}

impl ParamValue {
    /// Numeric view of the value (labels and booleans have none)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Bool(_) | ParamValue::Label(_) => None,
        }
    }

    /// Short name of the value kind, for messages
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "boolean",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Label(_) => "label",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Label(v) => write!(f, "'{v}'"),
        }
    }
}

impl FromStr for ParamValue {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(v) = s.parse::<bool>() {
            return Ok(ParamValue::Bool(v));
        }
        if let Ok(v) = s.parse::<i64>() {
            return Ok(ParamValue::Int(v));
        }
        if let Ok(v) = s.parse::<f64>() {
            return Ok(ParamValue::Float(v));
        }
        Ok(ParamValue::Label(s.to_string()))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Label(v.to_string())
    }
}

/// Location and shape of one parameter inside a format's template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Semantic parameter name
    pub name: String,
    /// Byte index of the first byte
    pub offset: usize,
    /// Number of bytes (1, 2, 4 or 8)
    pub width: usize,
    /// Value representation
    pub encoding: Encoding,
    /// Byte order of the stored word
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Accepted semantic values
    pub range: ValueRange,
    /// Value used when a preset leaves the field out
    pub default: ParamValue,
    /// Names for the values `0..labels.len()` of an unsigned field
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

impl FieldDescriptor {
    /// Create a little-endian descriptor without labels
    pub fn new(
        name: impl Into<String>,
        offset: usize,
        width: usize,
        encoding: Encoding,
        range: ValueRange,
        default: ParamValue,
    ) -> Self {
        FieldDescriptor {
            name: name.into(),
            offset,
            width,
            encoding,
            byte_order: ByteOrder::Little,
            range,
            default,
            labels: Vec::new(),
        }
    }

    /// Set the byte order
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Attach value labels
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.offset + self.width
    }

    /// Byte range covered by the field
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// Check if this is a single-bit flag
    pub fn is_flag(&self) -> bool {
        matches!(self.encoding, Encoding::Flag { .. })
    }

    /// Check if the byte ranges intersect
    pub fn overlaps(&self, other: &FieldDescriptor) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Check if two flags pack disjoint bits into the same word
    pub fn shares_flag_word(&self, other: &FieldDescriptor) -> bool {
        match (self.encoding, other.encoding) {
            (Encoding::Flag { mask: a }, Encoding::Flag { mask: b }) => {
                self.offset == other.offset
                    && self.width == other.width
                    && self.byte_order == other.byte_order
                    && a & b == 0
            }
            _ => false,
        }
    }

    /// Index of a label, compared case-insensitively
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(label))
    }

    /// Semantic bounds the encoding can physically store in `width` bytes
    fn representable(&self) -> (f64, f64) {
        let bits = (self.width * 8) as u32;
        let unsigned_max = if bits >= 64 {
            i64::MAX as f64
        } else {
            ((1u64 << bits) - 1) as f64
        };
        let signed_min = -((1i128 << (bits - 1)) as f64);
        let signed_max = ((1i128 << (bits - 1)) - 1) as f64;
        match self.encoding {
            Encoding::UInt => (0.0, unsigned_max),
            Encoding::Int => (signed_min, signed_max),
            Encoding::Fixed { scale, signed } => {
                let scale = scale as f64;
                if signed {
                    (signed_min / scale, signed_max / scale)
                } else {
                    (0.0, unsigned_max / scale)
                }
            }
            Encoding::Float if self.width == 4 => (f32::MIN as f64, f32::MAX as f64),
            Encoding::Float => (f64::MIN, f64::MAX),
            Encoding::Flag { .. } => (0.0, 1.0),
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> PatchError {
        PatchError::InvalidDescriptor {
            field: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check the descriptor is internally consistent
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name must not be empty"));
        }
        if !FIELD_WIDTHS.contains(&self.width) {
            return Err(self.invalid(format!(
                "width {} is not one of {:?}",
                self.width, FIELD_WIDTHS
            )));
        }
        match self.encoding {
            Encoding::Float if self.width != 4 && self.width != 8 => {
                return Err(self.invalid("float fields must be 4 or 8 bytes wide"));
            }
            Encoding::Fixed { scale: 0, .. } => {
                return Err(self.invalid("fixed-point scale must be positive"));
            }
            Encoding::Flag { mask } => {
                if mask.count_ones() != 1 {
                    return Err(self.invalid(format!("flag mask 0x{mask:X} must set one bit")));
                }
                if self.width < 8 && mask >> (self.width * 8) != 0 {
                    return Err(self.invalid(format!(
                        "flag mask 0x{mask:X} does not fit in {} bytes",
                        self.width
                    )));
                }
            }
            _ => {}
        }

        let ValueRange { min, max } = self.range;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(self.invalid(format!("range {} is not a finite [min, max]", self.range)));
        }
        if self.encoding.is_integral() && (min.fract() != 0.0 || max.fract() != 0.0) {
            return Err(self.invalid(format!("integer range {} has fractional bounds", self.range)));
        }
        let (low, high) = self.representable();
        if min < low || max > high {
            return Err(self.invalid(format!(
                "range {} does not fit {} in {} bytes",
                self.range, self.encoding, self.width
            )));
        }

        if !self.labels.is_empty() {
            if self.encoding != Encoding::UInt {
                return Err(self.invalid("labels are only allowed on uint fields"));
            }
            let expected = ValueRange::new(0.0, (self.labels.len() - 1) as f64);
            if self.range != expected {
                return Err(self.invalid(format!(
                    "{} labels require range {}, found {}",
                    self.labels.len(),
                    expected,
                    self.range
                )));
            }
        }

        field::resolve(self, &self.default, RangePolicy::Reject)
            .map(|_| ())
            .map_err(|e| self.invalid(format!("default {} rejected: {e}", self.default)))
    }
}

/// Offset-ordered, validated set of descriptors for one format
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    fields: Vec<FieldDescriptor>,
    index: HashMap<String, usize>,
    limit: usize,
}

impl ParameterRegistry {
    /// Build a registry whose fields must all end at or before `limit`
    pub fn new(fields: Vec<FieldDescriptor>, limit: usize) -> Result<Self> {
        let mut registry = ParameterRegistry {
            fields: Vec::with_capacity(fields.len()),
            index: HashMap::with_capacity(fields.len()),
            limit,
        };
        for field in fields {
            registry.insert(field)?;
        }
        Ok(registry)
    }

    /// Add one descriptor, rejecting invalid, out-of-bounds or overlapping ones
    pub fn insert(&mut self, field: FieldDescriptor) -> Result<()> {
        field.validate()?;
        if field.end() > self.limit {
            return Err(PatchError::RegistryConflict(format!(
                "'{}' [{}..{}) extends past the {}-byte template",
                field.name,
                field.offset,
                field.end(),
                self.limit
            )));
        }
        if self.index.contains_key(&field.name) {
            return Err(PatchError::RegistryConflict(format!(
                "'{}' is declared twice",
                field.name
            )));
        }
        if let Some(existing) = self
            .fields
            .iter()
            .find(|existing| existing.overlaps(&field) && !existing.shares_flag_word(&field))
        {
            return Err(PatchError::RegistryConflict(format!(
                "'{}' [{}..{}) overlaps '{}' [{}..{})",
                field.name,
                field.offset,
                field.end(),
                existing.name,
                existing.offset,
                existing.end()
            )));
        }

        let position = self.fields.partition_point(|existing| {
            (existing.offset, existing.name.as_str()) <= (field.offset, field.name.as_str())
        });
        self.fields.insert(position, field);
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| (field.name.clone(), i))
            .collect();
    }

    /// Find a descriptor by name
    pub fn lookup(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// All descriptors, ascending by offset
    pub fn all(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Iterate descriptors in offset order
    pub fn iter(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the registry has no descriptors
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Template length the offsets are bounded by
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// One past the last byte covered by any descriptor
    pub fn extent(&self) -> usize {
        self.fields.iter().map(FieldDescriptor::end).max().unwrap_or(0)
    }

    /// Wrap into a lock for a discovery session
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }
}
