//! Field value packing
//!
//! Turns a semantic [`ParamValue`] into the raw word stored for a
//! [`FieldDescriptor`] and back. All range and type checks happen in
//! [`resolve`] so that nothing is written before a value is known to be valid.
//! A value the stored word cannot hold exactly is rejected, or reported as
//! quantized under the lenient policy.

use super::RangePolicy;
use crate::registry::{Encoding, FieldDescriptor, ParamValue};
use crate::{PatchError, Result};

/// A value ready to be written
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Resolved {
    /// Raw word (for flags: 1 = set, 0 = clear)
    pub bits: u64,
    /// `(requested, applied)` when the range policy clamped the value
    pub clamped: Option<(f64, f64)>,
    /// `(requested, stored)` when the word cannot hold the value exactly
    pub quantized: Option<(f64, f64)>,
}

fn mismatch(field: &FieldDescriptor, reason: impl Into<String>) -> PatchError {
    PatchError::TypeMismatch {
        field: field.name.clone(),
        reason: reason.into(),
    }
}

fn width_mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

fn sign_extend(raw: u64, width: usize) -> i64 {
    let shift = 64 - (width * 8) as u32;
    ((raw << shift) as i64) >> shift
}

/// Validate a value against a field and compute its raw word
pub(crate) fn resolve(
    field: &FieldDescriptor,
    value: &ParamValue,
    policy: RangePolicy,
) -> Result<Resolved> {
    if let Encoding::Flag { .. } = field.encoding {
        let on = match value {
            ParamValue::Bool(on) => *on,
            ParamValue::Int(0) => false,
            ParamValue::Int(1) => true,
            other => {
                return Err(mismatch(
                    field,
                    format!("expected a boolean, got {} {other}", other.kind()),
                ))
            }
        };
        return Ok(Resolved {
            bits: on as u64,
            clamped: None,
            quantized: None,
        });
    }

    let number = match value {
        ParamValue::Bool(_) => return Err(mismatch(field, "expected a number, got a boolean")),
        ParamValue::Int(v) => *v as f64,
        ParamValue::Float(v) => *v,
        ParamValue::Label(label) => field
            .label_index(label)
            .map(|i| i as f64)
            .ok_or_else(|| mismatch(field, format!("unknown label '{label}'")))?,
    };

    if number.is_finite() && field.encoding.is_integral() && number.fract() != 0.0 {
        return Err(mismatch(field, format!("expected an integer, got {number}")));
    }

    let (applied, clamped) = if field.range.contains(number) {
        (number, None)
    } else {
        let out_of_range = PatchError::ValueOutOfRange {
            field: field.name.clone(),
            value: number,
            min: field.range.min,
            max: field.range.max,
        };
        match policy {
            RangePolicy::Clamp if !number.is_nan() => {
                let applied = field.range.clamp(number);
                (applied, Some((number, applied)))
            }
            _ => return Err(out_of_range),
        }
    };

    let bits = to_bits(field, applied);
    let stored = stored_value(field, bits);
    let quantized = if stored == applied {
        None
    } else {
        match policy {
            RangePolicy::Reject => {
                return Err(mismatch(
                    field,
                    format!("{applied} is not storable exactly, nearest stored value is {stored}"),
                ))
            }
            RangePolicy::Clamp => Some((applied, stored)),
        }
    };

    Ok(Resolved {
        bits,
        clamped,
        quantized,
    })
}

/// Numeric value a freshly computed word reads back as
fn stored_value(field: &FieldDescriptor, bits: u64) -> f64 {
    match field.encoding {
        Encoding::UInt => bits as f64,
        Encoding::Int => sign_extend(bits, field.width) as f64,
        Encoding::Fixed { scale, signed } => {
            let raw = if signed {
                sign_extend(bits, field.width) as f64
            } else {
                bits as f64
            };
            raw / scale as f64
        }
        Encoding::Float if field.width == 4 => f32::from_bits(bits as u32) as f64,
        Encoding::Float => f64::from_bits(bits),
        Encoding::Flag { .. } => bits as f64,
    }
}

/// Raw word for an in-range, type-checked value
fn to_bits(field: &FieldDescriptor, value: f64) -> u64 {
    let mask = width_mask(field.width);
    match field.encoding {
        Encoding::UInt => value as u64,
        Encoding::Int => (value as i64) as u64 & mask,
        Encoding::Fixed { scale, signed } => {
            let raw = (value * scale as f64).round();
            if signed {
                (raw as i64) as u64 & mask
            } else {
                (raw as u64).min(mask)
            }
        }
        Encoding::Float if field.width == 4 => (value as f32).to_bits() as u64,
        Encoding::Float => value.to_bits(),
        Encoding::Flag { .. } => (value != 0.0) as u64,
    }
}

/// Store a resolved word into `out` at the field's offset
pub(crate) fn write(field: &FieldDescriptor, bits: u64, out: &mut [u8]) -> Result<()> {
    let len = out.len();
    let slot = out.get_mut(field.byte_range()).ok_or_else(|| {
        PatchError::MalformedPreset(format!(
            "field '{}' [{}..{}) lies outside a {len}-byte blob",
            field.name,
            field.offset,
            field.end()
        ))
    })?;
    match field.encoding {
        Encoding::Flag { mask } => {
            let word = field.byte_order.read(slot);
            let word = if bits != 0 { word | mask } else { word & !mask };
            field.byte_order.write(word, slot);
        }
        _ => field.byte_order.write(bits, slot),
    }
    Ok(())
}

/// Extract a field's value from a blob
pub(crate) fn read(field: &FieldDescriptor, data: &[u8]) -> Result<ParamValue> {
    let slot = data.get(field.byte_range()).ok_or_else(|| {
        PatchError::MalformedPreset(format!(
            "blob of {} bytes is too short for field '{}' [{}..{})",
            data.len(),
            field.name,
            field.offset,
            field.end()
        ))
    })?;
    Ok(value_of(field, field.byte_order.read(slot)))
}

/// Typed value of a stored word
///
/// Labelled fields yield their label when the index has one.
fn value_of(field: &FieldDescriptor, raw: u64) -> ParamValue {
    match field.encoding {
        Encoding::UInt => match usize::try_from(raw).ok().and_then(|i| field.labels.get(i)) {
            Some(label) => ParamValue::Label(label.clone()),
            None => i64::try_from(raw)
                .map(ParamValue::Int)
                .unwrap_or(ParamValue::Float(raw as f64)),
        },
        Encoding::Int => ParamValue::Int(sign_extend(raw, field.width)),
        Encoding::Fixed { .. } | Encoding::Float => ParamValue::Float(stored_value(field, raw)),
        Encoding::Flag { mask } => ParamValue::Bool(raw & mask != 0),
    }
}

/// Canonical form of a value as decode would return it
///
/// Values the field rejects are returned unchanged.
pub(crate) fn normalize(field: &FieldDescriptor, value: &ParamValue) -> ParamValue {
    match resolve(field, value, RangePolicy::Reject) {
        Ok(resolved) => {
            let raw = match field.encoding {
                Encoding::Flag { mask } if resolved.bits != 0 => mask,
                Encoding::Flag { .. } => 0,
                _ => resolved.bits,
            };
            value_of(field, raw)
        }
        Err(_) => value.clone(),
    }
}

/// Check a decoded value against the declared range
pub(crate) fn in_range(field: &FieldDescriptor, value: &ParamValue) -> bool {
    match value {
        ParamValue::Bool(_) => field.is_flag(),
        ParamValue::Label(label) => field.label_index(label).is_some(),
        other => other.as_f64().is_some_and(|v| field.range.contains(v)),
    }
}

/// Flag bits of `field` that live in its `index`-th stored byte
pub(crate) fn flag_bits_in_byte(field: &FieldDescriptor, index: usize) -> u8 {
    match field.encoding {
        Encoding::Flag { mask } => (mask >> field.byte_order.byte_shift(index, field.width)) as u8,
        _ => 0,
    }
}
