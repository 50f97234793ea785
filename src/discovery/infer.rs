//! Width and encoding inference
//!
//! Turns a run of differing bytes into a candidate field shape. Nothing here
//! is authoritative: the output is a guess an operator confirms or corrects
//! before promotion.

use super::ByteDiff;
use crate::registry::{ByteOrder, Encoding};
use bitflags::bitflags;
use std::ops::Range;

/// Widest field a candidate may span
pub const MAX_WIDTH: usize = 8;

bitflags! {
    /// Anomalies noticed while shaping a candidate
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct CandidateFlags: u8 {
        /// The differing run is longer than the widest field
        const OVERSIZED = 0x01;
        /// The window runs past the end of the capture
        const TRUNCATED = 0x02;
        /// Exactly one bit differs inside the window
        const SINGLE_BIT = 0x04;
        /// The run was merged across unchanged bytes
        const MERGED = 0x08;
    }
}

impl CandidateFlags {
    /// Short names of the set flags, `|`-separated
    pub fn describe(self) -> String {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Shape proposed for one differing run
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    /// Guessed field width
    pub width: usize,
    /// Byte window `[offset, offset + width)` clipped to the capture
    pub window: Range<usize>,
    /// Anomaly flags
    pub flags: CandidateFlags,
}

/// Smallest power of two covering `span`, capped at [`MAX_WIDTH`]
pub fn width_for_span(span: usize) -> usize {
    span.max(1).next_power_of_two().min(MAX_WIDTH)
}

/// Propose a window for a differing run inside a capture of `len` bytes
pub fn propose(run: &ByteDiff, len: usize) -> Proposal {
    let span = run.len();
    let width = width_for_span(span);
    let mut flags = CandidateFlags::empty();
    if span > MAX_WIDTH {
        flags |= CandidateFlags::OVERSIZED;
    }
    if run.merged {
        flags |= CandidateFlags::MERGED;
    }
    let end = run.offset + width;
    if end > len {
        flags |= CandidateFlags::TRUNCATED;
    }
    Proposal {
        width,
        window: run.offset..end.min(len),
        flags,
    }
}

/// Read a window as an unsigned word; missing trailing bytes count as zero
fn word(bytes: &[u8], width: usize, order: ByteOrder) -> u64 {
    let mut padded = [0u8; MAX_WIDTH];
    let n = bytes.len().min(width);
    padded[..n].copy_from_slice(&bytes[..n]);
    order.read(&padded[..width])
}

/// Mask of the single bit that differs between two windows, if exactly one does
pub fn single_bit(before: &[u8], after: &[u8], width: usize, order: ByteOrder) -> Option<u64> {
    let xor = word(before, width, order) ^ word(after, width, order);
    (xor.count_ones() == 1).then_some(xor)
}

/// Check that a window reads as an ordinary float
pub fn plausible_float(bytes: &[u8], order: ByteOrder) -> bool {
    let value = match bytes.len() {
        4 => f32::from_bits(order.read(bytes) as u32) as f64,
        8 => f64::from_bits(order.read(bytes)),
        _ => return false,
    };
    value.is_finite() && value.abs() <= 1e6 && (value == 0.0 || value.abs() >= 1e-6)
}

fn reads_negative(bytes: &[u8], width: usize, order: ByteOrder) -> bool {
    let raw = word(bytes, width, order);
    raw >> (width * 8 - 1) & 1 == 1
}

/// Guess the encoding from every observed value of a window
pub fn guess_encoding(samples: &[&[u8]], width: usize, order: ByteOrder) -> Encoding {
    if let [first, rest @ ..] = samples {
        let masks: Vec<Option<u64>> = rest
            .iter()
            .map(|other| single_bit(first, other, width, order))
            .collect();
        if let Some(Some(mask)) = masks.first() {
            if masks.iter().all(|m| *m == Some(*mask)) {
                return Encoding::Flag { mask: *mask };
            }
        }
    }

    let complete = samples.iter().all(|s| s.len() == width);
    if complete
        && (width == 4 || width == 8)
        && samples.iter().all(|s| plausible_float(s, order))
    {
        return Encoding::Float;
    }
    if samples.iter().any(|s| reads_negative(s, width, order)) {
        Encoding::Int
    } else {
        Encoding::UInt
    }
}
