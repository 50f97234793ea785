//! Offline Offset Discovery
//!
//! Finds where an undocumented parameter lives by comparing captures that
//! differ in exactly one control:
//!
//! 1. `baseline` vs `varied` proposes candidates ([`diff`], [`DiscoverySession::new`])
//! 2. `baseline` vs an independent `confirmation` grades them ([`DiscoverySession::confirm`])
//! 3. an operator promotes a graded candidate into a registry ([`DiscoverySession::promote`])
//!
//! Nothing in this module touches a registry except promotion, which holds
//! the registry's write lock for the whole check-and-insert.

pub mod infer;
pub mod report;

pub use infer::CandidateFlags;

use crate::registry::{ByteOrder, Encoding, FieldDescriptor, ParamValue, ParameterRegistry, ValueRange};
use crate::{PatchError, Result};
use parking_lot::RwLock;
use std::fmt;
use std::ops::Range;
use tracing::{debug, info};

/// One run of differing bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteDiff {
    /// First differing byte
    pub offset: usize,
    /// Bytes of the first capture
    pub before: Vec<u8>,
    /// Bytes of the second capture
    pub after: Vec<u8>,
    /// Run spans unchanged bytes (see [`DiffOptions::merge_gap`])
    pub merged: bool,
}

impl ByteDiff {
    /// Number of bytes in the run
    pub fn len(&self) -> usize {
        self.before.len()
    }

    /// Check if the run is empty
    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }

    /// Byte range of the run
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// Diff grouping options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Differing runs separated by at most this many equal bytes form one run
    pub merge_gap: usize,
}

/// Group the differing bytes of two equal-length captures into runs
pub fn diff_runs(a: &[u8], b: &[u8], options: DiffOptions) -> Result<Vec<ByteDiff>> {
    if a.len() != b.len() {
        return Err(PatchError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut runs: Vec<Range<usize>> = Vec::new();
    for i in (0..a.len()).filter(|&i| a[i] != b[i]) {
        match runs.last_mut() {
            Some(run) if i - run.end <= options.merge_gap => run.end = i + 1,
            _ => runs.push(i..i + 1),
        }
    }

    Ok(runs
        .into_iter()
        .map(|run| ByteDiff {
            offset: run.start,
            before: a[run.clone()].to_vec(),
            after: b[run.clone()].to_vec(),
            merged: run.clone().any(|i| a[i] == b[i]),
        })
        .collect())
}

/// Propose little-endian candidates for every contiguous differing run
pub fn diff(a: &[u8], b: &[u8]) -> Result<Vec<DiffCandidate>> {
    diff_with(a, b, DiffOptions::default(), ByteOrder::Little)
}

/// Propose candidates with explicit grouping and byte order
pub fn diff_with(
    a: &[u8],
    b: &[u8],
    options: DiffOptions,
    byte_order: ByteOrder,
) -> Result<Vec<DiffCandidate>> {
    Ok(diff_runs(a, b, options)?
        .iter()
        .map(|run| DiffCandidate::from_run(run, a, b, byte_order))
        .collect())
}

/// How well a candidate held up against confirmation captures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Confidence {
    /// Seen in one comparison only
    #[default]
    Unconfirmed,
    /// A confirmation contradicted it
    Low,
    /// A confirmation changed part of its window and nothing else
    Medium,
    /// A confirmation changed exactly the same bytes and nothing else
    High,
}

impl Confidence {
    /// Check if an operator may promote a candidate at this level
    pub fn is_promotable(self) -> bool {
        matches!(self, Confidence::Medium | Confidence::High)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Confidence::Unconfirmed => "unconfirmed",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(name)
    }
}

/// Provisional field proposed by a diff
#[derive(Debug, Clone, PartialEq)]
pub struct DiffCandidate {
    /// First byte of the proposed field
    pub offset: usize,
    /// Proposed width (power of two, at most 8)
    pub width_guess: usize,
    /// Bytes that actually differed
    pub changed: Range<usize>,
    /// Baseline bytes of the window
    pub before_bytes: Vec<u8>,
    /// Varied bytes of the window
    pub after_bytes: Vec<u8>,
    /// Proposed encoding
    pub encoding_guess: Encoding,
    /// Byte order the guesses were made with
    pub byte_order: ByteOrder,
    /// Grade after confirmation
    pub confidence: Confidence,
    /// Anomalies
    pub flags: CandidateFlags,
}

impl DiffCandidate {
    fn from_run(run: &ByteDiff, a: &[u8], b: &[u8], byte_order: ByteOrder) -> Self {
        let proposal = infer::propose(run, a.len());
        let before_bytes = a[proposal.window.clone()].to_vec();
        let after_bytes = b[proposal.window.clone()].to_vec();
        let mut flags = proposal.flags;
        if infer::single_bit(&before_bytes, &after_bytes, proposal.width, byte_order).is_some() {
            flags |= CandidateFlags::SINGLE_BIT;
        }
        let encoding_guess = infer::guess_encoding(
            &[before_bytes.as_slice(), after_bytes.as_slice()],
            proposal.width,
            byte_order,
        );
        DiffCandidate {
            offset: run.offset,
            width_guess: proposal.width,
            changed: run.range(),
            before_bytes,
            after_bytes,
            encoding_guess,
            byte_order,
            confidence: Confidence::Unconfirmed,
            flags,
        }
    }

    /// Proposed field window, clipped to the capture
    pub fn window(&self) -> Range<usize> {
        self.offset..self.offset + self.before_bytes.len()
    }

    /// Check if the candidate may be promoted
    pub fn is_promotable(&self) -> bool {
        self.confidence.is_promotable() && !self.flags.contains(CandidateFlags::TRUNCATED)
    }

    /// Grade against the bytes a confirmation changed
    fn grade(&self, confirm_changed: &[usize], stray: bool) -> Confidence {
        let window = self.window();
        let inside: Vec<usize> = confirm_changed
            .iter()
            .copied()
            .filter(|i| window.contains(i))
            .collect();
        if inside.is_empty() || stray {
            return Confidence::Low;
        }
        let varied: Vec<usize> = self
            .window()
            .zip(self.before_bytes.iter().zip(&self.after_bytes))
            .filter(|(_, (before, after))| before != after)
            .map(|(i, _)| i)
            .collect();
        if inside == varied {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }
}

impl fmt::Display for DiffCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offset {} width {} ({} {}) {} -> {} [{}]",
            self.offset,
            self.width_guess,
            self.encoding_guess,
            self.byte_order,
            hex::encode(&self.before_bytes),
            hex::encode(&self.after_bytes),
            self.confidence
        )?;
        if !self.flags.is_empty() {
            write!(f, " {}", self.flags.describe())?;
        }
        Ok(())
    }
}

/// Operator's decision for a candidate being promoted
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    /// Parameter name
    pub name: String,
    /// Encoding override; the candidate's guess when `None`
    pub encoding: Option<Encoding>,
    /// Accepted semantic values
    pub range: ValueRange,
    /// Default value
    pub default: ParamValue,
    /// Value labels for uint fields
    pub labels: Vec<String>,
}

impl Promotion {
    /// Promotion with the candidate's encoding guess
    pub fn new(name: impl Into<String>, range: ValueRange, default: impl Into<ParamValue>) -> Self {
        Promotion {
            name: name.into(),
            encoding: None,
            range,
            default: default.into(),
            labels: Vec::new(),
        }
    }

    /// Override the encoding
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// One comparison session over a fixed baseline capture
#[derive(Debug, Clone)]
pub struct DiscoverySession {
    baseline: Vec<u8>,
    options: DiffOptions,
    byte_order: ByteOrder,
    candidates: Vec<DiffCandidate>,
    confirmations: usize,
}

impl DiscoverySession {
    /// Diff `baseline` against a capture with one control varied
    pub fn new(
        baseline: Vec<u8>,
        varied: &[u8],
        options: DiffOptions,
        byte_order: ByteOrder,
    ) -> Result<Self> {
        let candidates = diff_with(&baseline, varied, options, byte_order)?;
        debug!(
            len = baseline.len(),
            candidates = candidates.len(),
            "discovery session opened"
        );
        Ok(DiscoverySession {
            baseline,
            options,
            byte_order,
            candidates,
            confirmations: 0,
        })
    }

    /// Grade every candidate against an independent capture of the same control
    ///
    /// A candidate's confidence never rises above what an earlier
    /// confirmation gave it.
    pub fn confirm(&mut self, confirmation: &[u8]) -> Result<&[DiffCandidate]> {
        let runs = diff_runs(&self.baseline, confirmation, self.options)?;
        let changed: Vec<usize> = runs
            .iter()
            .flat_map(|run| run.range())
            .filter(|&i| self.baseline[i] != confirmation[i])
            .collect();
        let stray = changed
            .iter()
            .any(|i| !self.candidates.iter().any(|c| c.window().contains(i)));

        for candidate in &mut self.candidates {
            let mut grade = candidate.grade(&changed, stray);
            let window = candidate.window();
            let confirmed_bytes = &confirmation[window];

            if candidate.flags.contains(CandidateFlags::SINGLE_BIT) {
                let same_bit = infer::single_bit(
                    &candidate.before_bytes,
                    confirmed_bytes,
                    candidate.width_guess,
                    candidate.byte_order,
                ) == infer::single_bit(
                    &candidate.before_bytes,
                    &candidate.after_bytes,
                    candidate.width_guess,
                    candidate.byte_order,
                );
                if !same_bit {
                    grade = Confidence::Low;
                }
            } else {
                candidate.encoding_guess = infer::guess_encoding(
                    &[
                        candidate.before_bytes.as_slice(),
                        candidate.after_bytes.as_slice(),
                        confirmed_bytes,
                    ],
                    candidate.width_guess,
                    candidate.byte_order,
                );
            }

            candidate.confidence = match candidate.confidence {
                Confidence::Unconfirmed => grade,
                earlier => earlier.min(grade),
            };
        }
        self.confirmations += 1;
        Ok(&self.candidates)
    }

    /// Candidates in offset order
    pub fn candidates(&self) -> &[DiffCandidate] {
        &self.candidates
    }

    /// Candidate by index
    pub fn candidate(&self, index: usize) -> Option<&DiffCandidate> {
        self.candidates.get(index)
    }

    /// Number of confirmation captures applied
    pub fn confirmations(&self) -> usize {
        self.confirmations
    }

    /// Byte order candidates are read with
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Promote candidate `index` into `registry`
    pub fn promote(
        &self,
        index: usize,
        registry: &RwLock<ParameterRegistry>,
        promotion: Promotion,
    ) -> Result<FieldDescriptor> {
        let candidate = self.candidate(index).ok_or(PatchError::NoSuchCandidate {
            index,
            count: self.candidates.len(),
        })?;
        promote(candidate, registry, promotion)
    }
}

/// Turn a confirmed candidate into a descriptor and insert it
///
/// Only `Medium` and `High` candidates are accepted. The write lock is held
/// from the overlap check to the insert.
pub fn promote(
    candidate: &DiffCandidate,
    registry: &RwLock<ParameterRegistry>,
    promotion: Promotion,
) -> Result<FieldDescriptor> {
    if !candidate.is_promotable() {
        return Err(PatchError::UnconfirmedCandidate {
            offset: candidate.offset,
            confidence: candidate.confidence.to_string(),
        });
    }

    let field = FieldDescriptor::new(
        promotion.name,
        candidate.offset,
        candidate.width_guess,
        promotion.encoding.unwrap_or(candidate.encoding_guess),
        promotion.range,
        promotion.default,
    )
    .with_byte_order(candidate.byte_order)
    .with_labels(promotion.labels);

    let mut registry = registry.write();
    registry.insert(field.clone())?;
    info!(
        field = %field.name,
        offset = field.offset,
        width = field.width,
        encoding = %field.encoding,
        confidence = %candidate.confidence,
        "promoted discovered field"
    );
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> Vec<u8> {
        (0..64u8).map(|i| i.wrapping_mul(37)).collect()
    }

    #[test]
    fn test_two_byte_change_is_one_candidate() {
        let a = capture();
        let mut b = a.clone();
        b[10] ^= 0x5A;
        b[11] ^= 0x01;
        let candidates = diff(&a, &b).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].offset, 10);
        assert_eq!(candidates[0].width_guess, 2);
        assert_eq!(candidates[0].changed, 10..12);
        assert_eq!(candidates[0].confidence, Confidence::Unconfirmed);
    }

    #[test]
    fn test_single_byte_change_is_width_one() {
        let a = capture();
        let mut b = a.clone();
        b[10] ^= 0x30;
        let candidates = diff(&a, &b).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!((candidates[0].offset, candidates[0].width_guess), (10, 1));
    }

    #[test]
    fn test_length_mismatch() {
        let a = capture();
        assert!(matches!(
            diff(&a, &a[..63]),
            Err(PatchError::LengthMismatch {
                left: 64,
                right: 63
            })
        ));
    }

    #[test]
    fn test_identical_captures_have_no_candidates() {
        let a = capture();
        assert!(diff(&a, &a).unwrap().is_empty());
    }

    #[test]
    fn test_merge_gap_joins_runs() {
        let a = capture();
        let mut b = a.clone();
        b[20] ^= 1;
        b[22] ^= 1;
        assert_eq!(diff(&a, &b).unwrap().len(), 2);

        let merged = diff_with(&a, &b, DiffOptions { merge_gap: 1 }, ByteOrder::Little).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].changed, 20..23);
        assert_eq!(merged[0].width_guess, 4);
        assert!(merged[0].flags.contains(CandidateFlags::MERGED));
    }

    #[test]
    fn test_confirmation_grades() {
        let base = vec![0u8; 32];
        let mut varied = base.clone();
        varied[8..12].copy_from_slice(&40u32.to_le_bytes());

        let mut same = base.clone();
        same[8..12].copy_from_slice(&80u32.to_le_bytes());
        let mut session =
            DiscoverySession::new(base.clone(), &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        assert_eq!(session.candidates()[0].width_guess, 1);
        session.confirm(&same).unwrap();
        assert_eq!(session.candidates()[0].confidence, Confidence::High);

        let mut elsewhere = base.clone();
        elsewhere[20] = 1;
        session.confirm(&elsewhere).unwrap();
        assert_eq!(session.candidates()[0].confidence, Confidence::Low);
        assert_eq!(session.confirmations(), 2);
    }

    #[test]
    fn test_partial_confirmation_is_medium() {
        let base = vec![0u8; 32];
        let mut varied = base.clone();
        varied[8..12].copy_from_slice(&0x0102_0304u32.to_le_bytes());
        let mut confirm = base.clone();
        confirm[8] = 0x07;

        let mut session =
            DiscoverySession::new(base, &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        session.confirm(&confirm).unwrap();
        let candidate = &session.candidates()[0];
        assert_eq!(candidate.width_guess, 4);
        assert_eq!(candidate.confidence, Confidence::Medium);
    }

    #[test]
    fn test_flag_must_toggle_same_bit() {
        let base = vec![0u8; 16];
        let mut varied = base.clone();
        varied[5] = 0x10;
        let mut other_bit = base.clone();
        other_bit[5] = 0x20;

        let mut session =
            DiscoverySession::new(base, &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        assert_eq!(
            session.candidates()[0].encoding_guess,
            Encoding::Flag { mask: 0x10 }
        );
        session.confirm(&other_bit).unwrap();
        assert_eq!(session.candidates()[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_promotion_requires_confirmation() {
        let base = vec![0u8; 32];
        let mut varied = base.clone();
        varied[4] = 9;
        let session =
            DiscoverySession::new(base, &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        let registry = ParameterRegistry::new(Vec::new(), 32).unwrap().into_shared();

        let result = session.promote(
            0,
            &registry,
            Promotion::new("pan", ValueRange::new(0.0, 255.0), 0i64),
        );
        assert!(matches!(
            result,
            Err(PatchError::UnconfirmedCandidate { offset: 4, .. })
        ));
        assert!(registry.read().is_empty());
    }

    #[test]
    fn test_promotion_rejects_unknown_index() {
        let base = vec![0u8; 32];
        let mut varied = base.clone();
        varied[4] = 9;
        let session =
            DiscoverySession::new(base, &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        let registry = ParameterRegistry::new(Vec::new(), 32).unwrap().into_shared();

        let result = session.promote(
            3,
            &registry,
            Promotion::new("pan", ValueRange::new(0.0, 255.0), 0i64),
        );
        assert!(matches!(
            result,
            Err(PatchError::NoSuchCandidate { index: 3, count: 1 })
        ));
        assert!(registry.read().is_empty());
    }

    #[test]
    fn test_promotion_inserts_and_detects_overlap() {
        let base = vec![0u8; 32];
        let mut varied = base.clone();
        varied[4] = 9;
        let mut confirm = base.clone();
        confirm[4] = 17;
        let mut session =
            DiscoverySession::new(base, &varied, DiffOptions::default(), ByteOrder::Little)
                .unwrap();
        session.confirm(&confirm).unwrap();

        let registry = ParameterRegistry::new(Vec::new(), 32).unwrap().into_shared();
        let field = session
            .promote(
                0,
                &registry,
                Promotion::new("pan", ValueRange::new(0.0, 255.0), 0i64),
            )
            .unwrap();
        assert_eq!((field.offset, field.width), (4, 1));
        assert_eq!(field.encoding, Encoding::UInt);
        assert_eq!(registry.read().lookup("pan"), Some(&field));

        let again = session.promote(
            0,
            &registry,
            Promotion::new("pan_again", ValueRange::new(0.0, 255.0), 0i64),
        );
        assert!(matches!(again, Err(PatchError::RegistryConflict(_))));
    }

    #[test]
    fn test_candidate_display() {
        let a = vec![0u8; 8];
        let mut b = a.clone();
        b[2] = 0x2A;
        let candidates = diff(&a, &b).unwrap();
        assert_eq!(
            candidates[0].to_string(),
            "offset 2 width 1 (uint little) 00 -> 2a [unconfirmed]"
        );
    }
}
