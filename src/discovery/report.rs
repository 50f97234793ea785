//! Candidate report export
//!
//! Writes discovery candidates as CSV so sessions can be compared across
//! synth versions or shared with whoever confirms them.

use super::DiffCandidate;
use crate::Result;
use serde::Serialize;
use std::io;

#[derive(Serialize)]
struct CandidateRow {
    index: usize,
    offset: usize,
    width: usize,
    changed_start: usize,
    changed_end: usize,
    before: String,
    after: String,
    encoding: String,
    byte_order: String,
    confidence: String,
    flags: String,
}

/// Write one CSV row per candidate, with a header row
pub fn write_csv<W: io::Write>(candidates: &[DiffCandidate], writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for (index, candidate) in candidates.iter().enumerate() {
        csv.serialize(CandidateRow {
            index,
            offset: candidate.offset,
            width: candidate.width_guess,
            changed_start: candidate.changed.start,
            changed_end: candidate.changed.end,
            before: hex::encode(&candidate.before_bytes),
            after: hex::encode(&candidate.after_bytes),
            encoding: candidate.encoding_guess.to_string(),
            byte_order: candidate.byte_order.to_string(),
            confidence: candidate.confidence.to_string(),
            flags: candidate.flags.describe(),
        })?;
    }
    csv.flush()?;
    Ok(())
}
