//! Binary Synthesizer Preset Codec
//!
//! Encodes and decodes proprietary synthesizer preset files (FL Studio 3xOsc
//! `.fst` captures, VST2 `.fxp` program files) to and from a semantic
//! parameter model. Every known parameter is described by a [`FieldDescriptor`]
//! bound to a byte offset inside a reference template; everything the registry
//! does not describe is carried through untouched.
//!
//! # Features
//! - Data-driven parameter registry with construction-time overlap checks
//! - Lossless encode / decode / re-encode with a residual byte map
//! - Per-format adapters for header sniffing and length recomputation
//! - Offline offset discovery by diffing captures that differ in one control
//! - JSON descriptor tables and template files loaded once at startup
//!
//! # Crate feature flags
//! - `cli` (default): the `patchcodec` operator binary (`clap`, `tracing-subscriber`)
//!
//! # Quick start
//! ## Encode with the built-in formats
//! ```no_run
//! use patchcodec::{Codec, ParamValue, SemanticPreset};
//! let codec = Codec::builtin().unwrap();
//! let mut preset = SemanticPreset::new();
//! preset.set("mix_osc1", ParamValue::Float(0.5));
//! preset.set("osc2_detune", ParamValue::Int(12));
//! let encoded = codec.encode("3xosc", &preset).unwrap();
//! std::fs::write("bass.fst", encoded.blob.as_bytes()).unwrap();
//! ```
//!
//! ## Decode and re-encode a capture
//! ```no_run
//! use patchcodec::Codec;
//! let codec = Codec::builtin().unwrap();
//! let data = std::fs::read("capture.fxp").unwrap();
//! let decoded = codec.decode_auto(&data).unwrap();
//! let again = codec.reencode(&decoded).unwrap();
//! assert_eq!(again.blob.as_bytes(), &data[..]);
//! ```
//!
//! ## Discover a new offset
//! ```no_run
//! use patchcodec::discovery::{DiffOptions, DiscoverySession};
//! use patchcodec::ByteOrder;
//! let base = std::fs::read("pan_center.fst").unwrap();
//! let left = std::fs::read("pan_left.fst").unwrap();
//! let right = std::fs::read("pan_right.fst").unwrap();
//! let mut session =
//!     DiscoverySession::new(base, &left, DiffOptions::default(), ByteOrder::Little).unwrap();
//! session.confirm(&right).unwrap();
//! for candidate in session.candidates() {
//!     println!("{candidate}");
//! }
//! ```

#![warn(missing_docs)]

pub mod codec; // Encode / Decode Engine
pub mod discovery; // Offline Offset Discovery
pub mod format; // Format Adapters & Catalog
pub mod registry; // Parameter Registry
pub mod template; // Binary Template Store

/// Error types for preset codec operations
#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    /// Format identifier is not registered
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// Semantic value violates the field's declared range
    #[error("Value {value} for field '{field}' is outside [{min}, {max}]")]
    ValueOutOfRange {
        /// Offending field
        field: String,
        /// Requested value
        value: f64,
        /// Declared minimum
        min: f64,
        /// Declared maximum
        max: f64,
    },

    /// Blob is too short, has the wrong length or a broken header
    #[error("Malformed preset: {0}")]
    MalformedPreset(String),

    /// Semantic key without a matching descriptor (only fatal in strict mode)
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Discovery captures are not directly comparable
    #[error("Capture length mismatch: {left} vs {right} bytes")]
    LengthMismatch {
        /// Length of the first capture
        left: usize,
        /// Length of the second capture
        right: usize,
    },

    /// Overlapping descriptors, at construction time or on promotion
    #[error("Registry conflict: {0}")]
    RegistryConflict(String),

    /// A single descriptor is not internally consistent
    #[error("Invalid descriptor '{field}': {reason}")]
    InvalidDescriptor {
        /// Descriptor name
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Value kind cannot be encoded by the field's encoding
    #[error("Type mismatch for field '{field}': {reason}")]
    TypeMismatch {
        /// Offending field
        field: String,
        /// What was wrong with the value
        reason: String,
    },

    /// Promotion attempted on a candidate that was never confirmed
    #[error("Candidate at offset {offset} cannot be promoted (confidence: {confidence})")]
    UnconfirmedCandidate {
        /// Candidate offset
        offset: usize,
        /// Confidence at the time of the attempt
        confidence: String,
    },

    /// Discovery session has no candidate at the requested index
    #[error("No candidate #{index} (session has {count})")]
    NoSuchCandidate {
        /// Requested index
        index: usize,
        /// Number of candidates in the session
        count: usize,
    },

    /// IO error from filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Descriptor table or configuration could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Discovery report could not be written
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, PatchError>;

// Public API exports
pub use codec::{
    BinaryBlob, Codec, CodecConfig, CodecWarning, DecodedPreset, Encoded, RangePolicy, Residuals,
    SemanticPreset, UnknownFieldPolicy,
};
pub use discovery::{diff, ByteDiff, Confidence, DiffCandidate, DiscoverySession};
pub use format::{detect_format, Format, FormatAdapter, FormatCatalog, LengthRule};
pub use registry::{
    ByteOrder, Encoding, FieldDescriptor, ParamValue, ParameterRegistry, SharedRegistry,
    ValueRange,
};
pub use template::TemplateStore;
