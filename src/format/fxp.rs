//! VST2 `.fxp` Adapter
//!
//! Program files start with a big-endian `CcnK` header. Two bodies exist:
//! `FxCk` carries a flat list of normalized `f32` parameters, `FPCh` carries
//! an opaque plugin chunk prefixed by its length.
//!
//! ```text
//! 0   "CcnK"  u32 byteSize (file length - 8)
//! 8   "FxCk" | "FPCh"
//! 12  u32 version   16 fxID ("XfsX")   20 u32 fxVersion
//! 24  u32 numParams | numPrograms
//! 28  program name, 28 bytes NUL padded
//! 56  FxCk: f32 params[numParams]
//! 56  FPCh: u32 chunkSize (file length - 60), chunk bytes
//! ```
//!
//! The seeded registry addresses the `FxCk` parameter list. `FPCh` captures
//! pass structural validation but need a descriptor table of their own.

use super::{FormatAdapter, LengthKind};
use crate::registry::{ByteOrder, Encoding, FieldDescriptor, ParamValue, ValueRange};
use crate::{PatchError, Result};
use nom::branch::alt;
use nom::bytes::complete::{tag, take};
use nom::combinator::value;
use nom::number::complete::be_u32;
use nom::IResult;
use tracing::warn;

/// Format identifier
pub const FORMAT_ID: &str = "serum";

const CCNK: &[u8] = b"CcnK";
const FXCK: &[u8] = b"FxCk";
const FPCH: &[u8] = b"FPCh";
const SYNTH_ID: &str = "XfsX";

/// Bytes before the parameter list or chunk length
pub const HEADER_LENGTH: usize = 56;
const CHUNK_START: usize = HEADER_LENGTH + 4;
const NAME_LENGTH: usize = 28;
const FACTORY_SLOTS: usize = 64;

/// Oscillator parameters in slot order, with their factory defaults
const OSC_PARAMS: [(&str, f64); 13] = [
    ("volume", 0.75),
    ("pan", 0.5),
    ("octave", 0.5),
    ("semi", 0.5),
    ("fine", 0.5),
    ("unison", 0.0),
    ("unison_detune", 0.25),
    ("unison_blend", 0.75),
    ("warp", 0.0),
    ("coarse_pitch", 0.5),
    ("wt_pos", 0.0),
    ("rand_phase", 0.5),
    ("phase", 0.0),
];

/// Body kind of a program file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FxpKind {
    /// `FxCk`: parameter list
    Params,
    /// `FPCh`: opaque chunk
    Chunk,
}

/// Parsed `CcnK` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FxpHeader {
    /// Declared size of everything after the first 8 bytes
    pub byte_size: u32,
    /// Body kind
    pub kind: FxpKind,
    /// Container version
    pub version: u32,
    /// Plugin identifier
    pub fx_id: String,
    /// Plugin version
    pub fx_version: u32,
    /// Parameter count (`FxCk`) or program count (`FPCh`)
    pub count: u32,
    /// Program name
    pub name: String,
    /// Chunk length (`FPCh` only)
    pub chunk_size: Option<u32>,
}

fn fourcc(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn fxp_header(input: &[u8]) -> IResult<&[u8], FxpHeader> {
    let (input, _) = tag(CCNK)(input)?;
    let (input, byte_size) = be_u32(input)?;
    let (input, kind) = alt((
        value(FxpKind::Params, tag(FXCK)),
        value(FxpKind::Chunk, tag(FPCH)),
    ))(input)?;
    let (input, version) = be_u32(input)?;
    let (input, fx_id) = take(4usize)(input)?;
    let (input, fx_version) = be_u32(input)?;
    let (input, count) = be_u32(input)?;
    let (input, name) = take(NAME_LENGTH)(input)?;
    let (input, chunk_size) = match kind {
        FxpKind::Params => (input, None),
        FxpKind::Chunk => {
            let (input, size) = be_u32(input)?;
            (input, Some(size))
        }
    };

    let name = name.split(|&b| b == 0).next().unwrap_or_default();
    Ok((
        input,
        FxpHeader {
            byte_size,
            kind,
            version,
            fx_id: fourcc(fx_id),
            fx_version,
            count,
            name: fourcc(name),
            chunk_size,
        },
    ))
}

/// Parse the program header
pub fn parse_header(data: &[u8]) -> Result<FxpHeader> {
    fxp_header(data)
        .map(|(_, header)| header)
        .map_err(|_| PatchError::MalformedPreset("missing or truncated CcnK program header".into()))
}

fn write_u32_be(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn length_word(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PatchError::MalformedPreset(format!("{what} {value} does not fit in 32 bits")))
}

fn param(name: String, slot: usize, default: f64) -> FieldDescriptor {
    FieldDescriptor::new(
        name,
        HEADER_LENGTH + 4 * slot,
        4,
        Encoding::Float,
        ValueRange::unit(),
        ParamValue::Float(default),
    )
    .with_byte_order(ByteOrder::Big)
}

/// Adapter for VST2 program files of the `XfsX` wavetable synth
#[derive(Debug, Clone, Copy, Default)]
pub struct FxpAdapter;

impl FormatAdapter for FxpAdapter {
    fn id(&self) -> &str {
        FORMAT_ID
    }

    fn name(&self) -> &str {
        "Serum VST2 program (.fxp)"
    }

    fn extension(&self) -> &str {
        "fxp"
    }

    fn length_kind(&self) -> LengthKind {
        LengthKind::Variable
    }

    fn sniff(&self, data: &[u8]) -> bool {
        data.starts_with(CCNK)
            && data
                .get(8..12)
                .is_some_and(|magic| magic == FXCK || magic == FPCH)
    }

    fn validate(&self, data: &[u8]) -> Result<()> {
        let header = parse_header(data)?;
        if header.byte_size as usize + 8 != data.len() {
            return Err(PatchError::MalformedPreset(format!(
                "byteSize {} does not match a {}-byte file",
                header.byte_size,
                data.len()
            )));
        }
        match header.kind {
            FxpKind::Params => {
                let needed = HEADER_LENGTH + 4 * header.count as usize;
                if needed != data.len() {
                    return Err(PatchError::MalformedPreset(format!(
                        "{} parameters need {needed} bytes, file has {}",
                        header.count,
                        data.len()
                    )));
                }
            }
            FxpKind::Chunk => {
                let size = header.chunk_size.unwrap_or_default() as usize;
                if CHUNK_START + size != data.len() {
                    return Err(PatchError::MalformedPreset(format!(
                        "chunk of {size} bytes does not fill a {}-byte file",
                        data.len()
                    )));
                }
            }
        }
        if header.fx_id != SYNTH_ID {
            warn!(fx_id = %header.fx_id, "program belongs to another plugin");
        }
        Ok(())
    }

    fn finalize(&self, data: &mut Vec<u8>) -> Result<()> {
        if data.len() < HEADER_LENGTH {
            return Err(PatchError::MalformedPreset(format!(
                "{} bytes is too short for a program header",
                data.len()
            )));
        }
        let byte_size = length_word(data.len() - 8, "byteSize")?;
        write_u32_be(data, 4, byte_size);
        if &data[8..12] == FPCH {
            if data.len() < CHUNK_START {
                return Err(PatchError::MalformedPreset(
                    "chunk program has no chunk length".into(),
                ));
            }
            let chunk_size = length_word(data.len() - CHUNK_START, "chunkSize")?;
            write_u32_be(data, HEADER_LENGTH, chunk_size);
        }
        Ok(())
    }

    fn seed_fields(&self) -> Vec<FieldDescriptor> {
        let mut fields = vec![param("master_volume".into(), 0, 0.75)];
        for (osc_index, osc) in ["a", "b"].iter().enumerate() {
            let first_slot = 1 + osc_index * OSC_PARAMS.len();
            for (i, (name, default)) in OSC_PARAMS.iter().enumerate() {
                fields.push(param(format!("osc_{osc}_{name}"), first_slot + i, *default));
            }
        }
        fields
    }

    fn factory_skeleton(&self) -> Vec<u8> {
        let len = HEADER_LENGTH + 4 * FACTORY_SLOTS;
        let mut data = vec![0u8; len];
        data[0..4].copy_from_slice(CCNK);
        write_u32_be(&mut data, 4, (len - 8) as u32);
        data[8..12].copy_from_slice(FXCK);
        write_u32_be(&mut data, 12, 1);
        data[16..20].copy_from_slice(SYNTH_ID.as_bytes());
        write_u32_be(&mut data, 20, 1);
        write_u32_be(&mut data, 24, FACTORY_SLOTS as u32);
        data[28..32].copy_from_slice(b"Init");
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParameterRegistry;

    fn chunk_program(chunk: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(CCNK);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(FPCH);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"XfsX");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[0u8; 28]);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(chunk);
        data
    }

    #[test]
    fn test_skeleton_header() {
        let skeleton = FxpAdapter.factory_skeleton();
        assert_eq!(skeleton.len(), 312);
        FxpAdapter.validate(&skeleton).unwrap();

        let header = parse_header(&skeleton).unwrap();
        assert_eq!(header.kind, FxpKind::Params);
        assert_eq!(header.byte_size, 304);
        assert_eq!(header.fx_id, "XfsX");
        assert_eq!(header.count, 64);
        assert_eq!(header.name, "Init");
        assert_eq!(header.chunk_size, None);
    }

    #[test]
    fn test_seed_fields_are_big_endian_slots() {
        let fields = FxpAdapter.seed_fields();
        assert_eq!(fields.len(), 27);
        let offset = |name: &str| fields.iter().find(|f| f.name == name).unwrap().offset;
        assert_eq!(offset("master_volume"), 56);
        assert_eq!(offset("osc_a_volume"), 60);
        assert_eq!(offset("osc_a_phase"), 108);
        assert_eq!(offset("osc_b_volume"), 112);
        assert!(fields.iter().all(|f| f.byte_order == ByteOrder::Big));

        let registry = ParameterRegistry::new(fields, 312).unwrap();
        assert_eq!(registry.extent(), 164);
    }

    #[test]
    fn test_chunk_program_finalize() {
        let mut data = chunk_program(&[0x78, 0x9C, 1, 2, 3, 4, 5]);
        assert!(FxpAdapter.sniff(&data));
        assert!(FxpAdapter.validate(&data).is_err());

        FxpAdapter.finalize(&mut data).unwrap();
        FxpAdapter.validate(&data).unwrap();
        let header = parse_header(&data).unwrap();
        assert_eq!(header.kind, FxpKind::Chunk);
        assert_eq!(header.byte_size as usize, data.len() - 8);
        assert_eq!(header.chunk_size, Some(7));
    }

    #[test]
    fn test_params_must_fill_file() {
        let mut data = FxpAdapter.factory_skeleton();
        data.extend_from_slice(&[0u8; 4]);
        FxpAdapter.finalize(&mut data).unwrap();
        assert!(matches!(
            FxpAdapter.validate(&data),
            Err(PatchError::MalformedPreset(_))
        ));
    }

    #[test]
    fn test_sniff_requires_body_magic() {
        let mut data = FxpAdapter.factory_skeleton();
        assert!(FxpAdapter.sniff(&data));
        data[8..12].copy_from_slice(b"FxBk");
        assert!(!FxpAdapter.sniff(&data));
        assert!(!FxpAdapter.sniff(b"CcnK"));
    }
}
