//! 3xOsc `.fst` Adapter
//!
//! FL Studio stores a channel preset as an `FLhd` header followed by one
//! `FLdt` event chunk. Data events (ids `0xC0` and up) carry LEB128 sizes, so
//! only the header is structural; everything after byte 22 is treated as
//! opaque vendor data onto which the known offsets are written. The 3xOsc
//! parameters are little-endian 32-bit words inside the plugin event.
//!
//! Layout of the captures this adapter understands (288 bytes):
//!
//! ```text
//! 0    "FLhd"  u32 header length (6)  u16 format  u16 channels  u16 ppq
//! 14   "FLdt"  u32 event data length (file length - 22)
//! 22   events (name, plugin parameters, ...), opaque
//! 159  osc1: shape coarse fine volume phase detune (+4 undeclared)
//! 187  osc2
//! 215  osc3
//! 239  mix_osc1 mix_osc2 mix_osc3
//! 251  trailing vendor data
//! ```

use super::{FormatAdapter, LengthKind};
use crate::registry::{Encoding, FieldDescriptor, ParamValue, ValueRange};
use crate::{PatchError, Result};
use nom::bytes::complete::tag;
use nom::number::complete::{le_u16, le_u32};
use nom::IResult;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Format identifier
pub const FORMAT_ID: &str = "3xosc";

/// Length of every 3xOsc capture
pub const FILE_LENGTH: usize = 288;

const FLHD: &[u8] = b"FLhd";
const FLDT: &[u8] = b"FLdt";
const HEADER_LENGTH: u32 = 6;
const DATA_START: usize = 22;
const NAME_EVENT: u8 = 0xC9;
const PLUGIN_NAME: &[u8] = b"3x Osc\0";
const PLUGIN_EVENT: u8 = 0xD5;
const PLUGIN_EVENT_OFFSET: usize = 150;

/// First byte of oscillator 1
pub const OSC_BASE: usize = 159;
/// Distance between oscillator records
pub const OSC_STRIDE: usize = 28;
/// Offset of `mix_osc1`
pub const MIX_BASE: usize = 239;

/// Oscillator shape as stored in the `oscN_shape` word
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Waveform {
    Sine = 0,
    Triangle = 1,
    Saw = 2,
    Square = 3,
    Noise = 4,
}

impl Waveform {
    /// Label used in semantic presets
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Saw => "saw",
            Waveform::Square => "square",
            Waveform::Noise => "noise",
        }
    }

    /// Shape for a stored index
    pub fn from_index(index: u64) -> Option<Self> {
        Waveform::from_u64(index)
    }

    /// Every shape in stored order
    pub fn all() -> impl Iterator<Item = Waveform> {
        (0u64..).map_while(Waveform::from_index)
    }
}

/// Fixed part of an `.fst` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FstHeader {
    /// Length of the `FLhd` body, always 6
    pub header_length: u32,
    /// Project type
    pub format: u16,
    /// Channel count
    pub channels: u16,
    /// Pulses per quarter note
    pub ppq: u16,
    /// Bytes of event data after `FLdt`
    pub data_length: u32,
}

fn fst_header(input: &[u8]) -> IResult<&[u8], FstHeader> {
    let (input, _) = tag(FLHD)(input)?;
    let (input, header_length) = le_u32(input)?;
    let (input, format) = le_u16(input)?;
    let (input, channels) = le_u16(input)?;
    let (input, ppq) = le_u16(input)?;
    let (input, _) = tag(FLDT)(input)?;
    let (input, data_length) = le_u32(input)?;
    Ok((
        input,
        FstHeader {
            header_length,
            format,
            channels,
            ppq,
            data_length,
        },
    ))
}

/// Parse the `FLhd`/`FLdt` header
pub fn parse_header(data: &[u8]) -> Result<FstHeader> {
    fst_header(data)
        .map(|(_, header)| header)
        .map_err(|_| PatchError::MalformedPreset("missing FLhd/FLdt header".into()))
}

fn length_word(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| PatchError::MalformedPreset(format!("{what} {value} does not fit in 32 bits")))
}

fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// LEB128 size prefix of a data event
fn event_size(mut value: usize) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// Adapter for FL Studio 3xOsc channel presets
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreeOscAdapter;

impl FormatAdapter for ThreeOscAdapter {
    fn id(&self) -> &str {
        FORMAT_ID
    }

    fn name(&self) -> &str {
        "FL Studio 3xOsc"
    }

    fn extension(&self) -> &str {
        "fst"
    }

    fn length_kind(&self) -> LengthKind {
        LengthKind::Fixed
    }

    fn sniff(&self, data: &[u8]) -> bool {
        data.starts_with(FLHD)
    }

    fn validate(&self, data: &[u8]) -> Result<()> {
        let header = parse_header(data)?;
        if header.header_length != HEADER_LENGTH {
            return Err(PatchError::MalformedPreset(format!(
                "FLhd header length is {}, expected {HEADER_LENGTH}",
                header.header_length
            )));
        }
        if header.data_length as usize + DATA_START != data.len() {
            return Err(PatchError::MalformedPreset(format!(
                "FLdt declares {} bytes but {} follow the header",
                header.data_length,
                data.len().saturating_sub(DATA_START)
            )));
        }
        Ok(())
    }

    fn finalize(&self, data: &mut Vec<u8>) -> Result<()> {
        if data.len() < DATA_START {
            return Err(PatchError::MalformedPreset(format!(
                "{} bytes is too short for an FLhd/FLdt header",
                data.len()
            )));
        }
        let data_length = length_word(data.len() - DATA_START, "FLdt length")?;
        write_u32_le(data, 18, data_length);
        Ok(())
    }

    fn seed_fields(&self) -> Vec<FieldDescriptor> {
        let centi = Encoding::Fixed {
            scale: 100,
            signed: false,
        };
        let mut fields = Vec::with_capacity(21);
        for osc in 1..=3 {
            let base = OSC_BASE + OSC_STRIDE * (osc - 1);
            let field = |name: &str,
                         slot: usize,
                         encoding: Encoding,
                         range: ValueRange,
                         default: ParamValue| {
                FieldDescriptor::new(
                    format!("osc{osc}_{name}"),
                    base + 4 * slot,
                    4,
                    encoding,
                    range,
                    default,
                )
            };
            fields.push(
                field(
                    "shape",
                    0,
                    Encoding::UInt,
                    ValueRange::new(0.0, (Waveform::all().count() - 1) as f64),
                    ParamValue::Int(Waveform::Sine as i64),
                )
                .with_labels(Waveform::all().map(Waveform::name)),
            );
            fields.push(field(
                "coarse",
                1,
                Encoding::Int,
                ValueRange::new(-24.0, 24.0),
                ParamValue::Int(0),
            ));
            fields.push(field(
                "fine",
                2,
                Encoding::Int,
                ValueRange::new(-100.0, 100.0),
                ParamValue::Int(0),
            ));
            fields.push(field(
                "volume",
                3,
                Encoding::UInt,
                ValueRange::new(0.0, 255.0),
                ParamValue::Int(127),
            ));
            fields.push(field(
                "phase",
                4,
                centi,
                ValueRange::unit(),
                ParamValue::Float(0.0),
            ));
            fields.push(field(
                "detune",
                5,
                Encoding::Int,
                ValueRange::new(-100.0, 100.0),
                ParamValue::Int(0),
            ));
        }
        for osc in 1..=3 {
            fields.push(FieldDescriptor::new(
                format!("mix_osc{osc}"),
                MIX_BASE + 4 * (osc - 1),
                4,
                centi,
                ValueRange::unit(),
                ParamValue::Float(0.33),
            ));
        }
        fields
    }

    fn factory_skeleton(&self) -> Vec<u8> {
        let mut data: Vec<u8> = (0..FILE_LENGTH)
            .map(|i| (i.wrapping_mul(73).wrapping_add(19)) as u8)
            .collect();

        data[0..4].copy_from_slice(FLHD);
        write_u32_le(&mut data, 4, HEADER_LENGTH);
        data[8..10].copy_from_slice(&0u16.to_le_bytes());
        data[10..12].copy_from_slice(&1u16.to_le_bytes());
        data[12..14].copy_from_slice(&96u16.to_le_bytes());
        data[14..18].copy_from_slice(FLDT);
        write_u32_le(&mut data, 18, (FILE_LENGTH - DATA_START) as u32);

        let mut name_event = vec![NAME_EVENT];
        name_event.extend(event_size(PLUGIN_NAME.len()));
        name_event.extend_from_slice(PLUGIN_NAME);
        data[DATA_START..DATA_START + name_event.len()].copy_from_slice(&name_event);

        // plugin event runs to the end of the file
        let size = event_size(FILE_LENGTH - PLUGIN_EVENT_OFFSET - 3);
        data[PLUGIN_EVENT_OFFSET] = PLUGIN_EVENT;
        data[PLUGIN_EVENT_OFFSET + 1..PLUGIN_EVENT_OFFSET + 1 + size.len()].copy_from_slice(&size);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParameterRegistry;

    #[test]
    fn test_skeleton_is_valid() {
        let skeleton = ThreeOscAdapter.factory_skeleton();
        assert_eq!(skeleton.len(), FILE_LENGTH);
        assert!(ThreeOscAdapter.sniff(&skeleton));
        ThreeOscAdapter.validate(&skeleton).unwrap();

        let header = parse_header(&skeleton).unwrap();
        assert_eq!(header.header_length, 6);
        assert_eq!(header.channels, 1);
        assert_eq!(header.ppq, 96);
        assert_eq!(header.data_length as usize, FILE_LENGTH - 22);
    }

    #[test]
    fn test_seed_offsets() {
        let fields = ThreeOscAdapter.seed_fields();
        let offset = |name: &str| fields.iter().find(|f| f.name == name).unwrap().offset;
        assert_eq!(offset("osc1_shape"), 159);
        assert_eq!(offset("osc1_detune"), 179);
        assert_eq!(offset("osc2_shape"), 187);
        assert_eq!(offset("osc2_detune"), 207);
        assert_eq!(offset("osc3_volume"), 227);
        assert_eq!(offset("mix_osc1"), 239);
        assert_eq!(offset("mix_osc3"), 247);

        let registry = ParameterRegistry::new(fields, FILE_LENGTH).unwrap();
        assert_eq!(registry.len(), 21);
        assert_eq!(registry.extent(), 251);
    }

    #[test]
    fn test_shape_labels_follow_waveforms() {
        let fields = ThreeOscAdapter.seed_fields();
        let shape = fields.iter().find(|f| f.name == "osc2_shape").unwrap();
        assert_eq!(shape.label_index("square"), Some(3));
        assert_eq!(shape.labels.len(), 5);
        assert_eq!(shape.range.max, 4.0);
        for (index, waveform) in Waveform::all().enumerate() {
            assert_eq!(shape.labels[index], waveform.name());
        }
        assert_eq!(Waveform::from_index(3), Some(Waveform::Square));
        assert_eq!(Waveform::from_index(5), None);
    }

    #[test]
    fn test_finalize_recomputes_data_length_only() {
        let mut data = ThreeOscAdapter.factory_skeleton();
        data[18..22].copy_from_slice(&[0, 0, 0, 0]);
        data[151..155].copy_from_slice(&[0xFF; 4]);
        assert!(ThreeOscAdapter.validate(&data).is_err());

        let events = data[DATA_START..].to_vec();
        ThreeOscAdapter.finalize(&mut data).unwrap();
        ThreeOscAdapter.validate(&data).unwrap();
        assert_eq!(&data[18..22], &266u32.to_le_bytes());
        assert_eq!(&data[DATA_START..], &events[..]);
    }

    #[test]
    fn test_varint_sized_plugin_event_is_accepted() {
        let mut data = ThreeOscAdapter.factory_skeleton();
        data[150..153].copy_from_slice(&[PLUGIN_EVENT, 0x85, 0x01]);
        data[153..159].copy_from_slice(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        ThreeOscAdapter.validate(&data).unwrap();

        let before = data.clone();
        ThreeOscAdapter.finalize(&mut data).unwrap();
        assert_eq!(data, before);
    }

    #[test]
    fn test_event_sizes_are_leb128() {
        assert_eq!(event_size(7), vec![0x07]);
        assert_eq!(event_size(135), vec![0x87, 0x01]);
        assert_eq!(event_size(133), vec![0x85, 0x01]);

        let skeleton = ThreeOscAdapter.factory_skeleton();
        assert_eq!(&skeleton[22..24], &[NAME_EVENT, 7]);
        assert_eq!(&skeleton[150..153], &[PLUGIN_EVENT, 0x87, 0x01]);
    }

    #[test]
    fn test_validate_rejects_bad_headers() {
        let skeleton = ThreeOscAdapter.factory_skeleton();

        let mut wrong_magic = skeleton.clone();
        wrong_magic[14..18].copy_from_slice(b"FLxx");
        assert!(matches!(
            ThreeOscAdapter.validate(&wrong_magic),
            Err(PatchError::MalformedPreset(_))
        ));

        let mut short_data = skeleton.clone();
        short_data[18..22].copy_from_slice(&200u32.to_le_bytes());
        assert!(ThreeOscAdapter.validate(&short_data).is_err());

        let mut long_header = skeleton.clone();
        long_header[4..8].copy_from_slice(&8u32.to_le_bytes());
        assert!(ThreeOscAdapter.validate(&long_header).is_err());

        assert!(ThreeOscAdapter.validate(&skeleton[..20]).is_err());
    }
}
