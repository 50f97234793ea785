use patchcodec::registry::DescriptorTable;
use patchcodec::{Codec, CodecConfig, CodecWarning, FormatCatalog, ParamValue, SemanticPreset};
use std::fs;

fn changed_offsets(a: &[u8], b: &[u8]) -> Vec<usize> {
    (0..a.len()).filter(|&i| a[i] != b[i]).collect()
}

#[test]
fn mix_and_detune_touch_only_their_fields() {
    let codec = Codec::builtin().unwrap();
    let format = codec.catalog().get("3xosc").unwrap();
    let template = format.template();

    let preset = SemanticPreset::new()
        .with("mix_osc1", 0.5)
        .with("osc2_detune", 12i64);
    let encoded = codec.encode("3xosc", &preset).unwrap();
    assert!(encoded.warnings.is_empty());
    assert_eq!(encoded.blob.len(), template.len());
    assert_eq!(encoded.blob.len(), 288);

    let changed = changed_offsets(template, &encoded.blob);
    assert!(!changed.is_empty());
    assert!(changed
        .iter()
        .all(|&i| (239..243).contains(&i) || (207..211).contains(&i)));
    assert_eq!(&encoded.blob[239..243], &50u32.to_le_bytes());
    assert_eq!(&encoded.blob[207..211], &12i32.to_le_bytes());

    let decoded = codec.decode("3xosc", &encoded.blob).unwrap();
    let original = codec.decode("3xosc", template).unwrap();
    assert_eq!(decoded.residuals, original.residuals);
    assert_eq!(decoded.values.get("mix_osc1"), Some(&ParamValue::Float(0.5)));
    assert_eq!(decoded.values.get("osc2_detune"), Some(&ParamValue::Int(12)));
    assert_eq!(decoded.values.get("mix_osc2"), Some(&ParamValue::Float(0.33)));
}

#[test]
fn unknown_field_is_a_warning() {
    let codec = Codec::builtin().unwrap();
    let preset = SemanticPreset::new().with("foo", 1i64).with("osc1_shape", "saw");
    let encoded = codec.encode("3xosc", &preset).unwrap();
    assert_eq!(
        encoded.warnings,
        vec![CodecWarning::UnknownField { name: "foo".into() }]
    );
    assert_eq!(&encoded.blob[159..163], &2u32.to_le_bytes());
}

#[test]
fn out_of_range_capture_decodes_with_warning() {
    let codec = Codec::builtin().unwrap();
    let mut capture = codec.catalog().get("3xosc").unwrap().template().to_vec();
    capture[163..167].copy_from_slice(&40i32.to_le_bytes());

    let decoded = codec.decode("3xosc", &capture).unwrap();
    assert_eq!(decoded.values.get("osc1_coarse"), Some(&ParamValue::Int(40)));
    assert_eq!(decoded.warnings.len(), 1);

    assert!(codec.reencode(&decoded).is_err());
    let clamping = codec.with_config(CodecConfig::default().clamping());
    let repaired = clamping.reencode(&decoded).unwrap();
    assert_eq!(&repaired.blob[163..167], &24i32.to_le_bytes());
}

#[test]
fn descriptor_directory_round_trip() {
    let builtin = FormatCatalog::builtin().unwrap();
    let dir = tempfile::tempdir().unwrap();

    for format in builtin.iter() {
        let template_name = format!("{}.{}", format.id(), format.adapter().extension());
        fs::write(dir.path().join(&template_name), format.template()).unwrap();
        let mut table = DescriptorTable::from_registry(format.id(), &template_name, format.registry());
        if format.id() == "3xosc" {
            let mut bright = format.template().to_vec();
            bright[100] ^= 0xFF;
            fs::write(dir.path().join("3xosc.bright.fst"), &bright).unwrap();
            table
                .variants
                .insert("bright".into(), "3xosc.bright.fst".into());
        }
        table.save(&dir.path().join(format!("{}.json", format.id()))).unwrap();
    }

    let loaded = FormatCatalog::load_dir(dir.path()).unwrap();
    assert_eq!(loaded.ids().collect::<Vec<_>>(), vec!["3xosc", "serum"]);
    assert_eq!(loaded.templates().variants("3xosc"), vec!["bright", "default"]);

    let preset = SemanticPreset::new().with("osc3_volume", 200i64);
    let from_disk = Codec::new(loaded, CodecConfig::default());
    let from_builtin = Codec::new(builtin, CodecConfig::default());
    assert_eq!(
        from_disk.encode("3xosc", &preset).unwrap(),
        from_builtin.encode("3xosc", &preset).unwrap()
    );

    let bright = from_disk.encode_variant("3xosc", "bright", &preset).unwrap();
    let plain = from_disk.encode("3xosc", &preset).unwrap();
    assert_eq!(changed_offsets(&bright.blob, &plain.blob), vec![100]);
    assert!(from_disk.encode_variant("3xosc", "dark", &preset).is_err());
}

#[test]
fn serum_program_round_trip() {
    let codec = Codec::builtin().unwrap();
    let preset = SemanticPreset::new()
        .with("osc_a_wt_pos", 0.25)
        .with("osc_b_unison", 0.5);
    let encoded = codec.encode("serum", &preset).unwrap();
    assert_eq!(&encoded.blob[0..4], b"CcnK");
    assert_eq!(&encoded.blob[100..104], &0.25f32.to_be_bytes());

    let decoded = codec.decode_auto(&encoded.blob).unwrap();
    assert_eq!(decoded.format_id, "serum");
    assert_eq!(decoded.values.get("osc_a_wt_pos"), Some(&ParamValue::Float(0.25)));
    assert_eq!(codec.reencode(&decoded).unwrap(), encoded);
}
