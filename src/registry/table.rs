//! Descriptor table files
//!
//! A descriptor table is the on-disk form of one format's registry: a JSON
//! document naming the format adapter, the template file stored next to it,
//! optional named template variants and the list of field records.
//!
//! ```json
//! {
//!   "format": "3xosc",
//!   "template": "3xosc.fst",
//!   "variants": { "bright": "3xosc.bright.fst" },
//!   "fields": [
//!     { "name": "mix_osc1", "offset": 239, "width": 4,
//!       "encoding": { "kind": "fixed", "scale": 100 },
//!       "range": [0.0, 1.0], "default": 0.33 }
//!   ]
//! }
//! ```

use super::{FieldDescriptor, ParameterRegistry};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Serialized registry of one format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorTable {
    /// Adapter identifier (`3xosc`, `serum`)
    pub format: String,
    /// Template file name, relative to the table file
    pub template: String,
    /// Named alternative templates, relative to the table file
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, String>,
    /// Field records
    pub fields: Vec<FieldDescriptor>,
}

impl DescriptorTable {
    /// Parse a table from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a table from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the table to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Snapshot a registry (for instance after promoting discovered fields)
    pub fn from_registry(
        format: impl Into<String>,
        template: impl Into<String>,
        registry: &ParameterRegistry,
    ) -> Self {
        DescriptorTable {
            format: format.into(),
            template: template.into(),
            variants: BTreeMap::new(),
            fields: registry.all().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Encoding, ParamValue, ValueRange};

    #[test]
    fn test_table_round_trips_through_json() {
        let fields = vec![FieldDescriptor::new(
            "mix_osc1",
            239,
            4,
            Encoding::Fixed {
                scale: 100,
                signed: false,
            },
            ValueRange::unit(),
            ParamValue::Float(0.33),
        )];
        let registry = ParameterRegistry::new(fields, 288).unwrap();
        let table = DescriptorTable::from_registry("3xosc", "3xosc.fst", &registry);

        let json = table.to_json().unwrap();
        let parsed = DescriptorTable::from_json(&json).unwrap();
        assert_eq!(parsed, table);
        assert!(!json.contains("variants"));
    }

    #[test]
    fn test_table_rejects_unknown_encoding() {
        let json = r#"{
            "format": "3xosc",
            "template": "3xosc.fst",
            "fields": [
                { "name": "x", "offset": 0, "width": 1,
                  "encoding": { "kind": "bcd" }, "range": [0, 9], "default": 0 }
            ]
        }"#;
        assert!(DescriptorTable::from_json(json).is_err());
    }
}
