//! Snapshot configuration: everything the caller supplies that the file
//! does not describe about itself.
//!
//! ```json
//! {
//!   "record": { "control": "i4", "endian": "little" },
//!   "counts_field": "npart",
//!   "header": [
//!     { "name": "npart", "dtype": "i4", "count": 6 },
//!     { "name": "mass",  "dtype": "f8", "count": 6 }
//!   ],
//!   "blocks": [
//!     { "name": "pos", "dtype": "f4", "ndims": 3, "ptypes": [0, 1, 2, 3, 4, 5], "required": true }
//!   ],
//!   "aliases": { "gas": 0, "halo": 1 }
//! }
//! ```

use std::collections::HashMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::header::HeaderSchema;
use crate::record::RecordConfig;
use crate::schema::BlockSchema;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Particle count field '{0}' is not in the header schema")]
    CountsField(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub record:       RecordConfig,
    /// Header field holding one particle count per type.
    pub counts_field: String,
    pub header:       HeaderSchema,
    #[serde(default)]
    pub blocks:       BlockSchema,
    #[serde(default)]
    pub aliases:      HashMap<String, usize>,
}

impl SnapshotConfig {
    pub fn new(header: HeaderSchema, blocks: BlockSchema, counts_field: impl Into<String>) -> Self {
        Self {
            record:       RecordConfig::default(),
            counts_field: counts_field.into(),
            header,
            blocks,
            aliases:      HashMap::new(),
        }
    }

    pub fn with_record(mut self, record: RecordConfig) -> Self {
        self.record = record;
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    /// Cross-field checks that the individual schemas cannot make alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.header.field(&self.counts_field).is_none() {
            return Err(ConfigError::CountsField(self.counts_field.clone()));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{Dtype, Endian};
    use crate::record::ControlWord;

    const JSON: &str = r#"{
        "record": { "control": "u8", "endian": "big" },
        "counts_field": "npart",
        "header": [
            { "name": "npart", "dtype": "i4", "count": 6 },
            { "name": "mass",  "dtype": "f8", "count": 6 }
        ],
        "blocks": [
            { "name": "dummy", "dtype": "f4", "ptypes": [0, 1, 2], "required": true }
        ],
        "aliases": { "type0": 0 }
    }"#;

    #[test]
    fn parses_full_config() {
        let cfg = SnapshotConfig::from_json(JSON).unwrap();
        assert_eq!(cfg.record.control, ControlWord::U8);
        assert_eq!(cfg.record.endian, Endian::Big);
        assert_eq!(cfg.header.byte_size(), 72);
        assert_eq!(cfg.blocks.get("dummy").unwrap().dtype, Dtype::F4);
        assert_eq!(cfg.aliases["type0"], 0);

        let again = SnapshotConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(again, cfg);
    }

    #[test]
    fn record_section_defaults() {
        let json = r#"{"counts_field": "n", "header": [{"name": "n", "dtype": "u4", "count": 2}]}"#;
        let cfg = SnapshotConfig::from_json(json).unwrap();
        assert_eq!(cfg.record, RecordConfig::default());
        assert!(cfg.blocks.is_empty());
    }

    #[test]
    fn rejects_bad_control_word() {
        let json = JSON.replace("\"u8\"", "\"invalid\"");
        assert!(matches!(SnapshotConfig::from_json(&json), Err(ConfigError::Json(_))));
    }

    #[test]
    fn rejects_missing_counts_field() {
        let json = JSON.replace("\"counts_field\": \"npart\"", "\"counts_field\": \"nall\"");
        assert!(matches!(SnapshotConfig::from_json(&json), Err(ConfigError::CountsField(f)) if f == "nall"));
    }
}
