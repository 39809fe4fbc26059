//! Block schema: which named data records may follow the header.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dtype::Dtype;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Block '{0}' has ndims 0; it must be at least 1")]
    ZeroDims(String),
    #[error("Duplicate block '{0}'")]
    DuplicateBlock(String),
    #[error("Block '{block}' lists particle type {ptype} twice")]
    DuplicatePtype { block: String, ptype: usize },
}

fn one() -> usize {
    1
}

/// One block entry: element type, values per particle, candidate particle
/// types and whether the file must contain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpec {
    pub name:     String,
    pub dtype:    Dtype,
    #[serde(default = "one")]
    pub ndims:    usize,
    pub ptypes:   Vec<usize>,
    #[serde(default)]
    pub required: bool,
}

impl BlockSpec {
    pub fn new(name: impl Into<String>, dtype: Dtype, ndims: usize, ptypes: Vec<usize>, required: bool) -> Self {
        Self { name: name.into(), dtype, ndims, ptypes, required }
    }

    pub fn applies_to(&self, ptype: usize) -> bool {
        self.ptypes.contains(&ptype)
    }
}

/// Ordered block entries.  Records appear in the file in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BlockSpec>", into = "Vec<BlockSpec>")]
pub struct BlockSchema {
    blocks: Vec<BlockSpec>,
}

impl BlockSchema {
    pub fn new(blocks: Vec<BlockSpec>) -> Result<Self, SchemaError> {
        for (i, b) in blocks.iter().enumerate() {
            if b.ndims == 0 {
                return Err(SchemaError::ZeroDims(b.name.clone()));
            }
            if blocks[..i].iter().any(|c| c.name == b.name) {
                return Err(SchemaError::DuplicateBlock(b.name.clone()));
            }
            for (j, &p) in b.ptypes.iter().enumerate() {
                if b.ptypes[..j].contains(&p) {
                    return Err(SchemaError::DuplicatePtype { block: b.name.clone(), ptype: p });
                }
            }
        }
        Ok(Self { blocks })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BlockSpec> {
        self.blocks.iter()
    }

    pub fn get(&self, name: &str) -> Option<&BlockSpec> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl TryFrom<Vec<BlockSpec>> for BlockSchema {
    type Error = SchemaError;

    fn try_from(blocks: Vec<BlockSpec>) -> Result<Self, Self::Error> {
        BlockSchema::new(blocks)
    }
}

impl From<BlockSchema> for Vec<BlockSpec> {
    fn from(s: BlockSchema) -> Self {
        s.blocks
    }
}

impl<'a> IntoIterator for &'a BlockSchema {
    type Item = &'a BlockSpec;
    type IntoIter = std::slice::Iter<'a, BlockSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}
