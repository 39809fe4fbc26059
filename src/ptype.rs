//! Particle-type index.
//!
//! The set of particle types is `0..K`, where `K` is the declared length of
//! the header field holding per-type counts.  A type with a zero count is
//! still a valid index.  Human-readable aliases map onto these indices; an
//! unknown alias is an error, there is no fallback.

use std::collections::HashMap;
use std::ops::Range;

use thiserror::Error;

use crate::dtype::Dtype;
use crate::header::Header;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PtypeError {
    #[error("Header has no particle count field '{0}'")]
    MissingField(String),
    #[error("Particle count field '{field}' has non-integer type {dtype}")]
    NotInteger { field: String, dtype: Dtype },
    #[error("Particle type {ptype} has negative count {value}")]
    NegativeCount { ptype: usize, value: i128 },
    #[error("Unknown particle type alias '{0}'")]
    UnknownAlias(String),
    #[error("Alias '{alias}' maps to particle type {index}, but only {len} types exist")]
    AliasOutOfRange { alias: String, index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticleTypes {
    counts:  Vec<u64>,
    aliases: HashMap<String, usize>,
}

impl ParticleTypes {
    /// Build the index from the count field `field` of `header`.
    pub fn from_header(
        header:  &Header,
        field:   &str,
        aliases: &HashMap<String, usize>,
    ) -> Result<Self, PtypeError> {
        let values = header.get(field).ok_or_else(|| PtypeError::MissingField(field.to_owned()))?;
        let wide = values.to_i128_vec().ok_or_else(|| PtypeError::NotInteger {
            field: field.to_owned(),
            dtype: values.dtype(),
        })?;

        let mut counts = Vec::with_capacity(wide.len());
        for (ptype, value) in wide.into_iter().enumerate() {
            if value < 0 {
                return Err(PtypeError::NegativeCount { ptype, value });
            }
            counts.push(value as u64);
        }
        Self::from_counts(counts, aliases.clone())
    }

    pub fn from_counts(counts: Vec<u64>, aliases: HashMap<String, usize>) -> Result<Self, PtypeError> {
        if let Some((alias, &index)) = aliases.iter().find(|&(_, &i)| i >= counts.len()) {
            return Err(PtypeError::AliasOutOfRange {
                alias: alias.clone(),
                index,
                len: counts.len(),
            });
        }
        Ok(Self { counts, aliases })
    }

    /// Number of particle types, `K`.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn indices(&self) -> Range<usize> {
        0..self.counts.len()
    }

    pub fn contains(&self, ptype: usize) -> bool {
        ptype < self.counts.len()
    }

    pub fn count(&self, ptype: usize) -> Option<u64> {
        self.counts.get(ptype).copied()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Total particles over all types.  `None` if the counts overflow `u64`.
    pub fn total(&self) -> Option<u64> {
        self.counts.iter().try_fold(0u64, |acc, &n| acc.checked_add(n))
    }

    pub fn resolve(&self, alias: &str) -> Result<usize, PtypeError> {
        self.aliases
            .get(alias)
            .copied()
            .ok_or_else(|| PtypeError::UnknownAlias(alias.to_owned()))
    }

    pub fn aliases(&self) -> &HashMap<String, usize> {
        &self.aliases
    }
}
