//! Fixed-layout snapshot header.
//!
//! A [`HeaderSchema`] is an ordered list of `(name, dtype, count)` fields.
//! The header record's payload is the concatenation of those fields in
//! declared order, no padding inferred: its length must equal
//! [`HeaderSchema::byte_size`] exactly.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dtype::{Array, Dtype, DtypeError, Endian};
use crate::record::{RecordError, RecordFile};

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Header record holds {actual} bytes, schema declares {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("Duplicate header field '{0}'")]
    DuplicateField(String),
    #[error("Header field '{0}' has zero elements")]
    EmptyField(String),
    #[error("Unknown header field '{0}'")]
    UnknownField(String),
    #[error("Header field '{name}' is {expected_count}x{expected}, got {count}x{dtype}")]
    FieldShape {
        name:           String,
        expected:       Dtype,
        expected_count: usize,
        dtype:          Dtype,
        count:          usize,
    },
    #[error(transparent)]
    Dtype(#[from] DtypeError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderField {
    pub name:  String,
    pub dtype: Dtype,
    pub count: usize,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, dtype: Dtype, count: usize) -> Self {
        Self { name: name.into(), dtype, count }
    }

    pub fn byte_size(&self) -> usize {
        self.dtype.size() * self.count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<HeaderField>", into = "Vec<HeaderField>")]
pub struct HeaderSchema {
    fields: Vec<HeaderField>,
}

impl HeaderSchema {
    pub fn new(fields: Vec<HeaderField>) -> Result<Self, HeaderError> {
        for (i, f) in fields.iter().enumerate() {
            if f.count == 0 {
                return Err(HeaderError::EmptyField(f.name.clone()));
            }
            if fields[..i].iter().any(|g| g.name == f.name) {
                return Err(HeaderError::DuplicateField(f.name.clone()));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&HeaderField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Exact payload length of a header record under this schema.
    pub fn byte_size(&self) -> usize {
        self.fields.iter().map(HeaderField::byte_size).sum()
    }
}

impl TryFrom<Vec<HeaderField>> for HeaderSchema {
    type Error = HeaderError;

    fn try_from(fields: Vec<HeaderField>) -> Result<Self, Self::Error> {
        HeaderSchema::new(fields)
    }
}

impl From<HeaderSchema> for Vec<HeaderField> {
    fn from(s: HeaderSchema) -> Self {
        s.fields
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Decoded header: one [`Array`] per schema field, in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    schema: HeaderSchema,
    values: Vec<Array>,
}

impl Header {
    /// Every field present and zero-valued.  Starting point for writing.
    pub fn zeroed(schema: &HeaderSchema) -> Self {
        let values = schema.fields.iter().map(|f| Array::zeros(f.dtype, f.count)).collect();
        Self { schema: schema.clone(), values }
    }

    /// Read exactly one record from `records` and decode it.
    pub fn read<R: Read>(records: &mut RecordFile<R>, schema: &HeaderSchema) -> Result<Self, HeaderError> {
        let payload = records.read_raw()?;
        Self::decode(&payload, schema, records.config().endian)
    }

    pub fn decode(bytes: &[u8], schema: &HeaderSchema, endian: Endian) -> Result<Self, HeaderError> {
        let expected = schema.byte_size();
        if bytes.len() != expected {
            return Err(HeaderError::SizeMismatch { expected, actual: bytes.len() });
        }

        let mut values = Vec::with_capacity(schema.fields.len());
        let mut offset = 0;
        for f in &schema.fields {
            let end = offset + f.byte_size();
            values.push(Array::decode(f.dtype, &bytes[offset..end], endian)?);
            offset = end;
        }
        debug!(fields = values.len(), bytes = offset, "decoded header");
        Ok(Self { schema: schema.clone(), values })
    }

    pub fn schema(&self) -> &HeaderSchema {
        &self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Array> {
        let i = self.schema.fields.iter().position(|f| f.name == name)?;
        self.values.get(i)
    }

    /// Replace a field's value.  Type and element count must match the schema.
    pub fn set(&mut self, name: &str, value: Array) -> Result<(), HeaderError> {
        let i = self.schema.fields.iter()
            .position(|f| f.name == name)
            .ok_or_else(|| HeaderError::UnknownField(name.to_owned()))?;
        let f = &self.schema.fields[i];
        if value.dtype() != f.dtype || value.len() != f.count {
            return Err(HeaderError::FieldShape {
                name:           name.to_owned(),
                expected:       f.dtype,
                expected_count: f.count,
                dtype:          value.dtype(),
                count:          value.len(),
            });
        }
        self.values[i] = value;
        Ok(())
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array)> {
        self.schema.fields.iter().map(|f| f.name.as_str()).zip(self.values.iter())
    }

    pub fn to_bytes(&self, endian: Endian) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.schema.byte_size());
        for v in &self.values {
            out.extend_from_slice(&v.encode(endian));
        }
        out
    }

    /// Write the header as one record.
    pub fn write<W: Write>(&self, records: &mut RecordFile<W>) -> Result<(), HeaderError> {
        records.write_bytes(&self.to_bytes(records.config().endian))?;
        Ok(())
    }
}
