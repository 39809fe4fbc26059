//! Element types, byte order and the tagged array container.
//!
//! Every payload in a snapshot file is a flat run of fixed-size numeric
//! elements.  [`Dtype`] names the element type with the familiar short codes
//! (`i4`, `f8`, ...), [`Array`] holds one decoded run with one variant per
//! element type, and [`BlockArray`] attaches the per-particle dimensionality
//! used by block data (`(-1, ndims)` rows).
//!
//! # Endianness
//! Byte order is never encoded in the file.  It is a per-stream setting
//! ([`Endian`]) supplied by the caller and applied to every element and every
//! control word of that stream.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DtypeError {
    #[error("Unknown element type '{0}'")]
    Unknown(String),
    #[error("Payload of {len} bytes is not a whole number of {dtype} elements")]
    Misaligned { len: usize, dtype: Dtype },
    #[error("Element type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: Dtype, found: Dtype },
    #[error("Dimensionality must be at least 1")]
    ZeroDims,
    #[error("{len} elements cannot be arranged in rows of {ndims}")]
    Ragged { len: usize, ndims: usize },
}

// ── Dtype ────────────────────────────────────────────────────────────────────

/// Element type of a header field or data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dtype {
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    F4,
    F8,
}

impl Dtype {
    /// Size of one element in bytes.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            Dtype::I1 | Dtype::U1 => 1,
            Dtype::I2 | Dtype::U2 => 2,
            Dtype::I4 | Dtype::U4 | Dtype::F4 => 4,
            Dtype::I8 | Dtype::U8 | Dtype::F8 => 8,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Dtype::I1 => "i1",
            Dtype::U1 => "u1",
            Dtype::I2 => "i2",
            Dtype::U2 => "u2",
            Dtype::I4 => "i4",
            Dtype::U4 => "u4",
            Dtype::I8 => "i8",
            Dtype::U8 => "u8",
            Dtype::F4 => "f4",
            Dtype::F8 => "f8",
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Dtype::F4 | Dtype::F8)
    }

    /// Parse a short type code.  A leading byte-order character (`<`, `>`,
    /// `=`, `|`) is accepted and ignored: byte order belongs to the stream.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        let code = code.strip_prefix(['<', '>', '=', '|']).unwrap_or(code);
        match code.to_ascii_lowercase().as_str() {
            "i1" => Some(Dtype::I1),
            "u1" => Some(Dtype::U1),
            "i2" => Some(Dtype::I2),
            "u2" => Some(Dtype::U2),
            "i4" => Some(Dtype::I4),
            "u4" => Some(Dtype::U4),
            "i8" => Some(Dtype::I8),
            "u8" => Some(Dtype::U8),
            "f4" => Some(Dtype::F4),
            "f8" => Some(Dtype::F8),
            _    => None,
        }
    }
}

impl FromStr for Dtype {
    type Err = DtypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dtype::parse(s).ok_or_else(|| DtypeError::Unknown(s.to_owned()))
    }
}

impl TryFrom<String> for Dtype {
    type Error = DtypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Dtype> for String {
    fn from(d: Dtype) -> Self {
        d.code().to_owned()
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Endian ───────────────────────────────────────────────────────────────────

/// Byte order of one stream.  Fixed for the lifetime of a stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") { Endian::Big } else { Endian::Little }
    }
}

// ── Array ────────────────────────────────────────────────────────────────────

/// A decoded run of elements, one variant per [`Dtype`].
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    I1(Vec<i8>),
    U1(Vec<u8>),
    I2(Vec<i16>),
    U2(Vec<u16>),
    I4(Vec<i32>),
    U4(Vec<u32>),
    I8(Vec<i64>),
    U8(Vec<u64>),
    F4(Vec<f32>),
    F8(Vec<f64>),
}

/// Evaluate `$body` with `$v` bound to the inner vector, whatever the variant.
macro_rules! each_array {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            Array::I1($v) => $body,
            Array::U1($v) => $body,
            Array::I2($v) => $body,
            Array::U2($v) => $body,
            Array::I4($v) => $body,
            Array::U4($v) => $body,
            Array::I8($v) => $body,
            Array::U8($v) => $body,
            Array::F4($v) => $body,
            Array::F8($v) => $body,
        }
    };
}

/// Like `each_array!`, but rewraps the resulting vector in the same variant.
macro_rules! map_array {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            Array::I1($v) => Array::I1($body),
            Array::U1($v) => Array::U1($body),
            Array::I2($v) => Array::I2($body),
            Array::U2($v) => Array::U2($body),
            Array::I4($v) => Array::I4($body),
            Array::U4($v) => Array::U4($body),
            Array::I8($v) => Array::I8($body),
            Array::U8($v) => Array::U8($body),
            Array::F4($v) => Array::F4($body),
            Array::F8($v) => Array::F8($body),
        }
    };
}

macro_rules! typed_access {
    ($($variant:ident, $ty:ty, $as_fn:ident;)*) => {
        impl Array {
            $(
                pub fn $as_fn(&self) -> Option<&[$ty]> {
                    match self {
                        Array::$variant(v) => Some(v.as_slice()),
                        _ => None,
                    }
                }
            )*
        }

        $(
            impl From<Vec<$ty>> for Array {
                fn from(v: Vec<$ty>) -> Self {
                    Array::$variant(v)
                }
            }
        )*
    };
}

typed_access! {
    I1, i8,  as_i8;
    U1, u8,  as_u8;
    I2, i16, as_i16;
    U2, u16, as_u16;
    I4, i32, as_i32;
    U4, u32, as_u32;
    I8, i64, as_i64;
    U8, u64, as_u64;
    F4, f32, as_f32;
    F8, f64, as_f64;
}

impl Array {
    /// `n` zero-valued elements of `dtype`.
    pub fn zeros(dtype: Dtype, n: usize) -> Self {
        match dtype {
            Dtype::I1 => Array::I1(vec![0; n]),
            Dtype::U1 => Array::U1(vec![0; n]),
            Dtype::I2 => Array::I2(vec![0; n]),
            Dtype::U2 => Array::U2(vec![0; n]),
            Dtype::I4 => Array::I4(vec![0; n]),
            Dtype::U4 => Array::U4(vec![0; n]),
            Dtype::I8 => Array::I8(vec![0; n]),
            Dtype::U8 => Array::U8(vec![0; n]),
            Dtype::F4 => Array::F4(vec![0.0; n]),
            Dtype::F8 => Array::F8(vec![0.0; n]),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Array::I1(_) => Dtype::I1,
            Array::U1(_) => Dtype::U1,
            Array::I2(_) => Dtype::I2,
            Array::U2(_) => Dtype::U2,
            Array::I4(_) => Dtype::I4,
            Array::U4(_) => Dtype::U4,
            Array::I8(_) => Dtype::I8,
            Array::U8(_) => Dtype::U8,
            Array::F4(_) => Dtype::F4,
            Array::F8(_) => Dtype::F8,
        }
    }

    pub fn len(&self) -> usize {
        each_array!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the raw representation in bytes.
    pub fn byte_len(&self) -> usize {
        self.len() * self.dtype().size()
    }

    /// Copy of the elements in `range`, or `None` if it runs past the end.
    pub fn slice(&self, range: Range<usize>) -> Option<Array> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        Some(map_array!(self, v => v[range].to_vec()))
    }

    /// Append the elements of `other`, which must have the same element type.
    pub fn extend(&mut self, other: &Array) -> Result<(), DtypeError> {
        match (self, other) {
            (Array::I1(a), Array::I1(b)) => a.extend_from_slice(b),
            (Array::U1(a), Array::U1(b)) => a.extend_from_slice(b),
            (Array::I2(a), Array::I2(b)) => a.extend_from_slice(b),
            (Array::U2(a), Array::U2(b)) => a.extend_from_slice(b),
            (Array::I4(a), Array::I4(b)) => a.extend_from_slice(b),
            (Array::U4(a), Array::U4(b)) => a.extend_from_slice(b),
            (Array::I8(a), Array::I8(b)) => a.extend_from_slice(b),
            (Array::U8(a), Array::U8(b)) => a.extend_from_slice(b),
            (Array::F4(a), Array::F4(b)) => a.extend_from_slice(b),
            (Array::F8(a), Array::F8(b)) => a.extend_from_slice(b),
            (a, b) => {
                return Err(DtypeError::Mismatch { expected: a.dtype(), found: b.dtype() });
            }
        }
        Ok(())
    }

    /// Concatenate `parts` into one array of `dtype`.
    pub fn concat<'a, I>(dtype: Dtype, parts: I) -> Result<Array, DtypeError>
    where
        I: IntoIterator<Item = &'a Array>,
    {
        let mut out = Array::zeros(dtype, 0);
        for part in parts {
            out.extend(part)?;
        }
        Ok(out)
    }

    /// Sum of all elements, widened to `f64`.
    pub fn sum_f64(&self) -> f64 {
        each_array!(self, v => v.iter().map(|&x| x as f64).sum())
    }

    /// Elements of an integer array widened to `i128`; `None` for floats.
    pub fn to_i128_vec(&self) -> Option<Vec<i128>> {
        match self {
            Array::F4(_) | Array::F8(_) => None,
            Array::I1(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::U1(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::I2(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::U2(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::I4(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::U4(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::I8(v) => Some(v.iter().map(|&x| x as i128).collect()),
            Array::U8(v) => Some(v.iter().map(|&x| x as i128).collect()),
        }
    }

    // ── Byte codec ───────────────────────────────────────────────────────────

    /// Decode a raw payload as a run of `dtype` elements.
    pub fn decode(dtype: Dtype, bytes: &[u8], endian: Endian) -> Result<Array, DtypeError> {
        if bytes.len() % dtype.size() != 0 {
            return Err(DtypeError::Misaligned { len: bytes.len(), dtype });
        }
        Ok(match endian {
            Endian::Little => decode_with::<LittleEndian>(dtype, bytes),
            Endian::Big    => decode_with::<BigEndian>(dtype, bytes),
        })
    }

    /// Raw representation of the elements in `endian` byte order.
    pub fn encode(&self, endian: Endian) -> Vec<u8> {
        match endian {
            Endian::Little => self.encode_with::<LittleEndian>(),
            Endian::Big    => self.encode_with::<BigEndian>(),
        }
    }

    fn encode_with<B: ByteOrder>(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.byte_len()];
        match self {
            Array::I1(v) => {
                for (o, &x) in out.iter_mut().zip(v) {
                    *o = x as u8;
                }
            }
            Array::U1(v) => out.copy_from_slice(v),
            Array::I2(v) => B::write_i16_into(v, &mut out),
            Array::U2(v) => B::write_u16_into(v, &mut out),
            Array::I4(v) => B::write_i32_into(v, &mut out),
            Array::U4(v) => B::write_u32_into(v, &mut out),
            Array::I8(v) => B::write_i64_into(v, &mut out),
            Array::U8(v) => B::write_u64_into(v, &mut out),
            Array::F4(v) => B::write_f32_into(v, &mut out),
            Array::F8(v) => B::write_f64_into(v, &mut out),
        }
        out
    }
}

fn decode_with<B: ByteOrder>(dtype: Dtype, bytes: &[u8]) -> Array {
    let n = bytes.len() / dtype.size();
    match dtype {
        Dtype::I1 => Array::I1(bytes.iter().map(|&b| b as i8).collect()),
        Dtype::U1 => Array::U1(bytes.to_vec()),
        Dtype::I2 => { let mut v = vec![0i16; n]; B::read_i16_into(bytes, &mut v); Array::I2(v) }
        Dtype::U2 => { let mut v = vec![0u16; n]; B::read_u16_into(bytes, &mut v); Array::U2(v) }
        Dtype::I4 => { let mut v = vec![0i32; n]; B::read_i32_into(bytes, &mut v); Array::I4(v) }
        Dtype::U4 => { let mut v = vec![0u32; n]; B::read_u32_into(bytes, &mut v); Array::U4(v) }
        Dtype::I8 => { let mut v = vec![0i64; n]; B::read_i64_into(bytes, &mut v); Array::I8(v) }
        Dtype::U8 => { let mut v = vec![0u64; n]; B::read_u64_into(bytes, &mut v); Array::U8(v) }
        Dtype::F4 => { let mut v = vec![0.0_f32; n]; B::read_f32_into(bytes, &mut v); Array::F4(v) }
        Dtype::F8 => { let mut v = vec![0.0_f64; n]; B::read_f64_into(bytes, &mut v); Array::F8(v) }
    }
}

// ── BlockArray ───────────────────────────────────────────────────────────────

/// Per-particle-type block data: a flat [`Array`] viewed as rows of `ndims`.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockArray {
    data:  Array,
    ndims: usize,
}

impl BlockArray {
    pub fn new(data: Array, ndims: usize) -> Result<Self, DtypeError> {
        if ndims == 0 {
            return Err(DtypeError::ZeroDims);
        }
        if data.len() % ndims != 0 {
            return Err(DtypeError::Ragged { len: data.len(), ndims });
        }
        Ok(Self { data, ndims })
    }

    pub fn data(&self) -> &Array { &self.data }
    pub fn into_data(self) -> Array { self.data }
    pub fn dtype(&self) -> Dtype { self.data.dtype() }
    pub fn ndims(&self) -> usize { self.ndims }

    /// Number of particles (rows).
    pub fn rows(&self) -> usize {
        self.data.len() / self.ndims
    }

    /// `[n]` for scalar blocks, `[n, ndims]` otherwise.
    pub fn shape(&self) -> Vec<usize> {
        if self.ndims == 1 {
            vec![self.data.len()]
        } else {
            vec![self.rows(), self.ndims]
        }
    }
}
