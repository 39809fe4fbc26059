//! Record codec for the unformatted sequential layout.
//!
//! ```text
//! [ control word: L ][ L payload bytes ][ control word: L ]
//! ```
//!
//! Both control words carry the payload length and must agree.  A mismatch
//! means the stream is desynchronised: the error is returned and no attempt
//! is made to resynchronise, the stream is corrupt from that point on.
//!
//! The codec is strictly sequential.  It keeps no index of record offsets;
//! re-reading means re-opening the stream or seeking outside the codec.
//!
//! # Configuration
//! Control word type and byte order are fixed per [`RecordFile`].  They are
//! validated before any file is touched: [`RecordFile::open`] parses the
//! control word spec first and only then opens the path.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::dtype::{Array, Dtype, DtypeError, Endian};

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Unsupported control word '{0}' (expected i4, u4, i8 or u8)")]
    Config(String),
    /// Leading and trailing control words disagree.  Fatal for the stream.
    #[error("Desynchronized record at offset {offset}: leading marker {leading}, trailing marker {trailing}")]
    Desync { offset: u64, leading: u64, trailing: i128 },
    #[error("Negative record length {value} at offset {offset}")]
    Negative { offset: u64, value: i128 },
    #[error("Record of {len} bytes does not fit a {control} control word")]
    TooLarge { len: u64, control: ControlWord },
    #[error(transparent)]
    Dtype(#[from] DtypeError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Control word ─────────────────────────────────────────────────────────────

/// Integer type of the length markers framing each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ControlWord {
    #[default]
    I4,
    U4,
    I8,
    U8,
}

impl ControlWord {
    /// Parse a control word spec: a type code (`i4`, `u4`, `i8`, `u8`, with an
    /// optional byte-order prefix) or a bare width (`4`, `8`, signed).
    pub fn parse(spec: &str) -> Result<Self, RecordError> {
        let trimmed = spec.trim();
        let code = trimmed.strip_prefix(['<', '>', '=']).unwrap_or(trimmed);
        match code.to_ascii_lowercase().as_str() {
            "i4" | "4" => Ok(ControlWord::I4),
            "u4"       => Ok(ControlWord::U4),
            "i8" | "8" => Ok(ControlWord::I8),
            "u8"       => Ok(ControlWord::U8),
            _          => Err(RecordError::Config(spec.to_owned())),
        }
    }

    /// Width of one control word in bytes.
    pub fn width(self) -> usize {
        match self {
            ControlWord::I4 | ControlWord::U4 => 4,
            ControlWord::I8 | ControlWord::U8 => 8,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ControlWord::I4 => "i4",
            ControlWord::U4 => "u4",
            ControlWord::I8 => "i8",
            ControlWord::U8 => "u8",
        }
    }

    /// Largest payload length this control word can describe.
    pub fn max_len(self) -> u64 {
        match self {
            ControlWord::I4 => i32::MAX as u64,
            ControlWord::U4 => u32::MAX as u64,
            ControlWord::I8 => i64::MAX as u64,
            ControlWord::U8 => u64::MAX,
        }
    }

    fn value(self, bytes: &[u8], endian: Endian) -> i128 {
        match endian {
            Endian::Little => self.value_with::<LittleEndian>(bytes),
            Endian::Big    => self.value_with::<BigEndian>(bytes),
        }
    }

    fn value_with<B: ByteOrder>(self, bytes: &[u8]) -> i128 {
        match self {
            ControlWord::I4 => B::read_i32(bytes) as i128,
            ControlWord::U4 => B::read_u32(bytes) as i128,
            ControlWord::I8 => B::read_i64(bytes) as i128,
            ControlWord::U8 => B::read_u64(bytes) as i128,
        }
    }

    fn encode(self, len: u64, endian: Endian) -> Result<([u8; 8], usize), RecordError> {
        if len > self.max_len() {
            return Err(RecordError::TooLarge { len, control: self });
        }
        let mut buf = [0u8; 8];
        let width = self.width();
        // Lengths within max_len share their bit pattern across signed and unsigned.
        match (width, endian) {
            (4, Endian::Little) => LittleEndian::write_u32(&mut buf[..4], len as u32),
            (4, Endian::Big)    => BigEndian::write_u32(&mut buf[..4], len as u32),
            (_, Endian::Little) => LittleEndian::write_u64(&mut buf[..8], len),
            (_, Endian::Big)    => BigEndian::write_u64(&mut buf[..8], len),
        }
        Ok((buf, width))
    }
}

impl TryFrom<String> for ControlWord {
    type Error = RecordError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        ControlWord::parse(&s)
    }
}

impl From<ControlWord> for String {
    fn from(c: ControlWord) -> Self {
        c.code().to_owned()
    }
}

impl fmt::Display for ControlWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Config ───────────────────────────────────────────────────────────────────

/// Per-stream framing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordConfig {
    #[serde(default)]
    pub control: ControlWord,
    #[serde(default)]
    pub endian:  Endian,
}

impl RecordConfig {
    pub fn new(control: ControlWord, endian: Endian) -> Self {
        Self { control, endian }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    /// Create or truncate.
    Write,
    /// Create if missing, append records at the end.
    Append,
}

// ── RecordFile ───────────────────────────────────────────────────────────────

/// A sequential record stream over `S`.
///
/// Reading requires `S: Read`, writing `S: Write`.  The handle owns the
/// stream; dropping it releases the stream, [`RecordFile::close`] also flushes
/// and reports the flush error.
pub struct RecordFile<S> {
    stream:   S,
    config:   RecordConfig,
    position: u64,
}

impl RecordFile<File> {
    /// Open `path` with a textual control word spec.
    ///
    /// The spec is validated before the filesystem is touched, so an invalid
    /// spec fails with [`RecordError::Config`] even if `path` does not exist.
    pub fn open<P: AsRef<Path>>(
        path:    P,
        mode:    Mode,
        control: &str,
        endian:  Endian,
    ) -> Result<Self, RecordError> {
        let control = ControlWord::parse(control)?;
        Self::open_with(path, mode, RecordConfig::new(control, endian))
    }

    pub fn open_with<P: AsRef<Path>>(
        path:   P,
        mode:   Mode,
        config: RecordConfig,
    ) -> Result<Self, RecordError> {
        let path = path.as_ref();
        let file = match mode {
            Mode::Read   => File::open(path)?,
            Mode::Write  => File::create(path)?,
            Mode::Append => OpenOptions::new().append(true).create(true).open(path)?,
        };
        debug!(path = %path.display(), ?mode, control = config.control.code(), "opened record stream");
        Ok(Self::new(file, config))
    }
}

impl<S> RecordFile<S> {
    pub fn new(stream: S, config: RecordConfig) -> Self {
        Self { stream, config, position: 0 }
    }

    pub fn config(&self) -> RecordConfig {
        self.config
    }

    /// Bytes consumed or produced through this handle so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<R: Read> RecordFile<R> {
    /// Read one record and decode its payload as `dtype` elements.
    pub fn read_record(&mut self, dtype: Dtype) -> Result<Array, RecordError> {
        let payload = self.read_raw()?;
        Ok(Array::decode(dtype, &payload, self.config.endian)?)
    }

    /// Read one record's payload.  End of stream is an `UnexpectedEof` error.
    pub fn read_raw(&mut self) -> Result<Vec<u8>, RecordError> {
        match self.try_read_raw()? {
            Some(payload) => Ok(payload),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no record at end of stream").into()),
        }
    }

    /// Read one record's payload, or `None` if the stream ends cleanly on a
    /// record boundary.
    pub fn try_read_raw(&mut self) -> Result<Option<Vec<u8>>, RecordError> {
        let start = self.position;
        let Some(len) = self.read_leading()? else {
            return Ok(None);
        };

        // Grow as bytes arrive rather than trusting `len` for the allocation.
        let mut payload = Vec::new();
        let got = (&mut self.stream).take(len).read_to_end(&mut payload)? as u64;
        self.position += got;
        if got < len {
            return Err(truncated(start, len, got).into());
        }

        self.read_trailing(len)?;
        trace!(offset = start, len, "read record");
        Ok(Some(payload))
    }

    /// Advance past one record without keeping its payload.  Both markers are
    /// still verified.  Returns the payload length.
    pub fn skip_record(&mut self) -> Result<u64, RecordError> {
        let start = self.position;
        let len = self.read_leading()?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "no record at end of stream")
        })?;
        let got = io::copy(&mut (&mut self.stream).take(len), &mut io::sink())?;
        self.position += got;
        if got < len {
            return Err(truncated(start, len, got).into());
        }
        self.read_trailing(len)?;
        Ok(len)
    }

    fn read_leading(&mut self) -> Result<Option<u64>, RecordError> {
        let offset = self.position;
        let width = self.config.control.width();
        let mut buf = [0u8; 8];

        let first = loop {
            match self.stream.read(&mut buf[..width]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if first == 0 {
            return Ok(None);
        }
        self.stream.read_exact(&mut buf[first..width])?;
        self.position += width as u64;

        let value = self.config.control.value(&buf[..width], self.config.endian);
        if value < 0 {
            return Err(RecordError::Negative { offset, value });
        }
        Ok(Some(value as u64))
    }

    fn read_trailing(&mut self, leading: u64) -> Result<(), RecordError> {
        let width = self.config.control.width();
        let mut buf = [0u8; 8];
        self.stream.read_exact(&mut buf[..width])?;
        self.position += width as u64;

        let trailing = self.config.control.value(&buf[..width], self.config.endian);
        if trailing != leading as i128 {
            return Err(RecordError::Desync {
                offset: self.position - width as u64,
                leading,
                trailing,
            });
        }
        Ok(())
    }
}

impl<W: Write> RecordFile<W> {
    /// Write one record: leading marker, payload, trailing marker.
    pub fn write_bytes(&mut self, payload: &[u8]) -> Result<(), RecordError> {
        let len = payload.len() as u64;
        let (marker, width) = self.config.control.encode(len, self.config.endian)?;
        self.stream.write_all(&marker[..width])?;
        self.stream.write_all(payload)?;
        self.stream.write_all(&marker[..width])?;
        trace!(offset = self.position, len, "wrote record");
        self.position += 2 * width as u64 + len;
        Ok(())
    }

    /// Write the raw representation of `array` as one record.
    pub fn write_array(&mut self, array: &Array) -> Result<(), RecordError> {
        self.write_bytes(&array.encode(self.config.endian))
    }

    pub fn flush(&mut self) -> Result<(), RecordError> {
        Ok(self.stream.flush()?)
    }

    /// Flush and release the stream.
    pub fn close(mut self) -> Result<(), RecordError> {
        self.stream.flush()?;
        Ok(())
    }
}

fn truncated(offset: u64, len: u64, got: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("record at offset {offset} declares {len} bytes, stream ends after {got}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn framed(control: &[u8], payload: &[u8], trailer: &[u8]) -> Vec<u8> {
        let mut v = control.to_vec();
        v.extend_from_slice(payload);
        v.extend_from_slice(trailer);
        v
    }

    #[test]
    fn control_word_specs() {
        assert_eq!(ControlWord::parse("i4").unwrap(), ControlWord::I4);
        assert_eq!(ControlWord::parse("<u8").unwrap(), ControlWord::U8);
        assert_eq!(ControlWord::parse("8").unwrap(), ControlWord::I8);
        assert!(matches!(ControlWord::parse("invalid"), Err(RecordError::Config(_))));
        assert!(matches!(ControlWord::parse("i2"), Err(RecordError::Config(_))));
    }

    #[test]
    fn writes_both_markers() {
        let mut rf = RecordFile::new(Vec::new(), RecordConfig::default());
        rf.write_array(&Array::from(vec![1i32, 2, 3])).unwrap();
        assert_eq!(rf.position(), 20);
        let bytes = rf.into_inner();
        assert_eq!(&bytes[..4], &12u32.to_le_bytes());
        assert_eq!(&bytes[16..], &12u32.to_le_bytes());
    }

    #[test]
    fn big_endian_u8_markers() {
        let config = RecordConfig::new(ControlWord::U8, Endian::Big);
        let mut rf = RecordFile::new(Vec::new(), config);
        rf.write_array(&Array::from(vec![7u16])).unwrap();
        let bytes = rf.into_inner();
        assert_eq!(bytes, framed(&2u64.to_be_bytes(), &[0, 7], &2u64.to_be_bytes()));

        let mut rf = RecordFile::new(Cursor::new(bytes), config);
        assert_eq!(rf.read_record(Dtype::U2).unwrap(), Array::from(vec![7u16]));
        assert_eq!(rf.position(), 18);
    }

    #[test]
    fn empty_record() {
        let mut rf = RecordFile::new(Vec::new(), RecordConfig::default());
        rf.write_array(&Array::zeros(Dtype::F8, 0)).unwrap();
        let mut rf = RecordFile::new(Cursor::new(rf.into_inner()), RecordConfig::default());
        assert!(rf.read_record(Dtype::F8).unwrap().is_empty());
        assert!(rf.try_read_raw().unwrap().is_none());
    }

    #[test]
    fn detects_desync() {
        let data = framed(&4u32.to_le_bytes(), &[1, 2, 3, 4], &5u32.to_le_bytes());
        let mut rf = RecordFile::new(Cursor::new(data), RecordConfig::default());
        match rf.read_record(Dtype::U1) {
            Err(RecordError::Desync { offset, leading, trailing }) => {
                assert_eq!(offset, 8);
                assert_eq!(leading, 4);
                assert_eq!(trailing, 5);
            }
            other => panic!("expected desync, got {other:?}"),
        }
        // No recovery: the cursor stays past the bad trailer.
        assert_eq!(rf.position(), 12);
    }

    #[test]
    fn rejects_negative_length() {
        let data = framed(&(-4i32).to_le_bytes(), &[], &[]);
        let mut rf = RecordFile::new(Cursor::new(data), RecordConfig::default());
        assert!(matches!(rf.read_raw(), Err(RecordError::Negative { value: -4, .. })));
    }

    #[test]
    fn truncated_payload_is_io_error() {
        let data = framed(&100u32.to_le_bytes(), &[0u8; 10], &[]);
        let mut rf = RecordFile::new(Cursor::new(data), RecordConfig::default());
        match rf.read_raw() {
            Err(RecordError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {other:?}"),
        }
    }

    #[test]
    fn misaligned_payload() {
        let data = framed(&3u32.to_le_bytes(), &[0, 0, 0], &3u32.to_le_bytes());
        let mut rf = RecordFile::new(Cursor::new(data), RecordConfig::default());
        assert!(matches!(
            rf.read_record(Dtype::I2),
            Err(RecordError::Dtype(DtypeError::Misaligned { len: 3, .. }))
        ));
    }

    #[test]
    fn skip_then_read() {
        let mut rf = RecordFile::new(Vec::new(), RecordConfig::default());
        rf.write_bytes(&[9u8; 33]).unwrap();
        rf.write_array(&Array::from(vec![1.25f64])).unwrap();
        let mut rf = RecordFile::new(Cursor::new(rf.into_inner()), RecordConfig::default());
        assert_eq!(rf.skip_record().unwrap(), 33);
        assert_eq!(rf.read_record(Dtype::F8).unwrap(), Array::from(vec![1.25f64]));
    }

    #[test]
    fn payload_too_large_for_control_word() {
        assert!(matches!(
            ControlWord::I4.encode(1 << 31, Endian::Little),
            Err(RecordError::TooLarge { .. })
        ));
        assert!(ControlWord::U4.encode(1 << 31, Endian::Little).is_ok());
    }
}
