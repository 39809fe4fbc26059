//! Snapshot engine: header, particle-type index and schema-driven blocks.
//!
//! # Loading
//! [`Snapshot::load`] makes one sequential pass over the file:
//!
//! 1. open the stream,
//! 2. read the header record and build the particle-type index,
//! 3. for each [`BlockSpec`] in schema order, ask the format which of the
//!    candidate particle types are present ([`SnapshotFormat::block_exists`]).
//!    An empty answer skips an optional block and fails a required one.
//!    Otherwise one record is read and split into per-type arrays by
//!    [`SnapshotFormat::parse_block`].
//!
//! # States
//! `Unopened → HeaderLoaded → BlockLoaded(n)* → Loaded`, with `Failed`
//! reachable from every state.  A failed load exposes neither header nor
//! blocks; there is no partial result.  The stream is owned by the load call
//! and released on every exit path.
//!
//! # Format hooks
//! Which types a block covers and how its record splits into per-type arrays
//! are format decisions.  They live behind [`SnapshotFormat`]; errors raised
//! by a hook are returned unchanged.  The engine only checks the shape of the
//! hook's answer: one entry per particle type, an array exactly for the
//! present types, of the declared element type and dimensionality.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SnapshotConfig;
use crate::dtype::{Array, BlockArray, Dtype, DtypeError};
use crate::header::{Header, HeaderError};
use crate::ptype::{ParticleTypes, PtypeError};
use crate::record::{RecordConfig, RecordError, RecordFile};
use crate::schema::BlockSpec;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Ptype(#[from] PtypeError),
    #[error(transparent)]
    Dtype(#[from] DtypeError),
    #[error("Missing required block '{0}'")]
    MissingBlock(String),
    #[error("Block '{block}' lists particle type {ptype}, but the file has {len} types")]
    PtypeOutOfRange { block: String, ptype: usize, len: usize },
    /// A format hook answered with the wrong shape.
    #[error("Block '{block}': format hook broke the block contract: {reason}")]
    Contract { block: String, reason: String },
    /// A format hook could not split a block record.
    #[error("Block '{block}': {reason}")]
    Parse { block: String, reason: String },
    #[error("Unknown block '{0}'")]
    UnknownBlock(String),
    #[error("Operation not allowed while snapshot is {0:?}")]
    State(LoadState),
    #[error("Block record written before the header")]
    HeaderNotWritten,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Format hooks ─────────────────────────────────────────────────────────────

/// What a format hook can see while a block is being loaded.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub header: &'a Header,
    pub ptypes: &'a ParticleTypes,
}

/// Per-type block data: one entry per particle type, `None` where the block
/// does not cover the type.
pub type BlockData = Vec<Option<BlockArray>>;

/// Format-specific decisions consumed by the engine.
pub trait SnapshotFormat {
    /// Subset of `candidates` (the schema's particle types for `spec`) that
    /// this file actually stores in the block.
    fn block_exists(
        &self,
        ctx:        &LoadContext<'_>,
        spec:       &BlockSpec,
        candidates: &[usize],
    ) -> Result<Vec<usize>, SnapshotError>;

    /// Split one block record into per-type arrays covering the whole index.
    fn parse_block(
        &self,
        ctx:     &LoadContext<'_>,
        raw:     Array,
        spec:    &BlockSpec,
        present: &[usize],
    ) -> Result<BlockData, SnapshotError>;
}

impl<T: SnapshotFormat + ?Sized> SnapshotFormat for &T {
    fn block_exists(&self, ctx: &LoadContext<'_>, spec: &BlockSpec, candidates: &[usize]) -> Result<Vec<usize>, SnapshotError> {
        (**self).block_exists(ctx, spec, candidates)
    }

    fn parse_block(&self, ctx: &LoadContext<'_>, raw: Array, spec: &BlockSpec, present: &[usize]) -> Result<BlockData, SnapshotError> {
        (**self).parse_block(ctx, raw, spec, present)
    }
}

impl<T: SnapshotFormat + ?Sized> SnapshotFormat for Box<T> {
    fn block_exists(&self, ctx: &LoadContext<'_>, spec: &BlockSpec, candidates: &[usize]) -> Result<Vec<usize>, SnapshotError> {
        (**self).block_exists(ctx, spec, candidates)
    }

    fn parse_block(&self, ctx: &LoadContext<'_>, raw: Array, spec: &BlockSpec, present: &[usize]) -> Result<BlockData, SnapshotError> {
        (**self).parse_block(ctx, raw, spec, present)
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unopened,
    HeaderLoaded,
    /// Number of blocks stored so far.
    BlockLoaded(usize),
    Loaded,
    Failed,
}

pub struct Snapshot<F> {
    path:   PathBuf,
    config: SnapshotConfig,
    format: F,
    state:  LoadState,
    header: Option<Header>,
    ptypes: Option<ParticleTypes>,
    blocks: Vec<(String, BlockData)>,
}

impl<F: SnapshotFormat> Snapshot<F> {
    pub fn new<P: AsRef<Path>>(path: P, config: SnapshotConfig, format: F) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            config,
            format,
            state:  LoadState::Unopened,
            header: None,
            ptypes: None,
            blocks: Vec::new(),
        }
    }

    /// Open the file and load header and blocks in one pass.
    pub fn load(&mut self) -> Result<(), SnapshotError> {
        self.ensure_unopened()?;
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                self.state = LoadState::Failed;
                warn!(path = %self.path.display(), error = %e, "cannot open snapshot");
                return Err(e.into());
            }
        };
        let records = RecordFile::new(BufReader::new(file), self.config.record);
        self.load_from(records)
    }

    /// Load from an already opened record stream.  The stream is consumed
    /// and dropped before this returns.
    pub fn load_from<R: Read>(&mut self, mut records: RecordFile<R>) -> Result<(), SnapshotError> {
        self.ensure_unopened()?;
        match self.run(&mut records) {
            Ok(()) => {
                self.state = LoadState::Loaded;
                info!(
                    path = %self.path.display(),
                    ptypes = self.ptypes.as_ref().map_or(0, ParticleTypes::len),
                    blocks = self.blocks.len(),
                    bytes = records.position(),
                    "snapshot loaded"
                );
                Ok(())
            }
            Err(e) => {
                self.state = LoadState::Failed;
                self.header = None;
                self.ptypes = None;
                self.blocks.clear();
                warn!(path = %self.path.display(), error = %e, "snapshot load failed");
                Err(e)
            }
        }
    }

    fn ensure_unopened(&self) -> Result<(), SnapshotError> {
        match self.state {
            LoadState::Unopened => Ok(()),
            other => Err(SnapshotError::State(other)),
        }
    }

    fn run<R: Read>(&mut self, records: &mut RecordFile<R>) -> Result<(), SnapshotError> {
        let payload = records.read_raw()?;
        let header = Header::decode(&payload, &self.config.header, records.config().endian)?;
        let ptypes = ParticleTypes::from_header(&header, &self.config.counts_field, &self.config.aliases)?;
        self.state = LoadState::HeaderLoaded;
        debug!(ptypes = ptypes.len(), total = ?ptypes.total(), "header loaded");

        let ctx = LoadContext { header: &header, ptypes: &ptypes };
        let mut blocks = Vec::new();
        for spec in &self.config.blocks {
            if let Some(data) = load_block(&self.format, &ctx, spec, records)? {
                blocks.push((spec.name.clone(), data));
                self.state = LoadState::BlockLoaded(blocks.len());
            }
        }

        self.header = Some(header);
        self.ptypes = Some(ptypes);
        self.blocks = blocks;
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn state(&self) -> LoadState { self.state }
    pub fn is_loaded(&self) -> bool { self.state == LoadState::Loaded }
    pub fn path(&self) -> &Path { &self.path }
    pub fn config(&self) -> &SnapshotConfig { &self.config }
    pub fn format(&self) -> &F { &self.format }

    /// The decoded header, once loaded.
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn ptypes(&self) -> Option<&ParticleTypes> {
        self.ptypes.as_ref()
    }

    /// Per-type data of a loaded block.  `None` if the block was absent.
    pub fn block(&self, name: &str) -> Option<&[Option<BlockArray>]> {
        self.blocks.iter().find(|(n, _)| n == name).map(|(_, d)| d.as_slice())
    }

    /// Names of the loaded blocks, in file order.
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().map(|(n, _)| n.as_str())
    }

    /// Data of `block` for the particle type called `alias`.
    pub fn get(&self, block: &str, alias: &str) -> Result<Option<&BlockArray>, SnapshotError> {
        let ptypes = self.ptypes.as_ref().ok_or(SnapshotError::State(self.state))?;
        let ptype = ptypes.resolve(alias)?;
        let data = self.block(block).ok_or_else(|| SnapshotError::UnknownBlock(block.to_owned()))?;
        Ok(data.get(ptype).and_then(Option::as_ref))
    }

    /// Write the loaded header and blocks to `path` with this snapshot's
    /// record settings.  Present types of each block are concatenated in
    /// index order, which is the layout [`load`](Self::load) expects back.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SnapshotError> {
        let header = match (&self.header, self.state) {
            (Some(h), LoadState::Loaded) => h,
            (_, state) => return Err(SnapshotError::State(state)),
        };
        let mut writer = SnapshotWriter::create(path, self.config.record)?;
        writer.write_header(header)?;
        for (name, data) in &self.blocks {
            let dtype = self.config.blocks.get(name)
                .map(|b| b.dtype)
                .ok_or_else(|| SnapshotError::UnknownBlock(name.clone()))?;
            writer.write_block_parts(dtype, data)?;
        }
        writer.finish()?;
        Ok(())
    }
}

fn load_block<F, R>(
    format:  &F,
    ctx:     &LoadContext<'_>,
    spec:    &BlockSpec,
    records: &mut RecordFile<R>,
) -> Result<Option<BlockData>, SnapshotError>
where
    F: SnapshotFormat,
    R: Read,
{
    let k = ctx.ptypes.len();
    if let Some(&ptype) = spec.ptypes.iter().find(|&&p| p >= k) {
        return Err(SnapshotError::PtypeOutOfRange { block: spec.name.clone(), ptype, len: k });
    }

    let present = format.block_exists(ctx, spec, &spec.ptypes)?;
    if let Some(p) = present.iter().find(|p| !spec.ptypes.contains(p)) {
        return Err(contract(spec, format!("particle type {p} reported present but not in the schema")));
    }

    if present.is_empty() {
        if spec.required {
            return Err(SnapshotError::MissingBlock(spec.name.clone()));
        }
        warn!(block = %spec.name, "optional block absent, skipped");
        return Ok(None);
    }

    let raw = records.read_record(spec.dtype)?;
    debug!(block = %spec.name, elements = raw.len(), present = ?present, "read block record");
    let data = format.parse_block(ctx, raw, spec, &present)?;
    check_block(spec, &present, k, &data)?;
    Ok(Some(data))
}

fn check_block(spec: &BlockSpec, present: &[usize], k: usize, data: &BlockData) -> Result<(), SnapshotError> {
    if data.len() != k {
        return Err(contract(spec, format!("{} entries for {k} particle types", data.len())));
    }
    for (ptype, entry) in data.iter().enumerate() {
        match (present.contains(&ptype), entry) {
            (true, Some(arr)) => {
                if arr.dtype() != spec.dtype || arr.ndims() != spec.ndims {
                    return Err(contract(spec, format!(
                        "particle type {ptype} holds {}x{}, expected {}x{}",
                        arr.dtype(), arr.ndims(), spec.dtype, spec.ndims,
                    )));
                }
            }
            (true, None)  => return Err(contract(spec, format!("no array for present particle type {ptype}"))),
            (false, Some(_)) => return Err(contract(spec, format!("array for absent particle type {ptype}"))),
            (false, None) => {}
        }
    }
    Ok(())
}

fn contract(spec: &BlockSpec, reason: String) -> SnapshotError {
    SnapshotError::Contract { block: spec.name.clone(), reason }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Builds a snapshot file: one header record, then block records in order.
pub struct SnapshotWriter<W: Write> {
    records:        RecordFile<W>,
    header_written: bool,
}

impl SnapshotWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P, config: RecordConfig) -> Result<Self, SnapshotError> {
        let file = File::create(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "creating snapshot");
        Ok(Self::new(RecordFile::new(BufWriter::new(file), config)))
    }
}

impl<W: Write> SnapshotWriter<W> {
    pub fn new(records: RecordFile<W>) -> Self {
        Self { records, header_written: false }
    }

    pub fn write_header(&mut self, header: &Header) -> Result<(), SnapshotError> {
        header.write(&mut self.records)?;
        self.header_written = true;
        Ok(())
    }

    /// Write one block record from its flat payload.
    pub fn write_block(&mut self, data: &Array) -> Result<(), SnapshotError> {
        if !self.header_written {
            return Err(SnapshotError::HeaderNotWritten);
        }
        self.records.write_array(data)?;
        Ok(())
    }

    /// Write one block record from per-type parts, concatenated in type order.
    pub fn write_block_parts(&mut self, dtype: Dtype, parts: &[Option<BlockArray>]) -> Result<(), SnapshotError> {
        let flat = Array::concat(dtype, parts.iter().flatten().map(BlockArray::data))?;
        self.write_block(&flat)
    }

    /// Flush and hand back the underlying stream.
    pub fn finish(mut self) -> Result<W, SnapshotError> {
        self.records.flush()?;
        Ok(self.records.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;
    use crate::header::{HeaderField, HeaderSchema};
    use crate::schema::BlockSchema;
    use std::io::Cursor;

    /// Answers with whatever it was built with, ignoring the file.
    struct Fixed {
        present: Vec<usize>,
        data:    BlockData,
    }

    impl SnapshotFormat for Fixed {
        fn block_exists(&self, _: &LoadContext<'_>, _: &BlockSpec, _: &[usize]) -> Result<Vec<usize>, SnapshotError> {
            Ok(self.present.clone())
        }

        fn parse_block(&self, _: &LoadContext<'_>, _: Array, _: &BlockSpec, _: &[usize]) -> Result<BlockData, SnapshotError> {
            Ok(self.data.clone())
        }
    }

    fn config(required: bool) -> SnapshotConfig {
        let header = HeaderSchema::new(vec![HeaderField::new("npart", Dtype::I4, 3)]).unwrap();
        let blocks = BlockSchema::new(vec![BlockSpec::new("id", Dtype::U4, 1, vec![0, 1], required)]).unwrap();
        SnapshotConfig::new(header, blocks, "npart").with_aliases([("gas", 0), ("dm", 1), ("stars", 2)])
    }

    fn file(block: &[u32]) -> Vec<u8> {
        let schema = config(true).header;
        let mut hdr = Header::zeroed(&schema);
        hdr.set("npart", Array::from(vec![2i32, 1, 0])).unwrap();
        let mut w = SnapshotWriter::new(RecordFile::new(Vec::new(), RecordConfig::default()));
        w.write_header(&hdr).unwrap();
        w.write_block(&Array::from(block.to_vec())).unwrap();
        w.finish().unwrap()
    }

    fn load(format: Fixed, required: bool) -> (Snapshot<Fixed>, Result<(), SnapshotError>) {
        let mut snap = Snapshot::new("memory", config(required), format);
        let rf = RecordFile::new(Cursor::new(file(&[7, 8, 9])), RecordConfig::default());
        let res = snap.load_from(rf);
        (snap, res)
    }

    fn part(v: Vec<u32>) -> Option<BlockArray> {
        Some(BlockArray::new(Array::from(v), 1).unwrap())
    }

    #[test]
    fn loads_and_resolves_aliases() {
        let data = vec![part(vec![7, 8]), part(vec![9]), None];
        let (snap, res) = load(Fixed { present: vec![0, 1], data }, true);
        res.unwrap();
        assert_eq!(snap.state(), LoadState::Loaded);
        assert!(snap.is_loaded());
        assert_eq!(snap.format().present, [0, 1]);
        assert_eq!(snap.block_names().collect::<Vec<_>>(), ["id"]);
        let dm = snap.get("id", "dm").unwrap().unwrap();
        assert_eq!(dm.data().as_u32(), Some(&[9][..]));
        assert!(snap.get("id", "stars").unwrap().is_none());
        assert!(matches!(snap.get("id", "bulge"), Err(SnapshotError::Ptype(PtypeError::UnknownAlias(_)))));
        assert!(matches!(snap.get("vel", "gas"), Err(SnapshotError::UnknownBlock(_))));
    }

    #[test]
    fn required_block_absent() {
        let (snap, res) = load(Fixed { present: vec![], data: vec![] }, true);
        assert!(matches!(res, Err(SnapshotError::MissingBlock(b)) if b == "id"));
        assert_eq!(snap.state(), LoadState::Failed);
        assert!(snap.header().is_none());
        assert!(snap.block("id").is_none());
    }

    #[test]
    fn optional_block_absent_is_skipped() {
        let (snap, res) = load(Fixed { present: vec![], data: vec![] }, false);
        res.unwrap();
        assert!(snap.block("id").is_none());
        assert_eq!(snap.block_names().count(), 0);
    }

    #[test]
    fn contract_violations() {
        // Too few entries.
        let (_, res) = load(Fixed { present: vec![0, 1], data: vec![part(vec![7, 8, 9])] }, true);
        assert!(matches!(res, Err(SnapshotError::Contract { .. })));
        // Array for a type the block does not cover.
        let data = vec![part(vec![7, 8]), part(vec![9]), part(vec![])];
        let (_, res) = load(Fixed { present: vec![0, 1], data }, true);
        assert!(matches!(res, Err(SnapshotError::Contract { .. })));
        // Presence outside the schema's candidates.
        let (_, res) = load(Fixed { present: vec![2], data: vec![] }, true);
        assert!(matches!(res, Err(SnapshotError::Contract { .. })));
    }

    #[test]
    fn load_only_once() {
        let data = vec![part(vec![7, 8]), part(vec![9]), None];
        let (mut snap, res) = load(Fixed { present: vec![0, 1], data }, true);
        res.unwrap();
        let rf = RecordFile::new(Cursor::new(Vec::new()), RecordConfig::default());
        assert!(matches!(snap.load_from(rf), Err(SnapshotError::State(LoadState::Loaded))));
    }

    #[test]
    fn block_before_header() {
        let mut w = SnapshotWriter::new(RecordFile::new(Vec::new(), RecordConfig::default()));
        assert!(matches!(w.write_block(&Array::from(vec![1u8])), Err(SnapshotError::HeaderNotWritten)));
    }
}
