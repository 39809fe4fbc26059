pub mod dtype;
pub mod record;
pub mod header;
pub mod ptype;
pub mod schema;
pub mod config;
pub mod snapshot;
pub mod layout;
pub mod perf;

pub use dtype::{Array, BlockArray, Dtype, Endian};
pub use record::{ControlWord, Mode, RecordConfig, RecordError, RecordFile};
pub use header::{Header, HeaderField, HeaderSchema};
pub use ptype::ParticleTypes;
pub use schema::{BlockSchema, BlockSpec};
pub use config::SnapshotConfig;
pub use snapshot::{LoadContext, LoadState, Snapshot, SnapshotError, SnapshotFormat, SnapshotWriter};
pub use layout::CountsLayout;
