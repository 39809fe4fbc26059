//! Loading many snapshots.
//!
//! Each [`Snapshot`] owns its own stream and nothing is shared between them,
//! so independent snapshots can load concurrently.  With the `parallel`
//! feature this uses Rayon; without it the snapshots load one after another.
//! A single snapshot is never loaded from more than one thread.

use crate::snapshot::{Snapshot, SnapshotError, SnapshotFormat};

/// Load every snapshot, returning one result per snapshot in input order.
/// A failure in one snapshot does not stop the others.
pub fn load_all<F>(snapshots: &mut [Snapshot<F>]) -> Vec<Result<(), SnapshotError>>
where
    F: SnapshotFormat + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        snapshots.par_iter_mut().map(Snapshot::load).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        snapshots.iter_mut().map(Snapshot::load).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SnapshotConfig;
    use crate::dtype::{Array, Dtype};
    use crate::header::{Header, HeaderField, HeaderSchema};
    use crate::layout::CountsLayout;
    use crate::record::RecordConfig;
    use crate::schema::{BlockSchema, BlockSpec};
    use crate::snapshot::SnapshotWriter;

    fn config() -> SnapshotConfig {
        let header = HeaderSchema::new(vec![HeaderField::new("npart", Dtype::I4, 2)]).unwrap();
        let blocks = BlockSchema::new(vec![BlockSpec::new("id", Dtype::U8, 1, vec![0, 1], true)]).unwrap();
        SnapshotConfig::new(header, blocks, "npart")
    }

    #[test]
    fn loads_each_independently() {
        let dir = tempfile::tempdir().unwrap();
        let mut snaps = Vec::new();
        for i in 0..4u64 {
            let path = dir.path().join(format!("snap_{i:03}"));
            let mut hdr = Header::zeroed(&config().header);
            hdr.set("npart", Array::from(vec![i as i32, 1])).unwrap();
            let mut w = SnapshotWriter::create(&path, RecordConfig::default()).unwrap();
            w.write_header(&hdr).unwrap();
            w.write_block(&Array::from((0..=i).collect::<Vec<u64>>())).unwrap();
            w.finish().unwrap();
            snaps.push(Snapshot::new(path, config(), CountsLayout));
        }
        snaps.push(Snapshot::new(dir.path().join("missing"), config(), CountsLayout));

        let results = load_all(&mut snaps);
        assert_eq!(results.len(), 5);
        for (i, snap) in snaps.iter().take(4).enumerate() {
            assert!(results[i].is_ok(), "snapshot {i}: {:?}", results[i]);
            assert_eq!(snap.ptypes().unwrap().total(), Some(i as u64 + 1));
        }
        assert!(matches!(results[4], Err(SnapshotError::Io(_))));
    }
}
