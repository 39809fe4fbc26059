//! Block layout driven by header particle counts.
//!
//! [`CountsLayout`] is the usual layout of sequential snapshot files: a block
//! covers every candidate type whose header count is non-zero, and its record
//! stores those types back to back in index order, `count × ndims` elements
//! each.

use crate::dtype::{Array, BlockArray};
use crate::schema::BlockSpec;
use crate::snapshot::{BlockData, LoadContext, SnapshotError, SnapshotFormat};

#[derive(Debug, Clone, Copy, Default)]
pub struct CountsLayout;

impl CountsLayout {
    /// Elements the record of `spec` must hold for `present` types.
    /// `None` if the header counts do not fit in memory.
    pub fn expected_len(ctx: &LoadContext<'_>, spec: &BlockSpec, present: &[usize]) -> Option<usize> {
        present.iter().try_fold(0usize, |acc, &p| acc.checked_add(Self::part_len(ctx, spec, p)?))
    }

    fn part_len(ctx: &LoadContext<'_>, spec: &BlockSpec, ptype: usize) -> Option<usize> {
        let count = usize::try_from(ctx.ptypes.count(ptype)?).ok()?;
        count.checked_mul(spec.ndims)
    }
}

fn parse_error(spec: &BlockSpec, reason: String) -> SnapshotError {
    SnapshotError::Parse { block: spec.name.clone(), reason }
}

impl SnapshotFormat for CountsLayout {
    fn block_exists(
        &self,
        ctx:        &LoadContext<'_>,
        _spec:      &BlockSpec,
        candidates: &[usize],
    ) -> Result<Vec<usize>, SnapshotError> {
        Ok(candidates.iter()
            .copied()
            .filter(|&p| ctx.ptypes.count(p).unwrap_or(0) > 0)
            .collect())
    }

    fn parse_block(
        &self,
        ctx:     &LoadContext<'_>,
        raw:     Array,
        spec:    &BlockSpec,
        present: &[usize],
    ) -> Result<BlockData, SnapshotError> {
        let expected = Self::expected_len(ctx, spec, present)
            .ok_or_else(|| parse_error(spec, "header particle counts overflow".to_owned()))?;
        if raw.len() != expected {
            return Err(parse_error(
                spec,
                format!("record holds {} elements, header counts require {expected}", raw.len()),
            ));
        }

        let mut offset = 0usize;
        let mut out = Vec::with_capacity(ctx.ptypes.len());
        for ptype in ctx.ptypes.indices() {
            if !present.contains(&ptype) {
                out.push(None);
                continue;
            }
            let part = Self::part_len(ctx, spec, ptype)
                .and_then(|n| raw.slice(offset..offset.checked_add(n)?))
                .ok_or_else(|| parse_error(spec, format!("particle type {ptype} runs past the end of the record")))?;
            let n = part.len();
            offset += n;
            out.push(Some(BlockArray::new(part, spec.ndims)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;
    use crate::header::{Header, HeaderField, HeaderSchema};
    use crate::ptype::ParticleTypes;
    use std::collections::HashMap;

    fn fixture() -> (Header, ParticleTypes) {
        let schema = HeaderSchema::new(vec![HeaderField::new("npart", Dtype::U4, 4)]).unwrap();
        let mut hdr = Header::zeroed(&schema);
        hdr.set("npart", Array::from(vec![2u32, 0, 1, 3])).unwrap();
        let pt = ParticleTypes::from_header(&hdr, "npart", &HashMap::new()).unwrap();
        (hdr, pt)
    }

    #[test]
    fn skips_empty_types() {
        let (hdr, pt) = fixture();
        let ctx = LoadContext { header: &hdr, ptypes: &pt };
        let spec = BlockSpec::new("pos", Dtype::F4, 3, vec![0, 1, 2], true);
        assert_eq!(CountsLayout.block_exists(&ctx, &spec, &spec.ptypes).unwrap(), vec![0, 2]);
    }

    #[test]
    fn splits_by_counts() {
        let (hdr, pt) = fixture();
        let ctx = LoadContext { header: &hdr, ptypes: &pt };
        let spec = BlockSpec::new("pos", Dtype::F4, 3, vec![0, 1, 2], true);
        let raw = Array::from((0..9).map(|x| x as f32).collect::<Vec<_>>());
        let data = CountsLayout.parse_block(&ctx, raw, &spec, &[0, 2]).unwrap();

        assert_eq!(data.len(), 4);
        let gas = data[0].as_ref().unwrap();
        assert_eq!(gas.shape(), vec![2, 3]);
        assert_eq!(gas.data().as_f32(), Some(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0][..]));
        assert!(data[1].is_none());
        assert_eq!(data[2].as_ref().unwrap().data().as_f32(), Some(&[6.0, 7.0, 8.0][..]));
        assert!(data[3].is_none());
    }

    #[test]
    fn rejects_wrong_record_length() {
        let (hdr, pt) = fixture();
        let ctx = LoadContext { header: &hdr, ptypes: &pt };
        let spec = BlockSpec::new("mass", Dtype::F8, 1, vec![3], false);
        let err = CountsLayout.parse_block(&ctx, Array::zeros(Dtype::F8, 2), &spec, &[3]).unwrap_err();
        assert!(matches!(err, SnapshotError::Parse { block, .. } if block == "mass"));
    }

    #[test]
    fn overflowing_counts_are_a_parse_error() {
        let schema = HeaderSchema::new(vec![HeaderField::new("npart", Dtype::U8, 2)]).unwrap();
        let spec = BlockSpec::new("pos", Dtype::F4, 2, vec![0, 1], true);
        for counts in [vec![1u64 << 63, 1], vec![u64::MAX, 1]] {
            let mut hdr = Header::zeroed(&schema);
            hdr.set("npart", Array::from(counts)).unwrap();
            let pt = ParticleTypes::from_header(&hdr, "npart", &HashMap::new()).unwrap();
            let ctx = LoadContext { header: &hdr, ptypes: &pt };

            assert_eq!(CountsLayout::expected_len(&ctx, &spec, &[0, 1]), None);
            let err = CountsLayout.parse_block(&ctx, Array::zeros(Dtype::F4, 2), &spec, &[0, 1]).unwrap_err();
            assert!(matches!(err, SnapshotError::Parse { block, .. } if block == "pos"));
        }
    }
}
