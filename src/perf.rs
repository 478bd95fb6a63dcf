//! Bulk chunk work: decode or frame many chunk blobs at once.
//!
//! # Parallelism
//!
//! Each chunk is compressed independently, so decoding a whole region is
//! embarrassingly parallel.  With the `parallel` feature the functions here
//! fan out over Rayon's global pool; without it they run sequentially and
//! return the same results.  Output order always matches input order.
//!
//! Disk reads stay on the caller's thread: [`read_region_tags`] pulls the
//! sectors in on-disk order first, then decodes.

use crate::chunk::{ChunkBlob, ChunkError};
use crate::codec::Compression;
use crate::region::{RegionError, RegionFile};
use crate::tag::Tag;

// ── Decode ───────────────────────────────────────────────────────────────────

/// Decode every blob.  A failing chunk yields its own `Err` without
/// affecting the others.
pub fn read_tags(blobs: &[ChunkBlob]) -> Vec<Result<Tag, ChunkError>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        blobs.par_iter().map(ChunkBlob::read_tag).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        blobs.iter().map(ChunkBlob::read_tag).collect()
    }
}

/// Load and decode every chunk of `region`, paired with its slot.
pub fn read_region_tags(region: &mut RegionFile) -> Result<Vec<(usize, Result<Tag, ChunkError>)>, RegionError> {
    let (slots, blobs): (Vec<usize>, Vec<ChunkBlob>) = region.load_all()?.into_iter().unzip();
    let tags = read_tags(&blobs);
    tracing::debug!(chunks = slots.len(), "decoded region");
    Ok(slots.into_iter().zip(tags).collect())
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Frame `(timestamp, tag)` pairs into blobs.  The first error aborts.
pub fn encode_tags(tags: &[(u32, Tag)], compression: Compression) -> Result<Vec<ChunkBlob>, ChunkError> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        tags.par_iter()
            .map(|(ts, tag)| ChunkBlob::from_tag(*ts, tag, compression))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        tags.iter()
            .map(|(ts, tag)| ChunkBlob::from_tag(*ts, tag, compression))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ChangeSet;
    use crate::tag::CompoundMap;

    fn level(n: i32) -> Tag {
        let mut map = CompoundMap::new();
        map.put(Tag::int("n", n));
        map.put(Tag::new("blocks", vec![n as i8; 512]));
        Tag::compound("", map)
    }

    #[test]
    fn order_is_preserved() {
        let input: Vec<(u32, Tag)> = (0..32).map(|n| (n as u32, level(n))).collect();
        let blobs = encode_tags(&input, Compression::Gzip).unwrap();
        assert_eq!(blobs.len(), 32);
        for (n, (blob, tag)) in blobs.iter().zip(read_tags(&blobs)).enumerate() {
            assert_eq!(blob.timestamp(), n as u32);
            assert_eq!(tag.unwrap().as_compound().and_then(|m| m.get_int("n")), Some(n as i32));
        }
    }

    #[test]
    fn bad_chunk_fails_alone() {
        let good = ChunkBlob::from_tag(0, &level(1), Compression::Zlib).unwrap();
        let mut raw = good.data().to_vec();
        raw[4] = 42;
        let bad = ChunkBlob::from_bytes(0, raw).unwrap();

        let results = read_tags(&[good.clone(), bad, good]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ChunkError::UnknownCompression(42))));
        assert!(results[2].is_ok());
    }

    #[test]
    fn whole_region_in_disk_order() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut region = RegionFile::create(tmp.path()).unwrap();
        let set: ChangeSet = [900usize, 3, 500]
            .iter()
            .enumerate()
            .map(|(i, slot)| (*slot, Some(ChunkBlob::from_tag(0, &level(i as i32), Compression::Zlib).unwrap())))
            .collect();
        region.write_changes(&set).unwrap();

        let decoded = read_region_tags(&mut region).unwrap();
        let slots: Vec<usize> = decoded.iter().map(|(s, _)| *s).collect();
        assert_eq!(slots, vec![900, 3, 500]);
        assert!(decoded.iter().all(|(_, t)| t.is_ok()));
    }
}
