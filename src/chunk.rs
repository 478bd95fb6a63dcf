//! Chunk blobs: one compressed tag tree as it sits in a region file.
//!
//! ```text
//! [real_length + 1 : u32 BE][compression id : u8][real_length bytes][zero pad]
//! ```
//! The buffer is always a whole number of sectors.  The length field counts
//! the compression id byte, hence the `+ 1`.

use std::io::{Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder as _, WriteBytesExt};
use thiserror::Error;

use crate::codec::{CodecError, Compression};
use crate::index::SECTOR_SIZE;
use crate::io_stream::{NbtError, NbtOptions, NbtReader, NbtWriter};
use crate::tag::{Tag, TagType};

/// Length field plus compression id.
pub const CHUNK_HEADER_LEN: usize = 5;

/// Root name given to every tree read back out of a region.
pub const CHUNK_ROOT_NAME: &str = "chunk";

/// Palette fields per chunk section (16×16×16).
pub const SECTION_VOLUME: usize = 4096;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Chunk buffer of {len} bytes is not a positive multiple of 4096")]
    Misaligned { len: usize },
    #[error("Chunk header claims {real_length} payload bytes but only {capacity} fit")]
    BadLength { real_length: usize, capacity: usize },
    #[error("Unknown chunk compression id {0}")]
    UnknownCompression(u8),
    #[error("Chunk root must be a compound, found {0}")]
    NotCompound(TagType),
    #[error(transparent)]
    Nbt(#[from] NbtError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone)]
pub struct ChunkBlob {
    timestamp: u32,
    data:      Arc<[u8]>,
}

impl ChunkBlob {
    /// Wrap raw sectors read from disk.  Only alignment is checked here;
    /// call [`validate`](Self::validate) before trusting the sub-header.
    pub fn from_bytes(timestamp: u32, data: Vec<u8>) -> Result<Self, ChunkError> {
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            return Err(ChunkError::Misaligned { len: data.len() });
        }
        Ok(Self { timestamp, data: data.into() })
    }

    /// Encode and compress `tag`, then frame it into whole sectors.
    pub fn from_tag(timestamp: u32, tag: &Tag, compression: Compression) -> Result<Self, ChunkError> {
        if tag.tag_type() != TagType::Compound {
            return Err(ChunkError::NotCompound(tag.tag_type()));
        }
        let mut writer = NbtWriter::new(Vec::new(), NbtOptions::new(compression));
        writer.write_tag(tag)?;
        let payload = writer.finish().map_err(NbtError::from)?;

        let capacity = sectors_for(payload.len()) * SECTOR_SIZE;
        let mut data = Vec::with_capacity(capacity);
        data.write_u32::<BigEndian>(payload.len() as u32 + 1).map_err(NbtError::from)?;
        data.write_u8(compression.id()).map_err(NbtError::from)?;
        data.write_all(&payload).map_err(NbtError::from)?;
        data.resize(capacity, 0);

        tracing::trace!(bytes = payload.len(), sectors = capacity / SECTOR_SIZE, %compression, "framed chunk");
        Ok(Self { timestamp, data: data.into() })
    }

    /// Same bytes, different timestamp.  The buffer is shared.
    pub fn with_timestamp(&self, timestamp: u32) -> Self {
        Self { timestamp, data: Arc::clone(&self.data) }
    }

    pub fn timestamp(&self) -> u32 { self.timestamp }
    pub fn data(&self) -> &[u8] { &self.data }

    fn length_field(&self) -> u32 {
        BigEndian::read_u32(&self.data[..4])
    }

    /// Compressed payload length, excluding the 5-byte sub-header.
    pub fn real_length(&self) -> usize {
        self.length_field().saturating_sub(1) as usize
    }

    pub fn compression_id(&self) -> u8 {
        self.data[4]
    }

    pub fn compression(&self) -> Result<Compression, ChunkError> {
        let id = self.compression_id();
        Compression::from_id(id).ok_or(ChunkError::UnknownCompression(id))
    }

    /// Sectors actually needed, which may be fewer than the buffer holds.
    pub fn sector_length(&self) -> usize {
        sectors_for(self.real_length())
    }

    /// Check the sub-header against the buffer.
    pub fn validate(&self) -> Result<(), ChunkError> {
        let capacity = self.data.len() - CHUNK_HEADER_LEN;
        if self.length_field() == 0 || self.real_length() > capacity {
            return Err(ChunkError::BadLength { real_length: self.real_length(), capacity });
        }
        self.compression()?;
        Ok(())
    }

    /// The compressed payload without header or padding.
    pub fn payload(&self) -> Result<&[u8], ChunkError> {
        self.validate()?;
        Ok(&self.data[CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + self.real_length()])
    }

    /// Decompress and decode the stored tree.  The root comes back named
    /// `"chunk"` whatever name it was written under.
    pub fn read_tag(&self) -> Result<Tag, ChunkError> {
        let compression = self.compression()?;
        let payload = self.payload()?;
        let tag = NbtReader::new(payload, NbtOptions::new(compression)).read_tag()?;
        if tag.tag_type() != TagType::Compound {
            return Err(ChunkError::NotCompound(tag.tag_type()));
        }
        Ok(tag.renamed(CHUNK_ROOT_NAME))
    }

    /// Raw decompressed tag stream, for inspection tools.
    pub fn decompressed(&self) -> Result<Vec<u8>, ChunkError> {
        let compression = self.compression()?;
        let mut out = Vec::new();
        crate::codec::Decompressor::new(self.payload()?, compression)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

fn sectors_for(real_length: usize) -> usize {
    (real_length + CHUNK_HEADER_LEN).div_ceil(SECTOR_SIZE)
}

/// Seconds since the Unix epoch, saturated into the index's u32 field.
pub fn current_timestamp() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

// ── Palette bit packing ──────────────────────────────────────────────────────
//
// Field `i` occupies bits [bits*i, bits*i + bits) of the little-endian
// bitstring formed by `words`, and may straddle two words.

/// Field width implied by a section's backing array length.
pub fn bits_per_index(words: &[u64]) -> usize {
    words.len() * 64 / SECTION_VOLUME
}

/// Read field `index`.  Words past the end of `words` read as zero.
pub fn extract_palette_index(words: &[u64], index: usize, bits: usize) -> u64 {
    if bits == 0 {
        return 0;
    }
    let bits = bits.min(64);
    let mask = field_mask(bits);
    let word = |i: usize| words.get(i).copied().unwrap_or(0);

    let start_bit   = bits * index;
    let start_word  = start_bit >> 6;
    let start_shift = start_bit & 63;
    let end_word    = (start_bit + bits - 1) >> 6;

    if start_word == end_word {
        (word(start_word) >> start_shift) & mask
    } else {
        let low = word(start_word) >> start_shift;
        let high = word(end_word) << (64 - start_shift);
        (low | high) & mask
    }
}

/// Inverse of [`extract_palette_index`]: pack `indices` densely at `bits`
/// per field.  Values are truncated to the field width.
pub fn pack_palette_indices(indices: &[u64], bits: usize) -> Vec<u64> {
    if bits == 0 {
        return Vec::new();
    }
    let bits = bits.min(64);
    let mask = field_mask(bits);
    let mut words = vec![0u64; (indices.len() * bits).div_ceil(64)];

    for (i, &value) in indices.iter().enumerate() {
        let value = value & mask;
        let start_bit   = bits * i;
        let start_word  = start_bit >> 6;
        let start_shift = start_bit & 63;
        words[start_word] |= value << start_shift;
        if start_shift + bits > 64 {
            words[start_word + 1] |= value >> (64 - start_shift);
        }
    }
    words
}

fn field_mask(bits: usize) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::CompoundMap;
    use proptest::prelude::*;

    fn level() -> Tag {
        let mut map = CompoundMap::new();
        map.put(Tag::int("xPos", 3));
        map.put(Tag::int("zPos", 5));
        map.put(Tag::new("Heights", vec![64i32; 256]));
        Tag::compound("Level", map)
    }

    #[test]
    fn framing_layout() {
        let blob = ChunkBlob::from_tag(77, &level(), Compression::Zlib).unwrap();
        assert_eq!(blob.data().len() % SECTOR_SIZE, 0);
        assert_eq!(blob.compression_id(), 2);
        assert_eq!(blob.sector_length(), blob.data().len() / SECTOR_SIZE);
        let field = u32::from_be_bytes(blob.data()[..4].try_into().unwrap()) as usize;
        assert_eq!(field, blob.real_length() + 1);
        assert!(blob.data()[CHUNK_HEADER_LEN + blob.real_length()..].iter().all(|b| *b == 0));
        blob.validate().unwrap();
    }

    #[test]
    fn read_tag_renames_root() {
        for c in [Compression::Gzip, Compression::Zlib, Compression::None] {
            let blob = ChunkBlob::from_tag(1, &level(), c).unwrap();
            let tag = blob.read_tag().unwrap();
            assert_eq!(tag.name(), "chunk");
            assert_eq!(tag.as_compound(), level().as_compound());
        }
    }

    #[test]
    fn decompressed_stream_decodes_uncompressed() {
        for c in [Compression::Gzip, Compression::Zlib, Compression::None] {
            let blob = ChunkBlob::from_tag(1, &level(), c).unwrap();
            let raw = blob.decompressed().unwrap();
            let tag = crate::io_stream::from_bytes(&raw, crate::io_stream::NbtOptions::uncompressed()).unwrap();
            assert_eq!(tag.as_compound(), level().as_compound());
        }
    }

    #[test]
    fn sector_length_boundaries() {
        let mut data = vec![0u8; SECTOR_SIZE * 2];
        // 4091 + 5 fills one sector exactly.
        data[..4].copy_from_slice(&4092u32.to_be_bytes());
        data[4] = 2;
        let blob = ChunkBlob::from_bytes(0, data.clone()).unwrap();
        assert_eq!(blob.real_length(), 4091);
        assert_eq!(blob.sector_length(), 1);

        data[..4].copy_from_slice(&4093u32.to_be_bytes());
        let blob = ChunkBlob::from_bytes(0, data).unwrap();
        assert_eq!(blob.sector_length(), 2);
    }

    #[test]
    fn retimestamp_shares_bytes() {
        let blob = ChunkBlob::from_tag(1, &level(), Compression::Zlib).unwrap();
        let later = blob.with_timestamp(99);
        assert_eq!(later.timestamp(), 99);
        assert_eq!(blob.timestamp(), 1);
        assert!(std::ptr::eq(blob.data().as_ptr(), later.data().as_ptr()));
    }

    #[test]
    fn bad_buffers_are_rejected() {
        assert!(matches!(ChunkBlob::from_bytes(0, vec![0; 100]), Err(ChunkError::Misaligned { len: 100 })));
        assert!(matches!(ChunkBlob::from_bytes(0, Vec::new()), Err(ChunkError::Misaligned { len: 0 })));

        let mut data = vec![0u8; SECTOR_SIZE];
        data[..4].copy_from_slice(&5000u32.to_be_bytes());
        data[4] = 2;
        let blob = ChunkBlob::from_bytes(0, data.clone()).unwrap();
        assert!(matches!(blob.validate(), Err(ChunkError::BadLength { real_length: 4999, capacity: 4091 })));

        data[..4].copy_from_slice(&10u32.to_be_bytes());
        data[4] = 7;
        let blob = ChunkBlob::from_bytes(0, data).unwrap();
        assert!(matches!(blob.read_tag(), Err(ChunkError::UnknownCompression(7))));
    }

    #[test]
    fn non_compound_root_is_refused() {
        let err = ChunkBlob::from_tag(0, &Tag::int("x", 1), Compression::Zlib).unwrap_err();
        assert!(matches!(err, ChunkError::NotCompound(TagType::Int)));
    }

    #[test]
    fn width_from_array_length() {
        assert_eq!(bits_per_index(&[0; 256]), 4);
        assert_eq!(bits_per_index(&[0; 320]), 5);
        assert_eq!(bits_per_index(&[0; 4096]), 64);
    }

    #[test]
    fn full_width_fields() {
        let words = [u64::MAX, 1, 0x8000_0000_0000_0000];
        assert_eq!(extract_palette_index(&words, 0, 64), u64::MAX);
        assert_eq!(extract_palette_index(&words, 1, 64), 1);
        assert_eq!(extract_palette_index(&words, 2, 64), 1 << 63);
    }

    fn reference(words: &[u64], index: usize, bits: usize) -> u64 {
        let bit = |k: usize| (words[k >> 6] >> (k & 63)) & 1;
        (0..bits).fold(0u64, |acc, j| acc | (bit(bits * index + j) << j))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn extraction_matches_bitstring(
            bits in prop::sample::select(vec![1usize, 2, 4, 5, 6, 8, 12, 16, 32, 64]),
            seed in prop::collection::vec(any::<u64>(), 64),
        ) {
            let len = (SECTION_VOLUME * bits).div_ceil(64);
            let words: Vec<u64> = (0..len).map(|i| seed[i % seed.len()].rotate_left(i as u32)).collect();
            for index in 0..SECTION_VOLUME {
                prop_assert_eq!(extract_palette_index(&words, index, bits), reference(&words, index, bits));
            }
        }

        #[test]
        fn pack_inverts_extract(
            bits in prop::sample::select(vec![1usize, 2, 4, 5, 6, 8, 12, 16, 32, 64]),
            values in prop::collection::vec(any::<u64>(), 1..300),
        ) {
            let words = pack_palette_indices(&values, bits);
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(extract_palette_index(&words, i, bits), v & field_mask(bits));
            }
        }
    }
}
