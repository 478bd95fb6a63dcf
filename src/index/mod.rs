//! Region header: the location table and the timestamp table.
//!
//! ```text
//! [0, 4096)     1024 × u32 BE   (sector_offset << 8) | sector_count
//! [4096, 8192)  1024 × u32 BE   modification time, seconds since epoch
//! ```
//! Slot `i` describes the chunk at `x = i & 31`, `z = i >> 5`.  An offset of
//! zero marks an empty slot.

use std::io::{self, Read, Write};
use std::ops::Range;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use thiserror::Error;

pub const SECTOR_SIZE: usize = 4096;
pub const SLOT_COUNT: usize = 1024;
pub const HEADER_SECTORS: usize = 2;
pub const HEADER_SIZE: usize = SECTOR_SIZE * HEADER_SECTORS;
/// The count field is a single byte.
pub const MAX_SECTOR_COUNT: usize = 255;
/// The offset field is 24 bits.
pub const MAX_SECTOR_OFFSET: usize = 0x00FF_FFFF;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Region header needs 8192 bytes, found {len}")]
    TooShort { len: usize },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Slot for chunk coordinates, keeping only the low five bits of each axis.
pub fn slot_index(x: i32, z: i32) -> usize {
    ((x & 31) | ((z & 31) << 5)) as usize
}

/// Local `(x, z)` of a slot.
pub fn slot_coords(slot: usize) -> (i32, i32) {
    ((slot & 31) as i32, ((slot >> 5) & 31) as i32)
}

// ── IndexEntry ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexEntry {
    pub sector_offset: u32,
    pub sector_count:  u8,
    pub timestamp:     u32,
}

impl IndexEntry {
    pub const EMPTY: IndexEntry = IndexEntry { sector_offset: 0, sector_count: 0, timestamp: 0 };

    pub fn new(sector_offset: u32, sector_count: u8, timestamp: u32) -> Self {
        Self { sector_offset, sector_count, timestamp }
    }

    fn from_words(location: u32, timestamp: u32) -> Self {
        Self {
            sector_offset: location >> 8,
            sector_count:  (location & 0xff) as u8,
            timestamp,
        }
    }

    /// Packed `(offset << 8) | count` word.
    pub fn location(&self) -> u32 {
        (self.sector_offset << 8) | self.sector_count as u32
    }

    pub fn is_present(&self) -> bool {
        self.sector_offset != 0
    }

    pub fn byte_offset(&self) -> u64 {
        self.sector_offset as u64 * SECTOR_SIZE as u64
    }

    pub fn byte_len(&self) -> usize {
        self.sector_count as usize * SECTOR_SIZE
    }

    pub fn sectors(&self) -> Range<usize> {
        let start = self.sector_offset as usize;
        start..start + self.sector_count as usize
    }
}

// ── RegionIndex ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionIndex {
    entries: Vec<IndexEntry>,
}

impl Default for RegionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionIndex {
    pub fn new() -> Self {
        Self { entries: vec![IndexEntry::EMPTY; SLOT_COUNT] }
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, IndexError> {
        let mut locations = [0u32; SLOT_COUNT];
        reader.read_u32_into::<BigEndian>(&mut locations)?;
        let mut timestamps = [0u32; SLOT_COUNT];
        reader.read_u32_into::<BigEndian>(&mut timestamps)?;

        let entries = locations
            .iter()
            .zip(timestamps.iter())
            .map(|(loc, ts)| IndexEntry::from_words(*loc, *ts))
            .collect();
        Ok(Self { entries })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        if bytes.len() < HEADER_SIZE {
            return Err(IndexError::TooShort { len: bytes.len() });
        }
        Self::read(&bytes[..HEADER_SIZE])
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for entry in &self.entries {
            writer.write_u32::<BigEndian>(entry.location())?;
        }
        for entry in &self.entries {
            writer.write_u32::<BigEndian>(entry.timestamp)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE);
        for entry in &self.entries {
            out.extend_from_slice(&entry.location().to_be_bytes());
        }
        for entry in &self.entries {
            out.extend_from_slice(&entry.timestamp.to_be_bytes());
        }
        out
    }

    /// `None` for slots outside `0..1024`.
    pub fn get(&self, slot: usize) -> Option<&IndexEntry> {
        self.entries.get(slot)
    }

    pub fn set(&mut self, slot: usize, entry: IndexEntry) {
        self.entries[slot] = entry;
    }

    pub fn clear(&mut self, slot: usize) {
        self.entries[slot] = IndexEntry::EMPTY;
    }

    /// `(slot, entry)` for every present slot, in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &IndexEntry)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.is_present())
    }

    /// Present slots ordered by where their data starts on disk.
    pub fn occupied_by_offset(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self.occupied().map(|(slot, _)| slot).collect();
        slots.sort_by_key(|slot| (self.entries[*slot].sector_offset, *slot));
        slots
    }

    pub fn count(&self) -> usize {
        self.occupied().count()
    }
}
