//! High-level [`RegionFile`] API: up to 1024 chunk trees in one file.
//!
//! ```no_run
//! use nbtcask::region::{RegionFile, ChangeSet};
//! use nbtcask::chunk::{ChunkBlob, current_timestamp};
//! use nbtcask::codec::Compression;
//! use nbtcask::tag::{CompoundMap, Tag};
//!
//! let mut region = RegionFile::open_or_create("r.0.0.mca")?;
//! let slot = RegionFile::slot(3, 5)?;
//!
//! let mut level = CompoundMap::new();
//! level.put(Tag::int("xPos", 3));
//! let blob = ChunkBlob::from_tag(current_timestamp(), &Tag::compound("", level), Compression::Zlib)?;
//!
//! let mut changes = ChangeSet::new();
//! changes.put(slot, Some(blob));
//! region.write_changes(&changes)?;
//!
//! let tag = region.load_tag(slot)?.expect("just written");
//! assert_eq!(tag.name(), "chunk");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Writes
//! Every write goes through [`RegionFile::write_changes`], which rebuilds the
//! free-sector map from the index, places each new blob first-fit, rewrites
//! both header sectors and trims the file to the last used sector.  Sectors
//! of replaced or deleted chunks are simply left for reuse.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::alloc::SectorMap;
use crate::chunk::{current_timestamp, ChunkBlob, ChunkError};
use crate::codec::Compression;
use crate::index::{
    IndexEntry, IndexError, RegionIndex, HEADER_SECTORS, HEADER_SIZE, MAX_SECTOR_COUNT,
    MAX_SECTOR_OFFSET, SECTOR_SIZE, SLOT_COUNT,
};
use crate::tag::Tag;

pub use crate::index::slot_index;

/// Compression used when a caller stages a tag without naming one.
pub const DEFAULT_CHUNK_COMPRESSION: Compression = Compression::Zlib;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Region file is {len} bytes, shorter than its 8192-byte header")]
    TruncatedHeader { len: u64 },
    #[error("Chunk coordinates ({x}, {z}) outside the 32x32 region")]
    CoordinatesOutOfRange { x: i32, z: i32 },
    #[error("Slot {0} outside 0..1024")]
    SlotOutOfRange(usize),
    #[error("Chunk for slot {slot} needs {sectors} sectors, limit is 255")]
    ChunkTooLarge { slot: usize, sectors: usize },
    #[error("Region is full: sector {sector} does not fit the 24-bit offset field")]
    RegionFull { sector: usize },
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

// ── ChangeSet ────────────────────────────────────────────────────────────────

/// Pending writes: `Some` stores a blob, `None` deletes the slot.  Blobs are
/// placed in the order their slots were first staged.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<(usize, Option<ChunkBlob>)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a change, replacing any earlier one for the same slot in place.
    pub fn put(&mut self, slot: usize, blob: Option<ChunkBlob>) {
        match self.changes.iter_mut().find(|(s, _)| *s == slot) {
            Some(existing) => existing.1 = blob,
            None => self.changes.push((slot, blob)),
        }
    }

    pub fn delete(&mut self, slot: usize) {
        self.put(slot, None);
    }

    pub fn get(&self, slot: usize) -> Option<&Option<ChunkBlob>> {
        self.changes.iter().find(|(s, _)| *s == slot).map(|(_, b)| b)
    }

    pub fn contains(&self, slot: usize) -> bool {
        self.changes.iter().any(|(s, _)| *s == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<&ChunkBlob>)> {
        self.changes.iter().map(|(s, b)| (*s, b.as_ref()))
    }

    pub fn len(&self) -> usize { self.changes.len() }
    pub fn is_empty(&self) -> bool { self.changes.is_empty() }
    pub fn clear(&mut self) { self.changes.clear() }
}

impl FromIterator<(usize, Option<ChunkBlob>)> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = (usize, Option<ChunkBlob>)>>(iter: I) -> Self {
        let mut set = ChangeSet::new();
        for (slot, blob) in iter {
            set.put(slot, blob);
        }
        set
    }
}

// ── RegionFile ───────────────────────────────────────────────────────────────

pub struct RegionFile {
    path:    PathBuf,
    file:    File,
    index:   RegionIndex,
    pending: ChangeSet,
}

impl RegionFile {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open an existing region.  The file must hold at least both header
    /// sectors.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegionError> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Self::from_file(path, file, false)
    }

    /// Create a new region, truncating anything already at `path`.  Nothing
    /// is written until the first [`write_changes`](Self::write_changes).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, RegionError> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        tracing::debug!(path = %path.display(), "created region");
        Ok(Self { path, file, index: RegionIndex::new(), pending: ChangeSet::new() })
    }

    /// Open `path`, treating a missing or empty file as an empty region.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, RegionError> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;
        Self::from_file(path, file, true)
    }

    fn from_file(path: PathBuf, mut file: File, allow_empty: bool) -> Result<Self, RegionError> {
        let len = file.metadata()?.len();
        if len == 0 && allow_empty {
            return Ok(Self { path, file, index: RegionIndex::new(), pending: ChangeSet::new() });
        }
        if len < HEADER_SIZE as u64 {
            return Err(RegionError::TruncatedHeader { len });
        }

        let mut header = vec![0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let index = RegionIndex::from_bytes(&header)?;

        let file_sectors = len.div_ceil(SECTOR_SIZE as u64) as usize;
        for (slot, entry) in index.occupied() {
            if (entry.sector_offset as usize) < HEADER_SECTORS {
                tracing::warn!(slot, offset = entry.sector_offset, "index entry points into the header");
            } else if entry.sectors().end > file_sectors {
                tracing::warn!(slot, offset = entry.sector_offset, count = entry.sector_count, file_sectors, "index entry runs past end of file");
            }
        }
        tracing::debug!(path = %path.display(), chunks = index.count(), bytes = len, "opened region");
        Ok(Self { path, file, index, pending: ChangeSet::new() })
    }

    // ── Addressing ───────────────────────────────────────────────────────────

    /// Slot for in-region coordinates, each of which must be in `0..32`.
    /// Use [`slot_index`] to wrap world chunk coordinates instead.
    pub fn slot(x: i32, z: i32) -> Result<usize, RegionError> {
        if !(0..32).contains(&x) || !(0..32).contains(&z) {
            return Err(RegionError::CoordinatesOutOfRange { x, z });
        }
        Ok(slot_index(x, z))
    }

    fn check_slot(slot: usize) -> Result<(), RegionError> {
        if slot >= SLOT_COUNT {
            return Err(RegionError::SlotOutOfRange(slot));
        }
        Ok(())
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    pub fn has_chunk(&self, slot: usize) -> bool {
        self.index.get(slot).is_some_and(IndexEntry::is_present)
    }

    pub fn entry(&self, slot: usize) -> Option<IndexEntry> {
        self.index.get(slot).copied()
    }

    pub fn index(&self) -> &RegionIndex {
        &self.index
    }

    /// Raw sectors of a slot as last written.  Staged changes are not seen
    /// until flushed.
    pub fn load_chunk(&mut self, slot: usize) -> Result<Option<ChunkBlob>, RegionError> {
        Self::check_slot(slot)?;
        let entry = match self.index.get(slot) {
            Some(e) if e.is_present() => *e,
            _ => return Ok(None),
        };
        let mut data = vec![0u8; entry.byte_len()];
        self.file.seek(SeekFrom::Start(entry.byte_offset()))?;
        self.file.read_exact(&mut data)?;
        Ok(Some(ChunkBlob::from_bytes(entry.timestamp, data)?))
    }

    /// Decode the tree stored at `slot`.  The root is named `"chunk"`.
    pub fn load_tag(&mut self, slot: usize) -> Result<Option<Tag>, RegionError> {
        match self.load_chunk(slot)? {
            Some(blob) => Ok(Some(blob.read_tag()?)),
            None => Ok(None),
        }
    }

    /// Occupied slots ordered by where their data sits on disk, so a bulk
    /// reader moves through the file front to back.
    pub fn list_occupied_slots(&self) -> Vec<usize> {
        self.index.occupied_by_offset()
    }

    pub fn chunk_count(&self) -> usize {
        self.index.count()
    }

    /// Every stored blob, read in on-disk order.
    pub fn load_all(&mut self) -> Result<Vec<(usize, ChunkBlob)>, RegionError> {
        let slots = self.list_occupied_slots();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            if let Some(blob) = self.load_chunk(slot)? {
                out.push((slot, blob));
            }
        }
        Ok(out)
    }

    // ── Write ────────────────────────────────────────────────────────────────

    /// Apply `changes` to disk and to the index.  Every blob is checked
    /// before anything is written, so a rejected batch changes nothing.
    pub fn write_changes(&mut self, changes: &ChangeSet) -> Result<(), RegionError> {
        for (slot, blob) in changes.iter() {
            Self::check_slot(slot)?;
            if let Some(blob) = blob {
                blob.validate()?;
                let sectors = blob.sector_length();
                if sectors > MAX_SECTOR_COUNT {
                    return Err(RegionError::ChunkTooLarge { slot, sectors });
                }
            }
        }

        // Sectors held by slots this batch leaves alone.
        let mut map = SectorMap::with_header();
        for (slot, entry) in self.index.occupied() {
            if changes.contains(slot) {
                continue;
            }
            if map.mark(entry.sector_offset as usize, entry.sector_count as usize) {
                tracing::warn!(slot, offset = entry.sector_offset, count = entry.sector_count, "chunk overlaps sectors already in use");
            }
        }

        let mut index = self.index.clone();
        for (slot, blob) in changes.iter() {
            let blob = match blob {
                Some(b) => b,
                None => {
                    index.clear(slot);
                    tracing::debug!(slot, "deleted chunk");
                    continue;
                }
            };

            let sectors = blob.sector_length();
            let start = map.first_fit(sectors);
            if start > MAX_SECTOR_OFFSET {
                return Err(RegionError::RegionFull { sector: start });
            }

            self.file.seek(SeekFrom::Start((start * SECTOR_SIZE) as u64))?;
            self.file.write_all(&blob.data()[..sectors * SECTOR_SIZE])?;
            index.set(slot, IndexEntry::new(start as u32, sectors as u8, blob.timestamp()));
            map.mark(start, sectors);
            tracing::debug!(slot, start, sectors, "placed chunk");
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&index.to_bytes())?;

        let used = map.last_used().map_or(HEADER_SECTORS, |s| s + 1).max(HEADER_SECTORS);
        self.file.set_len((used * SECTOR_SIZE) as u64)?;
        self.file.flush()?;

        self.index = index;
        tracing::info!(
            path = %self.path.display(),
            changed = changes.len(),
            chunks = self.index.count(),
            sectors = used,
            "region written"
        );
        Ok(())
    }

    // ── Staging ──────────────────────────────────────────────────────────────

    pub fn stage(&mut self, slot: usize, blob: Option<ChunkBlob>) -> Result<(), RegionError> {
        Self::check_slot(slot)?;
        self.pending.put(slot, blob);
        Ok(())
    }

    /// Frame `tag` with the default chunk compression and the current time,
    /// then stage it.
    pub fn stage_tag(&mut self, slot: usize, tag: &Tag) -> Result<(), RegionError> {
        let blob = ChunkBlob::from_tag(current_timestamp(), tag, DEFAULT_CHUNK_COMPRESSION)?;
        self.stage(slot, Some(blob))
    }

    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    /// Write everything staged.  On error the staged set is kept.
    pub fn flush(&mut self) -> Result<(), RegionError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        match self.write_changes(&pending) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.pending = pending;
                Err(e)
            }
        }
    }

    /// Flush staged changes and release the file.
    pub fn close(mut self) -> Result<(), RegionError> {
        self.flush()
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }

    pub fn file_len(&self) -> Result<u64, RegionError> {
        Ok(self.file.metadata()?.len())
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(path = %self.path.display(), staged = self.pending.len(), "region dropped with unflushed changes");
        }
    }
}
