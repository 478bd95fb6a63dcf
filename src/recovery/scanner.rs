//! Read-only integrity scan of a region file.
//!
//! # What is checked
//!
//! Every occupied index entry is visited in on-disk order and receives a
//! `SlotHealth` verdict:
//! - `Healthy`: run lies inside the file, owns its sectors, sub-header valid
//! - `ZeroLength`: offset set but sector count zero
//! - `OverlapsHeader`: run starts inside sectors 0–1
//! - `BeyondEof`: run ends past the last sector of the file
//! - `Overlaps`: run shares sectors with a chunk that starts earlier
//! - `BadSubHeader`: length field or compression id inconsistent
//! - `Undecodable`: the tree itself fails to decode (checked only with `deep`)
//!
//! Corruption never turns into `Err`; only genuine I/O errors do.
//!
//! ## Progress
//!
//! `scan()` accepts an optional `ProgressFn` callback called after every slot
//! with `(slots_scanned, slots_total)`.

use std::path::Path;

use serde::Serialize;

use crate::index::{IndexEntry, HEADER_SECTORS, SECTOR_SIZE};
use crate::region::{ChangeSet, RegionError, RegionFile};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SlotHealth {
    Healthy,
    ZeroLength,
    OverlapsHeader,
    BeyondEof { end_sector: usize, file_sectors: usize },
    Overlaps { other: usize },
    BadSubHeader(String),
    Undecodable(String),
}

impl SlotHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, SlotHealth::Healthy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannedSlot {
    pub slot:   usize,
    pub entry:  IndexEntry,
    pub health: SlotHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanQuality {
    /// Every chunk healthy.
    Clean,
    /// At least half the chunks healthy.
    Degraded,
    /// Fewer than half the chunks healthy.
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub total_chunks:   usize,
    pub healthy_chunks: usize,
    pub damaged_chunks: usize,
    /// Sectors in the file, header included.
    pub file_sectors:   usize,
    /// Sectors past the header that no chunk claims.
    pub free_sectors:   usize,
    pub slot_log:       Vec<ScannedSlot>,
    pub quality:        ScanQuality,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.quality == ScanQuality::Clean
    }

    pub fn health_pct(&self) -> f64 {
        if self.total_chunks == 0 { return 100.0; }
        self.healthy_chunks as f64 / self.total_chunks as f64 * 100.0
    }

    pub fn damaged(&self) -> impl Iterator<Item = &ScannedSlot> {
        self.slot_log.iter().filter(|s| !s.health.is_usable())
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?}: {}/{} chunks healthy ({:.1}%), {} of {} sectors free",
            self.quality,
            self.healthy_chunks,
            self.total_chunks,
            self.health_pct(),
            self.free_sectors,
            self.file_sectors,
        )
    }
}

// ── Progress callback ────────────────────────────────────────────────────────

pub type ProgressFn<'a> = dyn FnMut(usize /*scanned*/, usize /*total*/) + 'a;

// ── Scanner ──────────────────────────────────────────────────────────────────

/// Scan every occupied slot of `region`.  With `deep`, each healthy chunk is
/// also decompressed and decoded.
pub fn scan(
    region:       &mut RegionFile,
    deep:         bool,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<ScanReport, RegionError> {
    let file_sectors = region.file_len()?.div_ceil(SECTOR_SIZE as u64) as usize;
    let slots = region.list_occupied_slots();
    let total = slots.len();

    // owner[sector] = first slot claiming it.
    let mut owner: Vec<Option<usize>> = vec![None; file_sectors];
    let mut slot_log = Vec::with_capacity(total);

    for (done, slot) in slots.into_iter().enumerate() {
        let entry = match region.entry(slot) {
            Some(e) => e,
            None => continue,
        };
        let run = entry.sectors();

        let health = if entry.sector_count == 0 {
            SlotHealth::ZeroLength
        } else if run.start < HEADER_SECTORS {
            SlotHealth::OverlapsHeader
        } else if run.end > file_sectors {
            SlotHealth::BeyondEof { end_sector: run.end, file_sectors }
        } else if let Some(other) = run.clone().find_map(|s| owner[s]) {
            SlotHealth::Overlaps { other }
        } else {
            check_contents(region, slot, deep)?
        };

        for sector in run.start.min(file_sectors)..run.end.min(file_sectors) {
            owner[sector].get_or_insert(slot);
        }
        if !health.is_usable() {
            tracing::warn!(slot, ?health, "damaged chunk");
        }
        slot_log.push(ScannedSlot { slot, entry, health });

        if let Some(cb) = progress.as_mut() {
            cb(done + 1, total);
        }
    }

    let healthy_chunks = slot_log.iter().filter(|s| s.health.is_usable()).count();
    let claimed = owner.iter().skip(HEADER_SECTORS).filter(|o| o.is_some()).count();
    let free_sectors = file_sectors.saturating_sub(HEADER_SECTORS) - claimed;

    let quality = if healthy_chunks == slot_log.len() {
        ScanQuality::Clean
    } else if healthy_chunks * 2 >= slot_log.len() {
        ScanQuality::Degraded
    } else {
        ScanQuality::Critical
    };

    Ok(ScanReport {
        total_chunks: slot_log.len(),
        healthy_chunks,
        damaged_chunks: slot_log.len() - healthy_chunks,
        file_sectors,
        free_sectors,
        slot_log,
        quality,
    })
}

fn check_contents(region: &mut RegionFile, slot: usize, deep: bool) -> Result<SlotHealth, RegionError> {
    let blob = match region.load_chunk(slot) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Ok(SlotHealth::ZeroLength),
        Err(RegionError::Chunk(e)) => return Ok(SlotHealth::BadSubHeader(e.to_string())),
        Err(e) => return Err(e),
    };
    if let Err(e) = blob.validate() {
        return Ok(SlotHealth::BadSubHeader(e.to_string()));
    }
    if deep {
        if let Err(e) = blob.read_tag() {
            return Ok(SlotHealth::Undecodable(e.to_string()));
        }
    }
    Ok(SlotHealth::Healthy)
}

/// Convenience: open `path` and scan it.
pub fn scan_file(path: &Path, deep: bool) -> Result<ScanReport, RegionError> {
    let mut region = RegionFile::open(path)?;
    scan(&mut region, deep, None)
}

/// Copy every healthy chunk of `src` into `dst`, compacted into a single
/// batch.  Returns the report from scanning `src`.
pub fn extract_recoverable(src: &mut RegionFile, dst: &mut RegionFile, deep: bool) -> Result<ScanReport, RegionError> {
    let report = scan(src, deep, None)?;

    let mut changes = ChangeSet::new();
    for scanned in report.slot_log.iter().filter(|s| s.health.is_usable()) {
        if let Some(blob) = src.load_chunk(scanned.slot)? {
            changes.put(scanned.slot, Some(blob));
        }
    }
    dst.write_changes(&changes)?;
    tracing::info!(recovered = changes.len(), damaged = report.damaged_chunks, "salvaged region");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkBlob;
    use crate::codec::Compression;
    use crate::index::slot_index;
    use crate::tag::{CompoundMap, Tag};
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::NamedTempFile;

    fn blob(n: i32) -> ChunkBlob {
        let mut map = CompoundMap::new();
        map.put(Tag::int("n", n));
        ChunkBlob::from_tag(100 + n as u32, &Tag::compound("", map), Compression::Zlib).unwrap()
    }

    fn populated(tmp: &NamedTempFile) -> RegionFile {
        let mut region = RegionFile::create(tmp.path()).unwrap();
        let set: ChangeSet = (0..4).map(|n| (slot_index(n, 0), Some(blob(n)))).collect();
        region.write_changes(&set).unwrap();
        region
    }

    #[test]
    fn clean_region() {
        let tmp = NamedTempFile::new().unwrap();
        let mut region = populated(&tmp);
        let mut calls = 0;
        let mut cb = |_: usize, _: usize| calls += 1;
        let report = scan(&mut region, true, Some(&mut cb)).unwrap();
        assert!(report.is_clean(), "{}", report.summary());
        assert_eq!(report.total_chunks, 4);
        assert_eq!(report.free_sectors, 0);
        assert_eq!(calls, 4);
    }

    #[test]
    fn corrupt_sub_header_is_reported() {
        let tmp = NamedTempFile::new().unwrap();
        drop(populated(&tmp));

        // Slot 1 sits in sector 3; smash its compression id.
        let mut f = std::fs::OpenOptions::new().write(true).open(tmp.path()).unwrap();
        f.seek(SeekFrom::Start(3 * SECTOR_SIZE as u64 + 4)).unwrap();
        f.write_all(&[9]).unwrap();
        drop(f);

        let report = scan_file(tmp.path(), false).unwrap();
        assert_eq!(report.quality, ScanQuality::Degraded);
        let bad: Vec<usize> = report.damaged().map(|s| s.slot).collect();
        assert_eq!(bad, vec![1]);
    }

    #[test]
    fn header_and_overlap_entries() {
        let tmp = NamedTempFile::new().unwrap();
        drop(populated(&tmp));

        // Point slot 5 at slot 0's sector and slot 6 into the header.
        let mut f = std::fs::OpenOptions::new().write(true).open(tmp.path()).unwrap();
        f.seek(SeekFrom::Start(5 * 4)).unwrap();
        f.write_all(&[0, 0, 2, 1]).unwrap();
        f.write_all(&[0, 0, 1, 1]).unwrap();
        drop(f);

        let report = scan_file(tmp.path(), false).unwrap();
        let health = |slot| report.slot_log.iter().find(|s| s.slot == slot).map(|s| s.health.clone());
        assert_eq!(health(6), Some(SlotHealth::OverlapsHeader));
        assert_eq!(health(5), Some(SlotHealth::Overlaps { other: 0 }));
        assert_eq!(health(0), Some(SlotHealth::Healthy));
    }

    #[test]
    fn salvage_copies_healthy_chunks() {
        let src_tmp = NamedTempFile::new().unwrap();
        let dst_tmp = NamedTempFile::new().unwrap();
        let mut src = populated(&src_tmp);
        let mut dst = RegionFile::create(dst_tmp.path()).unwrap();

        let report = extract_recoverable(&mut src, &mut dst, true).unwrap();
        assert!(report.is_clean());
        assert_eq!(dst.chunk_count(), 4);
        let tag = dst.load_tag(slot_index(2, 0)).unwrap().unwrap();
        assert_eq!(tag.as_compound().and_then(|m| m.get_int("n")), Some(2));
        assert_eq!(dst.entry(slot_index(2, 0)).unwrap().timestamp, 102);
    }
}
