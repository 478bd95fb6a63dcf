use nbtcask::chunk::ChunkBlob;
use nbtcask::codec::Compression;
use nbtcask::index::{HEADER_SIZE, SECTOR_SIZE};
use nbtcask::io_stream::{self, ByteOrder, NbtOptions};
use nbtcask::region::{ChangeSet, RegionError, RegionFile};
use nbtcask::tag::{CompoundMap, ListTag, Tag, TagType};
use nbtcask::slot_index;
use proptest::prelude::*;
use std::collections::HashMap;
use std::io::Write;
use tempfile::NamedTempFile;

fn level(x: i32, z: i32, filler: usize) -> Tag {
    let mut sections = ListTag::new(TagType::Compound);
    let mut section = CompoundMap::new();
    section.put(Tag::byte("Y", 4));
    section.put(Tag::new("BlockStates", vec![0x1111_2222_3333_4444i64; 256]));
    sections.push(section).unwrap();

    let mut map = CompoundMap::new();
    map.put(Tag::int("xPos", x));
    map.put(Tag::int("zPos", z));
    map.put(Tag::list("Sections", sections));
    map.put(Tag::new("Filler", (0..filler).map(|i| (i * 31 % 251) as i8).collect::<Vec<i8>>()));
    Tag::compound("Level", map)
}

/// A blob whose uncompressed payload spans exactly `sectors` sectors.
fn blob_of_sectors(sectors: usize, ts: u32) -> ChunkBlob {
    let mut data = vec![0u8; sectors * SECTOR_SIZE];
    let real = sectors * SECTOR_SIZE - 5;
    data[..4].copy_from_slice(&(real as u32 + 1).to_be_bytes());
    data[4] = Compression::None.id();
    ChunkBlob::from_bytes(ts, data).unwrap()
}

#[test]
fn test_empty_region_is_two_sectors() {
    let tmp = NamedTempFile::new().unwrap();
    let mut region = RegionFile::create(tmp.path()).unwrap();
    region.write_changes(&ChangeSet::new()).unwrap();
    assert_eq!(std::fs::metadata(tmp.path()).unwrap().len(), HEADER_SIZE as u64);
    assert_eq!(region.chunk_count(), 0);
}

#[test]
fn test_chunk_survives_reopen() {
    let tmp = NamedTempFile::new().unwrap();
    let slot = RegionFile::slot(3, 5).unwrap();
    let written = level(3, 5, 16);
    let ts = 1_600_000_000;

    {
        let mut region = RegionFile::create(tmp.path()).unwrap();
        let blob = ChunkBlob::from_tag(ts, &written, Compression::Zlib).unwrap();
        assert_eq!(blob.sector_length(), 1);
        let mut changes = ChangeSet::new();
        changes.put(slot, Some(blob));
        region.write_changes(&changes).unwrap();
    }

    let mut region = RegionFile::open(tmp.path()).unwrap();
    assert!(region.has_chunk(slot));
    let blob = region.load_chunk(slot).unwrap().unwrap();
    assert_eq!(blob.timestamp(), ts);
    let tag = blob.read_tag().unwrap();
    assert_eq!(tag.name(), "chunk");
    assert_eq!(tag.as_compound(), written.as_compound());
    assert!(region.load_chunk(slot_index(4, 5)).unwrap().is_none());
}

#[test]
fn test_open_rejects_missing_and_short_files() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("r.0.0.mca");
    match RegionFile::open(&missing) {
        Err(RegionError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("unexpected {:?}", other.err()),
    }

    let mut short = NamedTempFile::new().unwrap();
    short.write_all(&[0u8; 5000]).unwrap();
    assert!(matches!(RegionFile::open(short.path()), Err(RegionError::TruncatedHeader { len: 5000 })));
}

#[test]
fn test_open_or_create_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("r.1.-1.mca");
    let mut region = RegionFile::open_or_create(&path).unwrap();
    assert_eq!(region.chunk_count(), 0);
    region.stage_tag(slot_index(-1, -1), &level(-1, -1, 0)).unwrap();
    region.close().unwrap();

    let mut region = RegionFile::open_or_create(&path).unwrap();
    assert_eq!(region.list_occupied_slots(), vec![1023]);
    let tag = region.load_tag(1023).unwrap().unwrap();
    assert_eq!(tag.as_compound().and_then(|m| m.get_int("xPos")), Some(-1));
}

#[test]
fn test_oversized_chunk_leaves_region_untouched() {
    let tmp = NamedTempFile::new().unwrap();
    let mut region = RegionFile::create(tmp.path()).unwrap();
    let mut first = ChangeSet::new();
    first.put(0, Some(blob_of_sectors(2, 1)));
    region.write_changes(&first).unwrap();
    let before = std::fs::read(tmp.path()).unwrap();

    let mut batch = ChangeSet::new();
    batch.put(1, Some(blob_of_sectors(3, 2)));
    batch.put(0, None);
    batch.put(2, Some(blob_of_sectors(256, 3)));
    match region.write_changes(&batch) {
        Err(RegionError::ChunkTooLarge { slot: 2, sectors: 256 }) => {}
        other => panic!("unexpected {other:?}"),
    }

    assert_eq!(std::fs::read(tmp.path()).unwrap(), before);
    assert!(region.has_chunk(0));
    assert!(!region.has_chunk(1));
}

#[test]
fn test_max_size_chunk_fits() {
    let tmp = NamedTempFile::new().unwrap();
    let mut region = RegionFile::create(tmp.path()).unwrap();
    let mut set = ChangeSet::new();
    set.put(9, Some(blob_of_sectors(255, 7)));
    region.write_changes(&set).unwrap();
    assert_eq!(region.entry(9).unwrap().sector_count, 255);
    assert_eq!(region.file_len().unwrap(), (257 * SECTOR_SIZE) as u64);
}

#[test]
fn test_tag_file_little_endian_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("level.dat");
    let opts = NbtOptions::new(Compression::None).with_byte_order(ByteOrder::LittleEndian);
    io_stream::write_file(&path, &level(0, 0, 3), opts).unwrap();
    assert_eq!(io_stream::read_file(&path, opts).unwrap(), level(0, 0, 3));
    // Reading with the wrong byte order does not silently succeed.
    assert_ne!(
        io_stream::read_file(&path, NbtOptions::new(Compression::None)).ok(),
        Some(level(0, 0, 3))
    );
}

// ── Allocator properties ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Op {
    Write { slot: usize, sectors: usize },
    Delete { slot: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..48, 1usize..6).prop_map(|(slot, sectors)| Op::Write { slot, sectors }),
        1 => (0usize..48).prop_map(|slot| Op::Delete { slot }),
    ]
}

fn check_invariants(region: &mut RegionFile, expected: &HashMap<usize, (usize, u32)>) -> Result<(), TestCaseError> {
    let mut owner: HashMap<usize, usize> = HashMap::new();
    let mut last = 1usize;

    for slot in 0..1024 {
        let entry = region.entry(slot).unwrap();
        match expected.get(&slot) {
            None => prop_assert!(!entry.is_present(), "slot {} should be empty", slot),
            Some(&(sectors, ts)) => {
                prop_assert!(entry.is_present());
                prop_assert!(entry.sector_offset >= 2);
                prop_assert_eq!(entry.sector_count as usize, sectors);
                prop_assert_eq!(entry.timestamp, ts);
                for s in entry.sectors() {
                    prop_assert!(owner.insert(s, slot).is_none(), "sector {} shared", s);
                    last = last.max(s);
                }
                let blob = region.load_chunk(slot).unwrap().unwrap();
                prop_assert_eq!(blob.timestamp(), ts);
                prop_assert_eq!(blob.sector_length(), sectors);
            }
        }
    }
    prop_assert_eq!(region.file_len().unwrap(), ((last + 1) * SECTOR_SIZE) as u64);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn allocator_keeps_runs_disjoint(batches in prop::collection::vec(prop::collection::vec(op(), 0..8), 1..8)) {
        let tmp = NamedTempFile::new().unwrap();
        let mut region = RegionFile::create(tmp.path()).unwrap();
        let mut expected: HashMap<usize, (usize, u32)> = HashMap::new();
        let mut ts = 0u32;

        for batch in batches {
            let mut changes = ChangeSet::new();
            let mut staged: HashMap<usize, Option<(usize, u32)>> = HashMap::new();
            for op in batch {
                ts += 1;
                match op {
                    Op::Write { slot, sectors } => {
                        changes.put(slot, Some(blob_of_sectors(sectors, ts)));
                        staged.insert(slot, Some((sectors, ts)));
                    }
                    Op::Delete { slot } => {
                        changes.delete(slot);
                        staged.insert(slot, None);
                    }
                }
            }
            region.write_changes(&changes).unwrap();
            for (slot, v) in staged {
                match v {
                    Some(x) => { expected.insert(slot, x); }
                    None => { expected.remove(&slot); }
                }
            }
            check_invariants(&mut region, &expected)?;
        }

        // Everything must read back the same after reopening.
        drop(region);
        let mut reopened = RegionFile::open(tmp.path()).unwrap();
        check_invariants(&mut reopened, &expected)?;
    }
}
