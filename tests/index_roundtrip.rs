// Index persistence: building, serializing and reopening the word
// index and both word hashes must preserve every lookup.

use tempfile::tempdir;

use wordmap::word_index::{word_at, IndexTables};
use wordmap::{IndexError, MapperConfig, PackedReference, ReferenceSequence};

fn genome_bases(len: usize) -> Vec<u8> {
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push([b'A', b'C', b'G', b'T'][(state % 4) as usize]);
    }
    out
}

fn config(word_size: u32, cutoff: u32) -> MapperConfig {
    MapperConfig {
        word_size,
        occurrence_cutoff: cutoff,
        ..MapperConfig::default()
    }
}

#[test]
fn round_trip_preserves_every_lookup() {
    let bases = genome_bases(2000);
    let reference = PackedReference::from_bases("chr1", &bases, false);
    let cfg = config(6, 50);
    let built = IndexTables::build(&reference, &cfg).unwrap();

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("genome");
    built.save(&prefix).unwrap();
    let reopened = IndexTables::open(&prefix).unwrap();

    assert_eq!(reopened.word_size(), 6);
    assert_eq!(
        reopened.words.total_positions(),
        built.words.total_positions()
    );
    for word in 0..built.words.word_value_count() {
        assert_eq!(
            built.words.word_reached_cutoff(word),
            reopened.words.word_reached_cutoff(word),
            "cutoff bit for word {word}"
        );
        assert_eq!(
            built.words.lookup(word),
            reopened.words.lookup(word),
            "positions for word {word}"
        );
    }
}

#[test]
fn reopened_tables_satisfy_index_completeness() {
    // Poly-A tract pushes one word over the cutoff; everything must
    // stay reachable after a save/open cycle, through the primary index
    // or the neighbor hashes.
    let mut bases = genome_bases(400);
    bases.splice(100..100, std::iter::repeat(b'A').take(60));
    let reference = PackedReference::from_bases("chr1", &bases, false);
    let cfg = config(5, 8);
    let built = IndexTables::build(&reference, &cfg).unwrap();

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("genome");
    built.save(&prefix).unwrap();
    let tables = IndexTables::open(&prefix).unwrap();

    let ws = 5u64;
    for p in 0..=(reference.length() - ws) {
        let Some(word) = word_at(&reference, p, ws as u32) else {
            continue;
        };
        if !tables.words.word_reached_cutoff(word) {
            assert!(
                tables.words.lookup(word).contains(&p),
                "direct lookup lost position {p}"
            );
            continue;
        }
        // Over the cutoff: position must be reachable through at least
        // one neighbor hash whenever a valid neighbor exists.
        let right = word_at(&reference, p + ws, ws as u32)
            .map(|nb| tables.right.find_genome_locations(word, nb).contains(&p))
            .unwrap_or(false);
        let left = p
            .checked_sub(ws)
            .and_then(|q| word_at(&reference, q, ws as u32))
            .map(|nb| tables.left.find_genome_locations(word, nb).contains(&p))
            .unwrap_or(false);
        if word_at(&reference, p + ws, ws as u32).is_some()
            || p.checked_sub(ws)
                .and_then(|q| word_at(&reference, q, ws as u32))
                .is_some()
        {
            assert!(
                left || right,
                "cutoff word at {p} unreachable through both hashes"
            );
        }
    }
}

#[test]
fn mapping_results_survive_reopening() {
    let bases = genome_bases(800);
    let reference = PackedReference::from_bases("chr1", &bases, false);
    let cfg = config(8, 100);
    let built = IndexTables::build(&reference, &cfg).unwrap();

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("genome");
    built.save(&prefix).unwrap();

    let read = bases[300..335].to_vec();
    let qual = vec![b'5'; 35];

    let mapper_built =
        wordmap::Mapper::with_tables(PackedReference::from_bases("chr1", &bases, false), built, cfg.clone())
            .unwrap();
    let from_build = mapper_built.map_single(&read, &qual).unwrap();

    let reopened = IndexTables::open(&prefix).unwrap();
    let mapper_reopened =
        wordmap::Mapper::with_tables(PackedReference::from_bases("chr1", &bases, false), reopened, cfg)
            .unwrap();
    let from_open = mapper_reopened.map_single(&read, &qual).unwrap();

    assert_eq!(from_build.genome_position, from_open.genome_position);
    assert_eq!(from_build.status, from_open.status);
    assert_eq!(from_build.sum_quality, from_open.sum_quality);
    assert_eq!(from_build.genome_position, 300);
}

#[test]
fn open_rejects_corrupt_and_missing_files() {
    let dir = tempdir().unwrap();

    // Missing files are an I/O error.
    assert!(matches!(
        IndexTables::open(&dir.path().join("absent")),
        Err(IndexError::Io(_))
    ));

    // A file with a foreign cookie is rejected outright.
    let prefix = dir.path().join("bad");
    std::fs::write(format!("{}.widx", prefix.display()), vec![0u8; 128]).unwrap();
    assert!(matches!(
        IndexTables::open(&prefix),
        Err(IndexError::BadCookie { .. })
    ));
}

#[test]
fn truncated_index_is_fatal() {
    let bases = genome_bases(500);
    let reference = PackedReference::from_bases("chr1", &bases, false);
    let cfg = config(6, 50);
    let built = IndexTables::build(&reference, &cfg).unwrap();

    let dir = tempdir().unwrap();
    let prefix = dir.path().join("genome");
    built.save(&prefix).unwrap();

    // Chop the primary index file short.
    let widx = format!("{}.widx", prefix.display());
    let bytes = std::fs::read(&widx).unwrap();
    std::fs::write(&widx, &bytes[..bytes.len() / 2]).unwrap();
    assert!(matches!(
        IndexTables::open(&prefix),
        Err(IndexError::Truncated(_))
    ));
}
