// Primary word index
//
// A counting-sort index from every fixed-width word value in the genome
// to the ascending list of positions where it occurs. Words whose
// occurrence count exceeds the configured cutoff get a bit in the
// cutoff bitset instead of a position list; their positions are only
// reachable through the secondary word hash, keyed by an adjacent word.
// Built once, immutable afterwards, memory-mappable for query.

use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::config::MapperConfig;
use crate::error::IndexError;
use crate::reference::ReferenceSequence;
use crate::word_hash::{HashSide, WordHash, WordHashBuilder};

pub const WORD_INDEX_COOKIE: u32 = 0x5844_4957; // "WIDX"
pub const WORD_INDEX_VERSION: u32 = 2;

const HEADER_BYTES: usize = 32;

/// Fixed-size bit vector, one bit per possible word value, with the
/// 1-bit-per-word on-disk layout. All access goes through these
/// accessors; nothing else pokes at the backing words.
#[derive(Debug, Clone)]
pub struct Bitset {
    words: Vec<u64>,
    len: u64,
}

impl Bitset {
    pub fn new(len: u64) -> Self {
        Bitset {
            words: vec![0; len.div_ceil(64) as usize],
            len,
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, index: u64) {
        debug_assert!(index < self.len);
        self.words[(index / 64) as usize] |= 1u64 << (index % 64);
    }

    #[inline]
    pub fn get(&self, index: u64) -> bool {
        Self::get_in(&self.words, index)
    }

    /// Bit test against a raw backing slice (shared with the mmap path).
    #[inline]
    pub fn get_in(words: &[u64], index: u64) -> bool {
        let slot = (index / 64) as usize;
        slot < words.len() && words[slot] & (1u64 << (index % 64)) != 0
    }

    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn backing_words(&self) -> &[u64] {
        &self.words
    }
}

/// Word value starting at `pos`, first symbol in the highest bits.
/// None if the window covers an uncallable symbol or runs off the end.
pub fn word_at<R: ReferenceSequence>(reference: &R, pos: u64, word_size: u32) -> Option<u64> {
    if pos + word_size as u64 > reference.length() {
        return None;
    }
    let mut value = 0u64;
    for i in 0..word_size as u64 {
        let c = reference.base_at(pos + i);
        if c > 3 {
            return None;
        }
        value = (value << 2) | c as u64;
    }
    Some(value)
}

/// Drive `f(start, value)` for every valid word in the reference, in
/// ascending start order. One incremental pass; uncallable symbols
/// taint the next `word_size` windows.
fn scan_words<R: ReferenceSequence>(reference: &R, word_size: u32, mut f: impl FnMut(u64, u64)) {
    let len = reference.length();
    let mask = (1u64 << (2 * word_size)) - 1;
    let mut value = 0u64;
    let mut tainted = 0u32;
    for p in 0..len {
        let c = reference.base_at(p);
        value = ((value << 2) | (c & 3) as u64) & mask;
        if c > 3 {
            tainted = word_size;
        } else if tainted > 0 {
            tainted -= 1;
        }
        if p + 1 >= word_size as u64 && tainted == 0 {
            f(p + 1 - word_size as u64, value);
        }
    }
}

enum Backing {
    Owned {
        cutoff: Bitset,
        offsets: Vec<u32>,
        positions: Vec<u64>,
    },
    Mapped {
        map: Mmap,
        cutoff: Range<usize>,
        offsets: Range<usize>,
        positions: Range<usize>,
    },
}

/// Query-time primary index. Immutable; shared freely across readers.
pub struct WordIndex {
    word_size: u32,
    occurrence_cutoff: u32,
    total_words: u64,
    backing: Backing,
}

impl WordIndex {
    pub fn word_size(&self) -> u32 {
        self.word_size
    }

    pub fn occurrence_cutoff(&self) -> u32 {
        self.occurrence_cutoff
    }

    /// Number of distinct word values (4^word_size).
    pub fn word_value_count(&self) -> u64 {
        1u64 << (2 * self.word_size)
    }

    /// Valid words seen during the build (the sum of all counts,
    /// including over-cutoff words).
    pub fn total_words(&self) -> u64 {
        self.total_words
    }

    fn cutoff_words(&self) -> &[u64] {
        match &self.backing {
            Backing::Owned { cutoff, .. } => cutoff.backing_words(),
            Backing::Mapped { map, cutoff, .. } => bytemuck::cast_slice(&map[cutoff.clone()]),
        }
    }

    fn offsets(&self) -> &[u32] {
        match &self.backing {
            Backing::Owned { offsets, .. } => offsets,
            Backing::Mapped { map, offsets, .. } => bytemuck::cast_slice(&map[offsets.clone()]),
        }
    }

    fn positions(&self) -> &[u64] {
        match &self.backing {
            Backing::Owned { positions, .. } => positions,
            Backing::Mapped { map, positions, .. } => bytemuck::cast_slice(&map[positions.clone()]),
        }
    }

    pub fn total_positions(&self) -> u64 {
        self.positions().len() as u64
    }

    /// Whether this word's occurrence count exceeded the cutoff at
    /// build time. Callers must test this before trusting `lookup`: a
    /// set bit means the positions live in the word hash instead.
    #[inline]
    pub fn word_reached_cutoff(&self, word: u64) -> bool {
        word < self.word_value_count() && Bitset::get_in(self.cutoff_words(), word)
    }

    /// Ascending genome positions of `word`. Empty for unseen or
    /// out-of-range values, and empty for over-cutoff words (check the
    /// bit first).
    pub fn lookup(&self, word: u64) -> &[u64] {
        if word >= self.word_value_count() {
            return &[];
        }
        let offsets = self.offsets();
        let start = offsets[word as usize] as usize;
        let end = offsets[word as usize + 1] as usize;
        &self.positions()[start..end]
    }

    /// Stored occurrence count (zero for over-cutoff words, whose lists
    /// are not materialized here).
    pub fn count(&self, word: u64) -> u32 {
        self.lookup(word).len() as u32
    }

    /// Any stored position of `word` within `[target - width, target +
    /// width]`, used by realignment heuristics.
    pub fn position_near(&self, word: u64, target: u64, width: u64) -> Option<u64> {
        let list = self.lookup(word);
        let lo = target.saturating_sub(width);
        let i = list.partition_point(|&p| p < lo);
        list.get(i)
            .copied()
            .filter(|&p| p <= target.saturating_add(width))
    }

    /// Serialize: header, cutoff bitset, offset table (padded to an
    /// 8-byte boundary), flat position array.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut w = BufWriter::new(File::create(path)?);

        w.write_all(&WORD_INDEX_COOKIE.to_le_bytes())?;
        w.write_all(&WORD_INDEX_VERSION.to_le_bytes())?;
        w.write_all(&self.word_size.to_le_bytes())?;
        w.write_all(&self.occurrence_cutoff.to_le_bytes())?;
        w.write_all(&self.total_words.to_le_bytes())?;
        w.write_all(&self.total_positions().to_le_bytes())?;

        for &word in self.cutoff_words() {
            w.write_all(&word.to_le_bytes())?;
        }
        let offsets = self.offsets();
        for &o in offsets {
            w.write_all(&o.to_le_bytes())?;
        }
        if offsets.len() % 2 == 1 {
            w.write_all(&0u32.to_le_bytes())?; // realign to 8 bytes
        }
        for &p in self.positions() {
            w.write_all(&p.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Memory-map a serialized index. Fatal on cookie/version mismatch
    /// or truncation.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < HEADER_BYTES {
            return Err(IndexError::Truncated(format!(
                "{}: {} bytes is smaller than the header",
                path.display(),
                map.len()
            )));
        }
        let u32_at = |o: usize| u32::from_le_bytes(map[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(map[o..o + 8].try_into().unwrap());

        let cookie = u32_at(0);
        if cookie != WORD_INDEX_COOKIE {
            return Err(IndexError::BadCookie {
                found: cookie,
                expected: WORD_INDEX_COOKIE,
            });
        }
        let version = u32_at(4);
        if version != WORD_INDEX_VERSION {
            return Err(IndexError::Version {
                found: version,
                supported: WORD_INDEX_VERSION,
            });
        }
        let word_size = u32_at(8);
        if !(1..=15).contains(&word_size) {
            return Err(IndexError::ParameterMismatch(format!(
                "{}: implausible word size {}",
                path.display(),
                word_size
            )));
        }
        let occurrence_cutoff = u32_at(12);
        let total_words = u64_at(16);
        let position_count = u64_at(24);

        let word_values = 1u64 << (2 * word_size);
        let cutoff_bytes = (word_values.div_ceil(64) * 8) as usize;
        let offsets_count = word_values as usize + 1;
        let offsets_bytes = offsets_count * 4;
        let pad = if offsets_count % 2 == 1 { 4 } else { 0 };

        let cutoff = HEADER_BYTES..HEADER_BYTES + cutoff_bytes;
        let offsets = cutoff.end..cutoff.end + offsets_bytes;
        let positions_start = offsets.end + pad;
        let positions = positions_start..positions_start + position_count as usize * 8;
        if positions.end > map.len() {
            return Err(IndexError::Truncated(format!(
                "{}: need {} bytes, file has {}",
                path.display(),
                positions.end,
                map.len()
            )));
        }

        log::debug!(
            "opened word index {}: word size {}, cutoff {}, {} positions",
            path.display(),
            word_size,
            occurrence_cutoff,
            position_count
        );

        Ok(WordIndex {
            word_size,
            occurrence_cutoff,
            total_words,
            backing: Backing::Mapped {
                map,
                cutoff,
                offsets,
                positions,
            },
        })
    }
}

/// The three tables a mapper queries: primary index plus the left and
/// right secondary hashes. Built in one batch over the reference;
/// read-only afterwards.
pub struct IndexTables {
    pub words: WordIndex,
    pub left: WordHash,
    pub right: WordHash,
}

impl IndexTables {
    /// Build all tables from a reference. Two scans: one to count and
    /// mark cutoff words, one to fill position lists and feed the
    /// over-cutoff positions (with their genome neighbors) to the hash
    /// builders.
    pub fn build<R: ReferenceSequence>(
        reference: &R,
        config: &MapperConfig,
    ) -> Result<Self, IndexError> {
        config
            .validate()
            .map_err(|errors| IndexError::InvalidConfig(errors.join("; ")))?;
        let word_size = config.word_size;
        let genome_len = reference.length();
        if genome_len < word_size as u64 {
            return Err(IndexError::ReferenceTooShort {
                length: genome_len,
                word_size,
            });
        }

        let word_values = 1usize << (2 * word_size);
        let mut counts = vec![0u32; word_values];
        let mut total_words = 0u64;
        scan_words(reference, word_size, |_, value| {
            counts[value as usize] += 1;
            total_words += 1;
        });

        let mut cutoff = Bitset::new(word_values as u64);
        let mut offsets = vec![0u32; word_values + 1];
        let mut running = 0u32;
        for (value, &count) in counts.iter().enumerate() {
            offsets[value] = running;
            if count > config.occurrence_cutoff {
                cutoff.set(value as u64);
            } else {
                running += count;
            }
        }
        offsets[word_values] = running;

        let mut positions = vec![0u64; running as usize];
        let mut fill = offsets.clone();
        let mut left = WordHashBuilder::new(word_size, HashSide::Left);
        let mut right = WordHashBuilder::new(word_size, HashSide::Right);
        scan_words(reference, word_size, |start, value| {
            if cutoff.get(value) {
                if start >= word_size as u64 {
                    if let Some(neighbor) = word_at(reference, start - word_size as u64, word_size)
                    {
                        left.add(value, neighbor, start);
                    }
                }
                if let Some(neighbor) = word_at(reference, start + word_size as u64, word_size) {
                    right.add(value, neighbor, start);
                }
            } else {
                let slot = &mut fill[value as usize];
                positions[*slot as usize] = start;
                *slot += 1;
            }
        });

        let cutoff_count = cutoff.count_ones();
        log::info!(
            "word index built: {} valid words over {} positions, {} distinct values, {} over cutoff",
            total_words,
            genome_len,
            counts.iter().filter(|&&c| c > 0).count(),
            cutoff_count
        );
        debug_assert_eq!(
            counts.iter().map(|&c| c as u64).sum::<u64>(),
            total_words,
            "per-word counts must sum to the words indexed"
        );

        Ok(IndexTables {
            words: WordIndex {
                word_size,
                occurrence_cutoff: config.occurrence_cutoff,
                total_words,
                backing: Backing::Owned {
                    cutoff,
                    offsets,
                    positions,
                },
            },
            left: left.finish(),
            right: right.finish(),
        })
    }

    pub fn word_size(&self) -> u32 {
        self.words.word_size()
    }

    fn paths(prefix: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let base = prefix.to_string_lossy();
        (
            PathBuf::from(format!("{base}.widx")),
            PathBuf::from(format!("{base}.lwh")),
            PathBuf::from(format!("{base}.rwh")),
        )
    }

    /// Serialize all three tables next to each other under a common
    /// prefix.
    pub fn save(&self, prefix: &Path) -> Result<(), IndexError> {
        let (widx, lwh, rwh) = Self::paths(prefix);
        self.words.save(&widx)?;
        self.left.save(&lwh)?;
        self.right.save(&rwh)?;
        Ok(())
    }

    /// Open all three tables and cross-check their shared parameters.
    pub fn open(prefix: &Path) -> Result<Self, IndexError> {
        let (widx, lwh, rwh) = Self::paths(prefix);
        let words = WordIndex::open(&widx)?;
        let left = WordHash::open(&lwh, HashSide::Left)?;
        let right = WordHash::open(&rwh, HashSide::Right)?;
        for (name, ws) in [("left", left.word_size()), ("right", right.word_size())] {
            if ws != words.word_size() {
                return Err(IndexError::ParameterMismatch(format!(
                    "{name} hash word size {ws} != index word size {}",
                    words.word_size()
                )));
            }
        }
        Ok(IndexTables { words, left, right })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::PackedReference;

    fn small_config(word_size: u32, cutoff: u32) -> MapperConfig {
        MapperConfig {
            word_size,
            occurrence_cutoff: cutoff,
            ..MapperConfig::default()
        }
    }

    #[test]
    fn bitset_get_set() {
        let mut b = Bitset::new(130);
        assert!(!b.get(0) && !b.get(129));
        b.set(0);
        b.set(64);
        b.set(129);
        assert!(b.get(0) && b.get(64) && b.get(129));
        assert!(!b.get(1) && !b.get(128));
        assert_eq!(b.count_ones(), 3);
        // Out-of-slice reads are false, not panics.
        assert!(!Bitset::get_in(b.backing_words(), 1_000_000));
    }

    #[test]
    fn word_at_encodes_high_bits_first() {
        let r = PackedReference::from_bases("chr1", b"ACGT", false);
        // A C G T -> 00 01 10 11
        assert_eq!(word_at(&r, 0, 4), Some(0b00_01_10_11));
        assert_eq!(word_at(&r, 1, 3), Some(0b01_10_11));
        assert_eq!(word_at(&r, 1, 4), None, "runs off the end");
    }

    #[test]
    fn scan_skips_tainted_windows() {
        let r = PackedReference::from_bases("chr1", b"ACGTNACGT", false);
        let mut starts = Vec::new();
        scan_words(&r, 4, |s, _| starts.push(s));
        // Windows 0 and 5 are clean; 1..=4 cover the N.
        assert_eq!(starts, vec![0, 5]);
    }

    #[test]
    fn index_is_complete_for_small_genome() {
        let seq = b"GAGTTTTATCGCTTCCATGACGCAGAAGTTAACACTTTCGGATATTTCTGATGAGTCGAA";
        let r = PackedReference::from_bases("phix", seq, false);
        let cfg = small_config(6, 100);
        let tables = IndexTables::build(&r, &cfg).unwrap();

        for p in 0..=(seq.len() as u64 - 6) {
            let w = word_at(&r, p, 6).unwrap();
            assert!(
                !tables.words.word_reached_cutoff(w),
                "no word repeats 100x here"
            );
            assert!(
                tables.words.lookup(w).contains(&p),
                "position {p} missing from its word's list"
            );
        }
        assert_eq!(tables.words.total_words(), seq.len() as u64 - 5);
    }

    #[test]
    fn position_lists_are_ascending_segments() {
        let seq = b"ACGTACGTACGTACGTACGT";
        let r = PackedReference::from_bases("chr1", seq, false);
        let tables = IndexTables::build(&r, &small_config(4, 100)).unwrap();
        let w = word_at(&r, 0, 4).unwrap(); // ACGT occurs at 0,4,8,12,16
        assert_eq!(tables.words.lookup(w), &[0, 4, 8, 12, 16]);
    }

    #[test]
    fn cutoff_words_route_to_hash() {
        // AAAA repeats far past a cutoff of 2; the trailing unique tail
        // gives the over-cutoff word distinct neighbors.
        let seq = b"AAAAAAAAAAAAAAAAAAAAAAAACGTGCATT";
        let r = PackedReference::from_bases("chr1", seq, false);
        let tables = IndexTables::build(&r, &small_config(4, 2)).unwrap();

        let aaaa = 0u64;
        assert!(tables.words.word_reached_cutoff(aaaa));
        assert!(
            tables.words.lookup(aaaa).is_empty(),
            "cutoff words store no direct positions"
        );

        // Every AAAA occurrence with a valid right neighbor must be
        // reachable through the right hash.
        for p in 0..=(seq.len() as u64 - 4) {
            let Some(w) = word_at(&r, p, 4) else { continue };
            if w != aaaa {
                continue;
            }
            if let Some(nb) = word_at(&r, p + 4, 4) {
                assert!(
                    tables.right.find_genome_locations(aaaa, nb).contains(&p),
                    "position {p} unreachable via right hash"
                );
            }
            if p >= 4 {
                if let Some(nb) = word_at(&r, p - 4, 4) {
                    assert!(
                        tables.left.find_genome_locations(aaaa, nb).contains(&p),
                        "position {p} unreachable via left hash"
                    );
                }
            }
        }
    }

    #[test]
    fn position_near_window() {
        let seq = b"ACGTACGTACGTACGTACGT";
        let r = PackedReference::from_bases("chr1", seq, false);
        let tables = IndexTables::build(&r, &small_config(4, 100)).unwrap();
        let w = word_at(&r, 0, 4).unwrap();
        assert_eq!(tables.words.position_near(w, 9, 2), Some(8));
        assert_eq!(tables.words.position_near(w, 2, 1), None);
        assert_eq!(tables.words.position_near(w, 2, 2), Some(0));
    }

    #[test]
    fn lookup_out_of_range_is_empty() {
        let r = PackedReference::from_bases("chr1", b"ACGTACGTACGT", false);
        let tables = IndexTables::build(&r, &small_config(4, 100)).unwrap();
        assert!(tables.words.lookup(u64::MAX).is_empty());
        assert!(!tables.words.word_reached_cutoff(u64::MAX));
    }

    #[test]
    fn build_rejects_short_reference() {
        let r = PackedReference::from_bases("chr1", b"ACG", false);
        assert!(matches!(
            IndexTables::build(&r, &small_config(6, 100)),
            Err(IndexError::ReferenceTooShort { .. })
        ));
    }
}
