// Secondary word hash
//
// Words whose occurrence count exceeds the cutoff never store position
// lists in the primary index; their positions are keyed here by the
// composite of the word and one adjacent word, which is almost always
// enough to cut a multi-thousand hit list down to a handful. Two
// independent tables exist per genome: Left keys a high-repeat word with
// its preceding word, Right with its following word, because the correct
// disambiguating neighbor depends on where the over-cutoff word sits in
// the read's word sequence.
//
// The table is open addressing over a prime slot count, probed with a
// stride drawn from a second, smaller prime modulus so probe cycles
// cannot share the table's period.

use ahash::AHashMap;
use bytemuck::{Pod, Zeroable};
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use crate::error::IndexError;

pub const WORD_HASH_COOKIE: u32 = 0x4853_4857; // "WHSH"
pub const WORD_HASH_VERSION: u32 = 2;

/// Slot marker for never-occupied entries. Composite keys use at most
/// 60 bits (two 15-symbol words), so all-ones cannot collide.
pub const EMPTY_KEY: u64 = u64::MAX;

/// Which neighbor the composite keys carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSide {
    /// Neighbor is the word immediately before the high-repeat word.
    Left,
    /// Neighbor is the word immediately after it.
    Right,
}

impl HashSide {
    fn as_u32(self) -> u32 {
        match self {
            HashSide::Left => 0,
            HashSide::Right => 1,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(HashSide::Left),
            1 => Some(HashSide::Right),
            _ => None,
        }
    }
}

/// One open-addressing slot: composite key, occurrence count, offset
/// into the flat position array.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HashEntry {
    pub key: u64,
    pub count: u32,
    pub offset: u32,
}

enum Backing {
    Owned {
        entries: Vec<HashEntry>,
        positions: Vec<u64>,
    },
    Mapped {
        map: Mmap,
        entries: Range<usize>,
        positions: Range<usize>,
    },
}

/// Query-time secondary hash. Immutable after construction; safe to
/// share across any number of concurrent readers.
pub struct WordHash {
    word_size: u32,
    side: HashSide,
    stride_modulus: u64,
    distinct_keys: u64,
    backing: Backing,
}

impl WordHash {
    /// Pack a word and its neighbor into one 64-bit key.
    #[inline]
    pub fn composite_key(word_size: u32, word: u64, neighbor: u64) -> u64 {
        (word << (2 * word_size)) | neighbor
    }

    pub fn side(&self) -> HashSide {
        self.side
    }

    pub fn word_size(&self) -> u32 {
        self.word_size
    }

    pub fn distinct_keys(&self) -> u64 {
        self.distinct_keys
    }

    pub fn table_size(&self) -> u64 {
        self.entries().len() as u64
    }

    fn entries(&self) -> &[HashEntry] {
        match &self.backing {
            Backing::Owned { entries, .. } => entries,
            Backing::Mapped { map, entries, .. } => bytemuck::cast_slice(&map[entries.clone()]),
        }
    }

    fn positions(&self) -> &[u64] {
        match &self.backing {
            Backing::Owned { positions, .. } => positions,
            Backing::Mapped { map, positions, .. } => bytemuck::cast_slice(&map[positions.clone()]),
        }
    }

    /// Genome positions of `word` where `neighbor` is the adjacent word
    /// on this table's side. Empty if the pair was never indexed.
    pub fn find_genome_locations(&self, word: u64, neighbor: u64) -> &[u64] {
        let entries = self.entries();
        let size = entries.len() as u64;
        if size == 0 {
            return &[];
        }
        let key = Self::composite_key(self.word_size, word, neighbor);
        let stride = 1 + key % self.stride_modulus;
        let mut slot = key % size;
        for _ in 0..size {
            let e = &entries[slot as usize];
            if e.key == key {
                let start = e.offset as usize;
                return &self.positions()[start..start + e.count as usize];
            }
            if e.key == EMPTY_KEY {
                return &[];
            }
            slot = (slot + stride) % size;
        }
        &[]
    }

    /// Serialize: header, slot table, flat position array. All sections
    /// are 8-byte aligned so the mmap open path can borrow them in place.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let entries = self.entries();
        let positions = self.positions();
        let mut w = BufWriter::new(File::create(path)?);

        w.write_all(&WORD_HASH_COOKIE.to_le_bytes())?;
        w.write_all(&WORD_HASH_VERSION.to_le_bytes())?;
        w.write_all(&self.word_size.to_le_bytes())?;
        w.write_all(&self.side.as_u32().to_le_bytes())?;
        w.write_all(&(entries.len() as u64).to_le_bytes())?;
        w.write_all(&self.stride_modulus.to_le_bytes())?;
        w.write_all(&self.distinct_keys.to_le_bytes())?;
        w.write_all(&(positions.len() as u64).to_le_bytes())?;

        for e in entries {
            w.write_all(&e.key.to_le_bytes())?;
            w.write_all(&e.count.to_le_bytes())?;
            w.write_all(&e.offset.to_le_bytes())?;
        }
        for &p in positions {
            w.write_all(&p.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Memory-map a serialized table. Fatal on cookie/version/side
    /// mismatch or truncation; no partial table is ever returned.
    pub fn open(path: &Path, expected_side: HashSide) -> Result<Self, IndexError> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        const HEADER: usize = 48;
        if map.len() < HEADER {
            return Err(IndexError::Truncated(format!(
                "{}: {} bytes is smaller than the header",
                path.display(),
                map.len()
            )));
        }
        let u32_at = |o: usize| u32::from_le_bytes(map[o..o + 4].try_into().unwrap());
        let u64_at = |o: usize| u64::from_le_bytes(map[o..o + 8].try_into().unwrap());

        let cookie = u32_at(0);
        if cookie != WORD_HASH_COOKIE {
            return Err(IndexError::BadCookie {
                found: cookie,
                expected: WORD_HASH_COOKIE,
            });
        }
        let version = u32_at(4);
        if version != WORD_HASH_VERSION {
            return Err(IndexError::Version {
                found: version,
                supported: WORD_HASH_VERSION,
            });
        }
        let word_size = u32_at(8);
        let side = HashSide::from_u32(u32_at(12)).ok_or_else(|| {
            IndexError::ParameterMismatch(format!("{}: unknown hash side", path.display()))
        })?;
        if side != expected_side {
            return Err(IndexError::ParameterMismatch(format!(
                "{}: stored side {:?}, expected {:?}",
                path.display(),
                side,
                expected_side
            )));
        }
        let table_size = u64_at(16);
        let stride_modulus = u64_at(24);
        let distinct_keys = u64_at(32);
        let position_count = u64_at(40);
        if stride_modulus == 0 {
            return Err(IndexError::ParameterMismatch(format!(
                "{}: zero stride modulus",
                path.display()
            )));
        }

        let entries_bytes = table_size as usize * std::mem::size_of::<HashEntry>();
        let positions_bytes = position_count as usize * 8;
        let entries = HEADER..HEADER + entries_bytes;
        let positions = entries.end..entries.end + positions_bytes;
        if positions.end > map.len() {
            return Err(IndexError::Truncated(format!(
                "{}: need {} bytes, file has {}",
                path.display(),
                positions.end,
                map.len()
            )));
        }

        Ok(WordHash {
            word_size,
            side,
            stride_modulus,
            distinct_keys,
            backing: Backing::Mapped {
                map,
                entries,
                positions,
            },
        })
    }
}

/// Accumulates `(word, neighbor) -> positions` during the genome scan,
/// then freezes into the open-addressing layout.
pub struct WordHashBuilder {
    word_size: u32,
    side: HashSide,
    pending: AHashMap<u64, Vec<u64>>,
}

impl WordHashBuilder {
    pub fn new(word_size: u32, side: HashSide) -> Self {
        WordHashBuilder {
            word_size,
            side,
            pending: AHashMap::new(),
        }
    }

    /// Record one genome position of an over-cutoff word together with
    /// its neighbor on this builder's side. Positions arrive in
    /// ascending scan order, which keeps each list sorted.
    pub fn add(&mut self, word: u64, neighbor: u64, position: u64) {
        let key = WordHash::composite_key(self.word_size, word, neighbor);
        self.pending.entry(key).or_default().push(position);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Freeze into the probe table. Sized to the next prime at or above
    /// 1.33x the distinct key count; stride modulus is the largest
    /// prime strictly below the table size. Keys are inserted in sorted
    /// order so identical inputs serialize identically.
    pub fn finish(self) -> WordHash {
        let distinct = self.pending.len() as u64;
        let table_size = next_prime(((distinct * 4 + 2) / 3).max(17));
        let stride_modulus = previous_prime(table_size - 1);

        let mut entries = vec![
            HashEntry {
                key: EMPTY_KEY,
                count: 0,
                offset: 0,
            };
            table_size as usize
        ];
        let total: usize = self.pending.values().map(|v| v.len()).sum();
        let mut positions = Vec::with_capacity(total);

        let mut keys: Vec<u64> = self.pending.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            let list = &self.pending[&key];
            let stride = 1 + key % stride_modulus;
            let mut slot = key % table_size;
            loop {
                if entries[slot as usize].key == EMPTY_KEY {
                    entries[slot as usize] = HashEntry {
                        key,
                        count: list.len() as u32,
                        offset: positions.len() as u32,
                    };
                    break;
                }
                slot = (slot + stride) % table_size;
            }
            debug_assert!(list.windows(2).all(|w| w[0] <= w[1]));
            positions.extend_from_slice(list);
        }

        log::debug!(
            "word hash ({:?}): {} keys in {} slots, {} positions",
            self.side,
            distinct,
            table_size,
            positions.len()
        );

        WordHash {
            word_size: self.word_size,
            side: self.side,
            stride_modulus,
            distinct_keys: distinct,
            backing: Backing::Owned { entries, positions },
        }
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn next_prime(mut n: u64) -> u64 {
    while !is_prime(n) {
        n += 1;
    }
    n
}

fn previous_prime(mut n: u64) -> u64 {
    while n > 2 && !is_prime(n) {
        n -= 1;
    }
    n.max(2)
}
