// Read indexing
//
// Per-read, per-orientation state: the oriented symbol and quality
// strings, one word value per adjacent non-overlapping chunk, the
// mutation/masked/color expansions that turn those words into index
// probes, the checked-position set that keeps a candidate from being
// scored twice, and the two scoring modes. Created fresh for every
// read; nothing here is shared across concurrent mapping operations.

use ahash::AHashSet;

use crate::banded_sw::banded_fit;
use crate::cigar::Cigar;
use crate::color::{decode_color_read, snp_color_pairs};
use crate::config::MapperConfig;
use crate::error::ReadError;
use crate::reference::ReferenceSequence;
use crate::symbols::{decode_qualities, encode_bases, orient_codes};
use crate::word_index::IndexTables;

/// Indexed lookup needs at least this many usable words per read.
pub const MIN_USABLE_WORDS: usize = 2;

/// One index word of the read.
#[derive(Debug, Clone)]
pub struct ReadWord {
    /// 2-bit packed value; uncallable symbols contribute zero bits and
    /// are recorded in `masked`.
    pub value: u64,
    /// Offset of the word within the oriented read.
    pub offset: u32,
    /// True when every symbol was callable.
    pub valid: bool,
    /// Position (within the word) of a single uncallable symbol. Words
    /// with two or more are unusable for lookup entirely.
    pub masked: Option<u32>,
}

impl ReadWord {
    fn usable(&self) -> bool {
        self.valid || self.masked.is_some()
    }
}

/// One index probe: a word slot plus the (possibly mutated) value to
/// look up.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub slot: usize,
    pub value: u64,
}

/// Gapped scoring result; the alignment may shift the start position
/// within the band.
#[derive(Debug, Clone)]
pub struct GappedScore {
    pub genome_position: u64,
    pub mismatch_count: u32,
    pub sum_quality: u32,
    pub cigar: Cigar,
}

pub struct ReadIndexer {
    seq: Vec<u8>,
    quals: Vec<u8>,
    is_forward: bool,
    color_space: bool,
    word_size: u32,
    words: Vec<ReadWord>,
    mismatch_cutoff: u32,
    checked: AHashSet<u64>,
}

impl ReadIndexer {
    /// Index the read as given.
    pub fn forward(read: &[u8], qual: &[u8], config: &MapperConfig) -> Result<Self, ReadError> {
        Self::build(read, qual, true, config)
    }

    /// Index the reverse-complement orientation (reverse-only in color
    /// space, where colors are strand-symmetric).
    pub fn reverse(read: &[u8], qual: &[u8], config: &MapperConfig) -> Result<Self, ReadError> {
        Self::build(read, qual, false, config)
    }

    fn build(
        read: &[u8],
        qual: &[u8],
        is_forward: bool,
        config: &MapperConfig,
    ) -> Result<Self, ReadError> {
        let (codes, quals) = if config.color_space {
            // The primer base and the primer-adjacent color carry no
            // alignable information; drop both.
            if read.len() < 2 || qual.len() != read.len() - 1 {
                return Err(ReadError::LengthMismatch {
                    read_len: read.len(),
                    qual_len: qual.len(),
                });
            }
            let (_primer, colors) = decode_color_read(read);
            let quals = decode_qualities(qual);
            (colors[1..].to_vec(), quals[1..].to_vec())
        } else {
            if read.len() != qual.len() {
                return Err(ReadError::LengthMismatch {
                    read_len: read.len(),
                    qual_len: qual.len(),
                });
            }
            (encode_bases(read), decode_qualities(qual))
        };

        let seq = orient_codes(&codes, is_forward, config.color_space);
        let quals = if is_forward {
            quals
        } else {
            quals.into_iter().rev().collect()
        };

        let word_size = config.word_size;
        if seq.len() < word_size as usize {
            return Err(ReadError::TooShort {
                len: seq.len(),
                word_size: word_size as usize,
            });
        }

        let mut words = Vec::with_capacity(seq.len() / word_size as usize);
        for (slot, chunk) in seq.chunks_exact(word_size as usize).enumerate() {
            let mut value = 0u64;
            let mut masked = Vec::new();
            for (i, &c) in chunk.iter().enumerate() {
                value = (value << 2) | (c & 3) as u64;
                if c > 3 {
                    masked.push(i as u32);
                }
            }
            words.push(ReadWord {
                value,
                offset: slot as u32 * word_size,
                valid: masked.is_empty(),
                masked: if masked.len() == 1 {
                    Some(masked[0])
                } else {
                    None
                },
            });
        }

        let usable = words.iter().filter(|w| w.usable()).count();
        if usable < MIN_USABLE_WORDS {
            return Err(ReadError::TooFewWords {
                usable,
                required: MIN_USABLE_WORDS,
            });
        }

        let mismatch_cutoff = config.mismatch_cutoff(seq.len());
        Ok(ReadIndexer {
            seq,
            quals,
            is_forward,
            color_space: config.color_space,
            word_size,
            words,
            mismatch_cutoff,
            checked: AHashSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn is_forward(&self) -> bool {
        self.is_forward
    }

    pub fn mismatch_cutoff(&self) -> u32 {
        self.mismatch_cutoff
    }

    pub fn words(&self) -> &[ReadWord] {
        &self.words
    }

    pub fn oriented_seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn oriented_quals(&self) -> &[u8] {
        &self.quals
    }

    /// Forget every scored position. Used between the ungapped and
    /// gapped passes, which must re-score the same candidates.
    pub fn clear_checked(&mut self) {
        self.checked.clear();
    }

    #[inline]
    fn shift(&self, within_word: u32) -> u32 {
        2 * (self.word_size - 1 - within_word)
    }

    /// Enumerate the probe plan. Always includes exact values for valid
    /// words and all four symbol choices at a single masked position;
    /// color space adds SNP-consistent color-pair substitutions;
    /// `check_edits` adds every single-symbol mutation of every word
    /// (costly, so only requested after exact lookup found nothing).
    pub fn probes(&self, check_edits: bool) -> Vec<Probe> {
        let mut probes = Vec::new();
        let mut seen: AHashSet<(usize, u64)> = AHashSet::new();
        let mut push = |probes: &mut Vec<Probe>, slot: usize, value: u64| {
            if seen.insert((slot, value)) {
                probes.push(Probe { slot, value });
            }
        };

        for (slot, w) in self.words.iter().enumerate() {
            if let Some(m) = w.masked {
                // The true symbol is unknown; all four must be tried.
                let shift = self.shift(m);
                for symbol in 0..4u64 {
                    push(&mut probes, slot, w.value | (symbol << shift));
                }
                continue;
            }
            if !w.valid {
                continue;
            }
            push(&mut probes, slot, w.value);

            if self.color_space {
                // A base-level SNP flips two adjacent colors by the same
                // delta; enumerate those signatures within the word.
                for j in 0..self.word_size - 1 {
                    let s1 = self.shift(j);
                    let s2 = self.shift(j + 1);
                    let c1 = ((w.value >> s1) & 3) as u8;
                    let c2 = ((w.value >> s2) & 3) as u8;
                    for (a, b) in snp_color_pairs(c1, c2) {
                        let v = (w.value & !((3 << s1) | (3 << s2)))
                            | ((a as u64) << s1)
                            | ((b as u64) << s2);
                        push(&mut probes, slot, v);
                    }
                }
            }

            if check_edits && self.mismatch_cutoff > 0 {
                for j in 0..self.word_size {
                    let shift = self.shift(j);
                    for delta in 1..4u64 {
                        push(&mut probes, slot, w.value ^ (delta << shift));
                    }
                }
            }
        }
        probes
    }

    /// Genome positions for one probe. Over-cutoff words are resolved
    /// through the secondary hash keyed by the adjacent word: the right
    /// hash when a valid following word exists, otherwise the left hash
    /// with the preceding word.
    pub fn resolve<'t>(&self, tables: &'t IndexTables, probe: &Probe) -> &'t [u64] {
        if !tables.words.word_reached_cutoff(probe.value) {
            return tables.words.lookup(probe.value);
        }
        if let Some(next) = self.words.get(probe.slot + 1) {
            if next.valid {
                return tables.right.find_genome_locations(probe.value, next.value);
            }
        }
        if probe.slot > 0 {
            let prev = &self.words[probe.slot - 1];
            if prev.valid {
                return tables.left.find_genome_locations(probe.value, prev.value);
            }
        }
        &[]
    }

    /// Translate a genome hit of the word at `word_offset` into a
    /// candidate read start. None on underflow, out-of-genome-bounds,
    /// or a position this read already scored; otherwise the position
    /// is marked checked and returned.
    pub fn accept_candidate(
        &mut self,
        hit: u64,
        word_offset: u32,
        genome_len: u64,
    ) -> Option<u64> {
        let start = hit.checked_sub(word_offset as u64)?;
        if start + self.seq.len() as u64 > genome_len {
            return None;
        }
        if !self.checked.insert(start) {
            return None;
        }
        Some(start)
    }

    /// Cheap upper-bound estimate of how many candidates this
    /// orientation would enumerate, for the paired-end mate ordering
    /// heuristic. Over-cutoff words count as the cutoff itself.
    pub fn estimate_candidates(&self, tables: &IndexTables) -> u64 {
        self.probes(false)
            .iter()
            .map(|p| {
                if tables.words.word_reached_cutoff(p.value) {
                    tables.words.occurrence_cutoff() as u64
                } else {
                    tables.words.count(p.value) as u64
                }
            })
            .sum()
    }

    /// Ungapped scoring: sum the phred quality of every mismatching
    /// symbol across the aligned length. None (invalid) once the
    /// mismatch count passes this read's cutoff. Uncallable symbols on
    /// either side contribute nothing.
    pub fn sum_of_mismatch_quality<R: ReferenceSequence>(
        &self,
        reference: &R,
        start: u64,
    ) -> Option<(u32, u32)> {
        let mut mismatches = 0u32;
        let mut sum = 0u32;
        for (i, (&s, &q)) in self.seq.iter().zip(&self.quals).enumerate() {
            let r = reference.base_at(start + i as u64);
            if s > 3 || r > 3 {
                continue;
            }
            if s != r {
                mismatches += 1;
                if mismatches > self.mismatch_cutoff {
                    return None;
                }
                sum += q as u32;
            }
        }
        Some((mismatches, sum))
    }

    /// Gapped scoring: banded Smith-Waterman around the candidate
    /// position. Mismatch events (substitutions plus gap openings) are
    /// held to the same cutoff as the ungapped mode.
    pub fn gapped_sum_of_mismatch_quality<R: ReferenceSequence>(
        &self,
        reference: &R,
        start: u64,
        config: &MapperConfig,
    ) -> Option<GappedScore> {
        let band = config.realign_band as u64;
        let window_start = start.saturating_sub(band);
        let window_end = (start + self.seq.len() as u64 + band).min(reference.length());
        let window = reference.fetch_window(window_start, (window_end - window_start) as usize);
        let fit = banded_fit(
            &self.seq,
            &self.quals,
            &window,
            config.realign_band as usize,
            config.gap_open_quality,
            config.gap_extend_quality,
        )?;
        if fit.mismatch_events > self.mismatch_cutoff {
            return None;
        }
        Some(GappedScore {
            genome_position: window_start + fit.window_offset as u64,
            mismatch_count: fit.mismatch_events,
            sum_quality: fit.sum_quality,
            cigar: fit.cigar,
        })
    }
}
