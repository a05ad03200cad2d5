// Reference sequence access
//
// The aligner core consumes the reference through the ReferenceSequence
// trait only; storage, FASTA parsing and accession metadata live
// elsewhere. PackedReference is the in-memory implementation used by the
// index builder and the test suites: 2-bit packed bases, a chromosome
// table, and coalesced ambiguous-base regions.

use crate::color::color_of;
use crate::symbols::{BASE_CODE, UNCALLABLE};

/// Absolute position in the concatenated genome.
pub type GenomeIndex = u64;

/// Index into the chromosome table.
pub type ChromosomeId = usize;

/// Read-only view of a reference genome. Symbols are 2-bit codes
/// (base space) or color codes (color space); `UNCALLABLE` marks
/// positions the caller must not trust.
///
/// Implementations must be cheap to query: `base_at` sits on the inner
/// loop of every candidate scoring pass.
pub trait ReferenceSequence {
    /// Symbol at an absolute genome index. In color space this is the
    /// color of the transition starting at `index`.
    fn base_at(&self, index: GenomeIndex) -> u8;

    /// Total number of addressable symbols (one less than the base
    /// count in color space).
    fn length(&self) -> u64;

    /// Chromosome containing `index`, if any.
    fn chromosome_of(&self, index: GenomeIndex) -> Option<ChromosomeId>;

    /// Absolute start of a chromosome.
    fn chromosome_start(&self, id: ChromosomeId) -> GenomeIndex;

    /// Number of chromosomes.
    fn chromosome_count(&self) -> usize;

    /// Whether symbols are colors rather than bases.
    fn is_color_space(&self) -> bool;

    /// Copy a window of symbols into a fresh buffer, `UNCALLABLE`-padding
    /// past the genome end. Convenience for the gapped scorers.
    fn fetch_window(&self, start: GenomeIndex, len: usize) -> Vec<u8> {
        let total = self.length();
        (0..len as u64)
            .map(|i| {
                let p = start + i;
                if p < total { self.base_at(p) } else { UNCALLABLE }
            })
            .collect()
    }
}

/// One reference sequence in the concatenated genome.
#[derive(Debug, Clone)]
pub struct Chromosome {
    pub name: String,
    /// Offset of the first base in the concatenated genome.
    pub offset: u64,
    /// Number of bases.
    pub length: u64,
}

/// In-memory reference: 2-bit packed bases plus coalesced ambiguous
/// regions. Ambiguous bases stay uncallable (words covering them are
/// invalid for indexing), so the packed payload for them is arbitrary.
pub struct PackedReference {
    packed: Vec<u8>,
    base_count: u64,
    chromosomes: Vec<Chromosome>,
    /// `(offset, run_length)` runs of uncallable bases, ascending.
    ambiguous: Vec<(u64, u64)>,
    color_space: bool,
}

impl PackedReference {
    pub fn new(color_space: bool) -> Self {
        PackedReference {
            packed: Vec::new(),
            base_count: 0,
            chromosomes: Vec::new(),
            ambiguous: Vec::new(),
            color_space,
        }
    }

    /// Build a single-chromosome reference from ASCII bases.
    pub fn from_bases(name: &str, sequence: &[u8], color_space: bool) -> Self {
        let mut r = PackedReference::new(color_space);
        r.add_chromosome(name, sequence);
        r
    }

    /// Append one chromosome of ASCII bases to the concatenated genome.
    pub fn add_chromosome(&mut self, name: &str, sequence: &[u8]) {
        let offset = self.base_count;
        for &b in sequence {
            let code = BASE_CODE[b as usize];
            if code > 3 {
                // Coalesce consecutive uncallables into one run.
                match self.ambiguous.last_mut() {
                    Some((start, len)) if *start + *len == self.base_count => *len += 1,
                    _ => self.ambiguous.push((self.base_count, 1)),
                }
                self.push_code(0);
            } else {
                self.push_code(code);
            }
        }
        self.chromosomes.push(Chromosome {
            name: name.to_string(),
            offset,
            length: self.base_count - offset,
        });
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    fn push_code(&mut self, code: u8) {
        let slot = (self.base_count / 4) as usize;
        let shift = ((self.base_count % 4) * 2) as u32;
        if slot == self.packed.len() {
            self.packed.push(0);
        }
        self.packed[slot] |= code << shift;
        self.base_count += 1;
    }

    fn is_ambiguous(&self, index: u64) -> bool {
        let i = self.ambiguous.partition_point(|&(off, _)| off <= index);
        if i == 0 {
            return false;
        }
        let (off, len) = self.ambiguous[i - 1];
        index < off + len
    }

    /// Base code at an absolute index, `UNCALLABLE` inside ambiguous runs.
    fn base_code(&self, index: u64) -> u8 {
        if index >= self.base_count || self.is_ambiguous(index) {
            return UNCALLABLE;
        }
        let byte = self.packed[(index / 4) as usize];
        (byte >> ((index % 4) * 2)) & 0x3
    }
}

impl ReferenceSequence for PackedReference {
    fn base_at(&self, index: GenomeIndex) -> u8 {
        if self.color_space {
            color_of(self.base_code(index), self.base_code(index + 1))
        } else {
            self.base_code(index)
        }
    }

    fn length(&self) -> u64 {
        if self.color_space {
            self.base_count.saturating_sub(1)
        } else {
            self.base_count
        }
    }

    fn chromosome_of(&self, index: GenomeIndex) -> Option<ChromosomeId> {
        if index >= self.length() {
            return None;
        }
        let i = self
            .chromosomes
            .partition_point(|c| c.offset <= index);
        i.checked_sub(1)
    }

    fn chromosome_start(&self, id: ChromosomeId) -> GenomeIndex {
        self.chromosomes[id].offset
    }

    fn chromosome_count(&self) -> usize {
        self.chromosomes.len()
    }

    fn is_color_space(&self) -> bool {
        self.color_space
    }
}
