// wordmap: word-index short-read aligner core.
//
// Builds a fixed-width word index (plus a secondary neighbor-keyed hash
// for high-repeat words) over a reference genome, then maps short reads
// against it: single-end best-match selection with posterior-probability
// scoring and early termination, and paired-end candidate cross-matching
// with a fallback ladder. Reference storage, FASTA/FASTQ parsing and
// SAM output live outside this crate; the reference is consumed through
// the ReferenceSequence trait only.

pub mod banded_sw; // bounded-band and local Smith-Waterman
pub mod cigar;
pub mod color; // SOLiD color-space transition algebra
pub mod config;
pub mod error;
pub mod mapper; // public map_single / map_pair API
pub mod matched_read;
pub mod paired_end;
pub mod read_indexer; // per-read word computation and scoring
pub mod reference;
pub mod single_end;
pub mod symbols;
pub mod word_hash; // secondary hash for over-cutoff words
pub mod word_index;

pub use config::MapperConfig;
pub use error::{IndexError, ReadError};
pub use mapper::Mapper;
pub use matched_read::{MatchStatus, MatchedRead, MatchedReadPe};
pub use paired_end::PairedEndMatcher;
pub use reference::{GenomeIndex, PackedReference, ReferenceSequence};
pub use single_end::SingleEndMatcher;
pub use word_index::IndexTables;
