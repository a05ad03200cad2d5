// Mapper
//
// Top-level API: owns the reference, the immutable index tables and the
// configuration, and hands out per-read matchers. Batch helpers map
// reads in parallel with rayon; every read gets its own RNG stream
// derived from the run seed and the read ordinal, so results are
// reproducible regardless of worker scheduling.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;

use crate::config::MapperConfig;
use crate::error::{IndexError, ReadError};
use crate::matched_read::{MatchedRead, MatchedReadPe};
use crate::paired_end::PairedEndMatcher;
use crate::reference::ReferenceSequence;
use crate::single_end::SingleEndMatcher;
use crate::word_index::IndexTables;

/// 64-bit integer mix used to decorrelate per-read seed streams.
fn hash_64(mut key: u64) -> u64 {
    key = key.wrapping_add(!key.wrapping_shl(32));
    key ^= key.wrapping_shr(22);
    key = key.wrapping_add(!key.wrapping_shl(13));
    key ^= key.wrapping_shr(8);
    key = key.wrapping_add(key.wrapping_shl(3));
    key ^= key.wrapping_shr(15);
    key = key.wrapping_add(!key.wrapping_shl(27));
    key ^= key.wrapping_shr(31);
    key
}

/// Read mapper over a reference and its index tables. Query state is
/// per-call; a `Mapper` is safe to share across threads once built.
pub struct Mapper<R: ReferenceSequence> {
    reference: R,
    tables: IndexTables,
    config: MapperConfig,
}

impl<R: ReferenceSequence> Mapper<R> {
    /// Build the index tables from the reference and wrap them.
    pub fn from_reference(reference: R, config: MapperConfig) -> Result<Self, IndexError> {
        let tables = IndexTables::build(&reference, &config)?;
        log::info!(
            "mapper ready: word size {}, {} indexed positions, {} + {} hash keys",
            config.word_size,
            tables.words.total_positions(),
            tables.left.distinct_keys(),
            tables.right.distinct_keys()
        );
        Ok(Mapper {
            reference,
            tables,
            config,
        })
    }

    /// Wrap previously built (typically mmap-opened) tables. The tables
    /// must have been built under the same word parameters.
    pub fn with_tables(
        reference: R,
        tables: IndexTables,
        config: MapperConfig,
    ) -> Result<Self, IndexError> {
        config
            .validate()
            .map_err(|errors| IndexError::InvalidConfig(errors.join("; ")))?;
        if tables.word_size() != config.word_size {
            return Err(IndexError::ParameterMismatch(format!(
                "index word size {} != configured {}",
                tables.word_size(),
                config.word_size
            )));
        }
        if tables.words.occurrence_cutoff() != config.occurrence_cutoff {
            return Err(IndexError::ParameterMismatch(format!(
                "index occurrence cutoff {} != configured {}",
                tables.words.occurrence_cutoff(),
                config.occurrence_cutoff
            )));
        }
        Ok(Mapper {
            reference,
            tables,
            config,
        })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn tables(&self) -> &IndexTables {
        &self.tables
    }

    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// Serialize the index tables under a common path prefix.
    pub fn save_index(&self, prefix: &Path) -> Result<(), IndexError> {
        self.tables.save(prefix)
    }

    /// Private tie-break RNG stream for one read ordinal.
    fn read_rng(&self, ordinal: u64) -> StdRng {
        StdRng::seed_from_u64(self.config.run_seed ^ hash_64(ordinal))
    }

    /// Map a single read (ordinal 0's RNG stream).
    pub fn map_single(&self, read: &[u8], qual: &[u8]) -> Result<MatchedRead, ReadError> {
        self.map_single_at(0, read, qual)
    }

    /// Map a single read under the RNG stream of `ordinal` (its index
    /// within the batch/run).
    pub fn map_single_at(
        &self,
        ordinal: u64,
        read: &[u8],
        qual: &[u8],
    ) -> Result<MatchedRead, ReadError> {
        let matcher = SingleEndMatcher::new(&self.tables, &self.reference, &self.config);
        let mut rng = self.read_rng(ordinal);
        matcher.map_read(read, qual, &mut rng)
    }

    /// Map a read pair (ordinal 0's RNG stream).
    pub fn map_pair(
        &self,
        read1: &[u8],
        qual1: &[u8],
        read2: &[u8],
        qual2: &[u8],
    ) -> Result<MatchedReadPe, ReadError> {
        self.map_pair_at(0, read1, qual1, read2, qual2)
    }

    /// Map a read pair under the RNG stream of `ordinal`.
    pub fn map_pair_at(
        &self,
        ordinal: u64,
        read1: &[u8],
        qual1: &[u8],
        read2: &[u8],
        qual2: &[u8],
    ) -> Result<MatchedReadPe, ReadError> {
        let matcher = PairedEndMatcher::new(&self.tables, &self.reference, &self.config);
        let mut rng = self.read_rng(ordinal);
        matcher.map_pair(read1, qual1, read2, qual2, &mut rng)
    }
}

impl<R: ReferenceSequence + Sync> Mapper<R> {
    /// Map a batch of reads in parallel: one read per worker, each with
    /// its own matcher state and RNG stream. Rejected reads come back
    /// as errors in place; the batch never aborts.
    pub fn map_batch(&self, reads: &[(Vec<u8>, Vec<u8>)]) -> Vec<Result<MatchedRead, ReadError>> {
        reads
            .par_iter()
            .enumerate()
            .map(|(i, (read, qual))| self.map_single_at(i as u64, read, qual))
            .collect()
    }

    /// Paired batch variant of `map_batch`.
    #[allow(clippy::type_complexity)]
    pub fn map_pair_batch(
        &self,
        pairs: &[((Vec<u8>, Vec<u8>), (Vec<u8>, Vec<u8>))],
    ) -> Vec<Result<MatchedReadPe, ReadError>> {
        pairs
            .par_iter()
            .enumerate()
            .map(|(i, ((read1, qual1), (read2, qual2)))| {
                self.map_pair_at(i as u64, read1, qual1, read2, qual2)
            })
            .collect()
    }
}
