// Single-end matching
//
// Drives a read's candidate enumeration through the index tables and
// keeps the single best match: strict-best replacement, uniform
// reservoir tie-break, posterior accumulation, and the two early-stop
// rules. If the ungapped scan ends without a usable answer and gapped
// alignment is permitted, the whole scan reruns with gapped scoring.

use rand::rngs::StdRng;
use rand::Rng;
use std::ops::ControlFlow;

use crate::cigar::Cigar;
use crate::config::MapperConfig;
use crate::error::ReadError;
use crate::matched_read::{MatchStatus, MatchedRead};
use crate::read_indexer::ReadIndexer;
use crate::reference::ReferenceSequence;
use crate::symbols::{sum_quality_posterior, MAX_SUM_QUALITY};
use crate::word_index::IndexTables;

/// Ties at sum quality zero tolerated before the scan gives up on the
/// read as a duplicate-ridden repeat.
pub(crate) const MAX_DUPLICATE_BEST: u32 = 5;

/// One scored candidate offered to the tracker.
#[derive(Debug, Clone)]
pub(crate) struct ScoredCandidate {
    pub genome_position: u64,
    pub is_forward: bool,
    pub mismatch_count: u32,
    pub sum_quality: u32,
    pub gapped: bool,
    pub cigar: Option<Cigar>,
}

/// Best-match accumulator shared by the single- and paired-end drivers.
/// INIT is the freshly constructed state, SCANNING is every `offer`,
/// and a `Break` return is DONE.
pub(crate) struct BestTracker<'r> {
    rng: &'r mut StdRng,
    posterior_cutoff: f64,
    best: Option<ScoredCandidate>,
    num_best: u32,
    cumulative: f64,
    early_stop: Option<MatchStatus>,
}

impl<'r> BestTracker<'r> {
    pub fn new(posterior_cutoff: f64, rng: &'r mut StdRng) -> Self {
        BestTracker {
            rng,
            posterior_cutoff,
            best: None,
            num_best: 0,
            cumulative: 0.0,
            early_stop: None,
        }
    }

    pub fn any_candidate(&self) -> bool {
        self.best.is_some()
    }

    /// Offer one valid candidate. Break means the scan is DONE and no
    /// further candidates may be evaluated for this read.
    pub fn offer(&mut self, mut candidate: ScoredCandidate) -> ControlFlow<()> {
        candidate.sum_quality = candidate.sum_quality.min(MAX_SUM_QUALITY);
        let posterior = sum_quality_posterior(candidate.sum_quality);
        self.cumulative += posterior;

        match &self.best {
            None => {
                self.best = Some(candidate);
                self.num_best = 1;
            }
            Some(best) if candidate.sum_quality < best.sum_quality => {
                self.best = Some(candidate);
                self.num_best = 1;
            }
            Some(best) if candidate.sum_quality == best.sum_quality => {
                // Uniform tie-break: the k-th equal candidate wins with
                // probability 1/k.
                self.num_best += 1;
                if self.rng.gen_range(0..self.num_best) == 0 {
                    self.best = Some(candidate);
                }
            }
            _ => {}
        }

        let best_quality = self.best.as_ref().map(|b| b.sum_quality).unwrap_or(0);
        if best_quality == 0 && self.num_best > MAX_DUPLICATE_BEST {
            self.early_stop = Some(MatchStatus::EarlyStopDuplicates);
            return ControlFlow::Break(());
        }
        if self.cumulative > self.posterior_cutoff && posterior > self.posterior_cutoff {
            self.early_stop = Some(MatchStatus::EarlyStopQuality);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    pub fn finish(self) -> MatchedRead {
        let Some(best) = self.best else {
            return MatchedRead::unset();
        };
        let status = match self.early_stop {
            Some(s) => s,
            None if self.num_best > 1 => MatchStatus::Repeat,
            None => MatchStatus::Unique,
        };
        MatchedRead {
            status,
            genome_position: best.genome_position,
            is_forward: best.is_forward,
            mismatch_count: best.mismatch_count,
            sum_quality: best.sum_quality,
            num_best: self.num_best,
            cumulative_posterior: self.cumulative,
            gapped: best.gapped,
            cigar: best.cigar,
        }
    }
}

/// Single-end best-match selection over shared, immutable index tables.
pub struct SingleEndMatcher<'a, R: ReferenceSequence> {
    tables: &'a IndexTables,
    reference: &'a R,
    config: &'a MapperConfig,
}

impl<'a, R: ReferenceSequence> SingleEndMatcher<'a, R> {
    pub fn new(tables: &'a IndexTables, reference: &'a R, config: &'a MapperConfig) -> Self {
        SingleEndMatcher {
            tables,
            reference,
            config,
        }
    }

    /// Map one read. The RNG is this read's private tie-break stream;
    /// reusing the same seed reproduces the same answer.
    pub fn map_read(
        &self,
        read: &[u8],
        qual: &[u8],
        rng: &mut StdRng,
    ) -> Result<MatchedRead, ReadError> {
        let mut forward = ReadIndexer::forward(read, qual, self.config)?;
        let mut backward = ReadIndexer::reverse(read, qual, self.config)?;
        Ok(self.map_indexed(&mut forward, &mut backward, rng))
    }

    /// Map through caller-built indexers (the paired-end fallback paths
    /// reuse their existing indexers this way).
    pub(crate) fn map_indexed(
        &self,
        forward: &mut ReadIndexer,
        backward: &mut ReadIndexer,
        rng: &mut StdRng,
    ) -> MatchedRead {
        let gapped_first = self.config.force_gapped;
        let result = self.scan(forward, backward, gapped_first, rng);
        if !gapped_first
            && self.config.allow_gapped
            && matches!(result.status, MatchStatus::Unset | MatchStatus::Repeat)
        {
            // The checked-position sets must be cleared between the
            // ungapped and gapped attempts so candidates rescore.
            forward.clear_checked();
            backward.clear_checked();
            log::debug!("ungapped scan ended {:?}; retrying gapped", result.status);
            return self.scan(forward, backward, true, rng);
        }
        result
    }

    /// One full scan: both orientations with the exact/masked plan,
    /// then the edit-expanded plan only if nothing valid surfaced.
    fn scan(
        &self,
        forward: &mut ReadIndexer,
        backward: &mut ReadIndexer,
        gapped: bool,
        rng: &mut StdRng,
    ) -> MatchedRead {
        let mut tracker = BestTracker::new(self.config.posterior_probability_cutoff, rng);
        let mut flow = self.run(forward, false, gapped, &mut tracker);
        if flow.is_continue() {
            flow = self.run(backward, false, gapped, &mut tracker);
        }
        if flow.is_continue() && !tracker.any_candidate() {
            flow = self.run(forward, true, gapped, &mut tracker);
            if flow.is_continue() {
                let _ = self.run(backward, true, gapped, &mut tracker);
            }
        }
        tracker.finish()
    }

    /// Enumerate and score every candidate of one orientation.
    fn run(
        &self,
        indexer: &mut ReadIndexer,
        check_edits: bool,
        gapped: bool,
        tracker: &mut BestTracker<'_>,
    ) -> ControlFlow<()> {
        let genome_len = self.reference.length();
        let probes = indexer.probes(check_edits);
        for probe in &probes {
            let word_offset = indexer.words()[probe.slot].offset;
            let hits = indexer.resolve(self.tables, probe);
            for &hit in hits {
                let Some(start) = indexer.accept_candidate(hit, word_offset, genome_len) else {
                    continue;
                };
                let candidate = if gapped {
                    indexer
                        .gapped_sum_of_mismatch_quality(self.reference, start, self.config)
                        .map(|g| ScoredCandidate {
                            genome_position: g.genome_position,
                            is_forward: indexer.is_forward(),
                            mismatch_count: g.mismatch_count,
                            sum_quality: g.sum_quality,
                            gapped: true,
                            cigar: Some(g.cigar),
                        })
                } else {
                    indexer
                        .sum_of_mismatch_quality(self.reference, start)
                        .map(|(mismatches, sum)| ScoredCandidate {
                            genome_position: start,
                            is_forward: indexer.is_forward(),
                            mismatch_count: mismatches,
                            sum_quality: sum,
                            gapped: false,
                            cigar: None,
                        })
                };
                if let Some(c) = candidate {
                    if tracker.offer(c).is_break() {
                        return ControlFlow::Break(());
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }
}
