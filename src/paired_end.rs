// Paired-end matching
//
// Cross-matches the candidates of two mates inside a genomic window:
// the mate expected to enumerate more candidates is populated into a
// flat arena as disjoint sorted runs, the runs are merge-sorted through
// an index vector, and the other mate's candidates stream through a
// windowed binary search. Scoring on both sides is lazy: a candidate is
// never scored unless a partner sits within the filter window. When
// cross-matching fails, a fallback ladder runs: single-end re-check,
// anchored local realignment of the missing mate, or full single-end
// remapping of both.

use rand::rngs::StdRng;
use rand::Rng;
use std::ops::ControlFlow;

use crate::banded_sw::{local_window, SwScoring};
use crate::config::MapperConfig;
use crate::error::ReadError;
use crate::matched_read::{MatchStatus, MatchedRead, MatchedReadPe};
use crate::read_indexer::ReadIndexer;
use crate::reference::ReferenceSequence;
use crate::single_end::{SingleEndMatcher, MAX_DUPLICATE_BEST};
use crate::symbols::{orient_codes, sum_quality_posterior, MAX_SUM_QUALITY};
use crate::word_index::IndexTables;

/// Lazily-scored candidate in the arena. Positions come from the index
/// lookup; the score cell fills in only when a partner lands nearby.
#[derive(Debug, Clone, Copy)]
struct PairCandidate {
    genome_position: u64,
    is_forward: bool,
    score: ScoreCell,
}

#[derive(Debug, Clone, Copy)]
enum ScoreCell {
    Unscored,
    Invalid,
    Scored { mismatches: u32, sum_quality: u32 },
}

/// One mate's half of a jointly-scored pair.
#[derive(Debug, Clone, Copy)]
struct HalfMatch {
    genome_position: u64,
    is_forward: bool,
    mismatch_count: u32,
    sum_quality: u32,
}

impl HalfMatch {
    fn into_matched(self, status: MatchStatus, num_best: u32, cumulative: f64) -> MatchedRead {
        MatchedRead {
            status,
            genome_position: self.genome_position,
            is_forward: self.is_forward,
            mismatch_count: self.mismatch_count,
            sum_quality: self.sum_quality,
            num_best,
            cumulative_posterior: cumulative,
            gapped: false,
            cigar: None,
        }
    }
}

/// Joint best tracker: both mates' best fields replace atomically
/// together, under the same tie/early-stop policy as single-end. The
/// quality early stop requires BOTH mates' cumulative posteriors past
/// the cutoff.
struct PairTracker<'r> {
    rng: &'r mut StdRng,
    posterior_cutoff: f64,
    best: Option<(HalfMatch, HalfMatch)>,
    best_pair_quality: u32,
    num_best: u32,
    cumulative_streamed: f64,
    cumulative_buffered: f64,
    early_stop: Option<MatchStatus>,
}

impl<'r> PairTracker<'r> {
    fn new(posterior_cutoff: f64, rng: &'r mut StdRng) -> Self {
        PairTracker {
            rng,
            posterior_cutoff,
            best: None,
            best_pair_quality: 0,
            num_best: 0,
            cumulative_streamed: 0.0,
            cumulative_buffered: 0.0,
            early_stop: None,
        }
    }

    fn offer(&mut self, streamed: HalfMatch, buffered: HalfMatch) -> ControlFlow<()> {
        let pair_quality = streamed.sum_quality + buffered.sum_quality;
        let p_streamed = sum_quality_posterior(streamed.sum_quality);
        let p_buffered = sum_quality_posterior(buffered.sum_quality);
        self.cumulative_streamed += p_streamed;
        self.cumulative_buffered += p_buffered;

        match &self.best {
            None => {
                self.best = Some((streamed, buffered));
                self.best_pair_quality = pair_quality;
                self.num_best = 1;
            }
            Some(_) if pair_quality < self.best_pair_quality => {
                self.best = Some((streamed, buffered));
                self.best_pair_quality = pair_quality;
                self.num_best = 1;
            }
            Some(_) if pair_quality == self.best_pair_quality => {
                self.num_best += 1;
                if self.rng.gen_range(0..self.num_best) == 0 {
                    self.best = Some((streamed, buffered));
                }
            }
            _ => {}
        }

        if self.best_pair_quality == 0 && self.num_best > MAX_DUPLICATE_BEST {
            self.early_stop = Some(MatchStatus::EarlyStopDuplicates);
            return ControlFlow::Break(());
        }
        if self.cumulative_streamed > self.posterior_cutoff
            && self.cumulative_buffered > self.posterior_cutoff
            && p_streamed > self.posterior_cutoff
            && p_buffered > self.posterior_cutoff
        {
            self.early_stop = Some(MatchStatus::EarlyStopQuality);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// (streamed, buffered) results, or None when no pair was scored.
    fn finish(self) -> Option<(MatchedRead, MatchedRead)> {
        let (streamed, buffered) = self.best?;
        let status = match self.early_stop {
            Some(s) => s,
            None if self.num_best > 1 => MatchStatus::Repeat,
            None => MatchStatus::Unique,
        };
        Some((
            streamed.into_matched(status, self.num_best, self.cumulative_streamed),
            buffered.into_matched(status, self.num_best, self.cumulative_buffered),
        ))
    }
}

/// Merge-sort disjoint runs of arena indices by genome position.
/// Adjacent run pairs merge directly; larger spans split at the run
/// midpoint, recurse, and merge the halves in place.
fn merge_runs(arena: &[PairCandidate], order: &mut [u32], runs: &[(usize, usize)]) {
    if runs.len() <= 1 {
        return;
    }
    let mid = runs.len() / 2;
    merge_runs(arena, order, &runs[..mid]);
    merge_runs(arena, order, &runs[mid..]);
    let lo = runs[0].0;
    let split = runs[mid].0;
    let hi = runs[runs.len() - 1].1;
    inplace_merge(arena, order, lo, split, hi);
}

fn inplace_merge(arena: &[PairCandidate], order: &mut [u32], lo: usize, mid: usize, hi: usize) {
    if lo >= mid || mid >= hi {
        return;
    }
    let left: Vec<u32> = order[lo..mid].to_vec();
    let mut i = 0;
    let mut j = mid;
    let mut k = lo;
    while i < left.len() && j < hi {
        if arena[left[i] as usize].genome_position <= arena[order[j] as usize].genome_position {
            order[k] = left[i];
            i += 1;
        } else {
            order[k] = order[j];
            j += 1;
        }
        k += 1;
    }
    while i < left.len() {
        order[k] = left[i];
        i += 1;
        k += 1;
    }
}

/// Paired-end cross-matching over shared, immutable index tables.
pub struct PairedEndMatcher<'a, R: ReferenceSequence> {
    tables: &'a IndexTables,
    reference: &'a R,
    config: &'a MapperConfig,
}

impl<'a, R: ReferenceSequence> PairedEndMatcher<'a, R> {
    pub fn new(tables: &'a IndexTables, reference: &'a R, config: &'a MapperConfig) -> Self {
        PairedEndMatcher {
            tables,
            reference,
            config,
        }
    }

    /// Map a read pair. Both reads must pass per-read validation; the
    /// mapping itself never fails, it degrades through the fallback
    /// ladder and reports unpaired results in the worst case.
    pub fn map_pair(
        &self,
        read1: &[u8],
        qual1: &[u8],
        read2: &[u8],
        qual2: &[u8],
        rng: &mut StdRng,
    ) -> Result<MatchedReadPe, ReadError> {
        let mut fwd1 = ReadIndexer::forward(read1, qual1, self.config)?;
        let mut rev1 = ReadIndexer::reverse(read1, qual1, self.config)?;
        let mut fwd2 = ReadIndexer::forward(read2, qual2, self.config)?;
        let mut rev2 = ReadIndexer::reverse(read2, qual2, self.config)?;

        // Buffer the mate expected to enumerate more candidates; stream
        // the cheaper one through the window search.
        let estimate1 =
            fwd1.estimate_candidates(self.tables) + rev1.estimate_candidates(self.tables);
        let estimate2 =
            fwd2.estimate_candidates(self.tables) + rev2.estimate_candidates(self.tables);
        let first_buffered = estimate1 >= estimate2;
        log::debug!(
            "pair estimates: first={estimate1} second={estimate2}, buffering {}",
            if first_buffered { "first" } else { "second" }
        );

        let outcome = if first_buffered {
            self.cross_match(&mut fwd1, &mut rev1, &mut fwd2, &mut rev2, rng)
        } else {
            self.cross_match(&mut fwd2, &mut rev2, &mut fwd1, &mut rev1, rng)
        };

        let (mut first, mut second, mut paired) = match outcome {
            Some((streamed, buffered)) => {
                if first_buffered {
                    (buffered, streamed, true)
                } else {
                    (streamed, buffered, true)
                }
            }
            None => (MatchedRead::unset(), MatchedRead::unset(), false),
        };

        let cutoff1 = fwd1.mismatch_cutoff();
        let cutoff2 = fwd2.mismatch_cutoff();
        let good1 = first.has_position() && first.mismatch_count <= cutoff1;
        let good2 = second.has_position() && second.mismatch_count <= cutoff2;

        let single = SingleEndMatcher::new(self.tables, self.reference, self.config);

        if good1 && good2 {
            // Low-score re-check: a poor pair may be beaten by the mates
            // mapped independently.
            let pair_quality = first.sum_quality + second.sum_quality;
            if pair_quality > self.config.single_end_preference_margin {
                fwd1.clear_checked();
                rev1.clear_checked();
                fwd2.clear_checked();
                rev2.clear_checked();
                let se1 = single.map_indexed(&mut fwd1, &mut rev1, rng);
                let se2 = single.map_indexed(&mut fwd2, &mut rev2, rng);
                if se1.has_position() && se2.has_position() {
                    let combined = se1.sum_quality + se2.sum_quality;
                    if combined + self.config.single_end_preference_margin <= pair_quality {
                        log::debug!(
                            "single-end remap beats pair by margin ({combined} + {} <= {pair_quality})",
                            self.config.single_end_preference_margin
                        );
                        first = se1;
                        second = se2;
                        paired = false;
                    }
                }
            }
        } else if good1 && !good2 {
            if let Some(rescued) = self.rescue_mate(&first, fwd1.len(), &fwd2) {
                second = rescued;
                paired = true;
            } else {
                paired = false;
            }
        } else if good2 && !good1 {
            if let Some(rescued) = self.rescue_mate(&second, fwd2.len(), &fwd1) {
                first = rescued;
                paired = true;
            } else {
                paired = false;
            }
        } else {
            // Neither mate survived indexing: remap both independently,
            // then realign whichever still failed around the other.
            fwd1.clear_checked();
            rev1.clear_checked();
            fwd2.clear_checked();
            rev2.clear_checked();
            first = single.map_indexed(&mut fwd1, &mut rev1, rng);
            second = single.map_indexed(&mut fwd2, &mut rev2, rng);
            let se_good1 = first.has_position() && first.mismatch_count <= cutoff1;
            let se_good2 = second.has_position() && second.mismatch_count <= cutoff2;
            paired = match (se_good1, se_good2) {
                (true, false) => {
                    if let Some(rescued) = self.rescue_mate(&first, fwd1.len(), &fwd2) {
                        second = rescued;
                        true
                    } else {
                        false
                    }
                }
                (false, true) => {
                    if let Some(rescued) = self.rescue_mate(&second, fwd2.len(), &fwd1) {
                        first = rescued;
                        true
                    } else {
                        false
                    }
                }
                (true, true) => self.concordant(&first, &second),
                (false, false) => false,
            };
        }

        // Final check: recount mismatches over high-confidence bases
        // only; a mate past its cutoff demotes the whole pair.
        if paired {
            let confident1 = self.confident_mismatches(&first, &fwd1, &rev1);
            let confident2 = self.confident_mismatches(&second, &fwd2, &rev2);
            if confident1 > cutoff1 || confident2 > cutoff2 {
                log::debug!(
                    "pair demoted: confident mismatches {confident1}/{cutoff1}, {confident2}/{cutoff2}"
                );
                paired = false;
            }
        }

        let pair_quality = if paired && first.has_position() && second.has_position() {
            Some(first.sum_quality + second.sum_quality)
        } else {
            None
        };
        let pair_cumulative_posterior =
            first.cumulative_posterior + second.cumulative_posterior;
        Ok(MatchedReadPe {
            first,
            second,
            is_properly_paired: paired && pair_quality.is_some(),
            pair_quality,
            pair_cumulative_posterior,
        })
    }

    /// Steps 1-3: populate the buffered mate's candidates as sorted
    /// runs, merge, then stream the other mate through the window.
    fn cross_match(
        &self,
        buf_fwd: &mut ReadIndexer,
        buf_rev: &mut ReadIndexer,
        str_fwd: &mut ReadIndexer,
        str_rev: &mut ReadIndexer,
        rng: &mut StdRng,
    ) -> Option<(MatchedRead, MatchedRead)> {
        let genome_len = self.reference.length();
        let mut arena: Vec<PairCandidate> = Vec::new();
        let mut runs: Vec<(usize, usize)> = Vec::new();

        for indexer in [&mut *buf_fwd, &mut *buf_rev] {
            let probes = indexer.probes(false);
            for probe in &probes {
                let run_start = arena.len();
                let word_offset = indexer.words()[probe.slot].offset;
                let hits = indexer.resolve(self.tables, probe);
                for &hit in hits {
                    if let Some(start) = indexer.accept_candidate(hit, word_offset, genome_len) {
                        arena.push(PairCandidate {
                            genome_position: start,
                            is_forward: indexer.is_forward(),
                            score: ScoreCell::Unscored,
                        });
                    }
                }
                if arena.len() > run_start {
                    runs.push((run_start, arena.len()));
                }
            }
        }
        if arena.is_empty() {
            return None;
        }

        let mut order: Vec<u32> = (0..arena.len() as u32).collect();
        merge_runs(&arena, &mut order, &runs);
        debug_assert!(order
            .windows(2)
            .all(|w| arena[w[0] as usize].genome_position <= arena[w[1] as usize].genome_position));

        let width = self.config.insert_size_filter_width as u64;
        let mut tracker = PairTracker::new(self.config.posterior_probability_cutoff, rng);

        'stream: for indexer in [&mut *str_fwd, &mut *str_rev] {
            let probes = indexer.probes(false);
            for probe in &probes {
                let word_offset = indexer.words()[probe.slot].offset;
                let hits = indexer.resolve(self.tables, probe);
                for &hit in hits {
                    let Some(start) = indexer.accept_candidate(hit, word_offset, genome_len)
                    else {
                        continue;
                    };
                    let window_lo = start.saturating_sub(width);
                    let window_hi = start.saturating_add(width);
                    let lo = order.partition_point(|&oi| {
                        arena[oi as usize].genome_position < window_lo
                    });
                    let hi = lo
                        + order[lo..].partition_point(|&oi| {
                            arena[oi as usize].genome_position <= window_hi
                        });
                    if lo == hi {
                        continue; // nobody nearby: never score this candidate
                    }
                    let Some((mismatches, sum_quality)) =
                        indexer.sum_of_mismatch_quality(self.reference, start)
                    else {
                        continue;
                    };
                    if sum_quality >= MAX_SUM_QUALITY {
                        continue;
                    }
                    let streamed = HalfMatch {
                        genome_position: start,
                        is_forward: indexer.is_forward(),
                        mismatch_count: mismatches,
                        sum_quality,
                    };
                    for k in lo..hi {
                        let idx = order[k] as usize;
                        let Some(buffered) =
                            self.score_buffered(&mut arena, idx, buf_fwd, buf_rev)
                        else {
                            continue;
                        };
                        if buffered.sum_quality >= MAX_SUM_QUALITY {
                            continue;
                        }
                        if tracker.offer(streamed, buffered).is_break() {
                            break 'stream;
                        }
                    }
                }
            }
        }
        tracker.finish()
    }

    /// Lazy scoring of one arena candidate, memoized in its score cell.
    fn score_buffered(
        &self,
        arena: &mut [PairCandidate],
        idx: usize,
        buf_fwd: &ReadIndexer,
        buf_rev: &ReadIndexer,
    ) -> Option<HalfMatch> {
        let candidate = arena[idx];
        let scored = match candidate.score {
            ScoreCell::Scored {
                mismatches,
                sum_quality,
            } => Some((mismatches, sum_quality)),
            ScoreCell::Invalid => None,
            ScoreCell::Unscored => {
                let indexer = if candidate.is_forward {
                    buf_fwd
                } else {
                    buf_rev
                };
                let scored =
                    indexer.sum_of_mismatch_quality(self.reference, candidate.genome_position);
                arena[idx].score = match scored {
                    Some((mismatches, sum_quality)) => ScoreCell::Scored {
                        mismatches,
                        sum_quality,
                    },
                    None => ScoreCell::Invalid,
                };
                scored
            }
        };
        scored.map(|(mismatches, sum_quality)| HalfMatch {
            genome_position: candidate.genome_position,
            is_forward: candidate.is_forward,
            mismatch_count: mismatches,
            sum_quality,
        })
    }

    /// Anchored local realignment of a mate that indexing could not
    /// place. The mate is oriented opposite the anchor's strand and
    /// aligned inside a window of filter width plus both read lengths
    /// on the anchor's 3' side. Accepted only when the alignment stays
    /// compact and consumes the whole read.
    fn rescue_mate(
        &self,
        anchor: &MatchedRead,
        anchor_len: usize,
        mate_forward_indexer: &ReadIndexer,
    ) -> Option<MatchedRead> {
        let genome_len = self.reference.length();
        let mate_forward = !anchor.is_forward;
        let codes = orient_codes(
            mate_forward_indexer.oriented_seq(),
            mate_forward,
            self.config.color_space,
        );
        let quals: Vec<u8> = if mate_forward {
            mate_forward_indexer.oriented_quals().to_vec()
        } else {
            mate_forward_indexer
                .oriented_quals()
                .iter()
                .rev()
                .copied()
                .collect()
        };

        let window_size =
            self.config.insert_size_filter_width as u64 + anchor_len as u64 + codes.len() as u64;
        let (window_start, window_end) = if anchor.is_forward {
            let start = anchor.genome_position;
            (start, (start + window_size).min(genome_len))
        } else {
            let end = (anchor.genome_position + anchor_len as u64).min(genome_len);
            (end.saturating_sub(window_size), end)
        };
        if window_end <= window_start {
            return None;
        }
        let window = self
            .reference
            .fetch_window(window_start, (window_end - window_start) as usize);

        let alignment = local_window(&codes, &quals, &window, &SwScoring::default())?;
        if alignment.cigar.op_count() > self.config.max_rescue_cigar_ops as usize {
            return None;
        }
        if alignment.query_start != 0 || alignment.query_end != codes.len() {
            return None;
        }

        log::debug!(
            "rescued mate at {} ({} ops, {} mismatches)",
            window_start + alignment.ref_start as u64,
            alignment.cigar.op_count(),
            alignment.mismatch_count
        );
        Some(MatchedRead {
            status: MatchStatus::Unique,
            genome_position: window_start + alignment.ref_start as u64,
            is_forward: mate_forward,
            mismatch_count: alignment.mismatch_count,
            sum_quality: alignment.sum_quality,
            num_best: 1,
            cumulative_posterior: sum_quality_posterior(alignment.sum_quality),
            gapped: true,
            cigar: Some(alignment.cigar),
        })
    }

    /// Opposite strands within the filter window.
    fn concordant(&self, first: &MatchedRead, second: &MatchedRead) -> bool {
        if first.is_forward == second.is_forward {
            return false;
        }
        let distance = first.genome_position.abs_diff(second.genome_position);
        distance <= self.config.insert_size_filter_width as u64
    }

    /// Mismatches at the final position counting only bases at or above
    /// the confidence floor.
    fn confident_mismatches(
        &self,
        matched: &MatchedRead,
        fwd: &ReadIndexer,
        rev: &ReadIndexer,
    ) -> u32 {
        if !matched.has_position() {
            return 0;
        }
        let indexer = if matched.is_forward { fwd } else { rev };
        let mut count = 0;
        for (i, (&s, &q)) in indexer
            .oriented_seq()
            .iter()
            .zip(indexer.oriented_quals())
            .enumerate()
        {
            if q < self.config.min_confident_quality {
                continue;
            }
            let r = self.reference.base_at(matched.genome_position + i as u64);
            if s < 4 && r < 4 && s != r {
                count += 1;
            }
        }
        count
    }
}
