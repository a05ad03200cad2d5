// Match results
//
// The scored outcome of mapping one read (or one read pair): position,
// orientation, mismatch count, the summed mismatch quality, and the
// posterior bookkeeping the map-quality derivation needs. The status
// carries the three sentinel outcomes (no candidate seen, ambiguous
// repeat, early stop), which are reportable results, never errors.
// Consumers must branch on `has_position()` before trusting position or
// strand.

use crate::cigar::{Cigar, CigarOp};
use crate::symbols::sum_quality_posterior;

/// Cap on the derived map quality.
pub const MAX_MAP_QUALITY: u8 = 100;

/// Terminal state of a single-read scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// No candidate was ever scored; position and strand are garbage.
    Unset,
    /// Scan ran to completion with a single best candidate.
    Unique,
    /// Scan ran to completion with ties at the best quality.
    Repeat,
    /// Stopped early: more than the allowed number of perfect
    /// duplicates. Ambiguous, like Repeat.
    EarlyStopDuplicates,
    /// Stopped early: the accumulated posterior passed the cutoff while
    /// the newest candidate alone also did. The best match stands.
    EarlyStopQuality,
}

impl MatchStatus {
    /// Whether a genome position was actually scored.
    pub fn has_position(&self) -> bool {
        !matches!(self, MatchStatus::Unset)
    }

    pub fn is_early_stop(&self) -> bool {
        matches!(
            self,
            MatchStatus::EarlyStopDuplicates | MatchStatus::EarlyStopQuality
        )
    }

    /// Whether the position is ambiguous among equals.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, MatchStatus::Repeat | MatchStatus::EarlyStopDuplicates)
    }
}

/// Scored single-end result.
#[derive(Debug, Clone)]
pub struct MatchedRead {
    pub status: MatchStatus,
    /// Leftmost genome position of the alignment. Only meaningful when
    /// `has_position()`.
    pub genome_position: u64,
    /// True when the forward orientation of the read matched.
    pub is_forward: bool,
    pub mismatch_count: u32,
    /// Summed phred quality of mismatching symbols, top-coded.
    pub sum_quality: u32,
    /// Number of candidates tied at the best quality.
    pub num_best: u32,
    /// Sum of posterior probabilities over every candidate scored.
    pub cumulative_posterior: f64,
    /// Whether the winning score came from the gapped pass.
    pub gapped: bool,
    /// Alignment path from gapped scoring; None means a full-length
    /// ungapped match.
    pub cigar: Option<Cigar>,
}

impl MatchedRead {
    pub fn unset() -> Self {
        MatchedRead {
            status: MatchStatus::Unset,
            genome_position: 0,
            is_forward: true,
            mismatch_count: 0,
            sum_quality: 0,
            num_best: 0,
            cumulative_posterior: 0.0,
            gapped: false,
            cigar: None,
        }
    }

    pub fn has_position(&self) -> bool {
        self.status.has_position()
    }

    /// Posterior probability of the winning candidate.
    pub fn posterior(&self) -> f64 {
        sum_quality_posterior(self.sum_quality)
    }

    /// Phred-scaled confidence that the reported position is the true
    /// origin: None when nothing was scored, zero for ambiguous
    /// outcomes, otherwise derived from the winner's share of the
    /// accumulated posterior and capped.
    pub fn map_quality(&self) -> Option<u8> {
        match self.status {
            MatchStatus::Unset => None,
            MatchStatus::Repeat | MatchStatus::EarlyStopDuplicates => Some(0),
            MatchStatus::Unique | MatchStatus::EarlyStopQuality => {
                let p = self.posterior();
                let cumulative = self.cumulative_posterior.max(p);
                let error = 1.0 - p / cumulative;
                if error < 1e-10 {
                    Some(MAX_MAP_QUALITY)
                } else {
                    let q = (-10.0 * error.log10()).round();
                    Some(q.clamp(0.0, MAX_MAP_QUALITY as f64) as u8)
                }
            }
        }
    }

    /// Alignment path for consumers: the gapped CIGAR when one exists,
    /// otherwise a single full-length match run.
    pub fn cigar_for(&self, read_len: usize) -> Cigar {
        match &self.cigar {
            Some(c) => c.clone(),
            None => {
                let mut c = Cigar::new();
                c.push(CigarOp::Match(read_len as u32));
                c
            }
        }
    }
}

/// Scored paired-end result. `pair_quality` is only present when both
/// mates were scored through a joint or rescued pairing.
#[derive(Debug, Clone)]
pub struct MatchedReadPe {
    pub first: MatchedRead,
    pub second: MatchedRead,
    /// Both mates placed concordantly by cross-matching, rescue, or
    /// single-end agreement; cleared again if either mate fails the
    /// final high-confidence mismatch recount.
    pub is_properly_paired: bool,
    /// Sum of both mates' sum qualities.
    pub pair_quality: Option<u32>,
    /// Sum of both mates' cumulative posteriors.
    pub pair_cumulative_posterior: f64,
}

impl MatchedReadPe {
    pub fn unpaired(first: MatchedRead, second: MatchedRead) -> Self {
        let pair_cumulative_posterior =
            first.cumulative_posterior + second.cumulative_posterior;
        MatchedReadPe {
            first,
            second,
            is_properly_paired: false,
            pair_quality: None,
            pair_cumulative_posterior,
        }
    }
}
