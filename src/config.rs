// Mapper configuration
//
// One flat options bag shared by index building and read mapping, with
// defaults and a validate() that reports every violation at once.

/// Configuration for index construction and read mapping.
///
/// `word_size` and `occurrence_cutoff` are baked into the index at build
/// time; the rest only affect mapping. A `Mapper` refuses to combine a
/// config with index tables built under different word parameters.
#[derive(Debug, Clone)]
pub struct MapperConfig {
    /// Symbols per index word. The composite keys of the secondary hash
    /// pack two words into 64 bits, so at most 15.
    pub word_size: u32,
    /// Words occurring more often than this are not stored in the
    /// primary index; lookups go through the secondary hash instead.
    pub occurrence_cutoff: u32,

    /// Expected sequencing error rate, used for the per-read mismatch
    /// budget.
    pub expected_error_rate: f64,
    /// Expected SNP rate, same use.
    pub expected_snp_rate: f64,

    /// Half-width of the genomic window used to cross-match paired-end
    /// candidates (twice the expected insert size).
    pub insert_size_filter_width: u32,

    /// Permit a gapped (banded Smith-Waterman) retry when ungapped
    /// scanning ends without a usable match.
    pub allow_gapped: bool,
    /// Skip the ungapped pass entirely and score gapped from the start.
    pub force_gapped: bool,
    /// Reference band half-width for gapped scoring and the local
    /// realignment fallback. Empirically tuned; kept configurable.
    pub realign_band: u32,
    /// Phred-scaled cost of opening a gap in gapped scoring.
    pub gap_open_quality: u32,
    /// Phred-scaled cost of each gapped symbol after the first.
    pub gap_extend_quality: u32,

    /// Candidate scanning stops early once the accumulated posterior
    /// probability and the newest candidate's own posterior both exceed
    /// this. Values above 1.0 disable early stopping.
    pub posterior_probability_cutoff: f64,

    /// Treat reads (and the reference) as SOLiD color space.
    pub color_space: bool,

    /// Seed for the per-read tie-break RNG streams. Each read's stream
    /// is derived from this plus the read ordinal, so batch results are
    /// reproducible regardless of worker scheduling.
    pub run_seed: u64,

    /// A paired result is re-checked against independent single-end
    /// mapping; the single-end result wins if its combined sum quality
    /// is better by at least this margin (phred-scaled; 20 is two
    /// orders of magnitude in probability). Empirically tuned.
    pub single_end_preference_margin: u32,
    /// A rescued mate is accepted only if its alignment uses at most
    /// this many CIGAR operations.
    pub max_rescue_cigar_ops: u32,
    /// Bases below this phred value are ignored by the final paired-end
    /// mismatch recount.
    pub min_confident_quality: u8,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            word_size: 15,
            occurrence_cutoff: 5000,

            expected_error_rate: 0.01,
            expected_snp_rate: 0.001,

            insert_size_filter_width: 1000,

            allow_gapped: true,
            force_gapped: false,
            realign_band: 16,
            gap_open_quality: 40,
            gap_extend_quality: 10,

            posterior_probability_cutoff: 0.90,

            color_space: false,

            run_seed: 11,

            single_end_preference_margin: 20,
            max_rescue_cigar_ops: 5,
            min_confident_quality: 20,
        }
    }
}

impl MapperConfig {
    /// Mismatch budget for a read of `read_len` symbols: scales with the
    /// expected error plus SNP rate, with additive slack so minimum-length
    /// two-word reads stay recoverable.
    pub fn mismatch_cutoff(&self, read_len: usize) -> u32 {
        let expected = (read_len as f64) * (self.expected_error_rate + self.expected_snp_rate);
        expected.ceil() as u32 + 3
    }

    /// Validate parameters for consistency. Returns every violation
    /// found, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(4..=15).contains(&self.word_size) {
            errors.push(format!(
                "word_size must be in [4, 15], got {}",
                self.word_size
            ));
        }
        if self.occurrence_cutoff < 1 {
            errors.push(format!(
                "occurrence_cutoff must be >= 1, got {}",
                self.occurrence_cutoff
            ));
        }
        if !(0.0..1.0).contains(&self.expected_error_rate) {
            errors.push(format!(
                "expected_error_rate must be in [0, 1), got {}",
                self.expected_error_rate
            ));
        }
        if !(0.0..1.0).contains(&self.expected_snp_rate) {
            errors.push(format!(
                "expected_snp_rate must be in [0, 1), got {}",
                self.expected_snp_rate
            ));
        }
        if self.insert_size_filter_width < 1 {
            errors.push(format!(
                "insert_size_filter_width must be >= 1, got {}",
                self.insert_size_filter_width
            ));
        }
        if self.posterior_probability_cutoff <= 0.0 {
            errors.push(format!(
                "posterior_probability_cutoff must be > 0, got {}",
                self.posterior_probability_cutoff
            ));
        }
        if self.realign_band < 1 {
            errors.push(format!(
                "realign_band must be >= 1, got {}",
                self.realign_band
            ));
        }
        if self.force_gapped && !self.allow_gapped {
            errors.push("force_gapped requires allow_gapped".to_string());
        }
        if self.max_rescue_cigar_ops < 1 {
            errors.push(format!(
                "max_rescue_cigar_ops must be >= 1, got {}",
                self.max_rescue_cigar_ops
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let cfg = MapperConfig::default();
        assert_eq!(cfg.word_size, 15, "default word size should be 15");
        assert_eq!(cfg.occurrence_cutoff, 5000, "default cutoff should be 5000");
        assert_eq!(cfg.single_end_preference_margin, 20);
        assert_eq!(cfg.max_rescue_cigar_ops, 5);
        assert!(cfg.allow_gapped && !cfg.force_gapped);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn mismatch_cutoff_scales_with_length() {
        let cfg = MapperConfig::default();
        let short = cfg.mismatch_cutoff(35);
        let long = cfg.mismatch_cutoff(250);
        assert!(short >= 3, "slack keeps short reads recoverable");
        assert!(long > short, "budget grows with read length");
    }

    #[test]
    fn validate_collects_all_violations() {
        let cfg = MapperConfig {
            word_size: 99,
            expected_error_rate: 2.0,
            posterior_probability_cutoff: 0.0,
            ..MapperConfig::default()
        };
        let errors = cfg.validate().unwrap_err();
        assert!(errors.len() >= 3, "expected every violation, got {errors:?}");
        assert!(errors.iter().any(|e| e.contains("word_size")));
    }

    #[test]
    fn force_gapped_requires_allow_gapped() {
        let cfg = MapperConfig {
            allow_gapped: false,
            force_gapped: true,
            ..MapperConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
