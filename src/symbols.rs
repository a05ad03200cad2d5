// Symbol encoding
//
// 2-bit base codes (A=0, C=1, G=2, T=3), code 4 for anything uncallable.
// Also the phred decoding used by the scorers and the posterior
// probability table shared by single- and paired-end match selection.

use std::sync::OnceLock;

/// Code for an uncallable symbol (N in base space, '.' in color space).
pub const UNCALLABLE: u8 = 4;

/// Phred offset of ASCII-encoded quality strings.
pub const PHRED_OFFSET: u8 = 33;

/// Largest sum-of-mismatch-quality value the posterior table covers.
/// Candidates scoring past this are top-coded to it.
pub const MAX_SUM_QUALITY: u32 = 1023;

/// ASCII base -> 2-bit code. Everything that is not ACGT (either case)
/// maps to 4.
pub const BASE_CODE: [u8; 256] = {
    let mut t = [UNCALLABLE; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

/// 2-bit code -> ASCII base, code 4 -> 'N'.
pub const BASE_CHAR: [u8; 5] = [b'A', b'C', b'G', b'T', b'N'];

/// Complement of a 2-bit base code; uncallable stays uncallable.
#[inline]
pub fn complement(code: u8) -> u8 {
    if code < 4 { 3 - code } else { UNCALLABLE }
}

/// Decode an ASCII base string into 2-bit codes.
pub fn encode_bases(ascii: &[u8]) -> Vec<u8> {
    ascii.iter().map(|&b| BASE_CODE[b as usize]).collect()
}

/// Decode an ASCII quality string into phred values.
pub fn decode_qualities(ascii: &[u8]) -> Vec<u8> {
    ascii
        .iter()
        .map(|&q| q.saturating_sub(PHRED_OFFSET))
        .collect()
}

/// Orient a code sequence: forward is a copy, backward is the
/// reverse complement (base space) or plain reversal (color space,
/// where colors are strand-symmetric).
pub fn orient_codes(codes: &[u8], forward: bool, color_space: bool) -> Vec<u8> {
    if forward {
        codes.to_vec()
    } else if color_space {
        codes.iter().rev().copied().collect()
    } else {
        codes.iter().rev().map(|&c| complement(c)).collect()
    }
}

fn posterior_table() -> &'static [f64; MAX_SUM_QUALITY as usize + 1] {
    static TABLE: OnceLock<[f64; MAX_SUM_QUALITY as usize + 1]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0.0; MAX_SUM_QUALITY as usize + 1];
        for (q, slot) in t.iter_mut().enumerate() {
            *slot = 10f64.powf(-(q as f64) / 10.0);
        }
        t
    })
}

/// Posterior probability of a match given its summed mismatch quality:
/// 10^(-q/10), table-backed. Values past the table are top-coded.
#[inline]
pub fn sum_quality_posterior(sum_quality: u32) -> f64 {
    let q = sum_quality.min(MAX_SUM_QUALITY) as usize;
    posterior_table()[q]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_codes_round_trip() {
        for (i, &b) in [b'A', b'C', b'G', b'T'].iter().enumerate() {
            assert_eq!(BASE_CODE[b as usize], i as u8);
            assert_eq!(BASE_CHAR[i], b);
        }
        assert_eq!(BASE_CODE[b'N' as usize], UNCALLABLE);
        assert_eq!(BASE_CODE[b'x' as usize], UNCALLABLE);
    }

    #[test]
    fn complement_pairs() {
        assert_eq!(complement(0), 3); // A <-> T
        assert_eq!(complement(1), 2); // C <-> G
        assert_eq!(complement(UNCALLABLE), UNCALLABLE);
    }

    #[test]
    fn reverse_complement_orientation() {
        let codes = encode_bases(b"ACGTN");
        let rc = orient_codes(&codes, false, false);
        assert_eq!(rc, vec![UNCALLABLE, 0, 1, 2, 3]); // N ACGT
    }

    #[test]
    fn color_orientation_reverses_without_complement() {
        let colors = vec![0u8, 1, 2, 3];
        assert_eq!(orient_codes(&colors, false, true), vec![3, 2, 1, 0]);
    }

    #[test]
    fn posterior_matches_phred() {
        assert!((sum_quality_posterior(0) - 1.0).abs() < 1e-12);
        assert!((sum_quality_posterior(10) - 0.1).abs() < 1e-12);
        assert!((sum_quality_posterior(20) - 0.01).abs() < 1e-12);
        // Top-coding keeps out-of-range sums inside the table.
        assert_eq!(
            sum_quality_posterior(MAX_SUM_QUALITY + 500),
            sum_quality_posterior(MAX_SUM_QUALITY)
        );
    }

    #[test]
    fn quality_decoding_uses_phred_offset() {
        assert_eq!(decode_qualities(b"5"), vec![20]);
        assert_eq!(decode_qualities(b"!"), vec![0]);
    }
}
