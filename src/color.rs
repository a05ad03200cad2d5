// Color space
//
// SOLiD-style reads encode transitions between adjacent bases rather than
// the bases themselves. This module holds the transition algebra: the
// 16-entry base-pair -> color table, SNP-consistent color-pair mutation
// enumeration (a real SNP changes two adjacent colors by the same
// amount; a lone changed color is a read error), and the post-alignment
// base resolution that turns an aligned color string back into base
// calls with adjusted qualities.

use crate::symbols::UNCALLABLE;

/// Base-pair -> color transition table, indexed by `(prev << 2) | next`.
/// The encoding is closed under XOR: `color(a, b) == a ^ b`, which is
/// what makes SNP-consistent enumeration a pair of XOR flips.
pub const COLOR_TRANSITION: [u8; 16] = [
    0, 1, 2, 3, // A followed by A,C,G,T
    1, 0, 3, 2, // C ..
    2, 3, 0, 1, // G ..
    3, 2, 1, 0, // T ..
];

/// Color between two adjacent base codes; uncallable if either is.
#[inline]
pub fn color_of(prev: u8, next: u8) -> u8 {
    if prev > 3 || next > 3 {
        UNCALLABLE
    } else {
        COLOR_TRANSITION[((prev << 2) | next) as usize]
    }
}

/// Next base implied by a base and the color leaving it.
#[inline]
pub fn next_base(base: u8, color: u8) -> u8 {
    if base > 3 || color > 3 {
        UNCALLABLE
    } else {
        base ^ color
    }
}

/// Decode an ASCII color read of the form `[primer base][colors...]`,
/// e.g. `T0123..`. Returns `(primer_code, color_codes)`; '.' and any
/// other non-digit color becomes uncallable.
pub fn decode_color_read(ascii: &[u8]) -> (u8, Vec<u8>) {
    if ascii.is_empty() {
        return (UNCALLABLE, Vec::new());
    }
    let primer = crate::symbols::BASE_CODE[ascii[0] as usize];
    let colors = ascii[1..]
        .iter()
        .map(|&c| match c {
            b'0'..=b'3' => c - b'0',
            _ => UNCALLABLE,
        })
        .collect();
    (primer, colors)
}

/// Translate a base-code slice into the colors between adjacent bases.
/// Output is one shorter than the input.
pub fn bases_to_colors(bases: &[u8]) -> Vec<u8> {
    bases
        .windows(2)
        .map(|w| color_of(w[0], w[1]))
        .collect()
}

/// Enumerate the SNP-consistent variants of a color pair: a single
/// base substitution between the two transitions shifts both colors by
/// the same XOR delta. Lone-color changes are deliberately absent; they
/// are read errors, not SNPs.
pub fn snp_color_pairs(c1: u8, c2: u8) -> [(u8, u8); 3] {
    [(c1 ^ 1, c2 ^ 1), (c1 ^ 2, c2 ^ 2), (c1 ^ 3, c2 ^ 3)]
}

/// One resolved base with its adjusted quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBase {
    pub base: u8,
    pub quality: u8,
}

/// Resolve an aligned color read against the reference bases it aligned
/// to. `ref_bases` must span `colors.len() + 1` positions starting at
/// the match coordinate. Policy, applied per run of consecutive color
/// mismatches:
///
/// - run of 1: read error; the base calls follow the reference and the
///   color's quality is charged to the flanking calls.
/// - run of 2 with equal XOR deltas: a real SNP; decode through.
/// - run of 2 with unequal deltas: ambiguous. Keep the transition whose
///   color has the higher quality; on a tie, follow the reference and
///   average the discrepancy into both neighboring qualities.
/// - longer runs: decode the read's own colors through (compound
///   variant), qualities passed through unchanged.
///
/// Returns one resolved base per reference position covered.
pub fn resolve_bases(colors: &[u8], qualities: &[u8], ref_bases: &[u8]) -> Vec<ResolvedBase> {
    debug_assert_eq!(colors.len(), qualities.len());
    debug_assert_eq!(ref_bases.len(), colors.len() + 1);

    let ref_colors = bases_to_colors(ref_bases);
    let n = colors.len();
    let mut out: Vec<ResolvedBase> = ref_bases
        .iter()
        .enumerate()
        .map(|(i, &b)| ResolvedBase {
            base: b,
            // Base call confidence starts as the min of the flanking
            // color qualities; ends carry their single neighbor.
            quality: match (i.checked_sub(1), i < n) {
                (Some(l), true) => qualities[l].min(qualities[i]),
                (Some(l), false) => qualities[l],
                (None, true) => qualities[0],
                (None, false) => 0,
            },
        })
        .collect();

    let mut i = 0;
    while i < n {
        let mismatch = colors[i] < 4 && ref_colors[i] < 4 && colors[i] != ref_colors[i];
        if !mismatch {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while j < n && colors[j] < 4 && ref_colors[j] < 4 && colors[j] != ref_colors[j] {
            j += 1;
        }
        let run = j - i;
        match run {
            1 => {
                // Lone anomaly: read error. Calls already follow the
                // reference; downgrade the two flanking calls.
                let q = qualities[i];
                out[i].quality = out[i].quality.saturating_sub(q / 2);
                out[i + 1].quality = out[i + 1].quality.saturating_sub(q / 2);
            }
            2 => {
                let d1 = colors[i] ^ ref_colors[i];
                let d2 = colors[i + 1] ^ ref_colors[i + 1];
                if d1 == d2 {
                    // Consistent two-color signature: SNP at the shared base.
                    out[i + 1].base = ref_bases[i + 1] ^ d1;
                    out[i + 1].quality = qualities[i].min(qualities[i + 1]);
                } else {
                    // Inconsistent pair: trust the higher-confidence color.
                    match qualities[i].cmp(&qualities[i + 1]) {
                        std::cmp::Ordering::Greater => {
                            out[i + 1].base = ref_bases[i + 1] ^ d1;
                            out[i + 1].quality =
                                qualities[i].saturating_sub(qualities[i + 1]);
                        }
                        std::cmp::Ordering::Less => {
                            out[i + 1].base = ref_bases[i + 1] ^ d2;
                            out[i + 1].quality =
                                qualities[i + 1].saturating_sub(qualities[i]);
                        }
                        std::cmp::Ordering::Equal => {
                            // Tie: follow the reference, spread the doubt.
                            let avg = ((qualities[i] as u16 + qualities[i + 1] as u16) / 2) as u8;
                            out[i].quality = out[i].quality.saturating_sub(avg / 2);
                            out[i + 2].quality = out[i + 2].quality.saturating_sub(avg / 2);
                            out[i + 1].quality = 0;
                        }
                    }
                }
            }
            _ => {
                // Compound variant: decode the read's own colors from the
                // last agreeing base.
                let mut base = out[i].base;
                for k in i..j {
                    base = next_base(base, colors[k]);
                    out[k + 1].base = base;
                    out[k + 1].quality = qualities[k];
                }
            }
        }
        i = j;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::encode_bases;

    #[test]
    fn transition_table_is_xor() {
        for a in 0u8..4 {
            for b in 0u8..4 {
                assert_eq!(color_of(a, b), a ^ b);
                assert_eq!(next_base(a, color_of(a, b)), b);
            }
        }
    }

    #[test]
    fn color_read_decoding() {
        let (primer, colors) = decode_color_read(b"T0123.");
        assert_eq!(primer, 3);
        assert_eq!(colors, vec![0, 1, 2, 3, UNCALLABLE]);
    }

    #[test]
    fn snp_pairs_preserve_consistency() {
        for (a, b) in snp_color_pairs(2, 1) {
            // Each variant differs from the original by the same delta on
            // both colors.
            assert_eq!(2 ^ a, 1 ^ b);
            assert_ne!((a, b), (2, 1));
        }
    }

    #[test]
    fn perfect_colors_resolve_to_reference() {
        let bases = encode_bases(b"ACGTAC");
        let colors = bases_to_colors(&bases);
        let quals = vec![30u8; colors.len()];
        let resolved = resolve_bases(&colors, &quals, &bases);
        for (r, &b) in resolved.iter().zip(&bases) {
            assert_eq!(r.base, b);
        }
    }

    #[test]
    fn lone_color_anomaly_is_corrected_to_reference() {
        let bases = encode_bases(b"ACGTAC");
        let mut colors = bases_to_colors(&bases);
        colors[2] ^= 1; // single color flip: sequencing error
        let quals = vec![30u8; colors.len()];
        let resolved = resolve_bases(&colors, &quals, &bases);
        for (r, &b) in resolved.iter().zip(&bases) {
            assert_eq!(r.base, b, "error color must not change base calls");
        }
        assert!(resolved[2].quality < 30, "flanking call quality drops");
    }

    #[test]
    fn consistent_pair_decodes_snp() {
        // Reference ACGTAC with a SNP at index 2 (G -> T, delta 1).
        let bases = encode_bases(b"ACGTAC");
        let mut snp = bases.clone();
        snp[2] ^= 1;
        let colors = bases_to_colors(&snp);
        let quals = vec![30u8; colors.len()];
        let resolved = resolve_bases(&colors, &quals, &bases);
        assert_eq!(resolved[2].base, snp[2], "SNP must decode through");
        assert_eq!(resolved[3].base, bases[3]);
    }

    #[test]
    fn inconsistent_pair_follows_higher_quality_color() {
        let bases = encode_bases(b"ACGTAC");
        let mut colors = bases_to_colors(&bases);
        colors[1] ^= 1;
        colors[2] ^= 2; // unequal deltas: not a clean SNP
        let mut quals = vec![30u8; colors.len()];
        quals[1] = 40; // first color wins
        let resolved = resolve_bases(&colors, &quals, &bases);
        assert_eq!(resolved[2].base, bases[2] ^ 1);
    }

    #[test]
    fn inconsistent_tie_averages_into_neighbors() {
        let bases = encode_bases(b"ACGTAC");
        let mut colors = bases_to_colors(&bases);
        colors[1] ^= 1;
        colors[2] ^= 2;
        let quals = vec![30u8; colors.len()];
        let resolved = resolve_bases(&colors, &quals, &bases);
        assert_eq!(resolved[2].base, bases[2], "tie keeps the reference call");
        assert_eq!(resolved[2].quality, 0);
        assert!(resolved[1].quality < 30 && resolved[3].quality < 30);
    }
}
