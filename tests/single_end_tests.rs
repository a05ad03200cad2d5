// Single-end mapping through the public API: the exact-match, mutated
// and masked scenarios, plus idempotence and rejection handling.

use wordmap::{MapperConfig, MatchStatus, Mapper, PackedReference, ReadError};

// PhiX-like prefix used by the canonical scenarios.
const REF_SEQ: &[u8] = b"GAGTTTTATCGCTTCCATGACGCAGAAGTTAACACTTTCGGATATTTCTGATGAGTCGAA";

fn config() -> MapperConfig {
    MapperConfig {
        word_size: 8,
        occurrence_cutoff: 100,
        ..MapperConfig::default()
    }
}

fn mapper() -> Mapper<PackedReference> {
    let reference = PackedReference::from_bases("phix", REF_SEQ, false);
    Mapper::from_reference(reference, config()).unwrap()
}

fn uniform_qual(len: usize) -> Vec<u8> {
    vec![b'5'; len] // phred 20 throughout
}

#[test]
fn exact_prefix_read_maps_to_position_zero() {
    let m = mapper();
    let read = b"GAGTTTTATCGCTTCCATGACGCAGAAGTTAACAC"; // exact 35-base prefix
    let matched = m.map_single(read, &uniform_qual(35)).unwrap();

    assert!(matched.has_position());
    assert_eq!(matched.genome_position, 0);
    assert!(matched.is_forward);
    assert_eq!(matched.mismatch_count, 0);
    assert_eq!(matched.sum_quality, 0);
    assert_eq!(
        matched.map_quality(),
        Some(wordmap::matched_read::MAX_MAP_QUALITY),
        "sole perfect match gets the top score"
    );
}

#[test]
fn flipped_base_still_maps_with_one_mismatch() {
    let m = mapper();
    let mut read = REF_SEQ[..35].to_vec();
    let original = read[20];
    read[20] = if original == b'A' { b'T' } else { b'A' };
    assert_ne!(read[20], original);

    let matched = m.map_single(&read, &uniform_qual(35)).unwrap();
    assert!(matched.has_position());
    assert_eq!(matched.genome_position, 0);
    assert!(matched.is_forward);
    assert_eq!(matched.mismatch_count, 1);
    assert_eq!(matched.sum_quality, 20, "the flipped base costs its phred");
    assert!(matched.map_quality().is_some());

    let exact = m.map_single(&REF_SEQ[..35], &uniform_qual(35)).unwrap();
    assert!(
        matched.sum_quality > exact.sum_quality,
        "mutated read scores strictly worse than the exact read"
    );
}

#[test]
fn reverse_complement_read_reports_backward_strand() {
    let m = mapper();
    let rc: Vec<u8> = REF_SEQ[12..44]
        .iter()
        .rev()
        .map(|&b| match b {
            b'A' => b'T',
            b'T' => b'A',
            b'C' => b'G',
            _ => b'C',
        })
        .collect();
    let matched = m.map_single(&rc, &uniform_qual(32)).unwrap();
    assert_eq!(matched.genome_position, 12);
    assert!(!matched.is_forward);
    assert_eq!(matched.mismatch_count, 0);
}

#[test]
fn masked_base_does_not_block_mapping() {
    let m = mapper();
    let mut read = REF_SEQ[..32].to_vec();
    read[5] = b'N';
    let matched = m.map_single(&read, &uniform_qual(32)).unwrap();
    assert_eq!(matched.genome_position, 0);
    assert_eq!(matched.mismatch_count, 0, "N is not evidence of mismatch");
}

#[test]
fn identical_calls_return_identical_results() {
    let m = mapper();
    let read = &REF_SEQ[7..42];
    let qual = uniform_qual(35);
    let first = m.map_single(read, &qual).unwrap();
    let second = m.map_single(read, &qual).unwrap();
    assert_eq!(first.genome_position, second.genome_position);
    assert_eq!(first.is_forward, second.is_forward);
    assert_eq!(first.status, second.status);
    assert_eq!(first.sum_quality, second.sum_quality);
    assert_eq!(first.num_best, second.num_best);
    assert_eq!(first.map_quality(), second.map_quality());
}

#[test]
fn mismatched_quality_length_is_a_rejection_not_a_result() {
    let m = mapper();
    let read = &REF_SEQ[..35];
    match m.map_single(read, &uniform_qual(34)) {
        Err(ReadError::LengthMismatch { read_len, qual_len }) => {
            assert_eq!(read_len, 35);
            assert_eq!(qual_len, 34);
        }
        other => panic!("expected LengthMismatch, got {other:?}"),
    }
}

#[test]
fn read_with_one_word_is_rejected() {
    let m = mapper();
    // 12 bases: a single 8-wide word plus remainder.
    let read = &REF_SEQ[..12];
    assert!(matches!(
        m.map_single(read, &uniform_qual(12)),
        Err(ReadError::TooFewWords { .. })
    ));
}

#[test]
fn foreign_read_comes_back_unset() {
    let reference = PackedReference::from_bases("phix", REF_SEQ, false);
    let m = Mapper::from_reference(
        reference,
        MapperConfig {
            allow_gapped: false,
            ..config()
        },
    )
    .unwrap();
    let read = b"CCCCCCCCGGGGGGGGCCCCCCCCGGGGGGGG";
    let matched = m.map_single(read, &uniform_qual(32)).unwrap();
    assert_eq!(matched.status, MatchStatus::Unset);
    assert!(!matched.has_position());
    assert_eq!(matched.map_quality(), None);
}

#[test]
fn deleted_base_is_recovered_by_the_gapped_retry() {
    let m = mapper();
    let mut read = REF_SEQ[..33].to_vec();
    read.remove(16); // 32 bases left, one reference base skipped
    let matched = m.map_single(&read, &uniform_qual(32)).unwrap();
    assert!(matched.has_position(), "gapped retry must place the read");
    assert_eq!(matched.genome_position, 0);
    assert!(matched.gapped);
    let cigar = matched.cigar.as_ref().expect("gapped match carries a CIGAR");
    assert!(cigar.to_string().contains('D'), "got {cigar}");
}
