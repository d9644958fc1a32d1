//! Property tests tying the pattern generator to the reducer.

use proptest::prelude::*;

use bandwidth_rs::pattern::{
    expected_checksum, expected_range_checksum, fill, fill_at, PatternKind,
};
use bandwidth_rs::reduce::reduce;

fn any_pattern() -> impl Strategy<Value = PatternKind> {
    prop_oneof![any::<u8>().prop_map(PatternKind::Constant), Just(PatternKind::Ramp)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// A buffer filled in arbitrary chunks reduces to the analytic checksum.
    #[test]
    fn chunked_fill_reduces_to_expected(
        size in 0usize..50_000,
        chunk in 1usize..5000,
        pattern in any_pattern(),
    ) {
        let mut buf = vec![0u8; size];
        let mut offset = 0;
        while offset < size {
            let end = (offset + chunk).min(size);
            fill_at(&mut buf[offset..end], offset as u64, pattern);
            offset = end;
        }
        prop_assert_eq!(reduce(&buf), expected_checksum(size as u64, pattern));
    }

    /// Range checksums match a reduction of the same range.
    #[test]
    fn range_checksum_matches_reduction(
        start in 0usize..4000,
        len in 0usize..4000,
        pattern in any_pattern(),
    ) {
        let mut buf = vec![0u8; start + len];
        fill(&mut buf, pattern);
        prop_assert_eq!(
            reduce(&buf[start..]),
            expected_range_checksum(start as u64, len as u64, pattern)
        );
    }
}

#[test]
fn small_sizes_match_reduction() {
    for size in [0usize, 1, 4095, 4096] {
        let mut buf = vec![0u8; size];
        fill(&mut buf, PatternKind::Constant(1));
        assert_eq!(expected_checksum(size as u64, PatternKind::Constant(1)), size as u64);
        assert_eq!(reduce(&buf), size as u64);
    }
}

/// 10 GiB of constant-1 pattern, streamed through one reused chunk, reduces
/// to exactly the analytic checksum.
#[test]
fn ten_gib_streamed_matches_expected() {
    const TOTAL: u64 = 10 << 30;
    const CHUNK: usize = 64 << 20;
    let mut chunk = vec![0u8; CHUNK];
    fill(&mut chunk, PatternKind::Constant(1));

    let mut sum = 0u64;
    let mut done = 0u64;
    while done < TOTAL {
        let len = (TOTAL - done).min(CHUNK as u64) as usize;
        sum = sum.wrapping_add(reduce(&chunk[..len]));
        done += len as u64;
    }

    assert_eq!(sum, expected_checksum(TOTAL, PatternKind::Constant(1)));
    assert_eq!(sum, 10_737_418_240);
}
