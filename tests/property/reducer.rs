//! Property tests for chunk-independent byte reduction.

use proptest::prelude::*;

use bandwidth_rs::reduce::{reduce, reduce_scalar, Backend, VectorizedReducer};

fn every_reducer() -> Vec<VectorizedReducer> {
    Backend::available()
        .into_iter()
        .filter_map(VectorizedReducer::with_backend)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Summing two halves equals summing the whole, for any split point.
    #[test]
    fn split_sums_recombine(
        data in prop::collection::vec(any::<u8>(), 0..8192),
        split_frac in 0.0f64..=1.0,
    ) {
        let split = ((data.len() as f64) * split_frac) as usize;
        let (a, b) = data.split_at(split.min(data.len()));
        prop_assert_eq!(reduce(a).wrapping_add(reduce(b)), reduce(&data));
    }

    /// Any chunking of a buffer sums to the same total on every backend.
    #[test]
    fn arbitrary_chunking_is_invariant(
        data in prop::collection::vec(any::<u8>(), 1..16384),
        chunk in 1usize..1500,
    ) {
        let whole = reduce_scalar(&data);
        for r in every_reducer() {
            let chunked = data
                .chunks(chunk)
                .fold(0u64, |acc, c| acc.wrapping_add(r.reduce(c)));
            prop_assert_eq!(chunked, whole, "{} chunk={}", r.backend(), chunk);
        }
    }

    /// A constant buffer sums to `size * value` whether or not the size is a
    /// multiple of the lane width.
    #[test]
    fn constant_buffer_sum(size in 0usize..20_000, value in any::<u8>()) {
        let buf = vec![value; size];
        for r in every_reducer() {
            prop_assert_eq!(r.reduce(&buf), size as u64 * value as u64, "{}", r.backend());
        }
    }
}

#[test]
fn lane_multiple_and_tail_examples() {
    for r in every_reducer() {
        let width = r.lane_width();
        assert_eq!(r.reduce(&vec![7u8; width * 8]), (width * 8 * 7) as u64);
        assert_eq!(r.reduce(&[7u8; 100]), 700);
    }
}
