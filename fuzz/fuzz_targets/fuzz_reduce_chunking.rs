#![no_main]

use bandwidth_rs::pattern::{expected_range_checksum, fill_at, PatternKind};
use bandwidth_rs::reduce::{reduce_scalar, Backend, VectorizedReducer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    // Seed controls the chunk plan; the rest is the input.
    let (seed_bytes, buf) = data.split_at(8);
    let seed = u64::from_le_bytes(seed_bytes.try_into().unwrap());
    let oracle = reduce_scalar(buf);

    const SIZES: &[usize] = &[1, 2, 3, 7, 15, 16, 17, 31, 32, 33, 63, 64, 65, 127, 128, 4096];
    let pick = |shift: u32| -> usize { SIZES[((seed >> shift) as usize) % SIZES.len()] };

    for backend in Backend::available() {
        let Some(reducer) = VectorizedReducer::with_backend(backend) else {
            continue;
        };
        let reducer = reducer.with_prefetch(seed & 1 == 1);

        // Alternate between two chunk sizes so chunk boundaries land at every
        // lane offset.
        let (a, b) = (pick(1), pick(9));
        let mut sum = 0u64;
        let mut pos = 0usize;
        let mut flip = false;
        while pos < buf.len() {
            let len = if flip { b } else { a }.min(buf.len() - pos);
            sum = sum.wrapping_add(reducer.reduce(&buf[pos..pos + len]));
            pos += len;
            flip = !flip;
        }
        assert_eq!(sum, oracle, "backend={backend} chunks=({a},{b})");
    }

    // The ramp pattern at an arbitrary offset reduces to its range checksum.
    let offset = seed >> 16;
    let mut ramp = vec![0u8; buf.len()];
    fill_at(&mut ramp, offset, PatternKind::Ramp);
    assert_eq!(
        reduce_scalar(&ramp),
        expected_range_checksum(offset, ramp.len() as u64, PatternKind::Ramp)
    );
});
