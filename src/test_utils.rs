/// Reads a numeric knob from the environment.
pub fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
}

fn is_ci() -> bool {
    std::env::var_os("CI").is_some()
}

/// Property-test case count: `PROPTEST_CASES` if set, the full default on
/// CI, and a handful locally so `cargo test` stays fast on big buffers.
///
/// The local cap is 8 rather than 4 because each case here checks every
/// reducer backend, and fewer cases rarely reach the SIMD tail lengths.
pub fn proptest_cases(default: u32) -> u32 {
    if let Some(value) = env_u32("PROPTEST_CASES") {
        return value.max(1);
    }
    if is_ci() {
        return default.max(1);
    }
    default.clamp(1, 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_runs_cap_case_count() {
        assert!(proptest_cases(0) >= 1);
        if env_u32("PROPTEST_CASES").is_none() && !is_ci() {
            assert_eq!(proptest_cases(64), 8);
            assert_eq!(proptest_cases(3), 3);
        }
    }
}
