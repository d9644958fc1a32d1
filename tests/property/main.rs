//! Property-based tests for the reducer and the pattern generator.
//!
//! Run with: `cargo test --test property`

mod pattern;
mod reducer;
