//! Benchmark-only crate; see `benches/`.

#![forbid(unsafe_code)]
