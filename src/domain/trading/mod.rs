//! Order-side primitives and symbol normalization, reused across the
//! exchange client and the runner.

pub mod types;
