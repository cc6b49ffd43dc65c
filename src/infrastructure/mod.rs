//! Adapters implementing the ports `domain` defines: the Binance
//! futures clients (C3/C4/C5), the reusable circuit breaker and HTTP
//! client factory (C6), and push-based observability (C14).

pub mod binance;
pub mod core;
pub mod observability;
