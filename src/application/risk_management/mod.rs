//! Position sizing. The trailing-stop state machine lives in
//! `domain::trailing_stop` — it performs no I/O and is held directly by
//! `StrategyRuntimeState`.

pub mod sizing_engine;
