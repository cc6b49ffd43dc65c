pub mod common;
pub mod execution;
pub mod market_data;
pub mod websocket;

pub use execution::BinanceExecutionClient;
pub use market_data::BinanceMarketDataClient;
pub use websocket::BinanceKlineStream;
