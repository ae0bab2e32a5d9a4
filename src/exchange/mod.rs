pub mod binance;
pub mod websocket;

pub use binance::*;
pub use websocket::*;

use async_trait::async_trait;

use crate::error::FeedError;
use crate::types::{Candle, Interval, Symbol};

/// Decimals shown when the exchange does not report a tick size.
pub const DEFAULT_DISPLAY_PRECISION: u32 = 2;

/// Historical market data needed to prime and refresh the model.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `limit` bars, oldest first. The newest bar may still be
    /// open (`is_final == false`).
    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, FeedError>;

    /// Decimal places used to display prices of `symbol`.
    async fn fetch_display_precision(&self, symbol: &Symbol) -> Result<u32, FeedError>;
}
