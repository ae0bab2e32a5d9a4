use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{MarketData, DEFAULT_DISPLAY_PRECISION};
use crate::config::FeedSettings;
use crate::error::FeedError;
use crate::types::{Candle, Interval, Symbol};

/// Public (unsigned) Binance REST endpoints.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(settings: &FeedSettings) -> Result<Self, FeedError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.rest_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(&self, endpoint: &'static str, url: &str) -> Result<String, FeedError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(FeedError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MarketData for BinanceClient {
    async fn fetch_bars(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Candle>, FeedError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.as_str(),
            interval.as_str(),
            limit
        );
        let body = self.get_text("klines", &url).await?;
        let rows: Vec<Vec<serde_json::Value>> =
            serde_json::from_str(&body).map_err(|e| FeedError::malformed("klines", e))?;

        let candles = parse_klines(symbol, interval, &rows, Utc::now())?;
        debug!(
            symbol = %symbol,
            interval = %interval,
            count = candles.len(),
            "Fetched klines"
        );
        Ok(candles)
    }

    async fn fetch_display_precision(&self, symbol: &Symbol) -> Result<u32, FeedError> {
        let url = format!(
            "{}/api/v3/exchangeInfo?symbol={}",
            self.base_url,
            symbol.as_str()
        );
        let body = self.get_text("exchangeInfo", &url).await?;
        let info: ExchangeInfoResponse =
            serde_json::from_str(&body).map_err(|e| FeedError::malformed("exchangeInfo", e))?;
        precision_from_exchange_info(&info)
    }
}

/// Converts raw kline rows. A row whose close time is not in the past is
/// marked as still open. Any malformed row fails the whole batch.
pub fn parse_klines(
    symbol: &Symbol,
    interval: Interval,
    rows: &[Vec<serde_json::Value>],
    now: DateTime<Utc>,
) -> Result<Vec<Candle>, FeedError> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let open_time = millis_at(row, 0, index)?;
            let close_time = millis_at(row, 6, index)?;
            Ok(Candle {
                symbol: symbol.clone(),
                interval,
                open_time,
                close_time,
                open: decimal_at(row, 1, index)?,
                high: decimal_at(row, 2, index)?,
                low: decimal_at(row, 3, index)?,
                close: decimal_at(row, 4, index)?,
                volume: decimal_at(row, 5, index)?,
                is_final: close_time < now,
            })
        })
        .collect()
}

fn millis_at(
    row: &[serde_json::Value],
    column: usize,
    index: usize,
) -> Result<DateTime<Utc>, FeedError> {
    row.get(column)
        .and_then(|v| v.as_i64())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| {
            FeedError::malformed("kline row", format!("row {}: bad timestamp in column {}", index, column))
        })
}

fn decimal_at(row: &[serde_json::Value], column: usize, index: usize) -> Result<Decimal, FeedError> {
    let raw = row.get(column).and_then(|v| v.as_str()).ok_or_else(|| {
        FeedError::malformed("kline row", format!("row {}: missing column {}", index, column))
    })?;
    Decimal::from_str(raw).map_err(|e| {
        FeedError::malformed("kline row", format!("row {}: column {} {:?}: {}", index, column, raw, e))
    })
}

/// Number of significant decimals in the `PRICE_FILTER` tick size.
pub fn precision_from_exchange_info(info: &ExchangeInfoResponse) -> Result<u32, FeedError> {
    let tick = info
        .symbols
        .first()
        .and_then(|s| s.filters.iter().find(|f| f.filter_type == "PRICE_FILTER"))
        .and_then(|f| f.tick_size.as_deref());

    match tick {
        Some(raw) => tick_precision(raw),
        None => Ok(DEFAULT_DISPLAY_PRECISION),
    }
}

fn tick_precision(raw: &str) -> Result<u32, FeedError> {
    let tick = Decimal::from_str(raw).map_err(|e| FeedError::malformed("tickSize", e))?;
    Ok(tick.normalize().scale())
}

// API Response Types
#[derive(Debug, Deserialize)]
pub struct ExchangeInfoResponse {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
struct SymbolFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn row(open_ms: i64, close_ms: i64) -> Vec<serde_json::Value> {
        json!([
            open_ms,
            "64000.10000000",
            "64150.00000000",
            "63900.50000000",
            "64100.00000000",
            "12.34500000",
            close_ms,
            "790000.00",
            1200,
            "6.0",
            "384000.0",
            "0"
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_parse_klines_marks_open_bar() {
        let now = Utc.timestamp_millis_opt(7_000_000).unwrap();
        let rows = vec![row(0, 3_599_999), row(3_600_000, 7_199_999)];
        let candles = parse_klines(&Symbol::default(), Interval::H1, &rows, now).unwrap();

        assert_eq!(candles.len(), 2);
        assert!(candles[0].is_final);
        assert!(!candles[1].is_final);
        assert_eq!(candles[0].open, dec!(64000.1));
        assert_eq!(candles[0].low, dec!(63900.5));
        assert_eq!(candles[1].open_time.timestamp_millis(), 3_600_000);
        assert_eq!(candles[1].interval, Interval::H1);
    }

    #[test]
    fn test_parse_klines_rejects_whole_batch_on_bad_row() {
        let now = Utc::now();
        let mut bad = row(3_600_000, 7_199_999);
        bad[4] = json!("not-a-number");
        let rows = vec![row(0, 3_599_999), bad];

        let err = parse_klines(&Symbol::default(), Interval::H1, &rows, now).unwrap_err();
        assert!(matches!(err, FeedError::Malformed { .. }));
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn test_parse_klines_rejects_short_row() {
        let rows = vec![vec![json!(0), json!("1.0")]];
        assert!(parse_klines(&Symbol::default(), Interval::M1, &rows, Utc::now()).is_err());
    }

    #[test]
    fn test_precision_from_tick_size() {
        let info: ExchangeInfoResponse = serde_json::from_value(json!({
            "symbols": [{
                "symbol": "BTCUSDT",
                "filters": [
                    {"filterType": "LOT_SIZE", "stepSize": "0.00001000"},
                    {"filterType": "PRICE_FILTER", "tickSize": "0.01000000"}
                ]
            }]
        }))
        .unwrap();
        assert_eq!(precision_from_exchange_info(&info).unwrap(), 2);
    }

    #[test]
    fn test_precision_whole_and_fine_ticks() {
        assert_eq!(tick_precision("1.00000000").unwrap(), 0);
        assert_eq!(tick_precision("0.00010000").unwrap(), 4);
        assert_eq!(tick_precision("10").unwrap(), 0);
        assert!(tick_precision("abc").is_err());
    }

    #[test]
    fn test_precision_defaults_without_filter() {
        let info: ExchangeInfoResponse = serde_json::from_value(json!({ "symbols": [] })).unwrap();
        assert_eq!(precision_from_exchange_info(&info).unwrap(), DEFAULT_DISPLAY_PRECISION);

        let info: ExchangeInfoResponse =
            serde_json::from_value(json!({ "symbols": [{ "filters": [] }] })).unwrap();
        assert_eq!(precision_from_exchange_info(&info).unwrap(), DEFAULT_DISPLAY_PRECISION);
    }
}
