use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::FeedSettings;
use crate::error::FeedError;
use crate::types::{Candle, Interval, Symbol};

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Candle(Candle),
    Disconnected,
    Error(String),
}

/// Builder for a Binance kline subscription.
pub struct BinanceWebSocket {
    stream_base: String,
    streams: Vec<String>,
    reconnect_delay: Duration,
    channel_capacity: usize,
}

impl BinanceWebSocket {
    pub fn new(settings: &FeedSettings) -> Self {
        Self {
            stream_base: settings.stream_base.trim_end_matches('/').to_string(),
            streams: Vec::new(),
            reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
            channel_capacity: settings.channel_capacity.max(1),
        }
    }

    pub fn subscribe_kline(&mut self, symbol: &Symbol, interval: Interval) -> &mut Self {
        let stream = format!("{}@kline_{}", symbol.stream_name(), interval.as_str());
        self.streams.push(stream);
        self
    }

    /// `/ws/<stream>` for one stream, the combined endpoint otherwise.
    pub fn url(&self) -> Result<String, FeedError> {
        match self.streams.as_slice() {
            [] => Err(FeedError::NoStreams),
            [single] => Ok(format!("{}/ws/{}", self.stream_base, single)),
            many => Ok(format!("{}/stream?streams={}", self.stream_base, many.join("/"))),
        }
    }

    /// Spawns the connection task. It reconnects after `reconnect_delay`
    /// until the returned handle is stopped or the receiver is dropped.
    pub fn connect(self) -> Result<KlineStream, FeedError> {
        let url = self.url()?;
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let stopped = Arc::new(AtomicBool::new(false));
        let reconnect_delay = self.reconnect_delay;

        info!("Connecting to WebSocket: {}", url);

        let flag = stopped.clone();
        let task = tokio::spawn(async move {
            while !flag.load(Ordering::SeqCst) && !tx.is_closed() {
                match Self::run_connection(&url, &tx).await {
                    Ok(()) => {
                        warn!("WebSocket connection closed, reconnecting...");
                    }
                    Err(e) => {
                        error!("WebSocket error: {}, reconnecting...", e);
                        let _ = tx.send(MarketEvent::Error(e.to_string())).await;
                    }
                }

                if tx.send(MarketEvent::Disconnected).await.is_err() {
                    break;
                }
                tokio::time::sleep(reconnect_delay).await;
            }
            debug!("WebSocket task finished");
        });

        Ok(KlineStream {
            events: rx,
            handle: StreamHandle {
                stopped,
                task: Some(task),
            },
        })
    }

    async fn run_connection(url: &str, tx: &mpsc::Sender<MarketEvent>) -> Result<(), FeedError> {
        let (mut ws_stream, _) = connect_async(url).await?;
        info!("WebSocket connected");

        while let Some(msg) = ws_stream.next().await {
            match msg? {
                Message::Text(text) => match parse_message(&text) {
                    Ok(Some(candle)) => {
                        if tx.send(MarketEvent::Candle(candle)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => debug!("Ignoring non-kline message"),
                    Err(e) => warn!("Dropping malformed frame: {}", e),
                },
                Message::Ping(_) => debug!("Received ping"),
                Message::Close(_) => {
                    info!("WebSocket closed by server");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Receiving end of a subscription plus the handle that stops it.
pub struct KlineStream {
    pub events: mpsc::Receiver<MarketEvent>,
    pub handle: StreamHandle,
}

impl KlineStream {
    pub fn into_parts(self) -> (mpsc::Receiver<MarketEvent>, StreamHandle) {
        (self.events, self.handle)
    }
}

/// Stops the connection task. Safe to call any number of times; dropping
/// the handle stops the task as well.
pub struct StreamHandle {
    stopped: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            if let Some(task) = &self.task {
                task.abort();
            }
            info!("WebSocket stream stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Kline payload from either envelope. `Ok(None)` for anything that is
/// not a kline event (e.g. subscription acks).
pub fn parse_message(text: &str) -> Result<Option<Candle>, FeedError> {
    let mut value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FeedError::malformed("stream frame", e))?;

    // Combined streams wrap the event as {"stream": .., "data": ..}
    let combined = value.get("stream").is_some() && value.get("data").is_some();
    let payload = if combined { value["data"].take() } else { value };

    if payload.get("e").and_then(|e| e.as_str()) != Some("kline") {
        return Ok(None);
    }

    let msg: WsKlineMessage =
        serde_json::from_value(payload).map_err(|e| FeedError::malformed("kline event", e))?;
    msg.into_candle().map(Some)
}

impl WsKlineMessage {
    fn into_candle(self) -> Result<Candle, FeedError> {
        let symbol = Symbol::parse(&self.symbol)
            .ok_or_else(|| FeedError::malformed("kline event", format!("symbol {:?}", self.symbol)))?;
        let k = self.kline;
        let interval = Interval::parse(&k.interval)
            .ok_or_else(|| FeedError::malformed("kline event", format!("interval {:?}", k.interval)))?;

        Ok(Candle {
            symbol,
            interval,
            open_time: timestamp(k.start_time)?,
            close_time: timestamp(k.close_time)?,
            open: decimal(&k.open)?,
            high: decimal(&k.high)?,
            low: decimal(&k.low)?,
            close: decimal(&k.close)?,
            volume: decimal(&k.volume)?,
            is_final: k.is_closed,
        })
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FeedError::malformed("kline event", format!("timestamp {}", ms)))
}

fn decimal(raw: &str) -> Result<Decimal, FeedError> {
    Decimal::from_str(raw).map_err(|e| FeedError::malformed("kline event", format!("{:?}: {}", raw, e)))
}

// WebSocket Message Types
#[derive(Debug, Deserialize)]
struct WsKlineMessage {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKlineData,
}

#[derive(Debug, Deserialize)]
struct WsKlineData {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const KLINE: &str = r#"{
        "e": "kline", "E": 1700000012345, "s": "BTCUSDT",
        "k": {
            "t": 1700000000000, "T": 1700000059999, "s": "BTCUSDT", "i": "1m",
            "f": 100, "L": 200, "o": "37000.10", "c": "37010.55",
            "h": "37020.00", "l": "36990.00", "v": "12.5", "n": 101,
            "x": true, "q": "462000.0", "V": "6.0", "Q": "222000.0", "B": "0"
        }
    }"#;

    fn settings() -> FeedSettings {
        FeedSettings::default()
    }

    #[test]
    fn test_parse_single_stream_kline() {
        let candle = parse_message(KLINE).unwrap().unwrap();
        assert_eq!(candle.symbol.as_str(), "BTCUSDT");
        assert_eq!(candle.interval, Interval::M1);
        assert_eq!(candle.close, dec!(37010.55));
        assert_eq!(candle.open_time.timestamp_millis(), 1_700_000_000_000);
        assert!(candle.is_final);
    }

    #[test]
    fn test_parse_combined_stream_kline() {
        let text = format!(r#"{{"stream":"btcusdt@kline_1h","data":{}}}"#, KLINE.replace("\"1m\"", "\"1h\""));
        let candle = parse_message(&text).unwrap().unwrap();
        assert_eq!(candle.interval, Interval::H1);
    }

    #[test]
    fn test_non_kline_frames_are_ignored() {
        assert!(parse_message(r#"{"result":null,"id":1}"#).unwrap().is_none());
        assert!(parse_message(r#"{"e":"trade","s":"BTCUSDT"}"#).unwrap().is_none());
        assert!(parse_message(r#"{"stream":"btcusdt@trade","data":{"e":"trade","s":"BTCUSDT"}}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_kline_inside_combined_envelope() {
        let text = format!(
            r#"{{"stream":"btcusdt@kline_1m","data":{}}}"#,
            KLINE.replace("\"37010.55\"", "\"abc\"")
        );
        assert!(matches!(parse_message(&text), Err(FeedError::Malformed { .. })));
    }

    #[test]
    fn test_malformed_frames_are_errors() {
        assert!(parse_message("not json").is_err());
        let bad_price = KLINE.replace("\"37010.55\"", "\"abc\"");
        assert!(matches!(
            parse_message(&bad_price),
            Err(FeedError::Malformed { .. })
        ));
        let bad_interval = KLINE.replace("\"1m\"", "\"3d\"");
        assert!(parse_message(&bad_interval).is_err());
    }

    #[test]
    fn test_stream_urls() {
        let symbol = Symbol::default();
        let mut ws = BinanceWebSocket::new(&settings());
        assert!(matches!(ws.url(), Err(FeedError::NoStreams)));

        ws.subscribe_kline(&symbol, Interval::M1);
        assert_eq!(
            ws.url().unwrap(),
            "wss://stream.binance.com:9443/ws/btcusdt@kline_1m"
        );

        ws.subscribe_kline(&symbol, Interval::H1);
        assert_eq!(
            ws.url().unwrap(),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@kline_1m/btcusdt@kline_1h"
        );
    }

    #[test]
    fn test_connect_without_streams_fails() {
        let ws = BinanceWebSocket::new(&settings());
        assert!(matches!(ws.connect(), Err(FeedError::NoStreams)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let task = tokio::spawn(std::future::pending::<()>());
        let handle = StreamHandle {
            stopped: Arc::new(AtomicBool::new(false)),
            task: Some(task),
        };
        assert!(!handle.is_stopped());
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        drop(handle);
    }
}
