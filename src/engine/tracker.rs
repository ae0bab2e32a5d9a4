use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{FeedSettings, Settings};
use crate::error::TrackerError;
use crate::exchange::{MarketData, MarketEvent};
use crate::model::{HourlyModel, Prediction};
use crate::types::{Candle, Interval, Symbol};

/// One model per tracked symbol, guarded by a single lock.
pub type SharedModel = Arc<RwLock<HourlyModel>>;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Derived statistics for status display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub symbol: Symbol,
    pub prior_up: f64,
    pub p_up_given_up: f64,
    pub p_up_given_down: f64,
    pub atr: Option<f64>,
    pub last_closed_hour_dir: i8,
    pub hour_open: Option<f64>,
    pub minutes: usize,
    pub hourly_bars: usize,
}

impl ModelStatus {
    pub fn of(symbol: &Symbol, model: &HourlyModel) -> Self {
        Self {
            symbol: symbol.clone(),
            prior_up: model.prior_up(),
            p_up_given_up: model.p_up_given_up(),
            p_up_given_down: model.p_up_given_down(),
            atr: model.atr(),
            last_closed_hour_dir: model.last_closed_hour_dir(),
            hour_open: model.hour_open(),
            minutes: model.minute_len(),
            hourly_bars: model.hourly_len(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackerUpdate {
    Prediction {
        prediction: Prediction,
        price: Option<f64>,
        status: ModelStatus,
        at: DateTime<Utc>,
    },
    /// Live price from a minute that has not closed yet.
    Price { price: f64, at: DateTime<Utc> },
    HourRefreshed(ModelStatus),
    FeedError(String),
    Disconnected,
}

/// Feeds market events into the model one at a time and publishes the
/// resulting predictions.
pub struct DirectionTracker {
    symbol: Symbol,
    market: Arc<dyn MarketData>,
    settings: Settings,
    model: SharedModel,
    updates: broadcast::Sender<TrackerUpdate>,
    last_minute_open: Option<DateTime<Utc>>,
    hour_open_time: Option<DateTime<Utc>>,
}

impl DirectionTracker {
    pub fn new(symbol: Symbol, market: Arc<dyn MarketData>, settings: Settings) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let model = Arc::new(RwLock::new(HourlyModel::new(settings.model.clone())));
        Self {
            symbol,
            market,
            settings,
            model,
            updates,
            last_minute_open: None,
            hour_open_time: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn model(&self) -> SharedModel {
        self.model.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerUpdate> {
        self.updates.subscribe()
    }

    pub fn threshold(&self) -> f64 {
        self.settings.tracker.confidence_threshold
    }

    fn feed(&self) -> &FeedSettings {
        &self.settings.feed
    }

    /// Primes a fresh model from REST history and swaps it in. On any
    /// failure the current model is kept, so `start` can simply be retried.
    pub async fn start(&mut self) -> Result<Prediction, TrackerError> {
        let hourly = self
            .market
            .fetch_bars(&self.symbol, Interval::H1, self.feed().hourly_limit)
            .await?;
        let minutes = self
            .market
            .fetch_bars(&self.symbol, Interval::M1, self.feed().minute_backfill)
            .await?;

        let mut model = HourlyModel::new(self.settings.model.clone());
        let (closed, open_bar) = split_open_bar(&hourly);
        model.load_hourly(closed)?;

        let hour_open = match open_bar {
            Some(bar) => Some((bar.open_time, bar.open_f64())),
            None => closed.last().map(|bar| (bar.close_time, bar.close_f64())),
        };
        if let Some((_, price)) = hour_open {
            model.set_hour_open(price)?;
        }

        let mut last_minute_open = None;
        for bar in minutes.iter().filter(|bar| bar.is_final) {
            model.push_minute(bar.close_f64())?;
            last_minute_open = Some(bar.open_time);
        }

        let prediction = model.predict(self.threshold());
        let status = ModelStatus::of(&self.symbol, &model);
        *self.model.write().await = model;
        self.hour_open_time = hour_open.map(|(time, _)| time);
        self.last_minute_open = last_minute_open;

        info!(
            symbol = %self.symbol,
            hourly_bars = status.hourly_bars,
            minutes = status.minutes,
            prior_up = status.prior_up,
            "Tracker primed"
        );
        self.publish(TrackerUpdate::Prediction {
            prediction: prediction.clone(),
            price: minutes.last().map(Candle::close_f64),
            status,
            at: Utc::now(),
        });
        Ok(prediction)
    }

    pub async fn handle(&mut self, event: MarketEvent) {
        match event {
            MarketEvent::Candle(candle) if candle.symbol != self.symbol => {
                debug!(symbol = %candle.symbol, "Ignoring candle for another symbol");
            }
            MarketEvent::Candle(candle) => match candle.interval {
                Interval::M1 => self.on_minute(candle).await,
                Interval::H1 => self.on_hour(candle).await,
            },
            MarketEvent::Disconnected => {
                warn!(symbol = %self.symbol, "Market stream disconnected");
                self.publish(TrackerUpdate::Disconnected);
            }
            MarketEvent::Error(message) => {
                warn!(symbol = %self.symbol, "Market stream error: {}", message);
                self.publish(TrackerUpdate::FeedError(message));
            }
        }
    }

    /// Processes events serially until the channel closes or `shutdown`
    /// resolves.
    pub async fn run<F>(&mut self, mut events: mpsc::Receiver<MarketEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(symbol = %self.symbol, "Tracker shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => {
                        info!(symbol = %self.symbol, "Market stream ended");
                        break;
                    }
                },
            }
        }
    }

    pub async fn status(&self) -> ModelStatus {
        ModelStatus::of(&self.symbol, &*self.model.read().await)
    }

    pub async fn predict(&self) -> Prediction {
        self.model.read().await.predict(self.threshold())
    }

    async fn on_minute(&mut self, candle: Candle) {
        let close = candle.close_f64();
        if !candle.is_final {
            self.publish(TrackerUpdate::Price {
                price: close,
                at: Utc::now(),
            });
            return;
        }

        if let Some(previous) = self.last_minute_open {
            if candle.open_time <= previous {
                warn!(
                    open_time = %candle.open_time,
                    previous = %previous,
                    "Dropping out-of-order minute"
                );
                return;
            }
        }

        let (prediction, status) = {
            let mut model = self.model.write().await;
            if let Err(e) = model.push_minute(close) {
                warn!("Dropping minute close: {}", e);
                return;
            }
            (
                model.predict(self.threshold()),
                ModelStatus::of(&self.symbol, &model),
            )
        };
        self.last_minute_open = Some(candle.open_time);

        debug!(
            decision = %prediction.decision,
            prob_up = prediction.prob_up,
            "Minute closed"
        );
        self.publish(TrackerUpdate::Prediction {
            prediction,
            price: Some(close),
            status,
            at: Utc::now(),
        });
    }

    async fn on_hour(&mut self, candle: Candle) {
        if self.hour_open_time.map_or(true, |t| candle.open_time > t) && !candle.is_final {
            self.set_hour_open(candle.open_time, candle.open_f64()).await;
        }
        if candle.is_final {
            info!(symbol = %self.symbol, hour = %candle.open_time, "Hour closed, refreshing history");
            self.refresh_hourly(&candle).await;
        }
    }

    async fn set_hour_open(&mut self, open_time: DateTime<Utc>, price: f64) {
        let result = self.model.write().await.set_hour_open(price);
        match result {
            Ok(()) => {
                self.hour_open_time = Some(open_time);
                debug!(hour = %open_time, price, "New hour open");
            }
            Err(e) => warn!("Ignoring hour open: {}", e),
        }
    }

    /// Reloads the hourly window after `closed_hour` finished. Rows up to and
    /// including that hour count as closed whatever their REST flag says;
    /// the stream's own bar fills in if the response does not reach it yet.
    /// Failures keep the previous statistics.
    async fn refresh_hourly(&mut self, closed_hour: &Candle) {
        let bars = match self
            .market
            .fetch_bars(&self.symbol, Interval::H1, self.feed().hourly_limit)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(symbol = %self.symbol, "Hourly refresh failed: {}", e);
                self.publish(TrackerUpdate::FeedError(e.to_string()));
                return;
            }
        };

        let (closed, open_bar) = split_closed_through(&bars, closed_hour.open_time);
        let mut closed = closed.to_vec();
        if closed.last().map_or(true, |bar| bar.open_time < closed_hour.open_time) {
            debug!(hour = %closed_hour.open_time, "Refresh lags the stream, appending closed hour");
            closed.push(closed_hour.clone());
        }

        let loaded = self.model.write().await.load_hourly(&closed);
        if let Err(e) = loaded {
            warn!(symbol = %self.symbol, "Hourly refresh rejected: {}", e);
            self.publish(TrackerUpdate::FeedError(e.to_string()));
            return;
        }
        if let Some(bar) = open_bar {
            if self.hour_open_time.map_or(true, |t| bar.open_time > t) {
                self.set_hour_open(bar.open_time, bar.open_f64()).await;
            }
        }

        let status = self.status().await;
        self.publish(TrackerUpdate::HourRefreshed(status));
    }

    fn publish(&self, update: TrackerUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

/// Closed bars, plus the trailing in-progress bar if the batch has one.
fn split_open_bar(bars: &[Candle]) -> (&[Candle], Option<&Candle>) {
    match bars.split_last() {
        Some((last, rest)) if !last.is_final => (rest, Some(last)),
        _ => (bars, None),
    }
}

/// Bars opening at or before `closed_through`, plus the newest strictly
/// later bar as the one in progress.
fn split_closed_through(
    bars: &[Candle],
    closed_through: DateTime<Utc>,
) -> (&[Candle], Option<&Candle>) {
    let split = bars.partition_point(|bar| bar.open_time <= closed_through);
    (&bars[..split], bars[split..].last())
}
