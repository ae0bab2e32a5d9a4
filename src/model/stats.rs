use serde::Serialize;

use super::{Direction, HourBar};
use crate::config::ModelSettings;
use crate::indicators::{mean, mean_range};

/// Statistics derived from the hourly history. Always replaced as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourlyStats {
    /// Clamped empirical up-rate over the window.
    pub prior_up: f64,
    pub p_up_given_up: f64,
    pub p_up_given_down: f64,
    /// Mean high-low range of the most recent `hourly_window` bars.
    pub atr: Option<f64>,
    pub last_closed_hour_dir: Option<Direction>,
}

impl Default for HourlyStats {
    fn default() -> Self {
        Self {
            prior_up: 0.5,
            p_up_given_up: 0.5,
            p_up_given_down: 0.5,
            atr: None,
            last_closed_hour_dir: None,
        }
    }
}

impl HourlyStats {
    /// `None` when fewer than two bars are supplied.
    pub fn derive(bars: &[HourBar], settings: &ModelSettings) -> Option<Self> {
        if bars.len() < 2 {
            return None;
        }

        let ups: Vec<bool> = bars.iter().map(HourBar::is_up).collect();
        let labels: Vec<f64> = ups.iter().map(|&up| if up { 1.0 } else { 0.0 }).collect();
        let up_rate = mean(&labels)?;

        let transitions = TransitionCounts::tally(&ups);

        let recent = &bars[bars.len().saturating_sub(settings.hourly_window)..];
        let atr = mean_range(recent.iter().map(|b| (b.high, b.low)));

        let last = bars.last()?;

        Some(Self {
            prior_up: settings.prior_band.clamp(up_rate),
            p_up_given_up: settings.transition_band.clamp(transitions.p_up_given_up()),
            p_up_given_down: settings.transition_band.clamp(transitions.p_up_given_down()),
            atr,
            last_closed_hour_dir: Some(last.direction()),
        })
    }

    /// Markov prior for the current hour given how the last one closed.
    pub fn transition_prior(&self) -> f64 {
        match self.last_closed_hour_dir {
            Some(Direction::Up) => self.p_up_given_up,
            _ => self.p_up_given_down,
        }
    }

    /// +1 up, -1 down, 0 before any hourly history has been loaded.
    pub fn last_dir_sign(&self) -> i8 {
        self.last_closed_hour_dir.map(|d| d.sign()).unwrap_or(0)
    }
}

/// 2x2 table of consecutive-bar transitions, Laplace-initialised to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TransitionCounts {
    up_up: u32,
    up_down: u32,
    down_up: u32,
    down_down: u32,
}

impl TransitionCounts {
    fn tally(ups: &[bool]) -> Self {
        let mut counts = Self {
            up_up: 1,
            up_down: 1,
            down_up: 1,
            down_down: 1,
        };
        for pair in ups.windows(2) {
            match (pair[0], pair[1]) {
                (true, true) => counts.up_up += 1,
                (true, false) => counts.up_down += 1,
                (false, true) => counts.down_up += 1,
                (false, false) => counts.down_down += 1,
            }
        }
        counts
    }

    fn p_up_given_up(&self) -> f64 {
        self.up_up as f64 / (self.up_up + self.up_down) as f64
    }

    fn p_up_given_down(&self) -> f64 {
        self.down_up as f64 / (self.down_up + self.down_down) as f64
    }
}
