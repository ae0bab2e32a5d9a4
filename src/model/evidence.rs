use serde::{Deserialize, Serialize};
use std::fmt;

use super::Features;
use crate::indicators::clamp;

const PROBABILITY_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "NO CALL")]
    NoCall,
}

impl Decision {
    /// Commits only when `max(p, 1 - p) >= threshold`.
    pub fn from_probability(prob_up: f64, threshold: f64) -> Self {
        let confidence = prob_up.max(1.0 - prob_up);
        if confidence < threshold {
            Decision::NoCall
        } else if prob_up >= 0.5 {
            Decision::Up
        } else {
            Decision::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Up => "UP",
            Decision::Down => "DOWN",
            Decision::NoCall => "NO CALL",
        }
    }

    pub fn is_call(&self) -> bool {
        !matches!(self, Decision::NoCall)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of one fusion pass, shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub decision: Decision,
    pub prob_up: f64,
    pub confidence: f64,
    /// Reasons in the order the evidence was applied.
    pub signals: Vec<String>,
    pub z: Option<f64>,
    pub slope_z: Option<f64>,
    pub rsi: Option<f64>,
}

impl Prediction {
    pub fn insufficient_data() -> Self {
        Self {
            decision: Decision::NoCall,
            prob_up: 0.5,
            confidence: 0.5,
            signals: vec!["insufficient data".to_string()],
            z: None,
            slope_z: None,
            rsi: None,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | confidence {:.1}% (p_up={:.2}) | {}",
            self.decision,
            self.confidence * 100.0,
            self.prob_up,
            self.signals.join(", ")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    Above(f64),
    Below(f64),
    Otherwise,
}

impl Trigger {
    fn matches(&self, value: f64) -> bool {
        match *self {
            Trigger::Above(bound) => value > bound,
            Trigger::Below(bound) => value < bound,
            Trigger::Otherwise => true,
        }
    }
}

/// One rung of a ladder: when `trigger` matches, add `logit_delta` and, if
/// labelled, record a reason.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub trigger: Trigger,
    pub logit_delta: f64,
    pub label: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceSource {
    Displacement,
    Slope,
    Oscillator,
}

impl EvidenceSource {
    pub fn reading(&self, features: &Features) -> f64 {
        match self {
            EvidenceSource::Displacement => features.z,
            EvidenceSource::Slope => features.slope_z,
            EvidenceSource::Oscillator => features.rsi,
        }
    }

    fn describe(&self, label: &str, value: f64) -> String {
        match self {
            EvidenceSource::Displacement => format!("{} (z={:.2})", label, value),
            EvidenceSource::Slope => label.to_string(),
            EvidenceSource::Oscillator => format!("RSI {} {}", value.round() as i64, label),
        }
    }
}

/// Buckets are checked in order and the first match wins.
#[derive(Debug, Clone, Copy)]
pub struct Ladder {
    pub source: EvidenceSource,
    pub buckets: &'static [Bucket],
}

impl Ladder {
    pub fn select(&self, value: f64) -> Option<&'static Bucket> {
        self.buckets.iter().find(|b| b.trigger.matches(value))
    }
}

pub const DISPLACEMENT: Ladder = Ladder {
    source: EvidenceSource::Displacement,
    buckets: &[
        Bucket { trigger: Trigger::Above(0.15), logit_delta: 0.6, label: Some("above open strong") },
        Bucket { trigger: Trigger::Above(0.05), logit_delta: 0.25, label: Some("above open") },
        Bucket { trigger: Trigger::Below(-0.15), logit_delta: -0.6, label: Some("below open strong") },
        Bucket { trigger: Trigger::Below(-0.05), logit_delta: -0.25, label: Some("below open") },
        Bucket { trigger: Trigger::Otherwise, logit_delta: 0.0, label: Some("near open") },
    ],
};

pub const SLOPE: Ladder = Ladder {
    source: EvidenceSource::Slope,
    buckets: &[
        Bucket { trigger: Trigger::Above(0.2), logit_delta: 0.35, label: Some("positive slope") },
        Bucket { trigger: Trigger::Below(-0.2), logit_delta: -0.35, label: Some("negative slope") },
        Bucket { trigger: Trigger::Otherwise, logit_delta: 0.0, label: None },
    ],
};

pub const OSCILLATOR: Ladder = Ladder {
    source: EvidenceSource::Oscillator,
    buckets: &[
        Bucket { trigger: Trigger::Above(65.0), logit_delta: 0.25, label: Some("high") },
        Bucket { trigger: Trigger::Above(55.0), logit_delta: 0.1, label: Some("mid+") },
        Bucket { trigger: Trigger::Below(35.0), logit_delta: -0.25, label: Some("low") },
        Bucket { trigger: Trigger::Below(45.0), logit_delta: -0.1, label: Some("mid-") },
        Bucket { trigger: Trigger::Otherwise, logit_delta: 0.0, label: Some("neutral") },
    ],
};

/// Evidence applied after the prior, in this order.
pub const EVIDENCE: [Ladder; 3] = [DISPLACEMENT, SLOPE, OSCILLATOR];

/// Log-odds fusion of a prior with the intra-hour evidence.
pub fn fuse(prior: f64, features: &Features, threshold: f64) -> Prediction {
    let mut logit = logit_of(prior);
    let mut signals = vec![format!("prior={:.2}", prior)];

    for ladder in EVIDENCE.iter() {
        let value = ladder.source.reading(features);
        if let Some(bucket) = ladder.select(value) {
            logit += bucket.logit_delta;
            if let Some(label) = bucket.label {
                signals.push(ladder.source.describe(label, value));
            }
        }
    }

    let prob_up = sigmoid(logit);
    let confidence = prob_up.max(1.0 - prob_up);

    Prediction {
        decision: Decision::from_probability(prob_up, threshold),
        prob_up,
        confidence,
        signals,
        z: Some(features.z),
        slope_z: Some(features.slope_z),
        rsi: Some(features.rsi),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn logit_of(p: f64) -> f64 {
    let p = clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON, p);
    (p / (1.0 - p)).ln()
}
