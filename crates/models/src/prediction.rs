use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgebi_core::{PredictionId, TrainingError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
    Neutral,
}

impl Direction {
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Direction::Positive
        } else if value < 0.0 {
            Direction::Negative
        } else {
            Direction::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
    /// 0–100.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub feature: String,
    pub impact: f64,
    pub direction: Direction,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: PredictionId,
    pub generated_at: DateTime<Utc>,
    pub horizon_days: u32,
    /// Ascending by date; exactly `horizon_days` entries.
    pub values: Vec<PredictionPoint>,
    pub confidence: f64,
    pub factors: Vec<ContributingFactor>,
}

impl Prediction {
    /// Check trainer output against the model's horizon.
    pub fn validate(&self, horizon_days: u32) -> Result<(), TrainingError> {
        let invalid = |msg: String| Err(TrainingError::InvalidOutput(msg));

        if self.horizon_days != horizon_days {
            return invalid(format!(
                "prediction horizon {} does not match model horizon {horizon_days}",
                self.horizon_days
            ));
        }
        if self.values.len() != horizon_days as usize {
            return invalid(format!(
                "expected {horizon_days} points, got {}",
                self.values.len()
            ));
        }
        if !(0.0..=100.0).contains(&self.confidence) {
            return invalid(format!("confidence {} outside 0..=100", self.confidence));
        }
        if let Some(pair) = self.values.windows(2).find(|w| w[0].date >= w[1].date) {
            return invalid(format!(
                "dates not strictly ascending at {} → {}",
                pair[0].date, pair[1].date
            ));
        }
        for p in &self.values {
            if !(p.value.is_finite() && p.upper.is_finite() && p.lower.is_finite()) {
                return invalid(format!("non-finite value on {}", p.date));
            }
            if p.lower > p.value || p.value > p.upper {
                return invalid(format!("value on {} lies outside its interval", p.date));
            }
            if !(0.0..=100.0).contains(&p.confidence) {
                return invalid(format!("point confidence on {} outside 0..=100", p.date));
            }
        }
        Ok(())
    }
}
