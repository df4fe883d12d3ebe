//! Least-squares trend forecaster.
//!
//! Reads `(date, target)` rows from the model's training data source, fits a
//! straight line over the training range and extrapolates it across the
//! forecast horizon with a residual-based confidence band.

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use forgebi_connectors::{DataSourceConnector, Row};
use forgebi_core::{Clock, PredictionId, TrainingError};

use crate::model::{PredictiveModel, TrainingRange};
use crate::prediction::{ContributingFactor, Direction, Prediction, PredictionPoint};
use crate::trainer::{CancellationToken, ModelTrainer, TrainingOutcome};

/// Two-sided ~95% band.
const Z_95: f64 = 1.96;

pub struct LinearTrendTrainer {
    connector: Arc<dyn DataSourceConnector>,
    clock: Arc<dyn Clock>,
    date_field: String,
    min_records: usize,
}

impl LinearTrendTrainer {
    pub fn new(connector: Arc<dyn DataSourceConnector>, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector,
            clock,
            date_field: "date".to_string(),
            min_records: 3,
        }
    }

    pub fn with_date_field(mut self, field: impl Into<String>) -> Self {
        self.date_field = field.into();
        self
    }

    pub fn with_min_records(mut self, min_records: usize) -> Self {
        self.min_records = min_records.max(2);
        self
    }

    fn samples(
        &self,
        rows: &[Row],
        target: &str,
        range: &TrainingRange,
        cancel: &CancellationToken,
    ) -> Result<Vec<(NaiveDate, f64)>, TrainingError> {
        let first = range.start.date_naive();
        let last = range.end.date_naive();

        let mut samples = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if i % 1024 == 0 {
                cancel.check()?;
            }
            let Some(date) = row.get(&self.date_field).and_then(parse_date) else {
                continue;
            };
            let Some(value) = row.get(target).and_then(JsonValue::as_f64) else {
                continue;
            };
            if (first..=last).contains(&date) && value.is_finite() {
                samples.push((date, value));
            }
        }
        samples.sort_by_key(|(date, _)| *date);
        Ok(samples)
    }
}

impl ModelTrainer for LinearTrendTrainer {
    fn train(
        &self,
        model: &PredictiveModel,
        range: &TrainingRange,
        cancel: &CancellationToken,
    ) -> Result<TrainingOutcome, TrainingError> {
        let source = model.data_source.as_ref().ok_or_else(|| {
            TrainingError::InsufficientData(format!("model {} has no training data source", model.id))
        })?;
        let rows = self
            .connector
            .fetch(source)
            .map_err(|e| TrainingError::Failed(format!("training data fetch failed: {e}")))?;
        cancel.check()?;

        let samples = self.samples(&rows, &model.target, range, cancel)?;
        if samples.len() < self.min_records {
            return Err(TrainingError::InsufficientData(format!(
                "{} usable records in range, need {}",
                samples.len(),
                self.min_records
            )));
        }

        let origin = samples[0].0;
        let points: Vec<(f64, f64)> = samples
            .iter()
            .map(|(date, y)| ((*date - origin).num_days() as f64, *y))
            .collect();
        let fit = Fit::least_squares(&points).ok_or_else(|| {
            TrainingError::InsufficientData("training records span a single day".to_string())
        })?;
        cancel.check()?;

        let n = points.len() as f64;
        let accuracy = (fit.r_squared.max(0.0) * 100.0).clamp(0.0, 100.0);
        // Shrinks toward zero for small samples.
        let confidence = (accuracy * (1.0 - 1.0 / n.sqrt())).clamp(0.0, 100.0);

        let last_date = samples[samples.len() - 1].0;
        let horizon = u64::from(model.horizon_days);
        let mut values = Vec::with_capacity(model.horizon_days as usize);
        for step in 1..=horizon {
            let date = last_date.checked_add_days(Days::new(step)).ok_or_else(|| {
                TrainingError::InvalidOutput(format!("forecast date overflow at step {step}"))
            })?;
            let x = (date - origin).num_days() as f64;
            let value = fit.at(x);
            let band = Z_95 * fit.residual_std * (1.0 + step as f64 / n).sqrt();
            let decay = 1.0 - step as f64 / (2.0 * horizon as f64);
            values.push(PredictionPoint {
                date,
                value,
                upper: value + band,
                lower: value - band,
                confidence: (confidence * decay).clamp(0.0, 100.0),
            });
        }

        let factors = model
            .features
            .iter()
            .map(|f| ContributingFactor {
                feature: f.name.clone(),
                impact: fit.slope * f.importance,
                direction: Direction::from_sign(fit.slope),
                importance: f.importance,
            })
            .collect();

        debug!(
            model = %model.id,
            records = samples.len(),
            slope = fit.slope,
            r_squared = fit.r_squared,
            "linear trend fitted"
        );

        Ok(TrainingOutcome {
            accuracy,
            confidence,
            records: samples.len() as u64,
            prediction: Prediction {
                id: PredictionId::new(),
                generated_at: self.clock.now(),
                horizon_days: model.horizon_days,
                values,
                confidence,
                factors,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Fit {
    slope: f64,
    intercept: f64,
    r_squared: f64,
    residual_std: f64,
}

impl Fit {
    /// `None` when every x is identical.
    fn least_squares(points: &[(f64, f64)]) -> Option<Self> {
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

        let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        if sxx == 0.0 {
            return None;
        }
        let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
        let slope = sxy / sxx;
        let intercept = mean_y - slope * mean_x;

        let ss_res: f64 = points
            .iter()
            .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
            .sum();
        let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
        let r_squared = if ss_tot == 0.0 { 1.0 } else { 1.0 - ss_res / ss_tot };
        let dof = (n - 2.0).max(1.0);

        Some(Self {
            slope,
            intercept,
            r_squared,
            residual_std: (ss_res / dof).sqrt(),
        })
    }

    fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

fn parse_date(value: &JsonValue) -> Option<NaiveDate> {
    let raw = value.as_str()?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc).date_naive()))
}
