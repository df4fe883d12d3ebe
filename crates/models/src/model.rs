use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use forgebi_connectors::DataSource;
use forgebi_core::{AnalyticsError, AnalyticsResult, Entity, ModelId};

use crate::prediction::Prediction;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    SalesForecast,
    DemandPrediction,
    CustomerChurn,
    PriceOptimization,
    InventoryOptimization,
    RiskAssessment,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::SalesForecast => "sales_forecast",
            ModelType::DemandPrediction => "demand_prediction",
            ModelType::CustomerChurn => "customer_churn",
            ModelType::PriceOptimization => "price_optimization",
            ModelType::InventoryOptimization => "inventory_optimization",
            ModelType::RiskAssessment => "risk_assessment",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Numeric,
    Categorical,
    Temporal,
    Boolean,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: FeatureType,
    /// 0–1.
    pub importance: f64,
    #[serde(default)]
    pub transform: Option<String>,
}

impl Feature {
    pub fn new(name: impl Into<String>, feature_type: FeatureType, importance: f64) -> Self {
        Self {
            name: name.into(),
            feature_type,
            importance,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Number of records used by the last run; 0 before the first one.
    #[serde(default)]
    pub records: u64,
}

impl TrainingRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            records: 0,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// `training → ready | error`, `ready → outdated`, `outdated | error → training`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Training,
    Ready,
    Outdated,
    Error,
}

impl ModelStatus {
    pub fn can_train(&self) -> bool {
        matches!(self, ModelStatus::Outdated | ModelStatus::Error)
    }
}

/// Input to [`crate::ModelRegistry::register_model`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub model_type: ModelType,
    pub algorithm: String,
    pub features: Vec<Feature>,
    pub target: String,
    pub training_range: TrainingRange,
    pub horizon_days: u32,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub data_source: Option<DataSource>,
}

impl NewModel {
    pub fn new(
        name: impl Into<String>,
        model_type: ModelType,
        target: impl Into<String>,
        training_range: TrainingRange,
    ) -> Self {
        Self {
            name: name.into(),
            model_type,
            algorithm: "linear_trend".to_string(),
            features: Vec::new(),
            target: target.into(),
            training_range,
            horizon_days: 30,
            hyperparameters: BTreeMap::new(),
            data_source: None,
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.push(feature);
        self
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_horizon(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.hyperparameters.insert(key.into(), value);
        self
    }

    pub fn with_data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn validate(&self) -> AnalyticsResult<()> {
        if self.name.trim().is_empty() {
            return Err(AnalyticsError::validation("model name cannot be empty"));
        }
        if self.target.trim().is_empty() {
            return Err(AnalyticsError::validation("model target cannot be empty"));
        }
        if self.algorithm.trim().is_empty() {
            return Err(AnalyticsError::validation("model algorithm cannot be empty"));
        }
        if self.horizon_days == 0 {
            return Err(AnalyticsError::validation("forecast horizon must be at least one day"));
        }
        if self.training_range.start >= self.training_range.end {
            return Err(AnalyticsError::validation(
                "training range start must be before its end",
            ));
        }
        if self.features.is_empty() {
            return Err(AnalyticsError::validation("model needs at least one feature"));
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if feature.name.trim().is_empty() {
                return Err(AnalyticsError::validation("feature name cannot be empty"));
            }
            if !seen.insert(feature.name.as_str()) {
                return Err(AnalyticsError::validation(format!(
                    "duplicate feature {}",
                    feature.name
                )));
            }
            if !(0.0..=1.0).contains(&feature.importance) {
                return Err(AnalyticsError::validation(format!(
                    "feature {} importance must be within 0..=1",
                    feature.name
                )));
            }
        }

        if let Some(source) = &self.data_source {
            source.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictiveModel {
    pub id: ModelId,
    pub name: String,
    #[serde(rename = "type")]
    pub model_type: ModelType,
    pub algorithm: String,
    pub features: Vec<Feature>,
    pub target: String,
    /// 0–100, set by the last successful run.
    pub accuracy: Option<f64>,
    /// 0–100, set by the last successful run.
    pub confidence: Option<f64>,
    pub training_range: TrainingRange,
    pub last_trained: Option<DateTime<Utc>>,
    pub status: ModelStatus,
    pub predictions: Vec<Prediction>,
    pub hyperparameters: BTreeMap<String, JsonValue>,
    pub horizon_days: u32,
    pub data_source: Option<DataSource>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PredictiveModel {
    pub(crate) fn from_spec(id: ModelId, spec: NewModel, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: spec.name,
            model_type: spec.model_type,
            algorithm: spec.algorithm,
            features: spec.features,
            target: spec.target,
            accuracy: None,
            confidence: None,
            training_range: spec.training_range,
            last_trained: None,
            status: ModelStatus::Outdated,
            predictions: Vec::new(),
            hyperparameters: spec.hyperparameters,
            horizon_days: spec.horizon_days,
            data_source: spec.data_source,
            last_error: None,
            created_at: now,
        }
    }

    /// Most recently generated prediction.
    pub fn latest_prediction(&self) -> Option<&Prediction> {
        self.predictions.iter().max_by_key(|p| p.generated_at)
    }
}

impl Entity for PredictiveModel {
    type Id = ModelId;
    const KIND: &'static str = "model";

    fn id(&self) -> &ModelId {
        &self.id
    }
}
