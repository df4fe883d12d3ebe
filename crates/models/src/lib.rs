//! `forgebi-models`: predictive models and their training lifecycle.
//!
//! The registry owns model state and enforces "one training run per model";
//! the actual learning is delegated to a [`ModelTrainer`].

pub mod linear;
pub mod model;
pub mod prediction;
pub mod registry;
pub mod trainer;

pub use linear::LinearTrendTrainer;
pub use model::{Feature, FeatureType, ModelStatus, ModelType, NewModel, PredictiveModel, TrainingRange};
pub use prediction::{ContributingFactor, Direction, Prediction, PredictionPoint};
pub use registry::{ModelRegistry, TrainingHandle};
pub use trainer::{CancellationToken, ModelTrainer, TrainingOutcome};
