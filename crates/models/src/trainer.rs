use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use forgebi_core::TrainingError;

use crate::model::{PredictiveModel, TrainingRange};
use crate::prediction::Prediction;

/// Cooperative cancellation flag shared between the registry and a trainer.
///
/// Trainers should poll [`CancellationToken::is_cancelled`] between units of
/// work and return [`TrainingError::Cancelled`] when it flips.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), TrainingError> {
        if self.is_cancelled() {
            Err(TrainingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    /// 0–100.
    pub accuracy: f64,
    /// 0–100.
    pub confidence: f64,
    /// Records consumed from the training range.
    pub records: u64,
    pub prediction: Prediction,
}

/// Fits a model over its training range and produces a forecast.
///
/// Called on a dedicated training thread; may block.
pub trait ModelTrainer: Send + Sync {
    fn train(
        &self,
        model: &PredictiveModel,
        range: &TrainingRange,
        cancel: &CancellationToken,
    ) -> Result<TrainingOutcome, TrainingError>;
}

impl<T> ModelTrainer for Arc<T>
where
    T: ModelTrainer + ?Sized,
{
    fn train(
        &self,
        model: &PredictiveModel,
        range: &TrainingRange,
        cancel: &CancellationToken,
    ) -> Result<TrainingOutcome, TrainingError> {
        (**self).train(model, range, cancel)
    }
}
