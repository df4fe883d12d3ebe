use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use forgebi_core::{
    AnalyticsError, AnalyticsResult, Clock, Entity, InMemoryRepository, ModelId, Repository,
    TrainingError,
};
use forgebi_events::{
    AnalyticsEvent, EventBus, ModelTrainingCompleted, ModelTrainingFailed, ModelTrainingStarted,
    SharedBus,
};

use crate::model::{ModelStatus, ModelType, NewModel, PredictiveModel};
use crate::prediction::Prediction;
use crate::trainer::{CancellationToken, ModelTrainer, TrainingOutcome};

type RunningTokens = Arc<Mutex<HashMap<ModelId, CancellationToken>>>;

/// Handle to an in-flight training run.
///
/// Dropping the handle detaches the run; it still completes and updates the
/// model.
#[derive(Debug)]
pub struct TrainingHandle {
    model_id: ModelId,
    token: CancellationToken,
    join: JoinHandle<Result<(), TrainingError>>,
}

impl TrainingHandle {
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    /// Ask the trainer to stop. The model ends in `error` with a
    /// cancellation cause once the trainer notices.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the run has finished and the model state is committed.
    pub fn wait(self) -> Result<(), TrainingError> {
        self.join
            .join()
            .unwrap_or_else(|_| Err(TrainingError::Failed("training thread panicked".to_string())))
    }
}

/// Owns predictive models and runs their training.
pub struct ModelRegistry {
    models: Arc<InMemoryRepository<PredictiveModel>>,
    trainer: Arc<dyn ModelTrainer>,
    running: RunningTokens,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl ModelRegistry {
    pub fn new(trainer: Arc<dyn ModelTrainer>, bus: SharedBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            models: Arc::new(InMemoryRepository::new()),
            trainer,
            running: Arc::new(Mutex::new(HashMap::new())),
            bus,
            clock,
        }
    }

    pub fn register_model(&self, spec: NewModel) -> AnalyticsResult<ModelId> {
        spec.validate()?;
        let id = ModelId::new();
        let model = PredictiveModel::from_spec(id, spec, self.clock.now());
        info!(model = %id, model_type = model.model_type.as_str(), horizon = model.horizon_days, "model registered");
        self.models.insert(model)?;
        Ok(id)
    }

    pub fn get_model(&self, id: ModelId) -> AnalyticsResult<PredictiveModel> {
        self.models
            .get(&id)
            .ok_or_else(|| AnalyticsError::not_found(PredictiveModel::KIND, id))
    }

    pub fn list_models(&self, model_type: Option<ModelType>) -> Vec<PredictiveModel> {
        self.models
            .list()
            .into_iter()
            .filter(|m| model_type.is_none_or(|t| m.model_type == t))
            .collect()
    }

    /// Start a training run on a background thread.
    ///
    /// Only `outdated` and `error` models can be trained. A model that is
    /// already training, or is `ready`, is a conflict; requests are never
    /// queued.
    pub fn train(&self, id: ModelId) -> AnalyticsResult<TrainingHandle> {
        let model = self.models.update(&id, |model| match model.status {
            ModelStatus::Training => Err(AnalyticsError::conflict(format!(
                "model {id} is already training"
            ))),
            ModelStatus::Ready => Err(AnalyticsError::conflict(format!(
                "model {id} is ready; mark it outdated before retraining"
            ))),
            ModelStatus::Outdated | ModelStatus::Error => {
                model.status = ModelStatus::Training;
                model.last_error = None;
                Ok(model.clone())
            }
        })?;

        let token = CancellationToken::new();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());

        info!(model = %id, model_type = model.model_type.as_str(), "model training started");
        self.bus
            .publish(AnalyticsEvent::ModelTrainingStarted(ModelTrainingStarted {
                model_id: id,
                occurred_at: self.clock.now(),
            }));

        let job = TrainingJob {
            model,
            token: token.clone(),
            models: Arc::clone(&self.models),
            trainer: Arc::clone(&self.trainer),
            running: Arc::clone(&self.running),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
        };
        let fallback = job.clone();

        match thread::Builder::new()
            .name(format!("forgebi-train-{id}"))
            .spawn(move || job.run())
        {
            Ok(join) => Ok(TrainingHandle {
                model_id: id,
                token,
                join,
            }),
            Err(e) => {
                let cause = TrainingError::Failed(format!("could not start training thread: {e}"));
                // Result is the same cause we return below.
                let _ = fallback.complete(Err(cause.clone()));
                Err(cause.into())
            }
        }
    }

    /// Latest stored prediction.
    pub fn predict(&self, id: ModelId) -> AnalyticsResult<Prediction> {
        self.get_model(id)?
            .latest_prediction()
            .cloned()
            .ok_or_else(|| AnalyticsError::NoPredictionAvailable(id.to_string()))
    }

    /// `ready → outdated`. Already-trainable models are left as they are.
    pub fn mark_outdated(&self, id: ModelId) -> AnalyticsResult<ModelStatus> {
        self.models.update(&id, |model| match model.status {
            ModelStatus::Training => Err(AnalyticsError::conflict(format!(
                "model {id} is training"
            ))),
            ModelStatus::Ready => {
                model.status = ModelStatus::Outdated;
                Ok(model.status)
            }
            ModelStatus::Outdated | ModelStatus::Error => Ok(model.status),
        })
    }

    /// Move every `ready` model trained more than `max_age` before `now` to
    /// `outdated`. Returns the ids that changed.
    pub fn mark_stale(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<ModelId> {
        let cutoff = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let candidates: Vec<ModelId> = self
            .models
            .list()
            .into_iter()
            .filter(|m| m.status == ModelStatus::Ready)
            .map(|m| m.id)
            .collect();

        let mut changed = Vec::new();
        for id in candidates {
            let swept = self.models.update(&id, |model| {
                let stale = model.status == ModelStatus::Ready
                    && model.last_trained.is_none_or(|t| t <= cutoff);
                if stale {
                    model.status = ModelStatus::Outdated;
                }
                Ok(stale)
            });
            if let Ok(true) = swept {
                info!(model = %id, "model marked outdated by age");
                changed.push(id);
            }
        }
        changed
    }

    /// Signal every in-flight run to stop. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        for token in running.values() {
            token.cancel();
        }
        running.len()
    }

    pub fn in_flight(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Clone)]
struct TrainingJob {
    model: PredictiveModel,
    token: CancellationToken,
    models: Arc<InMemoryRepository<PredictiveModel>>,
    trainer: Arc<dyn ModelTrainer>,
    running: RunningTokens,
    bus: SharedBus,
    clock: Arc<dyn Clock>,
}

impl TrainingJob {
    fn run(self) -> Result<(), TrainingError> {
        let range = self.model.training_range.clone();
        let trained = panic::catch_unwind(AssertUnwindSafe(|| {
            self.trainer.train(&self.model, &range, &self.token)
        }))
        .unwrap_or_else(|_| Err(TrainingError::Failed("trainer panicked".to_string())));

        let checked = trained.and_then(|outcome| {
            self.token.check()?;
            check_outcome(&outcome, self.model.horizon_days)?;
            Ok(outcome)
        });
        self.complete(checked)
    }

    fn complete(&self, result: Result<TrainingOutcome, TrainingError>) -> Result<(), TrainingError> {
        let id = self.model.id;
        let now = self.clock.now();
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match result {
            Ok(outcome) => {
                let accuracy = outcome.accuracy;
                let confidence = outcome.confidence;
                self.models
                    .update(&id, |model| {
                        model.status = ModelStatus::Ready;
                        model.accuracy = Some(outcome.accuracy);
                        model.confidence = Some(outcome.confidence);
                        model.last_trained = Some(now);
                        model.training_range.records = outcome.records;
                        model.predictions = vec![outcome.prediction];
                        model.last_error = None;
                        Ok(())
                    })
                    .map_err(|e| TrainingError::Failed(e.to_string()))?;

                info!(model = %id, accuracy, confidence, "model training completed");
                self.bus
                    .publish(AnalyticsEvent::ModelTrainingCompleted(ModelTrainingCompleted {
                        model_id: id,
                        accuracy,
                        confidence,
                        occurred_at: now,
                    }));
                Ok(())
            }
            Err(cause) => {
                let recorded = self.models.update(&id, |model| {
                    model.status = ModelStatus::Error;
                    model.last_error = Some(cause.to_string());
                    Ok(())
                });
                if let Err(e) = recorded {
                    warn!(model = %id, error = %e, "could not record training failure");
                }

                warn!(model = %id, error = %cause, "model training failed");
                self.bus
                    .publish(AnalyticsEvent::ModelTrainingFailed(ModelTrainingFailed {
                        model_id: id,
                        cause: cause.to_string(),
                        occurred_at: now,
                    }));
                Err(cause)
            }
        }
    }
}

fn check_outcome(outcome: &TrainingOutcome, horizon_days: u32) -> Result<(), TrainingError> {
    for (label, score) in [("accuracy", outcome.accuracy), ("confidence", outcome.confidence)] {
        if !(0.0..=100.0).contains(&score) {
            return Err(TrainingError::InvalidOutput(format!(
                "{label} {score} outside 0..=100"
            )));
        }
    }
    outcome.prediction.validate(horizon_days)
}
