use chrono::Utc;
use log::{debug, error, info, warn};
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::session::{SessionKey, SessionStore, TrainingError, TrainingSession, TrainingSlot};
use crate::classifier::{Classifier, Sample};
use crate::features::Featurizer;
use crate::model_id::{Credentials, ModelId};
use crate::repository::{Model, ModelRepository};
use crate::runtime::RuntimeConfig;
use crate::training_set::TrainingSet;
use crate::utterance::parse_utterance;

/// Share of the progress bar spent turning utterances into samples.
const FEATURIZE_SHARE: f32 = 0.2;
/// Progress reached when the classifier finishes; `done` sets the rest.
const TRAIN_CEILING: f32 = 0.99;

type ClassifierFactory<C> = Arc<dyn Fn(Option<u64>) -> C + Send + Sync>;

/// Runs training attempts and keeps their sessions pollable.
///
/// ```rust,no_run
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use intentforge::{
///     Credentials, FsModelRepository, Intent, RuntimeConfig, SoftmaxClassifier,
///     TrainingOrchestrator, TrainingSet, TrainingStatus,
/// };
///
/// let repository = Arc::new(FsModelRepository::new_default()?);
/// let orchestrator = TrainingOrchestrator::<SoftmaxClassifier, _>::new(repository, RuntimeConfig::default());
///
/// let set = TrainingSet {
///     intent_defs: vec![
///         Intent::new("greet").with_utterances(vec!["hello", "hi there"]),
///         Intent::new("bye").with_utterances(vec!["goodbye", "see you"]),
///     ],
///     entity_defs: vec![],
///     language_code: "en".into(),
///     seed: 42,
/// };
/// let session = orchestrator.train(set, Credentials::new("app", "secret")).await;
/// assert_eq!(session.status, TrainingStatus::Done);
/// # Ok(())
/// # }
/// ```
pub struct TrainingOrchestrator<C: Classifier, R: ModelRepository> {
    repository: Arc<R>,
    sessions: SessionStore,
    config: RuntimeConfig,
    permits: Arc<Semaphore>,
    factory: ClassifierFactory<C>,
    _classifier: PhantomData<fn() -> C>,
}

impl<C: Classifier, R: ModelRepository> Clone for TrainingOrchestrator<C, R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            sessions: self.sessions.clone(),
            config: self.config.clone(),
            permits: Arc::clone(&self.permits),
            factory: Arc::clone(&self.factory),
            _classifier: PhantomData,
        }
    }
}

impl<C: Classifier, R: ModelRepository> TrainingOrchestrator<C, R> {
    /// Creates an orchestrator that builds classifiers with [`Classifier::with_seed`].
    pub fn new(repository: Arc<R>, config: RuntimeConfig) -> Self {
        Self::with_classifier_factory(repository, config, C::with_seed)
    }

    /// Creates an orchestrator with a custom classifier constructor.
    pub fn with_classifier_factory<F>(repository: Arc<R>, config: RuntimeConfig, factory: F) -> Self
    where
        F: Fn(Option<u64>) -> C + Send + Sync + 'static,
    {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_trainings.max(1)));
        Self {
            repository,
            sessions: SessionStore::new(),
            config,
            permits,
            factory: Arc::new(factory),
            _classifier: PhantomData,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Id of the model `set` would produce under this orchestrator's configuration.
    pub fn model_id(&self, set: &TrainingSet) -> ModelId {
        ModelId::for_training_set(set, self.config.feature_width)
    }

    /// Trains a model and resolves to the attempt's terminal session.
    ///
    /// Never fails: every outcome, including a collision with a running
    /// training of the same model, is reported through the returned session.
    pub async fn train(&self, set: TrainingSet, credentials: Credentials) -> TrainingSession {
        let model_id = self.model_id(&set);
        match self.sessions.try_register(&model_id, &credentials) {
            Ok(slot) => self.drive(set, slot).await,
            Err(rejected) => {
                warn!("Training of model {} rejected: already started", model_id);
                rejected
            }
        }
    }

    /// Registers the session right away and trains in a background task.
    ///
    /// The session is pollable as soon as this returns.
    pub fn start_training(&self, set: TrainingSet, credentials: Credentials) -> (ModelId, JoinHandle<TrainingSession>) {
        let model_id = self.model_id(&set);
        let handle = match self.sessions.try_register(&model_id, &credentials) {
            Ok(slot) => {
                let this = self.clone();
                tokio::spawn(async move { this.drive(set, slot).await })
            }
            Err(rejected) => {
                warn!("Training of model {} rejected: already started", model_id);
                tokio::spawn(async move { rejected })
            }
        };
        (model_id, handle)
    }

    pub fn get_training_status(&self, model_id: &ModelId, credentials: &Credentials) -> Option<TrainingSession> {
        self.sessions.get(&SessionKey::new(model_id, credentials))
    }

    /// Asks a running or queued training to stop at its next checkpoint.
    /// Returns false, doing nothing, when no such session exists.
    pub fn request_cancel(&self, model_id: &ModelId, credentials: &Credentials) -> bool {
        let requested = self.sessions.request_cancel(&SessionKey::new(model_id, credentials));
        if requested {
            info!("Cancellation requested for model {}", model_id);
        }
        requested
    }

    /// Removes a finished session from the registry and returns it.
    pub fn acknowledge(&self, model_id: &ModelId, credentials: &Credentials) -> Option<TrainingSession> {
        self.sessions.acknowledge(&SessionKey::new(model_id, credentials))
    }

    /// Drops finished sessions older than the configured retention.
    pub fn prune_terminal(&self) -> usize {
        self.sessions.prune_terminal(self.config.terminal_retention)
    }

    pub fn active_sessions(&self) -> Vec<TrainingSession> {
        self.sessions.active_sessions()
    }

    async fn drive(&self, set: TrainingSet, slot: TrainingSlot) -> TrainingSession {
        let model_id = slot.key().model_id.clone();
        let credentials = slot.key().credentials.clone();
        info!("Training of model {} accepted", model_id);

        let outcome = self.run(set, &slot).await;
        let session = slot.finish(outcome);
        match &session.error {
            Some(err) => error!("Training of model {} errored: {}", model_id, err),
            None => info!("Training of model {} finished: {}", model_id, session.status),
        }
        debug!("Released training slot of app {}", credentials.app_id);
        session
    }

    async fn run(&self, set: TrainingSet, slot: &TrainingSlot) -> Result<(), TrainingError> {
        set.validate()?;
        let featurizer = Featurizer::new(self.config.feature_width, &set.entity_defs)?;

        // a queued attempt stops waiting as soon as it is cancelled
        let cancel = slot.cancel_token();
        let permit = tokio::select! {
            permit = Arc::clone(&self.permits).acquire_owned() => permit
                .map_err(|e| TrainingError::unknown(format!("Training pool closed: {}", e)))?,
            _ = cancel.cancelled() => {
                debug!("Cancellation observed while waiting for a training permit");
                return Err(TrainingError::canceled());
            }
        };
        if slot.is_cancelled() {
            return Err(TrainingError::canceled());
        }

        let started_at = Utc::now();
        let intents = set.intent_names();
        let entities = set.entity_defs.clone();
        let seed = set.seed;
        let mut classifier = (self.factory)(Some(seed));
        let params = self.config.train_params.clone();
        let reporter = slot.progress_reporter();

        // the permit lives as long as the blocking work, not this future
        let payload = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TrainingError> {
            let _permit = permit;
            let samples = featurize(&set, &featurizer, &|p: f32| reporter.report(p * FEATURIZE_SHARE), &cancel)?;
            let mut on_progress =
                |p: f32| reporter.report(FEATURIZE_SHARE + p.clamp(0.0, 1.0) * (TRAIN_CEILING - FEATURIZE_SHARE));
            Ok(classifier.train(&samples, &params, &mut on_progress, &cancel)?)
        })
        .await
        .map_err(|e| {
            if e.is_panic() {
                TrainingError::unknown(format!("Classifier panicked: {}", panic_message(e.into_panic())))
            } else {
                TrainingError::unknown(format!("Training task failed: {}", e))
            }
        })??;

        if slot.is_cancelled() {
            return Err(TrainingError::canceled());
        }

        let key = slot.key();
        let model = Model {
            model_id: key.model_id.clone(),
            credentials: key.credentials.clone(),
            started_at,
            finished_at: Utc::now(),
            intents,
            entities,
            feature_width: self.config.feature_width,
            payload,
        };
        self.repository.save_model(&model, &key.credentials).await?;
        Ok(())
    }
}

/// Parses and featurizes every utterance, checking for cancellation once per intent.
fn featurize(
    set: &TrainingSet,
    featurizer: &Featurizer,
    progress: &dyn Fn(f32),
    cancel: &crate::classifier::CancellationToken,
) -> Result<Vec<Sample>, TrainingError> {
    let total = set.intent_defs.len();
    let mut samples = Vec::new();
    for (label, intent) in set.intent_defs.iter().enumerate() {
        if cancel.is_cancelled() {
            debug!("Cancellation observed before intent '{}'", intent.name);
            return Err(TrainingError::canceled());
        }
        samples.extend(
            intent
                .utterances
                .iter()
                .map(|raw| Sample::new(featurizer.featurize(&parse_utterance(raw)), label)),
        );
        progress((label + 1) as f32 / total as f32);
    }
    Ok(samples)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
