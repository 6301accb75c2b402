use async_trait::async_trait;
use env_logger::{Builder, Env};
use intentforge::{
    CancellationToken, Classifier, ClassifierError, Credentials, InMemoryModelRepository, Intent, Model, ModelId,
    ModelRepository, RuntimeConfig, Sample, SoftmaxClassifier, StorageError, TrainParams, TrainingErrorKind,
    TrainingOrchestrator, TrainingSession, TrainingSet, TrainingStatus,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

fn init() {
    let _ = Builder::from_env(Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

fn training_set(seed: u64) -> TrainingSet {
    TrainingSet {
        intent_defs: vec![
            Intent::new("greet").with_utterances(vec!["hello", "hi there", "good morning"]),
            Intent::new("play_music")
                .with_utterances(vec!["play [Kanye](artist) songs", "put on some [Jay](artist)"])
                .with_slot("artist", vec!["any"]),
        ],
        entity_defs: vec![],
        language_code: "en".into(),
        seed,
    }
}

fn credentials() -> Credentials {
    Credentials::new("app", "secret")
}

/// Blocks training until the gate opens or the attempt is cancelled.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    changed: Condvar,
    saw_cancel: AtomicBool,
}

impl Gate {
    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.changed.notify_all();
    }
}

enum Behavior {
    Gated(Arc<Gate>),
    Panic,
}

struct TestClassifier {
    behavior: Behavior,
    trained: bool,
}

impl TestClassifier {
    fn gated(gate: &Arc<Gate>) -> Self {
        Self {
            behavior: Behavior::Gated(Arc::clone(gate)),
            trained: false,
        }
    }
}

impl Classifier for TestClassifier {
    fn with_seed(_seed: Option<u64>) -> Self {
        let gate = Arc::new(Gate::default());
        gate.release();
        Self::gated(&gate)
    }

    fn train(
        &mut self,
        _dataset: &[Sample],
        _params: &TrainParams,
        progress: &mut dyn FnMut(f32),
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClassifierError> {
        let gate = match &self.behavior {
            Behavior::Gated(gate) => gate,
            Behavior::Panic => panic!("classifier exploded"),
        };
        progress(0.6);
        progress(0.3);

        let mut open = gate.open.lock().unwrap();
        while !*open {
            if cancel.is_cancelled() {
                gate.saw_cancel.store(true, Ordering::SeqCst);
                return Err(ClassifierError::Canceled);
            }
            open = gate.changed.wait_timeout(open, Duration::from_millis(10)).unwrap().0;
        }
        progress(1.0);
        self.trained = true;
        Ok(b"test-classifier".to_vec())
    }

    fn predict(&self, _features: &[f32]) -> Result<usize, ClassifierError> {
        if !self.trained {
            return Err(ClassifierError::NotTrained);
        }
        Ok(0)
    }

    fn predict_probabilities(&self, _features: &[f32]) -> Result<Vec<f32>, ClassifierError> {
        if !self.trained {
            return Err(ClassifierError::NotTrained);
        }
        Ok(vec![1.0, 0.0])
    }

    fn restore(_payload: &[u8]) -> Result<Self, ClassifierError> {
        let mut classifier = Self::with_seed(None);
        classifier.trained = true;
        Ok(classifier)
    }

    fn is_trained(&self) -> bool {
        self.trained
    }
}

struct FailingRepository;

#[async_trait]
impl ModelRepository for FailingRepository {
    async fn save_model(&self, _model: &Model, _credentials: &Credentials) -> Result<(), StorageError> {
        Err(StorageError::IoError(io::Error::new(io::ErrorKind::Other, "disk full")))
    }

    async fn get_model(&self, model_id: &ModelId, _credentials: &Credentials) -> Result<Model, StorageError> {
        Err(StorageError::NotFound {
            key: model_id.to_string(),
        })
    }

    async fn has_model(&self, _model_id: &ModelId, _credentials: &Credentials) -> Result<bool, StorageError> {
        Ok(false)
    }
}

type GatedOrchestrator = TrainingOrchestrator<TestClassifier, InMemoryModelRepository>;

fn gated_orchestrator(config: RuntimeConfig) -> (Arc<Gate>, Arc<InMemoryModelRepository>, GatedOrchestrator) {
    let gate = Arc::new(Gate::default());
    let repository = Arc::new(InMemoryModelRepository::new());
    let factory_gate = Arc::clone(&gate);
    let orchestrator = TrainingOrchestrator::with_classifier_factory(Arc::clone(&repository), config, move |_| {
        TestClassifier::gated(&factory_gate)
    });
    (gate, repository, orchestrator)
}

async fn wait_for_status<C: Classifier, R: ModelRepository>(
    orchestrator: &TrainingOrchestrator<C, R>,
    model_id: &ModelId,
    credentials: &Credentials,
    status: TrainingStatus,
) -> TrainingSession {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(session) = orchestrator.get_training_status(model_id, credentials) {
                if session.status == status {
                    return session;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("session never reached the expected status")
}

#[tokio::test]
async fn test_train_to_done() -> Result<(), Box<dyn std::error::Error>> {
    init();
    let repository = Arc::new(InMemoryModelRepository::new());
    let orchestrator =
        TrainingOrchestrator::<SoftmaxClassifier, _>::new(Arc::clone(&repository), RuntimeConfig::default());

    let session = orchestrator.train(training_set(1), credentials()).await;
    assert_eq!(session.status, TrainingStatus::Done);
    assert_eq!(session.progress, 1.0);
    assert!(session.error.is_none());
    assert!(repository.has_model(&session.model_id, &credentials()).await?);

    let polled = orchestrator.get_training_status(&session.model_id, &credentials()).unwrap();
    assert_eq!(polled.status, TrainingStatus::Done);
    Ok(())
}

#[tokio::test]
async fn test_same_key_is_rejected_without_disturbing_the_first() {
    init();
    let (gate, repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let (model_id, handle) = orchestrator.start_training(training_set(2), credentials());
    wait_for_status(&orchestrator, &model_id, &credentials(), TrainingStatus::Training).await;

    let rejected = orchestrator.train(training_set(2), credentials()).await;
    assert_eq!(rejected.status, TrainingStatus::Errored);
    assert_eq!(rejected.error.unwrap().kind, TrainingErrorKind::AlreadyStarted);

    let running = orchestrator.get_training_status(&model_id, &credentials()).unwrap();
    assert_eq!(running.status, TrainingStatus::Training);
    assert!(running.error.is_none());

    gate.release();
    let session = handle.await.unwrap();
    assert_eq!(session.status, TrainingStatus::Done);
    assert!(repository.has_model(&model_id, &credentials()).await.unwrap());
}

#[tokio::test]
async fn test_other_tenant_trains_the_same_model_independently() {
    init();
    let (gate, _repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let (model_id, first) = orchestrator.start_training(training_set(3), credentials());
    wait_for_status(&orchestrator, &model_id, &credentials(), TrainingStatus::Training).await;

    let other = Credentials::new("other-app", "secret");
    let (other_id, second) = orchestrator.start_training(training_set(3), other.clone());
    assert_eq!(model_id, other_id);
    wait_for_status(&orchestrator, &model_id, &other, TrainingStatus::Training).await;
    assert_eq!(orchestrator.active_sessions().len(), 2);

    gate.release();
    assert_eq!(first.await.unwrap().status, TrainingStatus::Done);
    assert_eq!(second.await.unwrap().status, TrainingStatus::Done);
}

#[tokio::test]
async fn test_cancel_during_training() {
    init();
    let (_gate, repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let (model_id, handle) = orchestrator.start_training(training_set(4), credentials());
    wait_for_status(&orchestrator, &model_id, &credentials(), TrainingStatus::Training).await;

    assert!(orchestrator.request_cancel(&model_id, &credentials()));
    let session = handle.await.unwrap();
    assert_eq!(session.status, TrainingStatus::Canceled);
    assert!(session.error.is_none());
    assert!(!repository.has_model(&model_id, &credentials()).await.unwrap());
    assert!(!orchestrator.request_cancel(&model_id, &credentials()));

    // The key is free again once the canceled session is terminal.
    let (_model_id, retry) = orchestrator.start_training(training_set(4), credentials());
    orchestrator.request_cancel(&model_id, &credentials());
    assert_eq!(retry.await.unwrap().status, TrainingStatus::Canceled);
}

#[tokio::test]
async fn test_cancel_unknown_session() {
    init();
    let (_gate, _repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let model_id = orchestrator.model_id(&training_set(5));
    assert!(!orchestrator.request_cancel(&model_id, &credentials()));
    assert!(orchestrator.get_training_status(&model_id, &credentials()).is_none());
}

#[tokio::test]
async fn test_progress_never_decreases() {
    init();
    let (gate, _repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let (model_id, handle) = orchestrator.start_training(training_set(6), credentials());

    let session = wait_for_status(&orchestrator, &model_id, &credentials(), TrainingStatus::Training).await;
    let mut last = session.progress;
    let mut polls = 0;
    // The classifier reports 0.6 then 0.3 before blocking; the lower value is ignored.
    while last <= 0.6 || polls < 10 {
        let session = orchestrator.get_training_status(&model_id, &credentials()).unwrap();
        assert!(session.progress >= last);
        assert!((0.0..=1.0).contains(&session.progress));
        assert_eq!(session.status, TrainingStatus::Training);
        last = session.progress;
        polls += 1;
        assert!(polls < 2_000, "progress stalled at {}", last);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(last < 1.0);

    gate.release();
    assert_eq!(handle.await.unwrap().progress, 1.0);
}

#[tokio::test]
async fn test_dropped_train_future_cancels_its_work() {
    init();
    let config = RuntimeConfig::default().with_max_concurrent_trainings(1);
    let (gate, repository, orchestrator) = gated_orchestrator(config);
    let set = training_set(16);
    let model_id = orchestrator.model_id(&set);

    let timed_out =
        tokio::time::timeout(Duration::from_millis(100), orchestrator.train(set.clone(), credentials())).await;
    assert!(timed_out.is_err());
    let abandoned = orchestrator.get_training_status(&model_id, &credentials()).unwrap();
    assert_eq!(abandoned.status, TrainingStatus::Errored);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !gate.saw_cancel.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("abandoned training never observed the cancellation");

    let (successor_id, successor) = orchestrator.start_training(set, credentials());
    assert_eq!(successor_id, model_id);
    let session = wait_for_status(&orchestrator, &model_id, &credentials(), TrainingStatus::Training).await;
    assert!(session.error.is_none());

    gate.release();
    let done = successor.await.unwrap();
    assert_eq!(done.status, TrainingStatus::Done);
    assert_eq!(done.progress, 1.0);
    assert!(repository.has_model(&model_id, &credentials()).await.unwrap());
}

#[tokio::test]
async fn test_unsafe_language_code_is_rejected_before_training() {
    init();
    let (_gate, repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let mut set = training_set(17);
    set.language_code = "en/US".into();

    let session = orchestrator.train(set, credentials()).await;
    assert_eq!(session.status, TrainingStatus::Errored);
    assert_eq!(session.progress, 0.0);
    assert_eq!(session.error.unwrap().kind, TrainingErrorKind::Validation);
    assert!(!repository.has_model(&session.model_id, &credentials()).await.unwrap());
}

#[tokio::test]
async fn test_invalid_training_set_is_errored() {
    init();
    let (_gate, repository, orchestrator) = gated_orchestrator(RuntimeConfig::default());
    let mut set = training_set(7);
    set.intent_defs[0].utterances.push("   ".into());

    let session = orchestrator.train(set.clone(), credentials()).await;
    assert_eq!(session.status, TrainingStatus::Errored);
    let err = session.error.unwrap();
    assert_eq!(err.kind, TrainingErrorKind::Validation);
    assert!(err.message.contains("greet"));
    assert!(!repository.has_model(&session.model_id, &credentials()).await.unwrap());

    // An errored session does not block a new attempt.
    let retry = orchestrator.train(set, credentials()).await;
    assert_eq!(retry.error.unwrap().kind, TrainingErrorKind::Validation);
}

#[tokio::test]
async fn test_storage_failure_is_reported() {
    init();
    let orchestrator = TrainingOrchestrator::<SoftmaxClassifier, _>::new(
        Arc::new(FailingRepository),
        RuntimeConfig::default(),
    );
    let session = orchestrator.train(training_set(8), credentials()).await;
    assert_eq!(session.status, TrainingStatus::Errored);
    let err = session.error.unwrap();
    assert_eq!(err.kind, TrainingErrorKind::Storage);
    assert!(err.message.contains("disk full"));
}

#[tokio::test]
async fn test_classifier_panic_is_unknown_error() {
    init();
    let orchestrator = TrainingOrchestrator::with_classifier_factory(
        Arc::new(InMemoryModelRepository::new()),
        RuntimeConfig::default(),
        |_| TestClassifier {
            behavior: Behavior::Panic,
            trained: false,
        },
    );
    let session = orchestrator.train(training_set(9), credentials()).await;
    assert_eq!(session.status, TrainingStatus::Errored);
    let err = session.error.unwrap();
    assert_eq!(err.kind, TrainingErrorKind::Unknown);
    assert!(err.message.contains("classifier exploded"));
}

#[tokio::test]
async fn test_trainings_beyond_the_limit_stay_pending() {
    init();
    let config = RuntimeConfig::default().with_max_concurrent_trainings(1);
    let (gate, _repository, orchestrator) = gated_orchestrator(config);

    let (first_id, first) = orchestrator.start_training(training_set(10), credentials());
    wait_for_status(&orchestrator, &first_id, &credentials(), TrainingStatus::Training).await;

    let (second_id, second) = orchestrator.start_training(training_set(11), credentials());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = orchestrator.get_training_status(&second_id, &credentials()).unwrap();
    assert_eq!(queued.status, TrainingStatus::TrainingPending);
    assert_eq!(queued.progress, 0.0);

    gate.release();
    assert_eq!(first.await.unwrap().status, TrainingStatus::Done);
    assert_eq!(second.await.unwrap().status, TrainingStatus::Done);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    init();
    let config = RuntimeConfig::default().with_max_concurrent_trainings(1);
    let (gate, _repository, orchestrator) = gated_orchestrator(config);

    let (first_id, first) = orchestrator.start_training(training_set(12), credentials());
    wait_for_status(&orchestrator, &first_id, &credentials(), TrainingStatus::Training).await;
    let (second_id, second) = orchestrator.start_training(training_set(13), credentials());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(orchestrator.request_cancel(&second_id, &credentials()));

    // The queued attempt ends without waiting for the running one.
    let canceled = tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("queued training kept waiting for a permit")
        .unwrap();
    assert_eq!(canceled.status, TrainingStatus::Canceled);
    let running = orchestrator.get_training_status(&first_id, &credentials()).unwrap();
    assert_eq!(running.status, TrainingStatus::Training);

    gate.release();
    assert_eq!(first.await.unwrap().status, TrainingStatus::Done);
}

#[tokio::test]
async fn test_acknowledge_and_prune_terminal_sessions() {
    init();
    let config = RuntimeConfig::default().with_terminal_retention(Duration::ZERO);
    let (gate, _repository, orchestrator) = gated_orchestrator(config);
    gate.release();

    let done = orchestrator.train(training_set(14), credentials()).await;
    let acknowledged = orchestrator.acknowledge(&done.model_id, &credentials()).unwrap();
    assert_eq!(acknowledged.status, TrainingStatus::Done);
    assert!(orchestrator.get_training_status(&done.model_id, &credentials()).is_none());

    orchestrator.train(training_set(15), credentials()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(orchestrator.prune_terminal(), 1);
    assert!(orchestrator.sessions().is_empty());
}

#[test]
fn test_fresh_classifier_is_not_trained() {
    let classifier = SoftmaxClassifier::with_seed(Some(1));
    assert!(!classifier.is_trained());
    assert_eq!(classifier.predict(&[0.5, 0.5]), Err(ClassifierError::NotTrained));
    assert_eq!(classifier.predict_probabilities(&[0.5, 0.5]), Err(ClassifierError::NotTrained));
}
