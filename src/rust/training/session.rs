use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::classifier::{CancellationToken, ClassifierError};
use crate::model_id::{Credentials, ModelId};
use crate::repository::StorageError;
use crate::training_set::TrainingSetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingStatus {
    TrainingPending,
    Training,
    Done,
    Canceled,
    Errored,
}

impl TrainingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Errored)
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TrainingPending => "training-pending",
            Self::Training => "training",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingErrorKind {
    /// Malformed training set or dataset, rejected before any work
    Validation,
    NotTrained,
    /// Another non-terminal session holds the same key
    AlreadyStarted,
    /// Requested by the user; not a failure
    Canceled,
    Unknown,
    Storage,
}

impl fmt::Display for TrainingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "ValidationError",
            Self::NotTrained => "NotTrainedError",
            Self::AlreadyStarted => "AlreadyStartedError",
            Self::Canceled => "TrainingCanceledError",
            Self::Unknown => "UnknownTrainingError",
            Self::Storage => "StorageError",
        };
        f.write_str(name)
    }
}

/// Why a training attempt did not end in `done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TrainingError {
    pub kind: TrainingErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl TrainingError {
    pub fn new(kind: TrainingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack_trace: None,
        }
    }

    /// An unexpected failure; captures a backtrace when `RUST_BACKTRACE` enables it.
    pub fn unknown(message: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        Self {
            kind: TrainingErrorKind::Unknown,
            message: message.into(),
            stack_trace: (backtrace.status() == BacktraceStatus::Captured).then(|| backtrace.to_string()),
        }
    }

    pub fn canceled() -> Self {
        Self::new(TrainingErrorKind::Canceled, "Training was canceled")
    }

    pub fn already_started(model_id: &ModelId) -> Self {
        Self::new(
            TrainingErrorKind::AlreadyStarted,
            format!("Training of model {} is already in progress", model_id),
        )
    }
}

impl From<TrainingSetError> for TrainingError {
    fn from(err: TrainingSetError) -> Self {
        Self::new(TrainingErrorKind::Validation, err.to_string())
    }
}

impl From<StorageError> for TrainingError {
    fn from(err: StorageError) -> Self {
        Self::new(TrainingErrorKind::Storage, err.to_string())
    }
}

impl From<ClassifierError> for TrainingError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Canceled => Self::canceled(),
            ClassifierError::ValidationError(_) => Self::new(TrainingErrorKind::Validation, err.to_string()),
            ClassifierError::NotTrained => Self::new(TrainingErrorKind::NotTrained, err.to_string()),
            other => Self::unknown(other.to_string()),
        }
    }
}

/// Live, pollable record of one training attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSession {
    pub model_id: ModelId,
    pub credentials: Credentials,
    pub status: TrainingStatus,
    /// In `[0, 1]`; never decreases while training.
    pub progress: f32,
    /// Set only when `status` is `errored`.
    pub error: Option<TrainingError>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrainingSession {
    pub fn new(model_id: ModelId, credentials: Credentials) -> Self {
        let now = Utc::now();
        Self {
            model_id,
            credentials,
            status: TrainingStatus::TrainingPending,
            progress: 0.0,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    fn complete(&mut self, outcome: Result<(), TrainingError>) {
        match outcome {
            Ok(()) => {
                self.status = TrainingStatus::Done;
                self.progress = 1.0;
                self.error = None;
            }
            Err(err) if err.kind == TrainingErrorKind::Canceled => {
                self.status = TrainingStatus::Canceled;
                self.error = None;
            }
            Err(err) => {
                self.status = TrainingStatus::Errored;
                self.error = Some(err);
            }
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub model_id: ModelId,
    pub credentials: Credentials,
}

impl SessionKey {
    pub fn new(model_id: &ModelId, credentials: &Credentials) -> Self {
        Self {
            model_id: model_id.clone(),
            credentials: credentials.clone(),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    session: TrainingSession,
    cancel: CancellationToken,
}

/// Registry of training sessions, shared between the tasks that own them and
/// the callers polling them.
///
/// Each key is written only by the [`TrainingSlot`] that registered it.
/// The store starts empty and lives as long as its last clone; sessions are
/// not persisted, so in-flight trainings are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<SessionKey, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new `training-pending` session and hands out its write slot.
    ///
    /// When a non-terminal session already holds the key, the existing entry is
    /// left untouched and the rejected attempt is returned as an `errored`
    /// session carrying an `AlreadyStarted` error. A terminal entry is replaced.
    pub fn try_register(&self, model_id: &ModelId, credentials: &Credentials) -> Result<TrainingSlot, TrainingSession> {
        let key = SessionKey::new(model_id, credentials);
        let session = TrainingSession::new(model_id.clone(), credentials.clone());
        let cancel = CancellationToken::new();
        let entry = SessionEntry {
            session: session.clone(),
            cancel: cancel.clone(),
        };

        match self.sessions.entry(key.clone()) {
            Entry::Occupied(existing) if !existing.get().session.status.is_terminal() => {
                let mut rejected = session;
                rejected.complete(Err(TrainingError::already_started(model_id)));
                return Err(rejected);
            }
            Entry::Occupied(mut existing) => {
                existing.insert(entry);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        Ok(TrainingSlot {
            store: self.clone(),
            key,
            cancel,
            finished: false,
        })
    }

    pub fn get(&self, key: &SessionKey) -> Option<TrainingSession> {
        self.sessions.get(key).map(|entry| entry.session.clone())
    }

    /// Signals the session's cancellation token; returns false when there is no
    /// non-terminal session for the key.
    pub fn request_cancel(&self, key: &SessionKey) -> bool {
        match self.sessions.get(key) {
            Some(entry) if !entry.session.status.is_terminal() => {
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Drops a terminal session once its outcome has been read.
    pub fn acknowledge(&self, key: &SessionKey) -> Option<TrainingSession> {
        self.sessions
            .remove_if(key, |_, entry| entry.session.status.is_terminal())
            .map(|(_, entry)| entry.session)
    }

    /// Drops terminal sessions that have not changed for longer than `max_age`.
    pub fn prune_terminal(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| {
            !(entry.session.status.is_terminal() && now.signed_duration_since(entry.session.updated_at) > max_age)
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn active_sessions(&self) -> Vec<TrainingSession> {
        self.sessions
            .iter()
            .filter(|entry| !entry.session.status.is_terminal())
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Applies `apply` to the entry registered with `owner`. An entry that has
    /// since been replaced by a newer attempt for the key is left alone.
    fn update(
        &self,
        key: &SessionKey,
        owner: &CancellationToken,
        apply: impl FnOnce(&mut TrainingSession),
    ) -> Option<TrainingSession> {
        let mut entry = self.sessions.get_mut(key)?;
        if !entry.cancel.same_as(owner) {
            return None;
        }
        apply(&mut entry.session);
        Some(entry.session.clone())
    }
}

/// Exclusive write access to one registered session.
///
/// Consuming [`finish`](Self::finish) records the single terminal outcome.
/// A slot dropped without finishing (a panicking task, or a `train` future
/// dropped by its caller) cancels any work still running for it and marks its
/// session `errored`, so no session stays non-terminal forever.
#[derive(Debug)]
pub struct TrainingSlot {
    store: SessionStore,
    key: SessionKey,
    cancel: CancellationToken,
    finished: bool,
}

impl TrainingSlot {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter {
            store: self.store.clone(),
            key: self.key.clone(),
            owner: self.cancel.clone(),
        }
    }

    /// Records the terminal outcome and returns the final session.
    pub fn finish(mut self, outcome: Result<(), TrainingError>) -> TrainingSession {
        self.finished = true;
        match self.store.sessions.entry(self.key.clone()) {
            Entry::Occupied(mut existing) if existing.get().cancel.same_as(&self.cancel) => {
                existing.get_mut().session.complete(outcome);
                existing.get().session.clone()
            }
            Entry::Occupied(_) => {
                log::warn!("Session of model {} was replaced before training finished", self.key.model_id);
                let mut session = TrainingSession::new(self.key.model_id.clone(), self.key.credentials.clone());
                session.complete(outcome);
                session
            }
            Entry::Vacant(vacant) => {
                let mut session = TrainingSession::new(self.key.model_id.clone(), self.key.credentials.clone());
                session.complete(outcome);
                vacant.insert(SessionEntry {
                    session: session.clone(),
                    cancel: self.cancel.clone(),
                });
                session
            }
        }
    }
}

impl Drop for TrainingSlot {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::error!("Training task for model {} ended without an outcome", self.key.model_id);
        self.cancel.cancel();
        self.store.update(&self.key, &self.cancel, |session| {
            if !session.status.is_terminal() {
                session.complete(Err(TrainingError::unknown("Training task ended without reporting an outcome")));
            }
        });
    }
}

/// Cloneable progress writer handed to the training routine.
///
/// Writes only reach the attempt it was created for; once that attempt's
/// entry is replaced, reports are dropped.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    store: SessionStore,
    key: SessionKey,
    owner: CancellationToken,
}

impl ProgressReporter {
    /// Moves a pending session to `training` and raises its progress.
    /// Values are clamped to `[0, 1]` and never lower the stored progress.
    pub fn report(&self, progress: f32) {
        let progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        self.store.update(&self.key, &self.owner, |session| {
            if session.status.is_terminal() {
                return;
            }
            session.status = TrainingStatus::Training;
            if progress > session.progress {
                session.progress = progress;
            }
            session.updated_at = Utc::now();
        });
    }
}
