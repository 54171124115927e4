use super::attempt::{Attempt, Phase, Tick, Trigger};
use super::capture::{CaptureGuard, CaptureProvider};
use super::{SessionConfig, SessionError};
use crate::client::{AuthContext, ExamApi, SubmitReceipt};
use crate::models::Question;
use chrono::Utc;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Tick { remaining: u32 },
    SnapshotCaptured { total: usize },
    AutoSubmitStarted,
    Submitted { id: String },
    SubmitFailed { message: String },
    TornDown,
}

struct Shared {
    attempt: Mutex<Attempt>,
    device: StdMutex<CaptureGuard>,
    api: Arc<dyn ExamApi>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stop: watch::Sender<bool>,
    submit_timeout: Duration,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn release_device(&self) {
        self.device.lock().unwrap_or_else(PoisonError::into_inner).release();
    }

    fn stop_tasks(&self) {
        self.stop.send_replace(true);
    }
}

/// A running exam attempt. The countdown and the snapshot loop run as
/// background tasks until the attempt is submitted or the session is dropped.
pub struct ExamSession {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl ExamSession {
    /// Acquires the camera, loads the questions assigned to the logged-in
    /// student and starts the countdown.
    pub async fn start(
        auth: &AuthContext,
        api: Arc<dyn ExamApi>,
        camera: &dyn CaptureProvider,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SessionError> {
        let email = auth.email().trim();
        if email.is_empty() {
            return Err(SessionError::Fetch("no logged-in student".into()));
        }

        let device = CaptureGuard::new(camera.acquire()?);

        let questions = api
            .fetch_assigned_questions(email)
            .await
            .map_err(|e| SessionError::Fetch(e.to_string()))?;
        if questions.is_empty() {
            return Err(SessionError::Fetch(format!("no questions assigned to {email}")));
        }
        info!(student = %email, questions = questions.len(), "exam session started");

        let (events, rx) = mpsc::unbounded_channel();
        let (stop, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            attempt: Mutex::new(Attempt::new(email, questions, config.duration_ticks)),
            device: StdMutex::new(device),
            api,
            events,
            stop,
            submit_timeout: config.submit_timeout,
        });

        let tasks = vec![
            tokio::spawn(run_countdown(shared.clone(), config.tick)),
            tokio::spawn(run_snapshots(shared.clone(), config.snapshot_period)),
        ];
        Ok((Self { shared, tasks }, rx))
    }

    pub async fn questions(&self) -> Vec<Question> {
        self.shared.attempt.lock().await.questions().to_vec()
    }

    pub async fn remaining(&self) -> u32 {
        self.shared.attempt.lock().await.remaining()
    }

    pub async fn phase(&self) -> Phase {
        self.shared.attempt.lock().await.phase()
    }

    pub async fn answer(&self, question_id: &str) -> Option<String> {
        self.shared.attempt.lock().await.answer(question_id).map(str::to_string)
    }

    pub async fn snapshot_count(&self) -> usize {
        self.shared.attempt.lock().await.snapshots().len()
    }

    pub async fn toggle_option(&self, question_id: &str, option: &str) -> Result<(), SessionError> {
        self.shared.attempt.lock().await.toggle_option(question_id, option)
    }

    pub async fn set_text(&self, question_id: &str, text: &str) -> Result<(), SessionError> {
        self.shared.attempt.lock().await.set_text(question_id, text)
    }

    /// Manual submission. Once sent, the request runs to completion even if
    /// the caller stops waiting.
    pub async fn submit(&self) -> Result<SubmitReceipt, SessionError> {
        tokio::spawn(submit_with(self.shared.clone(), Trigger::Manual))
            .await
            .map_err(|e| SessionError::Network(e.to_string()))?
    }

    pub async fn abandon(self) {
        self.shared.attempt.lock().await.abandon();
    }
}

impl Drop for ExamSession {
    fn drop(&mut self) {
        self.shared.stop_tasks();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.shared.release_device();
        if let Ok(mut attempt) = self.shared.attempt.try_lock() {
            attempt.abandon();
        }
        self.shared.emit(SessionEvent::TornDown);
        debug!("exam session torn down");
    }
}

async fn submit_with(shared: Arc<Shared>, trigger: Trigger) -> Result<SubmitReceipt, SessionError> {
    let (request, student, answered) = {
        let mut attempt = shared.attempt.lock().await;
        let request = attempt.begin_submit(trigger, Utc::now())?;
        (request, attempt.student_email().to_string(), attempt.answered_count())
    };
    let snapshots = request.snapshots.len();

    let outcome = match time::timeout(shared.submit_timeout, shared.api.submit_attempt(request)).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(_) => Err(format!("no response within {:?}", shared.submit_timeout)),
    };
    match outcome {
        Ok(receipt) => {
            shared.attempt.lock().await.submit_succeeded();
            shared.stop_tasks();
            shared.release_device();
            info!(student = %student, id = %receipt.id, answered, snapshots, ?trigger, "exam submitted");
            shared.emit(SessionEvent::Submitted { id: receipt.id.clone() });
            Ok(receipt)
        }
        Err(message) => {
            shared.attempt.lock().await.submit_failed();
            warn!(student = %student, ?trigger, "submission failed: {}", message);
            shared.emit(SessionEvent::SubmitFailed { message: message.clone() });
            Err(SessionError::Network(message))
        }
    }
}

async fn run_countdown(shared: Arc<Shared>, period: Duration) {
    let mut stop = shared.stop.subscribe();
    let mut interval = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => break,
        }
        let tick = shared.attempt.lock().await.tick();
        match tick {
            Tick::Running { remaining } => shared.emit(SessionEvent::Tick { remaining }),
            Tick::Paused => {}
            Tick::TimeUp => {
                shared.emit(SessionEvent::Tick { remaining: 0 });
                shared.emit(SessionEvent::AutoSubmitStarted);
                // Detached so that tearing the session down does not cancel the request.
                tokio::spawn(submit_with(shared.clone(), Trigger::Timer));
                break;
            }
            Tick::Finished => break,
        }
    }
}

async fn run_snapshots(shared: Arc<Shared>, period: Duration) {
    let mut stop = shared.stop.subscribe();
    let mut interval = time::interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => break,
        }
        match shared.attempt.lock().await.phase() {
            Phase::Active => {}
            Phase::Submitting | Phase::Expired => continue,
            Phase::Submitted | Phase::Abandoned => break,
        }
        let snapshot = {
            let mut device = shared.device.lock().unwrap_or_else(PoisonError::into_inner);
            if device.is_released() {
                break;
            }
            device.snapshot(Utc::now())
        };
        let Some(snapshot) = snapshot else {
            debug!("no frame available, snapshot skipped");
            continue;
        };
        let mut attempt = shared.attempt.lock().await;
        if attempt.record_snapshot(snapshot) {
            let total = attempt.snapshots().len();
            drop(attempt);
            shared.emit(SessionEvent::SnapshotCaptured { total });
        }
    }
}
