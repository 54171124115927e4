//! Client-side exam session: one timed attempt from question load to submission.

pub mod attempt;
pub mod capture;
pub mod controller;

pub use attempt::{Attempt, Phase, Tick, Trigger};
pub use capture::{CaptureDevice, CaptureError, CaptureGuard, CaptureProvider};
pub use controller::{ExamSession, SessionEvent};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Countdown length, in ticks.
    pub duration_ticks: u32,
    pub tick: Duration,
    pub snapshot_period: Duration,
    /// A submission still unanswered after this long counts as a network failure.
    pub submit_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_ticks: 60,
            tick: Duration::from_secs(1),
            snapshot_period: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to fetch questions: {0}")]
    Fetch(String),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("failed to submit exam: {0}")]
    Network(String),
    #[error("exam already submitted")]
    AlreadySubmitted,
    #[error("exam is no longer accepting input")]
    NotActive,
    #[error("unknown question {0}")]
    UnknownQuestion(String),
    #[error("{0}")]
    InvalidAnswer(String),
}
