use super::SessionError;
use crate::models::{AnswerEntry, Question, Snapshot, SubmissionRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Countdown running, answers and snapshots accepted.
    Active,
    /// A submission request is in flight.
    Submitting,
    /// Time ran out and the automatic submission failed; only a manual retry is left.
    Expired,
    Submitted,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Running { remaining: u32 },
    TimeUp,
    /// Not counting: the clock is at zero and the attempt is waiting on a
    /// submission or a manual retry.
    Paused,
    Finished,
}

/// One exam attempt: the loaded questions, the answers given so far, the
/// countdown and the captured snapshots.
#[derive(Debug, Clone)]
pub struct Attempt {
    student_email: String,
    questions: Vec<Question>,
    answers: HashMap<String, String>,
    remaining: u32,
    snapshots: Vec<Snapshot>,
    phase: Phase,
}

impl Attempt {
    pub fn new(student_email: impl Into<String>, questions: Vec<Question>, duration_ticks: u32) -> Self {
        Self {
            student_email: student_email.into(),
            questions,
            answers: HashMap::new(),
            remaining: duration_ticks,
            snapshots: Vec::new(),
            phase: Phase::Active,
        }
    }

    pub fn student_email(&self) -> &str {
        &self.student_email
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn answer(&self, question_id: &str) -> Option<&str> {
        self.answers.get(question_id).map(String::as_str)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|a| !a.trim().is_empty()).count()
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Active => Ok(()),
            Phase::Submitting | Phase::Submitted => Err(SessionError::AlreadySubmitted),
            Phase::Expired | Phase::Abandoned => Err(SessionError::NotActive),
        }
    }

    fn question(&self, question_id: &str) -> Result<&Question, SessionError> {
        self.questions
            .iter()
            .find(|q| q.id == question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))
    }

    /// Selecting the current choice clears it, selecting another one replaces it.
    pub fn toggle_option(&mut self, question_id: &str, option: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        let question = self.question(question_id)?;
        if !question.q_type.is_choice() {
            return Err(SessionError::InvalidAnswer(format!(
                "question {question_id} takes a text answer"
            )));
        }
        if !question.choices().iter().any(|c| c == option) {
            return Err(SessionError::InvalidAnswer(format!(
                "{option:?} is not an option of question {question_id}"
            )));
        }
        if self.answers.get(question_id).map(String::as_str) == Some(option) {
            self.answers.remove(question_id);
        } else {
            self.answers.insert(question_id.to_string(), option.to_string());
        }
        Ok(())
    }

    /// Stores free text verbatim; blank text is treated as unanswered on submit.
    pub fn set_text(&mut self, question_id: &str, text: &str) -> Result<(), SessionError> {
        self.ensure_active()?;
        let question = self.question(question_id)?;
        if question.q_type.is_choice() {
            return Err(SessionError::InvalidAnswer(format!(
                "question {question_id} takes one of its options"
            )));
        }
        self.answers.insert(question_id.to_string(), text.to_string());
        Ok(())
    }

    /// The clock keeps running while a request is in flight, but only an
    /// active attempt reports `TimeUp`.
    pub fn tick(&mut self) -> Tick {
        match self.phase {
            Phase::Active | Phase::Submitting => {}
            Phase::Expired => return Tick::Paused,
            Phase::Submitted | Phase::Abandoned => return Tick::Finished,
        }
        if self.remaining == 0 {
            return Tick::Paused;
        }
        self.remaining -= 1;
        match (self.phase, self.remaining) {
            (Phase::Active, 0) => Tick::TimeUp,
            _ => Tick::Running { remaining: self.remaining },
        }
    }

    /// Returns `false` when the frame arrived after the attempt stopped taking input.
    pub fn record_snapshot(&mut self, snapshot: Snapshot) -> bool {
        if self.phase != Phase::Active {
            return false;
        }
        self.snapshots.push(snapshot);
        true
    }

    /// Moves to `Submitting` and assembles the request. At most one request is
    /// in flight; the timer may only fire while the attempt is active.
    pub fn begin_submit(&mut self, trigger: Trigger, now: DateTime<Utc>) -> Result<SubmissionRequest, SessionError> {
        match (self.phase, trigger) {
            (Phase::Active, _) | (Phase::Expired, Trigger::Manual) => {}
            (Phase::Submitting | Phase::Submitted, _) => return Err(SessionError::AlreadySubmitted),
            (Phase::Expired, Trigger::Timer) | (Phase::Abandoned, _) => return Err(SessionError::NotActive),
        }
        self.phase = Phase::Submitting;
        Ok(self.build_request(now))
    }

    pub fn submit_succeeded(&mut self) {
        if self.phase == Phase::Submitting {
            self.phase = Phase::Submitted;
        }
    }

    /// Keeps every answer and snapshot. The countdown resumes if time is left.
    pub fn submit_failed(&mut self) {
        if self.phase == Phase::Submitting {
            self.phase = if self.remaining == 0 { Phase::Expired } else { Phase::Active };
        }
    }

    pub fn abandon(&mut self) {
        if self.phase != Phase::Submitted {
            self.phase = Phase::Abandoned;
        }
    }

    /// One entry per loaded question, in load order; unanswered becomes `""`.
    pub fn build_request(&self, now: DateTime<Utc>) -> SubmissionRequest {
        let answers = self
            .questions
            .iter()
            .map(|q| AnswerEntry {
                question_id: q.id.clone(),
                answer: self
                    .answers
                    .get(&q.id)
                    .map(|a| a.trim().to_string())
                    .unwrap_or_default(),
            })
            .collect();
        SubmissionRequest {
            student_email: self.student_email.clone(),
            answers,
            snapshots: self.snapshots.clone(),
            submitted_at: now,
        }
    }
}
