use crate::models::{Question, Snapshot, Submission};
use crate::scoring::{self, ScoreBreakdown};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    #[serde(rename = "_id")]
    pub id: String,
    pub question_text: String,
    pub correct_answer: String,
}

impl From<&Question> for QuestionRef {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            question_text: q.question_text.clone(),
            correct_answer: q.correct_answer.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedAnswer {
    pub question_id: String,
    pub answer: String,
    /// `None` when the referenced question has been deleted.
    pub question: Option<QuestionRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedSubmission {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_email: String,
    pub answers: Vec<EnrichedAnswer>,
    pub snapshots: Vec<Snapshot>,
    pub submitted_at: DateTime<Utc>,
}

impl EnrichedSubmission {
    pub fn score(&self) -> ScoreBreakdown {
        scoring::score(self.answers.iter().map(|a| {
            (
                a.answer.as_str(),
                a.question.as_ref().map(|q| q.correct_answer.as_str()),
            )
        }))
    }
}

/// Joins answers against questions by id. Missing questions become `None`,
/// the submission itself is never dropped.
pub fn enrich(submissions: &[Submission], questions: &HashMap<String, Question>) -> Vec<EnrichedSubmission> {
    submissions
        .iter()
        .map(|sub| EnrichedSubmission {
            id: sub.id.clone(),
            student_email: sub.student_email.clone(),
            answers: sub
                .answers
                .iter()
                .map(|a| EnrichedAnswer {
                    question_id: a.question_id.clone(),
                    answer: a.answer.clone(),
                    question: questions.get(&a.question_id).map(QuestionRef::from),
                })
                .collect(),
            snapshots: sub.snapshots.clone(),
            submitted_at: sub.submitted_at,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportedAnswer {
    #[serde(flatten)]
    pub answer: EnrichedAnswer,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReport {
    #[serde(rename = "_id")]
    pub id: String,
    pub submitted_at: DateTime<Utc>,
    pub score: ScoreBreakdown,
    pub answers: Vec<ReportedAnswer>,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub student_email: String,
    pub submission_count: usize,
    pub submissions: Vec<SubmissionReport>,
}

/// Groups submissions per student, keeping the order in which students first appear.
pub fn build_report(submissions: Vec<EnrichedSubmission>) -> Vec<StudentReport> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut students: Vec<StudentReport> = Vec::new();

    for sub in submissions {
        let score = sub.score();
        let answers = sub
            .answers
            .into_iter()
            .map(|a| {
                let is_correct = scoring::is_correct(
                    &a.answer,
                    a.question.as_ref().map(|q| q.correct_answer.as_str()),
                );
                ReportedAnswer { answer: a, is_correct }
            })
            .collect();
        let report = SubmissionReport {
            id: sub.id,
            submitted_at: sub.submitted_at,
            score,
            answers,
            snapshots: sub.snapshots,
        };

        let slot = *index.entry(sub.student_email.clone()).or_insert_with(|| {
            students.push(StudentReport {
                student_email: sub.student_email.clone(),
                submission_count: 0,
                submissions: Vec::new(),
            });
            students.len() - 1
        });
        let student = &mut students[slot];
        student.submission_count += 1;
        student.submissions.push(report);
    }

    students
}
