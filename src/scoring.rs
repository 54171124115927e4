//! Negative-marking score for one submission.
//!
//! Each answer is paired with the correct answer of the question it refers to,
//! or `None` when that question no longer exists. One point per correct answer,
//! minus one point per three wrong answers (floor division).

use serde::{Deserialize, Serialize};

pub const WRONG_PER_PENALTY: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub correct: u32,
    pub wrong: u32,
    pub total: u32,
    pub negative_marks: u32,
    /// `correct - negative_marks`, may go below zero.
    pub raw_score: i64,
    /// Displayed score, floored at zero.
    pub score: u32,
}

/// Exact, case-sensitive match. Unanswered and orphaned entries are never correct.
pub fn is_correct(student_answer: &str, correct_answer: Option<&str>) -> bool {
    match correct_answer {
        Some(expected) => !student_answer.is_empty() && student_answer == expected,
        None => false,
    }
}

pub fn score<'a, I>(pairs: I) -> ScoreBreakdown
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut correct = 0u32;
    let mut wrong = 0u32;
    for (answer, expected) in pairs {
        if is_correct(answer, expected) {
            correct += 1;
        } else {
            wrong += 1;
        }
    }
    ScoreBreakdown::from_counts(correct, wrong)
}

impl ScoreBreakdown {
    pub fn from_counts(correct: u32, wrong: u32) -> Self {
        let negative_marks = wrong / WRONG_PER_PENALTY;
        let raw_score = i64::from(correct) - i64::from(negative_marks);
        Self {
            correct,
            wrong,
            total: correct + wrong,
            negative_marks,
            raw_score,
            score: raw_score.max(0) as u32,
        }
    }
}
