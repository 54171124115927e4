use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

pub const BOOLEAN_OPTIONS: [&str; 2] = ["True", "False"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    #[default]
    Mcq,
    Boolean,
    Short,
}

impl QuestionType {
    pub fn is_choice(self) -> bool {
        matches!(self, QuestionType::Mcq | QuestionType::Boolean)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub question_text: String,
    #[serde(rename = "type")]
    pub q_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assigned_to_emails: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Question {
    pub fn is_assigned_to(&self, email: &str) -> bool {
        self.assigned_to_emails.iter().any(|e| e == email)
    }

    /// Options a student picks from; boolean questions fall back to True/False.
    pub fn choices(&self) -> Vec<String> {
        match self.q_type {
            QuestionType::Boolean if self.options.is_empty() => {
                BOOLEAN_OPTIONS.iter().map(|s| s.to_string()).collect()
            }
            QuestionType::Short => Vec::new(),
            _ => self.options.clone(),
        }
    }

    pub fn apply(&mut self, input: QuestionInput) {
        let input = input.normalized();
        self.question_text = input.question_text;
        self.q_type = input.q_type;
        self.options = input.options;
        self.correct_answer = input.correct_answer;
        self.subject = input.subject;
        self.difficulty = input.difficulty;
        self.tags = input.tags;
        self.assigned_to_emails = input.assigned_to_emails;
    }
}

/// Question fields as sent by an administrator, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuestionInput {
    #[serde(default)]
    pub question_text: String,
    #[serde(rename = "type", default)]
    pub q_type: QuestionType,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub assigned_to_emails: Vec<String>,
}

impl QuestionInput {
    pub fn normalized(mut self) -> Self {
        self.question_text = self.question_text.trim().to_string();
        self.options = self.options.into_iter().map(|o| o.trim().to_string()).collect();
        match self.q_type {
            QuestionType::Boolean if self.options.is_empty() => {
                self.options = BOOLEAN_OPTIONS.iter().map(|s| s.to_string()).collect();
            }
            QuestionType::Short => self.options.clear(),
            _ => {}
        }
        self.subject = self.subject.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self.tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let mut seen = HashSet::new();
        self.assigned_to_emails = self
            .assigned_to_emails
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty() && seen.insert(e.clone()))
            .collect();
        self
    }

    pub fn into_question(self, id: String, created_at: DateTime<Utc>) -> Question {
        let input = self.normalized();
        Question {
            id,
            question_text: input.question_text,
            q_type: input.q_type,
            options: input.options,
            correct_answer: input.correct_answer,
            subject: input.subject,
            difficulty: input.difficulty,
            tags: input.tags,
            assigned_to_emails: input.assigned_to_emails,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub image: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: String,
    pub student_email: String,
    pub answers: Vec<AnswerEntry>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    pub submitted_at: DateTime<Utc>,
}

/// Wire form of one exam attempt as assembled by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub student_email: String,
    pub answers: Vec<AnswerEntry>,
    pub snapshots: Vec<Snapshot>,
    pub submitted_at: DateTime<Utc>,
}

/// Submit body as received; every field is checked by hand so malformed input
/// turns into validation issues instead of a decode failure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub student_email: Option<Value>,
    pub answers: Option<Value>,
    pub snapshots: Option<Value>,
    pub submitted_at: Option<Value>,
}

/// A validated submission that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub student_email: String,
    pub answers: Vec<AnswerEntry>,
    pub snapshots: Vec<Snapshot>,
}

impl NewSubmission {
    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        if self.student_email.trim().is_empty() {
            issues.push(ValidationIssue::new("studentEmail", "must be a non-empty string"));
        }
        if self.answers.is_empty() {
            issues.push(ValidationIssue::new("answers", "must be a non-empty array"));
        }
        for (i, a) in self.answers.iter().enumerate() {
            if a.question_id.trim().is_empty() {
                issues.push(ValidationIssue::new(format!("answers[{i}].questionId"), "must not be empty"));
            }
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub issue: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, issue: impl Into<String>) -> Self {
        Self { field: field.into(), issue: issue.into() }
    }
}

pub fn normalize_submission(payload: SubmitPayload, now: DateTime<Utc>) -> Result<NewSubmission, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let student_email = match payload.student_email {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            issues.push(ValidationIssue::new("studentEmail", "must be a non-empty string"));
            String::new()
        }
    };

    let mut answers = Vec::new();
    match payload.answers {
        Some(Value::Array(items)) if !items.is_empty() => {
            for (i, item) in items.iter().enumerate() {
                let question_id = match item.get("questionId") {
                    Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                    _ => {
                        issues.push(ValidationIssue::new(format!("answers[{i}].questionId"), "must be a non-empty string"));
                        continue;
                    }
                };
                // Anything other than a string counts as unanswered.
                let answer = match item.get("answer") {
                    Some(Value::String(s)) => s.clone(),
                    _ => String::new(),
                };
                answers.push(AnswerEntry { question_id, answer });
            }
        }
        _ => issues.push(ValidationIssue::new("answers", "must be a non-empty array")),
    }

    let snapshots = match payload.snapshots {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Snapshot {
                image: item
                    .get("image")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                timestamp: item
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or(now),
            })
            .collect(),
        _ => Vec::new(),
    };

    if !issues.is_empty() {
        return Err(issues);
    }
    let submission = NewSubmission { student_email, answers, snapshots };
    submission.validate()?;
    Ok(submission)
}

pub fn validate_question(q: &QuestionInput) -> Result<(), Vec<ValidationIssue>> {
    let issues = question_issues(q, "");
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

pub fn validate_questions(items: &[QuestionInput]) -> Result<(), Vec<ValidationIssue>> {
    let issues: Vec<_> = items
        .iter()
        .enumerate()
        .flat_map(|(i, q)| question_issues(q, &format!("questions[{i}].")))
        .collect();
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn question_issues(raw: &QuestionInput, prefix: &str) -> Vec<ValidationIssue> {
    let q = raw.clone().normalized();
    let mut issues = Vec::new();

    if q.question_text.is_empty() {
        issues.push(ValidationIssue::new(format!("{prefix}questionText"), "must not be empty"));
    }
    if q.correct_answer.trim().is_empty() {
        issues.push(ValidationIssue::new(format!("{prefix}correctAnswer"), "must not be empty"));
    }

    if q.q_type == QuestionType::Mcq {
        if q.options.len() < 2 {
            issues.push(ValidationIssue::new(format!("{prefix}options"), "must contain at least 2 options"));
        }
        let mut seen = HashSet::new();
        for (j, opt) in q.options.iter().enumerate() {
            if opt.is_empty() {
                issues.push(ValidationIssue::new(format!("{prefix}options[{j}]"), "must not be empty"));
            }
            if !seen.insert(opt.as_str()) {
                issues.push(ValidationIssue::new(format!("{prefix}options[{j}]"), "must be unique"));
            }
        }
    }
    if q.q_type.is_choice()
        && !q.correct_answer.trim().is_empty()
        && !q.options.iter().any(|o| *o == q.correct_answer)
    {
        issues.push(ValidationIssue::new(format!("{prefix}correctAnswer"), "must be one of the options"));
    }

    issues
}
