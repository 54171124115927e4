use crate::config::Settings;
use crate::models::{NewSubmission, Question, QuestionInput, Role, Submission, ValidationIssue};
use crate::monitoring::{self, EnrichedSubmission};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::{fs, path::Path};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Conflict(&'static str),
}

pub struct InMemoryDb {
    pub users: RwLock<HashMap<String, User>>,
    pub questions: RwLock<Vec<Question>>,
    pub submissions: RwLock<Vec<Submission>>,
    persist_lock: Mutex<()>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistentSnapshot {
    #[serde(default)]
    users: HashMap<String, User>,
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    submissions: Vec<Submission>,
}

impl InMemoryDb {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path
            .and_then(|path| {
                let raw = fs::read_to_string(path).ok()?;
                match serde_json::from_str::<PersistentSnapshot>(&raw) {
                    Ok(s) => {
                        info!(
                            questions = s.questions.len(),
                            submissions = s.submissions.len(),
                            "loaded local state from {}",
                            path
                        );
                        Some(s)
                    }
                    Err(err) => {
                        warn!("failed to read local snapshot {}: {}", path, err);
                        None
                    }
                }
            })
            .unwrap_or_default();

        Self {
            users: RwLock::new(snapshot.users),
            questions: RwLock::new(snapshot.questions),
            submissions: RwLock::new(snapshot.submissions),
            persist_lock: Mutex::new(()),
        }
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            users: self.users.read().await.clone(),
            questions: self.questions.read().await.clone(),
            submissions: self.submissions.read().await.clone(),
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            db: Arc::new(InMemoryDb::new(settings.local_state_path.as_deref())),
            settings: Arc::new(settings),
        }
    }

    /// All questions when `email` is `None`, otherwise only those assigned to it.
    pub async fn find_assigned_questions(&self, email: Option<&str>) -> Vec<Question> {
        let questions = self.db.questions.read().await;
        match email {
            Some(email) => questions.iter().filter(|q| q.is_assigned_to(email)).cloned().collect(),
            None => questions.clone(),
        }
    }

    pub async fn get_question(&self, id: &str) -> Option<Question> {
        self.db.questions.read().await.iter().find(|q| q.id == id).cloned()
    }

    pub async fn create_question(&self, input: QuestionInput) -> Question {
        let question = input.into_question(new_id(), Utc::now());
        self.db.questions.write().await.push(question.clone());
        self.persist_or_warn("create_question").await;
        question
    }

    pub async fn create_questions(&self, inputs: Vec<QuestionInput>) -> usize {
        let now = Utc::now();
        let created: Vec<Question> = inputs
            .into_iter()
            .map(|input| input.into_question(new_id(), now))
            .collect();
        let count = created.len();
        self.db.questions.write().await.extend(created);
        self.persist_or_warn("create_questions").await;
        count
    }

    pub async fn update_question(&self, id: &str, input: QuestionInput) -> Result<Question, StoreError> {
        let updated = {
            let mut questions = self.db.questions.write().await;
            let question = questions
                .iter_mut()
                .find(|q| q.id == id)
                .ok_or(StoreError::NotFound("question"))?;
            question.apply(input);
            question.clone()
        };
        self.persist_or_warn("update_question").await;
        Ok(updated)
    }

    /// Submissions that reference the question are left untouched.
    pub async fn delete_question(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut questions = self.db.questions.write().await;
            let pos = questions
                .iter()
                .position(|q| q.id == id)
                .ok_or(StoreError::NotFound("question"))?;
            questions.remove(pos);
        }
        self.persist_or_warn("delete_question").await;
        Ok(())
    }

    pub async fn create_submission(&self, doc: NewSubmission) -> Result<Submission, StoreError> {
        doc.validate().map_err(StoreError::Validation)?;
        let submission = Submission {
            id: new_id(),
            student_email: doc.student_email,
            answers: doc.answers,
            snapshots: doc.snapshots,
            submitted_at: Utc::now(),
        };
        self.db.submissions.write().await.push(submission.clone());
        self.persist_or_warn("create_submission").await;
        Ok(submission)
    }

    pub async fn list_submissions(&self) -> Vec<Submission> {
        self.db.submissions.read().await.clone()
    }

    pub async fn find_submission_by_student(&self, email: &str) -> Option<Submission> {
        self.db
            .submissions
            .read()
            .await
            .iter()
            .find(|s| s.student_email == email)
            .cloned()
    }

    pub async fn delete_submission(&self, id: &str) -> Result<(), StoreError> {
        {
            let mut submissions = self.db.submissions.write().await;
            let pos = submissions
                .iter()
                .position(|s| s.id == id)
                .ok_or(StoreError::NotFound("submission"))?;
            submissions.remove(pos);
        }
        self.persist_or_warn("delete_submission").await;
        Ok(())
    }

    pub async fn enriched_submissions(&self) -> Vec<EnrichedSubmission> {
        let submissions = self.list_submissions().await;
        let questions: HashMap<String, Question> = self
            .db
            .questions
            .read()
            .await
            .iter()
            .map(|q| (q.id.clone(), q.clone()))
            .collect();
        monitoring::enrich(&submissions, &questions)
    }

    pub async fn register_user(&self, name: String, email: String, password_hash: String, role: Role) -> Result<User, StoreError> {
        let user = {
            let mut users = self.db.users.write().await;
            if users.contains_key(&email) {
                return Err(StoreError::Conflict("email"));
            }
            let user = User { id: new_id(), name, email: email.clone(), password_hash, role };
            users.insert(email, user.clone());
            user
        };
        self.persist_or_warn("register_user").await;
        Ok(user)
    }

    pub async fn find_user(&self, email: &str) -> Option<User> {
        self.db.users.read().await.get(email).cloned()
    }

    async fn persist_or_warn(&self, operation: &str) {
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after {}: {}", operation, err);
        }
    }

    /// Writers are serialized, and each one snapshots under the lock, so the
    /// last write always carries the newest state. The file is replaced by
    /// rename and is never observed half written.
    pub async fn persist_core_data(&self) -> anyhow::Result<()> {
        let Some(path) = self.settings.local_state_path.as_ref() else {
            return Ok(());
        };
        let _guard = self.db.persist_lock.lock().await;
        let snapshot = self.db.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = format!("{path}.tmp");
        tokio::fs::write(&tmp, serialized).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerEntry, QuestionType};

    fn state() -> AppState {
        AppState::new(Settings::ephemeral())
    }

    fn input(text: &str, assigned: &[&str]) -> QuestionInput {
        QuestionInput {
            question_text: text.into(),
            q_type: QuestionType::Short,
            correct_answer: "x".into(),
            assigned_to_emails: assigned.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assigned_questions_are_filtered_by_email() {
        let st = state();
        st.create_question(input("one", &["a@x.io"])).await;
        st.create_question(input("two", &["b@x.io", "a@x.io"])).await;
        st.create_question(input("three", &["b@x.io"])).await;

        let a: Vec<_> = st
            .find_assigned_questions(Some("a@x.io"))
            .await
            .into_iter()
            .map(|q| q.question_text)
            .collect();
        assert_eq!(a, vec!["one", "two"]);
        assert_eq!(st.find_assigned_questions(None).await.len(), 3);
        assert!(st.find_assigned_questions(Some("c@x.io")).await.is_empty());
    }

    #[tokio::test]
    async fn delete_submission_twice_reports_not_found() {
        let st = state();
        let sub = st
            .create_submission(NewSubmission {
                student_email: "s@x.io".into(),
                answers: vec![AnswerEntry { question_id: "q".into(), answer: "".into() }],
                snapshots: Vec::new(),
            })
            .await
            .unwrap();
        assert!(st.delete_submission(&sub.id).await.is_ok());
        assert!(matches!(st.delete_submission(&sub.id).await, Err(StoreError::NotFound(_))));
        assert!(st.list_submissions().await.is_empty());
    }

    #[tokio::test]
    async fn empty_answers_are_rejected_by_store() {
        let st = state();
        let res = st
            .create_submission(NewSubmission {
                student_email: "s@x.io".into(),
                answers: Vec::new(),
                snapshots: Vec::new(),
            })
            .await;
        assert!(matches!(res, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let st = state();
        st.register_user("A".into(), "a@x.io".into(), "h".into(), Role::Student).await.unwrap();
        let again = st.register_user("B".into(), "a@x.io".into(), "h".into(), Role::Teacher).await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_all_reach_the_snapshot() {
        let path = std::env::temp_dir().join(format!("exam_portal_{}.json", uuid::Uuid::new_v4()));
        let mut settings = Settings::ephemeral();
        settings.local_state_path = Some(path.to_string_lossy().to_string());
        let st = AppState::new(settings.clone());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let st = st.clone();
                tokio::spawn(async move {
                    st.create_submission(NewSubmission {
                        student_email: format!("s{i}@x.io"),
                        answers: vec![AnswerEntry { question_id: "q".into(), answer: "x".repeat(i) }],
                        snapshots: Vec::new(),
                    })
                    .await
                    .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let on_disk: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk["submissions"].as_array().unwrap().len(), 32);
        assert_eq!(AppState::new(settings).list_submissions().await.len(), 32);
        assert!(!std::path::Path::new(&format!("{}.tmp", path.display())).exists());
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let path = std::env::temp_dir().join(format!("exam_portal_{}.json", uuid::Uuid::new_v4()));
        let mut settings = Settings::ephemeral();
        settings.local_state_path = Some(path.to_string_lossy().to_string());

        let st = AppState::new(settings.clone());
        let q = st.create_question(input("kept", &["a@x.io"])).await;

        let reloaded = AppState::new(settings);
        assert_eq!(reloaded.get_question(&q.id).await.map(|q| q.question_text), Some("kept".into()));
        let _ = std::fs::remove_file(path);
    }
}
