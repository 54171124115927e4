//! HTTP client for the exam REST surface, plus the login context handed to
//! components that need the current identity.

use crate::error::ErrorBody;
use crate::handlers::LoginResponse;
use crate::models::{Question, Role, SubmissionRequest};
use crate::monitoring::{EnrichedSubmission, StudentReport};
use crate::session::ExamSession;
use futures::future::BoxFuture;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("{0}")]
    Auth(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    pub message: String,
    pub id: String,
}

#[derive(Clone)]
pub struct ExamClient {
    http: reqwest::Client,
    base_url: String,
}

impl ExamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str, role: Role) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(self.url("/api/auth/register"))
            .json(&json!({ "name": name, "email": email, "password": password, "role": role }))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn assigned_questions(&self, email: &str) -> Result<Vec<Question>, ClientError> {
        let resp = self
            .http
            .get(self.url("/api/questions/getquestions"))
            .query(&[("email", email)])
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn submit(&self, request: &SubmissionRequest) -> Result<SubmitReceipt, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/submission/submit"))
            .json(request)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn all_submissions(&self) -> Result<Vec<EnrichedSubmission>, ClientError> {
        let resp = self.http.get(self.url("/api/submission/getAll")).send().await?;
        decode(resp).await
    }

    pub async fn monitoring(&self) -> Result<Vec<StudentReport>, ClientError> {
        let resp = self.http.get(self.url("/api/submission/monitoring")).send().await?;
        decode(resp).await
    }

    pub async fn delete_submission(&self, id: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/submission/delete/{id}")))
            .send()
            .await?;
        check(resp).await.map(|_| ())
    }
}

async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or(text);
    Err(ClientError::Status { status, message })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    Ok(check(resp).await?.json::<T>().await?)
}

/// Seam between the session controller and the backend.
pub trait ExamApi: Send + Sync {
    fn fetch_assigned_questions(&self, email: &str) -> BoxFuture<'static, Result<Vec<Question>, ClientError>>;

    fn submit_attempt(&self, request: SubmissionRequest) -> BoxFuture<'static, Result<SubmitReceipt, ClientError>>;
}

impl ExamApi for ExamClient {
    fn fetch_assigned_questions(&self, email: &str) -> BoxFuture<'static, Result<Vec<Question>, ClientError>> {
        let client = self.clone();
        let email = email.to_string();
        Box::pin(async move { client.assigned_questions(&email).await })
    }

    fn submit_attempt(&self, request: SubmissionRequest) -> BoxFuture<'static, Result<SubmitReceipt, ClientError>> {
        let client = self.clone();
        Box::pin(async move { client.submit(&request).await })
    }
}

/// Identity of the logged-in user. Created by [`AuthContext::login`], dropped on logout.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthContext {
    email: String,
    role: Role,
    token: String,
}

impl AuthContext {
    pub fn new(email: impl Into<String>, role: Role, token: impl Into<String>) -> Self {
        Self { email: email.into(), role, token: token.into() }
    }

    /// Logs in and rejects accounts whose role is not `expected`.
    pub async fn login(client: &ExamClient, email: &str, password: &str, expected: Role) -> Result<Self, ClientError> {
        let resp = client.login(email, password).await.map_err(|e| match e {
            ClientError::Status { status, message } if status == StatusCode::UNAUTHORIZED => {
                ClientError::Auth(message)
            }
            other => other,
        })?;
        if resp.role != expected {
            return Err(ClientError::Auth(format!(
                "access denied, only {}s can log in here",
                expected.as_str()
            )));
        }
        info!(email = %resp.email, role = resp.role.as_str(), "logged in");
        Ok(Self::new(resp.email, resp.role, resp.token))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Ends the login. A running exam session is torn down with it, which
    /// stops its timers and releases the camera.
    pub fn logout(self, session: Option<ExamSession>) {
        if let Some(session) = session {
            drop(session);
            info!(email = %self.email, "exam session closed on logout");
        }
        info!(email = %self.email, "logged out");
    }
}
