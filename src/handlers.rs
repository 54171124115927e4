use crate::error::{AppError, ErrorDetail};
use crate::models::{
    normalize_submission, validate_question, validate_questions, Question, QuestionInput, Role,
    Submission, SubmitPayload, ValidationIssue,
};
use crate::monitoring::{self, EnrichedSubmission, StudentReport};
use crate::security;
use crate::state::{AppState, StoreError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use validator::Validate;

static RATE_LIMIT: Lazy<DashMap<String, (u32, Instant)>> = Lazy::new(DashMap::new);

const RATE_WINDOW: Duration = Duration::from_secs(60);

fn check_rate_limit(scope: &str, key: &str, limit_per_minute: u32) -> bool {
    let now = Instant::now();
    RATE_LIMIT.retain(|_, (_, started)| now.duration_since(*started) <= RATE_WINDOW);
    let full_key = format!("{scope}:{key}");
    if let Some(mut entry) = RATE_LIMIT.get_mut(&full_key) {
        if now.duration_since(entry.1) > RATE_WINDOW {
            *entry = (1, now);
            true
        } else if entry.0 >= limit_per_minute {
            false
        } else {
            entry.0 += 1;
            true
        }
    } else {
        RATE_LIMIT.insert(full_key, (1, now));
        true
    }
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_key(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("local")
}

fn body<T>(payload: Result<Json<T>, JsonRejection>, req_id: &str) -> Result<T, AppError> {
    payload.map(|Json(v)| v).map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", rejection.body_text(), req_id)
        } else {
            AppError::validation(rejection.body_text(), req_id)
        }
    })
}

fn store_error(err: StoreError, req_id: &str) -> AppError {
    match err {
        StoreError::Validation(issues) => {
            AppError::validation("validation failed", req_id).with_issues(issues)
        }
        StoreError::NotFound(what) => AppError::not_found(format!("{what} not found"), req_id),
        StoreError::Conflict(what) => {
            AppError::new(StatusCode::CONFLICT, "CONFLICT", format!("{what} already exists"), req_id)
        }
    }
}

fn validator_issues(errors: validator::ValidationErrors) -> Vec<ValidationIssue> {
    let mut issues: Vec<ValidationIssue> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                let issue = e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string());
                ValidationIssue::new(field.to_string(), issue)
            })
        })
        .collect();
    issues.sort_by(|a, b| a.field.cmp(&b.field));
    issues
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPayload {
    #[serde(default)]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "must be at least 6 characters"))]
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct UserOut {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<UserOut>), AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("auth_register", client_key(&headers), 20) {
        return Err(AppError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "too many requests", req_id));
    }
    let mut payload = body(payload, &req_id)?;
    payload.name = payload.name.trim().to_string();
    payload.email = payload.email.trim().to_string();

    let mut issues = match payload.validate() {
        Ok(()) => Vec::new(),
        Err(errors) => validator_issues(errors),
    };
    let role = Role::parse(&payload.role);
    if role.is_none() {
        issues.push(ValidationIssue::new("role", "must be one of student, teacher"));
    }
    let Some(role) = role.filter(|_| issues.is_empty()) else {
        return Err(AppError::validation("invalid registration data", req_id).with_issues(issues));
    };

    let hash = security::hash_password(&payload.password)
        .map_err(|e| AppError::internal(e, "password hash failed", req_id.clone()))?;
    let user = state
        .register_user(payload.name, payload.email, hash, role)
        .await
        .map_err(|e| store_error(e, &req_id))?;
    info!(email = %user.email, role = role.as_str(), "user registered");

    Ok((
        StatusCode::CREATED,
        Json(UserOut { id: user.id, name: user.name, email: user.email, role: user.role }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub email: String,
    pub role: Role,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<LoginPayload>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    if !check_rate_limit("auth_login", client_key(&headers), 30) {
        return Err(AppError::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", "too many requests", req_id));
    }
    let payload = body(payload, &req_id)?;
    let email = payload.email.trim();

    let user = state
        .find_user(email)
        .await
        .ok_or_else(|| AppError::unauthorized("invalid credentials", req_id.clone()))?;
    let valid = security::verify_password(&payload.password, &user.password_hash)
        .map_err(|e| AppError::internal(e, "bad hash", req_id.clone()))?;
    if !valid {
        warn!(email = %email, "login rejected");
        return Err(AppError::unauthorized("invalid credentials", req_id));
    }

    let token = security::create_token(&user.email, user.role, &state.settings)
        .map_err(|e| AppError::internal(e, "token issue failed", req_id.clone()))?;
    Ok(Json(LoginResponse { token, email: user.email, role: user.role }))
}

pub async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let Some(TypedHeader(Authorization(bearer))) = auth else {
        return Err(AppError::unauthorized("access denied, token missing", req_id));
    };
    let claims = security::verify_token(bearer.token(), &state.settings)
        .map_err(|e| AppError::new(StatusCode::FORBIDDEN, "FORBIDDEN", e.to_string(), req_id))?;
    Ok(Json(json!({ "email": claims.sub, "role": claims.role })))
}

#[derive(Debug, Deserialize)]
pub struct AssignedQuery {
    pub email: Option<String>,
}

pub async fn get_questions(
    State(state): State<AppState>,
    Query(query): Query<AssignedQuery>,
) -> Json<Vec<Question>> {
    let email = query.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    Json(state.find_assigned_questions(email).await)
}

pub async fn get_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Question>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .get_question(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("question not found", req_id))
}

pub async fn create_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Question>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let input = body(payload, &req_id)?;
    if let Err(issues) = validate_question(&input) {
        return Err(AppError::validation("question validation failed", req_id).with_issues(issues));
    }
    let question = state.create_question(input).await;
    Ok((StatusCode::CREATED, Json(question)))
}

#[derive(Debug, Deserialize)]
pub struct BulkPayload {
    pub questions: Option<Value>,
}

pub async fn bulk_create_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BulkPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let payload = body(payload, &req_id)?;
    let Some(Value::Array(items)) = payload.questions else {
        return Err(AppError::validation("invalid questions data", req_id));
    };

    let mut inputs = Vec::with_capacity(items.len());
    let mut details = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<QuestionInput>(item) {
            Ok(input) => inputs.push(input),
            Err(e) => details.push(ErrorDetail { field: format!("questions[{i}]"), issue: e.to_string() }),
        }
    }
    if let Err(issues) = validate_questions(&inputs) {
        details.extend(issues.into_iter().map(ErrorDetail::from));
    }
    if !details.is_empty() {
        return Err(AppError::validation("question validation failed", req_id).with_details(details));
    }

    let count = state.create_questions(inputs).await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Questions created successfully", "count": count })),
    ))
}

pub async fn update_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<QuestionInput>, JsonRejection>,
) -> Result<Json<Question>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let input = body(payload, &req_id)?;
    if let Err(issues) = validate_question(&input) {
        return Err(AppError::validation("question validation failed", req_id).with_issues(issues));
    }
    let question = state
        .update_question(&id, input)
        .await
        .map_err(|e| store_error(e, &req_id))?;
    Ok(Json(question))
}

pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state.delete_question(&id).await.map_err(|e| store_error(e, &req_id))?;
    Ok(Json(json!({ "message": "Deleted successfully" })))
}

pub async fn submit_exam(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubmitPayload>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let payload = body(payload, &req_id)?;
    let doc = normalize_submission(payload, Utc::now())
        .map_err(|issues| AppError::validation("invalid submission", req_id.clone()).with_issues(issues))?;

    let submission = state
        .create_submission(doc)
        .await
        .map_err(|e| store_error(e, &req_id))?;
    info!(
        id = %submission.id,
        student = %submission.student_email,
        answers = submission.answers.len(),
        snapshots = submission.snapshots.len(),
        "submission stored"
    );
    Ok(Json(json!({ "message": "Submission successful", "id": submission.id })))
}

pub async fn get_submission_by_student(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(student_email): Path<String>,
) -> Result<Json<Submission>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state
        .find_submission_by_student(student_email.trim())
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("submission not found for this student", req_id))
}

pub async fn get_all_submissions(State(state): State<AppState>) -> Json<Vec<EnrichedSubmission>> {
    Json(state.enriched_submissions().await)
}

pub async fn monitoring_report(State(state): State<AppState>) -> Json<Vec<StudentReport>> {
    Json(monitoring::build_report(state.enriched_submissions().await))
}

pub async fn delete_submission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let req_id = request_id_from_headers(&headers);
    state.delete_submission(&id).await.map_err(|e| store_error(e, &req_id))?;
    info!(id = %id, "submission deleted");
    Ok(Json(json!({ "message": "Submission deleted successfully" })))
}
