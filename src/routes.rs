use crate::handlers;
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ]);
    if origins.is_empty() {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("ignoring invalid CORS origin {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(allowed)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);
    let body_limit = state.settings.body_limit_bytes;

    let auth = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/profile", get(handlers::profile));

    let questions = Router::new()
        .route("/getquestions", get(handlers::get_questions))
        .route("/getquestions/:id", get(handlers::get_question))
        .route("/questions", post(handlers::create_question))
        .route("/bulk-create", post(handlers::bulk_create_questions))
        .route("/getupdate/:id", put(handlers::update_question))
        .route("/delete/:id", delete(handlers::delete_question));

    let submissions = Router::new()
        .route("/submit", post(handlers::submit_exam))
        .route("/submission/:student_email", get(handlers::get_submission_by_student))
        .route("/getAll", get(handlers::get_all_submissions))
        .route("/monitoring", get(handlers::monitoring_report))
        .route("/delete/:id", delete(handlers::delete_submission));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api/auth", auth)
        .nest("/api/questions", questions)
        .nest("/api/submission", submissions)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
