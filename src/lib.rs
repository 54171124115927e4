pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod monitoring;
pub mod routes;
pub mod scoring;
pub mod security;
pub mod session;
pub mod state;

pub fn build_state(settings: config::Settings) -> anyhow::Result<state::AppState> {
    if let Some(path) = settings.local_state_path.as_deref() {
        tracing::info!("local state persisted to {}", path);
    }
    Ok(state::AppState::new(settings))
}
