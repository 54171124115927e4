use rand::distributions::Alphanumeric;
use rand::Rng;
use std::net::SocketAddr;
use tracing::warn;

const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub local_state_path: Option<String>,
    pub jwt_secret: String,
    pub jwt_expire_minutes: i64,
    pub cors_origins: Vec<String>,
    pub body_limit_bytes: usize,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("BACKEND_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("BACKEND_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        // An explicitly empty path turns persistence off.
        let local_state_path = match std::env::var("LOCAL_STATE_PATH") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v),
            Err(_) => Some(format!("{}/local_state.json", env!("CARGO_MANIFEST_DIR"))),
        };

        let jwt_secret = match std::env::var("JWT_SECRET").ok().filter(|v| !v.trim().is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET is not set, issued tokens will not survive a restart");
                random_secret()
            }
        };
        let jwt_expire_minutes = std::env::var("JWT_EXPIRE_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let body_limit_bytes = std::env::var("BODY_LIMIT_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_BODY_LIMIT);

        Ok(Self {
            host,
            port,
            local_state_path,
            jwt_secret,
            jwt_expire_minutes,
            cors_origins,
            body_limit_bytes,
        })
    }

    /// Settings for tests and embedded use: no persistence, fresh secret, any origin.
    pub fn ephemeral() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            local_state_path: None,
            jwt_secret: random_secret(),
            jwt_expire_minutes: 60,
            cors_origins: Vec::new(),
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_settings_disable_persistence() {
        let s = Settings::ephemeral();
        assert!(s.local_state_path.is_none());
        assert_eq!(s.jwt_secret.len(), 48);
        assert!(s.bind_addr().is_ok());
    }
}
