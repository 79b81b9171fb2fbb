use serde::{Deserialize, Serialize};
use std::env;

/// Backing store used for notifications and follow edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Surreal,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "surreal" | "surrealdb" => Ok(StoreBackend::Surreal),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!("unknown STORE_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Database configuration
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub database_namespace: String,
    pub database_name: String,
    pub database_username: String,
    pub database_password: String,

    // Authentication configuration
    pub jwt_secret: String,

    // Frontend URLs
    pub frontend_url: String,

    // Notification settings
    pub default_notifications_per_page: u32,
    pub max_notifications_per_page: u32,
    pub default_unread_limit: u32,

    // Realtime broadcasting
    pub broadcast_app_key: String,
    pub broadcast_app_secret: String,
    pub ws_stale_after_secs: u64,
    pub ws_sweep_interval_secs: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // 生产环境必须显式配置密钥
        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if environment == "development" => "courtside-dev-secret".to_string(),
            Err(_) => return Err(anyhow::anyhow!("JWT_SECRET must be set")),
        };

        Ok(Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment,
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "courtside=debug,tower_http=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),

            store_backend: env::var("STORE_BACKEND")
                .unwrap_or_else(|_| "surreal".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            database_namespace: env::var("DATABASE_NAMESPACE")
                .unwrap_or_else(|_| "courtside".to_string()),
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            database_username: env::var("DATABASE_USERNAME")
                .unwrap_or_else(|_| "root".to_string()),
            database_password: env::var("DATABASE_PASSWORD")
                .unwrap_or_else(|_| "root".to_string()),

            jwt_secret,

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),

            default_notifications_per_page: env::var("DEFAULT_NOTIFICATIONS_PER_PAGE")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            max_notifications_per_page: env::var("MAX_NOTIFICATIONS_PER_PAGE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            default_unread_limit: env::var("DEFAULT_UNREAD_LIMIT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            broadcast_app_key: env::var("BROADCAST_APP_KEY")
                .unwrap_or_else(|_| "courtside-app".to_string()),
            broadcast_app_secret: env::var("BROADCAST_APP_SECRET")
                .unwrap_or_else(|_| "courtside-broadcast-secret".to_string()),
            ws_stale_after_secs: env::var("WS_STALE_AFTER_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            ws_sweep_interval_secs: env::var("WS_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Absolute frontend link for a deep-link path such as `/clips/12`.
    pub fn frontend_link(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.frontend_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "development".to_string(),
            log_level: "courtside=debug".to_string(),
            log_format: "pretty".to_string(),
            store_backend: StoreBackend::Memory,
            database_url: "http://localhost:8000".to_string(),
            database_namespace: "courtside".to_string(),
            database_name: "notifications".to_string(),
            database_username: "root".to_string(),
            database_password: "root".to_string(),
            jwt_secret: "courtside-dev-secret".to_string(),
            frontend_url: "http://localhost:3001".to_string(),
            default_notifications_per_page: 20,
            max_notifications_per_page: 100,
            default_unread_limit: 10,
            broadcast_app_key: "courtside-app".to_string(),
            broadcast_app_secret: "courtside-broadcast-secret".to_string(),
            ws_stale_after_secs: 300,
            ws_sweep_interval_secs: 60,
            cors_allowed_origins: "http://localhost:3001".to_string(),
        }
    }
}
