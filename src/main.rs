use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use courtside::{
    config::{Config, StoreBackend},
    routes,
    services::{
        store::{SurrealFollowStore, SurrealNotificationStore},
        Database,
    },
    state::{AppState, Stores},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置
    dotenv::dotenv().ok();
    let config = Config::from_env()?;

    // 初始化日志
    init_tracing(&config);

    info!("Starting courtside notification service ({})...", config.environment);

    let stores = match config.store_backend {
        StoreBackend::Surreal => {
            let db = match Database::new(&config).await {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    error!("Failed to create database connection: {}", e);
                    return Err(anyhow::anyhow!("Database initialization failed"));
                }
            };
            db.verify_connection().await?;
            db.ensure_schema().await?;
            info!("Database connection established successfully");

            Stores {
                notifications: Arc::new(SurrealNotificationStore::new(db.clone())),
                follows: Arc::new(SurrealFollowStore::new(db)),
            }
        }
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("Running with the in-memory store in production; notifications will not survive a restart");
            }
            Stores::memory()
        }
    };

    // 创建应用状态
    let app_state = Arc::new(AppState::build(&config, stores));

    // 启动后台任务
    let _sweeper = app_state
        .websocket_service
        .start_sweeper(Duration::from_secs(config.ws_sweep_interval_secs.max(1)));

    let app = routes::app(app_state);

    // 启动主服务器
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Starting server on http://{}", addr);

    axum::Server::bind(&addr.parse()?)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("courtside=debug,tower_http=debug"));

    if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
