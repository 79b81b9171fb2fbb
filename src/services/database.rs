use crate::config::Config;
use crate::error::Result;
use serde::Serialize;
use surrealdb::{
    engine::remote::http::{Client, Http},
    opt::auth::Root,
    Response, Surreal,
};
use tracing::{debug, error, info};

/// Tables and indexes the stores rely on. DEFINE statements are idempotent.
const SCHEMA: &str = r#"
    DEFINE TABLE notification SCHEMALESS;
    DEFINE INDEX notification_recipient ON TABLE notification COLUMNS recipient_id, created_ts;
    DEFINE TABLE follow SCHEMALESS;
    DEFINE INDEX follow_pair ON TABLE follow COLUMNS follower_id, following_id UNIQUE;
    DEFINE INDEX follow_following ON TABLE follow COLUMNS following_id;
"#;

/// 数据库服务
#[derive(Clone)]
pub struct Database {
    pub client: Surreal<Client>,
    pub config: Config,
}

impl Database {
    /// 创建新的数据库实例
    pub async fn new(config: &Config) -> Result<Self> {
        info!("Initializing database connection to {}", config.database_url);

        let address = config
            .database_url
            .trim_start_matches("http://")
            .trim_end_matches('/');

        let client = Surreal::new::<Http>(address).await?;
        client
            .signin(Root {
                username: &config.database_username,
                password: &config.database_password,
            })
            .await?;
        client
            .use_ns(&config.database_namespace)
            .use_db(&config.database_name)
            .await?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// 验证数据库连接
    pub async fn verify_connection(&self) -> Result<()> {
        match self.query("INFO FOR DB").await {
            Ok(_) => {
                info!("Database connection verified successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to verify database connection: {}", e);
                Err(e)
            }
        }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        self.query(SCHEMA).await?;
        info!("Notification schema ensured");
        Ok(())
    }

    /// 执行原始SQL查询
    pub async fn query(&self, sql: &str) -> Result<Response> {
        debug!("Executing query: {}", sql);
        let response = self.client.query(sql).await?;
        Ok(response.check()?)
    }

    /// 执行带参数的查询
    pub async fn query_with_params<P>(&self, sql: &str, params: P) -> Result<Response>
    where
        P: Serialize + 'static,
    {
        debug!("Executing query: {}", sql);
        let response = self.client.query(sql).bind(params).await?;
        Ok(response.check()?)
    }
}
