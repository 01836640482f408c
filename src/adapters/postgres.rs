use crate::error::Result;
use crate::persistence::{PgDeliveryJournal, PgRetryEventLog};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Delivery journal sharing this pool
    pub fn journal(&self) -> Arc<PgDeliveryJournal> {
        Arc::new(PgDeliveryJournal::new(self.pool.clone()))
    }

    /// Retry event log sharing this pool
    pub fn retry_events(&self) -> Arc<PgRetryEventLog> {
        Arc::new(PgRetryEventLog::new(self.pool.clone()))
    }
}
