//! The `opportunities` table: cursor reads and row upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oppsync_core::OpportunityRow;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::debug;

use crate::StoreError;

#[async_trait]
pub trait OpportunityStore: Send + Sync {
    /// Largest `created_at` in the table, or `None` when it is empty.
    async fn max_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Insert the row, or overwrite everything but `created_at` when the id exists.
    async fn upsert(&self, row: &OpportunityRow) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbSettings {
    Url(String),
    Parts {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: String,
    },
}

impl DbSettings {
    pub fn connect_options(&self) -> Result<PgConnectOptions, StoreError> {
        match self {
            DbSettings::Url(url) => Ok(url.parse::<PgConnectOptions>()?),
            DbSettings::Parts {
                host,
                port,
                database,
                user,
                password,
            } => Ok(PgConnectOptions::new()
                .host(host)
                .port(*port)
                .database(database)
                .username(user)
                .password(password)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgOpportunityStore {
    pool: PgPool,
}

impl PgOpportunityStore {
    pub async fn connect(settings: &DbSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(settings.connect_options()?)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl OpportunityStore for PgOpportunityStore {
    async fn max_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let max: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM opportunities")
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    async fn upsert(&self, row: &OpportunityRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, source, source_url, source_md,
                data_en, data_ar,
                category, subtype, country, fund_type, target_segment,
                deadline, is_remote,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                source = EXCLUDED.source,
                source_url = EXCLUDED.source_url,
                source_md = EXCLUDED.source_md,
                data_en = EXCLUDED.data_en,
                data_ar = EXCLUDED.data_ar,
                category = EXCLUDED.category,
                subtype = EXCLUDED.subtype,
                country = EXCLUDED.country,
                fund_type = EXCLUDED.fund_type,
                target_segment = EXCLUDED.target_segment,
                deadline = EXCLUDED.deadline,
                is_remote = EXCLUDED.is_remote,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.id)
        .bind(&row.source)
        .bind(&row.source_url)
        .bind(&row.source_md)
        .bind(&row.data_en)
        .bind(&row.data_ar)
        .bind(&row.category)
        .bind(&row.subtype)
        .bind(&row.country)
        .bind(&row.fund_type)
        .bind(&row.target_segment)
        .bind(row.deadline)
        .bind(row.is_remote)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        debug!(id = %row.id, "upserted opportunity row");
        Ok(())
    }
}
