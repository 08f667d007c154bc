use crate::analytics::{ChartPoint, GroupCount};
use crate::models::{AnalyticEvent, Domain, Link, LinkRow, NewAnalyticEvent, NewLink};
use crate::storage::trait_def::{allowed_column, unix_now};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

const LINK_COLUMNS: &str = "id, slug, domain_id, owner_id, original_url, targets, \
     last_used_target_index, click_count, is_cloaked, rotation_start, rotation_end, \
     click_limit, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, link_id, clicked_at, ip_address, user_agent, country, city, \
     device_type, browser, os, referrer";

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id BIGSERIAL PRIMARY KEY,
                host TEXT NOT NULL UNIQUE,
                verified BOOLEAN NOT NULL DEFAULT FALSE,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id BIGSERIAL PRIMARY KEY,
                slug TEXT NOT NULL,
                domain_id BIGINT REFERENCES domains(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                original_url TEXT NOT NULL,
                targets TEXT NOT NULL DEFAULT '[]',
                last_used_target_index BIGINT,
                click_count BIGINT NOT NULL DEFAULT 0,
                is_cloaked BOOLEAN NOT NULL DEFAULT FALSE,
                rotation_start BIGINT,
                rotation_end BIGINT,
                click_limit BIGINT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_links_scope_slug ON links((COALESCE(domain_id, 0)), slug)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytic_events (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                clicked_at BIGINT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                country TEXT,
                city TEXT,
                device_type TEXT NOT NULL,
                browser TEXT,
                os TEXT,
                referrer TEXT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_link_time ON analytic_events(link_id, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_domain(&self, host: &str, verified: bool) -> StorageResult<Domain> {
        let created_at = unix_now()?;

        let domain = sqlx::query_as::<_, Domain>(
            r#"
            INSERT INTO domains (host, verified, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (host) DO NOTHING
            RETURNING id, host, verified, created_at
            "#,
        )
        .bind(host.to_lowercase())
        .bind(verified)
        .bind(created_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        domain.ok_or(StorageError::Conflict)
    }

    async fn find_verified_domain(&self, host: &str) -> Result<Option<Domain>> {
        let domain = sqlx::query_as::<_, Domain>(
            r#"
            SELECT id, host, verified, created_at
            FROM domains
            WHERE host = $1 AND verified = TRUE
            "#,
        )
        .bind(host)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(domain)
    }

    async fn create_link(&self, link: &NewLink) -> StorageResult<Link> {
        let now = unix_now()?;
        let targets =
            serde_json::to_string(&link.targets).map_err(|e| StorageError::Other(e.into()))?;

        let row = sqlx::query_as::<_, LinkRow>(&format!(
            r#"
            INSERT INTO links (slug, domain_id, owner_id, original_url, targets, is_cloaked,
                               rotation_start, rotation_end, click_limit, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(&link.slug)
        .bind(link.domain_id)
        .bind(&link.owner_id)
        .bind(&link.original_url)
        .bind(targets)
        .bind(link.is_cloaked)
        .bind(link.rotation_start)
        .bind(link.rotation_end)
        .bind(link.click_limit)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Link::from).ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(Link::from))
    }

    async fn find_link(&self, slug: &str, domain_id: Option<i64>) -> Result<Option<Link>> {
        // IS NOT DISTINCT FROM matches NULL to NULL, keeping the shared pool a scope of its own
        let row = sqlx::query_as::<_, LinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE slug = $1 AND domain_id IS NOT DISTINCT FROM $2"
        ))
        .bind(slug)
        .bind(domain_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(Link::from))
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_clicks(&self, link_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET click_count = click_count + 1
            WHERE id = $1
            "#,
        )
        .bind(link_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn persist_cursor(&self, link_id: i64, index: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE links
            SET last_used_target_index = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(index)
        .bind(unix_now()?)
        .bind(link_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_event(&self, event: &NewAnalyticEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO analytic_events (link_id, clicked_at, ip_address, user_agent, country,
                                         city, device_type, browser, os, referrer)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.link_id)
        .bind(event.timestamp)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.country)
        .bind(&event.city)
        .bind(event.device_type.as_str())
        .bind(&event.browser)
        .bind(&event.os)
        .bind(&event.referrer)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn clicks_by_day(&self, link_id: i64, since: Option<i64>) -> Result<Vec<ChartPoint>> {
        let points = sqlx::query_as::<_, ChartPoint>(
            r#"
            SELECT to_char(to_timestamp(clicked_at) AT TIME ZONE 'UTC', 'YYYY-MM-DD') AS date,
                   COUNT(*) AS clicks
            FROM analytic_events
            WHERE link_id = $1 AND ($2::BIGINT IS NULL OR clicked_at >= $2)
            GROUP BY date
            ORDER BY date ASC
            "#,
        )
        .bind(link_id)
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(points)
    }

    async fn recent_events(
        &self,
        link_id: i64,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AnalyticEvent>> {
        let events = sqlx::query_as::<_, AnalyticEvent>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM analytic_events
            WHERE link_id = $1 AND ($2::BIGINT IS NULL OR clicked_at >= $2)
            ORDER BY clicked_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(link_id)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(events)
    }

    async fn top_values(
        &self,
        link_id: i64,
        column: &str,
        since: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<GroupCount>> {
        let column = allowed_column(column)?.as_sql();

        let groups = sqlx::query_as::<_, GroupCount>(&format!(
            r#"
            SELECT {column} AS value, COUNT(*) AS count
            FROM analytic_events
            WHERE link_id = $1
              AND {column} IS NOT NULL AND {column} <> ''
              AND ($2::BIGINT IS NULL OR clicked_at >= $2)
            GROUP BY {column}
            ORDER BY count DESC, value ASC
            LIMIT $3
            "#
        ))
        .bind(link_id)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(groups)
    }
}
