use crate::analytics::{ChartPoint, GroupCount};
use crate::models::{AnalyticEvent, Domain, Link, LinkRow, NewAnalyticEvent, NewLink};
use crate::storage::trait_def::{allowed_column, unix_now};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

const LINK_COLUMNS: &str = "id, slug, domain_id, owner_id, original_url, targets, \
     last_used_target_index, click_count, is_cloaked, rotation_start, rotation_end, \
     click_limit, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, link_id, clicked_at, ip_address, user_agent, country, city, \
     device_type, browser, os, referrer";

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host TEXT NOT NULL UNIQUE,
                verified INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug TEXT NOT NULL,
                domain_id INTEGER REFERENCES domains(id) ON DELETE CASCADE,
                owner_id TEXT NOT NULL,
                original_url TEXT NOT NULL,
                targets TEXT NOT NULL DEFAULT '[]',
                last_used_target_index INTEGER,
                click_count INTEGER NOT NULL DEFAULT 0,
                is_cloaked INTEGER NOT NULL DEFAULT 0,
                rotation_start INTEGER,
                rotation_end INTEGER,
                click_limit INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // NULL domain_id is its own scope, distinct from every concrete domain
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_links_scope_slug ON links(COALESCE(domain_id, 0), slug)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_links_owner ON links(owner_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytic_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id) ON DELETE CASCADE,
                clicked_at INTEGER NOT NULL,
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
            VALUES (?, ?, ?)
            ON CONFLICT(host) DO NOTHING
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
            WHERE host = ? AND verified = 1
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(Link::from).ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, id: i64) -> Result<Option<Link>> {
        let row = sqlx::query_as::<_, LinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(Link::from))
    }

    async fn find_link(&self, slug: &str, domain_id: Option<i64>) -> Result<Option<Link>> {
        let row = match domain_id {
            Some(domain_id) => {
                sqlx::query_as::<_, LinkRow>(&format!(
                    "SELECT {LINK_COLUMNS} FROM links WHERE slug = ? AND domain_id = ?"
                ))
                .bind(slug)
                .bind(domain_id)
                .fetch_optional(self.pool.as_ref())
                .await?
            }
            None => {
                sqlx::query_as::<_, LinkRow>(&format!(
                    "SELECT {LINK_COLUMNS} FROM links WHERE slug = ? AND domain_id IS NULL"
                ))
                .bind(slug)
                .fetch_optional(self.pool.as_ref())
                .await?
            }
        };

        Ok(row.map(Link::from))
    }

    async fn delete_link(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM links WHERE id = ?")
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
            WHERE id = ?
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
            SET last_used_target_index = ?, updated_at = ?
            WHERE id = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
            SELECT strftime('%Y-%m-%d', clicked_at, 'unixepoch') AS date, COUNT(*) AS clicks
            FROM analytic_events
            WHERE link_id = ? AND (? IS NULL OR clicked_at >= ?)
            GROUP BY date
            ORDER BY date ASC
            "#,
        )
        .bind(link_id)
        .bind(since)
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
            WHERE link_id = ? AND (? IS NULL OR clicked_at >= ?)
            ORDER BY clicked_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(link_id)
        .bind(since)
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
            WHERE link_id = ?
              AND {column} IS NOT NULL AND {column} <> ''
              AND (? IS NULL OR clicked_at >= ?)
            GROUP BY {column}
            ORDER BY count DESC, value ASC
            LIMIT ?
            "#
        ))
        .bind(link_id)
        .bind(since)
        .bind(since)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceType, Target};

    async fn setup() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn new_link(slug: &str, domain_id: Option<i64>) -> NewLink {
        NewLink {
            slug: slug.to_string(),
            domain_id,
            owner_id: "owner-1".to_string(),
            original_url: "https://example.com".to_string(),
            targets: vec![Target {
                url: "https://a.example".to_string(),
                weight: 1,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_slug_scopes_are_distinct() {
        let storage = setup().await;
        let domain = storage.create_domain("go.acme.test", true).await.unwrap();

        storage.create_link(&new_link("promo", None)).await.unwrap();
        storage
            .create_link(&new_link("promo", Some(domain.id)))
            .await
            .unwrap();

        let duplicate = storage.create_link(&new_link("promo", None)).await;
        assert!(matches!(duplicate, Err(StorageError::Conflict)));

        let shared = storage.find_link("promo", None).await.unwrap().unwrap();
        let scoped = storage
            .find_link("promo", Some(domain.id))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(shared.id, scoped.id);
        assert_eq!(scoped.domain_id, Some(domain.id));
    }

    #[tokio::test]
    async fn test_unverified_domain_is_not_found() {
        let storage = setup().await;
        storage.create_domain("pending.acme.test", false).await.unwrap();

        let found = storage
            .find_verified_domain("pending.acme.test")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_delete_link_cascades_events() {
        let storage = setup().await;
        let link = storage.create_link(&new_link("gone", None)).await.unwrap();

        storage
            .record_event(&NewAnalyticEvent {
                link_id: link.id,
                timestamp: 1_700_000_000,
                ip_address: None,
                user_agent: None,
                country: None,
                city: None,
                device_type: DeviceType::Desktop,
                browser: None,
                os: None,
                referrer: None,
            })
            .await
            .unwrap();

        assert!(storage.delete_link(link.id).await.unwrap());

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analytic_events")
            .fetch_one(storage.pool.as_ref())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_top_values_rejects_unknown_column() {
        let storage = setup().await;
        let link = storage.create_link(&new_link("cols", None)).await.unwrap();

        let result = storage
            .top_values(link.id, "ip_address; DROP TABLE links", None, 5)
            .await;
        assert!(matches!(result, Err(StorageError::InvalidColumn(_))));
    }
}
