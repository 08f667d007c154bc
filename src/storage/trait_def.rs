use crate::analytics::{ChartPoint, GroupColumn, GroupCount};
use crate::models::{AnalyticEvent, Domain, Link, NewAnalyticEvent, NewLink};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slug already exists in this domain scope")]
    Conflict,
    #[error("column '{0}' is not allowed for grouping")]
    InvalidColumn(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Checks a grouping column against the allow-list before it reaches SQL.
pub(crate) fn allowed_column(column: &str) -> StorageResult<GroupColumn> {
    column
        .parse::<GroupColumn>()
        .map_err(|_| StorageError::InvalidColumn(column.to_string()))
}

pub(crate) fn unix_now() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Register a custom domain
    async fn create_domain(&self, host: &str, verified: bool) -> StorageResult<Domain>;

    /// Find a verified domain whose host matches exactly
    async fn find_verified_domain(&self, host: &str) -> Result<Option<Domain>>;

    /// Create a link; fails with `Conflict` if the slug is taken in its scope
    async fn create_link(&self, link: &NewLink) -> StorageResult<Link>;

    async fn get_link(&self, id: i64) -> Result<Option<Link>>;

    /// Look up a slug within a domain scope (`None` is the shared pool)
    async fn find_link(&self, slug: &str, domain_id: Option<i64>) -> Result<Option<Link>>;

    /// Delete a link and, by cascade, its analytic events
    async fn delete_link(&self, id: i64) -> Result<bool>;

    /// Atomic `click_count = click_count + 1`
    async fn increment_clicks(&self, link_id: i64) -> Result<()>;

    /// Last-write-wins update of the rotation cursor
    async fn persist_cursor(&self, link_id: i64, index: i64) -> Result<()>;

    /// Append an analytic event
    async fn record_event(&self, event: &NewAnalyticEvent) -> Result<()>;

    /// Click counts per UTC calendar day, ascending; `since` of `None` is all-time
    async fn clicks_by_day(&self, link_id: i64, since: Option<i64>) -> Result<Vec<ChartPoint>>;

    /// Most recent events, newest first
    async fn recent_events(
        &self,
        link_id: i64,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<AnalyticEvent>>;

    /// Largest groups for one allow-listed column; NULL and empty values excluded
    async fn top_values(
        &self,
        link_id: i64,
        column: &str,
        since: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<GroupCount>>;
}
