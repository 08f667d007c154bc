//! Analytics aggregation over recorded events
//!
//! Ownership is checked once, then every read runs concurrently.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::analytics::models::{AggregatedAnalytics, GroupColumn, GroupCount};
use crate::storage::{Storage, StorageError};

pub const DEFAULT_DAYS: i64 = 30;
pub const DEFAULT_TOP_N: i64 = 5;
pub const MAX_TOP_N: i64 = 100;
pub const RECENT_EVENTS_LIMIT: i64 = 20;

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("link not found")]
    LinkNotFound,
    #[error("caller does not own this link")]
    NotAuthorized,
    #[error("column '{0}' is not allowed for grouping")]
    InvalidColumn(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<StorageError> for AnalyticsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidColumn(column) => AnalyticsError::InvalidColumn(column),
            StorageError::Conflict => AnalyticsError::Storage(anyhow::anyhow!("unexpected conflict")),
            StorageError::Other(err) => AnalyticsError::Storage(err),
        }
    }
}

/// Lower time bound for a trailing window; `days <= 0` means all-time.
pub fn window_start(days: i64, now: i64) -> Option<i64> {
    (days > 0).then(|| now - days.saturating_mul(SECONDS_PER_DAY))
}

pub struct AnalyticsAggregator {
    storage: Arc<dyn Storage>,
}

impl AnalyticsAggregator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn aggregate(
        &self,
        link_id: i64,
        caller_id: &str,
        days: i64,
        top_n: i64,
    ) -> Result<AggregatedAnalytics, AnalyticsError> {
        self.aggregate_at(link_id, caller_id, days, top_n, chrono::Utc::now().timestamp())
            .await
    }

    /// Same as `aggregate`, with an explicit "now" in Unix seconds.
    pub async fn aggregate_at(
        &self,
        link_id: i64,
        caller_id: &str,
        days: i64,
        top_n: i64,
        now: i64,
    ) -> Result<AggregatedAnalytics, AnalyticsError> {
        self.authorize(link_id, caller_id).await?;

        let since = window_start(days, now);
        let top_n = top_n.clamp(1, MAX_TOP_N);
        debug!(link_id, ?since, top_n, "aggregating analytics");

        let storage = self.storage.as_ref();
        let (chart_data, recent_events, browsers, os, devices, referrers, countries) = tokio::try_join!(
            async { storage.clicks_by_day(link_id, since).await.map_err(AnalyticsError::from) },
            async {
                storage
                    .recent_events(link_id, since, RECENT_EVENTS_LIMIT)
                    .await
                    .map_err(AnalyticsError::from)
            },
            self.top(link_id, GroupColumn::Browser, since, top_n),
            self.top(link_id, GroupColumn::Os, since, top_n),
            self.top(link_id, GroupColumn::DeviceType, since, top_n),
            self.top(link_id, GroupColumn::Referrer, since, top_n),
            self.top(link_id, GroupColumn::Country, since, top_n),
        )?;

        Ok(AggregatedAnalytics {
            chart_data,
            recent_events,
            top_browsers: browsers,
            top_os: os,
            top_device_types: devices,
            top_referrers: referrers,
            top_countries: countries,
            period_days: days.max(0),
        })
    }

    /// A single top-N breakdown for a caller-supplied column name.
    pub async fn breakdown(
        &self,
        link_id: i64,
        caller_id: &str,
        column: &str,
        days: i64,
        top_n: i64,
    ) -> Result<Vec<GroupCount>, AnalyticsError> {
        // Reject before touching any data
        let column = column
            .parse::<GroupColumn>()
            .map_err(|e| AnalyticsError::InvalidColumn(e.0))?;
        self.authorize(link_id, caller_id).await?;

        let since = window_start(days, chrono::Utc::now().timestamp());
        self.top(link_id, column, since, top_n.clamp(1, MAX_TOP_N))
            .await
    }

    async fn authorize(&self, link_id: i64, caller_id: &str) -> Result<(), AnalyticsError> {
        let link = self
            .storage
            .get_link(link_id)
            .await?
            .ok_or(AnalyticsError::LinkNotFound)?;

        if link.owner_id != caller_id {
            return Err(AnalyticsError::NotAuthorized);
        }
        Ok(())
    }

    async fn top(
        &self,
        link_id: i64,
        column: GroupColumn,
        since: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GroupCount>, AnalyticsError> {
        Ok(self
            .storage
            .top_values(link_id, column.as_sql(), since, limit)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(0, 1_000_000), None);
        assert_eq!(window_start(-3, 1_000_000), None);
        assert_eq!(window_start(7, 1_000_000), Some(1_000_000 - 7 * 86_400));
    }

    #[test]
    fn test_storage_error_mapping() {
        let err = AnalyticsError::from(StorageError::InvalidColumn("ip_address".to_string()));
        assert!(matches!(err, AnalyticsError::InvalidColumn(c) if c == "ip_address"));
    }
}
