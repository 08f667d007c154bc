//! Click analytics read path
//!
//! Aggregates the events written by the click recorder into a per-day click
//! series and top-N breakdowns, for the owner of a link only.

pub mod aggregator;
pub mod models;

pub use aggregator::{AnalyticsAggregator, AnalyticsError, DEFAULT_DAYS, DEFAULT_TOP_N};
pub use models::{AggregatedAnalytics, ChartPoint, GroupColumn, GroupCount};
