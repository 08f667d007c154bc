//! Analytics read models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::AnalyticEvent;

/// Clicks on one UTC calendar day (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChartPoint {
    pub date: String,
    pub clicks: i64,
}

/// One group of a top-N breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupCount {
    pub value: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAnalytics {
    pub chart_data: Vec<ChartPoint>,
    pub recent_events: Vec<AnalyticEvent>,
    pub top_browsers: Vec<GroupCount>,
    #[serde(rename = "topOS")]
    pub top_os: Vec<GroupCount>,
    pub top_device_types: Vec<GroupCount>,
    pub top_referrers: Vec<GroupCount>,
    pub top_countries: Vec<GroupCount>,
    pub period_days: i64,
}

/// Event columns a breakdown may group by. Nothing else reaches SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupColumn {
    Browser,
    Os,
    DeviceType,
    Referrer,
    Country,
}

impl GroupColumn {
    pub const ALL: [GroupColumn; 5] = [
        GroupColumn::Browser,
        GroupColumn::Os,
        GroupColumn::DeviceType,
        GroupColumn::Referrer,
        GroupColumn::Country,
    ];

    pub fn as_sql(&self) -> &'static str {
        match self {
            GroupColumn::Browser => "browser",
            GroupColumn::Os => "os",
            GroupColumn::DeviceType => "device_type",
            GroupColumn::Referrer => "referrer",
            GroupColumn::Country => "country",
        }
    }
}

impl fmt::Display for GroupColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownColumn(pub String);

impl FromStr for GroupColumn {
    type Err = UnknownColumn;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "browser" => Ok(GroupColumn::Browser),
            "os" => Ok(GroupColumn::Os),
            "device_type" | "deviceType" => Ok(GroupColumn::DeviceType),
            "referrer" => Ok(GroupColumn::Referrer),
            "country" => Ok(GroupColumn::Country),
            other => Err(UnknownColumn(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        for column in GroupColumn::ALL {
            assert_eq!(column.as_sql().parse::<GroupColumn>(), Ok(column));
        }
        assert_eq!("deviceType".parse::<GroupColumn>(), Ok(GroupColumn::DeviceType));

        for bad in ["ip_address", "user_agent", "country; DROP TABLE links", "", "BROWSER"] {
            assert!(bad.parse::<GroupColumn>().is_err(), "{bad} should be rejected");
        }
    }
}
