use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One destination in a link's rotation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    #[serde(default)]
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub slug: String,
    /// `None` means the service's own default host.
    pub domain_id: Option<i64>,
    pub owner_id: String,
    pub original_url: String,
    pub targets: Vec<Target>,
    /// Rotation cursor. May be stale if `targets` was edited after it was written.
    pub last_used_target_index: Option<i64>,
    pub click_count: i64,
    pub is_cloaked: bool,
    pub rotation_start: Option<i64>,
    pub rotation_end: Option<i64>,
    pub click_limit: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Raw `links` row; `targets` is stored as a JSON array.
#[derive(Debug, Clone, FromRow)]
pub struct LinkRow {
    pub id: i64,
    pub slug: String,
    pub domain_id: Option<i64>,
    pub owner_id: String,
    pub original_url: String,
    pub targets: String,
    pub last_used_target_index: Option<i64>,
    pub click_count: i64,
    pub is_cloaked: bool,
    pub rotation_start: Option<i64>,
    pub rotation_end: Option<i64>,
    pub click_limit: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<LinkRow> for Link {
    fn from(row: LinkRow) -> Self {
        // An unreadable target list behaves like an empty one: the link
        // resolves to `original_url` and the cursor never moves.
        let targets = match serde_json::from_str::<Vec<Target>>(&row.targets) {
            Ok(targets) => targets,
            Err(err) => {
                tracing::warn!(link_id = row.id, error = %err, "link has malformed targets");
                Vec::new()
            }
        };

        Self {
            id: row.id,
            slug: row.slug,
            domain_id: row.domain_id,
            owner_id: row.owner_id,
            original_url: row.original_url,
            targets,
            last_used_target_index: row.last_used_target_index,
            click_count: row.click_count,
            is_cloaked: row.is_cloaked,
            rotation_start: row.rotation_start,
            rotation_end: row.rotation_end,
            click_limit: row.click_limit,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLink {
    pub slug: String,
    pub domain_id: Option<i64>,
    pub owner_id: String,
    pub original_url: String,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub is_cloaked: bool,
    pub rotation_start: Option<i64>,
    pub rotation_end: Option<i64>,
    pub click_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: i64,
    pub host: String,
    pub verified: bool,
    pub created_at: i64,
}
