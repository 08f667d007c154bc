//! Link resolution
//!
//! Maps an incoming `(slug, host)` pair to a link record, runs rotation, and
//! hands the hit's side effects to the click recorder. Only the lookup and
//! the rotation step happen before the caller responds.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ResolverConfig, RotationConfig};
use crate::models::Link;
use crate::recorder::{ClickRecorder, Visit};
use crate::rotation::{self, RotationDecision};
use crate::storage::Storage;

/// A link found for a hit, with its display URL.
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub link: Link,
    pub short_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitOutcome {
    NotFound,
    Redirect { link_id: i64, target_url: String },
    Cloak { link_id: i64, target_url: String },
}

pub struct LinkResolver {
    storage: Arc<dyn Storage>,
    recorder: Arc<ClickRecorder>,
    config: ResolverConfig,
    rotation: RotationConfig,
}

impl LinkResolver {
    pub fn new(
        storage: Arc<dyn Storage>,
        recorder: Arc<ClickRecorder>,
        config: ResolverConfig,
        rotation: RotationConfig,
    ) -> Self {
        Self {
            storage,
            recorder,
            config,
            rotation,
        }
    }

    pub fn landing_url(&self) -> &str {
        &self.config.landing_url
    }

    /// Hosts served from the shared, domain-less slug pool.
    pub fn is_default_scope(&self, host: &str) -> bool {
        host == self.config.default_host || is_localhost(host)
    }

    /// Find the link for `slug` on `host`. `Ok(None)` is an ordinary miss.
    pub async fn resolve(&self, slug: &str, host: &str) -> Result<Option<ResolvedLink>> {
        let host = normalize_host(host);

        let (link, effective_domain) = if self.is_default_scope(&host) {
            let domain = if is_localhost(&host) {
                host.clone()
            } else {
                self.config.default_host.clone()
            };
            (self.storage.find_link(slug, None).await?, domain)
        } else {
            let Some(domain) = self.storage.find_verified_domain(&host).await? else {
                debug!(host = %host, "no verified domain for host");
                return Ok(None);
            };
            (
                self.storage.find_link(slug, Some(domain.id)).await?,
                domain.host,
            )
        };

        Ok(link.map(|link| {
            let short_url = short_url(&effective_domain, &link.slug);
            ResolvedLink { link, short_url }
        }))
    }

    /// Pick a destination, honoring the window check only when configured to.
    pub fn choose_target(&self, link: &Link, now: i64) -> RotationDecision {
        if self.rotation.enforce_window && !rotation::is_rotation_active(link, now) {
            return RotationDecision {
                target_url: link.original_url.clone(),
                next_index_to_persist: None,
            };
        }
        rotation::decide(link, self.rotation.strategy)
    }

    /// Full hit handling: resolve, rotate, queue side effects.
    pub async fn handle_hit(&self, slug: &str, host: &str, visit: Visit) -> Result<HitOutcome> {
        let Some(resolved) = self.resolve(slug, host).await? else {
            return Ok(HitOutcome::NotFound);
        };
        let link = resolved.link;

        let decision = self.choose_target(&link, visit.timestamp);
        debug!(
            link_id = link.id,
            short_url = %resolved.short_url,
            target = %decision.target_url,
            cursor = ?decision.next_index_to_persist,
            "resolved hit"
        );

        self.recorder.increment_clicks(link.id);
        if let Some(index) = decision.next_index_to_persist {
            self.recorder.persist_cursor(link.id, index);
        }
        self.recorder.record(link.id, visit);

        Ok(if link.is_cloaked {
            HitOutcome::Cloak {
                link_id: link.id,
                target_url: decision.target_url,
            }
        } else {
            HitOutcome::Redirect {
                link_id: link.id,
                target_url: decision.target_url,
            }
        })
    }
}

fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_lowercase()
}

/// `localhost`, `127.0.0.1` or `[::1]`, with or without a port.
pub fn is_localhost(host: &str) -> bool {
    let name = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    matches!(name, "localhost" | "127.0.0.1" | "::1")
}

/// `http` for local hosts, `https` everywhere else.
pub fn short_url(domain: &str, slug: &str) -> String {
    let protocol = if is_localhost(domain) {
        "http://"
    } else {
        "https://"
    };
    format!("{protocol}{domain}/{slug}")
}
