//! Geo lookup providers
//!
//! One `GeoProvider` implementation per backend, chosen by configuration.
//! A failing provider reports the failure inside `GeoLookup::error`; there is
//! no fallback from one provider to another.

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{GeoConfig, GeoProviderKind};

/// Uniform result of a geo lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLookup {
    pub country: Option<String>,
    pub city: Option<String>,
    pub error: Option<String>,
}

impl GeoLookup {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, ip: IpAddr) -> GeoLookup;
}

/// Used when no provider is configured.
pub struct DisabledGeoProvider;

#[async_trait]
impl GeoProvider for DisabledGeoProvider {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn lookup(&self, _ip: IpAddr) -> GeoLookup {
        GeoLookup::default()
    }
}

/// MaxMind GeoLite2/GeoIP2 City database, memory-mapped.
pub struct MaxMindGeoProvider {
    reader: Arc<Reader<Mmap>>,
}

impl MaxMindGeoProvider {
    pub fn open(path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    fn lookup_sync(&self, ip: IpAddr) -> GeoLookup {
        let result = match self.reader.lookup(ip) {
            Ok(result) => result,
            Err(err) => return GeoLookup::failed(format!("maxmind lookup failed: {err}")),
        };

        match result.decode::<geoip2::City>() {
            Ok(Some(city)) => GeoLookup {
                country: city.country.iso_code.map(|s| s.to_string()),
                city: city.city.names.english.map(|s| s.to_string()),
                error: None,
            },
            // City data missing: the database may still carry the country
            Ok(None) => match result.decode::<geoip2::Country>() {
                Ok(Some(country)) => GeoLookup {
                    country: country.country.iso_code.map(|s| s.to_string()),
                    city: None,
                    error: None,
                },
                Ok(None) => GeoLookup::default(),
                Err(err) => GeoLookup::failed(format!("maxmind decode failed: {err}")),
            },
            Err(err) => GeoLookup::failed(format!("maxmind decode failed: {err}")),
        }
    }
}

#[async_trait]
impl GeoProvider for MaxMindGeoProvider {
    fn name(&self) -> &'static str {
        "maxmind"
    }

    async fn lookup(&self, ip: IpAddr) -> GeoLookup {
        self.lookup_sync(ip)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    country_code: Option<String>,
    city: Option<String>,
    message: Option<String>,
}

/// ip-api.com JSON endpoint.
pub struct IpApiGeoProvider {
    client: reqwest::Client,
    base_url: String,
}

impl IpApiGeoProvider {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .context("failed to build HTTP client for ip-api lookups")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoProvider for IpApiGeoProvider {
    fn name(&self) -> &'static str {
        "ipapi"
    }

    async fn lookup(&self, ip: IpAddr) -> GeoLookup {
        let url = format!(
            "{}/json/{}?fields=status,message,countryCode,city",
            self.base_url, ip
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => return GeoLookup::failed(format!("ip-api request failed: {err}")),
        };

        let body: IpApiResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => return GeoLookup::failed(format!("ip-api response unreadable: {err}")),
        };

        if body.status != "success" {
            return GeoLookup::failed(format!(
                "ip-api returned {}: {}",
                body.status,
                body.message.unwrap_or_default()
            ));
        }

        GeoLookup {
            country: body.country_code.filter(|s| !s.is_empty()),
            city: body.city.filter(|s| !s.is_empty()),
            error: None,
        }
    }
}

/// Build the provider selected by configuration.
pub fn provider_from_config(config: &GeoConfig) -> Result<Arc<dyn GeoProvider>> {
    let provider: Arc<dyn GeoProvider> = match config.provider {
        GeoProviderKind::None => Arc::new(DisabledGeoProvider),
        GeoProviderKind::MaxMind => {
            let path = config
                .city_db_path
                .as_deref()
                .context("MaxMind provider requires a City database path")?;
            Arc::new(MaxMindGeoProvider::open(path)?)
        }
        GeoProviderKind::IpApi => Arc::new(IpApiGeoProvider::new(&config.ipapi_base_url)?),
    };
    Ok(provider)
}

/// Caches successful lookups per address in front of any provider.
pub struct CachedGeoProvider {
    inner: Arc<dyn GeoProvider>,
    cache: Cache<IpAddr, GeoLookup>,
}

impl CachedGeoProvider {
    pub fn new(inner: Arc<dyn GeoProvider>, max_entries: u64, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl GeoProvider for CachedGeoProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn lookup(&self, ip: IpAddr) -> GeoLookup {
        if let Some(hit) = self.cache.get(&ip).await {
            return hit;
        }

        let result = self.inner.lookup(ip).await;
        // Failures are not cached so a recovered provider is asked again
        if !result.is_error() {
            self.cache.insert(ip, result.clone()).await;
        }
        result
    }
}
