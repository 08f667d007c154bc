//! Visitor classification: geography from the client IP, device class,
//! browser and OS from the user-agent.

pub mod device;
pub mod geo;
pub mod ip;

use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::config::GeoConfig;
use crate::models::DeviceType;

pub use device::{browser_and_os, device_type};
pub use geo::{
    provider_from_config, CachedGeoProvider, DisabledGeoProvider, GeoLookup, GeoProvider,
    IpApiGeoProvider, MaxMindGeoProvider,
};
pub use ip::{extract_client_ip, is_local, normalize_ip};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub country: Option<String>,
    pub city: Option<String>,
    pub browser: String,
    pub os: String,
    pub device_type: DeviceType,
}

pub struct Classifier {
    provider: Arc<dyn GeoProvider>,
    fallback_ip: IpAddr,
}

impl Classifier {
    pub fn new(provider: Arc<dyn GeoProvider>, fallback_ip: IpAddr) -> Self {
        Self {
            provider,
            fallback_ip,
        }
    }

    /// Build the configured provider behind a lookup cache.
    pub fn from_config(config: &GeoConfig) -> anyhow::Result<Self> {
        let provider = provider_from_config(config)?;
        let cached = CachedGeoProvider::new(provider, config.cache_entries, config.cache_ttl_secs);
        Ok(Self::new(Arc::new(cached), config.fallback_ip))
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn classify(
        &self,
        ip: IpAddr,
        user_agent: &str,
        accept_language: Option<&str>,
    ) -> Classification {
        let lookup_ip = normalize_ip(ip, self.fallback_ip);
        let geo = self.provider.lookup(lookup_ip).await;
        if let Some(err) = &geo.error {
            debug!(ip = %lookup_ip, provider = self.provider.name(), error = %err, "geo lookup failed");
        }

        let country = geo
            .country
            .or_else(|| accept_language.and_then(country_hint));
        let (browser, os) = browser_and_os(user_agent);

        Classification {
            country,
            city: geo.city,
            browser,
            os,
            device_type: device_type(user_agent),
        }
    }
}

/// Region subtag of the first `Accept-Language` entry, e.g. `en-US` -> `US`.
pub fn country_hint(accept_language: &str) -> Option<String> {
    let first = accept_language.split(',').next()?.split(';').next()?.trim();
    let region = first.split(['-', '_']).nth(1)?;
    (region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| region.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers from a fixed table and remembers which addresses it saw.
    struct TableProvider {
        seen: Mutex<Vec<IpAddr>>,
    }

    #[async_trait]
    impl GeoProvider for TableProvider {
        fn name(&self) -> &'static str {
            "table"
        }

        async fn lookup(&self, ip: IpAddr) -> GeoLookup {
            self.seen.lock().unwrap().push(ip);
            match ip.to_string().as_str() {
                "8.8.8.8" => GeoLookup {
                    country: Some("US".to_string()),
                    city: Some("Mountain View".to_string()),
                    error: None,
                },
                _ => GeoLookup::failed("no record"),
            }
        }
    }

    fn classifier() -> (Classifier, Arc<TableProvider>) {
        let provider = Arc::new(TableProvider {
            seen: Mutex::new(Vec::new()),
        });
        let classifier = Classifier::new(provider.clone(), "8.8.8.8".parse().unwrap());
        (classifier, provider)
    }

    #[tokio::test]
    async fn test_local_ips_use_fallback() {
        let (classifier, provider) = classifier();

        for ip in ["127.0.0.1", "::1", "10.0.0.3", "192.168.0.10", "::ffff:172.20.1.1"] {
            let result = classifier.classify(ip.parse().unwrap(), "", None).await;
            assert_eq!(result.country.as_deref(), Some("US"));
            assert_eq!(result.city.as_deref(), Some("Mountain View"));
        }

        let seen = provider.seen.lock().unwrap();
        assert!(seen.iter().all(|ip| ip.to_string() == "8.8.8.8"));
    }

    #[tokio::test]
    async fn test_provider_error_means_no_geo() {
        let (classifier, _) = classifier();
        let result = classifier
            .classify("1.1.1.1".parse().unwrap(), "curl/8.0", None)
            .await;
        assert_eq!(result.country, None);
        assert_eq!(result.city, None);
        assert_eq!(result.device_type, DeviceType::Bot);
    }

    #[tokio::test]
    async fn test_accept_language_hint_fills_missing_country() {
        let (classifier, _) = classifier();
        let result = classifier
            .classify("1.1.1.1".parse().unwrap(), "", Some("de-DE,de;q=0.9,en;q=0.8"))
            .await;
        assert_eq!(result.country.as_deref(), Some("DE"));
        assert_eq!(result.city, None);
    }

    #[test]
    fn test_country_hint() {
        assert_eq!(country_hint("en-US,en;q=0.9").as_deref(), Some("US"));
        assert_eq!(country_hint("pt_br").as_deref(), Some("BR"));
        assert_eq!(country_hint("en"), None);
        assert_eq!(country_hint("zh-Hant-TW"), None);
        assert_eq!(country_hint(""), None);
    }
}
