use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub resolver: ResolverConfig,
    pub rotation: RotationConfig,
    pub geo: GeoConfig,
    pub client_ip: ClientIpConfig,
    pub recorder: RecorderConfig,
    pub cloak: CloakConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Host scoping for incoming hits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// The service's own short host, e.g. `sho.rt`. Hits on this host use the
    /// shared (domain-less) slug pool.
    pub default_host: String,
    /// Where visitors land when a hit cannot be served.
    pub landing_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Uniform cycling over target positions; `weight` is ignored.
    RoundRobin,
    /// Cumulative-weight random draw.
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    pub strategy: RotationStrategy,
    /// When set, links outside their rotation window or past their click
    /// limit resolve to `original_url` without advancing the cursor.
    pub enforce_window: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProviderKind {
    None,
    MaxMind,
    IpApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub provider: GeoProviderKind,
    pub city_db_path: Option<String>,
    pub ipapi_base_url: String,
    /// Public address substituted for loopback/private visitors before lookup.
    pub fallback_ip: IpAddr,
    pub cache_entries: u64,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloakConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_host: "localhost:3000".to_string(),
            landing_url: "http://localhost:8080/".to_string(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::RoundRobin,
            enforce_window: false,
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            provider: GeoProviderKind::None,
            city_db_path: None,
            ipapi_base_url: "http://ip-api.com".to_string(),
            fallback_ip: IpAddr::from([8, 8, 8, 8]),
            cache_entries: 10_000,
            cache_ttl_secs: 3600,
        }
    }
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 10_000,
        }
    }
}

impl Default for CloakConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

impl DatabaseConfig {
    /// Database settings alone, for tools that never serve traffic.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./switchyard.db?mode=rwc".to_string());
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        Self {
            backend,
            url,
            max_connections,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig::from_env();

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port number")?;

        let redirect_host =
            std::env::var("REDIRECT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let redirect_port = std::env::var("REDIRECT_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("REDIRECT_PORT must be a valid port number")?;

        let resolver_defaults = ResolverConfig::default();
        let resolver = ResolverConfig {
            default_host: std::env::var("DEFAULT_HOST")
                .map(|h| h.trim().to_lowercase())
                .unwrap_or(resolver_defaults.default_host),
            landing_url: std::env::var("LANDING_URL").unwrap_or(resolver_defaults.landing_url),
        };

        let strategy = match std::env::var("ROTATION_STRATEGY")
            .unwrap_or_else(|_| "round_robin".to_string())
            .to_lowercase()
            .as_str()
        {
            "round_robin" | "roundrobin" => RotationStrategy::RoundRobin,
            "weighted" => RotationStrategy::Weighted,
            other => {
                tracing::warn!(
                    "Unknown ROTATION_STRATEGY '{other}', falling back to 'round_robin'. Supported values: round_robin, weighted"
                );
                RotationStrategy::RoundRobin
            }
        };

        let geo_defaults = GeoConfig::default();
        let provider = match std::env::var("GEO_PROVIDER")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => GeoProviderKind::None,
            "maxmind" => GeoProviderKind::MaxMind,
            "ipapi" | "ip-api" => GeoProviderKind::IpApi,
            other => {
                tracing::warn!(
                    "Unknown GEO_PROVIDER '{other}', falling back to 'none'. Supported values: none, maxmind, ipapi"
                );
                GeoProviderKind::None
            }
        };

        let city_db_path = std::env::var("GEOIP_CITY_DB_PATH").ok();
        if provider == GeoProviderKind::MaxMind && city_db_path.is_none() {
            anyhow::bail!("GEOIP_CITY_DB_PATH must be set when GEO_PROVIDER=maxmind");
        }

        let fallback_ip = match std::env::var("GEO_FALLBACK_IP") {
            Ok(v) => v
                .parse::<IpAddr>()
                .with_context(|| format!("GEO_FALLBACK_IP '{v}' is not a valid IP address"))?,
            Err(_) => geo_defaults.fallback_ip,
        };

        let geo = GeoConfig {
            provider,
            city_db_path,
            ipapi_base_url: std::env::var("GEO_IPAPI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(geo_defaults.ipapi_base_url),
            fallback_ip,
            cache_entries: std::env::var("GEO_CACHE_ENTRIES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(geo_defaults.cache_entries),
            cache_ttl_secs: std::env::var("GEO_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(geo_defaults.cache_ttl_secs),
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            _ => TrustedProxyMode::None,
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("invalid CIDR '{s}' in TRUSTED_PROXIES"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let recorder_defaults = RecorderConfig::default();
        let recorder = RecorderConfig {
            workers: std::env::var("RECORDER_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(recorder_defaults.workers),
            queue_capacity: std::env::var("RECORDER_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(recorder_defaults.queue_capacity),
        };

        let cloak = CloakConfig {
            timeout_secs: std::env::var("CLOAK_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_else(|| CloakConfig::default().timeout_secs),
        };

        let jwt_secret = std::env::var("AUTH_JWT_SECRET")
            .context("AUTH_JWT_SECRET must be set to serve the analytics API")?;

        Ok(Config {
            database,
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            resolver,
            rotation: RotationConfig {
                strategy,
                enforce_window: env_flag("ENFORCE_ROTATION_WINDOW"),
            },
            geo,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies: std::env::var("NUM_TRUSTED_PROXIES")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok()),
            },
            recorder,
            cloak,
            auth: AuthConfig {
                jwt_secret,
                issuer: std::env::var("AUTH_JWT_ISSUER").ok(),
            },
        })
    }
}
