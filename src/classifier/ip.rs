//! Client IP extraction and local-address normalization
//!
//! Forwarding headers are only honored according to the configured proxy
//! trust mode. Loopback and private visitors are swapped for a configured
//! public address before geo lookup so that development traffic still
//! resolves to a plausible location.

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::OnceLock;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

fn local_ranges() -> &'static [IpNet] {
    static RANGES: OnceLock<Vec<IpNet>> = OnceLock::new();
    RANGES.get_or_init(|| {
        [
            "127.0.0.0/8",
            "10.0.0.0/8",
            "172.16.0.0/12",
            "192.168.0.0/16",
            "169.254.0.0/16",
            "0.0.0.0/32",
            "::1/128",
            "::/128",
            "fc00::/7",
            "fe80::/10",
        ]
        .iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect()
    })
}

/// Unwraps `::ffff:a.b.c.d` into its IPv4 form.
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// Loopback, private and link-local addresses, including IPv6-mapped forms.
pub fn is_local(ip: IpAddr) -> bool {
    let ip = canonical(ip);
    local_ranges().iter().any(|net| net.contains(&ip))
}

/// The address to geolocate for a visitor.
pub fn normalize_ip(ip: IpAddr, fallback: IpAddr) -> IpAddr {
    if is_local(ip) {
        fallback
    } else {
        canonical(ip)
    }
}

/// Extract the client IP address according to the proxy trust configuration.
/// Falls back to the socket address when headers are absent or untrusted.
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &ClientIpConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(headers: &HeaderMap, config: &ClientIpConfig) -> Option<IpAddr> {
    let chain = forwarded_chain(headers).or_else(|| x_forwarded_for_chain(headers))?;
    pick_from_chain(&chain, config)
}

/// `for=` values of an RFC 7239 Forwarded header, left to right.
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let value = param.trim();
            let value = value
                .strip_prefix("for=")
                .or_else(|| value.strip_prefix("For="))?;
            parse_forwarded_node(value)
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        // [2001:db8::1]:4711
        return rest.split(']').next()?.parse().ok();
    }
    value
        .parse::<IpAddr>()
        .ok()
        .or_else(|| value.split(':').next()?.parse().ok())
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Walk the chain right to left, skipping hops we trust.
fn pick_from_chain(chain: &[IpAddr], config: &ClientIpConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if chain.len() > num_trusted {
            return Some(chain[chain.len() - num_trusted - 1]);
        }
        return chain.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return chain
            .iter()
            .rev()
            .find(|ip| {
                !config
                    .trusted_proxies
                    .iter()
                    .any(|net| net.contains(&canonical(**ip)))
            })
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn standard_config() -> ClientIpConfig {
        ClientIpConfig {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
        }
    }

    #[test]
    fn test_local_ranges() {
        for ip in [
            "127.0.0.1",
            "::1",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "::ffff:192.168.1.1",
            "::ffff:127.0.0.1",
        ] {
            assert!(is_local(ip.parse().unwrap()), "{ip} should be local");
        }

        for ip in ["8.8.8.8", "172.32.0.1", "2001:4860:4860::8888", "::ffff:1.1.1.1"] {
            assert!(!is_local(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[test]
    fn test_normalize_substitutes_fallback() {
        let fallback: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(normalize_ip("127.0.0.1".parse().unwrap(), fallback), fallback);
        assert_eq!(normalize_ip("::1".parse().unwrap(), fallback), fallback);
        assert_eq!(
            normalize_ip("::ffff:1.1.1.1".parse().unwrap(), fallback),
            "1.1.1.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_extract_client_ip_none_mode_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = ClientIpConfig::default();

        assert_eq!(extract_client_ip(&headers, socket_addr, &config), socket_addr);
    }

    #[test]
    fn test_extract_cloudflare_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = ClientIpConfig {
            trusted_proxy_mode: TrustedProxyMode::Cloudflare,
            ..ClientIpConfig::default()
        };

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_x_forwarded_for_rightmost_without_trust_list() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(&headers, socket_addr, &standard_config());
        assert_eq!(result, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_x_forwarded_for_skips_trusted_cidrs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.5, 10.0.0.6"),
        );
        let socket_addr: IpAddr = "10.0.0.7".parse().unwrap();
        let config = ClientIpConfig {
            trusted_proxies: vec!["10.0.0.0/8".parse().unwrap()],
            ..standard_config()
        };

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_header_with_port_and_brackets() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:4711\";proto=https"),
        );
        let socket_addr: IpAddr = "10.0.0.1".parse().unwrap();

        let result = extract_client_ip(&headers, socket_addr, &standard_config());
        assert_eq!(result, "2001:db8::1".parse::<IpAddr>().unwrap());
    }
}
