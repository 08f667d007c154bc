//! User-agent classification
//!
//! Device class comes from an ordered regex cascade: bot, tablet, mobile,
//! desktop. Browser and OS names come from woothee and are independent of
//! the device cascade.

use regex::Regex;
use std::sync::OnceLock;
use woothee::parser::Parser;

use crate::models::DeviceType;

pub const UNKNOWN: &str = "Unknown";

struct Patterns {
    bot: Regex,
    tablet: Regex,
    android: Regex,
    mobile: Regex,
    desktop: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        bot: Regex::new(
            r"(?i)bot\b|crawler|spider|crawling|slurp|facebookexternalhit|bingpreview|mediapartners|headlesschrome|curl/|wget/|python-requests|go-http-client",
        )
        .expect("bot pattern"),
        tablet: Regex::new(r"(?i)ipad|tablet|kindle|silk/|playbook|nexus (7|9|10)").expect("tablet pattern"),
        android: Regex::new(r"(?i)android").expect("android pattern"),
        mobile: Regex::new(
            r"(?i)mobile|iphone|ipod|android|blackberry|bb10|opera mini|iemobile|windows phone",
        )
        .expect("mobile pattern"),
        desktop: Regex::new(r"(?i)windows nt|macintosh|mac os x|x11|linux|cros").expect("desktop pattern"),
    })
}

/// Classify a user-agent into a device class.
pub fn device_type(user_agent: &str) -> DeviceType {
    let ua = user_agent.trim();
    if ua.is_empty() {
        return DeviceType::Other;
    }

    let p = patterns();
    if p.bot.is_match(ua) {
        return DeviceType::Bot;
    }
    // Android without a "Mobile" token is a tablet
    if p.tablet.is_match(ua) || (p.android.is_match(ua) && !ua.to_lowercase().contains("mobile")) {
        return DeviceType::Tablet;
    }
    if p.mobile.is_match(ua) {
        return DeviceType::Mobile;
    }
    if p.desktop.is_match(ua) {
        return DeviceType::Desktop;
    }
    DeviceType::Other
}

/// Browser and OS names; `"Unknown"` when the parser cannot tell.
pub fn browser_and_os(user_agent: &str) -> (String, String) {
    if user_agent.trim().is_empty() {
        return (UNKNOWN.to_string(), UNKNOWN.to_string());
    }

    match Parser::new().parse(user_agent) {
        Some(result) => (known_or_unknown(&result.name), known_or_unknown(&result.os)),
        None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    }
}

fn known_or_unknown(value: &str) -> String {
    if value.is_empty() || value == "UNKNOWN" {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
    const GOOGLEBOT: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";
    const WINDOWS_CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const ANDROID_PHONE: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

    #[test]
    fn test_cascade_order() {
        assert_eq!(device_type(GOOGLEBOT), DeviceType::Bot);
        assert_eq!(device_type(IPAD), DeviceType::Tablet);
        assert_eq!(device_type(IPHONE), DeviceType::Mobile);
        assert_eq!(device_type(WINDOWS_CHROME), DeviceType::Desktop);
        assert_eq!(device_type(ANDROID_TABLET), DeviceType::Tablet);
        assert_eq!(device_type(ANDROID_PHONE), DeviceType::Mobile);
    }

    #[test]
    fn test_bot_wins_over_mobile() {
        let ua = "Mozilla/5.0 (Linux; Android 6.0.1; Nexus 5X) Mobile Safari/537.36 (compatible; Googlebot/2.1)";
        assert_eq!(device_type(ua), DeviceType::Bot);
    }

    #[test]
    fn test_empty_and_unknown_strings() {
        assert_eq!(device_type(""), DeviceType::Other);
        assert_eq!(device_type("   "), DeviceType::Other);
        assert_eq!(device_type("totally-custom-agent"), DeviceType::Other);
    }

    #[test]
    fn test_browser_and_os_parsing() {
        let (browser, os) = browser_and_os(WINDOWS_CHROME);
        assert_eq!(browser, "Chrome");
        assert!(os.starts_with("Windows"), "unexpected os {os}");

        let (browser, os) = browser_and_os("");
        assert_eq!(browser, UNKNOWN);
        assert_eq!(os, UNKNOWN);
    }
}
