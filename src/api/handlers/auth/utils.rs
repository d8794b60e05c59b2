//! Small helpers for field validation, opaque identifiers, and device capture.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

use super::types::DeviceInfo;

/// Normalize an email for lookup/uniqueness checks.
pub(super) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(super) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Usernames are 3-30 characters of letters, digits, and underscores.
pub(super) fn valid_username(username: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_]{3,30}$").is_ok_and(|regex| regex.is_match(username))
}

/// Phone numbers are exactly ten digits.
pub(super) fn valid_phone(phone: &str) -> bool {
    Regex::new(r"^\d{10}$").is_ok_and(|regex| regex.is_match(phone))
}

/// Create a new opaque registration/session identifier.
/// The raw value is only handed to the client; stores key off it verbatim.
pub(crate) fn generate_opaque_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate opaque identifier")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a bearer token so raw values never touch the database.
/// Lookups hash the presented token and match on the digest.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Stable device fingerprint from the user agent and client address.
pub(super) fn device_fingerprint(user_agent: &str, ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(ip.as_bytes());
    let digest = hasher.finalize();
    // First 8 bytes rendered as hex: short enough for logs, stable per device.
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Capture device metadata for the session record.
pub(super) fn capture_device_info(headers: &axum::http::HeaderMap) -> DeviceInfo {
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let ip = extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string());

    DeviceInfo {
        device_id: device_fingerprint(&user_agent, &ip),
        platform: sniff_platform(&user_agent).to_string(),
        browser: sniff_browser(&user_agent).to_string(),
        user_agent,
        ip,
    }
}

fn sniff_platform(user_agent: &str) -> &'static str {
    if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Mac") {
        "MacOS"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("iPhone") || user_agent.contains("iOS") {
        "iOS"
    } else if user_agent.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

fn sniff_browser(user_agent: &str) -> &'static str {
    // Edge ships "Chrome" in its UA string, so it has to win the tie first.
    if user_agent.contains("Edg") {
        "Edge"
    } else if user_agent.contains("Chrome") {
        "Chrome"
    } else if user_agent.contains("Firefox") {
        "Firefox"
    } else if user_agent.contains("Safari") {
        "Safari"
    } else {
        "Unknown"
    }
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Extract a client IP from common proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_username_enforces_charset_and_length() {
        assert!(valid_username("alice_01"));
        assert!(!valid_username("al"));
        assert!(!valid_username("alice!"));
        assert!(!valid_username(&"a".repeat(31)));
    }

    #[test]
    fn valid_phone_requires_ten_digits() {
        assert!(valid_phone("9876543210"));
        assert!(!valid_phone("98765"));
        assert!(!valid_phone("98765432101"));
        assert!(!valid_phone("98765abcde"));
    }

    #[test]
    fn generate_opaque_id_round_trip() {
        let decoded_len = generate_opaque_id()
            .ok()
            .and_then(|id| URL_SAFE_NO_PAD.decode(id.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[test]
    fn device_fingerprint_is_stable_and_short() {
        let first = device_fingerprint("Mozilla/5.0", "1.2.3.4");
        let second = device_fingerprint("Mozilla/5.0", "1.2.3.4");
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert_ne!(first, device_fingerprint("Mozilla/5.0", "5.6.7.8"));
    }

    #[test]
    fn capture_device_info_sniffs_platform_and_browser() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36",
            ),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let info = capture_device_info(&headers);
        assert_eq!(info.platform, "Windows");
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.ip, "9.9.9.9");
        assert_eq!(info.device_id.len(), 16);
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_none_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers), None);
    }
}
