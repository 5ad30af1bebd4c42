//! SSRF gate for every URL the sandbox is asked to dial.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

fn hostname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9.-]+$").expect("hostname pattern"))
}

/// Validate a URL before the sandbox performs an outbound request.
///
/// Rejects non-http(s) schemes, empty hostnames, loopback/private/link-local
/// targets, and hostnames outside the allowed character set. The hostname is
/// not re-resolved after DNS resolution.
pub fn validate_url(raw: &str) -> Result<(), String> {
    let parsed = Url::parse(raw).map_err(|err| format!("invalid URL: {err}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        _ => return Err("only HTTP and HTTPS schemes are allowed".to_string()),
    }

    let host = parsed
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .unwrap_or("");
    if host.is_empty() {
        return Err("URL must have a valid hostname".to_string());
    }

    if is_private_or_localhost(host) {
        return Err("access to private networks is not allowed".to_string());
    }

    // IPv6 literals were already classified above; everything else must be a
    // plain hostname or IPv4 literal.
    if host.parse::<IpAddr>().is_err() && !hostname_pattern().is_match(host) {
        return Err("invalid hostname format".to_string());
    }

    Ok(())
}

fn is_private_or_localhost(host: &str) -> bool {
    if host == "localhost" || host == "127.0.0.1" || host == "::1" {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            // loopback, unique-local (fc00::/7), link-local (fe80::/10)
            ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        // Not an IP: reject hostnames that smell like local targets.
        Err(_) => host.contains("localhost") || host.contains("local"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_hosts() {
        assert!(validate_url("https://api.example.com/v1/models").is_ok());
        assert!(validate_url("http://93.184.216.34/status").is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert_eq!(
            validate_url("ftp://example.com/file").unwrap_err(),
            "only HTTP and HTTPS schemes are allowed"
        );
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn rejects_loopback_and_private_targets() {
        for url in [
            "http://127.0.0.1:9000/",
            "http://localhost/admin",
            "http://[::1]:8080/",
            "http://10.0.0.8/",
            "http://172.16.1.1/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
        ] {
            assert_eq!(
                validate_url(url).unwrap_err(),
                "access to private networks is not allowed",
                "{url} should be refused"
            );
        }
    }

    #[test]
    fn rejects_localhost_lookalike_hostnames() {
        assert!(validate_url("http://internal.localhost.evil.com/").is_err());
        assert!(validate_url("http://printer.local/").is_err());
    }

    #[test]
    fn rejects_private_ipv6_ranges() {
        assert!(validate_url("http://[fd00::1]/").is_err());
        assert!(validate_url("http://[fe80::1]/").is_err());
        assert!(validate_url("http://[2606:4700::1111]/").is_ok());
    }

    #[test]
    fn rejects_bad_hostname_characters() {
        assert_eq!(
            validate_url("http://bad_host.example.com/").unwrap_err(),
            "invalid hostname format"
        );
    }
}
