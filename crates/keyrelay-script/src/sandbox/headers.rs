//! Header policy shared by the sandbox's outbound requests and by header
//! reapplication after `modifyRequest`.

/// Hop-by-hop and protocol-critical headers adapters may never set.
pub const FORBIDDEN_HEADERS: &[&str] = &[
    "host",
    "connection",
    "upgrade",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "content-length",
];

/// Maximum accepted header value length in bytes.
pub const MAX_HEADER_VALUE_LEN: usize = 8192;

/// Whether an adapter-supplied header survives the policy gate.
///
/// Disallowed names and malformed values are dropped silently, mirroring the
/// write path on both sides of the sandbox boundary.
pub fn is_allowed_header(name: &str, value: &str) -> bool {
    if value.len() > MAX_HEADER_VALUE_LEN {
        return false;
    }

    let lowered = name.to_ascii_lowercase();
    if FORBIDDEN_HEADERS.contains(&lowered.as_str()) {
        return false;
    }

    value.bytes().all(|b| (32..=126).contains(&b) || b == b'\t')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_names_are_rejected_case_insensitively() {
        assert!(!is_allowed_header("Host", "example.com"));
        assert!(!is_allowed_header("TRANSFER-ENCODING", "chunked"));
        assert!(!is_allowed_header("content-length", "10"));
        assert!(is_allowed_header("Authorization", "Bearer abc"));
    }

    #[test]
    fn control_bytes_are_rejected_except_tab() {
        assert!(!is_allowed_header("X-Test", "a\r\nb"));
        assert!(!is_allowed_header("X-Test", "a\u{7f}"));
        assert!(is_allowed_header("X-Test", "a\tb"));
    }

    #[test]
    fn oversized_values_are_rejected() {
        let value = "a".repeat(MAX_HEADER_VALUE_LEN + 1);
        assert!(!is_allowed_header("X-Test", &value));
        assert!(is_allowed_header("X-Test", &value[..MAX_HEADER_VALUE_LEN]));
    }
}
