//! Address normalization and entity tag minting

use uuid::Uuid;

/// Canonicalize an address-like string into a stable `user@domain` key.
///
/// Accepts bare or `sip:`/`sips:`-prefixed addresses with optional port,
/// URI parameters, and headers. A dotted-quad literal host is replaced by
/// `default_domain` when one is configured, so requests addressed by IP
/// and by domain map to the same key. A missing user part becomes the
/// literal `undefined`.
pub fn parse_aor(raw: &str, default_domain: Option<&str>) -> String {
    let (user, host) = split_user_host(raw);
    let host = match default_domain {
        Some(domain) if is_ipv4_literal(host) => domain,
        _ => host,
    };
    format!("{}@{}", user.unwrap_or("undefined"), host)
}

/// User part of an address, if it has one.
pub fn user_part(raw: &str) -> Option<&str> {
    split_user_host(raw).0
}

/// Mint a new globally unique entity tag.
pub fn new_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

fn split_user_host(raw: &str) -> (Option<&str>, &str) {
    let rest = raw
        .strip_prefix("sips:")
        .or_else(|| raw.strip_prefix("sip:"))
        .unwrap_or(raw);
    let rest = rest.split([';', '?']).next().unwrap_or(rest);

    let (user, host) = match rest.split_once('@') {
        Some((user, host)) => ((!user.is_empty()).then_some(user), host),
        None => (None, rest),
    };

    // Strip the port; bracketed IPv6 references pass through untouched
    let host = if host.starts_with('[') {
        host
    } else {
        host.split(':').next().unwrap_or(host)
    };

    (user, host)
}

/// Lenient dotted-quad check: four dot-separated groups of 1-3 digits.
/// Octet range is not enforced.
fn is_ipv4_literal(host: &str) -> bool {
    let mut groups = 0;
    for part in host.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        groups += 1;
    }
    groups == 4
}
