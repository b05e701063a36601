// SPDX-License-Identifier: MIT OR Apache-2.0
//! Public-endpoint validation and normalization.
//!
//! Any URL accepted from a remote party passes through here before the node
//! will connect to it. The rules close the obvious SSRF holes: loopback and
//! unspecified addresses, RFC 1918 ranges, link-local (including the cloud
//! metadata address), and non-http(s) schemes.

use std::net::{IpAddr, Ipv4Addr};
use url::Url;

use crate::error::CoreError;

/// Hostnames that always refer to the local machine.
const LOCAL_HOSTNAMES: &[&str] = &["localhost", "127.0.0.1", "::1", "0.0.0.0"];

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10
        || (o[0] == 192 && o[1] == 168)
        || (o[0] == 172 && (16..=31).contains(&o[1]))
        || (o[0] == 169 && o[1] == 254)
}

fn host_is_public(host: &str) -> Result<(), String> {
    let lowered = host.to_ascii_lowercase();
    if LOCAL_HOSTNAMES.contains(&lowered.as_str()) {
        return Err(format!("local-only hostname '{host}'"));
    }
    if let Ok(ip) = lowered.parse::<IpAddr>() {
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_loopback() || v4.is_unspecified() || is_private_v4(v4) {
                    return Err(format!("non-public address {v4}"));
                }
            }
            IpAddr::V6(v6) => {
                if v6.is_loopback() || v6.is_unspecified() {
                    return Err(format!("non-public address {v6}"));
                }
            }
        }
    }
    Ok(())
}

/// Validate that `raw` is a public http(s) URL a node may connect to.
///
/// # Errors
///
/// Returns [`CoreError::InvalidEndpoint`] naming the failed rule: bad
/// scheme, missing host, local-only hostname, or private/link-local
/// address (the cloud metadata address 169.254.169.254 falls out of the
/// link-local range).
pub fn validate_public_endpoint(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw).map_err(|e| CoreError::InvalidEndpoint {
        reason: format!("unparseable URL: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::InvalidEndpoint {
                reason: format!("scheme '{other}' not allowed"),
            });
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| CoreError::InvalidEndpoint {
            reason: "missing host".into(),
        })?;
    host_is_public(host).map_err(|reason| CoreError::InvalidEndpoint { reason })?;
    Ok(url)
}

/// Normalize a peer-supplied endpoint to its canonical comparable form.
///
/// Strips query, fragment, and trailing slashes; returns `None` for
/// anything that fails [`validate_public_endpoint`]. Used when merging
/// directory seeds with known-peer endpoints so the same node never
/// appears twice under cosmetically different URLs.
#[must_use]
pub fn normalize_endpoint(raw: &str) -> Option<String> {
    let mut url = validate_public_endpoint(raw.trim()).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let mut s = url.to_string();
    while s.ends_with('/') {
        s.pop();
    }
    Some(s)
}

/// Whether `host` may be handed to the DNS resolver capability.
///
/// Blocks `localhost`, `*.local`, and `*.internal` on top of the public
/// address rules.
#[must_use]
pub fn dns_hostname_allowed(host: &str) -> bool {
    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".local") || lowered.ends_with(".internal") {
        return false;
    }
    host_is_public(&lowered).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_http_and_https() {
        assert!(validate_public_endpoint("http://claw.example.com:3321").is_ok());
        assert!(validate_public_endpoint("https://8.8.8.8/discovery").is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_public_endpoint("ftp://example.com").is_err());
        assert!(validate_public_endpoint("file:///etc/passwd").is_err());
    }

    #[test]
    fn rejects_loopback_and_unspecified() {
        for bad in [
            "http://localhost:3321",
            "http://127.0.0.1",
            "http://0.0.0.0:8080",
            "http://[::1]:3321",
        ] {
            assert!(validate_public_endpoint(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_private_ranges() {
        for bad in [
            "http://10.1.2.3",
            "http://192.168.0.10:3321",
            "http://172.16.0.1",
            "http://172.31.255.255",
            "http://169.254.0.5",
        ] {
            assert!(validate_public_endpoint(bad).is_err(), "{bad}");
        }
        // 172.15 and 172.32 sit outside the /12.
        assert!(validate_public_endpoint("http://172.15.0.1").is_ok());
        assert!(validate_public_endpoint("http://172.32.0.1").is_ok());
    }

    #[test]
    fn rejects_cloud_metadata_address() {
        assert!(validate_public_endpoint("http://169.254.169.254/latest/meta-data").is_err());
    }

    #[test]
    fn normalize_strips_query_fragment_and_slash() {
        assert_eq!(
            normalize_endpoint("http://claw.example.com:3321/?x=1#frag"),
            Some("http://claw.example.com:3321".to_string())
        );
        assert_eq!(normalize_endpoint("http://localhost:3321/"), None);
        assert_eq!(normalize_endpoint("gopher://x"), None);
    }

    #[test]
    fn dns_blocklist() {
        assert!(!dns_hostname_allowed("localhost"));
        assert!(!dns_hostname_allowed("printer.local"));
        assert!(!dns_hostname_allowed("db.internal"));
        assert!(dns_hostname_allowed("example.com"));
    }
}
