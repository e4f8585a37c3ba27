// cloakwatch/src/urlguard.rs
//
// Target-URL validation gate — runs before any snapshot fetch is requested.
//
// User-supplied target URLs reach the crawler collaborator, so anything that
// resolves inside our own network must be rejected here: loopback,
// link-local (cloud metadata endpoints live at 169.254.169.254), RFC1918
// private ranges, and non-http(s) schemes.

use std::net::{Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

/// Validate a crawl target. Returns the parsed URL on success, or a short
/// machine-readable reason on rejection.
pub fn validate(raw: &str) -> Result<Url, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty_url");
    }
    // Scheme-relative URLs inherit whatever scheme the caller happens to be
    // on; never crawl those.
    if trimmed.starts_with("//") {
        return Err("scheme_relative");
    }

    let url = Url::parse(trimmed).map_err(|_| "unparseable")?;

    match url.scheme() {
        "http" | "https" => {}
        _ => return Err("non_http_scheme"),
    }

    match url.host() {
        None => Err("missing_host"),
        Some(Host::Domain(domain)) => {
            let d = domain.to_ascii_lowercase();
            if d == "localhost" || d.ends_with(".localhost") {
                return Err("localhost");
            }
            Ok(url)
        }
        Some(Host::Ipv4(ip)) => {
            check_ipv4(ip)?;
            Ok(url)
        }
        Some(Host::Ipv6(ip)) => {
            check_ipv6(ip)?;
            Ok(url)
        }
    }
}

fn check_ipv4(ip: Ipv4Addr) -> Result<(), &'static str> {
    if ip.is_loopback() {
        return Err("loopback");
    }
    if ip.is_link_local() {
        return Err("link_local");
    }
    if ip.is_private() {
        return Err("private_range");
    }
    if ip.is_unspecified() {
        return Err("unspecified");
    }
    Ok(())
}

fn check_ipv6(ip: Ipv6Addr) -> Result<(), &'static str> {
    if ip.is_loopback() {
        return Err("loopback");
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return check_ipv4(v4);
    }
    let seg = ip.segments();
    // fe80::/10 — link-local
    if seg[0] & 0xffc0 == 0xfe80 {
        return Err("link_local");
    }
    // fc00::/7 — unique-local (the v6 analogue of RFC1918)
    if seg[0] & 0xfe00 == 0xfc00 {
        return Err("private_range");
    }
    if ip.is_unspecified() {
        return Err("unspecified");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_public_https() {
        assert!(validate("https://example.com").is_ok());
        assert!(validate("http://example.com/landing?x=1").is_ok());
    }

    #[test]
    fn rejects_metadata_and_private() {
        assert_eq!(
            validate("http://169.254.169.254/latest/meta-data"),
            Err("link_local")
        );
        assert_eq!(validate("http://192.168.1.1"), Err("private_range"));
        assert_eq!(validate("http://10.0.0.8/p"), Err("private_range"));
        assert_eq!(validate("http://172.16.4.1"), Err("private_range"));
    }

    #[test]
    fn rejects_loopback_and_localhost() {
        assert_eq!(validate("http://127.0.0.1:8080"), Err("loopback"));
        assert_eq!(validate("http://localhost/admin"), Err("localhost"));
        assert_eq!(validate("http://api.localhost"), Err("localhost"));
        assert_eq!(validate("http://[::1]/"), Err("loopback"));
    }

    #[test]
    fn rejects_bad_schemes() {
        assert_eq!(validate("ftp://example.com"), Err("non_http_scheme"));
        assert_eq!(validate("file:///etc/passwd"), Err("non_http_scheme"));
        assert_eq!(validate("//example.com/page"), Err("scheme_relative"));
        assert_eq!(validate(""), Err("empty_url"));
    }
}
