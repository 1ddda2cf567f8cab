use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

use crate::server::error::{AppResult, Error};

/// validate that an origin url is safe to fetch on a caller's behalf.
///
/// only `http`/`https` with a host that is not loopback, link-local, private
/// or the proxy itself. ip literals are checked against the blocked ranges,
/// hostnames are re-checked on every redirect hop via the shared client's
/// redirect policy (see [`host_is_blocked`]).
pub fn validate_origin_url(url: &str, own_host: Option<&str>) -> AppResult<Url> {
    let parsed =
        Url::parse(url).map_err(|_| Error::BadRequest(format!("invalid url: {url}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::Forbidden(format!(
                "scheme '{scheme}' not allowed, only http/https"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| Error::BadRequest(format!("no host in url: {url}")))?;

    if let Some(own) = own_host {
        // strip a possible port before comparing against our own Host header
        let own_name = own.rsplit_once(':').map_or(own, |(name, _)| name);
        if host.to_string().eq_ignore_ascii_case(own_name) {
            return Err(Error::Forbidden("Forbidden host".to_string()));
        }
    }

    if host_value_is_blocked(&host) {
        return Err(Error::Forbidden("Forbidden host".to_string()));
    }

    Ok(parsed)
}

/// redirect-hop check used by the reqwest redirect policy. cheap and sync,
/// a redirect chain must never walk the proxy into private address space.
pub fn host_is_blocked(url: &Url) -> bool {
    match url.host() {
        Some(host) => host_value_is_blocked(&host),
        None => true,
    }
}

fn host_value_is_blocked(host: &Host<&str>) -> bool {
    match host {
        Host::Ipv4(ip) => is_blocked_ipv4(*ip),
        Host::Ipv6(ip) => is_blocked_ipv6(*ip),
        Host::Domain(name) => {
            let name = name.to_ascii_lowercase();
            // "localhost" and dotted-quad-in-domain tricks
            name == "localhost"
                || name.ends_with(".localhost")
                || name.parse::<Ipv4Addr>().is_ok_and(is_blocked_ipv4)
        }
    }
}

/// blocked ranges:
/// - `0.0.0.0/8`      "this" network
/// - `10.0.0.0/8`     rfc 1918 private
/// - `127.0.0.0/8`    loopback
/// - `169.254.0.0/16` link-local / cloud metadata
/// - `172.16.0.0/12`  rfc 1918 private
/// - `192.168.0.0/16` rfc 1918 private
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    let (a, b) = (octets[0], octets[1]);

    a == 0
        || a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// blocked ranges:
/// - `::1/128`   loopback
/// - `fe80::/10` link-local
/// - `fc00::/7`  unique-local
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_loopback() || (s[0] & 0xffc0) == 0xfe80 || (s[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- ipv4 private ranges ---

    #[test]
    fn rejects_loopback_127() {
        assert!(validate_origin_url("http://127.0.0.1/admin", None).is_err());
        assert!(validate_origin_url("http://127.254.1.2/stream", None).is_err());
    }

    #[test]
    fn rejects_rfc1918() {
        assert!(validate_origin_url("http://10.0.0.1/stream", None).is_err());
        assert!(validate_origin_url("http://172.16.0.1/stream", None).is_err());
        assert!(validate_origin_url("http://172.31.255.255/stream", None).is_err());
        assert!(validate_origin_url("http://192.168.1.1/stream", None).is_err());
    }

    #[test]
    fn rejects_link_local_metadata() {
        // aws/gcp/azure metadata endpoint
        assert!(validate_origin_url("http://169.254.169.254/latest/meta-data/", None).is_err());
    }

    #[test]
    fn rejects_zero_network() {
        assert!(validate_origin_url("http://0.0.0.0/stream", None).is_err());
    }

    // --- ipv6 ---

    #[test]
    fn rejects_ipv6_private_space() {
        assert!(validate_origin_url("http://[::1]/stream", None).is_err());
        assert!(validate_origin_url("http://[fe80::1]/stream", None).is_err());
        assert!(validate_origin_url("http://[fc00::1]/stream", None).is_err());
        assert!(validate_origin_url("http://[fd12::1]/stream", None).is_err());
    }

    // --- hostnames ---

    #[test]
    fn rejects_localhost_names() {
        assert!(validate_origin_url("http://localhost/stream", None).is_err());
        assert!(validate_origin_url("http://LOCALHOST:8080/stream", None).is_err());
        assert!(validate_origin_url("http://foo.localhost/stream", None).is_err());
    }

    #[test]
    fn rejects_own_host() {
        let result =
            validate_origin_url("https://proxy.example.com/m3u8", Some("proxy.example.com:4040"));
        assert!(result.is_err());
    }

    #[test]
    fn allows_public_hosts() {
        assert!(validate_origin_url("https://cdn.example.com/stream.m3u8", None).is_ok());
        assert!(validate_origin_url("http://1.2.3.4/stream", None).is_ok());
        assert!(validate_origin_url("https://203.0.113.1/live/stream.m3u8?token=abc", None).is_ok());
    }

    // --- schemes ---

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_origin_url("ftp://cdn.example.com/file.ts", None).is_err());
        assert!(validate_origin_url("file:///etc/passwd", None).is_err());
        assert!(validate_origin_url("gopher://cdn.example.com/x", None).is_err());
    }

    // --- range boundaries ---

    #[test]
    fn boundary_172_ranges() {
        // just outside 172.16.0.0/12 on both sides
        assert!(validate_origin_url("http://172.15.255.255/stream", None).is_ok());
        assert!(validate_origin_url("http://172.32.0.0/stream", None).is_ok());
    }

    #[test]
    fn redirect_hop_check_blocks_private_targets() {
        assert!(host_is_blocked(&Url::parse("http://10.1.2.3/next").unwrap()));
        assert!(host_is_blocked(&Url::parse("http://localhost/next").unwrap()));
        assert!(!host_is_blocked(&Url::parse("https://cdn.example.com/next").unwrap()));
    }
}
