//! Request-head parsing for the capture endpoint.
//!
//! Runs on every HTTP worker. The only allocations permitted here are the
//! `CaptureRecord` fields themselves and the single header-JSON string; the
//! escape scan reuses a per-thread buffer and `memchr`. No regex, no
//! allocating splits. Any parse problem degrades to "serve the pixel, do not
//! enqueue".

use std::cell::RefCell;
use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use chrono::Utc;
use memchr::memchr2;

use beacon_common::CaptureRecord;

/// Case-insensitive tail that marks a capture request.
pub const PIXEL_SUFFIX: &str = "_SMART.GIF";

/// Query strings shorter than this carry no usable fingerprint.
pub const MIN_QUERY_LEN: usize = 10;

pub const MAX_QUERY_LEN: usize = 16_384;
pub const MAX_PATH_LEN: usize = 8_192;

/// Proxy headers consulted for the client address, in precedence order.
const IP_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "true-client-ip",
    "cf-connecting-ip",
];

/// Request headers worth keeping alongside the fingerprint.
const HEADER_WHITELIST: [&str; 10] = [
    "accept",
    "accept-language",
    "accept-encoding",
    "host",
    "origin",
    "dnt",
    "via",
    "sec-ch-ua",
    "sec-ch-ua-platform",
    "sec-ch-ua-mobile",
];

thread_local! {
    static HEADER_BUF: RefCell<String> = RefCell::new(String::with_capacity(1024));
}

/// Extract `{company}` and `{pixel}` from a capture path, or `None` when the
/// path does not end in the pixel suffix. A single-segment path reuses the
/// one token for both.
pub fn pixel_tokens(path: &str) -> Option<(&str, &str)> {
    if path.len() < PIXEL_SUFFIX.len() {
        return None;
    }
    let split = path.len() - PIXEL_SUFFIX.len();
    if !path.is_char_boundary(split) || !path[split..].eq_ignore_ascii_case(PIXEL_SUFFIX) {
        return None;
    }
    let stem = &path[..split];

    let mut segments = stem.rsplit('/');
    let pixel = segments.next().unwrap_or("");
    if pixel.is_empty() {
        return None;
    }
    let company = match segments.next() {
        Some(seg) if !seg.is_empty() => seg,
        _ => pixel,
    };
    Some((company, pixel))
}

/// Resolve the client address: first non-empty proxy header wins, leftmost
/// token of comma lists, IPv6-mapped IPv4 flattened, parse failure falls
/// through to the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    for name in IP_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let token = match value.find(',') {
                Some(i) => value[..i].trim(),
                None => value.trim(),
            };
            if token.is_empty() {
                continue;
            }
            if let Ok(ip) = token.parse::<IpAddr>() {
                return flatten(ip);
            }
            // Some proxies append a port
            if let Ok(addr) = token.parse::<SocketAddr>() {
                return flatten(addr.ip());
            }
        }
    }
    flatten(peer.ip())
}

fn flatten(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => ip,
        },
        v4 => v4,
    }
}

/// Serialize the whitelisted headers as a JSON object string. Uses the
/// per-thread scratch buffer; the returned `String` is the one allocation.
pub fn headers_json(headers: &HeaderMap) -> String {
    HEADER_BUF.with(|cell| {
        let mut buf = cell.borrow_mut();
        buf.clear();
        buf.push('{');
        let mut first = true;
        for name in HEADER_WHITELIST {
            let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if !first {
                buf.push(',');
            }
            first = false;
            buf.push('"');
            buf.push_str(name);
            buf.push_str("\":\"");
            escape_into(&mut buf, value);
            buf.push('"');
        }
        buf.push('}');
        buf.clone()
    })
}

/// JSON-escape `value` into `dst`. The common no-escape case is a single
/// vectorized scan; values containing control bytes take the per-char path.
fn escape_into(dst: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().any(|b| *b < 0x20) {
        for c in value.chars() {
            match c {
                '"' => dst.push_str("\\\""),
                '\\' => dst.push_str("\\\\"),
                '\n' => dst.push_str("\\n"),
                '\r' => dst.push_str("\\r"),
                '\t' => dst.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    dst.push_str("\\u00");
                    let b = c as u8;
                    dst.push(char::from_digit((b >> 4) as u32, 16).unwrap_or('0'));
                    dst.push(char::from_digit((b & 0xF) as u32, 16).unwrap_or('0'));
                }
                c => dst.push(c),
            }
        }
        return;
    }

    let mut start = 0;
    while let Some(i) = memchr2(b'"', b'\\', &bytes[start..]) {
        let at = start + i;
        dst.push_str(&value[start..at]);
        dst.push('\\');
        dst.push(bytes[at] as char);
        start = at + 1;
    }
    dst.push_str(&value[start..]);
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Convert a request head into a capture record, or `None` when the request
/// should get the pixel without being enqueued. Never fails.
pub fn build_record(
    path: &str,
    query: &str,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Option<(CaptureRecord, IpAddr)> {
    if path.len() > MAX_PATH_LEN || query.len() > MAX_QUERY_LEN {
        return None;
    }
    if query.len() < MIN_QUERY_LEN {
        return None;
    }
    let (company, pixel) = pixel_tokens(path)?;
    let ip = client_ip(headers, peer);

    let record = CaptureRecord {
        company: company.to_string(),
        pixel: pixel.to_string(),
        ip: ip.to_string(),
        path: path.to_string(),
        query: query.to_string(),
        headers: headers_json(headers),
        ua: header_str(headers, "user-agent").to_string(),
        referer: header_str(headers, "referer").to_string(),
        received_at: Utc::now(),
    };
    Some((record, ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "203.0.113.9:55000".parse().unwrap()
    }

    #[test]
    fn pixel_tokens_extracts_company_and_pixel() {
        assert_eq!(
            pixel_tokens("/ACME/spring_SMART.GIF"),
            Some(("ACME", "spring"))
        );
        assert_eq!(pixel_tokens("/t/ACME/fall_smart.gif"), Some(("ACME", "fall")));
        assert_eq!(pixel_tokens("/solo_SMART.GIF"), Some(("solo", "solo")));
        assert_eq!(pixel_tokens("/ACME/spring.gif"), None);
        assert_eq!(pixel_tokens("/_SMART.GIF"), None);
    }

    #[test]
    fn client_ip_precedence_and_leftmost_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("8.8.8.8, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers, peer()), "8.8.8.8".parse::<IpAddr>().unwrap());

        let mut headers = HeaderMap::new();
        headers.insert("true-client-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(client_ip(&headers, peer()), "9.9.9.9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn client_ip_flattens_mapped_ipv6_and_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("::ffff:192.168.5.7"),
        );
        assert_eq!(
            client_ip(&headers, peer()),
            "192.168.5.7".parse::<IpAddr>().unwrap()
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, peer()), peer().ip());
    }

    #[test]
    fn headers_json_escapes_and_whitelists() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static(r#"text/"html"\x"#));
        headers.insert("cookie", HeaderValue::from_static("secret=1"));
        let json = headers_json(&headers);
        assert_eq!(json, r#"{"accept":"text/\"html\"\\x"}"#);

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["accept"], r#"text/"html"\x"#);
        assert!(parsed.get("cookie").is_none());
    }

    #[test]
    fn build_record_enforces_suffix_and_min_query() {
        let headers = HeaderMap::new();
        assert!(build_record("/a/b_SMART.GIF", "sw=1", &headers, peer()).is_none());
        assert!(build_record("/a/b.png", "sw=1920&sh=1080", &headers, peer()).is_none());

        let (record, ip) =
            build_record("/ACME/spring_SMART.GIF", "sw=1920&sh=1080", &headers, peer()).unwrap();
        assert_eq!(record.company, "ACME");
        assert_eq!(record.pixel, "spring");
        assert_eq!(record.ip, "203.0.113.9");
        assert_eq!(ip, peer().ip());
    }
}
