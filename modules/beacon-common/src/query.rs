//! Query-string access shared by both processes.
//!
//! The Edge reads a handful of raw values without allocating; the Forge
//! decodes the full string once into a snapshot. Both append `_srv_*` tokens
//! through [`SrvTokens`] so encoding stays uniform across the system.

use std::borrow::Cow;

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::SRV_PREFIX;

/// Everything except unreserved characters is escaped in `_srv_*` values.
const VALUE_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Raw (still-encoded) value of `key` in `query`, borrowed from the input.
/// Returns the first occurrence; `None` when absent, `Some("")` when empty.
pub fn raw_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    for pair in query.split('&') {
        let (k, v) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        if k == key {
            return Some(v);
        }
    }
    None
}

/// Percent-decode a query value, mapping `+` to space first.
pub fn decode(value: &str) -> Cow<'_, str> {
    if value.contains('+') {
        let replaced = value.replace('+', " ");
        Cow::Owned(percent_decode_str(&replaced).decode_utf8_lossy().into_owned())
    } else {
        percent_decode_str(value).decode_utf8_lossy()
    }
}

/// Decoded value of `key` in `query`, if present and non-empty.
pub fn decoded_value(query: &str, key: &str) -> Option<String> {
    raw_value(query, key)
        .filter(|v| !v.is_empty())
        .map(|v| decode(v).into_owned())
}

/// Append buffer for server-side `_srv_<name>=<value>` tokens.
///
/// Values are URL-encoded on append; missing or empty values must simply not
/// be appended. The buffer concatenates onto an existing query string with
/// `&` separators.
#[derive(Debug, Default)]
pub struct SrvTokens {
    buf: String,
}

impl SrvTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `_srv_<name>=<value>`. Empty values are ignored.
    pub fn append(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        if !self.buf.is_empty() {
            self.buf.push('&');
        }
        self.buf.push_str(SRV_PREFIX);
        self.buf.push_str(name);
        self.buf.push('=');
        for part in percent_encode(value.as_bytes(), VALUE_ESCAPE) {
            self.buf.push_str(part);
        }
    }

    /// Decoded value of a previously appended token, for classifiers that
    /// build on earlier results.
    pub fn get(&self, name: &str) -> Option<String> {
        let key = format!("{SRV_PREFIX}{name}");
        decoded_value(&self.buf, &key)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Concatenate the buffer onto `query`, returning the combined string.
    pub fn merge_into(self, query: &str) -> String {
        if self.buf.is_empty() {
            return query.to_string();
        }
        if query.is_empty() {
            return self.buf;
        }
        let mut out = String::with_capacity(query.len() + 1 + self.buf.len());
        out.push_str(query);
        out.push('&');
        out.push_str(&self.buf);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_value_finds_first_occurrence() {
        let q = "a=1&b=2&a=3";
        assert_eq!(raw_value(q, "a"), Some("1"));
        assert_eq!(raw_value(q, "b"), Some("2"));
        assert_eq!(raw_value(q, "c"), None);
        assert_eq!(raw_value("flag&x=1", "flag"), Some(""));
    }

    #[test]
    fn decode_handles_percent_and_plus() {
        assert_eq!(decode("Mozilla%2F5.0"), "Mozilla/5.0");
        assert_eq!(decode("hello+world"), "hello world");
        assert_eq!(decode("plain"), "plain");
    }

    #[test]
    fn tokens_are_url_encoded_and_merged() {
        let mut tokens = SrvTokens::new();
        tokens.append("geoCity", "São Paulo");
        tokens.append("ipType", "Public");
        tokens.append("empty", "");
        let merged = tokens.merge_into("sw=1920");
        assert_eq!(
            merged,
            "sw=1920&_srv_geoCity=S%C3%A3o%20Paulo&_srv_ipType=Public"
        );
    }

    #[test]
    fn get_reads_back_prior_appends() {
        let mut tokens = SrvTokens::new();
        tokens.append("tzMatch", "1");
        assert_eq!(tokens.get("tzMatch").as_deref(), Some("1"));
        assert_eq!(tokens.get("missing"), None);
    }

    #[test]
    fn merge_into_empty_query() {
        let mut tokens = SrvTokens::new();
        tokens.append("ipType", "Private");
        assert_eq!(tokens.merge_into(""), "_srv_ipType=Private");
    }
}
