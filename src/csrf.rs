//! Anti-forgery token lookup.
//!
//! The dashboard hands out its token three ways: a `<meta name="csrf-token">`
//! tag, a hidden `csrfmiddlewaretoken` form field, and the `csrftoken`
//! cookie. Callers pick which sources to try and in what order.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::dom::{Document, Selector};

/// One place a token can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CsrfSource {
    /// `content` of the configured meta tag.
    Meta,
    /// `value` of the hidden form field.
    FormField,
    /// The token cookie in the client's jar.
    Cookie,
}

impl std::fmt::Display for CsrfSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsrfSource::Meta => write!(f, "meta"),
            CsrfSource::FormField => write!(f, "form-field"),
            CsrfSource::Cookie => write!(f, "cookie"),
        }
    }
}

/// Where to look for each source inside a page.
#[derive(Debug, Clone)]
pub struct TokenLocator<'a> {
    pub meta: &'a Selector,
    pub field: &'a Selector,
}

/// Resolve a token by trying `order` left to right. Empty values are
/// treated as absent.
///
/// `cookie_header` is the `Cookie` header value the client would send to
/// the dashboard origin, if any.
pub fn resolve_token(
    order: &[CsrfSource],
    document: &Document,
    locator: &TokenLocator<'_>,
    cookie_header: Option<&str>,
    cookie_name: &str,
) -> Option<String> {
    order.iter().find_map(|source| {
        let found = match source {
            CsrfSource::Meta => document
                .select_first(locator.meta)
                .and_then(|n| n.attr("content")),
            CsrfSource::FormField => document
                .select_first(locator.field)
                .map(|n| n.form_value()),
            CsrfSource::Cookie => cookie_header.and_then(|h| cookie_value(h, cookie_name)),
        };
        found.filter(|t| !t.is_empty())
    })
}

/// Extract and percent-decode `name` from a `Cookie` header value
/// (`a=1; csrftoken=abc`).
pub fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| percent_decode(value))
    })
}

/// Decode `%XX` escapes. Unlike form decoding, `+` is left alone.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
