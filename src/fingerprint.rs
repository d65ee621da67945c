//! Canonical request fingerprints for cache keying.

use axum::http::{HeaderMap, Method};
use md5::{Digest, Md5};

use crate::compress::Encoding;

/// Headers that discriminate cached responses; everything else is ignored.
const KEYED_HEADERS: [&str; 2] = ["accept", "content-type"];

/// Digest a request into a stable cache key: method, path, negotiated
/// encoding, the keyed headers in ascending name order, and the body bytes,
/// joined with `|` and hashed with 128-bit MD5 (lowercase hex). The key is
/// not a security boundary.
pub fn fingerprint(
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &[u8],
    encoding: Encoding,
) -> String {
    let mut buf = Vec::with_capacity(64 + body.len());
    buf.extend_from_slice(method.as_str().as_bytes());
    buf.push(b'|');
    buf.extend_from_slice(path_and_query.as_bytes());
    buf.push(b'|');
    buf.extend_from_slice(encoding.label().as_bytes());

    let mut names: Vec<&str> = headers
        .keys()
        .map(|name| name.as_str())
        .filter(|name| KEYED_HEADERS.contains(name))
        .collect();
    names.sort_unstable();
    names.dedup();
    for name in names {
        if let Some(value) = headers.get(name) {
            buf.push(b'|');
            buf.extend_from_slice(name.as_bytes());
            buf.push(b':');
            buf.extend_from_slice(value.as_bytes());
        }
    }

    if !body.is_empty() {
        buf.push(b'|');
        buf.extend_from_slice(body);
    }

    format!("{:x}", Md5::digest(&buf))
}
