//! Response-body compression. Bodies are fully materialized before
//! encoding; each algorithm runs at its default level.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Br,
}

impl Encoding {
    /// Pick the encoding for a client's `Accept-Encoding` value. Preference
    /// order is br, gzip, deflate, identity, by plain substring presence;
    /// quality factors are ignored.
    pub fn negotiate(accept_encoding: Option<&str>) -> Encoding {
        let accepted = accept_encoding.unwrap_or("");
        if accepted.contains("br") {
            Encoding::Br
        } else if accepted.contains("gzip") {
            Encoding::Gzip
        } else if accepted.contains("deflate") {
            Encoding::Deflate
        } else {
            Encoding::Identity
        }
    }

    /// Wire token for `Content-Encoding`, or `None` for identity.
    pub fn token(self) -> Option<&'static str> {
        match self {
            Encoding::Identity => None,
            Encoding::Gzip => Some("gzip"),
            Encoding::Deflate => Some("deflate"),
            Encoding::Br => Some("br"),
        }
    }

    /// Stable label used in cache keys; identity included.
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Br => "br",
        }
    }
}

pub fn compress(body: &[u8], encoding: Encoding) -> io::Result<Vec<u8>> {
    match encoding {
        Encoding::Identity => Ok(body.to_vec()),
        Encoding::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
        Encoding::Deflate => {
            // zlib-wrapped stream; what clients expect for `deflate`.
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            encoder.finish()
        }
        Encoding::Br => {
            let mut out = Vec::new();
            let params = brotli::enc::BrotliEncoderParams::default();
            brotli::BrotliCompress(&mut &body[..], &mut out, &params)?;
            Ok(out)
        }
    }
}
