//! Decode and re-encode HTTP bodies under a declared `Content-Encoding`.
//!
//! The rewrite pipeline has to read a JSON body that may arrive compressed
//! and send its modified version back under the same scheme, so the client
//! never notices that the body was touched. [`ContentEncoding`] covers the
//! schemes Emby-compatible servers emit:
//!
//! - `identity` (or no header at all)
//! - `gzip` / `x-gzip`
//! - `deflate`, written zlib-wrapped and read as zlib or raw deflate
//! - `br`
//!
//! Anything else, stacked encodings included, is rejected with
//! [`vl_core::Error::Codec`].

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression as FlateLevel;
use tracing::instrument;
use vl_core::{Error, Result};

// Rewritten bodies are small JSON documents on the request path, so favour
// latency over ratio.
const FLATE_LEVEL: FlateLevel = FlateLevel::new(6);
const BROTLI_QUALITY: u32 = 5;
const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LG_WINDOW_SIZE: u32 = 22;

/// A supported HTTP content encoding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    /// No transformation.
    #[default]
    Identity,
    /// `gzip` (also accepts `x-gzip`).
    Gzip,
    /// `deflate`.
    Deflate,
    /// `br`.
    Brotli,
}

impl ContentEncoding {
    /// Parse an optional `Content-Encoding` header value.
    ///
    /// An absent or blank header means [`ContentEncoding::Identity`].
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        match value {
            None => Ok(ContentEncoding::Identity),
            Some(v) => v.parse(),
        }
    }

    /// The token to send back in `Content-Encoding`, or `None` for identity.
    pub fn header_value(&self) -> Option<&'static str> {
        match self {
            ContentEncoding::Identity => None,
            ContentEncoding::Gzip => Some("gzip"),
            ContentEncoding::Deflate => Some("deflate"),
            ContentEncoding::Brotli => Some("br"),
        }
    }

    /// Decode a body received under this encoding.
    #[instrument(level = "trace", skip(body), fields(encoding = %self, input_size = body.len()))]
    pub fn decode(&self, body: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match self {
            ContentEncoding::Identity => output.extend_from_slice(body),
            ContentEncoding::Gzip => {
                MultiGzDecoder::new(body)
                    .read_to_end(&mut output)
                    .map_err(|e| self.error(e))?;
            }
            ContentEncoding::Deflate => {
                if ZlibDecoder::new(body).read_to_end(&mut output).is_err() {
                    output.clear();
                    DeflateDecoder::new(body)
                        .read_to_end(&mut output)
                        .map_err(|e| self.error(e))?;
                }
            }
            ContentEncoding::Brotli => {
                BrotliDecoder::new(body, BROTLI_BUFFER_SIZE)
                    .read_to_end(&mut output)
                    .map_err(|e| self.error(e))?;
            }
        }
        Ok(output)
    }

    /// Encode a body to be sent under this encoding.
    #[instrument(level = "trace", skip(body), fields(encoding = %self, input_size = body.len()))]
    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            ContentEncoding::Identity => Ok(body.to_vec()),
            ContentEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), FLATE_LEVEL);
                encoder.write_all(body).map_err(|e| self.error(e))?;
                encoder.finish().map_err(|e| self.error(e))
            }
            ContentEncoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), FLATE_LEVEL);
                encoder.write_all(body).map_err(|e| self.error(e))?;
                encoder.finish().map_err(|e| self.error(e))
            }
            ContentEncoding::Brotli => {
                let mut output = Vec::new();
                {
                    let mut encoder = BrotliEncoder::new(
                        &mut output,
                        BROTLI_BUFFER_SIZE,
                        BROTLI_QUALITY,
                        BROTLI_LG_WINDOW_SIZE,
                    );
                    encoder.write_all(body).map_err(|e| self.error(e))?;
                    // The stream is only finalised when the writer drops.
                }
                Ok(output)
            }
        }
    }

    fn error(&self, e: impl fmt::Display) -> Error {
        Error::codec(self.to_string(), e)
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_value().unwrap_or("identity"))
    }
}

impl FromStr for ContentEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(ContentEncoding::Identity),
            "gzip" | "x-gzip" => Ok(ContentEncoding::Gzip),
            "deflate" => Ok(ContentEncoding::Deflate),
            "br" => Ok(ContentEncoding::Brotli),
            other => Err(Error::codec(other, "unsupported content encoding")),
        }
    }
}
