//! Compression middleware: gzip/deflate via `flate2`.

use async_trait::async_trait;
use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

use crate::chain::{Middleware, MiddlewareChain};
use crate::error::{ClientError, Result};
use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Deflate,
}

impl Codec {
    fn encoding_name(self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
        }
    }

    fn from_encoding_name(name: &str) -> Option<Self> {
        match name.trim() {
            "gzip" => Some(Codec::Gzip),
            "deflate" => Some(Codec::Deflate),
            _ => None,
        }
    }

    fn compress(self, data: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Codec::Gzip => GzEncoder::new(data, level).read_to_end(&mut out)?,
            Codec::Deflate => DeflateEncoder::new(data, level).read_to_end(&mut out)?,
        };
        Ok(out)
    }

    fn decompress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Codec::Gzip => GzDecoder::new(data).read_to_end(&mut out)?,
            Codec::Deflate => DeflateDecoder::new(data).read_to_end(&mut out)?,
        };
        Ok(out)
    }
}

/// Compression middleware configuration.
#[derive(Clone)]
pub struct CompressionConfig {
    pub level: u32,
    pub min_size_bytes: usize,
    pub compressible_content_types: Vec<String>,
    /// Compress eligible request bodies before sending. `spec.md` §4.6.
    pub compress_requests: bool,
    /// Transparently decompress response bodies. When `false`, the
    /// middleware emits `Accept-Encoding: identity` instead of negotiating
    /// gzip/deflate, so the transport never auto-negotiates behind it.
    pub decompress_responses: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: 6,
            min_size_bytes: 256,
            compressible_content_types: vec![
                "application/json".to_string(),
                "text/".to_string(),
                "application/xml".to_string(),
            ],
            compress_requests: true,
            decompress_responses: true,
        }
    }
}

/// Request-side compress-if-beneficial, response-side transparent
/// Accept-Encoding negotiation and decompress (`spec.md` §4.6).
pub struct CompressionMiddleware {
    config: CompressionConfig,
}

impl CompressionMiddleware {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    fn content_type_is_compressible(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else { return false };
        self.config
            .compressible_content_types
            .iter()
            .any(|prefix| content_type.starts_with(prefix.as_str()))
    }

    /// Compress the request body in place if it's eligible and actually
    /// shrinks. An unknown content length (there is none in this crate,
    /// since bodies are always buffered) would mean "skip"; compression
    /// failure is swallowed and the original body is restored, never
    /// surfaced as a request error.
    fn maybe_compress_request(&self, request: &mut Request) {
        let Some(len) = request.content_length() else { return };
        if len < self.config.min_size_bytes {
            return;
        }
        if !self.content_type_is_compressible(request.headers().get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok())) {
            return;
        }
        if request.headers().contains_key(http::header::CONTENT_ENCODING) {
            return;
        }

        let Some(body) = request.body().cloned() else { return };
        let codec = Codec::Gzip;
        match codec.compress(&body, Compression::new(self.config.level)) {
            Ok(compressed) if compressed.len() < body.len() => {
                let new_len = compressed.len();
                request.set_body(compressed);
                request.set_header(
                    http::header::CONTENT_ENCODING,
                    http::HeaderValue::from_static("gzip"),
                );
                if let Ok(value) = http::HeaderValue::from_str(&new_len.to_string()) {
                    request.set_header(http::header::CONTENT_LENGTH, value);
                }
            }
            _ => {
                // Either compression failed or didn't help; body is untouched.
            }
        }
    }

    /// Negotiate `Accept-Encoding`. If response decompression is disabled,
    /// this explicitly asks for `identity` rather than leaving the header
    /// absent, so the transport never negotiates an encoding on our behalf
    /// that we then couldn't decode (`spec.md` §4.6).
    fn negotiate_accept_encoding(&self, request: &mut Request) {
        if request.headers().contains_key(http::header::ACCEPT_ENCODING) {
            return;
        }
        let value = if self.config.decompress_responses {
            "gzip, deflate"
        } else {
            "identity"
        };
        request.set_header(http::header::ACCEPT_ENCODING, http::HeaderValue::from_static(value));
    }

    /// Decompress the response body if `Content-Encoding` names a codec
    /// this middleware supports. A decompression failure is a hard error
    /// (`spec.md` §4.6) — a server claiming an encoding it didn't actually
    /// apply is a protocol violation, not something to swallow.
    fn maybe_decompress_response(&self, response: &mut Response) -> Result<()> {
        let Some(encoding) = response.header("content-encoding").map(|s| s.to_string()) else {
            return Ok(());
        };
        let Some(codec) = Codec::from_encoding_name(&encoding) else {
            return Ok(());
        };

        match codec.decompress(response.bytes()) {
            Ok(decoded) => {
                let new_len = decoded.len();
                response.set_body(decoded);
                response.remove_header("content-encoding");
                if let Ok(value) = http::HeaderValue::from_str(&new_len.to_string()) {
                    response.set_header(http::header::CONTENT_LENGTH, value);
                } else {
                    response.remove_header("content-length");
                }
                Ok(())
            }
            Err(err) => Err(ClientError::middleware(format!(
                "failed to decompress {} response body: {err}",
                codec.encoding_name()
            ))),
        }
    }
}

#[async_trait]
impl Middleware for CompressionMiddleware {
    fn name(&self) -> &str {
        "compression"
    }

    async fn handle(&self, mut request: Request, next: &MiddlewareChain) -> Result<Response> {
        if self.config.compress_requests {
            self.maybe_compress_request(&mut request);
        }
        self.negotiate_accept_encoding(&mut request);

        let mut response = next.next(request).await?;
        if self.config.decompress_responses {
            self.maybe_decompress_response(&mut response)?;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trips() {
        let data = b"hello world, this is a reasonably long payload to compress".repeat(4);
        let compressed = Codec::Gzip.compress(&data, Compression::default()).unwrap();
        let decompressed = Codec::Gzip.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn deflate_round_trips() {
        let data = b"another payload".repeat(8);
        let compressed = Codec::Deflate.compress(&data, Compression::default()).unwrap();
        let decompressed = Codec::Deflate.decompress(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn unknown_encoding_name_is_not_a_recognized_codec() {
        assert_eq!(Codec::from_encoding_name("br"), None);
        assert_eq!(Codec::from_encoding_name("gzip"), Some(Codec::Gzip));
    }

    #[tokio::test]
    async fn malformed_compressed_body_surfaces_a_middleware_error() {
        use crate::chain::{MiddlewareChain, TerminalSender};
        use crate::context::Context;
        use http::{Method, StatusCode};
        use std::sync::Arc;

        struct BrokenGzipTerminal;

        #[async_trait]
        impl TerminalSender for BrokenGzipTerminal {
            async fn send(&self, _ctx: &Context, request: Request) -> Result<Response> {
                let mut headers = http::HeaderMap::new();
                headers.insert(http::header::CONTENT_ENCODING, "gzip".parse().unwrap());
                Ok(Response::new(StatusCode::OK, headers, bytes::Bytes::from_static(b"not gzip"), request.url().clone()))
            }
        }

        let middleware = Arc::new(CompressionMiddleware::new(CompressionConfig::default()));
        let chain = MiddlewareChain::new(vec![middleware], Arc::new(BrokenGzipTerminal));
        let request = Request::parse(Method::GET, "http://example.test/").unwrap();
        let err = chain.execute(request).await.unwrap_err();
        assert!(err.is_middleware());
    }

    #[test]
    fn disabled_decompression_requests_identity() {
        let config = CompressionConfig { decompress_responses: false, ..CompressionConfig::default() };
        let middleware = CompressionMiddleware::new(config);
        let mut request = Request::parse(http::Method::GET, "http://example.test/").unwrap();
        middleware.negotiate_accept_encoding(&mut request);
        assert_eq!(
            request.headers().get(http::header::ACCEPT_ENCODING).unwrap(),
            "identity"
        );
    }

    #[tokio::test]
    async fn disabled_decompression_leaves_response_body_untouched() {
        use crate::chain::{MiddlewareChain, TerminalSender};
        use crate::context::Context;
        use http::{Method, StatusCode};
        use std::sync::Arc;

        struct GzipTerminal;

        #[async_trait]
        impl TerminalSender for GzipTerminal {
            async fn send(&self, _ctx: &Context, request: Request) -> Result<Response> {
                let mut headers = http::HeaderMap::new();
                headers.insert(http::header::CONTENT_ENCODING, "gzip".parse().unwrap());
                Ok(Response::new(StatusCode::OK, headers, bytes::Bytes::from_static(b"not gzip"), request.url().clone()))
            }
        }

        let config = CompressionConfig { decompress_responses: false, ..CompressionConfig::default() };
        let middleware = Arc::new(CompressionMiddleware::new(config));
        let chain = MiddlewareChain::new(vec![middleware], Arc::new(GzipTerminal));
        let request = Request::parse(Method::GET, "http://example.test/").unwrap();
        let response = chain.execute(request).await.unwrap();
        assert_eq!(response.bytes(), b"not gzip".as_slice());
    }
}
