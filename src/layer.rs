use crate::encoding::Encoding;
use crate::predicate::CompressibleTypes;
use crate::service::CompressionService;
use compression_core::Level;
use std::sync::Arc;
use tower::Layer;

/// Immutable per-middleware configuration, shared read-only by every request.
#[derive(Debug)]
pub(crate) struct CompressionConfig {
    /// Encodings the server supports, used to filter negotiation results.
    pub(crate) encodings: Vec<Encoding>,
    /// Content types eligible for compression.
    pub(crate) types: CompressibleTypes,
    /// Compression level handed to the encoder.
    pub(crate) level: Level,
}

/// A Tower layer that compresses HTTP response bodies.
///
/// The encoding is negotiated from the request's `Accept-Encoding` header;
/// whether a particular response is compressed at all is decided from its
/// (possibly sniffed) content type.
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    encodings: Vec<Encoding>,
    types: CompressibleTypes,
    level: Level,
}

impl CompressionLayer {
    /// Creates a new compression layer supporting gzip and deflate, with
    /// every content type eligible.
    pub fn new() -> Self {
        Self {
            encodings: vec![Encoding::Gzip, Encoding::Deflate],
            types: CompressibleTypes::any(),
            level: Level::Default,
        }
    }

    /// Sets the encodings the middleware is willing to serve.
    ///
    /// An empty slice disables compression entirely.
    pub fn encodings(mut self, encodings: &[Encoding]) -> Self {
        self.encodings = encodings.to_vec();
        self
    }

    /// Sets the content types eligible for compression.
    pub fn compressible_types(mut self, types: CompressibleTypes) -> Self {
        self.types = types;
        self
    }

    /// Sets the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(
            inner,
            Arc::new(CompressionConfig {
                encodings: self.encodings.clone(),
                types: self.types.clone(),
                level: self.level,
            }),
        )
    }
}
