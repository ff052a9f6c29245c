//! HTTP middleware for Tower: negotiated response compression and basic
//! authentication.
//!
//! The compression layer negotiates an encoding from the client's
//! `Accept-Encoding` header, decides per response whether compression should
//! apply from the (possibly sniffed) content type, and streams the body
//! through a gzip or deflate encoder.
//!
//! # Example
//!
//! ```ignore
//! use tower_middleware::{BasicAuthLayer, CompressionLayer, CompressibleTypes};
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new().compressible_types(
//!         CompressibleTypes::new(["text/*", "application/json"])?,
//!     ))
//!     .layer(BasicAuthLayer::new("admin", "hunter2"))
//!     .service(my_service);
//! ```
//!
//! # Compression Rules
//!
//! The middleware will **not** compress responses when:
//! - No supported `Accept-Encoding` is present in the request
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - The status is `101 Switching Protocols` (the upgrade handler takes the
//!   raw connection)
//! - The content type, declared or sniffed from the first body bytes, is not
//!   in the configured eligible set
//! - The handler never writes a body (no empty compressed stream is emitted)
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` header is set to the negotiated encoding
//! - `Content-Type` is set from the first body bytes if the handler left it
//!   unset
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed
//! - `Vary` header includes `Accept-Encoding`

#![deny(missing_docs)]

mod auth;
mod body;
mod encoding;
mod future;
mod layer;
mod predicate;
mod service;
mod sniff;

pub use auth::{AuthFuture, BasicAuthLayer, BasicAuthService};
pub use body::CompressionBody;
pub use compression_core::Level;
pub use encoding::{Compressor, Encoding, negotiate};
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use predicate::{CompressibleTypes, InvalidPattern};
pub use service::CompressionService;
