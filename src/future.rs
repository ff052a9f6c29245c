use crate::body::{CompressionBody, copy_to_bytes};
use crate::encoding::Encoding;
use crate::layer::CompressionConfig;
use crate::sniff;
use bytes::{Buf, Bytes};
use http::{Response, StatusCode, header};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    ///
    /// Resolves the inner service future and then, when compression is still
    /// on the table, peeks the first body frame so the content type can be
    /// sniffed and the compress-or-passthrough decision made before the
    /// response head is released.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        encoding: Option<Encoding>,
        config: Arc<CompressionConfig>,
        peeking: Option<Peeking<B>>,
    }
}

struct Peeking<B> {
    parts: http::response::Parts,
    body: B,
    encoding: Encoding,
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(
        inner: F,
        encoding: Option<Encoding>,
        config: Arc<CompressionConfig>,
    ) -> Self {
        Self {
            inner,
            encoding,
            config,
            peeking: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body + Unpin,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        loop {
            match this.peeking.as_mut() {
                None => {
                    let response = match this.inner.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(response)) => response,
                    };

                    let Some(encoding) = *this.encoding else {
                        return Poll::Ready(Ok(response.map(CompressionBody::passthrough)));
                    };

                    let (parts, body) = response.into_parts();
                    if skip_compression(&parts)
                        || declared_type_rejected(&parts.headers, this.config)
                    {
                        return Poll::Ready(Ok(Response::from_parts(
                            parts,
                            CompressionBody::passthrough(body),
                        )));
                    }

                    *this.peeking = Some(Peeking {
                        parts,
                        body,
                        encoding,
                    });
                }
                Some(peek) => {
                    let first = match Pin::new(&mut peek.body).poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(first) => first,
                    };
                    if let Some(peek) = this.peeking.take() {
                        return Poll::Ready(Ok(finish_response(peek, first, this.config)));
                    }
                }
            }
        }
    }
}

/// Completes the decision once the first body frame (or end of stream) is
/// known.
fn finish_response<B>(
    peek: Peeking<B>,
    first: Option<Result<Frame<B::Data>, B::Error>>,
    config: &CompressionConfig,
) -> Response<CompressionBody<B>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let Peeking {
        mut parts,
        body,
        encoding,
    } = peek;

    let frame = match first {
        // The handler never wrote a body: no encoder, no encoding header.
        None => return Response::from_parts(parts, CompressionBody::passthrough(body)),
        Some(Err(e)) => {
            return Response::from_parts(
                parts,
                CompressionBody::passthrough_with(body, Err(io::Error::other(e.into()))),
            );
        }
        Some(Ok(frame)) => frame,
    };

    let chunk: Bytes = match frame.into_data() {
        Ok(data) => copy_to_bytes(data),
        Err(frame) => {
            // Trailers before any data is still a zero-write body.
            let body = match frame.into_trailers() {
                Ok(trailers) => {
                    CompressionBody::passthrough_with(body, Ok(Frame::trailers(trailers)))
                }
                Err(_) => CompressionBody::passthrough(body),
            };
            return Response::from_parts(parts, body);
        }
    };

    // Sniff and set the content type when the handler didn't declare one.
    let content_type = match parts.headers.get(header::CONTENT_TYPE) {
        Some(value) => value.to_str().unwrap_or("").to_owned(),
        None => {
            let sniffed = sniff::detect(&chunk);
            parts.headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static(sniffed),
            );
            sniffed.to_owned()
        }
    };

    if !config.types.eligible(&content_type) {
        return Response::from_parts(
            parts,
            CompressionBody::passthrough_with(body, Ok(Frame::data(chunk))),
        );
    }

    let encoder = match encoding.encoder(config.level) {
        Ok(encoder) => encoder,
        Err(e) => {
            tracing::warn!(
                error = %e,
                encoding = encoding.content_encoding(),
                "failed to construct encoder, sending identity response",
            );
            return Response::from_parts(
                parts,
                CompressionBody::passthrough_with(body, Ok(Frame::data(chunk))),
            );
        }
    };

    parts.headers.insert(
        header::CONTENT_ENCODING,
        header::HeaderValue::from_static(encoding.content_encoding()),
    );

    // Remove Content-Length since the compressed size is unknown, and
    // Accept-Ranges since ranges over compressed content don't line up
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.remove(header::ACCEPT_RANGES);

    add_vary_accept_encoding(&mut parts.headers);

    Response::from_parts(parts, CompressionBody::compressed(body, encoder, Some(chunk)))
}

/// Responses that must never be touched, whatever their content type.
fn skip_compression(parts: &http::response::Parts) -> bool {
    // 101 hands the connection to the upgrade handler; the raw stream and
    // any upgrade capability in the extensions pass through untouched.
    parts.status == StatusCode::SWITCHING_PROTOCOLS
        || parts.headers.contains_key(header::CONTENT_ENCODING)
        || parts.headers.contains_key(header::CONTENT_RANGE)
}

/// A declared content type the gate rejects settles the decision without
/// looking at the body.
fn declared_type_rejected(headers: &header::HeaderMap, config: &CompressionConfig) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap_or(""))
        .is_some_and(|ct| !config.types.eligible(ct))
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut header::HeaderMap) {
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let present = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if present {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("accept-encoding"),
    );
}
