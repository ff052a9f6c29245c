use crate::encoding::negotiate;
use crate::future::ResponseFuture;
use crate::layer::CompressionConfig;
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    config: Arc<CompressionConfig>,
}

impl<S> CompressionService<S> {
    pub(crate) fn new(inner: S, config: Arc<CompressionConfig>) -> Self {
        Self { inner, config }
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: http_body::Body + Unpin,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<crate::body::CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Candidates come back in the client's preference order; the first
        // supported one wins.
        let accept_encoding = req
            .headers()
            .get(http::header::ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let encoding = negotiate(accept_encoding, &self.config.encodings)
            .into_iter()
            .next();

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, encoding, Arc::clone(&self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;
    use crate::layer::CompressionLayer;
    use crate::predicate::CompressibleTypes;
    use bytes::Bytes;
    use http::{Response, header};
    use http_body::Body;
    use http_body_util::Full;
    use std::convert::Infallible;
    use std::future::Future;
    use std::io::Read;
    use std::pin::Pin;
    use tower::{Layer, ServiceExt};

    fn block_on<F: Future>(fut: F) -> F::Output {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut fut = std::pin::pin!(fut);
        loop {
            if let Poll::Ready(output) = fut.as_mut().poll(&mut cx) {
                return output;
            }
        }
    }

    fn collect<B>(body: B) -> Vec<u8>
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Debug,
    {
        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut body = body;
        let mut out = Vec::new();
        loop {
            match Pin::new(&mut body).poll_frame(&mut cx) {
                Poll::Ready(None) => return out,
                Poll::Ready(Some(result)) => {
                    if let Ok(data) = result.unwrap().into_data() {
                        out.extend_from_slice(&data);
                    }
                }
                Poll::Pending => {}
            }
        }
    }

    fn hello_service()
    -> impl Service<Request<()>, Response = Response<Full<Bytes>>, Error = Infallible> + Clone {
        tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("hello world"))))
        })
    }

    fn request(accept_encoding: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = accept_encoding {
            builder = builder.header(header::ACCEPT_ENCODING, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_identity_request_gets_raw_body() {
        let service = CompressionLayer::new().layer(hello_service());

        let response = block_on(service.oneshot(request(Some("identity")))).unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), b"hello world");
    }

    #[test]
    fn test_absent_header_gets_raw_body() {
        let service = CompressionLayer::new().layer(hello_service());

        let response = block_on(service.oneshot(request(None))).unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), b"hello world");
    }

    #[test]
    fn test_gzip_request_gets_compressed_body() {
        let service = CompressionLayer::new()
            .compressible_types(CompressibleTypes::new(["text/*"]).unwrap())
            .layer(hello_service());

        let response = block_on(service.oneshot(request(Some("gzip")))).unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            response.headers().get(header::VARY).unwrap(),
            "accept-encoding"
        );
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&collect(response.into_body())[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn test_header_order_selects_encoding() {
        let service = CompressionLayer::new().layer(hello_service());

        // gzip is listed first; its quality does not demote it.
        let response = block_on(service.oneshot(request(Some("gzip;q=0.8,deflate")))).unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
    }

    #[test]
    fn test_registry_filter_selects_supported_encoding() {
        let service = CompressionLayer::new()
            .encodings(&[Encoding::Deflate])
            .layer(hello_service());

        let response = block_on(service.oneshot(request(Some("gzip, deflate;q=0.5")))).unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );
    }

    #[test]
    fn test_ineligible_content_type_gets_raw_body() {
        let service = CompressionLayer::new()
            .compressible_types(CompressibleTypes::new(["application/json"]).unwrap())
            .layer(hello_service());

        let response = block_on(service.oneshot(request(Some("gzip")))).unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), b"hello world");
    }

    #[test]
    fn test_empty_registry_disables_compression() {
        let service = CompressionLayer::new()
            .encodings(&[])
            .layer(hello_service());

        let response = block_on(service.oneshot(request(Some("gzip, deflate")))).unwrap();

        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(collect(response.into_body()), b"hello world");
    }
}
