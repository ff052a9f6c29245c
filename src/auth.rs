//! Basic-authentication middleware.
//!
//! Compares the request's `Authorization` (or `Proxy-Authorization`)
//! credential against a secret fixed at construction and answers `401` with
//! the matching challenge header on any mismatch. Malformed credentials are
//! indistinguishable from wrong ones.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::{HeaderName, HeaderValue, Request, Response, StatusCode, header};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};

/// A Tower layer that guards the wrapped service with HTTP basic auth.
#[derive(Debug, Clone)]
pub struct BasicAuthLayer {
    secret: Vec<u8>,
    realm: String,
    proxy: bool,
}

impl BasicAuthLayer {
    /// Creates a layer accepting exactly `username`/`password`, with the
    /// realm `Restricted`.
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            secret: format!("{username}:{password}").into_bytes(),
            realm: "Restricted".to_owned(),
            proxy: false,
        }
    }

    /// Sets the realm advertised in the challenge.
    pub fn realm(mut self, realm: &str) -> Self {
        self.realm = realm.to_owned();
        self
    }

    /// Switches to the proxy header pair, `Proxy-Authorization` and
    /// `Proxy-Authenticate`. The rejection status stays `401`.
    pub fn proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }
}

impl<S> Layer<S> for BasicAuthLayer {
    type Service = BasicAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let (authorization, authenticate) = if self.proxy {
            (header::PROXY_AUTHORIZATION, header::PROXY_AUTHENTICATE)
        } else {
            (header::AUTHORIZATION, header::WWW_AUTHENTICATE)
        };

        BasicAuthService {
            inner,
            credentials: Arc::new(Credentials {
                secret: self.secret.clone(),
                authorization,
                authenticate,
                challenge: challenge_value(&self.realm),
            }),
        }
    }
}

/// Immutable credential state shared by every request.
#[derive(Debug)]
struct Credentials {
    secret: Vec<u8>,
    authorization: HeaderName,
    authenticate: HeaderName,
    challenge: HeaderValue,
}

impl Credentials {
    fn verify(&self, encoded: &str) -> bool {
        match BASE64.decode(encoded.trim()) {
            Ok(decoded) => bool::from(decoded.as_slice().ct_eq(self.secret.as_slice())),
            // A decode failure is indistinguishable from a mismatch.
            Err(_) => false,
        }
    }
}

fn challenge_value(realm: &str) -> HeaderValue {
    let sanitized: String = realm
        .chars()
        .filter(|c| matches!(c, ' '..='~') && *c != '"')
        .collect();
    HeaderValue::from_str(&format!("Basic realm=\"{sanitized}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic realm=\"Restricted\""))
}

/// A Tower service produced by [`BasicAuthLayer`].
#[derive(Debug, Clone)]
pub struct BasicAuthService<S> {
    inner: S,
    credentials: Arc<Credentials>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for BasicAuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = AuthFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let authorized = req
            .headers()
            .get(&self.credentials.authorization)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
            .is_some_and(|encoded| self.credentials.verify(encoded));

        if authorized {
            return AuthFuture::Inner {
                future: self.inner.call(req),
            };
        }

        let mut response = Response::new(ResBody::default());
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response.headers_mut().insert(
            self.credentials.authenticate.clone(),
            self.credentials.challenge.clone(),
        );

        AuthFuture::Deny {
            response: Some(response),
        }
    }
}

pin_project! {
    /// Future for basic-auth service responses.
    #[project = AuthFutureProj]
    #[allow(missing_docs)]
    pub enum AuthFuture<F, B> {
        /// Credentials matched; the inner service handles the request.
        Inner {
            #[pin]
            future: F,
        },
        /// Credentials missing or wrong; a challenge response goes out.
        Deny {
            response: Option<Response<B>>,
        },
    }
}

impl<F, B, E> Future for AuthFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            AuthFutureProj::Inner { future } => future.poll(cx),
            AuthFutureProj::Deny { response } => {
                let response = response.take().expect("future polled after completion");
                Poll::Ready(Ok(response))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use std::convert::Infallible;
    use tower::ServiceExt;

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

    fn protected_service()
    -> impl Service<Request<()>, Response = Response<Full<Bytes>>, Error = Infallible> + Clone {
        tower::service_fn(|_req: Request<()>| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from("secret area"))))
        })
    }

    fn request(header_name: &str, value: Option<String>) -> Request<()> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = value {
            builder = builder.header(header_name, value);
        }
        builder.body(()).unwrap()
    }

    fn basic(credentials: &str) -> Option<String> {
        Some(format!("Basic {}", BASE64.encode(credentials)))
    }

    #[test]
    fn test_valid_credentials_pass_through() {
        let service = BasicAuthLayer::new("u", "p").layer(protected_service());

        let response = block_on(service.oneshot(request("authorization", basic("u:p")))).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_wrong_password_rejected() {
        let service = BasicAuthLayer::new("u", "p").layer(protected_service());

        let response =
            block_on(service.oneshot(request("authorization", basic("u:wrong")))).unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Restricted\""
        );
    }

    #[test]
    fn test_missing_header_rejected() {
        let service = BasicAuthLayer::new("u", "p").layer(protected_service());

        let response = block_on(service.oneshot(request("authorization", None))).unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_malformed_base64_rejected_like_mismatch() {
        let service = BasicAuthLayer::new("u", "p").layer(protected_service());

        let response = block_on(service.oneshot(request(
            "authorization",
            Some("Basic not!!valid##base64".to_owned()),
        )))
        .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Restricted\""
        );
    }

    #[test]
    fn test_wrong_scheme_rejected() {
        let service = BasicAuthLayer::new("u", "p").layer(protected_service());

        let response = block_on(service.oneshot(request(
            "authorization",
            Some("Bearer token".to_owned()),
        )))
        .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_custom_realm_in_challenge() {
        let service = BasicAuthLayer::new("u", "p")
            .realm("admin")
            .layer(protected_service());

        let response = block_on(service.oneshot(request("authorization", None))).unwrap();

        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"admin\""
        );
    }

    #[test]
    fn test_proxy_mode_uses_proxy_headers() {
        let service = BasicAuthLayer::new("u", "p")
            .proxy(true)
            .layer(protected_service());

        let ok = block_on(
            service
                .clone()
                .oneshot(request("proxy-authorization", basic("u:p"))),
        )
        .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        // The plain Authorization header no longer counts.
        let rejected =
            block_on(service.oneshot(request("authorization", basic("u:p")))).unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            rejected.headers().get(header::PROXY_AUTHENTICATE).unwrap(),
            "Basic realm=\"Restricted\""
        );
        assert!(rejected.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_composes_with_compression() {
        use crate::layer::CompressionLayer;
        use http_body::Body;
        use std::io::Read;
        use tower::ServiceBuilder;

        // Compression sits outermost, auth guards the handler.
        let service = ServiceBuilder::new()
            .layer(CompressionLayer::new())
            .layer(BasicAuthLayer::new("u", "p"))
            .service(protected_service());

        let request = Request::builder()
            .uri("/")
            .header(header::ACCEPT_ENCODING, "gzip")
            .header(header::AUTHORIZATION, basic("u:p").unwrap())
            .body(())
            .unwrap();
        let response = block_on(service.clone().oneshot(request)).unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );

        let waker = std::task::Waker::noop();
        let mut cx = Context::from_waker(waker);
        let mut body = response.into_body();
        let mut compressed = Vec::new();
        while let Poll::Ready(Some(result)) = Pin::new(&mut body).poll_frame(&mut cx) {
            if let Ok(data) = result.unwrap().into_data() {
                compressed.extend_from_slice(&data);
            }
        }
        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"secret area");

        // Unauthorized requests get an uncompressed, empty 401.
        let request = Request::builder()
            .uri("/")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(())
            .unwrap();
        let response = block_on(service.oneshot(request)).unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        let mut body = response.into_body();
        assert!(matches!(
            Pin::new(&mut body).poll_frame(&mut cx),
            Poll::Ready(None)
        ));
    }
}
