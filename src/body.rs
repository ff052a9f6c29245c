use crate::encoding::Compressor;
use bytes::{Buf, Bytes, BytesMut};
use http_body::{Body, Frame};
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// A response body that may be compressed.
    ///
    /// This type wraps an inner body and either routes it through a
    /// streaming encoder or passes it through unchanged. The first frame
    /// of the inner body may already have been consumed while deciding
    /// whether to compress; it is replayed before the rest of the stream.
    #[project = CompressionBodyProj]
    #[allow(missing_docs)]
    pub enum CompressionBody<B> {
        /// Compressed body with its per-request session state.
        Compressed {
            #[pin]
            inner: B,
            session: CompressSession,
        },
        /// Passthrough body without compression.
        Passthrough {
            #[pin]
            inner: B,
            replay: Option<Result<Frame<Bytes>, io::Error>>,
        },
    }
}

/// Per-request state for an actively compressed body.
///
/// Owns the only compressor created for the request; its trailer is emitted
/// exactly once when the inner body ends, and the `Done` phase makes any
/// later poll a no-op.
pub(crate) struct CompressSession {
    compressor: Box<dyn Compressor>,
    replay: Option<Bytes>,
    pending_trailers: Option<http::HeaderMap>,
    phase: Phase,
}

/// Phase machine for a compressing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Reading data from the inner body and encoding it.
    Reading,
    /// Finishing the encoder after the inner body is done.
    Finishing,
    /// Emitting buffered trailers.
    Trailers,
    /// Compression is complete.
    Done,
}

impl CompressSession {
    fn new(compressor: Box<dyn Compressor>, replay: Option<Bytes>) -> Self {
        Self {
            compressor,
            replay,
            pending_trailers: None,
            phase: Phase::Reading,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    /// Polls the inner body and encodes its data.
    fn poll_compressed<B>(
        &mut self,
        cx: &mut Context<'_>,
        mut inner: Pin<&mut B>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>>
    where
        B: Body,
        B::Data: Buf,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(None),

                Phase::Trailers => {
                    self.phase = Phase::Done;
                    if let Some(trailers) = self.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                    return Poll::Ready(None);
                }

                Phase::Finishing => {
                    let mut out = Vec::new();

                    match self.compressor.finish(&mut out) {
                        Ok(done) => {
                            if done {
                                self.phase = if self.pending_trailers.is_some() {
                                    Phase::Trailers
                                } else {
                                    Phase::Done
                                };
                            }
                            if !out.is_empty() {
                                return Poll::Ready(Some(Ok(Frame::data(Bytes::from(out)))));
                            }
                            // No trailer bytes this round, keep finishing.
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "failed to finalize compressed stream");
                            self.phase = Phase::Done;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }

                Phase::Reading => {
                    if let Some(chunk) = self.replay.take() {
                        match self.encode_chunk(&chunk) {
                            Ok(Some(data)) => return Poll::Ready(Some(Ok(Frame::data(data)))),
                            // Everything buffered inside the encoder; read on.
                            Ok(None) => continue,
                            Err(e) => return Poll::Ready(Some(Err(e))),
                        }
                    }

                    match inner.as_mut().poll_frame(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(None) => {
                            self.phase = Phase::Finishing;
                        }
                        Poll::Ready(Some(Err(e))) => {
                            return Poll::Ready(Some(Err(io::Error::other(e.into()))));
                        }
                        Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                            Ok(data) => {
                                let input = copy_to_bytes(data);
                                match self.encode_chunk(&input) {
                                    Ok(Some(data)) => {
                                        return Poll::Ready(Some(Ok(Frame::data(data))));
                                    }
                                    Ok(None) => continue,
                                    Err(e) => return Poll::Ready(Some(Err(e))),
                                }
                            }
                            Err(frame) => {
                                if let Ok(trailers) = frame.into_trailers() {
                                    // Trailers go out after the encoder's own trailer.
                                    self.pending_trailers = Some(trailers);
                                    self.phase = Phase::Finishing;
                                }
                            }
                        },
                    }
                }
            }
        }
    }

    /// Runs a chunk of input through the compressor.
    ///
    /// Returns `Ok(None)` when the compressor consumed the input without
    /// producing output yet; the caller keeps reading rather than yielding
    /// an empty frame.
    fn encode_chunk(&mut self, input: &[u8]) -> io::Result<Option<Bytes>> {
        let mut out = Vec::new();
        self.compressor.write(input, &mut out)?;

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Bytes::from(out)))
        }
    }
}

impl<B> CompressionBody<B> {
    /// Creates a compressed body around an already-constructed compressor.
    ///
    /// `replay` is the first chunk of the inner body, consumed while the
    /// compression decision was made; it is encoded ahead of the remaining
    /// frames.
    pub(crate) fn compressed(
        inner: B,
        compressor: Box<dyn Compressor>,
        replay: Option<Bytes>,
    ) -> Self {
        Self::Compressed {
            inner,
            session: CompressSession::new(compressor, replay),
        }
    }

    /// Creates a passthrough body without compression.
    pub fn passthrough(inner: B) -> Self {
        Self::Passthrough {
            inner,
            replay: None,
        }
    }

    /// Creates a passthrough body that yields `first` before the inner body.
    pub(crate) fn passthrough_with(inner: B, first: Result<Frame<Bytes>, io::Error>) -> Self {
        Self::Passthrough {
            inner,
            replay: Some(first),
        }
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Data: Buf,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            CompressionBodyProj::Passthrough { inner, replay } => {
                if let Some(first) = replay.take() {
                    return Poll::Ready(Some(first));
                }
                match inner.poll_frame(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(None) => Poll::Ready(None),
                    Poll::Ready(Some(Ok(frame))) => {
                        Poll::Ready(Some(Ok(frame.map_data(copy_to_bytes))))
                    }
                    Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(io::Error::other(e.into())))),
                }
            }
            CompressionBodyProj::Compressed { inner, session } => {
                session.poll_compressed(cx, inner)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CompressionBody::Passthrough { inner, replay } => {
                replay.is_none() && inner.is_end_stream()
            }
            CompressionBody::Compressed { session, .. } => session.phase() == Phase::Done,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            CompressionBody::Passthrough {
                inner,
                replay: None,
            } => inner.size_hint(),
            // Compressed or partially-replayed size is unknown
            _ => http_body::SizeHint::default(),
        }
    }
}

/// Copies a `Buf` into contiguous `Bytes`.
pub(crate) fn copy_to_bytes<D: Buf>(mut data: D) -> Bytes {
    let mut bytes = BytesMut::with_capacity(data.remaining());
    while data.has_remaining() {
        let chunk = data.chunk();
        bytes.extend_from_slice(chunk);
        let len = chunk.len();
        data.advance(len);
    }
    bytes.freeze()
}
