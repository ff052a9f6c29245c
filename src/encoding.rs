use compression_codecs::{EncodeV2, deflate::DeflateEncoder, gzip::GzipEncoder};
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// Supported content encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Gzip compression.
    Gzip,
    /// Raw deflate compression.
    Deflate,
}

impl Encoding {
    /// Returns the Content-Encoding header value for this encoding.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Parses a single Accept-Encoding token (already trimmed and lowercased).
    fn from_token(token: &str) -> Option<Encoding> {
        match token {
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            _ => None,
        }
    }

    /// Creates a new streaming compressor for this encoding.
    ///
    /// Fails when `level` requests a precise value outside the range the
    /// underlying codec accepts; callers are expected to fall back to an
    /// identity response rather than abort the request.
    pub fn encoder(&self, level: Level) -> io::Result<Box<dyn Compressor>> {
        if let Level::Precise(n) = level {
            if !(0..=9).contains(&n) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "compression level {n} out of range for {}",
                        self.content_encoding()
                    ),
                ));
            }
        }

        let encoder: Box<dyn EncodeV2 + Send> = match self {
            Encoding::Gzip => Box::new(GzipEncoder::new(level.into())),
            Encoding::Deflate => Box::new(DeflateEncoder::new(level.into())),
        };
        Ok(Box::new(CodecCompressor {
            encoder,
            buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }))
    }
}

/// A streaming compressor.
///
/// Implementations transform written bytes incrementally and must be
/// finished explicitly to emit the format's trailing bytes.
pub trait Compressor: Send {
    /// Compresses `input`, appending any produced bytes to `out`.
    ///
    /// Producing no output is valid; the bytes may sit buffered inside the
    /// compressor until more input or the trailer flushes them.
    fn write(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()>;

    /// Finalizes the stream, appending trailer bytes to `out`.
    ///
    /// Returns `true` once the trailer is complete; callers call again
    /// until then.
    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<bool>;
}

/// [`Compressor`] backed by a `compression-codecs` encoder and a fixed
/// scratch buffer.
struct CodecCompressor {
    encoder: Box<dyn EncodeV2 + Send>,
    buffer: Vec<u8>,
}

impl Compressor for CodecCompressor {
    fn write(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        let mut input_buf = PartialBuffer::new(input);

        loop {
            let mut output = WriteBuffer::new_initialized(self.buffer.as_mut_slice());

            if let Err(e) = self.encoder.encode(&mut input_buf, &mut output) {
                return Err(io::Error::other(e));
            }

            let written = output.written_len();
            if written > 0 {
                out.extend_from_slice(&self.buffer[..written]);
            }

            if input_buf.written_len() >= input.len() {
                break;
            }

            // Safety check to prevent an infinite loop
            if written == 0 && input_buf.written_len() == 0 {
                break;
            }
        }

        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> io::Result<bool> {
        let mut output = WriteBuffer::new_initialized(self.buffer.as_mut_slice());

        let done = self.encoder.finish(&mut output).map_err(io::Error::other)?;
        let written = output.written_len();
        if written > 0 {
            out.extend_from_slice(&self.buffer[..written]);
        }
        Ok(done)
    }
}

/// Parses an Accept-Encoding header and lists the encodings the client will
/// accept, filtered to the set this middleware supports.
///
/// Candidates keep the client's header order. A token's optional
/// `;q=<float>` quality only excludes: `q=0` drops the token, a missing or
/// malformed quality defaults to 1.0 (kept), and values are clamped to
/// `[0, 1]`. Ranking never depends on the iteration order of the supported
/// set, which is a filter only.
pub fn negotiate(header: &str, supported: &[Encoding]) -> Vec<Encoding> {
    let mut candidates: Vec<Encoding> = Vec::new();

    for part in header.split(',') {
        let token = part.trim().to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }

        let (name, quality) = parse_token_with_quality(&token);
        if quality == 0.0 {
            continue;
        }

        let Some(encoding) = Encoding::from_token(name) else {
            continue;
        };
        if !supported.contains(&encoding) || candidates.contains(&encoding) {
            continue;
        }

        candidates.push(encoding);
    }

    candidates
}

/// Splits an entry like "gzip" or "deflate;q=0.8" into (name, quality).
fn parse_token_with_quality(token: &str) -> (&str, f32) {
    let mut parts = token.splitn(2, ';');
    let name = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            q.strip_prefix("q=").and_then(|v| v.parse::<f32>().ok())
        })
        .map(|q| q.clamp(0.0, 1.0))
        .unwrap_or(1.0);

    (name, quality)
}
