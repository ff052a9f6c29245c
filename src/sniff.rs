//! Content-type detection by magic-byte inspection.
//!
//! Covers the signatures a response body is likely to start with; anything
//! unrecognized falls back to `text/plain` when the first bytes look like
//! text and `application/octet-stream` otherwise.

/// At most this many leading bytes are considered.
const SNIFF_LEN: usize = 512;

/// HTML tags that identify a document as `text/html`. Matched
/// case-insensitively and terminated by a space or `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Infers the MIME type of a body from its first bytes.
///
/// Always returns a valid type; an empty input is reported as plain text.
pub fn detect(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    if let Some(bom) = detect_bom(data) {
        return bom;
    }

    let trimmed = skip_whitespace(data);
    for tag in HTML_TAGS {
        if html_tag_matches(trimmed, tag) {
            return "text/html; charset=utf-8";
        }
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some(exact) = detect_exact(data) {
        return exact;
    }
    if let Some(riff) = detect_riff(data) {
        return riff;
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn detect_bom(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some("text/plain; charset=utf-8")
    } else if data.starts_with(&[0xFE, 0xFF]) {
        Some("text/plain; charset=utf-16be")
    } else if data.starts_with(&[0xFF, 0xFE]) {
        Some("text/plain; charset=utf-16le")
    } else {
        None
    }
}

fn detect_exact(data: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"%!PS-Adobe-", "application/postscript"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xFF\xD8\xFF", "image/jpeg"),
        (b"BM", "image/bmp"),
        (b"OggS\x00", "application/ogg"),
        (b"\x1F\x8B\x08", "application/x-gzip"),
        (b"PK\x03\x04", "application/zip"),
        (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
        (b"\x00asm", "application/wasm"),
    ];

    SIGNATURES
        .iter()
        .find(|(sig, _)| data.starts_with(sig))
        .map(|&(_, mime)| mime)
}

/// RIFF containers carry the real format at offset 8.
fn detect_riff(data: &[u8]) -> Option<&'static str> {
    if !data.starts_with(b"RIFF") || data.len() < 14 {
        return None;
    }
    if &data[8..14] == b"WEBPVP" {
        Some("image/webp")
    } else if &data[8..12] == b"WAVE" {
        Some("audio/wave")
    } else if &data[8..12] == b"AVI " {
        Some("video/avi")
    } else {
        None
    }
}

fn skip_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|&b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

fn html_tag_matches(data: &[u8], tag: &[u8]) -> bool {
    // The byte after the tag must terminate it.
    if data.len() < tag.len() + 1 {
        return false;
    }
    let matches = data[..tag.len()]
        .iter()
        .zip(tag)
        .all(|(&b, &t)| b.to_ascii_uppercase() == t);
    matches && matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
