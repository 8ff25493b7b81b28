// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Image attachment loading and validation.
//!
//! The runtime accepts two attachment shapes: a filesystem path, or an inline
//! `data:<mime>;base64,<...>` URL. Both are normalized into a validated
//! [`ChatImageAttachment`] whose `data_url` can be embedded directly into a
//! multimodal provider request.
//!
//! ## Limits
//! Attachments are capped at [`MAX_IMAGE_BYTES`] and must be one of the four
//! accepted formats (png, jpeg, webp, gif). The format is sniffed from the
//! bytes; the file extension is only a fallback.
//!
//! ## Caching
//! Path loads are cached in an in-process LRU keyed on the SHA-256 of the raw
//! file bytes, so re-attaching the same image (or identical content under a
//! different path) skips the re-encode.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

pub use error::ImageError;

mod error;

/// Maximum accepted attachment size in bytes (8 MiB).
pub const MAX_IMAGE_BYTES: u64 = 8 * 1024 * 1024;

/// Maximum number of encoded attachments held in the in-process LRU cache.
pub const CACHE_CAPACITY: usize = 32;

type CacheKey = [u8; 32]; // SHA-256 digest

fn attachment_cache() -> &'static Mutex<lru::LruCache<CacheKey, ChatImageAttachment>> {
    static CACHE: OnceLock<Mutex<lru::LruCache<CacheKey, ChatImageAttachment>>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(lru::LruCache::new(
            NonZeroUsize::new(CACHE_CAPACITY).unwrap(),
        ))
    })
}

/// A validated, base64-encoded image attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatImageAttachment {
    /// Source path, or `"(inline)"` for data-URL inputs.
    pub path: String,
    /// MIME type: `image/png`, `image/jpeg`, `image/webp`, or `image/gif`.
    pub mime_type: String,
    /// `data:<mime>;base64,<b64>`, ready for embedding in a request.
    pub data_url: String,
    pub byte_size: u64,
}

/// Normalize one raw input (a filesystem path or an inline data URL,
/// disambiguated by the `data:` prefix) into a validated attachment.
pub fn load_attachment(raw: &str) -> Result<ChatImageAttachment, ImageError> {
    if raw.starts_with("data:") {
        attachment_from_data_url(raw)
    } else {
        attachment_from_path(Path::new(raw))
    }
}

/// Normalize a whole batch, failing on the first invalid input.
pub fn load_attachments<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<ChatImageAttachment>, ImageError> {
    inputs.iter().map(|s| load_attachment(s.as_ref())).collect()
}

fn attachment_from_path(path: &Path) -> Result<ChatImageAttachment, ImageError> {
    let display = path.display().to_string();
    let meta =
        std::fs::metadata(path).map_err(|e| ImageError::Io(display.clone(), e))?;
    if !meta.is_file() {
        return Err(ImageError::NotAFile(display));
    }
    if meta.len() > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge(display, meta.len(), MAX_IMAGE_BYTES));
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "webp" | "gif") {
        return Err(ImageError::UnsupportedFormat(display));
    }

    let raw = std::fs::read(path).map_err(|e| ImageError::Io(display.clone(), e))?;

    // Content-addressed cache lookup.
    let key: CacheKey = sha2::Sha256::digest(&raw).into();
    if let Ok(mut cache) = attachment_cache().lock() {
        if let Some(cached) = cache.get(&key) {
            return Ok(cached.clone());
        }
    }

    // Sniff the format from the bytes; fall back to the extension.
    let mime = match image::guess_format(&raw).ok().and_then(mime_for_format) {
        Some(m) => m,
        None => mime_for_extension(&ext).ok_or(ImageError::UnsupportedFormat(display.clone()))?,
    };

    let attachment = ChatImageAttachment {
        path: display,
        mime_type: mime.to_string(),
        byte_size: raw.len() as u64,
        data_url: format!("data:{};base64,{}", mime, B64.encode(&raw)),
    };

    if let Ok(mut cache) = attachment_cache().lock() {
        cache.put(key, attachment.clone());
    }
    Ok(attachment)
}

fn attachment_from_data_url(url: &str) -> Result<ChatImageAttachment, ImageError> {
    let (mime, bytes) = parse_data_url(url)?;
    if !matches!(
        mime.as_str(),
        "image/png" | "image/jpeg" | "image/webp" | "image/gif"
    ) {
        return Err(ImageError::UnsupportedFormat(mime));
    }
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        return Err(ImageError::TooLarge(
            "(inline)".into(),
            bytes.len() as u64,
            MAX_IMAGE_BYTES,
        ));
    }
    Ok(ChatImageAttachment {
        path: "(inline)".into(),
        mime_type: mime.clone(),
        byte_size: bytes.len() as u64,
        // Re-encode so the stored URL is normalized regardless of input padding.
        data_url: format!("data:{};base64,{}", mime, B64.encode(&bytes)),
    })
}

/// Parse a data URL and return `(mime_type, raw_bytes)`.
///
/// Accepts the `data:<mime>;base64,<data>` format.
pub fn parse_data_url(data_url: &str) -> Result<(String, Vec<u8>), ImageError> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| ImageError::InvalidDataUrl(clip(data_url)))?;
    let (meta, b64) = rest
        .split_once(',')
        .ok_or_else(|| ImageError::InvalidDataUrl(clip(data_url)))?;
    let mime = meta.strip_suffix(";base64").unwrap_or(meta).to_string();
    let bytes = B64
        .decode(b64.trim())
        .map_err(|e| ImageError::Base64(e.to_string()))?;
    Ok((mime, bytes))
}

fn mime_for_format(fmt: image::ImageFormat) -> Option<&'static str> {
    match fmt {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn clip(s: &str) -> String {
    if s.len() > 48 {
        format!("{}…", &s[..48])
    } else {
        s.to_string()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // 1×1 red PNG bytes (valid minimal PNG, CRCs verified by Python zlib)
    const MINIMAL_PNG: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, // PNG signature
        0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52, // IHDR chunk
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, // 1×1
        0x08, 0x02, 0x00, 0x00, 0x00, 0x90, 0x77, 0x53, // bit depth 8, RGB
        0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, // IDAT length + "IDAT"
        0x54, 0x78, 0x9c, 0x63, 0xf8, 0xcf, 0xc0, 0x00, // compressed pixel (red)
        0x00, 0x03, 0x01, 0x01, 0x00, 0xc9, 0xfe, 0x92, // IDAT CRC
        0xef, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, // IEND
        0x44, 0xae, 0x42, 0x60, 0x82, // IEND CRC
    ];

    fn write_png(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, MINIMAL_PNG).unwrap();
        path
    }

    #[test]
    fn load_png_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "red.png");
        let a = load_attachment(&path.display().to_string()).unwrap();
        assert_eq!(a.mime_type, "image/png");
        assert_eq!(a.byte_size, MINIMAL_PNG.len() as u64);
        assert!(a.data_url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn missing_path_is_io_error() {
        let err = load_attachment("/nonexistent/img.png").unwrap_err();
        assert!(matches!(err, ImageError::Io(..)));
    }

    #[test]
    fn unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();
        let err = load_attachment(&path.display().to_string()).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedFormat(_)));
    }

    #[test]
    fn directory_rejected_as_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("pics.png");
        std::fs::create_dir(&sub).unwrap();
        let err = load_attachment(&sub.display().to_string()).unwrap_err();
        assert!(matches!(err, ImageError::NotAFile(_)));
    }

    #[test]
    fn inline_data_url_accepted() {
        let url = format!("data:image/png;base64,{}", B64.encode(MINIMAL_PNG));
        let a = load_attachment(&url).unwrap();
        assert_eq!(a.path, "(inline)");
        assert_eq!(a.mime_type, "image/png");
        assert_eq!(a.byte_size, MINIMAL_PNG.len() as u64);
    }

    #[test]
    fn inline_data_url_with_bad_mime_rejected() {
        let url = format!("data:application/pdf;base64,{}", B64.encode(b"%PDF"));
        let err = load_attachment(&url).unwrap_err();
        assert!(matches!(err, ImageError::UnsupportedFormat(_)));
    }

    #[test]
    fn inline_data_url_with_bad_base64_rejected() {
        let err = load_attachment("data:image/png;base64,@@@@").unwrap_err();
        assert!(matches!(err, ImageError::Base64(_)));
    }

    #[test]
    fn malformed_data_url_rejected() {
        let err = load_attachment("data:image/png").unwrap_err();
        assert!(matches!(err, ImageError::InvalidDataUrl(_)));
    }

    #[test]
    fn parse_data_url_valid() {
        let (mime, bytes) = parse_data_url("data:image/gif;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/gif");
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn identical_content_at_different_paths_shares_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_png(&dir, "a.png");
        let b = write_png(&dir, "b.png");
        let first = load_attachment(&a.display().to_string()).unwrap();
        let second = load_attachment(&b.display().to_string()).unwrap();
        assert_eq!(first.data_url, second.data_url);
        assert_eq!(first.mime_type, second.mime_type);
    }

    #[test]
    fn batch_load_fails_on_first_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_png(&dir, "ok.png");
        let inputs = vec![good.display().to_string(), "/missing/file.png".to_string()];
        assert!(load_attachments(&inputs).is_err());
    }
}
