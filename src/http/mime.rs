//! MIME type detection module
//!
//! Returns the corresponding Content-Type based on file extension or
//! request pathname.

use std::path::Path;

/// Get MIME Content-Type based on file extension
///
/// # Examples
/// ```
/// use polyport::http::mime::get_content_type;
/// assert_eq!(get_content_type(Some("html")), "text/html; charset=utf-8");
/// assert_eq!(get_content_type(Some("mp4")), "video/mp4");
/// assert_eq!(get_content_type(None), "application/octet-stream");
/// ```
pub fn get_content_type(extension: Option<&str>) -> &'static str {
    lookup(extension).unwrap_or("application/octet-stream")
}

/// Content-Type for a pathname, or `None` when the extension is unknown.
pub fn content_type_for_path(path: &str) -> Option<&'static str> {
    lookup(extension_of(path))
}

/// MIME type for a pathname with any charset parameter stripped.
pub fn mime_type_for_path(path: &str) -> Option<&'static str> {
    let content_type = content_type_for_path(path)?;
    Some(
        content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim_end(),
    )
}

/// Charset a pathname's Content-Type carries, if it names one.
pub fn charset_for_path(path: &str) -> Option<&'static str> {
    let content_type = content_type_for_path(path)?;
    let (_, parameters) = content_type.split_once(';')?;
    parameters.trim().strip_prefix("charset=")
}

fn extension_of(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|e| e.to_str())
}

fn lookup(extension: Option<&str>) -> Option<&'static str> {
    match extension {
        // Text
        Some("html" | "htm") => Some("text/html; charset=utf-8"),
        Some("css") => Some("text/css; charset=utf-8"),
        Some("txt" | "md") => Some("text/plain; charset=utf-8"),
        Some("xml") => Some("application/xml"),

        // JavaScript/WASM
        Some("js" | "mjs") => Some("application/javascript; charset=utf-8"),
        Some("json") => Some("application/json; charset=utf-8"),
        Some("wasm") => Some("application/wasm"),

        // Images
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("svg") => Some("image/svg+xml"),
        Some("ico") => Some("image/x-icon"),
        Some("webp") => Some("image/webp"),

        // Video
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        Some("ogg" | "ogv") => Some("video/ogg"),
        Some("mov") => Some("video/quicktime"),
        Some("avi") => Some("video/x-msvideo"),

        // Audio
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("flac") => Some("audio/flac"),
        Some("m4a") => Some("audio/mp4"),

        // Fonts
        Some("woff") => Some("font/woff"),
        Some("woff2") => Some("font/woff2"),
        Some("ttf") => Some("font/ttf"),
        Some("otf") => Some("font/otf"),
        Some("eot") => Some("application/vnd.ms-fontobject"),

        // Documents
        Some("pdf") => Some("application/pdf"),
        Some("zip") => Some("application/zip"),
        Some("gz" | "gzip") => Some("application/gzip"),
        Some("tar") => Some("application/x-tar"),

        _ => None,
    }
}
