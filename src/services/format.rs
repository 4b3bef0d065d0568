//! Content-type detection for selected files
//!
//! The processor only accepts payloads whose declared type starts with
//! `image/`. When input comes from the file system there is no browser to
//! declare it, so the type is derived from the file extension.

use image::ImageFormat;
use std::path::Path;

/// Fallback content type for unknown extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Service for deriving declared MIME types
pub struct MimeDetector;

impl MimeDetector {
    /// Declared MIME type for a path, based on its extension
    ///
    /// # Examples
    /// ```rust
    /// use imgralph::services::MimeDetector;
    ///
    /// assert_eq!(MimeDetector::from_path("cat.PNG"), "image/png");
    /// assert_eq!(MimeDetector::from_path("notes.txt"), "text/plain");
    /// assert_eq!(MimeDetector::from_path("blob"), "application/octet-stream");
    /// ```
    pub fn from_path<P: AsRef<Path>>(path: P) -> &'static str {
        let Some(extension) = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return OCTET_STREAM;
        };

        if let Some(format) = ImageFormat::from_extension(&extension) {
            return format.to_mime_type();
        }

        match extension.as_str() {
            "svg" => "image/svg+xml",
            "heic" | "heif" => "image/heic",
            "txt" => "text/plain",
            "json" => "application/json",
            "pdf" => "application/pdf",
            _ => OCTET_STREAM,
        }
    }

    /// Sniff the MIME type from the payload's magic bytes
    pub fn sniff(bytes: &[u8]) -> Option<&'static str> {
        image::guess_format(bytes).ok().map(|f| f.to_mime_type())
    }
}
