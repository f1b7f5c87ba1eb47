//! Image encoding: client base64 payload → data URL for the VLM API.
//!
//! Clients upload JPEG in practice, but stitched pages are sometimes sent as
//! PNG. The MIME type is sniffed from the decoded header so the data URL
//! matches what the provider will actually decode.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use tracing::debug;

/// MIME type assumed when the header cannot be sniffed.
pub const DEFAULT_MIME: &str = "image/jpeg";

/// A page image ready to attach to a model request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Base64 payload without a `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

impl PageImage {
    /// Clean a client payload. Returns `None` for blank payloads.
    ///
    /// A `data:<mime>;base64,` prefix is accepted and stripped.
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let trimmed = encoded.trim();
        let data = match trimmed.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest.trim(),
            _ => trimmed,
        };
        if data.is_empty() {
            return None;
        }
        let mime_type = sniff_mime(data).unwrap_or(DEFAULT_MIME).to_string();
        debug!("Encoded image → {} bytes base64 ({})", data.len(), mime_type);
        Some(PageImage {
            data: data.to_string(),
            mime_type,
        })
    }

    /// `data:` URL as accepted by OpenAI-compatible chat APIs.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Decode only the first few bytes; enough for every magic number we need.
fn sniff_mime(data: &str) -> Option<&'static str> {
    let head: String = data.chars().filter(|c| !c.is_whitespace()).take(24).collect();
    let bytes = STANDARD.decode(head.as_bytes()).ok()?;
    match image::guess_format(&bytes).ok()? {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        _ => None,
    }
}
