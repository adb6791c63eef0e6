/// Data-URI media payloads
///
/// Task images arrive as `data:<mime>;base64,<payload>` strings. They are
/// decoded here, before anything is uploaded, and named
/// `uploads/images/<uuid><ext>` in object storage.
///
/// # Example
///
/// ```
/// use civictask_shared::services::media::{file_extension, parse_data_uri};
///
/// let media = parse_data_uri("data:image/png;base64,aGVsbG8=").unwrap();
/// assert_eq!(media.mime_type, "image/png");
/// assert_eq!(&media.data[..], b"hello");
/// assert_eq!(file_extension(&media.mime_type), ".png");
/// ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use uuid::Uuid;

/// Key prefix for uploaded task images
pub const UPLOAD_PREFIX: &str = "uploads/images";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("invalid data URI: missing 'data:' prefix")]
    MissingPrefix,

    #[error("invalid data URI: missing comma separator")]
    MissingSeparator,

    #[error("invalid data URI: header is not base64-encoded")]
    NotBase64,

    #[error("invalid data URI: could not extract MIME type")]
    EmptyMimeType,

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(String),
}

/// A decoded media item ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMedia {
    pub mime_type: String,
    pub data: Bytes,
}

impl DecodedMedia {
    /// Fresh object key under [`UPLOAD_PREFIX`]
    pub fn object_key(&self) -> String {
        format!(
            "{}/{}{}",
            UPLOAD_PREFIX,
            Uuid::new_v4(),
            file_extension(&self.mime_type)
        )
    }
}

/// Parses and decodes a `data:<mime>;base64,<payload>` string
pub fn parse_data_uri(uri: &str) -> Result<DecodedMedia, MediaError> {
    let rest = uri.trim().strip_prefix("data:").ok_or(MediaError::MissingPrefix)?;
    let (header, payload) = rest.split_once(',').ok_or(MediaError::MissingSeparator)?;

    let mut params = header.split(';');
    let mime_type = params.next().unwrap_or_default().trim();
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(MediaError::NotBase64);
    }
    if mime_type.is_empty() {
        return Err(MediaError::EmptyMimeType);
    }

    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let data = STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| MediaError::InvalidPayload(e.to_string()))?;

    Ok(DecodedMedia {
        mime_type: mime_type.to_ascii_lowercase(),
        data: Bytes::from(data),
    })
}

/// File extension for a MIME type, `.bin` when unknown
pub fn file_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        _ => ".bin",
    }
}
