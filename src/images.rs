//! Image attachments.
//!
//! Messages and commands carry images as `data:` URLs
//! (`data:image/png;base64,iVBOR...`).

use crate::errors::{ApiError, ApiResult};
use base64::{engine::general_purpose::STANDARD, Engine};

/// A decoded image attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Parse a base64 `data:` URL.
    pub fn parse(data_url: &str) -> ApiResult<Self> {
        let rest = data_url
            .strip_prefix("data:")
            .ok_or_else(|| ApiError::invalid_input("image is not a data: URL"))?;

        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| ApiError::invalid_input("image data URL has no payload"))?;

        let mime_type = header.strip_suffix(";base64").ok_or_else(|| {
            ApiError::invalid_input("image data URL must be base64 encoded")
                .with_context("header", header)
        })?;

        if !mime_type.starts_with("image/") {
            return Err(ApiError::invalid_input(format!(
                "unsupported image type {:?}",
                mime_type
            )));
        }

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| ApiError::invalid_input(format!("invalid image payload: {}", e)))?;

        Ok(Self::new(mime_type, bytes))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

/// Check every image in an optional list, as passed to `start_new_task` and
/// `send_message`.
pub fn validate_images(images: Option<&[String]>) -> ApiResult<()> {
    for (index, image) in images.unwrap_or_default().iter().enumerate() {
        ImageData::parse(image).map_err(|e| e.with_context("image_index", index))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_roundtrip() {
        let image = ImageData::new("image/png", vec![0x89, 0x50, 0x4e, 0x47]);
        let url = image.to_data_url();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
        assert_eq!(ImageData::parse(&url).unwrap(), image);
    }

    #[test]
    fn test_rejects_malformed_urls() {
        assert!(ImageData::parse("https://example.com/cat.png").is_err());
        assert!(ImageData::parse("data:image/png;base64").is_err());
        assert!(ImageData::parse("data:image/png,plain").is_err());
        assert!(ImageData::parse("data:text/plain;base64,aGk=").is_err());
        assert!(ImageData::parse("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn test_validate_images() {
        assert!(validate_images(None).is_ok());
        let good = vec!["data:image/jpeg;base64,/9g=".to_string()];
        assert!(validate_images(Some(&good)).is_ok());

        let bad = vec![good[0].clone(), "nope".to_string()];
        let err = validate_images(Some(&bad)).unwrap_err();
        assert_eq!(err.context.unwrap()["image_index"], 1);
    }
}
