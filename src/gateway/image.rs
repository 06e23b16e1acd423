//! Image attachment encoding.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use super::error::ProviderError;
use super::types::ImageEncoding;

/// MIME type inferred from the file extension. Unknown extensions are sent as JPEG.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Encoded image ready to embed in a chat request.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub mime_type: &'static str,
    pub base64: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &'static str) -> Self {
        Self {
            mime_type,
            base64: STANDARD.encode(bytes),
        }
    }

    pub fn read(path: &Path) -> Result<Self, ProviderError> {
        let bytes = std::fs::read(path).map_err(|source| ProviderError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes, mime_type_for(path)))
    }

    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Value for the `image_url.url` field.
    pub fn url(&self, encoding: ImageEncoding) -> String {
        match encoding {
            ImageEncoding::DataUri => self.data_uri(),
            ImageEncoding::RawBase64 => self.base64.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_mime_known_extensions() {
        assert_eq!(mime_type_for(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.JPEG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("dir/b.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("c.gif")), "image/gif");
        assert_eq!(mime_type_for(Path::new("d.Bmp")), "image/bmp");
        assert_eq!(mime_type_for(Path::new("e.webp")), "image/webp");
    }

    #[test]
    fn test_mime_unknown_defaults_to_jpeg() {
        assert_eq!(mime_type_for(Path::new("f.tiff")), "image/jpeg");
        assert_eq!(mime_type_for(&PathBuf::from("noext")), "image/jpeg");
    }

    #[test]
    fn test_url_encodings() {
        let img = EncodedImage::from_bytes(b"abc", "image/png");
        assert_eq!(img.base64, "YWJj");
        assert_eq!(img.url(ImageEncoding::DataUri), "data:image/png;base64,YWJj");
        assert_eq!(img.url(ImageEncoding::RawBase64), "YWJj");
    }
}
