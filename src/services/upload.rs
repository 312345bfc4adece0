use std::path::Path;

use image::ImageFormat;

/// An image ready to be posted to the job service.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Read an image from disk, sniffing the format from its content first
    /// and falling back to the extension.
    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::InvalidFilename(path.display().to_string()))?
            .to_string();

        let format = image::guess_format(&bytes)
            .or_else(|_| ImageFormat::from_path(path))
            .map_err(|_| UploadError::UnsupportedMedia(filename.clone()))?;

        Ok(Self {
            filename,
            mime: format.to_mime_type().to_string(),
            bytes,
        })
    }

    /// Drag-and-drop source: only payloads declared as `image/*` are taken.
    pub fn from_drop(
        filename: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<Self, UploadError> {
        let mime = mime.into();
        if !is_image_mime(&mime) {
            return Err(UploadError::UnsupportedMedia(mime));
        }
        Ok(Self {
            filename: filename.into(),
            mime,
            bytes,
        })
    }
}

pub fn is_image_mime(mime: &str) -> bool {
    mime.split(';')
        .next()
        .and_then(|essence| essence.trim().split_once('/'))
        .is_some_and(|(kind, subtype)| kind.eq_ignore_ascii_case("image") && !subtype.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read upload: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not an image: {0}")]
    UnsupportedMedia(String),

    #[error("Upload path has no usable file name: {0}")]
    InvalidFilename(String),
}
