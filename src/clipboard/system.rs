//! System clipboard backed by `arboard`
//!
//! `arboard` hands images over as raw RGBA pixels, while peers exchange PNG
//! containers, so images are converted on the way in and out.

use super::{ClipboardContent, ClipboardError, ClipboardProvider};
use arboard::{Clipboard as ArboardClipboard, ImageData};
use async_trait::async_trait;
use image::{ImageBuffer, Rgba};
use std::borrow::Cow;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Operating system clipboard
pub struct SystemClipboard {
    clipboard: Arc<Mutex<ArboardClipboard>>,
}

impl SystemClipboard {
    /// Open the system clipboard
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = ArboardClipboard::new().map_err(platform_error)?;
        Ok(Self {
            clipboard: Arc::new(Mutex::new(clipboard)),
        })
    }

    async fn with_clipboard<T, F>(&self, op: F) -> Result<T, ClipboardError>
    where
        T: Send + 'static,
        F: FnOnce(&mut ArboardClipboard) -> Result<T, ClipboardError> + Send + 'static,
    {
        let clipboard = Arc::clone(&self.clipboard);
        tokio::task::spawn_blocking(move || {
            let mut guard = clipboard
                .lock()
                .map_err(|_| ClipboardError::Platform("clipboard lock poisoned".to_string()))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| ClipboardError::Platform(format!("clipboard task failed: {}", e)))?
    }
}

#[async_trait]
impl ClipboardProvider for SystemClipboard {
    async fn read_current(&self) -> Result<Option<ClipboardContent>, ClipboardError> {
        self.with_clipboard(|clipboard| {
            match clipboard.get_text() {
                Ok(text) if !text.is_empty() => return Ok(Some(ClipboardContent::text(text))),
                Ok(_) | Err(arboard::Error::ContentNotAvailable) => {}
                Err(e) => return Err(platform_error(e)),
            }

            match clipboard.get_image() {
                Ok(image) => {
                    let png = rgba_to_png(&image)?;
                    debug!(
                        "Read {}x{} clipboard image ({} bytes as PNG)",
                        image.width,
                        image.height,
                        png.len()
                    );
                    Ok(Some(ClipboardContent::image(png)))
                }
                Err(arboard::Error::ContentNotAvailable) => Ok(None),
                Err(e) => Err(platform_error(e)),
            }
        })
        .await
    }

    async fn write(&self, content: &ClipboardContent) -> Result<(), ClipboardError> {
        let content = content.clone();
        self.with_clipboard(move |clipboard| match content {
            ClipboardContent::Text { value } => {
                clipboard.set_text(value).map_err(platform_error)
            }
            ClipboardContent::Image { bytes } => {
                let image = png_to_rgba(&bytes)?;
                clipboard.set_image(image).map_err(platform_error)
            }
            ClipboardContent::FileList { .. } => Err(ClipboardError::UnsupportedType(
                "file lists cannot be written to the system clipboard".to_string(),
            )),
        })
        .await
    }

    fn name(&self) -> &str {
        "system"
    }
}

fn platform_error(e: arboard::Error) -> ClipboardError {
    ClipboardError::Platform(e.to_string())
}

fn rgba_to_png(image: &ImageData<'_>) -> Result<Vec<u8>, ClipboardError> {
    let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(
        image.width as u32,
        image.height as u32,
        image.bytes.to_vec(),
    )
    .ok_or_else(|| ClipboardError::Image("pixel buffer does not match image size".to_string()))?;

    let mut png = Vec::new();
    buffer
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| ClipboardError::Image(e.to_string()))?;
    Ok(png)
}

fn png_to_rgba(bytes: &[u8]) -> Result<ImageData<'static>, ClipboardError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ClipboardError::Image(e.to_string()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(ImageData {
        width: width as usize,
        height: height as usize,
        bytes: Cow::Owned(decoded.into_raw()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_conversion_preserves_pixels() {
        let pixels: Vec<u8> = (0..4 * 3 * 2).map(|i| i as u8).collect();
        let image = ImageData {
            width: 3,
            height: 2,
            bytes: Cow::Borrowed(&pixels),
        };

        let png = rgba_to_png(&image).unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let back = png_to_rgba(&png).unwrap();
        assert_eq!((back.width, back.height), (3, 2));
        assert_eq!(back.bytes.as_ref(), pixels.as_slice());
    }

    #[test]
    fn test_mismatched_pixel_buffer_is_rejected() {
        let image = ImageData {
            width: 10,
            height: 10,
            bytes: Cow::Owned(vec![0; 4]),
        };
        assert!(matches!(rgba_to_png(&image), Err(ClipboardError::Image(_))));
    }

    #[test]
    fn test_garbage_is_not_a_png() {
        assert!(png_to_rgba(b"not an image").is_err());
    }
}
