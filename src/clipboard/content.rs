//! Clipboard content model
//!
//! A [`ClipboardContent`] is the unit that travels between peers. It is
//! immutable once built and cheap to clone (image bytes are reference
//! counted), so it can be handed to several observers at once.

use bytes::Bytes;
use std::fmt;

/// Separator used when fingerprinting a file list
const PATH_SEPARATOR: &str = "|";

/// Wire discriminator for a content variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContentKind {
    /// Plain text
    Text = 0,
    /// Encoded raster image (PNG)
    Image = 1,
    /// List of file system paths
    FileList = 2,
}

impl ContentKind {
    /// Short tag used in identity hashes and log lines
    pub fn tag(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::FileList => "files",
        }
    }
}

impl TryFrom<u8> for ContentKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ContentKind::Text),
            1 => Ok(ContentKind::Image),
            2 => Ok(ContentKind::FileList),
            other => Err(other),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Clipboard payload exchanged between peers
#[derive(Clone, PartialEq, Eq)]
pub enum ClipboardContent {
    /// Plain text
    Text { value: String },
    /// Encoded raster image, usually a PNG container
    Image { bytes: Bytes },
    /// Ordered list of file paths
    FileList { paths: Vec<String> },
}

impl ClipboardContent {
    /// Create text content
    pub fn text(value: impl Into<String>) -> Self {
        ClipboardContent::Text {
            value: value.into(),
        }
    }

    /// Create image content from encoded image bytes
    pub fn image(bytes: impl Into<Bytes>) -> Self {
        ClipboardContent::Image {
            bytes: bytes.into(),
        }
    }

    /// Create file list content
    pub fn file_list<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClipboardContent::FileList {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// The wire discriminator of this content
    pub fn kind(&self) -> ContentKind {
        match self {
            ClipboardContent::Text { .. } => ContentKind::Text,
            ClipboardContent::Image { .. } => ContentKind::Image,
            ClipboardContent::FileList { .. } => ContentKind::FileList,
        }
    }

    /// Whether this is image content
    pub fn is_image(&self) -> bool {
        self.kind() == ContentKind::Image
    }

    /// A content instance is valid iff its payload is non-empty.
    ///
    /// Invalid content is never transmitted nor applied to a clipboard.
    pub fn validate(&self) -> bool {
        match self {
            ClipboardContent::Text { value } => !value.is_empty(),
            ClipboardContent::Image { bytes } => !bytes.is_empty(),
            ClipboardContent::FileList { paths } => !paths.is_empty(),
        }
    }

    /// Fingerprint used for change detection.
    ///
    /// Every variant is hashed with MD5 and prefixed with its kind tag, so
    /// equal payloads of different variants never collide. This is not an
    /// integrity check.
    pub fn identity_hash(&self) -> String {
        let digest = match self {
            ClipboardContent::Text { value } => md5::compute(value.as_bytes()),
            ClipboardContent::Image { bytes } => md5::compute(bytes),
            ClipboardContent::FileList { paths } => md5::compute(paths.join(PATH_SEPARATOR)),
        };
        format!("{}:{:x}", self.kind().tag(), digest)
    }

    /// Payload size in bytes (text bytes, image bytes, or joined path bytes)
    pub fn size(&self) -> usize {
        match self {
            ClipboardContent::Text { value } => value.len(),
            ClipboardContent::Image { bytes } => bytes.len(),
            ClipboardContent::FileList { paths } => paths.iter().map(String::len).sum(),
        }
    }

    /// Short human-readable description for logs and status lines
    pub fn describe(&self) -> String {
        match self {
            ClipboardContent::Text { value } => {
                let preview: String = value.chars().take(50).collect();
                if preview.len() < value.len() {
                    format!("text: {}...", preview)
                } else {
                    format!("text: {}", preview)
                }
            }
            ClipboardContent::Image { bytes } => format!("image ({} bytes)", bytes.len()),
            ClipboardContent::FileList { paths } => format!("files: {}", paths.join(", ")),
        }
    }
}

// Image payloads can be megabytes; keep Debug output to sizes.
impl fmt::Debug for ClipboardContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClipboardContent::Text { value } => f
                .debug_struct("Text")
                .field("len", &value.len())
                .finish(),
            ClipboardContent::Image { bytes } => f
                .debug_struct("Image")
                .field("len", &bytes.len())
                .finish(),
            ClipboardContent::FileList { paths } => f
                .debug_struct("FileList")
                .field("paths", paths)
                .finish(),
        }
    }
}
