//! Wire payload definitions
//!
//! A frame payload is one discriminator byte followed by a JSON body:
//!
//! ```text
//! Payload := Kind(1 byte: 0|1|2) || Body
//! Body    := { "type": 0|1|2, "text"?: string, "imageData"?: base64, "filePaths"?: [string] }
//! ```
//!
//! The leading byte lets a receiver tell an image frame apart before the
//! (possibly multi-megabyte) body has arrived.

use crate::clipboard::{ClipboardContent, ContentKind};
use crate::transport::{Result, TransportError};
use serde::{Deserialize, Serialize};

/// Size of the discriminator that precedes the JSON body
pub const KIND_PREFIX_LEN: usize = 1;

/// JSON body of a frame
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    /// Content discriminator, see [`ContentKind`]
    #[serde(rename = "type")]
    pub kind: u8,

    /// Text payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Image payload, base64 in JSON
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub image_data: Option<Vec<u8>>,

    /// File list payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
}

impl From<&ClipboardContent> for WirePayload {
    fn from(content: &ClipboardContent) -> Self {
        let mut payload = WirePayload {
            kind: content.kind() as u8,
            ..WirePayload::default()
        };
        match content {
            ClipboardContent::Text { value } => payload.text = Some(value.clone()),
            ClipboardContent::Image { bytes } => payload.image_data = Some(bytes.to_vec()),
            ClipboardContent::FileList { paths } => payload.file_paths = Some(paths.clone()),
        }
        payload
    }
}

impl TryFrom<WirePayload> for ClipboardContent {
    type Error = TransportError;

    /// Absent fields decode to empty payloads, which then fail validation.
    fn try_from(payload: WirePayload) -> Result<Self> {
        let kind = ContentKind::try_from(payload.kind)
            .map_err(|k| TransportError::protocol(format!("unknown content type {}", k)))?;
        Ok(match kind {
            ContentKind::Text => ClipboardContent::text(payload.text.unwrap_or_default()),
            ContentKind::Image => ClipboardContent::image(payload.image_data.unwrap_or_default()),
            ContentKind::FileList => {
                ClipboardContent::file_list(payload.file_paths.unwrap_or_default())
            }
        })
    }
}

/// Serialize content into a frame payload (discriminator byte + JSON body)
pub fn encode_payload(content: &ClipboardContent) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&WirePayload::from(content))?;
    let mut payload = Vec::with_capacity(KIND_PREFIX_LEN + body.len());
    payload.push(content.kind() as u8);
    payload.extend_from_slice(&body);
    Ok(payload)
}

/// Parse and validate a frame payload.
///
/// Fails with [`TransportError::Protocol`] when the payload is empty, the
/// JSON is malformed, the discriminator disagrees with the body, or the
/// decoded content is empty.
pub fn decode_payload(payload: &[u8]) -> Result<ClipboardContent> {
    let (&kind, body) = payload
        .split_first()
        .ok_or_else(|| TransportError::protocol("empty frame"))?;

    let wire: WirePayload = serde_json::from_slice(body)?;
    if wire.kind != kind {
        return Err(TransportError::protocol(format!(
            "frame discriminator {} does not match body type {}",
            kind, wire.kind
        )));
    }

    let content = ClipboardContent::try_from(wire)?;
    if !content.validate() {
        return Err(TransportError::protocol(format!(
            "received empty {} content",
            content.kind()
        )));
    }
    Ok(content)
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&BASE64.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| BASE64.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
