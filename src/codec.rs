//! Blob document encoding.
//!
//! Image bytes are stored inside the JSON document itself, as the JSON
//! serialization of a byte buffer: `{"type":"Buffer","data":[137,80,...]}`.
//! Decoding also accepts a bare integer array.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::client::{Document, Item};
use crate::errors::StorageError;

#[derive(Serialize)]
struct BufferOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    data: &'a [u8],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BufferIn {
    Buffer { data: Vec<u8> },
    Array(Vec<u8>),
}

/// Build the stored document for `data` at `path`.
pub fn encode(path: &str, data: &[u8], content_type: &str) -> Result<Document, StorageError> {
    let blob = serde_json::to_string(&BufferOut {
        kind: "Buffer",
        data,
    })
    .map_err(|e| StorageError::Codec(e.to_string()))?;

    Ok(Document {
        path: path.to_string(),
        blob,
        content_type: content_type.to_string(),
    })
}

/// Recover the image bytes from a stored item.
pub fn decode(item: &Item) -> Result<Bytes, StorageError> {
    decode_blob(&item.value.blob)
}

/// Recover bytes from a serialized blob string.
pub fn decode_blob(blob: &str) -> Result<Bytes, StorageError> {
    let parsed: BufferIn = serde_json::from_str(blob)
        .map_err(|e| StorageError::Codec(format!("blob is not a byte buffer: {e}")))?;
    let data = match parsed {
        BufferIn::Buffer { data } => data,
        BufferIn::Array(data) => data,
    };
    Ok(Bytes::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_document_shape() {
        let doc = encode("a/1.png", &[137, 80, 78, 71], "image/png").unwrap();
        assert_eq!(doc.path, "a/1.png");
        assert_eq!(doc.content_type, "image/png");
        assert_eq!(doc.blob, r#"{"type":"Buffer","data":[137,80,78,71]}"#);
    }

    #[test]
    fn test_encode_empty_buffer() {
        let doc = encode("e.bin", &[], "application/octet-stream").unwrap();
        assert_eq!(doc.blob, r#"{"type":"Buffer","data":[]}"#);
        assert!(decode_blob(&doc.blob).unwrap().is_empty());
    }

    #[test]
    fn test_decode_all_byte_values() {
        let data: Vec<u8> = (0..=255).collect();
        let doc = encode("all.bin", &data, "application/octet-stream").unwrap();
        assert_eq!(decode_blob(&doc.blob).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_decode_bare_array() {
        assert_eq!(decode_blob("[1,2,255]").unwrap().as_ref(), &[1, 2, 255]);
    }

    #[test]
    fn test_decode_rejects_malformed_blob() {
        for blob in ["a1png", "{\"data\":[256]}", "{\"type\":\"Buffer\"}", ""] {
            let err = decode_blob(blob).unwrap_err();
            assert_eq!(err.name(), "CodecError", "blob {blob:?}");
        }
    }
}
