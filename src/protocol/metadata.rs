//! In-band metadata extraction
//!
//! A client declares the models it wants to receive by embedding a metadata
//! object in an ordinary change frame:
//!
//! ```text
//! {"DModel:r:a": {...}, "DServerMetaData:c1": {"SHARED_MODELS": ["\"DModel:r:a\""]}}
//!                       ^--------------------- metadata block -------------------^
//! ```
//!
//! The block is cut out of the frame before anything else sees it. Its
//! `SHARED_MODELS` array replaces the sender's subscription set; a block
//! without that key clears the set.

use std::collections::BTreeSet;

use bytes::{BufMut, Bytes, BytesMut};

use super::scan::{find, find_byte, matching_close};
use crate::error::ProtocolError;

/// Marker introducing a metadata block
pub const METADATA_MARKER: &[u8] = b"\"DServerMetaData:";

const SHARED_MODELS_KEY: &[u8] = b"SHARED_MODELS\":";
const MODEL_MARKER: &[u8] = b"\"DModel:";

/// Set of model identifiers a connection subscribes to
pub type SharedModels = BTreeSet<String>;

/// A metadata block cut out of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBlock {
    /// Verbatim block text, from the marker's opening quote to the closing brace
    pub text: Bytes,
    /// Models declared in `SHARED_MODELS`, empty when the key is absent
    pub shared_models: SharedModels,
}

/// Result of stripping metadata from a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    /// Frame with the metadata block removed
    pub payload: Bytes,
    /// The removed block, if the frame carried one
    pub metadata: Option<MetadataBlock>,
}

/// Cut the metadata block out of `frame`
///
/// Frames without the marker come back untouched with no metadata.
pub fn strip_metadata(frame: &Bytes) -> Result<Stripped, ProtocolError> {
    let Some(start) = find(frame, METADATA_MARKER, 0) else {
        return Ok(Stripped {
            payload: frame.clone(),
            metadata: None,
        });
    };

    let key_end = find_byte(frame, b'"', start + METADATA_MARKER.len())
        .ok_or(ProtocolError::MalformedMetadata { at: start })?;
    let open = find_byte(frame, b'{', key_end + 1)
        .ok_or(ProtocolError::MalformedMetadata { at: start })?;
    let close = matching_close(frame, open, b'{', b'}')?;

    let text = frame.slice(start..=close);
    let shared_models = parse_shared_models(&text)?;

    let mut payload = BytesMut::with_capacity(frame.len() - text.len());
    payload.put_slice(&frame[..start]);
    payload.put_slice(&frame[close + 1..]);

    Ok(Stripped {
        payload: payload.freeze(),
        metadata: Some(MetadataBlock {
            text,
            shared_models,
        }),
    })
}

/// Collect the model identifiers listed under `SHARED_MODELS`
///
/// Entries are usually escaped strings (`"\"DModel:r:a\""`); the identifier
/// runs from `DModel:` to the next quote, with a preceding backslash
/// dropped. Identifiers containing quotes are not supported.
pub fn parse_shared_models(block: &[u8]) -> Result<SharedModels, ProtocolError> {
    let mut models = SharedModels::new();

    let Some(key) = find(block, SHARED_MODELS_KEY, 0) else {
        return Ok(models);
    };
    let Some(open) = find_byte(block, b'[', key + SHARED_MODELS_KEY.len()) else {
        return Ok(models);
    };
    let close = matching_close(block, open, b'[', b']')?;
    let elements = &block[open + 1..close];

    let mut index = 0;
    while let Some(marker) = find(elements, MODEL_MARKER, index) {
        let quote = find_byte(elements, b'"', marker + 1).ok_or(
            ProtocolError::UnterminatedModelId {
                at: open + 1 + marker,
            },
        )?;
        let end = if elements[quote - 1] == b'\\' {
            quote - 1
        } else {
            quote
        };

        let id = String::from_utf8_lossy(&elements[marker + 1..end]).into_owned();
        models.insert(id);
        index = quote + 1;
    }

    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(ids: &[&str]) -> SharedModels {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_marker_is_noop() {
        let frame = Bytes::from_static(b"{\"DModel:r:a\": {\"x\": 1}}");
        let stripped = strip_metadata(&frame).unwrap();

        assert_eq!(stripped.payload, frame);
        assert!(stripped.metadata.is_none());
    }

    #[test]
    fn test_strip_pure_metadata_frame() {
        let frame = Bytes::from_static(
            b"{\"DServerMetaData:c1\": {\"SHARED_MODELS\": [\"\\\"DModel:r:X\\\"\"]}}",
        );
        let stripped = strip_metadata(&frame).unwrap();

        assert_eq!(stripped.payload, "{}");
        let meta = stripped.metadata.unwrap();
        assert_eq!(meta.shared_models, models(&["DModel:r:X"]));
        assert!(meta.text.starts_with(b"\"DServerMetaData:c1\""));
        assert!(meta.text.ends_with(b"]}"));
    }

    #[test]
    fn test_nested_metadata_span() {
        let frame = Bytes::from_static(
            br#"{"DModel:r:a": {"v": 1}, "DServerMetaData:c1": {"SHARED_MODELS":["\"DModel:r:a\""],"EXTRA":{"x":{"y":1}}}, "DModel:r:b": {"v": 2}}"#,
        );
        let stripped = strip_metadata(&frame).unwrap();
        let meta = stripped.metadata.unwrap();

        assert_eq!(
            meta.text,
            &br#""DServerMetaData:c1": {"SHARED_MODELS":["\"DModel:r:a\""],"EXTRA":{"x":{"y":1}}}"#[..]
        );
        assert_eq!(
            stripped.payload,
            &br#"{"DModel:r:a": {"v": 1}, , "DModel:r:b": {"v": 2}}"#[..]
        );
        assert_eq!(meta.shared_models, models(&["DModel:r:a"]));
    }

    #[test]
    fn test_missing_shared_models_clears() {
        let frame = Bytes::from_static(b"{\"DServerMetaData:c1\": {\"OTHER\": 1}}");
        let meta = strip_metadata(&frame).unwrap().metadata.unwrap();

        assert!(meta.shared_models.is_empty());
    }

    #[test]
    fn test_multiple_models() {
        let block = br#""DServerMetaData:c": {"SHARED_MODELS": ["\"DModel:r:a\"", "\"DModel:r:b\"", "\"DModel:r:a\""]}"#;
        assert_eq!(
            parse_shared_models(block).unwrap(),
            models(&["DModel:r:a", "DModel:r:b"])
        );
    }

    #[test]
    fn test_unescaped_model_ids() {
        let block = br#"{"SHARED_MODELS": ["DModel:r:a", "DModel:r:b"]}"#;
        assert_eq!(
            parse_shared_models(block).unwrap(),
            models(&["DModel:r:a", "DModel:r:b"])
        );
    }

    #[test]
    fn test_empty_array() {
        let block = br#"{"SHARED_MODELS": []}"#;
        assert!(parse_shared_models(block).unwrap().is_empty());
    }

    #[test]
    fn test_unbalanced_metadata_is_error() {
        let frame = Bytes::from_static(b"{\"DServerMetaData:c1\": {\"SHARED_MODELS\": [");
        assert!(matches!(
            strip_metadata(&frame),
            Err(ProtocolError::UnbalancedDelimiter { open: '{', .. })
        ));
    }

    #[test]
    fn test_marker_without_object_is_error() {
        let frame = Bytes::from_static(b"\"DServerMetaData:c1\": 5");
        assert_eq!(
            strip_metadata(&frame),
            Err(ProtocolError::MalformedMetadata { at: 0 })
        );
    }
}
