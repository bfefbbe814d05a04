//! Change payload splitting
//!
//! A change payload is a sequence of `"id": {...}` entries. Each entry is
//! assigned to the model it belongs to, derived from the id prefix:
//!
//! ```text
//! DModule...                      -> dropped
//! DModel:r:abc                    -> DModel:r:abc
//! DNode:...:r:abc/some/path       -> DModel:r:abc
//! anything else                   -> dropped
//! ```
//!
//! Entry bodies are kept verbatim as slices of the incoming frame, so
//! building a filtered payload per destination never re-encodes anything.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::scan::{find_byte, matching_close};
use crate::error::ProtocolError;

const MODULE_PREFIX: &str = "DModule";
const MODEL_PREFIX: &str = "DModel";
const NODE_PREFIX: &str = "DNode";
const MODEL_ID_MARKER: &str = ":r:";

/// Payload that carries no changes; never sent to a destination
pub const EMPTY_PAYLOAD: &[u8] = b"{}";

/// Whether a payload is the literal empty object `{}`
pub fn is_empty_payload(payload: &[u8]) -> bool {
    payload == EMPTY_PAYLOAD
}

/// One `"id": {...}` entry of a change payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeElement {
    /// The id, without quotes
    pub id: String,
    /// The verbatim entry, including the quoted id and the braces
    pub body: Bytes,
}

impl ChangeElement {
    /// Model this element belongs to, if any
    pub fn model_key(&self) -> Option<String> {
        model_key(&self.id)
    }
}

/// Derive the owning model of a change id
pub fn model_key(id: &str) -> Option<String> {
    if id.starts_with(MODULE_PREFIX) {
        None
    } else if id.starts_with(MODEL_PREFIX) {
        Some(id.to_string())
    } else if id.starts_with(NODE_PREFIX) {
        let marker = id.find(MODEL_ID_MARKER)?;
        let rest = &id[marker + MODEL_ID_MARKER.len()..];
        let segment = &rest[..rest.find('/')?];
        Some(format!("{}{}{}", MODEL_PREFIX, MODEL_ID_MARKER, segment))
    } else {
        None
    }
}

/// Split a payload into its change elements, in order of appearance
pub fn split_changes(payload: &Bytes) -> Result<Vec<ChangeElement>, ProtocolError> {
    let mut elements = Vec::new();
    let mut index = 0;

    while let Some(id_start) = find_byte(payload, b'"', index) {
        let Some(id_end) = find_byte(payload, b'"', id_start + 1) else {
            break;
        };
        let Some(open) = find_byte(payload, b'{', id_end + 1) else {
            break;
        };
        let close = matching_close(payload, open, b'{', b'}')?;

        elements.push(ChangeElement {
            id: String::from_utf8_lossy(&payload[id_start + 1..id_end]).into_owned(),
            body: payload.slice(id_start..=close),
        });
        index = close + 1;
    }

    Ok(elements)
}

/// Change bodies grouped by owning model
#[derive(Debug, Clone, Default)]
pub struct ModelGroups {
    groups: HashMap<String, Vec<Bytes>>,
}

impl ModelGroups {
    /// Split `payload` and group its elements by model
    pub fn from_payload(payload: &Bytes) -> Result<Self, ProtocolError> {
        Ok(Self::from_elements(split_changes(payload)?))
    }

    /// Group already split elements; elements without a model are dropped
    pub fn from_elements(elements: impl IntoIterator<Item = ChangeElement>) -> Self {
        let mut groups: HashMap<String, Vec<Bytes>> = HashMap::new();
        for element in elements {
            if let Some(key) = element.model_key() {
                groups.entry(key).or_default().push(element.body);
            }
        }
        Self { groups }
    }

    /// Bodies belonging to `model`, in first-seen order
    pub fn get(&self, model: &str) -> &[Bytes] {
        self.groups.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of models with at least one change
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether no change in the payload belongs to a model
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Assemble the payload for a destination subscribed to `models`
    ///
    /// Bodies are joined with `", "` in the iteration order of `models` and
    /// wrapped in braces. A destination with nothing to receive gets `{}`.
    pub fn payload_for<'a, I>(&self, models: I) -> Bytes
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut buf = BytesMut::new();
        buf.put_u8(b'{');

        let mut first = true;
        for body in models.into_iter().flat_map(|m| self.get(m)) {
            if !first {
                buf.put_slice(b", ");
            }
            buf.put_slice(body);
            first = false;
        }

        buf.put_u8(b'}');
        buf.freeze()
    }
}
