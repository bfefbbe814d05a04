//! Wire protocol
//!
//! This module provides:
//! - Separator-delimited framing over a byte stream
//! - Extraction of in-band metadata blocks (model subscriptions)
//! - Splitting change payloads into per-model groups
//! - The marker search and delimiter matching both parsers are built on

pub mod changes;
pub mod frame;
pub mod metadata;
pub mod scan;

pub use changes::{is_empty_payload, model_key, split_changes, ChangeElement, ModelGroups};
pub use frame::{encode_frame, write_frame, FrameReader, DEFAULT_SEPARATOR};
pub use metadata::{parse_shared_models, strip_metadata, MetadataBlock, SharedModels, Stripped};
