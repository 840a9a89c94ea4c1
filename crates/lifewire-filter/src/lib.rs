//! Read-path filtering for the Lifewire orchestrator.
//!
//! A [`ContentFilter`] is a pure transformation of object bytes. The
//! [`FilteringAccessLayer`] composes an [`ObjectStore`](lifewire_store::ObjectStore)
//! with a filter so that every intercepted `GetObject`, `HeadObject` and
//! listing sees transformed content, while non-intercepted operations pass
//! straight through to the store.
//!
//! The access layer holds no per-object state and never caches filtered
//! output: the stored object may be overwritten between two reads.

mod access;
mod content;
mod error;
mod range;

pub use access::{FilteringAccessLayer, ObjectHead, ReadOptions};
pub use content::{
    filter_from_ref, ContentFilter, FieldMatchFilter, PassthroughFilter, ReadRequest,
    DEFAULT_MATCH_DELIMITER, DEFAULT_MATCH_FIELD, DEFAULT_MATCH_VALUE, FIELD_MATCH_REF,
    IDENTITY_REF,
};
pub use error::{AccessError, FilterError, RangeError};
pub use range::ByteRange;
