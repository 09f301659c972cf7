//! Row and column key encoding.

use crate::id::Id;
use crate::scope::Scope;
use bytes::Bytes;

/// Builds composite keys from length-prefixed segments.
///
/// Prefixing each segment keeps `("ab", "c")` and `("a", "bc")` distinct.
#[derive(Debug, Default)]
pub(crate) struct KeyBuilder {
    buf: Vec<u8>,
}

impl KeyBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bytes(mut self, segment: &[u8]) -> Self {
        let len = u32::try_from(segment.len()).unwrap_or(u32::MAX);
        self.buf.extend_from_slice(&len.to_be_bytes());
        self.buf.extend_from_slice(segment);
        self
    }

    /// Appends a segment without a length prefix, for fixed-width fields.
    pub(crate) fn fixed(mut self, segment: &[u8]) -> Self {
        self.buf.extend_from_slice(segment);
        self
    }

    pub(crate) fn str(self, segment: &str) -> Self {
        self.bytes(segment.as_bytes())
    }

    pub(crate) fn id(self, id: &Id) -> Self {
        self.str(id.entity_type()).bytes(id.uuid().as_bytes())
    }

    pub(crate) fn scope(self, scope: &Scope) -> Self {
        self.id(scope.organization())
            .id(scope.owner())
            .str(scope.name())
    }

    pub(crate) fn build(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Row key of everything stored per entity within a scope.
pub(crate) fn entity_row(scope: &Scope, id: &Id) -> Bytes {
    KeyBuilder::new().scope(scope).id(id).build()
}

/// Lock name for a storage key: `prefix` followed by the key in hex.
pub(crate) fn lock_key(prefix: &str, key: &[u8]) -> String {
    format!("{prefix}{}", hex::encode(key))
}
