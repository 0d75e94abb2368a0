//! Payload and Result value types (§3, §4.B).

use bytes::Bytes;
use serde::Serialize;

use crate::error::{RemoteError, Result};

/// Opaque application data plus optional metadata.
///
/// Metadata *presence* is independent of metadata *emptiness*: a payload can
/// carry `Some(Bytes::new())` (present but empty) distinct from `None`
/// (absent). Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    metadata: Option<Bytes>,
    data: Bytes,
}

impl Payload {
    /// Construct a payload from UTF-8 text, with no metadata.
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            metadata: None,
            data: Bytes::from(s.into().into_bytes()),
        }
    }

    /// Construct a payload from raw bytes, with no metadata.
    pub fn bytes(b: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: b.into(),
        }
    }

    /// Construct a payload whose data is the JSON encoding of `value`.
    ///
    /// Fails with [`crate::error::RequesterError::Encode`] if `value` is not
    /// serializable.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value)?;
        Ok(Self {
            metadata: None,
            data: Bytes::from(data),
        })
    }

    /// Return a copy of this payload with the given metadata attached.
    /// Empty metadata (`Bytes::new()`) is legal and distinct from absent
    /// metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_parts(self) -> (Option<Bytes>, Bytes) {
        (self.metadata, self.data)
    }
}

/// The result of an interaction: either application data or a terminal
/// remote error. Used for both the upstream (caller → network, CHANNEL
/// outbound) and downstream (network → caller) directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamResult {
    Payload(Payload),
    Error(RemoteError),
}

impl StreamResult {
    pub fn payload(p: Payload) -> Self {
        StreamResult::Payload(p)
    }

    pub fn error(e: RemoteError) -> Self {
        StreamResult::Error(e)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamResult::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_vs_empty_metadata() {
        let absent = Payload::text("hello");
        assert!(!absent.has_metadata());

        let empty = Payload::text("hello").with_metadata(Bytes::new());
        assert!(empty.has_metadata());
        assert_eq!(empty.metadata().unwrap().len(), 0);
    }

    #[test]
    fn json_payload_round_trips_data() {
        #[derive(Serialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let p = Payload::json(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(p.data().as_ref(), br#"{"x":1,"y":2}"#);
    }
}
