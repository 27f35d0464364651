use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// One compressed video fragment as delivered by a fragment source.
///
/// Fragments are transient: the router consumes them synchronously and the
/// decoder copies the payload into its own packet handle, so nothing here is
/// retained past the `on_fragment` call.
#[derive(Clone, Debug)]
pub struct CompressedFragment {
    payload: Bytes,
    timestamp: i64,
    stream_id: u32,
    // reserved, carried but never interpreted
    type_tag: u8,
}

impl CompressedFragment {
    pub fn new(payload: Bytes, timestamp: i64, stream_id: u32, type_tag: u8) -> Self {
        Self {
            payload,
            timestamp,
            stream_id,
            type_tag,
        }
    }

    /// Copies `payload` into a new fragment.
    pub fn from_slice(payload: &[u8], timestamp: i64, stream_id: u32, type_tag: u8) -> Self {
        Self::new(Bytes::copy_from_slice(payload), timestamp, stream_id, type_tag)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }
}

impl Display for CompressedFragment {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "CompressedFragment stream_id: {}, size: {}, timestamp: {}, type_tag: {}",
            self.stream_id,
            self.payload.len(),
            self.timestamp,
            self.type_tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_accessors() {
        let fragment = CompressedFragment::from_slice(&[0, 0, 0, 1, 0x65], 42, 1, 7);
        assert_eq!(fragment.size(), 5);
        assert_eq!(fragment.timestamp(), 42);
        assert_eq!(fragment.stream_id(), 1);
        assert_eq!(fragment.type_tag(), 7);
        assert!(!fragment.is_empty());
        assert_eq!(fragment.payload(), &[0, 0, 0, 1, 0x65]);
    }

    #[test]
    fn test_fragment_display() {
        let fragment = CompressedFragment::new(Bytes::from_static(&[1, 2, 3]), 10, 0, 0);
        assert_eq!(
            fragment.to_string(),
            "CompressedFragment stream_id: 0, size: 3, timestamp: 10, type_tag: 0"
        );
    }
}
