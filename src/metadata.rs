//! Frame metadata.
//!
//! A [`Metadata`] value is built once and attached to frames by shared
//! reference (`Arc<Metadata>`). Copying a frame attaches the same value to
//! the copy; nothing in this crate mutates it after attachment.

use std::time::{Duration, SystemTime};

/// Flags describing stream-level properties of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// Last frame of the stream.
    pub eos: bool,
    /// Decoding can start at this frame.
    pub sync_point: bool,
    /// Payload is known to be damaged.
    pub corrupted: bool,
    /// Frames were lost before this one.
    pub discontinuity: bool,
}

/// Value of an extra metadata field.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// String value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// Descriptive data attached to a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Wall-clock time at which the frame was captured.
    pub capture_time: Option<SystemTime>,

    /// Duration of the frame's content.
    pub duration: Option<Duration>,

    /// Monotonic sequence number within a stream.
    pub sequence: u64,

    /// Name of the producing source (camera, file, ...).
    pub source: Option<String>,

    /// Frame flags.
    pub flags: FrameFlags,

    /// Extra key-value fields, in insertion order.
    pub extra: Vec<(String, MetadataValue)>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metadata with a sequence number.
    pub fn with_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Set the capture time.
    pub fn with_capture_time(mut self, time: SystemTime) -> Self {
        self.capture_time = Some(time);
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Set the source name.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Mark as sync point.
    pub fn with_sync_point(mut self) -> Self {
        self.flags.sync_point = true;
        self
    }

    /// Mark as end-of-stream.
    pub fn with_eos(mut self) -> Self {
        self.flags.eos = true;
        self
    }

    /// Add an extra field. Lookups return the first field with a given key.
    pub fn with_extra(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.extra.push((key.into(), value));
        self
    }

    /// Get an extra field by key.
    pub fn get_extra(&self, key: &str) -> Option<&MetadataValue> {
        self.extra.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let meta = Metadata::with_sequence(7)
            .with_duration(Duration::from_millis(20))
            .with_source("mic0")
            .with_sync_point()
            .with_extra("gain", MetadataValue::Float(0.5));

        assert_eq!(meta.sequence, 7);
        assert_eq!(meta.duration, Some(Duration::from_millis(20)));
        assert_eq!(meta.source.as_deref(), Some("mic0"));
        assert!(meta.flags.sync_point);
        assert!(!meta.flags.eos);
        assert_eq!(meta.get_extra("gain"), Some(&MetadataValue::Float(0.5)));
    }

    #[test]
    fn test_first_extra_wins() {
        let meta = Metadata::new()
            .with_extra("k", MetadataValue::Int(1))
            .with_extra("k", MetadataValue::Int(2));

        assert_eq!(meta.extra.len(), 2);
        assert_eq!(meta.get_extra("k"), Some(&MetadataValue::Int(1)));
        assert_eq!(meta.get_extra("missing"), None);
    }
}
