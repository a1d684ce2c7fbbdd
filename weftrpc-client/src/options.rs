//! Per-call and per-stream options.
//!
//! [`CallOptions`] configures one unary call: an overall timeout, header
//! metadata, and message compression. [`StreamOptions`] is the subset that
//! applies to an explicitly opened stream.

use std::time::Duration;

use weftrpc_core::envelope::DEFAULT_MAX_MESSAGE_SIZE;
use weftrpc_core::{Encoding, Metadata};

/// Options for one unary call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use weftrpc_client::CallOptions;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .metadata("x-request-id", "abc-123");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) stream: StreamOptions,
}

impl CallOptions {
    /// Create default call options: no timeout, no metadata, no compression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the overall timeout for the call.
    ///
    /// This is a single deadline shared across the whole exchange (headers,
    /// message, and trailers), not a per-step allowance; the call fails with
    /// a timeout classification as soon as the budget is exhausted.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Get the configured timeout, if any.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add an ASCII metadata entry, sent with the request headers.
    ///
    /// Keys in the reserved `grpc-` namespace are dropped at send time.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is malformed; use
    /// [`try_metadata`](Self::try_metadata) for fallible insertion.
    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.stream = self.stream.metadata(key, value);
        self
    }

    /// Try to add an ASCII metadata entry; `None` if key or value is
    /// malformed.
    pub fn try_metadata(mut self, key: &str, value: &str) -> Option<Self> {
        self.stream = self.stream.try_metadata(key, value)?;
        Some(self)
    }

    /// Add a binary metadata entry under a `-bin` key.
    ///
    /// # Panics
    ///
    /// Panics if the key is malformed or lacks the `-bin` suffix.
    pub fn metadata_bin(mut self, key: &str, value: &[u8]) -> Self {
        self.stream = self.stream.metadata_bin(key, value);
        self
    }

    /// Choose the message compression for the call.
    pub fn compression(mut self, encoding: Encoding) -> Self {
        self.stream = self.stream.compression(encoding);
        self
    }

    /// Split into the timeout and the options that apply to the stream.
    pub(crate) fn into_parts(self) -> (Option<Duration>, StreamOptions) {
        (self.timeout, self.stream)
    }
}

/// Options for an explicitly opened stream.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub(crate) metadata: Metadata,
    pub(crate) encoding: Encoding,
    pub(crate) max_message_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            encoding: Encoding::Identity,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl StreamOptions {
    /// Create default stream options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ASCII metadata entry, sent with the first message.
    ///
    /// # Panics
    ///
    /// Panics if the key or value is malformed; use
    /// [`try_metadata`](Self::try_metadata) for fallible insertion.
    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .insert(key, value)
            .expect("invalid metadata entry");
        self
    }

    /// Try to add an ASCII metadata entry; `None` if key or value is
    /// malformed.
    pub fn try_metadata(mut self, key: &str, value: &str) -> Option<Self> {
        self.metadata.insert(key, value).ok()?;
        Some(self)
    }

    /// Add a binary metadata entry under a `-bin` key.
    ///
    /// # Panics
    ///
    /// Panics if the key is malformed or lacks the `-bin` suffix.
    pub fn metadata_bin(mut self, key: &str, value: &[u8]) -> Self {
        self.metadata
            .insert_bin(key, value)
            .expect("invalid binary metadata entry");
        self
    }

    /// Choose the message compression for the stream.
    pub fn compression(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Cap the size of a single decoded message (default 4 MiB).
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::new();
        assert!(options.get_timeout().is_none());
        assert!(options.stream.metadata.is_empty());
        assert!(options.stream.encoding.is_identity());
    }

    #[test]
    fn test_call_options_timeout() {
        let options = CallOptions::new().timeout(Duration::from_secs(30));
        assert_eq!(options.get_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_call_options_metadata() {
        let options = CallOptions::new()
            .metadata("authorization", "Bearer token123")
            .metadata("x-request-id", "abc-123");

        assert_eq!(
            options.stream.metadata.get("authorization"),
            Some("Bearer token123")
        );
        assert_eq!(options.stream.metadata.get("x-request-id"), Some("abc-123"));
    }

    #[test]
    fn test_call_options_try_metadata_invalid() {
        assert!(CallOptions::new().try_metadata("bad key\0", "v").is_none());
        assert!(CallOptions::new().try_metadata("x-ok", "v").is_some());
    }

    #[test]
    fn test_call_options_metadata_bin() {
        let options = CallOptions::new().metadata_bin("x-trace-bin", &[1, 2, 3]);
        assert_eq!(
            options.stream.metadata.get_bin("x-trace-bin").unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_into_parts() {
        let options = CallOptions::new()
            .timeout(Duration::from_millis(50))
            .metadata("x-k", "v");
        let (timeout, stream) = options.into_parts();
        assert_eq!(timeout, Some(Duration::from_millis(50)));
        assert_eq!(stream.metadata.get("x-k"), Some("v"));
    }

    #[test]
    fn test_stream_options_max_message_size() {
        let options = StreamOptions::new().max_message_size(1024);
        assert_eq!(options.max_message_size, 1024);
        assert_eq!(
            StreamOptions::default().max_message_size,
            DEFAULT_MAX_MESSAGE_SIZE
        );
    }
}
