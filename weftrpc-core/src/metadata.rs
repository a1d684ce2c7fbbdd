//! Header and trailer metadata.
//!
//! Metadata travels with the opening headers of a stream and with the
//! trailers that close it. Keys are lowercase ASCII; keys ending in `-bin`
//! carry binary values, base64-encoded without padding on the wire.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Suffix marking a binary-valued metadata key.
pub const BIN_SUFFIX: &str = "-bin";

/// Metadata attached to stream headers or trailers.
///
/// # Example
///
/// ```
/// use weftrpc_core::Metadata;
///
/// let mut md = Metadata::new();
/// md.insert("x-request-id", "abc-123").unwrap();
/// md.insert_bin("x-trace-bin", &[1, 2, 3]).unwrap();
///
/// assert_eq!(md.get("x-request-id"), Some("abc-123"));
/// assert_eq!(md.get_bin("x-trace-bin").unwrap(), vec![1, 2, 3]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

/// Error returned for malformed metadata keys or values.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidMetadata {
    #[error("invalid metadata key: {0:?}")]
    Key(String),

    #[error("invalid metadata value for key {0:?}")]
    Value(String),

    #[error("binary metadata key {0:?} must end in \"-bin\"")]
    MissingBinSuffix(String),

    #[error("ascii metadata key {0:?} must not end in \"-bin\"")]
    UnexpectedBinSuffix(String),
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing header map.
    pub fn from_headers(headers: HeaderMap) -> Self {
        Self { headers }
    }

    /// Insert an ASCII entry.
    ///
    /// The key must not end in `-bin`; use [`insert_bin`](Self::insert_bin)
    /// for binary values.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), InvalidMetadata> {
        if key.ends_with(BIN_SUFFIX) {
            return Err(InvalidMetadata::UnexpectedBinSuffix(key.to_owned()));
        }
        let name = parse_key(key)?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| InvalidMetadata::Value(key.to_owned()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Insert a binary entry under a `-bin` key.
    ///
    /// The value is base64-encoded (no padding) on the wire.
    pub fn insert_bin(&mut self, key: &str, value: &[u8]) -> Result<(), InvalidMetadata> {
        if !key.ends_with(BIN_SUFFIX) {
            return Err(InvalidMetadata::MissingBinSuffix(key.to_owned()));
        }
        let name = parse_key(key)?;
        let encoded = STANDARD_NO_PAD.encode(value);
        let value = HeaderValue::from_str(&encoded)
            .map_err(|_| InvalidMetadata::Value(key.to_owned()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get an ASCII entry.
    ///
    /// Returns `None` if the key is absent or the value is not valid ASCII.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get and decode a binary (`-bin`) entry.
    pub fn get_bin(&self, key: &str) -> Option<Vec<u8>> {
        let value = self.headers.get(key)?;
        STANDARD_NO_PAD.decode(value.as_bytes()).ok()
    }

    /// Check whether a key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Remove an entry; returns true if the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.headers.remove(key).is_some()
    }

    /// Iterate over all entries as raw header name/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }

    /// Merge another metadata set into this one, overwriting duplicate keys.
    pub fn merge(&mut self, other: &Metadata) {
        for (name, value) in other.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    /// Get the underlying header map.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consume self and return the underlying header map.
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

fn parse_key(key: &str) -> Result<HeaderName, InvalidMetadata> {
    HeaderName::from_bytes(key.as_bytes()).map_err(|_| InvalidMetadata::Key(key.to_owned()))
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::from_headers(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}
