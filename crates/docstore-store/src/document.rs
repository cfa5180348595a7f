//! Documents and key encoding at the store boundary.
//!
//! Callers hand the store raw byte-string keys. The table stores keys as
//! `TEXT`, so keys are decoded to UTF-8 on the way in (rejecting anything
//! that is not valid UTF-8 before touching the database) and encoded back to
//! bytes on the way out. Payloads pass through untouched.

use crate::errors::{Result, StoreError};

/// A (key, opaque payload) pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Document {
    /// Unique key.
    pub key: Vec<u8>,
    /// Opaque payload, never interpreted by the store.
    pub payload: Vec<u8>,
}

impl Document {
    /// Create a document from anything byte-like.
    pub fn new(key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Pair up parallel key and payload lists.
    ///
    /// Fails with [`StoreError::MalformedBatch`] when the lengths differ.
    pub fn zip<K, P>(keys: Vec<K>, payloads: Vec<P>) -> Result<Vec<Self>>
    where
        K: Into<Vec<u8>>,
        P: Into<Vec<u8>>,
    {
        if keys.len() != payloads.len() {
            return Err(StoreError::MalformedBatch(format!(
                "{} keys but {} payloads",
                keys.len(),
                payloads.len()
            )));
        }
        Ok(keys
            .into_iter()
            .zip(payloads)
            .map(|(key, payload)| Self::new(key, payload))
            .collect())
    }
}

impl<K: Into<Vec<u8>>, P: Into<Vec<u8>>> From<(K, P)> for Document {
    fn from((key, payload): (K, P)) -> Self {
        Self::new(key, payload)
    }
}

/// A borrowed document whose key has been validated for storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedDocument<'a> {
    /// Key, decoded as UTF-8.
    pub key: &'a str,
    /// Payload bytes.
    pub payload: &'a [u8],
}

/// Decode one key for storage.
pub fn encode_key(key: &[u8]) -> Result<&str> {
    std::str::from_utf8(key).map_err(|e| {
        StoreError::MalformedBatch(format!(
            "key {} is not valid UTF-8: {e}",
            String::from_utf8_lossy(key)
        ))
    })
}

/// Validate a key batch, failing on the first undecodable key.
pub fn encode_keys<K: AsRef<[u8]>>(keys: &[K]) -> Result<Vec<&str>> {
    keys.iter().map(|k| encode_key(k.as_ref())).collect()
}

/// Validate a document batch, failing on the first undecodable key.
pub fn encode_documents(docs: &[Document]) -> Result<Vec<EncodedDocument<'_>>> {
    docs.iter()
        .map(|doc| {
            Ok(EncodedDocument {
                key: encode_key(&doc.key)?,
                payload: &doc.payload,
            })
        })
        .collect()
}

/// Documents returned by a fetch, in no particular order.
///
/// Rows are fully read before the pooled session is released, so iterating
/// never holds a connection.
#[derive(Debug, Default)]
pub struct Documents {
    inner: std::vec::IntoIter<Document>,
}

impl Documents {
    pub(crate) fn from_rows(rows: Vec<(String, Vec<u8>)>) -> Self {
        let docs: Vec<Document> = rows
            .into_iter()
            .map(|(key, payload)| Document::new(key.into_bytes(), payload))
            .collect();
        Self {
            inner: docs.into_iter(),
        }
    }

    /// An empty result.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Iterator for Documents {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Documents {}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
