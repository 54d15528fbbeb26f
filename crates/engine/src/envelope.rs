// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! The immutable message envelope.

use ackstream_config::Subject;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A message: identifier, payload, metadata and, once stored, its subject.
///
/// Every field is shared, so cloning an envelope never copies the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    id: Arc<str>,
    payload: Arc<[u8]>,
    metadata: Arc<BTreeMap<String, String>>,
    subject: Option<Subject>,
}

impl Envelope {
    /// Builds an envelope with empty metadata.
    pub fn new(id: impl Into<Arc<str>>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            metadata: Arc::new(BTreeMap::new()),
            subject: None,
        }
    }

    /// Returns a copy with `metadata` attached.
    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }

    /// Returns a copy bound to `subject`.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Message identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Metadata entries.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Subject the envelope was published on, if it went through a store.
    #[must_use]
    pub fn subject(&self) -> Option<&Subject> {
        self.subject.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::Envelope;
    use ackstream_config::Subject;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[test]
    fn clones_share_the_payload() {
        let envelope = Envelope::new("m-1", b"hello from a".to_vec())
            .with_metadata(BTreeMap::from([("k".to_owned(), "v".to_owned())]));
        let copy = envelope.clone();
        assert!(std::ptr::eq(envelope.payload(), copy.payload()));
        assert!(Arc::ptr_eq(&envelope.metadata, &copy.metadata));
        assert_eq!(copy.metadata().get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn subject_is_attached_on_request() {
        let subject = Subject::parse("example_topic.a").expect("valid subject");
        let envelope = Envelope::new("m-1", Vec::new());
        assert!(envelope.subject().is_none());
        let envelope = envelope.with_subject(subject.clone());
        assert_eq!(envelope.subject(), Some(&subject));
    }
}
