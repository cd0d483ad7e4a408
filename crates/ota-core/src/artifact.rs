//! Read-only view of a parsed update artifact
//!
//! Artifact parsing (signature checking, tar decoding) happens upstream;
//! the update driver only needs the header fields and an ordered stream
//! of payloads. This module defines that interface.

use std::collections::VecDeque;

use tokio::io::AsyncRead;

use crate::provides::{ClearsProvides, ProvidesMap};

/// Header fields of one payload, as extracted by the artifact parser.
///
/// `header_info`, `type_info` and `meta_data` are kept as the raw JSON
/// text from the artifact so they can be handed to the update module
/// byte-for-byte.
#[derive(Debug, Clone, Default)]
pub struct ArtifactHeader {
    /// Name of the artifact
    pub artifact_name: String,
    /// Group the artifact belongs to (may be empty)
    pub artifact_group: String,
    /// Payload type, selects the update module (e.g. `rootfs-image`)
    pub payload_type: String,
    /// Raw `header-info` JSON
    pub header_info: String,
    /// Raw `type-info` JSON
    pub type_info: String,
    /// Raw `meta-data` JSON
    pub meta_data: String,
    /// Provides asserted by this artifact, if any
    pub provides: Option<ProvidesMap>,
    /// Clears-provides patterns carried by this artifact, if any
    pub clears_provides: Option<ClearsProvides>,
}

/// Byte stream of one payload inside an artifact.
pub struct Payload {
    name: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl Payload {
    /// Wrap a reader as a named payload.
    pub fn new(name: impl Into<String>, reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// In-memory payload, mainly for tests.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, Box::new(std::io::Cursor::new(bytes)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The payload byte stream. Bytes are only available once, in order.
    pub fn reader(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut self.reader
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload").field("name", &self.name).finish()
    }
}

/// A parsed artifact: one header plus a lazy sequence of payloads.
pub struct Artifact {
    header: ArtifactHeader,
    payloads: VecDeque<Payload>,
}

impl Artifact {
    pub fn new(header: ArtifactHeader, payloads: Vec<Payload>) -> Self {
        Self {
            header,
            payloads: payloads.into(),
        }
    }

    pub fn header(&self) -> &ArtifactHeader {
        &self.header
    }

    /// Take the next payload, in artifact order.
    pub fn next_payload(&mut self) -> Option<Payload> {
        self.payloads.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn payloads_come_out_in_order() {
        let mut artifact = Artifact::new(
            ArtifactHeader::default(),
            vec![
                Payload::from_bytes("rootfs", b"first".to_vec()),
                Payload::from_bytes("rootfs2", b"second".to_vec()),
            ],
        );

        let mut payload = artifact.next_payload().unwrap();
        assert_eq!(payload.name(), "rootfs");
        let mut buf = Vec::new();
        payload.reader().read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"first");

        assert_eq!(artifact.next_payload().unwrap().name(), "rootfs2");
        assert!(artifact.next_payload().is_none());
    }
}
