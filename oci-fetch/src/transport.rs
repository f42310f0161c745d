//! The registry transport seam and the manifest data model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::reference::{Digest, DigestReference, Reference};

/// Media type for an OCI image manifest document.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type for an uncompressed tar layer.
pub const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Media type for a gzip-compressed tar layer.
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// A closable compressed byte stream handed back by a transport.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Errors surfaced by a registry transport.
///
/// These propagate to callers verbatim; retry policy belongs to the
/// transport implementation, not to its callers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The referenced manifest or blob does not exist upstream
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry rejected the request's credentials
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Network or stream I/O failed
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other transport failure
    #[error("transport error: {0}")]
    Other(String),
}

/// Resolves references against a remote registry.
///
/// Implementations own the wire protocol, authentication, timeouts and
/// retries. This crate only composes a transport with the local blob
/// cache; it never speaks to the network itself.
#[async_trait]
pub trait RegistryTransport: Send + Sync + std::fmt::Debug {
    /// Resolve a reference to its image manifest.
    async fn image(&self, reference: &Reference) -> Result<ImageManifest, TransportError>;

    /// Open the compressed byte stream for a single layer.
    async fn layer(&self, reference: &DigestReference) -> Result<ByteStream, TransportError>;
}

/// One manifest entry addressing a blob by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    pub media_type: String,

    /// Content digest of the referenced blob.
    pub digest: Digest,

    /// Size of the blob in bytes.
    pub size: u64,
}

/// An OCI image manifest: config descriptor plus an ordered sequence of
/// layer descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Manifest schema version; 2 for every format this crate handles.
    pub schema_version: u32,

    /// Media type of the manifest document itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Descriptor for the image config blob.
    pub config: Descriptor,

    /// Ordered layer descriptors.
    pub layers: Vec<Descriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parses_oci_field_names() {
        let raw = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
                "size": 2
            },
            "layers": [
                {
                    "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                    "digest": "sha256:2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae",
                    "size": 3
                }
            ]
        }"#;

        let manifest: ImageManifest = serde_json::from_str(raw).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.media_type.as_deref(), Some(MEDIA_TYPE_IMAGE_MANIFEST));
        assert_eq!(manifest.layers.len(), 1);
        assert_eq!(manifest.layers[0].media_type, MEDIA_TYPE_LAYER_GZIP);

        let round = serde_json::to_string(&manifest).unwrap();
        assert_eq!(serde_json::from_str::<ImageManifest>(&round).unwrap(), manifest);
    }

    #[test]
    fn manifest_rejects_bad_digests() {
        let raw = r#"{
            "schemaVersion": 2,
            "config": {"mediaType": "c", "digest": "sha256:short", "size": 1},
            "layers": []
        }"#;
        assert!(serde_json::from_str::<ImageManifest>(raw).is_err());
    }
}
