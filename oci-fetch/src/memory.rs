//! An in-memory registry transport for tests and local fixtures.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::reference::{Digest, DigestReference, Reference};
use crate::transport::{ByteStream, ImageManifest, RegistryTransport, TransportError};

/// A [`RegistryTransport`] that serves preloaded manifests and blobs
/// from memory and counts upstream requests, so tests can assert how
/// often the "network" was hit.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    manifests: RwLock<HashMap<String, ImageManifest>>,
    blobs: RwLock<HashMap<Digest, Bytes>>,
    layer_requests: RwLock<HashMap<Digest, usize>>,
    manifest_requests: AtomicUsize,
    layer_failure: RwLock<Option<String>>,
}

impl MemoryTransport {
    /// An empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manifest under a reference, as rendered by
    /// [`Reference`]'s `Display`.
    pub async fn insert_manifest(&self, reference: &Reference, manifest: ImageManifest) {
        let mut manifests = self.manifests.write().await;
        manifests.insert(reference.to_string(), manifest);
    }

    /// Register a blob under its digest.
    pub async fn insert_blob(&self, digest: Digest, bytes: impl Into<Bytes>) {
        let mut blobs = self.blobs.write().await;
        blobs.insert(digest, bytes.into());
    }

    /// Register a blob under its computed sha256 digest and return a
    /// digest reference for it in `repository`.
    pub async fn push_layer(&self, repository: &str, bytes: impl Into<Bytes>) -> DigestReference {
        let bytes = bytes.into();
        let digest = Digest::sha256(&bytes);
        self.insert_blob(digest.clone(), bytes).await;
        DigestReference::new(repository, digest)
    }

    /// Make every subsequent layer request fail with the given message.
    pub async fn fail_layers(&self, message: impl Into<String>) {
        let mut failure = self.layer_failure.write().await;
        *failure = Some(message.into());
    }

    /// How many manifest resolutions have been served.
    pub fn manifest_requests(&self) -> usize {
        self.manifest_requests.load(Ordering::SeqCst)
    }

    /// How many layer fetches have been served for `digest`.
    pub async fn layer_requests(&self, digest: &Digest) -> usize {
        let requests = self.layer_requests.read().await;
        requests.get(digest).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RegistryTransport for MemoryTransport {
    async fn image(&self, reference: &Reference) -> Result<ImageManifest, TransportError> {
        self.manifest_requests.fetch_add(1, Ordering::SeqCst);

        let manifests = self.manifests.read().await;
        manifests
            .get(&reference.to_string())
            .cloned()
            .ok_or_else(|| TransportError::NotFound(reference.to_string()))
    }

    async fn layer(&self, reference: &DigestReference) -> Result<ByteStream, TransportError> {
        if let Some(message) = self.layer_failure.read().await.clone() {
            return Err(TransportError::Other(message));
        }

        {
            let mut requests = self.layer_requests.write().await;
            *requests.entry(reference.digest().clone()).or_insert(0) += 1;
        }

        let blobs = self.blobs.read().await;
        let bytes = blobs
            .get(reference.digest())
            .cloned()
            .ok_or_else(|| TransportError::NotFound(reference.to_string()))?;

        Ok(Box::new(Cursor::new(bytes.to_vec())) as ByteStream)
    }
}
