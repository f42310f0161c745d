//! Cache-backed artifact retrieval.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use tokio::io::AsyncReadExt;

use crate::cache::ImageCache;
use crate::error::{DecodeError, Error, Result};
use crate::reference::{Digest, DigestReference, Reference};
use crate::transport::{ImageManifest, RegistryTransport, TransportError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Fetches whole images or single layers by reference.
///
/// Implementations must be safe for concurrent use; the embedding
/// runtime may resolve many references in parallel.
#[async_trait]
pub trait ArtifactClient: Send + Sync + std::fmt::Debug {
    /// Resolve a reference to an image with readable layers.
    async fn image(&self, reference: &Reference) -> Result<Image>;

    /// Resolve a digest-qualified reference to a single layer.
    async fn layer(&self, reference: &DigestReference) -> Result<Layer>;
}

/// The default client: a registry transport with transparent
/// read-through blob caching.
///
/// Cheap to clone; clones share the transport and the cache.
#[derive(Debug, Clone)]
pub struct CachingClient {
    transport: Arc<dyn RegistryTransport>,
    cache: ImageCache,
}

impl CachingClient {
    /// Compose a transport with a blob cache.
    pub fn new<T>(transport: T, cache: ImageCache) -> Self
    where
        T: RegistryTransport + 'static,
    {
        Self::from_shared(Arc::new(transport), cache)
    }

    /// Compose an already-shared transport with a blob cache.
    pub fn from_shared(transport: Arc<dyn RegistryTransport>, cache: ImageCache) -> Self {
        Self { transport, cache }
    }
}

#[async_trait]
impl ArtifactClient for CachingClient {
    /// Resolve a reference to an image.
    ///
    /// Manifest resolution always goes to the transport; only the
    /// constituent layers are cache-served, keyed by digest.
    #[tracing::instrument(skip(self), fields(reference = %reference))]
    async fn image(&self, reference: &Reference) -> Result<Image> {
        let manifest = self.transport.image(reference).await?;

        let layers = manifest
            .layers
            .iter()
            .map(|descriptor| Layer {
                digest: descriptor.digest.clone(),
                media_type: Some(descriptor.media_type.clone()),
                source: LayerSource::Remote {
                    reference: DigestReference::new(
                        reference.repository(),
                        descriptor.digest.clone(),
                    ),
                    transport: self.transport.clone(),
                    cache: self.cache.clone(),
                },
            })
            .collect();

        Ok(Image {
            reference: reference.clone(),
            manifest,
            layers,
        })
    }

    #[tracing::instrument(skip(self), fields(reference = %reference))]
    async fn layer(&self, reference: &DigestReference) -> Result<Layer> {
        Ok(Layer {
            digest: reference.digest().clone(),
            media_type: None,
            source: LayerSource::Remote {
                reference: reference.clone(),
                transport: self.transport.clone(),
                cache: self.cache.clone(),
            },
        })
    }
}

/// A resolved image: its manifest plus readable layer handles.
#[derive(Debug, Clone)]
pub struct Image {
    reference: Reference,
    manifest: ImageManifest,
    layers: Vec<Layer>,
}

impl Image {
    /// The reference this image was resolved from.
    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    /// The resolved manifest.
    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    /// Layer handles in manifest order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

/// A handle on one compressed content blob.
///
/// Content is fetched lazily on first read. Handles produced by a
/// caching client read through the cache: a miss costs exactly one
/// transport call for that digest, and every later read of the same
/// digest is served from disk.
#[derive(Debug, Clone)]
pub struct Layer {
    digest: Digest,
    media_type: Option<String>,
    source: LayerSource,
}

#[derive(Debug, Clone)]
enum LayerSource {
    /// Content already resolved in memory.
    Buffered(Bytes),

    /// Content fetched through a transport, read-through cached when
    /// the cache is enabled.
    Remote {
        reference: DigestReference,
        transport: Arc<dyn RegistryTransport>,
        cache: ImageCache,
    },
}

impl Layer {
    /// A layer backed by in-memory bytes, for tests and synthetic content.
    pub fn from_bytes(
        digest: Digest,
        media_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            digest,
            media_type,
            source: LayerSource::Buffered(bytes.into()),
        }
    }

    /// The declared content digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The declared media type, when known.
    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    /// The full compressed layer content.
    #[tracing::instrument(skip(self), fields(digest = %self.digest))]
    pub async fn compressed(&self) -> Result<Bytes> {
        match &self.source {
            LayerSource::Buffered(bytes) => Ok(bytes.clone()),
            LayerSource::Remote {
                reference,
                transport,
                cache,
            } => {
                if !cache.enabled() {
                    return fetch_verified(transport.as_ref(), reference).await;
                }

                if let Some(blob) = cache.get(reference.digest()).await? {
                    tracing::debug!(digest = %reference.digest(), "layer served from cache");
                    return Ok(blob.read().await?);
                }

                // Miss: one transport fetch, publish, then serve the
                // just-stored entry.
                let bytes = fetch_verified(transport.as_ref(), reference).await?;
                let blob = cache.put(reference.digest(), &mut &bytes[..]).await?;
                Ok(blob.read().await?)
            }
        }
    }

    /// The decompressed layer content.
    ///
    /// Gzip payloads (sniffed by magic bytes) are gunzipped; anything
    /// else passes through unchanged.
    pub async fn uncompressed(&self) -> Result<Bytes> {
        let compressed = self.compressed().await?;
        decode(&compressed, None)
    }

    /// Like [`Layer::uncompressed`], reading at most `max_bytes` of
    /// decompressed content.
    pub async fn uncompressed_limited(&self, max_bytes: u64) -> Result<Bytes> {
        let compressed = self.compressed().await?;
        decode(&compressed, Some(max_bytes))
    }
}

/// Fetch a layer's compressed bytes and verify them against the
/// reference digest before anything downstream can observe them.
async fn fetch_verified(
    transport: &dyn RegistryTransport,
    reference: &DigestReference,
) -> Result<Bytes> {
    let mut stream = transport.layer(reference).await?;
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .await
        .map_err(TransportError::Io)?;

    let digest = reference.digest();
    if digest.algorithm() == "sha256" {
        let actual = Digest::sha256(&data);
        if &actual != digest {
            return Err(Error::DigestMismatch {
                reference: reference.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    Ok(data.into())
}

fn decode(compressed: &[u8], limit: Option<u64>) -> Result<Bytes> {
    if compressed.starts_with(&GZIP_MAGIC) {
        let mut data = Vec::new();
        let decoder = GzDecoder::new(compressed);
        let result = match limit {
            Some(limit) => decoder.take(limit).read_to_end(&mut data),
            None => {
                let mut decoder = decoder;
                decoder.read_to_end(&mut data)
            }
        };
        result.map_err(|err| Error::Decode(DecodeError::Gzip(err)))?;
        Ok(data.into())
    } else {
        // Passthrough: a slice read cannot fail, so truncate directly.
        let end = limit.map_or(compressed.len(), |limit| {
            compressed.len().min(usize::try_from(limit).unwrap_or(usize::MAX))
        });
        Ok(Bytes::copy_from_slice(&compressed[..end]))
    }
}
