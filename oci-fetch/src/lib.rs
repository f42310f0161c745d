//! # Cache-backed OCI artifact retrieval
//!
//! This crate fetches images and layers from an OCI registry through a
//! pluggable transport, with transparent content-addressed caching of
//! layer blobs on the local filesystem.
//!
//! ## Features
//!
//! - Digest- and tag-qualified reference parsing
//! - Disk-backed blob cache with atomic writes and an environment
//!   toggle, degrading gracefully when no cache directory is available
//! - Read-through caching: one upstream fetch per digest for the
//!   lifetime of the cache, zero for every later read
//! - Request-scoped client override via an explicit [`Context`], with
//!   no global mutable state
//!
//! ## Example
//!
//! ```no_run
//! use oci_fetch::{ArtifactClient, CachingClient, ImageCache, MemoryTransport};
//!
//! # async fn example() -> oci_fetch::Result<()> {
//! let transport = MemoryTransport::new();
//! let client = CachingClient::new(transport, ImageCache::from_env());
//!
//! let reference = "registry.local/spam@sha256:4bbf56a3a9231f752d3b9c174637975f0f83ed2b15e65799837c571e4ef3374b"
//!     .parse()?;
//! let layer = client.layer(&reference).await?;
//! let content = layer.uncompressed().await?;
//! # let _ = content;
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod context;
mod error;
mod memory;
mod reference;
mod transport;

pub use cache::{CACHE_ENV, CacheError, CacheResult, CachedBlob, ImageCache};
pub use client::{ArtifactClient, CachingClient, Image, Layer};
pub use context::Context;
pub use error::{DecodeError, Error, Result};
pub use memory::MemoryTransport;
pub use reference::{Digest, DigestReference, Reference, ReferenceError, ReferenceResult};
pub use transport::{
    ByteStream, Descriptor, ImageManifest, MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_LAYER,
    MEDIA_TYPE_LAYER_GZIP, RegistryTransport, TransportError,
};
