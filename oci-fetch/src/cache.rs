//! Disk-backed blob cache keyed by content digest.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::reference::Digest;
use crate::transport::ByteStream;

/// Environment variable toggling the blob cache.
///
/// Absent or unparsable values leave the cache enabled; a value parsing
/// as `false` disables it.
pub const CACHE_ENV: &str = "OCI_FETCH_CACHE";

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors for local cache I/O. A missing entry is not an error; `get`
/// reports it as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the cache directory failed
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// Path of the entry being accessed.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Bytes offered for a digest hashed to something else
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the entry was stored under.
        expected: String,
        /// The digest the offered bytes actually hashed to.
        actual: String,
    },

    /// A write was attempted against a disabled cache
    #[error("cache is disabled")]
    Disabled,
}

/// A persistent digest-addressed blob store on the local filesystem.
///
/// Entries are laid out as `<root>/<algorithm>/<hex>`, so distinct
/// digests never collide. Writes publish atomically: a blob becomes
/// visible under its digest path only after its bytes are fully on disk
/// and verified. There is no eviction; unbounded growth is a deliberate
/// simplification for short-lived runs.
#[derive(Debug, Clone, Default)]
pub struct ImageCache {
    root: Option<Utf8PathBuf>,
}

impl ImageCache {
    /// A cache that stores nothing and always misses.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// A cache rooted at an explicit directory.
    pub fn at(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Build a cache from the environment.
    ///
    /// Honors [`CACHE_ENV`] and roots the cache under the platform
    /// user-cache directory. If that directory cannot be located or
    /// created, caching degrades to disabled with a warning; this is
    /// never fatal.
    pub fn from_env() -> Self {
        if !enabled_from(std::env::var(CACHE_ENV).ok().as_deref()) {
            tracing::debug!("blob cache disabled by {CACHE_ENV}");
            return Self::disabled();
        }

        let Some(dirs) = directories::ProjectDirs::from("", "", "oci-fetch") else {
            tracing::warn!("unable to locate a user cache directory, caching disabled");
            return Self::disabled();
        };

        let root = dirs.cache_dir().join("blobs");
        let Ok(root) = Utf8PathBuf::from_path_buf(root) else {
            tracing::warn!("user cache directory is not valid UTF-8, caching disabled");
            return Self::disabled();
        };

        if let Err(error) = std::fs::create_dir_all(&root) {
            tracing::warn!(%root, %error, "unable to create blob cache directory, caching disabled");
            return Self::disabled();
        }

        tracing::debug!(%root, "storing blob cache");
        Self::at(root)
    }

    /// Whether this cache stores anything at all.
    pub fn enabled(&self) -> bool {
        self.root.is_some()
    }

    fn blob_path(&self, digest: &Digest) -> Option<Utf8PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(digest.algorithm()).join(digest.hex()))
    }

    /// Look up a blob by digest.
    ///
    /// Returns `Ok(None)` on a miss (including when the cache is
    /// disabled); any other I/O failure is an error.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, digest: &Digest) -> CacheResult<Option<CachedBlob>> {
        let Some(path) = self.blob_path(digest) else {
            return Ok(None);
        };

        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(Some(CachedBlob {
                digest: digest.clone(),
                path,
            })),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Store a blob under its digest, reading it fully from `stream`.
    ///
    /// The bytes are written to a temporary file, verified against the
    /// digest, and renamed into place, so a partially-written or corrupt
    /// entry is never visible to concurrent readers. Concurrent writes
    /// for the same digest may race; the content is identical, so the
    /// last rename wins harmlessly.
    #[tracing::instrument(skip(self, stream))]
    pub async fn put(
        &self,
        digest: &Digest,
        stream: &mut (dyn AsyncRead + Send + Unpin),
    ) -> CacheResult<CachedBlob> {
        let Some(path) = self.blob_path(digest) else {
            return Err(CacheError::Disabled);
        };

        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .await
            .map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;

        if digest.algorithm() == "sha256" {
            let actual = Digest::sha256(&data);
            if &actual != digest {
                return Err(CacheError::DigestMismatch {
                    expected: digest.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        let parent = path.parent().unwrap_or(Utf8Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CacheError::Io {
                path: parent.to_owned(),
                source,
            })?;

        // Unique per write so concurrent puts never share a temp file.
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let tmp = parent.join(format!(
            ".{}.{}.{}.tmp",
            digest.hex(),
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed),
        ));

        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|source| CacheError::Io {
                path: tmp.clone(),
                source,
            })?;

        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::Io { path, source });
        }

        tracing::debug!(%digest, %path, "blob cached");
        Ok(CachedBlob {
            digest: digest.clone(),
            path,
        })
    }
}

/// Whether caching is enabled for the given environment value.
fn enabled_from(value: Option<&str>) -> bool {
    // Only an explicit, parseable "false" turns the cache off.
    !matches!(value.map(str::parse::<bool>), Some(Ok(false)))
}

/// A handle to one blob stored in the cache.
#[derive(Debug, Clone)]
pub struct CachedBlob {
    digest: Digest,
    path: Utf8PathBuf,
}

impl CachedBlob {
    /// The digest this blob is stored under.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// On-disk location of the blob.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Read the full blob content.
    pub async fn read(&self) -> CacheResult<Bytes> {
        tokio::fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|source| CacheError::Io {
                path: self.path.clone(),
                source,
            })
    }

    /// Open the blob as a byte stream.
    pub async fn open(&self) -> CacheResult<ByteStream> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| CacheError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(Box::new(BufReader::new(file)))
    }
}
