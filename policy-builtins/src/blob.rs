//! The `oci.fetch_blob` extension function.
//!
//! Lets policy authors inspect auxiliary content referenced by the data
//! under evaluation, e.g. metadata embedded in an image layer. The
//! operand must be digest-qualified: results have to be deterministic
//! and safely cacheable, which a mutable tag can never guarantee.

use serde_json::Value;

use oci_fetch::DigestReference;

use crate::registry::{Builtin, BuiltinContext, EvalError, EvalResult, Registry};

/// Name under which the blob-fetch builtin is registered.
pub const FETCH_BLOB_NAME: &str = "oci.fetch_blob";

const FETCH_BLOB_DESCRIPTION: &str =
    "Fetch a blob by digest-qualified OCI reference and return its decompressed content \
     as a string, truncated to the configured size cap.";

/// Default cap on decompressed blob bytes handed to the evaluator.
pub const DEFAULT_MAX_BLOB_BYTES: u64 = 10 * 1024 * 1024;

/// What to do when a blob's decompressed content exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OversizePolicy {
    /// Return exactly the first `max_bytes` bytes.
    #[default]
    Truncate,

    /// Abort the invoking rule with [`EvalError::TooLarge`].
    Reject,
}

/// Resource bounds applied to blob reads, protecting the evaluator
/// from unbounded memory use.
#[derive(Debug, Clone, Copy)]
pub struct BlobLimits {
    /// Cap on decompressed bytes.
    pub max_bytes: u64,

    /// Behavior when content exceeds the cap.
    pub on_exceed: OversizePolicy,
}

impl Default for BlobLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BLOB_BYTES,
            on_exceed: OversizePolicy::default(),
        }
    }
}

/// Declare the blob-fetch builtin with the given limits.
pub fn fetch_blob_builtin(limits: BlobLimits) -> Builtin {
    Builtin::new(
        FETCH_BLOB_NAME,
        FETCH_BLOB_DESCRIPTION,
        1,
        move |bctx, operands| fetch_blob(bctx, operands, limits),
    )
}

/// Register the blob-fetch builtin with its default limits.
pub fn register(registry: &mut Registry) {
    registry.register(fetch_blob_builtin(BlobLimits::default()));
}

#[tracing::instrument(skip(bctx, operands))]
async fn fetch_blob(bctx: BuiltinContext, operands: Vec<Value>, limits: BlobLimits) -> EvalResult {
    let term = operands.first().ok_or(EvalError::Arity {
        name: FETCH_BLOB_NAME,
        expected: 1,
        actual: 0,
    })?;
    let Some(uri) = term.as_str() else {
        return Err(EvalError::OperandType {
            position: 1,
            expected: "string",
        });
    };

    let reference: DigestReference = uri.parse()?;
    let client = bctx.client();
    let layer = client.layer(&reference).await?;

    // Read one byte past the cap so truncation is detectable.
    let bytes = layer
        .uncompressed_limited(limits.max_bytes.saturating_add(1))
        .await?;
    let blob = if bytes.len() as u64 > limits.max_bytes {
        match limits.on_exceed {
            OversizePolicy::Truncate => {
                tracing::debug!(
                    reference = %reference,
                    limit = limits.max_bytes,
                    "truncating oversized blob"
                );
                bytes.slice(..limits.max_bytes as usize)
            }
            OversizePolicy::Reject => {
                return Err(EvalError::TooLarge {
                    limit: limits.max_bytes,
                });
            }
        }
    } else {
        bytes
    };

    Ok(Value::String(String::from_utf8_lossy(&blob).into_owned()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use oci_fetch::{CachingClient, Context, ImageCache, MemoryTransport};

    use super::*;

    async fn bctx_with(transport: MemoryTransport) -> (Arc<MemoryTransport>, BuiltinContext) {
        let transport = Arc::new(transport);
        let client = CachingClient::from_shared(transport.clone(), ImageCache::disabled());
        let bctx = BuiltinContext::new(Context::new(), Arc::new(client));
        (transport, bctx)
    }

    async fn fetch(bctx: &BuiltinContext, uri: &str, limits: BlobLimits) -> EvalResult {
        fetch_blob(bctx.clone(), vec![Value::from(uri)], limits).await
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        use std::io::Write;
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn returns_blob_content_as_a_string() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", &br#"{"spam": "maps"}"#[..])
            .await;

        let blob = fetch(&bctx, &reference.to_string(), BlobLimits::default())
            .await
            .unwrap();
        assert_eq!(blob, Value::from(r#"{"spam": "maps"}"#));
    }

    #[tokio::test]
    async fn gzip_blobs_are_decompressed() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", gzip(br#"{"spam": "maps"}"#))
            .await;

        let blob = fetch(&bctx, &reference.to_string(), BlobLimits::default())
            .await
            .unwrap();
        assert_eq!(blob, Value::from(r#"{"spam": "maps"}"#));
    }

    #[tokio::test]
    async fn tag_references_are_rejected() {
        let (_transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let err = fetch(&bctx, "registry.local/spam:latest", BlobLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Reference(_)));
    }

    #[tokio::test]
    async fn truncated_digests_are_rejected() {
        let (_transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let err = fetch(
            &bctx,
            "registry.local/spam@sha256:4e388ab",
            BlobLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EvalError::Reference(_)));
    }

    #[tokio::test]
    async fn non_string_operands_are_rejected() {
        let (_transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let err = fetch_blob(bctx, vec![Value::from(42)], BlobLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EvalError::OperandType {
                position: 1,
                expected: "string"
            }
        ));
    }

    #[tokio::test]
    async fn transport_failures_abort_the_rule_with_the_original_cause() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", &b"content"[..])
            .await;
        transport.fail_layers("boom!").await;

        let err = fetch(&bctx, &reference.to_string(), BlobLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::Fetch(_)));
        assert!(err.to_string().contains("boom!"));
    }

    #[tokio::test]
    async fn content_at_the_cap_is_returned_unchanged() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let content = vec![b'x'; 64];
        let reference = transport
            .push_layer("registry.local/spam", content.clone())
            .await;

        let limits = BlobLimits {
            max_bytes: 64,
            on_exceed: OversizePolicy::Truncate,
        };
        let blob = fetch(&bctx, &reference.to_string(), limits).await.unwrap();
        assert_eq!(blob, Value::from("x".repeat(64)));
    }

    #[tokio::test]
    async fn an_unbounded_cap_returns_content_unchanged() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", &b"content"[..])
            .await;

        let limits = BlobLimits {
            max_bytes: u64::MAX,
            on_exceed: OversizePolicy::Truncate,
        };
        let blob = fetch(&bctx, &reference.to_string(), limits).await.unwrap();
        assert_eq!(blob, Value::from("content"));
    }

    #[tokio::test]
    async fn oversized_content_is_silently_truncated_to_the_cap() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", vec![b'y'; 200])
            .await;

        let limits = BlobLimits {
            max_bytes: 64,
            on_exceed: OversizePolicy::Truncate,
        };
        let blob = fetch(&bctx, &reference.to_string(), limits).await.unwrap();
        assert_eq!(blob, Value::from("y".repeat(64)));
    }

    #[tokio::test]
    async fn oversized_content_can_be_rejected_instead() {
        let (transport, bctx) = bctx_with(MemoryTransport::new()).await;
        let reference = transport
            .push_layer("registry.local/spam", vec![b'z'; 200])
            .await;

        let limits = BlobLimits {
            max_bytes: 64,
            on_exceed: OversizePolicy::Reject,
        };
        let err = fetch(&bctx, &reference.to_string(), limits)
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::TooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn a_context_override_selects_the_client() {
        // default client knows nothing; the override carries the blob
        let (_empty, bctx) = bctx_with(MemoryTransport::new()).await;

        let stocked = Arc::new(MemoryTransport::new());
        let reference = stocked
            .push_layer("registry.local/spam", &b"override content"[..])
            .await;
        let replacement = CachingClient::from_shared(stocked.clone(), ImageCache::disabled());

        let ctx = bctx.context().with_client(Arc::new(replacement));
        let bctx = BuiltinContext::new(ctx, bctx.client());

        let blob = fetch(&bctx, &reference.to_string(), BlobLimits::default())
            .await
            .unwrap();
        assert_eq!(blob, Value::from("override content"));
    }

    #[test]
    fn the_builtin_is_registered_under_its_name() {
        let mut registry = Registry::new();
        register(&mut registry);

        let builtin = registry.get(FETCH_BLOB_NAME).expect("builtin registered");
        assert_eq!(builtin.arity(), 1);
        assert!(!builtin.description().is_empty());
    }
}
