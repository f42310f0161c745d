//! # Policy evaluator extension functions
//!
//! Host-provided capabilities invocable from within the policy
//! language. Builtins are declared with a name, a description for
//! introspection tooling, and a fixed arity, and must be registered
//! explicitly before policies can see them. Failures surface on the
//! evaluator's error channel and abort only the invoking rule.
//!
//! The one builtin shipped here is [`FETCH_BLOB_NAME`]
//! (`oci.fetch_blob`): controlled, resource-bounded retrieval of a
//! blob by digest-qualified OCI reference.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oci_fetch::{CachingClient, Context, ImageCache, MemoryTransport};
//! use policy_builtins::{BuiltinContext, FETCH_BLOB_NAME, Registry};
//!
//! # async fn example() -> Result<(), policy_builtins::EvalError> {
//! let mut registry = Registry::new();
//! policy_builtins::register(&mut registry);
//!
//! let client = CachingClient::new(MemoryTransport::new(), ImageCache::from_env());
//! let bctx = BuiltinContext::new(Context::new(), Arc::new(client));
//!
//! let uri = "registry.local/spam@sha256:4bbf56a3a9231f752d3b9c174637975f0f83ed2b15e65799837c571e4ef3374b";
//! let blob = registry
//!     .call(FETCH_BLOB_NAME, &bctx, &[uri.into()])
//!     .await?;
//! # let _ = blob;
//! # Ok(())
//! # }
//! ```

mod blob;
mod registry;

pub use blob::{
    BlobLimits, DEFAULT_MAX_BLOB_BYTES, FETCH_BLOB_NAME, OversizePolicy, fetch_blob_builtin,
    register,
};
pub use registry::{BoxFuture, Builtin, BuiltinContext, EvalError, EvalResult, Registry};
