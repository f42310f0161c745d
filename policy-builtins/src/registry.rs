//! Named extension functions for the policy evaluator.
//!
//! The evaluation engine treats terms as [`serde_json::Value`]s. A
//! builtin is only available to policies once it has been explicitly
//! registered; nothing here is ambient.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use oci_fetch::{ArtifactClient, Context};

/// A boxed future, as returned by builtin functions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for builtin evaluation.
pub type EvalResult = Result<Value, EvalError>;

/// Errors surfaced on the engine's native error channel.
///
/// An error aborts evaluation of the invoking rule only, carrying the
/// original cause; it never terminates the host process.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// An operand had the wrong term type
    #[error("operand {position} must be a {expected}")]
    OperandType {
        /// 1-based operand position.
        position: usize,
        /// The expected term type.
        expected: &'static str,
    },

    /// A builtin was invoked with the wrong number of operands
    #[error("builtin {name} expects {expected} operand(s), got {actual}")]
    Arity {
        /// The builtin's registered name.
        name: &'static str,
        /// Declared arity.
        expected: usize,
        /// Number of operands supplied.
        actual: usize,
    },

    /// No builtin is registered under the requested name
    #[error("unknown builtin: {0}")]
    UnknownBuiltin(String),

    /// A blob exceeded the configured size cap under the reject policy
    #[error("blob exceeds limit of {limit} bytes")]
    TooLarge {
        /// The configured cap in bytes.
        limit: u64,
    },

    /// A reference operand failed to parse
    #[error(transparent)]
    Reference(#[from] oci_fetch::ReferenceError),

    /// Artifact retrieval failed
    #[error(transparent)]
    Fetch(#[from] oci_fetch::Error),
}

/// Per-evaluation state handed to every builtin invocation.
///
/// Carries the execution [`Context`] and the default artifact client;
/// a context-scoped override installed with
/// [`Context::with_client`] takes precedence.
#[derive(Debug, Clone)]
pub struct BuiltinContext {
    context: Context,
    default_client: Arc<dyn ArtifactClient>,
}

impl BuiltinContext {
    /// Build an evaluation context around a default client.
    pub fn new(context: Context, default_client: Arc<dyn ArtifactClient>) -> Self {
        Self {
            context,
            default_client,
        }
    }

    /// The execution context threaded through this evaluation.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The active artifact client for this evaluation.
    pub fn client(&self) -> Arc<dyn ArtifactClient> {
        self.context.client_or(&self.default_client)
    }
}

type BuiltinFn = dyn Fn(BuiltinContext, Vec<Value>) -> BoxFuture<'static, EvalResult> + Send + Sync;

/// A named, documented extension function of fixed arity.
#[derive(Clone)]
pub struct Builtin {
    name: &'static str,
    description: &'static str,
    arity: usize,
    func: Arc<BuiltinFn>,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl Builtin {
    /// Declare a builtin.
    ///
    /// `func` receives its own clone of the evaluation context and the
    /// operand terms; both are cheap to hand over.
    pub fn new<F, Fut>(name: &'static str, description: &'static str, arity: usize, func: F) -> Self
    where
        F: Fn(BuiltinContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EvalResult> + Send + 'static,
    {
        let func = move |bctx: BuiltinContext, operands: Vec<Value>| -> BoxFuture<'static, EvalResult> {
            Box::pin(func(bctx, operands))
        };
        Self {
            name,
            description,
            arity,
            func: Arc::new(func),
        }
    }

    /// The name policies invoke this builtin under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Human-readable description, for introspection tooling.
    pub fn description(&self) -> &'static str {
        self.description
    }

    /// Number of operands the builtin accepts.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Invoke the builtin, checking arity first.
    pub async fn call(&self, bctx: &BuiltinContext, operands: &[Value]) -> EvalResult {
        if operands.len() != self.arity {
            return Err(EvalError::Arity {
                name: self.name,
                expected: self.arity,
                actual: operands.len(),
            });
        }
        (self.func)(bctx.clone(), operands.to_vec()).await
    }
}

/// The set of extension functions exposed to the evaluator.
#[derive(Debug, Default)]
pub struct Registry {
    builtins: HashMap<&'static str, Builtin>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builtin under its declared name, replacing any
    /// previous registration.
    pub fn register(&mut self, builtin: Builtin) {
        if let Some(previous) = self.builtins.insert(builtin.name(), builtin) {
            tracing::warn!(name = previous.name(), "replacing registered builtin");
        }
    }

    /// Look up a builtin by name.
    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.builtins.get(name)
    }

    /// Iterate the registered builtins, for introspection.
    pub fn iter(&self) -> impl Iterator<Item = &Builtin> {
        self.builtins.values()
    }

    /// Invoke a builtin by name.
    pub async fn call(&self, name: &str, bctx: &BuiltinContext, operands: &[Value]) -> EvalResult {
        let builtin = self
            .get(name)
            .ok_or_else(|| EvalError::UnknownBuiltin(name.to_string()))?;
        builtin.call(bctx, operands).await
    }
}
