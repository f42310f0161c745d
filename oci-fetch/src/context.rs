//! Request-scoped execution context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::client::ArtifactClient;

/// An immutable, request-scoped carrier of typed values.
///
/// [`Context::with`] returns a derived context; the original is
/// unaffected, and sibling contexts derived before the call never
/// observe the new value. Values are keyed by type, so a lookup can
/// only ever yield a value of the requested type.
#[derive(Clone, Default)]
pub struct Context {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .finish()
    }
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context carrying `value`, leaving `self` untouched.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(&self, value: T) -> Self {
        let mut values = self.values.clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self { values }
    }

    /// Look up a value by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref())
    }

    /// Derive a context in which `client` overrides the active
    /// artifact client.
    #[must_use]
    pub fn with_client(&self, client: Arc<dyn ArtifactClient>) -> Self {
        self.with(ClientOverride(client))
    }

    /// The active artifact client: the override installed with
    /// [`Context::with_client`] if present, else `default`.
    pub fn client_or(&self, default: &Arc<dyn ArtifactClient>) -> Arc<dyn ArtifactClient> {
        self.get::<ClientOverride>()
            .map(|o| o.0.clone())
            .unwrap_or_else(|| default.clone())
    }
}

#[derive(Clone)]
struct ClientOverride(Arc<dyn ArtifactClient>);
