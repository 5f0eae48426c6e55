//! The handler registry: a name -> callable lookup consumed by the
//! [`crate::executor::Executor`]. This is the in-process collaborator named
//! in §6; the concrete handlers registered into it are out of scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// The error a handler raises on failure. The executor formats this as
/// `"<kind>: <message>"`, or just `<kind>` when `message` is empty.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for HandlerError {}

/// A named callable accepting the opaque job payload. Handlers signal
/// failure by returning `Err`; any such failure is caught by the Executor
/// and reported as the job's error, never propagated as a Rust panic.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, payload: Value) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    async fn call(&self, payload: Value) -> Result<(), HandlerError> {
        (self)(payload).await
    }
}

/// Informational metadata about a registered handler. Purely descriptive:
/// the job row's own `max_attempts`/`timeout_secs` columns are authoritative,
/// this is not consulted by the Executor or LeaseCoordinator.
#[derive(Debug, Clone, Default)]
pub struct HandlerMetadata {
    pub description: Option<String>,
    pub default_timeout_secs: Option<i32>,
    pub default_max_attempts: Option<i32>,
}

struct Entry {
    handler: Arc<dyn Handler>,
    metadata: HandlerMetadata,
}

/// Process-wide handler lookup, owned by the worker's composition root and
/// injected into the Executor. Registration is explicit — there is no
/// import-time side effect that populates it.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Entry>,
}

/// Raised by `register` when `name` is already registered.
#[derive(Debug, Clone, thiserror::Error)]
#[error("handler '{0}' is already registered")]
pub struct HandlerAlreadyRegistered(pub String);

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. Fails if the name collides with an
    /// existing registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Handler + 'static,
        metadata: HandlerMetadata,
    ) -> Result<(), HandlerAlreadyRegistered> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(HandlerAlreadyRegistered(name));
        }
        self.entries.insert(
            name,
            Entry {
                handler: Arc::new(handler),
                metadata,
            },
        );
        Ok(())
    }

    /// Look up a handler by name. Returns `None` on miss — the Executor is
    /// responsible for formatting the registry-miss error message.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.entries.get(name).map(|e| e.handler.clone())
    }

    pub fn metadata(&self, name: &str) -> Option<HandlerMetadata> {
        self.entries.get(name).map(|e| e.metadata.clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a handler. Returns true iff one was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_payload: Value) -> Result<(), HandlerError> {
        Ok(())
    }

    #[test]
    fn register_rejects_name_collision() {
        let mut registry = HandlerRegistry::new();
        registry
            .register("send_email", noop, HandlerMetadata::default())
            .unwrap();
        let err = registry
            .register("send_email", noop, HandlerMetadata::default())
            .unwrap_err();
        assert_eq!(err.0, "send_email");
    }

    #[test]
    fn list_is_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("zeta", noop, HandlerMetadata::default()).unwrap();
        registry.register("alpha", noop, HandlerMetadata::default()).unwrap();
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn unregister_and_clear() {
        let mut registry = HandlerRegistry::new();
        registry.register("only", noop, HandlerMetadata::default()).unwrap();
        assert!(registry.exists("only"));
        assert!(registry.unregister("only"));
        assert!(!registry.exists("only"));
        assert!(!registry.unregister("only"));

        registry.register("a", noop, HandlerMetadata::default()).unwrap();
        registry.register("b", noop, HandlerMetadata::default()).unwrap();
        registry.clear();
        assert!(registry.is_empty());
    }
}
