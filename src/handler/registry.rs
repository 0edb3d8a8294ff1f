//! Handler registry for routing requests by entry key.
//!
//! A request names an optional entry (the module the caller wants to run).
//! The registry maps entry keys to handlers and falls back to a default
//! handler for requests without a registered entry. A default entry key
//! stands in for requests that name none.
//!
//! # Example
//!
//! ```
//! use worker_fetch::handler::HandlerRegistry;
//! use worker_fetch::{Request, Response};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("ssr", |_req: Request| async move { Ok(Response::ok("rendered")) });
//! registry.set_fallback(|_req: Request| async move { Ok(Response::new(404)) });
//!
//! assert!(registry.resolve(Some("ssr")).is_ok());
//! assert!(registry.resolve(None).is_ok());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::http::{Request, Response};

/// Error type handlers may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Response, BoxError>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fetch handler: maps a request to a response.
///
/// Implemented for every `Fn(Request) -> impl Future<Output = HandlerResult>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(request))
    }
}

/// Label used in errors for requests without an entry.
const DEFAULT_ENTRY: &str = "<default>";

/// Registry mapping entry keys to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Arc<dyn Handler>>,
    fallback: Option<Arc<dyn Handler>>,
    default_entry: Option<String>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under an entry key, replacing any previous one.
    pub fn register<F, Fut>(&mut self, entry: &str, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.entries.insert(entry.to_string(), Arc::new(handler));
    }

    /// Set the handler used when the entry is absent or unregistered.
    pub fn set_fallback<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.fallback = Some(Arc::new(handler));
    }

    /// Route requests without an entry as if they named `entry`.
    pub fn set_default_entry(&mut self, entry: impl Into<String>) {
        self.default_entry = Some(entry.into());
    }

    pub fn default_entry(&self) -> Option<&str> {
        self.default_entry.as_deref()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Number of registered entries (the fallback is not counted).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the handler for a request.
    ///
    /// A missing entry is replaced by the default entry. A registered entry
    /// wins; otherwise the fallback runs.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HandlerNotFound`] when neither exists.
    pub fn resolve(&self, entry: Option<&str>) -> Result<Arc<dyn Handler>> {
        let entry = entry.or(self.default_entry.as_deref());
        if let Some(handler) = entry.and_then(|key| self.entries.get(key)) {
            return Ok(handler.clone());
        }
        self.fallback.clone().ok_or_else(|| {
            BridgeError::HandlerNotFound(entry.unwrap_or(DEFAULT_ENTRY).to_string())
        })
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        entries.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("entries", &entries)
            .field("fallback", &self.fallback.is_some())
            .field("default_entry", &self.default_entry)
            .finish()
    }
}
