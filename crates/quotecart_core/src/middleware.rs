//! Before/after hooks around cart mutations.

use crate::error::{CartError, CartResult};
use crate::event::CartEvent;
use crate::rules::{BoxFuture, RulePass};
use crate::state::CartState;
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Error returned by a hook. From a `before` hook it vetoes the mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// What a committed mutation produced, as seen by `after` hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// The committed event.
    pub event: CartEvent,
    /// Rule pass that followed the mutation.
    pub rules: RulePass,
    /// Sequence of the history snapshot taken for the mutation.
    pub history_sequence: u64,
}

type BeforeHook = Arc<dyn Fn(CartEvent, Arc<CartState>) -> BoxFuture<Result<(), HookError>> + Send + Sync>;
type AfterHook = Arc<
    dyn Fn(CartEvent, Arc<CartState>, Arc<MutationOutcome>) -> BoxFuture<Result<(), HookError>>
        + Send
        + Sync,
>;

/// A named pair of optional hooks.
#[derive(Clone)]
pub struct CartMiddleware {
    name: String,
    before: Option<BeforeHook>,
    after: Option<AfterHook>,
}

impl CartMiddleware {
    /// Creates a middleware with no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            before: None,
            after: None,
        }
    }

    /// Sets the hook run before the mutation is applied.
    ///
    /// It receives the pending event and the state before the mutation.
    #[must_use]
    pub fn before<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CartEvent, Arc<CartState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.before = Some(Arc::new(move |event, state| Box::pin(hook(event, state))));
        self
    }

    /// Sets the hook run after the mutation and rule pass are committed.
    #[must_use]
    pub fn after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(CartEvent, Arc<CartState>, Arc<MutationOutcome>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.after = Some(Arc::new(move |event, state, outcome| {
            Box::pin(hook(event, state, outcome))
        }));
        self
    }

    /// Returns the middleware name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CartMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartMiddleware")
            .field("name", &self.name)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .finish()
    }
}

/// Ordered list of middlewares wrapped around every mutation.
#[derive(Debug, Default)]
pub struct MiddlewarePipeline {
    middlewares: RwLock<Vec<CartMiddleware>>,
}

impl MiddlewarePipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware. Hooks run in registration order.
    pub fn register(&self, middleware: CartMiddleware) {
        self.middlewares.write().push(middleware);
    }

    /// Removes all middlewares with the given name. Returns true if any existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut middlewares = self.middlewares.write();
        let before = middlewares.len();
        middlewares.retain(|m| m.name != name);
        middlewares.len() != before
    }

    /// Returns the number of registered middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.read().len()
    }

    /// Returns true if no middlewares are registered.
    pub fn is_empty(&self) -> bool {
        self.middlewares.read().is_empty()
    }

    /// Runs all `before` hooks. The first rejection stops the run.
    pub async fn run_before(&self, event: &CartEvent, state: &Arc<CartState>) -> CartResult<()> {
        let middlewares = self.middlewares.read().clone();
        for middleware in middlewares {
            let Some(hook) = &middleware.before else {
                continue;
            };
            if let Err(e) = hook(event.clone(), Arc::clone(state)).await {
                return Err(CartError::rejected(middleware.name, e.0));
            }
        }
        Ok(())
    }

    /// Runs all `after` hooks. Failures are logged and counted, never
    /// propagated.
    pub async fn run_after(
        &self,
        event: &CartEvent,
        state: &Arc<CartState>,
        outcome: &Arc<MutationOutcome>,
    ) -> usize {
        let middlewares = self.middlewares.read().clone();
        let mut failures = 0;
        for middleware in middlewares {
            let Some(hook) = &middleware.after else {
                continue;
            };
            if let Err(e) = hook(event.clone(), Arc::clone(state), Arc::clone(outcome)).await {
                warn!(middleware = %middleware.name, error = %e, "after hook failed");
                failures += 1;
            }
        }
        failures
    }
}
