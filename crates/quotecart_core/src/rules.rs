//! Conditional business rules.
//!
//! A rule is a plain record: a name, a priority, an enabled flag, a
//! synchronous condition and an asynchronous action producing a
//! [`CartPatch`]. The engine runs applicable rules from highest to lowest
//! priority, merging each patch before the next condition is checked, so a
//! lower-priority rule sees what higher-priority rules did in the same pass.
//!
//! ```rust,ignore
//! engine.register(CartRule::new(
//!     "free-shipping",
//!     10,
//!     |cart| cart.total_value() >= Decimal::from(100),
//!     |_cart| async { Ok(CartPatch::new().shipping(Decimal::ZERO)) },
//! ));
//! ```

use crate::state::{CartPatch, CartState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type Condition = Arc<dyn Fn(&CartState) -> bool + Send + Sync>;
type Action = Arc<dyn Fn(Arc<CartState>) -> BoxFuture<Result<CartPatch, RuleError>> + Send + Sync>;

/// Failure reported by a rule action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RuleError(pub String);

impl From<&str> for RuleError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for RuleError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// A named, prioritized condition/action pair.
#[derive(Clone)]
pub struct CartRule {
    name: String,
    priority: i32,
    enabled: bool,
    condition: Condition,
    action: Action,
}

impl CartRule {
    /// Creates an enabled rule.
    pub fn new<C, A, Fut>(name: impl Into<String>, priority: i32, condition: C, action: A) -> Self
    where
        C: Fn(&CartState) -> bool + Send + Sync + 'static,
        A: Fn(Arc<CartState>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CartPatch, RuleError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            priority,
            enabled: true,
            condition: Arc::new(condition),
            action: Arc::new(move |state| Box::pin(action(state))),
        }
    }

    /// Returns the rule disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Returns the rule name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the priority. Higher runs first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns true if the rule takes part in evaluation.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns true if the rule is enabled and its condition holds.
    pub fn applies_to(&self, state: &CartState) -> bool {
        self.enabled && (self.condition)(state)
    }
}

impl fmt::Debug for CartRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// A rule that changed the cart during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRule {
    /// Rule name.
    pub name: String,
    /// Rule priority.
    pub priority: i32,
}

/// A rule that was skipped because its action failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    /// Rule name.
    pub name: String,
    /// Why it failed.
    pub error: String,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePass {
    /// Rules whose patches were merged, in execution order.
    pub applied: Vec<AppliedRule>,
    /// Rules that failed and were skipped.
    pub failures: Vec<RuleFailure>,
}

/// Registry and evaluator of cart rules.
#[derive(Default)]
pub struct RuleEngine {
    rules: RwLock<Vec<CartRule>>,
}

impl RuleEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule, replacing any rule with the same name.
    pub fn register(&self, rule: CartRule) {
        let mut rules = self.rules.write();
        rules.retain(|r| r.name != rule.name);
        rules.push(rule);
    }

    /// Removes a rule. Returns true if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    /// Enables or disables a rule. Returns true if it exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns the number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    /// Returns true if no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Returns all rules in evaluation order: highest priority first,
    /// registration order among equal priorities.
    pub fn ordered(&self) -> Vec<CartRule> {
        let mut rules = self.rules.read().clone();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Returns the rules applicable to `state`, highest priority first.
    pub fn evaluate(&self, state: &CartState) -> Vec<CartRule> {
        self.ordered()
            .into_iter()
            .filter(|r| r.applies_to(state))
            .collect()
    }

    /// Runs one pass over `state`.
    ///
    /// Each rule's condition is checked against the state as left by the
    /// rules before it. A failing action, or a patch that cannot be applied,
    /// skips that rule only.
    pub async fn apply(&self, state: &mut CartState, now: DateTime<Utc>) -> RulePass {
        let mut pass = RulePass::default();

        for rule in self.ordered() {
            if !rule.applies_to(state) {
                continue;
            }

            let view = Arc::new(state.clone());
            let patch = match (rule.action)(view).await {
                Ok(patch) => patch,
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "rule action failed");
                    pass.failures.push(RuleFailure {
                        name: rule.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if let Err(e) = state.apply_patch(&patch, now) {
                warn!(rule = %rule.name, error = %e, "rule patch rejected");
                pass.failures.push(RuleFailure {
                    name: rule.name.clone(),
                    error: e.to_string(),
                });
                continue;
            }

            debug!(rule = %rule.name, priority = rule.priority, "rule applied");
            pass.applied.push(AppliedRule {
                name: rule.name.clone(),
                priority: rule.priority,
            });
        }

        pass
    }
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &*self.rules.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartConfig;
    use crate::item::Quote;
    use rust_decimal::Decimal;

    fn empty() -> CartState {
        CartState::new(&CartConfig::default(), Utc::now())
    }

    fn gift() -> Quote {
        Quote::new("GIFT", "Free gift", Decimal::ZERO)
    }

    #[tokio::test]
    async fn higher_priority_effects_visible_to_lower() {
        let engine = RuleEngine::new();
        // Registered first but lower priority: fires only if the gift is present.
        engine.register(CartRule::new(
            "tax-on-gift",
            5,
            |cart| cart.contains_quote(&"GIFT".into()),
            |_| async { Ok(CartPatch::new().tax(Decimal::ONE)) },
        ));
        engine.register(CartRule::new(
            "add-gift",
            10,
            |cart| !cart.contains_quote(&"GIFT".into()),
            |_| async { Ok(CartPatch::new().add_quote(gift(), None)) },
        ));

        let mut state = empty();
        let pass = engine.apply(&mut state, Utc::now()).await;

        let names: Vec<_> = pass.applied.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["add-gift", "tax-on-gift"]);
        assert_eq!(state.metadata.tax_estimate, Some(Decimal::ONE));
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn failing_action_is_isolated() {
        let engine = RuleEngine::new();
        engine.register(CartRule::new(
            "broken",
            20,
            |_| true,
            |_| async { Err(RuleError::from("backend down")) },
        ));
        engine.register(CartRule::new(
            "shipping",
            1,
            |_| true,
            |_| async { Ok(CartPatch::new().shipping(Decimal::TEN)) },
        ));

        let mut state = empty();
        let pass = engine.apply(&mut state, Utc::now()).await;

        assert_eq!(pass.failures.len(), 1);
        assert_eq!(pass.failures[0].name, "broken");
        assert_eq!(pass.failures[0].error, "backend down");
        assert_eq!(pass.applied.len(), 1);
        assert_eq!(state.metadata.shipping_estimate, Some(Decimal::TEN));
    }

    #[tokio::test]
    async fn invalid_patch_is_isolated() {
        let engine = RuleEngine::new();
        engine.register(CartRule::new(
            "remove-missing",
            1,
            |_| true,
            |_| async { Ok(CartPatch::new().remove_quote("nope")) },
        ));

        let mut state = empty();
        let pass = engine.apply(&mut state, Utc::now()).await;
        assert!(pass.applied.is_empty());
        assert_eq!(pass.failures.len(), 1);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn disabled_rules_are_skipped() {
        let engine = RuleEngine::new();
        engine.register(
            CartRule::new(
                "off",
                1,
                |_| true,
                |_| async { Ok(CartPatch::new().tax(Decimal::ONE)) },
            )
            .disabled(),
        );
        let state = empty();
        assert!(engine.evaluate(&state).is_empty());

        assert!(engine.set_enabled("off", true));
        assert_eq!(engine.evaluate(&state).len(), 1);
        assert!(!engine.set_enabled("missing", true));
    }

    #[test]
    fn evaluate_orders_by_priority_then_registration() {
        let engine = RuleEngine::new();
        for (name, priority) in [("a", 1), ("b", 5), ("c", 5), ("d", 9)] {
            engine.register(CartRule::new(name, priority, |_| true, |_| async {
                Ok(CartPatch::new())
            }));
        }
        let names: Vec<_> = engine
            .evaluate(&empty())
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn register_replaces_same_name() {
        let engine = RuleEngine::new();
        engine.register(CartRule::new("r", 1, |_| true, |_| async { Ok(CartPatch::new()) }));
        engine.register(CartRule::new("r", 7, |_| true, |_| async { Ok(CartPatch::new()) }));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.ordered()[0].priority(), 7);
        assert!(engine.unregister("r"));
        assert!(engine.is_empty());
    }
}
