//! Conflict resolution between a local and a remote cart.
//!
//! Resolution is a pure function of the local items, the remote items, the
//! sync baseline and a strategy. It reads no clock and no shared state, so
//! the same input always yields the same output.

use quotecart_core::{CartItem, ConflictStrategy, ItemId, QuoteId};
use std::collections::{HashMap, HashSet};

/// What a resolution changed, relative to the local cart.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConflictRecord {
    /// Lines in the result that were not in the local cart.
    pub added: Vec<CartItem>,
    /// Local lines absent from the result.
    pub removed: Vec<CartItem>,
    /// Result lines that replaced a local line with different content.
    pub overwritten: Vec<CartItem>,
    /// Remote lines whose content lost to the local copy.
    pub remote_overridden: Vec<CartItem>,
    /// Local additions since the baseline that were dropped.
    ///
    /// Non-empty means the resolution lost local work.
    pub discarded_local: Vec<ItemId>,
}

impl ConflictRecord {
    /// Returns true if local additions were dropped.
    pub fn is_lossy(&self) -> bool {
        !self.discarded_local.is_empty()
    }

    /// Returns true if the result equals the local cart.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.overwritten.is_empty()
    }
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The conflict was resolved.
    Resolved {
        /// Strategy that produced the result.
        strategy: ConflictStrategy,
        /// Reconciled lines.
        items: Vec<CartItem>,
        /// Changes relative to the local cart.
        record: ConflictRecord,
        /// Whether the result differs from the remote copy and must be
        /// pushed.
        push_required: bool,
    },
    /// The strategy defers to an outside decision.
    Pending,
}

/// Stateless conflict resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    /// Creates a resolver.
    pub fn new() -> Self {
        Self
    }

    /// Resolves `local` against `remote` with `strategy`.
    ///
    /// `baseline` is the content both sides last agreed on. It decides which
    /// local lines are additions that `server-wins` discards.
    pub fn resolve(
        &self,
        local: &[CartItem],
        remote: &[CartItem],
        baseline: &[CartItem],
        strategy: ConflictStrategy,
    ) -> Resolution {
        let items = match strategy {
            ConflictStrategy::PromptUser => return Resolution::Pending,
            ConflictStrategy::ServerWins => remote.to_vec(),
            ConflictStrategy::ClientWins => local.to_vec(),
            ConflictStrategy::Merge => merge(local, remote),
        };

        let mut record = diff(local, &items);
        record.remote_overridden = overridden(remote, &items);
        if strategy == ConflictStrategy::ServerWins {
            record.discarded_local = discarded(local, remote, baseline);
        }

        Resolution::Resolved {
            strategy,
            push_required: !same_contents(&items, remote),
            items,
            record,
        }
    }
}

/// Item-level merge keyed by quote.
///
/// One-sided lines are kept. For lines on both sides with different
/// content the newer `last_updated` wins, ties going to local. Local order
/// comes first, then remote-only lines in remote order.
fn merge(local: &[CartItem], remote: &[CartItem]) -> Vec<CartItem> {
    let remote_by_quote: HashMap<&QuoteId, &CartItem> =
        remote.iter().map(|i| (&i.quote.id, i)).collect();
    let local_quotes: HashSet<&QuoteId> = local.iter().map(|i| &i.quote.id).collect();

    let mut merged: Vec<CartItem> = local
        .iter()
        .map(|mine| match remote_by_quote.get(&mine.quote.id) {
            Some(theirs) if !mine.same_content(theirs) && theirs.last_updated > mine.last_updated => {
                (*theirs).clone()
            }
            _ => mine.clone(),
        })
        .collect();

    merged.extend(
        remote
            .iter()
            .filter(|i| !local_quotes.contains(&i.quote.id))
            .cloned(),
    );
    merged
}

fn diff(local: &[CartItem], result: &[CartItem]) -> ConflictRecord {
    let local_by_quote: HashMap<&QuoteId, &CartItem> =
        local.iter().map(|i| (&i.quote.id, i)).collect();
    let result_quotes: HashSet<&QuoteId> = result.iter().map(|i| &i.quote.id).collect();

    let mut record = ConflictRecord::default();
    for item in result {
        match local_by_quote.get(&item.quote.id) {
            None => record.added.push(item.clone()),
            Some(mine) if !mine.same_content(item) => record.overwritten.push(item.clone()),
            Some(_) => {}
        }
    }
    record.removed = local
        .iter()
        .filter(|i| !result_quotes.contains(&i.quote.id))
        .cloned()
        .collect();
    record
}

fn overridden(remote: &[CartItem], result: &[CartItem]) -> Vec<CartItem> {
    let result_by_quote: HashMap<&QuoteId, &CartItem> =
        result.iter().map(|i| (&i.quote.id, i)).collect();
    remote
        .iter()
        .filter(|theirs| {
            result_by_quote
                .get(&theirs.quote.id)
                .is_some_and(|kept| !kept.same_content(theirs))
        })
        .cloned()
        .collect()
}

fn discarded(local: &[CartItem], remote: &[CartItem], baseline: &[CartItem]) -> Vec<ItemId> {
    let known: HashSet<&QuoteId> = baseline
        .iter()
        .chain(remote.iter())
        .map(|i| &i.quote.id)
        .collect();
    local
        .iter()
        .filter(|i| !known.contains(&i.quote.id))
        .map(|i| i.id)
        .collect()
}

/// Returns true if both sides hold the same quotes with the same content in
/// the same order.
pub(crate) fn same_contents(a: &[CartItem], b: &[CartItem]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_content(y))
}
