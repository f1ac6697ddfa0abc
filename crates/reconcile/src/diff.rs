//! Field-level diff between actual and expected state
//!
//! A resource's `diff` builds its changes object one field at a time through
//! a [`Differ`]. Every helper follows the same rule: a field the expected
//! state leaves unset (`None`) is never a change, so the engine never
//! reverts fields it does not manage.

use crate::task::{Link, ResolveLinks};
use std::collections::BTreeMap;

/// How a collection-valued field is compared.
///
/// `None` in the expected state always means "leave untouched"; the policy
/// only applies when the expected collection is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPolicy {
    /// The expected collection is authoritative and order matters.
    /// `Some(empty)` clears the field.
    Replace,
    /// The expected collection is authoritative; compared ignoring order.
    Unordered,
    /// Only entries expected has and actual lacks (for maps: missing keys
    /// or differing values) are changes; extra actual entries are kept.
    /// The change holds just those entries.
    Merge,
}

/// Accumulates the names of changed fields while a changes object is built.
pub struct Differ<'a> {
    links: &'a dyn ResolveLinks,
    changed: Vec<&'static str>,
}

impl<'a> Differ<'a> {
    pub fn new(links: &'a dyn ResolveLinks) -> Self {
        Self {
            links,
            changed: Vec::new(),
        }
    }

    /// Compare a scalar field.
    pub fn field<T: PartialEq + Clone>(
        &mut self,
        name: &'static str,
        actual: &Option<T>,
        expected: &Option<T>,
    ) -> Option<T> {
        let expected = expected.as_ref()?;
        if actual.as_ref() == Some(expected) {
            return None;
        }
        self.changed.push(name);
        Some(expected.clone())
    }

    /// Compare a link field by the identifiers the links resolve to.
    ///
    /// A linked task that has no identifier yet is never equal to anything.
    pub fn link(
        &mut self,
        name: &'static str,
        actual: &Option<Link>,
        expected: &Option<Link>,
    ) -> Option<Link> {
        let expected = expected.as_ref()?;
        let same = match actual {
            Some(actual) if actual == expected => true,
            Some(actual) => match (self.links.resolve(actual), self.links.resolve(expected)) {
                (Some(a), Some(e)) => a == e,
                _ => false,
            },
            None => false,
        };
        if same {
            return None;
        }
        self.changed.push(name);
        Some(expected.clone())
    }

    /// Compare a list field under the given policy.
    pub fn list<T: Ord + Clone>(
        &mut self,
        name: &'static str,
        policy: CollectionPolicy,
        actual: &Option<Vec<T>>,
        expected: &Option<Vec<T>>,
    ) -> Option<Vec<T>> {
        let expected = expected.as_ref()?;
        let empty = Vec::new();
        let actual = actual.as_ref().unwrap_or(&empty);
        let change = match policy {
            CollectionPolicy::Replace => (actual != expected).then(|| expected.clone()),
            CollectionPolicy::Unordered => {
                (sorted(actual) != sorted(expected)).then(|| expected.clone())
            }
            CollectionPolicy::Merge => {
                let missing: Vec<T> = expected
                    .iter()
                    .filter(|item| !actual.contains(item))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then_some(missing)
            }
        };
        if change.is_some() {
            self.changed.push(name);
        }
        change
    }

    /// Compare a map field under the given policy.
    ///
    /// `Replace` and `Unordered` behave the same for maps.
    pub fn map<K: Ord + Clone, V: PartialEq + Clone>(
        &mut self,
        name: &'static str,
        policy: CollectionPolicy,
        actual: &Option<BTreeMap<K, V>>,
        expected: &Option<BTreeMap<K, V>>,
    ) -> Option<BTreeMap<K, V>> {
        let expected = expected.as_ref()?;
        let empty = BTreeMap::new();
        let actual = actual.as_ref().unwrap_or(&empty);
        let change = match policy {
            CollectionPolicy::Replace | CollectionPolicy::Unordered => {
                (actual != expected).then(|| expected.clone())
            }
            CollectionPolicy::Merge => {
                let missing: BTreeMap<K, V> = expected
                    .iter()
                    .filter(|(k, v)| actual.get(k) != Some(v))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (!missing.is_empty()).then_some(missing)
            }
        };
        if change.is_some() {
            self.changed.push(name);
        }
        change
    }

    /// Names of the fields reported as changed so far, in diff order.
    pub fn changed(&self) -> &[&'static str] {
        &self.changed
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub(crate) fn into_changed(self) -> Vec<&'static str> {
        self.changed
    }
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut items = items.to_vec();
    items.sort();
    items
}
