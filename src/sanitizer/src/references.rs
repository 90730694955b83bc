//! Reference resolution and the in-memory valid-ID index.
//!
//! Target ID sets are loaded once per phase, one store call per referenced
//! collection, and every reference is then checked with a hash-set lookup.

use std::collections::{BTreeSet, HashMap, HashSet};

use common::{CollectionName, DocumentStore, StoreError};
use serde_json::{Map, Value};

use crate::policy::{IssueType, RefTarget, ReferenceRule};

/// One reference value found at a field path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefSlot<'a> {
    Present(&'a str),
    /// Absent or null.
    Missing,
    /// Present but not a string, or a path segment of the wrong shape.
    Malformed,
}

/// Resolve every reference value of `path` in a document body.
///
/// `a.b` descends into objects and `a[]` iterates an array. An absent array
/// holds no references; an absent scalar yields a single [`RefSlot::Missing`].
pub fn resolve<'a>(body: &'a Map<String, Value>, path: &str) -> Vec<RefSlot<'a>> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut slots = Vec::new();
    walk_object(body, &segments, &mut slots);
    slots
}

fn walk_object<'a>(object: &'a Map<String, Value>, segments: &[&str], out: &mut Vec<RefSlot<'a>>) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };

    match segment.strip_suffix("[]") {
        Some(field) => match object.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    walk_value(item, rest, out);
                }
            }
            Some(_) => out.push(RefSlot::Malformed),
        },
        None => match object.get(*segment) {
            None | Some(Value::Null) => out.push(RefSlot::Missing),
            Some(value) => walk_value(value, rest, out),
        },
    }
}

fn walk_value<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<RefSlot<'a>>) {
    if rest.is_empty() {
        out.push(match value {
            Value::String(id) => RefSlot::Present(id),
            Value::Null => RefSlot::Missing,
            _ => RefSlot::Malformed,
        });
        return;
    }

    match value {
        Value::Object(object) => walk_object(object, rest, out),
        Value::Null => out.push(RefSlot::Missing),
        _ => out.push(RefSlot::Malformed),
    }
}

/// Valid-ID sets of the collections a phase references.
#[derive(Debug, Default, Clone)]
pub struct ReferenceIndex {
    sets: HashMap<CollectionName, HashSet<String>>,
}

impl ReferenceIndex {
    /// Load the ID set of every given collection, one query each.
    pub async fn load(
        store: &dyn DocumentStore,
        collections: impl IntoIterator<Item = CollectionName>,
    ) -> Result<Self, StoreError> {
        let mut sets = HashMap::new();
        for collection in collections {
            if sets.contains_key(&collection) {
                continue;
            }
            let ids = store.ids(collection).await?;
            tracing::debug!(
                collection = %collection,
                ids = ids.len(),
                "Loaded valid ID set"
            );
            sets.insert(collection, ids);
        }
        Ok(Self { sets })
    }

    #[cfg(test)]
    pub(crate) fn from_sets(
        sets: impl IntoIterator<Item = (CollectionName, &'static [&'static str])>,
    ) -> Self {
        Self {
            sets: sets
                .into_iter()
                .map(|(collection, ids)| {
                    (collection, ids.iter().map(|id| id.to_string()).collect())
                })
                .collect(),
        }
    }

    pub fn ids(&self, collection: CollectionName) -> Option<&HashSet<String>> {
        self.sets.get(&collection)
    }

    /// Whether `id` names a document of `collection`. Unloaded collections hold nothing.
    pub fn contains(&self, collection: CollectionName, id: &str) -> bool {
        self.sets
            .get(&collection)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Whether an optional reference value is valid for `collection`.
    pub fn is_valid(&self, collection: CollectionName, id: Option<&str>) -> bool {
        id.is_some_and(|id| self.contains(collection, id))
    }

    /// Collection a rule's target resolves to for this document, if any.
    pub fn target_of(target: &RefTarget, body: &Map<String, Value>) -> Option<CollectionName> {
        match target {
            RefTarget::Collection(collection) => Some(*collection),
            RefTarget::ByKind {
                discriminator,
                kinds,
            } => {
                let kind = body.get(*discriminator)?.as_str()?.to_ascii_lowercase();
                kinds
                    .iter()
                    .find(|(name, _)| *name == kind)
                    .map(|(_, collection)| *collection)
            }
        }
    }

    /// Issue types a document violates for one rule. Empty when the document
    /// is clean for that rule.
    pub fn violations(
        &self,
        rule: &ReferenceRule,
        body: &Map<String, Value>,
    ) -> BTreeSet<IssueType> {
        let mut found = BTreeSet::new();
        let target = Self::target_of(&rule.target, body);

        for slot in resolve(body, rule.field) {
            match slot {
                RefSlot::Missing if rule.required => {
                    found.insert(IssueType::MissingRequiredField);
                }
                RefSlot::Missing => {}
                RefSlot::Malformed => {
                    found.insert(IssueType::InvalidField);
                }
                RefSlot::Present(id) => match target {
                    Some(collection) if !self.contains(collection, id) => {
                        found.insert(rule.orphan_issue);
                    }
                    _ => {}
                },
            }
        }

        found
    }
}
