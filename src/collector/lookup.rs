//! Indexed lookup caches
//!
//! A fetched collection together with its id index. Built once per run and
//! reused for every join afterwards.

use std::collections::HashMap;

/// How keys are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    Sensitive,
    /// ASCII case-folded on insert and on lookup
    Insensitive,
}

impl KeyCase {
    fn normalize<'a>(self, key: &'a str) -> std::borrow::Cow<'a, str> {
        match self {
            KeyCase::Sensitive => key.into(),
            KeyCase::Insensitive => key.to_ascii_lowercase().into(),
        }
    }
}

/// A deduplicated collection indexed by external reference id
#[derive(Debug, Clone)]
pub struct Indexed<T> {
    items: Vec<T>,
    positions: HashMap<String, usize>,
    case: KeyCase,
}

impl<T> Indexed<T> {
    /// Index `items` by `key`. The first item seen for a key is kept, later
    /// duplicates are dropped from the collection.
    pub fn build(items: Vec<T>, case: KeyCase, key: impl Fn(&T) -> &str) -> Self {
        let mut kept = Vec::with_capacity(items.len());
        let mut positions = HashMap::with_capacity(items.len());

        for item in items {
            let k = case.normalize(key(&item)).into_owned();
            if positions.contains_key(&k) {
                tracing::debug!("Dropping duplicate record {}", k);
                continue;
            }
            positions.insert(k, kept.len());
            kept.push(item);
        }

        Self {
            items: kept,
            positions,
            case,
        }
    }

    /// `None` means no such resource
    pub fn get(&self, key: &str) -> Option<&T> {
        self.positions
            .get(self.case.normalize(key).as_ref())
            .map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
