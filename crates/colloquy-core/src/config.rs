//! Hierarchical Configuration Store
//!
//! A key/value store with local tombstones and an ordered list of parent
//! stores ("brokers") consulted when a key is not defined locally.
//!
//! ## Resolution order
//!
//! **The last broker that defines a key wins, not the first.** `get` folds
//! over the brokers in list order, passing each broker the previous result
//! as its fallback:
//!
//! ```text
//! C.brokers = [P1, P2]      P1: k = "a"      P2: k = "b"
//!
//! C.get(k) = P2.get(k, P1.get(k, None)) = "b"
//! ```
//!
//! `has` is OR-combined across brokers, so a `true` from `has` says nothing
//! about which broker `get` will resolve through.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::lock::{read, write};

#[derive(Clone, Debug, PartialEq, Eq)]
enum Entry {
    Value(String),
    /// Masks the key here without touching any broker
    Tombstone,
}

/// Hierarchical, tombstone-capable key/value store
#[derive(Debug, Default)]
pub struct ConfigStore {
    entries: RwLock<HashMap<String, Entry>>,
    brokers: RwLock<Vec<Arc<ConfigStore>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that falls back to `brokers` (in order, last wins)
    pub fn with_brokers(brokers: impl IntoIterator<Item = Arc<ConfigStore>>) -> Self {
        Self {
            entries: RwLock::default(),
            brokers: RwLock::new(brokers.into_iter().collect()),
        }
    }

    /// Resolve `key`, returning `None` if it is absent or tombstoned
    pub fn get(&self, key: &str) -> Option<String> {
        self.get_or(key, None)
    }

    /// Resolve `key` with an explicit fallback.
    ///
    /// A local entry (value or tombstone) short-circuits; a local tombstone
    /// yields `None` even when a fallback is given. Otherwise each broker is
    /// asked in turn with the previous answer as its fallback.
    pub fn get_or(&self, key: &str, fallback: Option<String>) -> Option<String> {
        if let Some(entry) = read(&self.entries).get(key) {
            return match entry {
                Entry::Value(value) => Some(value.clone()),
                Entry::Tombstone => None,
            };
        }

        self.brokers()
            .iter()
            .fold(fallback, |acc, broker| broker.get_or(key, acc))
    }

    /// Resolve and parse `key`; a value that does not parse is a config error
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    Error::Config(format!("invalid value {raw:?} for '{key}': {e}"))
                })
            })
            .transpose()
    }

    /// Whether `key` is visible here: a local tombstone hides it, otherwise
    /// any broker defining it is enough
    pub fn has(&self, key: &str) -> bool {
        match read(&self.entries).get(key) {
            Some(Entry::Value(_)) => return true,
            Some(Entry::Tombstone) => return false,
            None => {}
        }

        self.brokers().iter().any(|broker| broker.has(key))
    }

    /// Write a local value
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.assign(key, Some(value.into()));
    }

    /// Write a local value, or a tombstone when `value` is `None`
    pub fn assign(&self, key: impl Into<String>, value: Option<String>) {
        let entry = value.map_or(Entry::Tombstone, Entry::Value);
        write(&self.entries).insert(key.into(), entry);
    }

    /// Tombstone `key` locally; brokers keep their values
    pub fn delete(&self, key: impl Into<String>) {
        self.assign(key, None);
    }

    /// Remove every local entry, tombstones included
    pub fn clear(&self) {
        write(&self.entries).clear();
    }

    /// Append brokers to the fallback list.
    ///
    /// Fails without attaching anything if one of `stores` is this store or
    /// already falls back to it.
    pub fn attach(&self, stores: impl IntoIterator<Item = Arc<ConfigStore>>) -> Result<()> {
        let stores: Vec<_> = stores.into_iter().collect();

        if stores.iter().any(|store| store.reaches(self)) {
            return Err(Error::Config(
                "attaching this store would make it its own broker".into(),
            ));
        }

        write(&self.brokers).extend(stores);
        Ok(())
    }

    /// Current brokers, in resolution order
    pub fn brokers(&self) -> Vec<Arc<ConfigStore>> {
        read(&self.brokers).clone()
    }

    /// Local keys, tombstoned ones included
    pub fn local_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = read(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Flatten into a plain map: brokers in order (later override earlier),
    /// then local values on top. Local tombstones are skipped, not applied.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for broker in self.brokers() {
            merged.extend(broker.snapshot());
        }

        for (key, entry) in read(&self.entries).iter() {
            if let Entry::Value(value) = entry {
                merged.insert(key.clone(), value.clone());
            }
        }

        merged
    }

    fn reaches(&self, target: &ConfigStore) -> bool {
        std::ptr::eq(self, target) || self.brokers().iter().any(|b| b.reaches(target))
    }
}

impl Serialize for ConfigStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}
