//! Per-connection attribute storage
//!
//! Stages communicate with each other through the [`AttributeStore`] owned by
//! every connection. Keys are namespaced by the stage that owns them
//! (`http.*`, `websocket.*`, `wamp.*`).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A type-erased attribute value
pub type AttributeValue = Box<dyn Any + Send + Sync>;

/// Key holding the connection id, set by the transport
pub const RESOURCE_ID: &str = "resource_id";

/// Key holding the peer IP address, set by the transport
pub const REMOTE_ADDRESS: &str = "remote_address";

/// Typed key/value bag scoped to one connection
///
/// Values are stored type-erased and read back by type. A read with the wrong
/// type behaves as if the key were absent.
#[derive(Default)]
pub struct AttributeStore {
    attributes: Mutex<HashMap<String, AttributeValue>>,
}

impl AttributeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AttributeValue>> {
        self.attributes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a clone of the value stored under `name`
    pub fn get<T>(&self, name: &str) -> Option<T>
    where
        T: Any + Clone,
    {
        self.lock()
            .get(name)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Get the value stored under `name`, or `default` when absent
    pub fn get_or<T>(&self, name: &str, default: T) -> T
    where
        T: Any + Clone,
    {
        self.get(name).unwrap_or(default)
    }

    /// Store `value` under `name`, replacing any previous value
    pub fn set<T>(&self, name: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.lock().insert(name.into(), Box::new(value));
    }

    /// Check whether a value is stored under `name`
    pub fn has(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Remove the value stored under `name`
    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    /// Replace the whole contents of the store
    pub fn replace<I>(&self, attributes: I)
    where
        I: IntoIterator<Item = (String, AttributeValue)>,
    {
        let mut guard = self.lock();
        guard.clear();
        guard.extend(attributes);
    }

    /// Names of all stored attributes, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Mutate the value stored under `name` in place
    ///
    /// Returns `None` when the key is absent or holds another type. The store
    /// is locked while `f` runs, so `f` must not access the same store.
    pub fn update<T, R>(&self, name: &str, f: impl FnOnce(&mut T) -> R) -> Option<R>
    where
        T: Any,
    {
        self.lock()
            .get_mut(name)
            .and_then(|value| value.downcast_mut::<T>())
            .map(f)
    }

    /// Number of stored attributes
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for AttributeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeStore")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn get_returns_stored_value() {
        let store = AttributeStore::new();
        store.set("http.headers_received", true);

        assert_eq!(store.get::<bool>("http.headers_received"), Some(true));
        assert!(store.has("http.headers_received"));
    }

    #[test]
    fn get_or_falls_back_for_missing_or_mistyped_values() {
        let store = AttributeStore::new();
        store.set("wamp.session_id", String::from("abc"));

        assert_eq!(store.get_or("missing", 7u32), 7);
        assert_eq!(store.get_or("wamp.session_id", 1u32), 1);
        assert_eq!(
            store.get_or("wamp.session_id", String::new()),
            "abc".to_string()
        );
    }

    #[test]
    fn remove_and_replace() {
        let store = AttributeStore::new();
        store.set("a", 1u8);
        store.set("b", 2u8);
        store.remove("a");
        assert_eq!(store.keys(), vec!["b".to_string()]);

        store.replace(vec![
            ("c".to_string(), Box::new(3u8) as AttributeValue),
            ("d".to_string(), Box::new(4u8) as AttributeValue),
        ]);
        assert_eq!(store.keys(), vec!["c".to_string(), "d".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn update_mutates_in_place() {
        let store = AttributeStore::new();
        store.set("wamp.subscriptions", HashSet::<String>::new());

        let inserted = store.update("wamp.subscriptions", |set: &mut HashSet<String>| {
            set.insert("topic".to_string())
        });
        assert_eq!(inserted, Some(true));

        let subscriptions: HashSet<String> = store.get("wamp.subscriptions").unwrap();
        assert!(subscriptions.contains("topic"));

        let missing = store.update("nope", |value: &mut u8| *value += 1);
        assert_eq!(missing, None);
    }
}
