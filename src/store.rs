//! Per-request value store.
//!
//! A string-keyed map holding values of any `'static + Send` type. Nothing is
//! typed at the key level: every read names the type it expects and gets
//! `None` back if the key is unset *or* holds something else. Callers treat
//! both cases the same way.
//!
//! ```rust
//! use strand::Store;
//!
//! let mut store = Store::new();
//! store.set("user", String::from("alice"));
//!
//! assert_eq!(store.get::<String>("user").map(String::as_str), Some("alice"));
//! assert!(store.get::<u64>("user").is_none()); // wrong type reads as absent
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Heterogeneous key/value container owned by a single [`Context`](crate::Context).
#[derive(Default)]
pub struct Store {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl Store {
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    /// Inserts `value` under `key`, replacing whatever was there.
    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    /// True when `key` holds a value of any type.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Removes and returns the value under `key` if it is a `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if !self.values.get(key)?.is::<T>() {
            return None;
        }
        let boxed = self.values.remove(key)?;
        boxed.downcast::<T>().ok().map(|b| *b)
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Application-wide values, fixed when the [`App`](crate::App) is built.
///
/// Shared by every request through the app's `Arc`, so values must be
/// `Send + Sync`. Reads only; state that changes per request belongs behind
/// its own synchronization (an atomic, a `Mutex`) stored here.
#[derive(Default)]
pub struct SharedStore {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    pub(crate) fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}
