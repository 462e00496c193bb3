//! A minimal, internal object pool.
//!
//! This backs the core's own buffer and message-payload reuse; it is not the
//! general-purpose, externally reusable pool utility that callers are
//! assumed to bring themselves.

use std::sync::Mutex;

/// A thread-safe pool of reusable `T`s.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    new_item: fn() -> T,
    reset_item: fn(&mut T),
}

impl<T> Pool<T> {
    /// `new_item` builds a fresh `T`; `reset_item` restores a returned `T` to
    /// that same baseline before it is handed out again.
    pub fn new(new_item: fn() -> T, reset_item: fn(&mut T)) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            new_item,
            reset_item,
        }
    }

    /// Returns a pooled `T`, or a freshly constructed one if the pool is empty.
    pub fn get(&self) -> T {
        let mut items = self.items.lock().expect("pool mutex poisoned");
        items.pop().unwrap_or_else(self.new_item)
    }

    /// Resets `item` and returns it to the pool for reuse.
    pub fn put(&self, mut item: T) {
        (self.reset_item)(&mut item);
        let mut items = self.items.lock().expect("pool mutex poisoned");
        items.push(item);
    }
}
