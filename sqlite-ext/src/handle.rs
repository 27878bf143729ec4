//!
//! Opaque handle registry.
//!
//! SQLite's extension points carry context through `void*` slots. Instead
//! of handing the engine raw addresses of managed objects, the bridge
//! stores each object in a table and passes a pointer-sized token.
//! Trampolines resolve the token back to the object, so the engine never
//! observes a managed pointer and the object's lifetime stays under the
//! bridge's control.
//!
//! Tokens start at 1; 0 is reserved as the "no object" sentinel in the
//! aggregate accumulator slot.
//!

use std::collections::HashMap;

/// Raw object pointer parked in the table. The table is only touched
/// under its mutex, and tokens are confined to a single connection's
/// callback stream.
struct Slot<T: ?Sized>(*mut T);

unsafe impl<T: ?Sized> Send for Slot<T> {}

pub(crate) struct HandleTable<T: ?Sized> {
    slots: HashMap<usize, Slot<T>>,
    next_token: usize,
}

impl<T: ?Sized> HandleTable<T> {
    pub(crate) fn new() -> Self {
        HandleTable {
            slots: HashMap::new(),
            next_token: 1,
        }
    }

    /// Park an object and mint a token for it. Tokens are never reused.
    pub(crate) fn create(&mut self, object: Box<T>) -> usize {
        let token = self.next_token;
        self.next_token += 1;
        self.slots.insert(token, Slot(Box::into_raw(object)));
        token
    }

    /// Pointer to the object behind a live token. Callers deref after the
    /// table lock is dropped, so a callback may re-enter the registry.
    ///
    /// Panics when the token was never issued or already disposed; the
    /// engine has violated the callback protocol and the state is not
    /// recoverable.
    pub(crate) fn resolve(&self, token: usize) -> *mut T {
        match self.slots.get(&token) {
            Some(slot) => slot.0,
            None => panic!("use of dead handle {token}"),
        }
    }

    /// Reclaim ownership of the object behind a token. The token is dead
    /// afterwards. Panics on a dead token, like `resolve`.
    pub(crate) fn dispose(&mut self, token: usize) -> Box<T> {
        match self.slots.remove(&token) {
            Some(slot) => unsafe { Box::from_raw(slot.0) },
            None => panic!("dispose of dead handle {token}"),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
