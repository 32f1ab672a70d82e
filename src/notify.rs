//! Change notification between GL object wrappers.
//!
//! A subject (a shader, a program) keeps weak references to its listeners, so
//! a listener going away never leaves a dangling entry behind: dead entries
//! are pruned on the next notification. Listeners that outlive their interest
//! deregister explicitly.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Receives change notifications from a subject.
pub trait ChangeListener {
    /// Called after the subject changed.
    fn on_changed(&self);
}

/// The listener list of a subject.
#[derive(Default)]
pub struct Listeners {
    entries: RefCell<Vec<Weak<dyn ChangeListener>>>,
}

impl Listeners {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Registering the same listener twice has no effect.
    pub fn register(&self, listener: Weak<dyn ChangeListener>) {
        let mut entries = self.entries.borrow_mut();
        if !entries.iter().any(|entry| entry.ptr_eq(&listener)) {
            entries.push(listener);
        }
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn deregister(&self, listener: &Weak<dyn ChangeListener>) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|entry| !entry.ptr_eq(listener));
        entries.len() != before
    }

    /// Number of live listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Whether no live listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every live listener and forget the dead ones.
    ///
    /// Listeners may register or deregister from inside `on_changed`; the
    /// list is not borrowed while they run.
    pub fn notify(&self) {
        let live: Vec<Rc<dyn ChangeListener>> = {
            let mut entries = self.entries.borrow_mut();
            entries.retain(|entry| entry.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_changed();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[derive(Default)]
    struct Counter {
        hits: Cell<u32>,
    }

    impl ChangeListener for Counter {
        fn on_changed(&self) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn weak(counter: &Rc<Counter>) -> Weak<dyn ChangeListener> {
        let listener: Rc<dyn ChangeListener> = counter.clone();
        Rc::downgrade(&listener)
    }

    #[test]
    fn notify_reaches_each_listener_once() {
        let listeners = Listeners::new();
        let a = Rc::new(Counter::default());
        let b = Rc::new(Counter::default());
        listeners.register(weak(&a));
        listeners.register(weak(&a));
        listeners.register(weak(&b));

        listeners.notify();

        assert_eq!(a.hits.get(), 1);
        assert_eq!(b.hits.get(), 1);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn deregister_stops_notifications() {
        let listeners = Listeners::new();
        let a = Rc::new(Counter::default());
        listeners.register(weak(&a));

        assert!(listeners.deregister(&weak(&a)));
        assert!(!listeners.deregister(&weak(&a)));
        listeners.notify();

        assert_eq!(a.hits.get(), 0);
        assert!(listeners.is_empty());
    }

    #[test]
    fn dropped_listener_is_pruned() {
        let listeners = Listeners::new();
        let a = Rc::new(Counter::default());
        listeners.register(weak(&a));
        drop(a);

        listeners.notify();

        assert!(listeners.is_empty());
        assert!(listeners.entries.borrow().is_empty());
    }
}
