//! Observable value holder
//!
//! `ReactiveValue<T>` exposes a current value plus a "something changed" signal.
//! It is not a stream: there is no buffering or queueing, and subscribers receive
//! no payload. They re-read the value when called.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;
type SubscriberList = Mutex<Vec<(u64, Callback)>>;

/// Observable holder for a single value
///
/// - `set` is a no-op when the new value equals the current one (`PartialEq`)
/// - Otherwise every current subscriber is called exactly once, synchronously,
///   after the value is stored and the lock released
/// - Subscribers are never called during construction
///
/// Cloning yields another handle to the same value.
pub struct ReactiveValue<T> {
    value: Arc<RwLock<T>>,
    subscribers: Arc<SubscriberList>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for ReactiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T: Clone + PartialEq> ReactiveValue<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current value
    pub fn get(&self) -> T {
        self.value
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Store `value` and notify subscribers if it differs from the current value.
    ///
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self
                .value
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *current == value {
                return false;
            }
            *current = value;
        }

        // Snapshot so callbacks can subscribe/unsubscribe or read the value
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Register a change callback.
    ///
    /// The callback stays registered until the returned handle is dropped or
    /// `unsubscribe`d, or forever once `detach`ed.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Some(Arc::downgrade(&self.subscribers)),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl<T: Clone + PartialEq + Default> Default for ReactiveValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.value.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        f.debug_struct("ReactiveValue").field("value", &*value).finish()
    }
}

/// Unsubscribe handle returned by [`ReactiveValue::subscribe`]
#[must_use = "dropping a Subscription unsubscribes immediately; call detach() to keep it"]
pub struct Subscription {
    id: u64,
    subscribers: Option<Weak<SubscriberList>>,
}

impl Subscription {
    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the callback registered for the lifetime of the value
    pub fn detach(mut self) {
        self.subscribers = None;
    }

    fn remove(&mut self) {
        if let Some(list) = self.subscribers.take().and_then(|weak| weak.upgrade()) {
            list.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_set_equal_value_does_not_notify() {
        let value = ReactiveValue::new(5);
        let (count, cb) = counter();
        let _sub = value.subscribe(cb);

        assert!(!value.set(5));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_set_new_value_notifies_once_per_subscriber() {
        let value = ReactiveValue::new("a".to_string());
        let (first, cb1) = counter();
        let (second, cb2) = counter();
        let _s1 = value.subscribe(cb1);
        let _s2 = value.subscribe(cb2);

        assert!(value.set("b".to_string()));
        assert_eq!(value.get(), "b");
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_notification_on_construction() {
        let (count, cb) = counter();
        let value = ReactiveValue::new(1);
        let _sub = value.subscribe(cb);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let value = ReactiveValue::new(0);
        let (count, cb) = counter();
        let sub = value.subscribe(cb);
        value.set(1);
        sub.unsubscribe();
        value.set(2);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let (dropped, cb) = counter();
        drop(value.subscribe(cb));
        value.set(3);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(value.subscriber_count(), 0);
    }

    #[test]
    fn test_detach_keeps_callback() {
        let value = ReactiveValue::new(0);
        let (count, cb) = counter();
        value.subscribe(cb).detach();
        value.set(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_read_value() {
        let value = ReactiveValue::new(0);
        let seen = Arc::new(AtomicUsize::new(0));
        let (v, s) = (value.clone(), Arc::clone(&seen));
        let _sub = value.subscribe(move || {
            s.store(v.get() as usize, Ordering::SeqCst);
        });
        value.set(9);
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }
}
