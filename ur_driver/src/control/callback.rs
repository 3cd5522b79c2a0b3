use std::sync::Arc;

use parking_lot::Mutex;

/// Single-listener callback registration. Registering again replaces the
/// previous listener (last writer wins).
pub struct CallbackSlot<T> {
    callback: Mutex<Option<Arc<dyn Fn(T) + Send + Sync>>>,
}

impl<T> CallbackSlot<T> {
    pub fn new() -> Self {
        Self {
            callback: Mutex::new(None),
        }
    }

    pub fn set(&self, callback: impl Fn(T) + Send + Sync + 'static) {
        *self.callback.lock() = Some(Arc::new(callback));
    }

    pub fn clear(&self) {
        *self.callback.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Invokes the listener, if any, outside the registration lock.
    pub fn call(&self, value: T) -> bool {
        let callback = self.callback.lock().clone();
        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_last_writer_wins() {
        let seen = Arc::new(AtomicI32::new(0));
        let slot = CallbackSlot::<i32>::new();
        assert!(!slot.call(1));

        let first = seen.clone();
        slot.set(move |v| {
            first.fetch_add(v, Ordering::SeqCst);
        });
        let second = seen.clone();
        slot.set(move |v| {
            second.fetch_add(v * 100, Ordering::SeqCst);
        });
        assert!(slot.call(2));
        assert_eq!(seen.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_callback_may_reregister() {
        let slot = Arc::new(CallbackSlot::<()>::new());
        let inner = slot.clone();
        slot.set(move |_| inner.clear());
        assert!(slot.call(()));
        assert!(!slot.is_set());
    }
}
