//! Listener registry with per-listener panic isolation, plus the gate that
//! lets one thread at a time deliver notifications.
//!
//! A panicking listener is logged and skipped; the remaining listeners
//! still receive the notification and connector state is untouched.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, ThreadId};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T: ?Sized> {
    id: u64,
    /// Pending entries are skipped by `notify` until activated.
    active: bool,
    handler: Handler<T>,
}

/// An ordered set of listeners for one notification type.
pub(crate) struct ListenerSet<T: ?Sized> {
    label: &'static str,
    next_id: AtomicU64,
    handlers: Mutex<Vec<Entry<T>>>,
}

impl<T: ?Sized + 'static> ListenerSet<T> {
    pub(crate) fn new(label: &'static str) -> Arc<Self> {
        Arc::new(Self {
            label,
            next_id: AtomicU64::new(0),
            handlers: Mutex::new(Vec::new()),
        })
    }

    /// Register a handler in the pending state. It receives nothing until
    /// [`activate`](Self::activate) is called with the returned id.
    pub(crate) fn add<F>(self: &Arc<Self>, handler: F) -> (Subscription, u64)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Entry {
                id,
                active: false,
                handler: Arc::new(handler),
            });

        let set: Weak<dyn Detach> = Arc::downgrade(self) as Weak<dyn Detach>;
        (Subscription { id, set }, id)
    }

    /// Start delivering to a pending handler, first calling it with `replay`.
    /// A handler unsubscribed in the meantime is left alone.
    pub(crate) fn activate(&self, id: u64, replay: Option<&T>) {
        let handler = {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = handlers.iter_mut().find(|e| e.id == id) else {
                return;
            };
            entry.active = true;
            Arc::clone(&entry.handler)
        };

        if let Some(value) = replay {
            self.call(&handler, value);
        }
    }

    /// Deliver `value` to every active handler registered at call time.
    pub(crate) fn notify(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.active)
            .map(|e| Arc::clone(&e.handler))
            .collect();

        for handler in snapshot {
            self.call(&handler, value);
        }
    }

    /// Invoke one handler, catching and logging a panic.
    fn call(&self, handler: &Handler<T>, value: &T) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(value))) {
            tracing::error!(
                listener = self.label,
                panic = panic_message(panic.as_ref()),
                "Listener panicked"
            );
        }
    }

    pub(crate) fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: ?Sized + 'static> Detach for ListenerSet<T> {
    fn detach(&self, id: u64) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|e| e.id != id);
    }
}

// ── DeliveryGate ─────────────────────────────────────────────────────

/// Admits one delivering thread at a time.
///
/// Other threads block in [`enter`](Self::enter) until the current turn
/// ends. The owning thread re-entering (a listener calling back into the
/// connector) gets `None` and leaves the queued work to the outer turn.
#[derive(Default)]
pub(crate) struct DeliveryGate {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
}

pub(crate) struct DeliveryTurn<'a> {
    gate: &'a DeliveryGate,
}

impl DeliveryGate {
    pub(crate) fn enter(&self) -> Option<DeliveryTurn<'_>> {
        let me = thread::current().id();
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(me) {
            return None;
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Some(DeliveryTurn { gate: self })
    }
}

impl Drop for DeliveryTurn<'_> {
    fn drop(&mut self) {
        *self
            .gate
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.gate.released.notify_one();
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle returned by `on_event` / `on_status_change`.
///
/// Dropping it does NOT remove the listener; call
/// [`unsubscribe`](Self::unsubscribe). Calling it more than once is harmless.
pub struct Subscription {
    id: u64,
    set: Weak<dyn Detach>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            set.detach(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
