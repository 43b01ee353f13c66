//! Subscriber registries.
//!
//! A [`HandlerRegistry`] is a set of callbacks keyed by a monotonically
//! increasing id. Registering returns a [`Subscription`] that removes exactly
//! that handler. Dispatch runs over a snapshot taken under the lock, so
//! handlers may register or unregister other handlers (or themselves) while a
//! dispatch round is running.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::ChannelError;

/// A subscriber callback.
///
/// Implemented for every `Fn(&T) -> anyhow::Result<()>` closure. Returning an
/// error (or panicking) is logged and does not affect other subscribers.
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, item: &T) -> anyhow::Result<()>;
}

impl<T, F> Handler<T> for F
where
    F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, item: &T) -> anyhow::Result<()> {
        self(item)
    }
}

struct Entries<T> {
    next_id: u64,
    handlers: BTreeMap<u64, Arc<dyn Handler<T>>>,
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Set of handlers for one event category.
pub struct HandlerRegistry<T> {
    name: &'static str,
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T> Clone for HandlerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: 'static> HandlerRegistry<T> {
    /// `name` labels log lines (e.g. `"message"`, `"connection"`).
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                handlers: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a closure handler.
    pub fn register<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(f)
    }

    /// Add a handler.
    pub fn register_handler(&self, handler: impl Handler<T>) -> Subscription {
        let id = {
            let mut entries = self.lock();
            let id = entries.next_id;
            entries.next_id += 1;
            entries.handlers.insert(id, Arc::new(handler));
            id
        };
        tracing::trace!(registry = self.name, id, "handler registered");

        let weak: Weak<Mutex<Entries<T>>> = Arc::downgrade(&self.entries);
        Subscription {
            id,
            remover: Mutex::new(Some(Box::new(move || {
                weak.upgrade()
                    .map(|entries| {
                        entries
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .handlers
                            .remove(&id)
                            .is_some()
                    })
                    .unwrap_or(false)
            }))),
        }
    }

    /// Invoke every handler registered at the start of the round.
    pub fn dispatch(&self, item: &T) -> DispatchReport {
        let snapshot: Vec<(u64, Arc<dyn Handler<T>>)> = self
            .lock()
            .handlers
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, handler) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(registry = self.name, handler = id, error = %e, "handler failed");
                }
                Err(payload) => {
                    report.failed += 1;
                    let error = ChannelError::Handler(panic_message(&payload));
                    tracing::error!(
                        registry = self.name,
                        handler = id,
                        error = %error,
                        "handler panicked"
                    );
                }
            }
        }
        report
    }

    /// Id the next registration will receive. Every handler registered so
    /// far has an id below this mark.
    pub fn watermark(&self) -> u64 {
        self.lock().next_id
    }

    /// Remove every handler registered before `watermark`.
    pub fn clear_before(&self, watermark: u64) -> usize {
        let mut entries = self.lock();
        let keep = entries.handlers.split_off(&watermark);
        let removed = entries.handlers.len();
        entries.handlers = keep;
        removed
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.lock().handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}

type Remover = Box<dyn FnOnce() -> bool + Send>;

/// Handle returned by registration. Dropping it leaves the handler
/// registered; call [`unsubscribe`](Self::unsubscribe) or convert it with
/// [`scoped`](Self::scoped) to tie removal to a scope.
pub struct Subscription {
    id: u64,
    remover: Mutex<Option<Remover>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler. Only the first call has an effect; returns `true`
    /// if this call removed it.
    pub fn unsubscribe(&self) -> bool {
        let remover = self
            .remover
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        remover.map(|remove| remove()).unwrap_or(false)
    }

    /// Convert into a guard that unsubscribes when dropped.
    pub fn scoped(self) -> ScopedSubscription {
        ScopedSubscription(self)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Unsubscribes on drop.
#[derive(Debug)]
pub struct ScopedSubscription(Subscription);

impl ScopedSubscription {
    pub fn id(&self) -> u64 {
        self.0.id()
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
