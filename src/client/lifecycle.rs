//! Session lifecycle fan-out.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::models::protocol::SessionLifecycleEvent;
use crate::rpc::dispatcher::panic_message;

/// Callback for `session.lifecycle` notifications.
pub type LifecycleHandler = Arc<dyn Fn(&SessionLifecycleEvent) + Send + Sync>;

/// Token returned by lifecycle subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifecycleSubscription(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    wildcard: Vec<(LifecycleSubscription, LifecycleHandler)>,
    typed: HashMap<String, Vec<(LifecycleSubscription, LifecycleHandler)>>,
}

/// Wildcard and type-keyed lifecycle subscribers.
#[derive(Default)]
pub(crate) struct LifecycleListeners {
    inner: Mutex<Listeners>,
}

impl std::fmt::Debug for LifecycleListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("LifecycleListeners")
            .field("wildcard", &inner.wildcard.len())
            .field("typed", &inner.typed.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LifecycleListeners {
    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to every lifecycle event, or only to `event_type`.
    pub(crate) fn subscribe(
        &self,
        event_type: Option<&str>,
        handler: LifecycleHandler,
    ) -> LifecycleSubscription {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = LifecycleSubscription(inner.next_id);
        match event_type {
            Some(event_type) => inner
                .typed
                .entry(event_type.to_owned())
                .or_default()
                .push((id, handler)),
            None => inner.wildcard.push((id, handler)),
        }
        id
    }

    pub(crate) fn unsubscribe(&self, id: LifecycleSubscription) -> bool {
        let mut inner = self.lock();
        let before = inner.wildcard.len();
        inner.wildcard.retain(|(sub, _)| *sub != id);
        let mut removed = inner.wildcard.len() != before;
        for handlers in inner.typed.values_mut() {
            let before = handlers.len();
            handlers.retain(|(sub, _)| *sub != id);
            removed |= handlers.len() != before;
        }
        inner.typed.retain(|_, handlers| !handlers.is_empty());
        removed
    }

    /// Typed subscribers first, then wildcard ones; each isolated.
    pub(crate) fn dispatch(&self, event: &SessionLifecycleEvent) {
        let handlers: Vec<LifecycleHandler> = {
            let inner = self.lock();
            inner
                .typed
                .get(&event.kind)
                .into_iter()
                .flatten()
                .chain(inner.wildcard.iter())
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in handlers {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    event_type = %event.kind,
                    session_id = %event.session_id,
                    reason = panic_message(panic.as_ref()),
                    "lifecycle handler failed"
                );
            }
        }
    }
}
