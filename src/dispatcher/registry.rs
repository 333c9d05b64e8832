use std::any::{self, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use super::{Envelope, EventKind, HandlerFault};

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub(crate) type ErasedHandler = dyn Fn(&Envelope) -> Result<(), HandlerFault> + Send + Sync;

/// One registered handler.
pub(crate) struct Subscription {
    id: SubscriptionId,
    payload_type: &'static str,
    handler: Box<ErasedHandler>,
}

impl Subscription {
    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub(crate) fn invoke(&self, envelope: &Envelope) -> Result<(), HandlerFault> {
        (self.handler)(envelope)
    }
}

/// Wrap a typed handler so it can be stored next to handlers of other types.
pub(crate) fn typed<T, F, E>(handler: F) -> (&'static str, Box<ErasedHandler>)
where
    T: Any + Send + Sync,
    F: Fn(Arc<T>) -> Result<(), E> + Send + Sync + 'static,
    E: fmt::Display,
{
    let erased: Box<ErasedHandler> =
        Box::new(move |envelope: &Envelope| -> Result<(), HandlerFault> {
            let payload = envelope.downcast::<T>()?;
            handler(payload).map_err(|err| HandlerFault::Failed {
                kind: envelope.kind(),
                message: err.to_string(),
            })
        });
    (any::type_name::<T>(), erased)
}

/// Wrap a handler that takes the raw envelope.
pub(crate) fn raw<F>(handler: F) -> (&'static str, Box<ErasedHandler>)
where
    F: Fn(&Envelope) + Send + Sync + 'static,
{
    let erased: Box<ErasedHandler> =
        Box::new(move |envelope: &Envelope| -> Result<(), HandlerFault> {
            handler(envelope);
            Ok(())
        });
    (any::type_name::<Envelope>(), erased)
}

/// Kind → ordered handler list.
///
/// Guarded by its own lock, independent of the event queue, so subscribing
/// never contends with publishing.
#[derive(Default)]
pub(crate) struct Registry {
    routes: RwLock<HashMap<EventKind, Vec<Arc<Subscription>>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn insert(
        &self,
        kind: EventKind,
        (payload_type, handler): (&'static str, Box<ErasedHandler>),
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            id,
            payload_type,
            handler,
        });
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push(subscription);
        id
    }

    /// Remove one registration. Returns whether it existed.
    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let mut emptied = None;
        let mut found = false;
        for (kind, subscriptions) in routes.iter_mut() {
            if let Some(position) = subscriptions.iter().position(|s| s.id == id) {
                subscriptions.remove(position);
                found = true;
                if subscriptions.is_empty() {
                    emptied = Some(*kind);
                }
                break;
            }
        }
        if let Some(kind) = emptied {
            routes.remove(&kind);
        }
        found
    }

    /// Snapshot of the handlers for `kind`, in registration order.
    ///
    /// The lock is released before the caller invokes anything, so handlers
    /// may subscribe or unsubscribe re-entrantly.
    pub(crate) fn handlers(&self, kind: EventKind) -> Vec<Arc<Subscription>> {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}
