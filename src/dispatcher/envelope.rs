use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::HandlerFault;

/// Identifier selecting which subscribers receive a published payload.
///
/// The dispatcher does not tie a kind to a payload type; publishers and
/// subscribers of the same kind must agree on one. A disagreement is caught
/// at delivery time and reported as [`HandlerFault::TypeMismatch`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventKind(pub u32);

impl From<u32> for EventKind {
    fn from(value: u32) -> Self {
        EventKind(value)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind#{}", self.0)
    }
}

/// A queued event: its kind plus a shared, type-erased payload.
///
/// Cloning an envelope shares the payload; the payload is released when the
/// publisher, the queue and every handler have dropped their handles.
#[derive(Clone)]
pub struct Envelope {
    kind: EventKind,
    sequence: u64,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Envelope {
    pub(crate) fn new<T>(kind: EventKind, sequence: u64, payload: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            kind,
            sequence,
            type_name: any::type_name::<T>(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Position of this envelope in the dispatcher's publish order.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Name of the concrete payload type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// Shared handle to the payload if it is a `T`.
    pub fn payload<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }

    /// Checked downcast used by typed handlers.
    pub(crate) fn downcast<T>(&self) -> Result<Arc<T>, HandlerFault>
    where
        T: Any + Send + Sync,
    {
        self.payload::<T>().ok_or_else(|| HandlerFault::TypeMismatch {
            kind: self.kind,
            expected: any::type_name::<T>(),
            found: self.type_name,
        })
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.kind)
            .field("sequence", &self.sequence)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}
