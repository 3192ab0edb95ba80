// Instance identity and the capability every UI-owned execution context exposes
// to the registry.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::correlation::Token;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity issued to an instance when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Issue a fresh process-unique identity.
    pub fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}", self.0)
    }
}

/// The "type" of an instance, used by the type-filtered registry queries.
///
/// Compares by `TypeId`; the type name is only carried for diagnostics.
#[derive(Clone, Copy)]
pub struct InstanceKind {
    type_id: TypeId,
    name: &'static str,
}

impl InstanceKind {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// True if this kind is one of `kinds`.
    pub fn is_any_of(&self, kinds: &[InstanceKind]) -> bool {
        kinds.iter().any(|k| k == self)
    }
}

impl PartialEq for InstanceKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for InstanceKind {}

impl Hash for InstanceKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A live, UI-owned execution context.
///
/// Liveness is reported by the instance itself; the registry never stores it.
/// `request_termination` may re-enter the registry (for example to remove the
/// instance), so callers must not hold registry locks while invoking it.
pub trait Instance: Send + Sync {
    fn id(&self) -> InstanceId;

    fn kind(&self) -> InstanceKind;

    fn is_terminated(&self) -> bool;

    fn request_termination(&self);

    /// The correlation token this instance is serving, if it is a peer with
    /// an unresolved exchange.
    fn correlation_token(&self) -> Option<Token> {
        None
    }
}
