use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::data::{ListenerRegistry, Subscription};

/// A unique token for a listener registration.
///
/// The only thing a token can do is undo its registration, either through
/// `Database::remove_change_listener` or [`ListenerToken::remove`]. Removing
/// twice is harmless.
pub struct ListenerToken {
    id: Uuid,
    registry: Weak<ListenerRegistry>,
    subscription: Weak<Subscription>,
}

impl ListenerToken {
    pub(crate) fn new(id: Uuid, registry: Weak<ListenerRegistry>, subscription: Weak<Subscription>) -> Self {
        Self {
            id,
            registry,
            subscription,
        }
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.id
    }

    /// Remove the registration this token stands for.
    ///
    /// Does nothing if the listener is already gone or the database was dropped.
    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self);
        }
    }

    pub(crate) fn belongs_to(&self, registry: &ListenerRegistry) -> bool {
        std::ptr::eq(self.registry.as_ptr(), registry)
    }

    /// The subscription, while anything (the registry or an invocation) still holds it
    pub(crate) fn subscription(&self) -> Option<Arc<Subscription>> {
        self.subscription.upgrade()
    }
}

impl PartialEq for ListenerToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ListenerToken {}

impl std::hash::Hash for ListenerToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for ListenerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ListenerToken").field(&self.id).finish()
    }
}

impl std::fmt::Display for ListenerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl From<&ListenerToken> for Uuid {
    fn from(token: &ListenerToken) -> Self {
        token.id
    }
}
