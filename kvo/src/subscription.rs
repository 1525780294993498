use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::callback::{Handler, Selector};
use crate::registry::{self, Registry};
use crate::traits::WeakObject;
use crate::{HookToken, KeyPath, ObjectId, Options, UserInfo};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// A single registration linking an observer (if any) to one key path of one target.
///
/// Active until removed, or until the observer or target is dropped. Once invalid it stays invalid and
/// every operation on it is a no-op.
pub struct Subscription {
    id: SubscriptionId,
    key_path: KeyPath,
    options: Options,
    selector: Option<Selector>,
    pub(crate) observer: Option<WeakObject>,
    pub(crate) target: WeakObject,
    // released on invalidation
    payload: Mutex<Option<Payload>>,
    hooks: Mutex<Vec<HookToken>>,
    valid: AtomicBool,
    registry: Weak<registry::Inner>,
}

struct Payload {
    handler: Handler,
    user_info: Option<UserInfo>,
}

/// Everything a subscription owned while it was active. Must be dropped outside of the registry lock:
/// dropping a callback or user info may drop the last reference to an observed object.
pub(crate) struct Released {
    _payload: Option<Payload>,
    hooks: Vec<HookToken>,
}

impl Drop for Released {
    fn drop(&mut self) {
        for hook in self.hooks.drain(..) {
            hook.disarm();
        }
    }
}

impl Subscription {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SubscriptionId,
        key_path: KeyPath,
        options: Options,
        observer: Option<WeakObject>,
        target: WeakObject,
        handler: Handler,
        user_info: Option<UserInfo>,
        registry: Weak<registry::Inner>,
    ) -> Self {
        Self {
            id,
            key_path,
            options,
            selector: handler.selector(),
            observer,
            target,
            payload: Mutex::new(Some(Payload { handler, user_info })),
            hooks: Mutex::new(Vec::new()),
            valid: AtomicBool::new(true),
            registry,
        }
    }

    pub fn id(&self) -> SubscriptionId { self.id }

    pub fn key_path(&self) -> &KeyPath { &self.key_path }

    pub fn options(&self) -> Options { self.options }

    pub fn selector(&self) -> Option<Selector> { self.selector }

    pub fn observer_id(&self) -> Option<ObjectId> { self.observer.as_ref().map(WeakObject::id) }

    pub fn target_id(&self) -> ObjectId { self.target.id() }

    pub fn is_valid(&self) -> bool { self.valid.load(Ordering::Acquire) }

    /// Remove this subscription. Idempotent, and safe to call from inside its own callback.
    pub fn remove(&self) {
        match self.registry.upgrade() {
            Some(inner) => {
                Registry::from_inner(inner).remove_subscriptions([self]);
            }
            // The registry is gone, so there is nothing left to detach from
            None => drop(self.invalidate()),
        }
    }

    pub(crate) fn handler(&self) -> Option<Handler> {
        self.payload.lock().expect("subscription lock is poisoned").as_ref().map(|payload| payload.handler.clone())
    }

    pub(crate) fn user_info(&self) -> Option<UserInfo> {
        self.payload.lock().expect("subscription lock is poisoned").as_ref().and_then(|payload| payload.user_info.clone())
    }

    pub(crate) fn set_hooks(&self, hooks: Vec<HookToken>) { *self.hooks.lock().expect("subscription lock is poisoned") = hooks; }

    /// Flip to invalid. Only the first call returns what the subscription owned.
    pub(crate) fn invalidate(&self) -> Option<Released> {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(Released {
            _payload: self.payload.lock().expect("subscription lock is poisoned").take(),
            hooks: std::mem::take(&mut *self.hooks.lock().expect("subscription lock is poisoned")),
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key_path", &self.key_path)
            .field("observer", &self.observer_id())
            .field("target", &self.target_id())
            .field("options", &self.options)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// The handle returned when adding an observation.
///
/// Covers every subscription created by that call: one per key path per target. Dropping the handle
/// does not remove anything; observations end when removed explicitly or when the observer or target
/// is dropped.
#[derive(Clone, Debug)]
pub struct Observation {
    subscriptions: Vec<Arc<Subscription>>,
}

impl Observation {
    pub(crate) fn new(subscriptions: Vec<Arc<Subscription>>) -> Self { Self { subscriptions } }

    /// True while any of the underlying subscriptions is still active
    pub fn is_valid(&self) -> bool { self.subscriptions.iter().any(|s| s.is_valid()) }

    /// Remove all of the underlying subscriptions together. Idempotent.
    pub fn remove(&self) {
        let Some(registry) = self.subscriptions.iter().find_map(|s| s.registry.upgrade()) else {
            for subscription in &self.subscriptions {
                drop(subscription.invalidate());
            }
            return;
        };
        Registry::from_inner(registry).remove_subscriptions(self.subscriptions.iter().map(Arc::as_ref));
    }

    pub fn subscriptions(&self) -> &[Arc<Subscription>] { &self.subscriptions }

    pub fn len(&self) -> usize { self.subscriptions.len() }

    pub fn is_empty(&self) -> bool { self.subscriptions.is_empty() }
}
