use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;

use crate::{ChangeKind, ChangeRecord, KeyPath, ObjectRef, Options, Subscription, Value};

/// Opaque, owner-supplied context attached to an observation and handed back with every notification
pub type UserInfo = Arc<dyn Any + Send + Sync>;

/// The payload delivered to callbacks
#[derive(Clone)]
pub struct Notification {
    pub key_path: KeyPath,
    /// Present whenever the observation was registered with an observer
    pub observer: Option<ObjectRef>,
    /// Absent when the observation asked for `Options::OMIT_OBJECT`
    pub target: Option<ObjectRef>,
    pub change: ChangeRecord,
    pub user_info: Option<UserInfo>,
}

impl Notification {
    pub fn kind(&self) -> ChangeKind { self.change.kind }

    pub fn old_value(&self) -> Option<&Value> { self.change.old_value.as_ref() }

    pub fn new_value(&self) -> Option<&Value> { self.change.new_value.as_ref() }

    pub fn indexes(&self) -> Option<&BTreeSet<usize>> { self.change.indexes.as_ref() }

    pub fn is_prior(&self) -> bool { self.change.is_prior }

    pub fn user_info<T: Any>(&self) -> Option<&T> { self.user_info.as_deref()?.downcast_ref::<T>() }

    pub fn target<T: Any + Send + Sync>(&self) -> Option<Arc<T>> { self.target.as_ref()?.downcast::<T>() }

    pub fn observer<T: Any + Send + Sync>(&self) -> Option<Arc<T>> { self.observer.as_ref()?.downcast::<T>() }
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("key_path", &self.key_path)
            .field("observer", &self.observer)
            .field("target", &self.target)
            .field("change", &self.change)
            .field("user_info", &self.user_info.is_some())
            .finish()
    }
}

/// Turns one raw change into typed callbacks.
///
/// Always called with no registry lock held, over a snapshot of the subscribers taken when the change
/// arrived. Subscriptions that were invalidated since the snapshot was taken are skipped.
pub(crate) struct Dispatcher;

impl Dispatcher {
    pub fn dispatch(path: &KeyPath, change: &ChangeRecord, subscriptions: &[Arc<Subscription>]) {
        for subscription in subscriptions {
            if let Some(notification) = Self::notification_for(subscription, path, change) {
                // Check again: an earlier callback in this round may have removed this subscription
                let Some(handler) = subscription.handler() else { continue };
                trace!("Dispatcher delivering {:?} on {} to subscription {}", change.kind, path, subscription.id());
                handler.call(&notification);
            }
        }
    }

    fn notification_for(subscription: &Subscription, path: &KeyPath, change: &ChangeRecord) -> Option<Notification> {
        if !subscription.is_valid() {
            return None;
        }
        let options = subscription.options();
        if change.is_prior && !options.contains(Options::PRIOR) {
            return None;
        }

        // Destruction racing the dispatch: skip rather than report
        let target = subscription.target.upgrade()?;
        let observer = match &subscription.observer {
            Some(observer) => Some(observer.upgrade()?),
            None => None,
        };

        let change = ChangeRecord {
            kind: change.kind,
            old_value: if options.contains(Options::OLD) { change.old_value.clone() } else { None },
            new_value: if options.contains(Options::NEW) { change.new_value.clone() } else { None },
            indexes: change.indexes.clone(),
            is_prior: change.is_prior,
        };

        Some(Notification {
            key_path: path.clone(),
            observer,
            target: if options.contains(Options::OMIT_OBJECT) { None } else { Some(target) },
            change,
            user_info: subscription.user_info(),
        })
    }
}
