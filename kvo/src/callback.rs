use std::sync::Arc;

use crate::{Notification, Object, ObjectRef};

/// Names a method-style callback so that it can later be matched by `Registry::remove_observer`
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Selector(&'static str);

impl Selector {
    pub const fn new(name: &'static str) -> Self { Self(name) }

    pub fn name(&self) -> &'static str { self.0 }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.0) }
}

/// What to call when an observed attribute changes.
pub enum Callback<O = ()> {
    /// Called with the notification only
    Closure(Arc<dyn Fn(&Notification) + Send + Sync + 'static>),
    /// Called on the observer itself. Requires an observer, and is skipped if the observer is gone.
    Method(Selector, Arc<dyn Fn(&O, &Notification) + Send + Sync + 'static>),
}

impl<O> Callback<O> {
    pub fn closure<F>(f: F) -> Self
    where F: Fn(&Notification) + Send + Sync + 'static {
        Callback::Closure(Arc::new(f))
    }

    pub fn method<F>(name: &'static str, f: F) -> Self
    where F: Fn(&O, &Notification) + Send + Sync + 'static {
        Callback::Method(Selector(name), Arc::new(f))
    }

    pub fn selector(&self) -> Option<Selector> {
        match self {
            Callback::Closure(_) => None,
            Callback::Method(selector, _) => Some(*selector),
        }
    }
}

impl<O: Object> Callback<O> {
    /// Resolve the callback against the observer's concrete type, once, at registration time
    pub(crate) fn erase(self) -> Handler {
        match self {
            Callback::Closure(f) => Handler::Closure(f),
            Callback::Method(selector, method) => Handler::Method {
                selector,
                invoke: Arc::new(move |observer: &ObjectRef, notification: &Notification| {
                    if let Some(observer) = observer.downcast::<O>() {
                        method(&observer, notification);
                    }
                }),
            },
        }
    }
}

/// Trait for types that can be converted into observation callbacks.
pub trait IntoCallback<O> {
    fn into_callback(self) -> Callback<O>;
}

impl<F, O> IntoCallback<O> for F
where F: Fn(&Notification) + Send + Sync + 'static
{
    fn into_callback(self) -> Callback<O> { Callback::Closure(Arc::new(self)) }
}

impl<O> IntoCallback<O> for Callback<O> {
    fn into_callback(self) -> Callback<O> { self }
}

impl<O> IntoCallback<O> for std::sync::mpsc::Sender<Notification> {
    fn into_callback(self) -> Callback<O> {
        Callback::Closure(Arc::new(move |notification: &Notification| {
            let _ = self.send(notification.clone()); // Ignore send errors
        }))
    }
}

#[cfg(feature = "tokio")]
impl<O> IntoCallback<O> for tokio::sync::mpsc::UnboundedSender<Notification> {
    fn into_callback(self) -> Callback<O> {
        Callback::Closure(Arc::new(move |notification: &Notification| {
            let _ = self.send(notification.clone()); // Ignore send errors
        }))
    }
}

/// A callback with the observer type erased
#[derive(Clone)]
pub(crate) enum Handler {
    Closure(Arc<dyn Fn(&Notification) + Send + Sync + 'static>),
    Method { selector: Selector, invoke: Arc<dyn Fn(&ObjectRef, &Notification) + Send + Sync + 'static> },
}

impl Handler {
    pub fn selector(&self) -> Option<Selector> {
        match self {
            Handler::Closure(_) => None,
            Handler::Method { selector, .. } => Some(*selector),
        }
    }

    /// A method callback without an observer in the notification is not called
    pub fn call(&self, notification: &Notification) {
        match self {
            Handler::Closure(f) => f(notification),
            Handler::Method { invoke, .. } => {
                if let Some(observer) = &notification.observer {
                    invoke(observer, notification);
                }
            }
        }
    }
}
