use std::any::Any;
use std::sync::{Arc, Weak};

use crate::{ChangeRecord, KeyPath, Lifecycle, Options, Value};

/// Anything that can take part in an observation, as observer or target.
/// The registry never holds a strong reference to an Object; it relies on the object's [`Lifecycle`]
/// to learn about its destruction.
pub trait Object: Any + Send + Sync {
    fn lifecycle(&self) -> &Lifecycle;
}

/// The host's low-level change primitive: an object whose attributes can be watched by key path.
pub trait Observable: Object {
    /// Register a raw observation of `path`. The host must call `sink` synchronously for every change,
    /// including the old/new values and prior notifications that `options` asks for.
    fn register_raw(&self, path: &KeyPath, options: Options, sink: RawSink) -> RawObservationId;

    fn unregister_raw(&self, id: RawObservationId);

    /// Current value at `path`, if any
    fn value_at(&self, path: &KeyPath) -> Option<Value>;
}

/// The callback a host invokes when an attribute changes
pub type RawSink = Arc<dyn Fn(&KeyPath, ChangeRecord) + Send + Sync + 'static>;

/// Host-issued handle for a single raw observation
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RawObservationId(pub u64);

/// The identity of an object: the address of its shared allocation.
///
/// The registry keeps a `Weak` to every object it has an entry for, which keeps the allocation
/// (though not the value) reserved, so an id is never reused while it is in use.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectId(usize);

impl ObjectId {
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self { Self(Arc::as_ptr(object) as *const () as usize) }
}

impl<T: ?Sized> From<&Arc<T>> for ObjectId {
    fn from(object: &Arc<T>) -> Self { Self::of(object) }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{:#x}", self.0) }
}

/// A strong, type-erased reference to an observer or target, handed to callbacks for the duration of a
/// notification. Use [`ObjectRef::downcast`] to get the concrete type back.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    pub fn id(&self) -> ObjectId { ObjectId::of(&self.0) }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> { self.0.clone().downcast::<T>().ok() }

    pub fn is<T: Any>(&self) -> bool { self.0.is::<T>() }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "ObjectRef({})", self.id()) }
}

/// A weak, type-erased reference that remembers the identity of the object it was taken from
#[derive(Clone)]
pub(crate) struct WeakObject {
    id: ObjectId,
    weak: Weak<dyn Any + Send + Sync>,
}

impl WeakObject {
    pub fn new<T: Object>(object: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(object);
        let weak: Weak<dyn Any + Send + Sync> = weak;
        Self { id: ObjectId::of(object), weak }
    }

    pub fn id(&self) -> ObjectId { self.id }

    pub fn upgrade(&self) -> Option<ObjectRef> { self.weak.upgrade().map(ObjectRef) }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing {
        lifecycle: Lifecycle,
    }

    impl Object for Thing {
        fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
    }

    #[test]
    fn test_identity_survives_erasure() {
        let thing = Arc::new(Thing { lifecycle: Lifecycle::new() });
        let weak = WeakObject::new(&thing);
        assert_eq!(weak.id(), ObjectId::of(&thing));

        let strong = weak.upgrade().unwrap();
        assert_eq!(strong.id(), ObjectId::of(&thing));
        assert!(strong.is::<Thing>());
        assert!(Arc::ptr_eq(&strong.downcast::<Thing>().unwrap(), &thing));
        assert!(strong.downcast::<String>().is_none());

        drop(strong);
        drop(thing);
        assert!(weak.upgrade().is_none());
    }
}
