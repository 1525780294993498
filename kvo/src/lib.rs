/*!
Key-path observation with automatic teardown.

An observer subscribes to changes of a named attribute (a key path) of a target object. Neither side
is kept alive by the registry: when either the observer or the target is dropped, every subscription
that references it is invalidated and removed.

# Design requirements:
- The registry holds only weak references to observers and targets
- Several subscriptions on the same (target, path) share one raw observation on the target
- Callbacks run synchronously, inline, outside of any registry lock, in registration order
- A subscription added or removed during a dispatch doesn't change who receives *that* change
- Removing an already removed subscription is a no-op, never an error

# Participating objects

Destruction is observed through the object itself, so taking part is opt-in: observers and targets
must be shared through an `Arc`, embed a [`Lifecycle`] field, and implement [`Object`] to expose it.
Targets additionally implement [`Observable`], the host's raw change primitive ([`Model`] is a ready
made one). The registry arms hooks on the embedded [`Lifecycle`]; they fire from its `Drop`, which is
what removes the subscriptions of a dropped object.

Dropping a [`Registry`] removes everything it still holds.

# Basic usage

```rust
use kvo::*;
use std::sync::Arc;

let counter = Arc::new(Model::new().with("count", 0));
let observation = Registry::global()
    .observe(&counter, "count", Options::OLD | Options::NEW, |n: &Notification| {
        println!("count: {:?} -> {:?}", n.old_value(), n.new_value());
    })
    .unwrap();

counter.set("count", 5).unwrap();
// Should print:
// count: Some(Integer(0)) -> Some(Integer(5))

observation.remove();
```

# Observer usage

```rust
use kvo::*;
use std::sync::{Arc, Mutex};

struct Label {
    text: Mutex<String>,
    lifecycle: Lifecycle,
}

impl Object for Label {
    fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
}

impl Label {
    fn name_changed(&self, n: &Notification) { *self.text.lock().unwrap() = n.new_value().unwrap().to_string(); }
}

let pet = Arc::new(Model::new().with("name", "Buffy"));
let label = Arc::new(Label { text: Mutex::new(String::new()), lifecycle: Lifecycle::new() });

let registry = Registry::new();
let observation = registry
    .add_observer(&label, &pet, "name", Callback::method("name_changed", Label::name_changed), None, Options::NEW)
    .unwrap();

pet.set("name", "Willow").unwrap();
assert_eq!(*label.text.lock().unwrap(), "\"Willow\"");

// dropping the observer ends the observation
drop(label);
assert!(!observation.is_valid());
assert_eq!(registry.subscription_count(), 0);
```
*/

mod callback;
mod dispatch;
mod error;
mod lifecycle;
mod model;
mod multiplexer;
mod options;
mod path;
mod registry;
mod subscription;
mod traits;
mod value;

pub use callback::*;
pub use dispatch::{Notification, UserInfo};
pub use error::*;
pub use lifecycle::*;
pub use model::*;
pub use options::*;
pub use path::*;
pub use registry::{IntoTargets, Registry};
pub use subscription::*;
pub use traits::{Object, ObjectId, ObjectRef, Observable, RawObservationId, RawSink};
pub use value::*;
