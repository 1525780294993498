use kvo::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { let _ = tracing_subscriber::fmt().with_max_level(Level::DEBUG).with_test_writer().try_init(); }

/// What a callback saw, without holding on to the observer or target
#[allow(unused)]
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub indexes: Option<BTreeSet<usize>>,
    pub is_prior: bool,
    pub has_target: bool,
}

impl From<&Notification> for Seen {
    fn from(n: &Notification) -> Self {
        Seen {
            path: n.key_path.to_string(),
            kind: n.kind(),
            old: n.old_value().cloned(),
            new: n.new_value().cloned(),
            indexes: n.indexes().cloned(),
            is_prior: n.is_prior(),
            has_target: n.target.is_some(),
        }
    }
}

#[allow(unused)]
pub fn set(old: Option<i64>, new: Option<i64>) -> Seen {
    Seen {
        path: String::new(),
        kind: ChangeKind::Set,
        old: old.map(Value::Integer),
        new: new.map(Value::Integer),
        indexes: None,
        is_prior: false,
        has_target: true,
    }
}

/// Returns a callback that records what it sees, and a function draining the records
#[allow(unused)]
pub fn watcher() -> (Box<dyn Fn(&Notification) + Send + Sync>, Box<dyn Fn() -> Vec<Seen> + Send + Sync>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let watcher = {
        let seen = seen.clone();
        Box::new(move |n: &Notification| {
            seen.lock().unwrap().push(Seen::from(n));
        })
    };

    let check = Box::new(move || {
        let seen: Vec<Seen> = seen.lock().unwrap().drain(..).collect();
        seen
    });

    (watcher, check)
}

/// An observer object with a method-style callback
#[allow(unused)]
pub struct Watcher {
    pub name: &'static str,
    seen: Mutex<Vec<Seen>>,
    lifecycle: Lifecycle,
}

#[allow(unused)]
impl Watcher {
    pub fn new(name: &'static str) -> Arc<Self> { Arc::new(Self { name, seen: Mutex::new(Vec::new()), lifecycle: Lifecycle::new() }) }

    pub fn changed(&self, n: &Notification) { self.seen.lock().unwrap().push(Seen::from(n)); }

    pub fn other_changed(&self, n: &Notification) { self.changed(n) }

    pub fn take(&self) -> Vec<Seen> { self.seen.lock().unwrap().drain(..).collect() }

    pub fn callback() -> Callback<Watcher> { Callback::method("changed", Watcher::changed) }

    pub fn hook_count(&self) -> usize { self.lifecycle.hook_count() }
}

impl Object for Watcher {
    fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
}

/// Compare ignoring the path, which most tests don't care about
#[allow(unused)]
pub fn without_paths(seen: Vec<Seen>) -> Vec<Seen> { seen.into_iter().map(|s| Seen { path: String::new(), ..s }).collect() }
