use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

type Hook = Box<dyn FnOnce() + Send + 'static>;

/// A side table of destruction hooks, embedded as a field of any object that wants to be observable
/// or act as an observer.
///
/// Every armed hook fires exactly once, synchronously, from this value's `Drop`. Because the owning
/// object is being dropped at that point, its strong count is already zero: `Weak::upgrade` on it fails,
/// while the allocation itself has not yet been reclaimed.
///
/// Hooks fire in no particular order relative to each other.
pub struct Lifecycle(Arc<Inner>);

struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    hooks: BTreeMap<u64, Hook>,
    destroyed: bool,
}

/// Handle for a single armed hook. Dropping the token does NOT disarm the hook.
#[derive(Debug)]
pub struct HookToken {
    inner: Weak<Inner>,
    id: u64,
}

impl Lifecycle {
    pub fn new() -> Self { Self(Arc::new(Inner { state: Mutex::new(State::default()), next_id: AtomicU64::new(0) })) }

    /// Arm a hook to be called immediately before the owning object is destroyed.
    ///
    /// If destruction is already in progress (a hook arming another hook on the same dying object),
    /// `on_destroy` is called right away and the returned token is inert.
    pub fn arm<F>(&self, on_destroy: F) -> HookToken
    where F: FnOnce() + Send + 'static {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.0.state.lock().expect("lifecycle lock is poisoned");
            if !state.destroyed {
                state.hooks.insert(id, Box::new(on_destroy));
                return HookToken { inner: Arc::downgrade(&self.0), id };
            }
        }
        on_destroy();
        HookToken { inner: Weak::new(), id }
    }

    /// Number of hooks currently armed
    pub fn hook_count(&self) -> usize { self.0.state.lock().expect("lifecycle lock is poisoned").hooks.len() }
}

impl Default for Lifecycle {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").field("hooks", &self.hook_count()).finish()
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        // Take the hooks out first so that hooks which disarm (or arm) on this lifecycle don't deadlock
        let hooks = {
            let mut state = self.0.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.destroyed = true;
            std::mem::take(&mut state.hooks)
        };
        trace!("Lifecycle dropping, firing {} hooks", hooks.len());
        for (_, hook) in hooks {
            hook();
        }
    }
}

impl HookToken {
    /// Disarm the hook. Returns false if it had already fired, been disarmed, or the object is gone.
    pub fn disarm(self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.state.lock().expect("lifecycle lock is poisoned").hooks.remove(&self.id).is_some(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Thing {
        lifecycle: Lifecycle,
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let check = {
            let count = count.clone();
            move || count.load(Ordering::SeqCst)
        };
        (count, check)
    }

    #[test]
    fn test_fires_exactly_once_on_drop() {
        let (count, check) = counter();
        let thing = Arc::new(Thing { lifecycle: Lifecycle::new() });
        thing.lifecycle.arm(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let other = thing.clone();
        drop(thing);
        assert_eq!(check(), 0); // still one strong reference

        drop(other);
        assert_eq!(check(), 1);
    }

    #[test]
    fn test_disarm() {
        let (count, check) = counter();
        let thing = Thing { lifecycle: Lifecycle::new() };
        let token = thing.lifecycle.arm(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(thing.lifecycle.hook_count(), 1);
        assert!(token.disarm());
        assert_eq!(thing.lifecycle.hook_count(), 0);
        drop(thing);
        assert_eq!(check(), 0);
    }

    #[test]
    fn test_multiple_hooks_independent() {
        let (count, check) = counter();
        let thing = Thing { lifecycle: Lifecycle::new() };
        let mut tokens = Vec::new();
        for step in [1, 10, 100] {
            let count = count.clone();
            tokens.push(thing.lifecycle.arm(move || {
                count.fetch_add(step, Ordering::SeqCst);
            }));
        }
        // disarm the middle one only
        assert!(tokens.remove(1).disarm());
        drop(thing);
        assert_eq!(check(), 101);
    }

    #[test]
    fn test_disarm_after_destruction_is_noop() {
        let (count, check) = counter();
        let thing = Thing { lifecycle: Lifecycle::new() };
        let token = thing.lifecycle.arm(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        drop(thing);
        assert_eq!(check(), 1);
        assert!(!token.disarm());
    }

    #[test]
    fn test_owner_is_unreachable_when_hook_fires() {
        let thing = Arc::new(Thing { lifecycle: Lifecycle::new() });
        let weak = Arc::downgrade(&thing);
        let (seen_alive, check) = counter();
        thing.lifecycle.arm(move || {
            if weak.upgrade().is_some() {
                seen_alive.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(thing);
        assert_eq!(check(), 0);
    }

    #[test]
    fn test_hook_may_disarm_sibling_during_destruction() {
        let thing = Arc::new(Thing { lifecycle: Lifecycle::new() });
        let (count, check) = counter();
        let sibling = {
            let count = count.clone();
            thing.lifecycle.arm(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        let sibling = Mutex::new(Some(sibling));
        thing.lifecycle.arm(move || {
            // the sibling has already been taken out of the table, so this must not deadlock
            if let Some(token) = sibling.lock().unwrap().take() {
                token.disarm();
            }
        });
        drop(thing);
        // either the sibling fired before this hook ran, or the disarm found it already gone
        assert!(check() <= 1);
    }
}
