use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::subscription::Released;
use crate::{KeyPath, ObjectId, Observable, Options, RawObservationId, RawSink, Subscription, SubscriptionId};

/// Per-target fan-out: holds exactly one raw observation per key path in use on the target and the
/// subscriptions interested in it, in registration order.
pub(crate) struct TargetMultiplexer {
    target: Weak<dyn Observable>,
    target_id: ObjectId,
    /// Routes raw changes for every path of this target back into the registry
    sink: RawSink,
    paths: HashMap<KeyPath, PathEntry>,
}

#[derive(Default)]
struct PathEntry {
    raw: Option<RawObservationId>,
    subscriptions: BTreeMap<SubscriptionId, Arc<Subscription>>,
}

impl TargetMultiplexer {
    /// Everything a host can be asked for. The raw observation always requests all of it and the
    /// dispatcher trims per subscription, so a raw observation never has to be replaced while in use.
    const RAW_OPTIONS: Options = Options::OLD.union(Options::NEW).union(Options::PRIOR);

    pub fn new(target: &Arc<dyn Observable>, sink: RawSink) -> Self {
        let target_id = ObjectId::of(target);
        debug!("TargetMultiplexer created for {}", target_id);
        Self { target: Arc::downgrade(target), target_id, sink, paths: HashMap::new() }
    }

    pub fn insert(&mut self, subscription: Arc<Subscription>, target: &dyn Observable) {
        let path = subscription.key_path().clone();
        self.paths.entry(path.clone()).or_default().subscriptions.insert(subscription.id(), subscription);
        self.ensure_raw_subscription(&path, target);
    }

    /// Make sure exactly one raw observation exists for `path`. Idempotent.
    pub fn ensure_raw_subscription(&mut self, path: &KeyPath, target: &dyn Observable) {
        let Some(entry) = self.paths.get_mut(path) else { return };
        if entry.raw.is_none() {
            debug!("TargetMultiplexer {} registering {}", self.target_id, path);
            entry.raw = Some(target.register_raw(path, Self::RAW_OPTIONS, self.sink.clone()));
        }
    }

    /// Returns true if the subscription was found. A target upgraded to unregister a raw observation is
    /// pushed onto `keep_alive` so that the caller can release it outside of the registry lock.
    pub fn remove(&mut self, subscription: &Subscription, keep_alive: &mut Vec<Arc<dyn Observable>>) -> bool {
        let path = subscription.key_path();
        let Some(entry) = self.paths.get_mut(path) else { return false };
        if entry.subscriptions.remove(&subscription.id()).is_none() {
            return false;
        }
        if !entry.subscriptions.is_empty() {
            return true;
        }

        match self.target.upgrade() {
            Some(target) => {
                self.remove_raw_subscription(path, &*target);
                keep_alive.push(target);
            }
            // The target is being destroyed: its raw observations go with it
            None => {
                self.paths.remove(path);
            }
        }
        true
    }

    /// Tear down the raw observation for `path` once nothing uses it any more
    fn remove_raw_subscription(&mut self, path: &KeyPath, target: &dyn Observable) {
        if let Some(PathEntry { raw: Some(id), .. }) = self.paths.remove(path) {
            debug!("TargetMultiplexer {} unregistering {}", self.target_id, path);
            target.unregister_raw(id);
        }
    }

    /// Invalidate every remaining subscription and unregister every raw observation, for a registry that
    /// is going away. What the subscriptions owned is pushed onto `released`.
    pub fn clear(&mut self, released: &mut Vec<Released>, keep_alive: &mut Vec<Arc<dyn Observable>>) {
        let target = self.target.upgrade();
        for (path, entry) in self.paths.drain() {
            released.extend(entry.subscriptions.values().filter_map(|subscription| subscription.invalidate()));
            if let (Some(target), Some(id)) = (&target, entry.raw) {
                debug!("TargetMultiplexer {} unregistering {}", self.target_id, path);
                target.unregister_raw(id);
            }
        }
        keep_alive.extend(target);
    }

    /// The subscribers for `path` in registration order
    pub fn snapshot(&self, path: &KeyPath) -> Vec<Arc<Subscription>> {
        self.paths.get(path).map(|entry| entry.subscriptions.values().cloned().collect()).unwrap_or_default()
    }

    /// Every subscription on an optional path that satisfies `predicate`
    pub fn matching(&self, path: Option<&KeyPath>, predicate: impl Fn(&Subscription) -> bool) -> Vec<Arc<Subscription>> {
        self.paths
            .iter()
            .filter(|(key, _)| path.is_none_or(|path| *key == path))
            .flat_map(|(_, entry)| entry.subscriptions.values())
            .filter(|subscription| predicate(subscription))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool { self.paths.is_empty() }

    pub fn subscription_count(&self) -> usize { self.paths.values().map(|entry| entry.subscriptions.len()).sum() }

    pub fn raw_observation_count(&self) -> usize { self.paths.values().filter(|entry| entry.raw.is_some()).count() }
}

impl Drop for TargetMultiplexer {
    fn drop(&mut self) { debug!("TargetMultiplexer dropped for {}", self.target_id); }
}
