use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tracing::{debug, trace, warn};

use crate::callback::Handler;
use crate::dispatch::Dispatcher;
use crate::multiplexer::TargetMultiplexer;
use crate::subscription::Released;
use crate::traits::WeakObject;
use crate::{
    Callback, ChangeRecord, IntoCallback, IntoKeyPaths, KeyPath, Object, ObjectId, Observable, Observation, ObservationError, Options,
    RawSink, Result, Subscription, SubscriptionId, UserInfo,
};

/// The notification center: a directory from target identity to that target's multiplexer.
///
/// Cheap to clone; clones share the same state. Use [`Registry::global`] for the process-wide instance,
/// or construct one with [`Registry::new`] and pass it around.
#[derive(Clone)]
pub struct Registry(Arc<Inner>);

pub(crate) struct Inner {
    state: Mutex<State>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct State {
    targets: HashMap<ObjectId, TargetMultiplexer>,
}

/// One or more targets to observe: a single object, or every member of a homogeneous collection.
/// `None` stands for a null target and is rejected.
pub trait IntoTargets<T> {
    fn into_targets(self) -> Option<Vec<Arc<T>>>;
}

impl<T> IntoTargets<T> for &Arc<T> {
    fn into_targets(self) -> Option<Vec<Arc<T>>> { Some(vec![self.clone()]) }
}

impl<T> IntoTargets<T> for Option<&Arc<T>> {
    fn into_targets(self) -> Option<Vec<Arc<T>>> { self.map(|target| vec![target.clone()]) }
}

impl<T> IntoTargets<T> for &[Arc<T>] {
    fn into_targets(self) -> Option<Vec<Arc<T>>> { Some(self.to_vec()) }
}

impl<T> IntoTargets<T> for &Vec<Arc<T>> {
    fn into_targets(self) -> Option<Vec<Arc<T>>> { Some(self.clone()) }
}

impl<T, const N: usize> IntoTargets<T> for &[Arc<T>; N] {
    fn into_targets(self) -> Option<Vec<Arc<T>>> { Some(self.to_vec()) }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}

impl Registry {
    pub fn new() -> Self { Self(Arc::new(Inner { state: Mutex::new(State::default()), next_id: AtomicU64::new(0) })) }

    /// The process-wide registry, created on first use and never torn down
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self { Self(inner) }

    fn state(&self) -> MutexGuard<'_, State> { self.0.state.lock().expect("registry lock is poisoned") }

    /// Observe `path` on `target` on behalf of `observer`.
    ///
    /// `path` may name several key paths and `target` may be a collection; one independent subscription is
    /// created for every (target, path) pair and the returned handle covers all of them. Registering the
    /// same combination twice creates two subscriptions that must be removed separately.
    ///
    /// Unless `Options::MANUAL_UNREGISTER` is given, the subscriptions are removed automatically when the
    /// observer or the target is dropped.
    pub fn add_observer<O, T>(
        &self,
        observer: &Arc<O>,
        target: impl IntoTargets<T>,
        path: impl IntoKeyPaths,
        callback: impl IntoCallback<O>,
        user_info: Option<UserInfo>,
        options: Options,
    ) -> Result<Observation>
    where
        O: Object,
        T: Observable,
    {
        let targets = target.into_targets().ok_or(ObservationError::InvalidArgument("target is null"))?;
        let paths = path.into_key_paths()?;
        let handler = callback.into_callback().erase();
        self.register(Some((WeakObject::new(observer), observer.lifecycle())), targets, paths, handler, user_info, options)
    }

    /// Observe `path` on `target` with a closure and no observer. Only the target's destruction ends
    /// the observation automatically.
    pub fn observe<T: Observable>(
        &self,
        target: impl IntoTargets<T>,
        path: impl IntoKeyPaths,
        options: Options,
        callback: impl IntoCallback<()>,
    ) -> Result<Observation> {
        let targets = target.into_targets().ok_or(ObservationError::InvalidArgument("target is null"))?;
        let paths = path.into_key_paths()?;
        let handler = match callback.into_callback() {
            Callback::Closure(f) => Handler::Closure(f),
            Callback::Method(..) => return Err(ObservationError::InvalidArgument("method callback requires an observer")),
        };
        self.register(None, targets, paths, handler, None, options)
    }

    fn register<T: Observable>(
        &self,
        observer: Option<(WeakObject, &crate::Lifecycle)>,
        targets: Vec<Arc<T>>,
        paths: BTreeSet<KeyPath>,
        handler: Handler,
        user_info: Option<UserInfo>,
        options: Options,
    ) -> Result<Observation> {
        if paths.is_empty() {
            return Err(ObservationError::InvalidArgument("no key paths given"));
        }

        let mut pending: Vec<(Arc<Subscription>, &Arc<T>)> = Vec::with_capacity(targets.len() * paths.len());
        for target in &targets {
            for path in &paths {
                let id = SubscriptionId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
                let subscription = Arc::new(Subscription::new(
                    id,
                    path.clone(),
                    options,
                    observer.as_ref().map(|(weak, _)| weak.clone()),
                    WeakObject::new(target),
                    handler.clone(),
                    user_info.clone(),
                    Arc::downgrade(&self.0),
                ));

                // Both parties are alive for the duration of this call, so the hooks can't fire before the
                // subscription is in place
                if !options.contains(Options::MANUAL_UNREGISTER) {
                    let mut hooks = Vec::with_capacity(2);
                    if let Some((_, lifecycle)) = &observer {
                        hooks.push(lifecycle.arm(self.teardown_hook(&subscription)));
                    }
                    hooks.push(target.lifecycle().arm(self.teardown_hook(&subscription)));
                    subscription.set_hooks(hooks);
                }
                pending.push((subscription, target));
            }
        }

        {
            let mut state = self.state();
            for (subscription, target) in &pending {
                let target_id = ObjectId::of(*target);
                let multiplexer = state.targets.entry(target_id).or_insert_with(|| {
                    let erased: Arc<dyn Observable> = Arc::<T>::clone(*target);
                    TargetMultiplexer::new(&erased, self.raw_sink(target_id))
                });
                multiplexer.insert(subscription.clone(), &***target);
                debug!("Registry added subscription {} for {} on {}", subscription.id(), subscription.key_path(), target_id);
            }
        }

        if options.contains(Options::INITIAL) {
            for (subscription, target) in &pending {
                let change = ChangeRecord::set(None, target.value_at(subscription.key_path()));
                Dispatcher::dispatch(subscription.key_path(), &change, std::slice::from_ref(subscription));
            }
        }

        let subscriptions = pending.into_iter().map(|(subscription, _)| subscription).collect();
        Ok(Observation::new(subscriptions))
    }

    /// Remove every subscription matching the given fields; `None` matches anything. A closure subscription
    /// never matches a selector. Fails if neither observer nor target is given.
    ///
    /// Returns the number of subscriptions removed.
    pub fn remove_observer(
        &self,
        observer: Option<ObjectId>,
        target: Option<ObjectId>,
        path: Option<&str>,
        selector: Option<&str>,
    ) -> Result<usize> {
        if observer.is_none() && target.is_none() {
            return Err(ObservationError::InvalidArgument("observer and target are both null"));
        }
        let path = path.map(KeyPath::parse).transpose()?;

        let mut keep_alive = Vec::new();
        let mut released = Vec::new();
        let removed = {
            let mut state = self.state();
            let matches: Vec<Arc<Subscription>> = state
                .targets
                .iter()
                .filter(|(id, _)| target.is_none_or(|target| **id == target))
                .flat_map(|(_, multiplexer)| {
                    multiplexer.matching(path.as_ref(), |subscription| {
                        observer.is_none_or(|observer| subscription.observer_id() == Some(observer))
                            && selector.is_none_or(|name| subscription.selector().is_some_and(|s| s.name() == name))
                    })
                })
                .collect();
            matches.iter().filter(|subscription| state.detach(subscription, &mut released, &mut keep_alive)).count()
        };
        debug!("Registry removed {} subscriptions matching observer={:?} target={:?} path={:?}", removed, observer, target, path);
        Ok(removed)
    }

    /// Remove an observation by handle. Idempotent.
    pub fn remove_observation(&self, observation: &Observation) { self.remove_subscriptions(observation.subscriptions().iter().map(Arc::as_ref)); }

    pub(crate) fn remove_subscriptions<'a>(&self, subscriptions: impl IntoIterator<Item = &'a Subscription>) -> usize {
        // Declared before the guard so both are dropped after it
        let mut keep_alive = Vec::new();
        let mut released = Vec::new();
        let mut state = self.state();
        let removed = subscriptions.into_iter().filter(|subscription| state.detach(subscription, &mut released, &mut keep_alive)).count();
        drop(state);
        removed
    }

    fn teardown_hook(&self, subscription: &Arc<Subscription>) -> impl FnOnce() + Send + 'static {
        let registry: Weak<Inner> = Arc::downgrade(&self.0);
        let subscription = Arc::downgrade(subscription);
        move || {
            if let (Some(inner), Some(subscription)) = (registry.upgrade(), subscription.upgrade()) {
                trace!("Registry tearing down subscription {} on destruction", subscription.id());
                Registry(inner).remove_subscriptions([subscription.as_ref()]);
            }
        }
    }

    fn raw_sink(&self, target: ObjectId) -> RawSink {
        let registry: Weak<Inner> = Arc::downgrade(&self.0);
        Arc::new(move |path: &KeyPath, change: ChangeRecord| {
            if let Some(inner) = registry.upgrade() {
                Registry(inner).on_raw_change(target, path, change);
            }
        })
    }

    /// Entry point for raw change events from a host
    fn on_raw_change(&self, target: ObjectId, path: &KeyPath, change: ChangeRecord) {
        let snapshot = {
            let state = self.state();
            match state.targets.get(&target) {
                Some(multiplexer) => multiplexer.snapshot(path),
                None => {
                    warn!("Registry received a change on {} for {} which has no observations", path, target);
                    return;
                }
            }
        };
        trace!("Registry dispatching {:?} on {} of {} to {} subscriptions", change.kind, path, target, snapshot.len());
        Dispatcher::dispatch(path, &change, &snapshot);
    }

    /// Number of targets with at least one live subscription
    pub fn target_count(&self) -> usize { self.state().targets.len() }

    pub fn subscription_count(&self) -> usize { self.state().targets.values().map(TargetMultiplexer::subscription_count).sum() }

    /// Number of raw observations the registry holds on `target` (at most one per key path)
    pub fn raw_observation_count(&self, target: ObjectId) -> usize {
        self.state().targets.get(&target).map(TargetMultiplexer::raw_observation_count).unwrap_or(0)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Subscriptions may outlive their registry through `Observation` handles. Release everything they
        // hold on observers and targets, and the raw observations on targets.
        let mut keep_alive = Vec::new();
        let mut released = Vec::new();
        let state = self.state.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, mut multiplexer) in state.targets.drain() {
            multiplexer.clear(&mut released, &mut keep_alive);
        }
        debug!("Registry dropped, released {} subscriptions", released.len());
    }
}

impl State {
    /// Invalidate a subscription and take it out of its multiplexer, dropping the multiplexer once empty.
    /// Returns false if the subscription was already invalid.
    fn detach(&mut self, subscription: &Subscription, released: &mut Vec<Released>, keep_alive: &mut Vec<Arc<dyn Observable>>) -> bool {
        let Some(owned) = subscription.invalidate() else { return false };
        released.push(owned);

        let target_id = subscription.target_id();
        if let Some(multiplexer) = self.targets.get_mut(&target_id) {
            multiplexer.remove(subscription, keep_alive);
            if multiplexer.is_empty() {
                self.targets.remove(&target_id);
            }
        }
        debug!("Registry removed subscription {} for {} on {}", subscription.id(), subscription.key_path(), target_id);
        true
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Registry").field("targets", &state.targets.len()).finish()
    }
}
