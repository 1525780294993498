use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::trace;

use crate::{
    ChangeKind, ChangeRecord, KeyPath, Lifecycle, Object, Observable, ObservationError, Options, RawObservationId, RawSink, Result, Value,
};

/// A thread-safe attribute store that raises raw change events: the reference host for the registry.
///
/// Attributes are addressed by key path. Dotted paths are stored as flat keys; the model does not
/// traverse into nested values.
///
/// ```rust
/// use kvo::*;
/// use std::sync::Arc;
///
/// let pet = Arc::new(Model::new().with("name", "Buffy"));
/// let _observation = Registry::global()
///     .observe(&pet, "name", Options::OLD | Options::NEW, |n: &Notification| {
///         println!("{} -> {}", n.old_value().unwrap(), n.new_value().unwrap());
///     })
///     .unwrap();
/// pet.set("name", "Willow").unwrap();
/// ```
pub struct Model {
    attributes: RwLock<HashMap<KeyPath, Value>>,
    observations: RwLock<BTreeMap<RawObservationId, RawEntry>>,
    next_id: AtomicU64,
    lifecycle: Lifecycle,
}

struct RawEntry {
    path: KeyPath,
    options: Options,
    sink: RawSink,
}

impl Default for Model {
    fn default() -> Self { Self::new() }
}

impl Model {
    pub fn new() -> Self {
        Self {
            attributes: RwLock::new(HashMap::new()),
            observations: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
            lifecycle: Lifecycle::new(),
        }
    }

    /// Builder-style initial value. Panics if `path` is not a valid key path.
    pub fn with(self, path: &str, value: impl Into<Value>) -> Self {
        let path = KeyPath::parse(path).expect("invalid key path");
        self.attributes.write().expect("attributes lock is poisoned").insert(path, value.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<Value> { self.attributes.read().expect("attributes lock is poisoned").get(path).cloned() }

    /// Replace the whole value at `path`
    pub fn set(&self, path: &str, value: impl Into<Value>) -> Result<()> {
        let path = KeyPath::parse(path)?;
        let value = value.into();
        self.emit(&path, ChangeRecord { kind: ChangeKind::Set, old_value: self.get(path.as_str()), new_value: None, indexes: None, is_prior: true });
        // The reported old value is the one this write replaced, even when writers race
        let old = self.attributes.write().expect("attributes lock is poisoned").insert(path.clone(), value.clone());
        self.emit(&path, ChangeRecord::set(old, Some(value)));
        Ok(())
    }

    /// Insert into the list at `path`. A missing attribute is treated as an empty list.
    pub fn insert(&self, path: &str, index: usize, value: impl Into<Value>) -> Result<()> {
        let path = KeyPath::parse(path)?;
        let value = value.into();
        let len = self.list_len(&path)?;
        if index > len {
            return Err(ObservationError::IndexOutOfBounds { index, len });
        }
        self.emit(&path, Self::list_change(ChangeKind::Insertion, index, None, None, true));
        self.with_list(&path, |items| {
            if index > items.len() {
                return Err(ObservationError::IndexOutOfBounds { index, len: items.len() });
            }
            items.insert(index, value.clone());
            Ok(())
        })?;
        self.emit(&path, Self::list_change(ChangeKind::Insertion, index, None, Some(value), false));
        Ok(())
    }

    /// Remove the element at `index` from the list at `path`, returning it
    pub fn remove_at(&self, path: &str, index: usize) -> Result<Value> {
        let path = KeyPath::parse(path)?;
        let prior = self.element(&path, index)?;
        self.emit(&path, Self::list_change(ChangeKind::Removal, index, Some(prior), None, true));
        let old = self.with_list(&path, |items| {
            if index >= items.len() {
                return Err(ObservationError::IndexOutOfBounds { index, len: items.len() });
            }
            Ok(items.remove(index))
        })?;
        self.emit(&path, Self::list_change(ChangeKind::Removal, index, Some(old.clone()), None, false));
        Ok(old)
    }

    /// Replace the element at `index` of the list at `path`, returning the previous element
    pub fn replace(&self, path: &str, index: usize, value: impl Into<Value>) -> Result<Value> {
        let path = KeyPath::parse(path)?;
        let value = value.into();
        let prior = self.element(&path, index)?;
        self.emit(&path, Self::list_change(ChangeKind::Replacement, index, Some(prior), None, true));
        let old = self.with_list(&path, |items| match items.get_mut(index) {
            Some(slot) => Ok(std::mem::replace(slot, value.clone())),
            None => Err(ObservationError::IndexOutOfBounds { index, len: items.len() }),
        })?;
        self.emit(&path, Self::list_change(ChangeKind::Replacement, index, Some(old.clone()), Some(value), false));
        Ok(old)
    }

    /// Number of raw observations currently registered on this model
    pub fn raw_observation_count(&self) -> usize { self.observations.read().expect("observations lock is poisoned").len() }

    fn list_len(&self, path: &KeyPath) -> Result<usize> {
        match self.attributes.read().expect("attributes lock is poisoned").get(path) {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len()),
            Some(_) => Err(ObservationError::NotAList(path.to_string())),
        }
    }

    fn element(&self, path: &KeyPath, index: usize) -> Result<Value> {
        let attributes = self.attributes.read().expect("attributes lock is poisoned");
        let items = match attributes.get(path) {
            None => &[][..],
            Some(Value::List(items)) => items.as_slice(),
            Some(_) => return Err(ObservationError::NotAList(path.to_string())),
        };
        items.get(index).cloned().ok_or(ObservationError::IndexOutOfBounds { index, len: items.len() })
    }

    /// Read, check and mutate the list at `path` under a single write guard
    fn with_list<R>(&self, path: &KeyPath, f: impl FnOnce(&mut Vec<Value>) -> Result<R>) -> Result<R> {
        let mut attributes = self.attributes.write().expect("attributes lock is poisoned");
        match attributes.entry(path.clone()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => f(items),
            _ => Err(ObservationError::NotAList(path.to_string())),
        }
    }

    fn list_change(kind: ChangeKind, index: usize, old: Option<Value>, new: Option<Value>, is_prior: bool) -> ChangeRecord {
        ChangeRecord {
            kind,
            old_value: old.map(|v| Value::List(vec![v])),
            new_value: new.map(|v| Value::List(vec![v])),
            indexes: Some(BTreeSet::from([index])),
            is_prior,
        }
    }

    /// Send `change` to every raw observation of `path`, trimmed to what each one asked for.
    /// The observation table is snapshotted first; no lock is held while sinks run.
    fn emit(&self, path: &KeyPath, change: ChangeRecord) {
        let sinks: Vec<(Options, RawSink)> = {
            let observations = self.observations.read().expect("observations lock is poisoned");
            observations
                .values()
                .filter(|entry| &entry.path == path)
                .filter(|entry| !change.is_prior || entry.options.contains(Options::PRIOR))
                .map(|entry| (entry.options, entry.sink.clone()))
                .collect()
        };
        if sinks.is_empty() {
            return;
        }
        trace!("Model emitting {:?} (prior: {}) on {} to {} sinks", change.kind, change.is_prior, path, sinks.len());
        for (options, sink) in sinks {
            let mut change = change.clone();
            if !options.contains(Options::OLD) {
                change.old_value = None;
            }
            if !options.contains(Options::NEW) {
                change.new_value = None;
            }
            sink(path, change);
        }
    }
}

impl Object for Model {
    fn lifecycle(&self) -> &Lifecycle { &self.lifecycle }
}

impl Observable for Model {
    fn register_raw(&self, path: &KeyPath, options: Options, sink: RawSink) -> RawObservationId {
        let id = RawObservationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observations.write().expect("observations lock is poisoned").insert(id, RawEntry { path: path.clone(), options, sink });
        id
    }

    fn unregister_raw(&self, id: RawObservationId) { self.observations.write().expect("observations lock is poisoned").remove(&id); }

    fn value_at(&self, path: &KeyPath) -> Option<Value> { self.get(path.as_str()) }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model").field("attributes", &*self.attributes.read().expect("attributes lock is poisoned")).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn recorder(model: &Model, path: &str, options: Options) -> Arc<Mutex<Vec<ChangeRecord>>> {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink: RawSink = {
            let records = records.clone();
            Arc::new(move |_: &KeyPath, change: ChangeRecord| records.lock().unwrap().push(change))
        };
        model.register_raw(&KeyPath::parse(path).unwrap(), options, sink);
        records
    }

    #[test]
    fn test_set_honours_options() {
        let model = Model::new().with("count", 0);
        let both = recorder(&model, "count", Options::OLD | Options::NEW);
        let new_only = recorder(&model, "count", Options::NEW);
        let other = recorder(&model, "name", Options::OLD | Options::NEW);

        model.set("count", 5).unwrap();

        assert_eq!(*both.lock().unwrap(), [ChangeRecord::set(Some(Value::Integer(0)), Some(Value::Integer(5)))]);
        assert_eq!(*new_only.lock().unwrap(), [ChangeRecord::set(None, Some(Value::Integer(5)))]);
        assert!(other.lock().unwrap().is_empty());
        assert_eq!(model.get("count"), Some(Value::Integer(5)));
    }

    #[test]
    fn test_prior_only_when_requested() {
        let model = Model::new().with("count", 1);
        let prior = recorder(&model, "count", Options::OLD | Options::PRIOR);
        let plain = recorder(&model, "count", Options::OLD);

        model.set("count", 2).unwrap();

        let prior = prior.lock().unwrap();
        assert_eq!(prior.len(), 2);
        assert!(prior[0].is_prior);
        assert_eq!(prior[0].old_value, Some(Value::Integer(1)));
        assert!(!prior[1].is_prior);
        assert_eq!(plain.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_list_mutations() {
        let model = Model::new().with("items", vec!["a", "b", "c"]);
        let records = recorder(&model, "items", Options::OLD | Options::NEW);

        model.insert("items", 2, "x").unwrap();
        assert_eq!(model.replace("items", 0, "z").unwrap(), Value::from("a"));
        assert_eq!(model.remove_at("items", 1).unwrap(), Value::from("b"));

        assert_eq!(model.get("items"), Some(Value::from(vec!["z", "x", "c"])));
        let records = records.lock().unwrap();
        assert_eq!(records[0].kind, ChangeKind::Insertion);
        assert_eq!(records[0].indexes, Some(BTreeSet::from([2])));
        assert_eq!(records[0].new_value, Some(Value::from(vec!["x"])));
        assert_eq!(records[1].kind, ChangeKind::Replacement);
        assert_eq!(records[1].old_value, Some(Value::from(vec!["a"])));
        assert_eq!(records[2].kind, ChangeKind::Removal);
        assert_eq!(records[2].indexes, Some(BTreeSet::from([1])));
    }

    #[test]
    fn test_list_errors() {
        let model = Model::new().with("count", 0).with("items", Vec::<i64>::new());
        assert_eq!(model.insert("items", 1, 5), Err(ObservationError::IndexOutOfBounds { index: 1, len: 0 }));
        assert_eq!(model.remove_at("items", 0), Err(ObservationError::IndexOutOfBounds { index: 0, len: 0 }));
        assert_eq!(model.insert("count", 0, 5), Err(ObservationError::NotAList("count".to_string())));
        assert!(model.set("", 1).is_err());
    }

    #[test]
    fn test_concurrent_sets_report_the_value_they_replaced() {
        let model = Model::new().with("count", -1);
        let records = recorder(&model, "count", Options::OLD | Options::NEW);

        std::thread::scope(|scope| {
            for t in 0..4 {
                let model = &model;
                scope.spawn(move || {
                    for i in 0..500 {
                        model.set("count", t * 1000 + i).unwrap();
                    }
                });
            }
        });

        // every written value is unique, so every replaced value is reported exactly once
        let records = records.lock().unwrap();
        let olds: HashSet<i64> = records.iter().filter_map(|r| r.old_value.as_ref()?.as_integer()).collect();
        assert_eq!(records.len(), 2000);
        assert_eq!(olds.len(), 2000);
    }

    #[test]
    fn test_unregister() {
        let model = Model::new();
        let id = model.register_raw(&KeyPath::parse("count").unwrap(), Options::NEW, Arc::new(|_: &KeyPath, _: ChangeRecord| {}));
        assert_eq!(model.raw_observation_count(), 1);
        model.unregister_raw(id);
        assert_eq!(model.raw_observation_count(), 0);
    }
}
