//! In-process device backed by one JSON tree per datastore.
//!
//! Write transactions buffer their operations and apply them atomically
//! on commit: either every operation lands or none does.

use std::sync::Arc;

use async_trait::async_trait;
use nc_domain::{DataPath, DeviceError, Store};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::device::{DeviceBroker, DeviceReadTx, DeviceWriteTx};

#[derive(Default)]
struct Trees {
    configuration: Value,
    operational: Value,
    commits: usize,
    fail_next_commit: Option<DeviceError>,
    read_failure: Option<DeviceError>,
}

impl Trees {
    fn tree(&self, store: Store) -> &Value {
        match store {
            Store::Configuration => &self.configuration,
            Store::Operational => &self.operational,
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryDevice {
    inner: Arc<Mutex<Trees>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed value at `path`.
    pub fn snapshot(&self, store: Store, path: &DataPath) -> Option<Value> {
        let trees = self.inner.lock();
        lookup(trees.tree(store), path).cloned()
    }

    /// Write directly into the committed tree, bypassing transactions.
    pub fn seed(&self, store: Store, path: &DataPath, data: Value) -> Result<(), DeviceError> {
        let mut trees = self.inner.lock();
        let tree = match store {
            Store::Configuration => &mut trees.configuration,
            Store::Operational => &mut trees.operational,
        };
        insert(tree, path, data)
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits
    }

    /// Make the next commit fail with `error`.
    pub fn fail_next_commit(&self, error: DeviceError) {
        self.inner.lock().fail_next_commit = Some(error);
    }

    /// Make every read fail with `error` until cleared with `None`.
    pub fn set_read_failure(&self, error: Option<DeviceError>) {
        self.inner.lock().read_failure = error;
    }
}

impl DeviceBroker for MemoryDevice {
    fn new_read_only(&self) -> Box<dyn DeviceReadTx> {
        Box::new(MemoryReadTx {
            device: self.clone(),
        })
    }

    fn new_write_only(&self) -> Result<Box<dyn DeviceWriteTx>, DeviceError> {
        Ok(Box::new(MemoryWriteTx {
            device: self.clone(),
            ops: Vec::new(),
        }))
    }
}

struct MemoryReadTx {
    device: MemoryDevice,
}

#[async_trait]
impl DeviceReadTx for MemoryReadTx {
    async fn read(&self, store: Store, path: &DataPath) -> Result<Option<Value>, DeviceError> {
        let trees = self.device.inner.lock();
        if let Some(err) = &trees.read_failure {
            return Err(err.clone());
        }
        Ok(lookup(trees.tree(store), path).cloned())
    }

    async fn exists(&self, store: Store, path: &DataPath) -> Result<bool, DeviceError> {
        Ok(self.read(store, path).await?.is_some())
    }
}

enum Op {
    Put(Store, DataPath, Value),
    Merge(Store, DataPath, Value),
    Delete(Store, DataPath),
}

struct MemoryWriteTx {
    device: MemoryDevice,
    ops: Vec<Op>,
}

#[async_trait]
impl DeviceWriteTx for MemoryWriteTx {
    async fn put(&mut self, store: Store, path: &DataPath, data: Value) -> Result<(), DeviceError> {
        self.ops.push(Op::Put(store, path.clone(), data));
        Ok(())
    }

    async fn merge(
        &mut self,
        store: Store,
        path: &DataPath,
        data: Value,
    ) -> Result<(), DeviceError> {
        self.ops.push(Op::Merge(store, path.clone(), data));
        Ok(())
    }

    async fn delete(&mut self, store: Store, path: &DataPath) -> Result<(), DeviceError> {
        self.ops.push(Op::Delete(store, path.clone()));
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> bool {
        true
    }

    async fn commit(self: Box<Self>) -> Result<(), DeviceError> {
        let MemoryWriteTx { device, ops } = *self;
        let mut trees = device.inner.lock();
        if let Some(err) = trees.fail_next_commit.take() {
            return Err(err);
        }

        let mut configuration = trees.configuration.clone();
        let mut operational = trees.operational.clone();
        for op in ops {
            let (store, path) = match &op {
                Op::Put(s, p, _) | Op::Merge(s, p, _) | Op::Delete(s, p) => (*s, p.clone()),
            };
            let tree = match store {
                Store::Configuration => &mut configuration,
                Store::Operational => &mut operational,
            };
            match op {
                Op::Put(_, _, data) => insert(tree, &path, data)?,
                Op::Merge(_, _, data) => merge(tree, &path, data)?,
                Op::Delete(..) => {
                    if !remove(tree, &path) {
                        return Err(DeviceError::data_missing(format!(
                            "{store} {path}: nothing to delete"
                        )));
                    }
                }
            }
        }

        trees.configuration = configuration;
        trees.operational = operational;
        trees.commits += 1;
        Ok(())
    }
}

// ── Tree helpers ──────────────────────────────────────────────────

fn lookup<'a>(tree: &'a Value, path: &DataPath) -> Option<&'a Value> {
    let mut node = tree;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() && path.is_root() => None,
        other => Some(other),
    }
}

/// Walk to the parent of `path`, creating missing containers. `None` when
/// an existing node on the way is a leaf.
fn parent_mut<'a>(tree: &'a mut Value, parents: &[String]) -> Option<&'a mut Map<String, Value>> {
    let mut node = tree;
    for segment in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()?
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    node.as_object_mut()
}

fn not_a_container(path: &DataPath) -> DeviceError {
    DeviceError::invalid_value(format!("{path}: parent node is not a container"))
}

fn insert(tree: &mut Value, path: &DataPath, data: Value) -> Result<(), DeviceError> {
    match path.split_last() {
        None => *tree = data,
        Some((parents, last)) => {
            parent_mut(tree, parents)
                .ok_or_else(|| not_a_container(path))?
                .insert(last.to_owned(), data);
        }
    }
    Ok(())
}

fn merge(tree: &mut Value, path: &DataPath, data: Value) -> Result<(), DeviceError> {
    let target = match path.split_last() {
        None => tree,
        Some((parents, last)) => parent_mut(tree, parents)
            .ok_or_else(|| not_a_container(path))?
            .entry(last.to_owned())
            .or_insert(Value::Null),
    };
    deep_merge(target, data);
    Ok(())
}

fn deep_merge(target: &mut Value, data: Value) {
    match (target, data) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                deep_merge(existing.entry(key).or_insert(Value::Null), value);
            }
        }
        (slot, value) => *slot = value,
    }
}

fn remove(tree: &mut Value, path: &DataPath) -> bool {
    let Some((parents, last)) = path.split_last() else {
        let had_data = lookup(tree, path).is_some();
        *tree = Value::Object(Map::new());
        return had_data;
    };
    let mut node = tree;
    for segment in parents {
        match node.as_object_mut().and_then(|m| m.get_mut(segment)) {
            Some(next) => node = next,
            None => return false,
        }
    }
    node.as_object_mut()
        .and_then(|m| m.remove(last))
        .is_some()
}
