//! Bookkeeping shared by the in-process engines: built graphs and their sink callbacks.

use super::description::GraphTopology;
use super::traits::{GraphHandle, SinkCallback, SinkDelivery};
use crate::error::EngineError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Engine error codes used by the in-process engines.
pub mod codes {
    pub const UNKNOWN_GRAPH: i32 = 1;
    pub const NOT_STARTED: i32 = 2;
    pub const INVALID_PORT: i32 = 3;
    pub const BUILD_FAILED: i32 = 4;
    pub const SUBMIT_REJECTED: i32 = 5;
    pub const STAGE_FAILED: i32 = 6;
}

/// A built graph.
pub(crate) struct GraphEntry {
    pub handle: GraphHandle,
    pub topology: GraphTopology,
    started: AtomicBool,
    /// One slot per sink. Held for reading while a callback runs, so that
    /// clearing it waits out in-flight deliveries.
    callbacks: RwLock<Vec<Option<SinkCallback>>>,
}

impl GraphEntry {
    fn new(handle: GraphHandle, topology: GraphTopology) -> Self {
        let sinks = topology.sink_count();
        Self {
            handle,
            topology,
            started: AtomicBool::new(false),
            callbacks: RwLock::new(vec![None; sinks]),
        }
    }

    pub fn set_callback(&self, sink: usize, callback: SinkCallback) -> Result<(), EngineError> {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let slot = callbacks.get_mut(sink).ok_or_else(|| {
            EngineError::new(
                codes::INVALID_PORT,
                format!("graph '{}' has no sink {}", self.handle.name(), sink),
            )
        })?;
        *slot = Some(callback);
        Ok(())
    }

    pub fn clear_callbacks(&self) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        callbacks.iter_mut().for_each(|slot| *slot = None);
    }

    /// Invoke the callback of `delivery.sink`. Returns whether one was registered.
    pub fn dispatch(&self, delivery: SinkDelivery) -> bool {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        match callbacks.get(delivery.sink).and_then(Option::as_ref) {
            Some(callback) => {
                callback(delivery);
                true
            }
            None => false,
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn ensure_started(&self) -> Result<(), EngineError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::new(
                codes::NOT_STARTED,
                format!("graph '{}' is not started", self.handle.name()),
            ))
        }
    }

    pub fn check_source(&self, source: usize) -> Result<(), EngineError> {
        if source < self.topology.source_count() {
            Ok(())
        } else {
            Err(EngineError::new(
                codes::INVALID_PORT,
                format!("graph '{}' has no source {}", self.handle.name(), source),
            ))
        }
    }
}

/// Graphs built by one engine, keyed by handle id.
pub(crate) struct GraphTable {
    next_id: AtomicU64,
    graphs: Mutex<HashMap<u64, Arc<GraphEntry>>>,
}

impl GraphTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            graphs: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, name: &str, topology: GraphTopology) -> GraphHandle {
        let handle = GraphHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed), name);
        let entry = Arc::new(GraphEntry::new(handle.clone(), topology));
        self.lock().insert(handle.id(), entry);
        handle
    }

    pub fn get(&self, handle: &GraphHandle) -> Result<Arc<GraphEntry>, EngineError> {
        self.lock().get(&handle.id()).cloned().ok_or_else(|| {
            EngineError::new(
                codes::UNKNOWN_GRAPH,
                format!("graph '{}' ({}) is not built", handle.name(), handle.id()),
            )
        })
    }

    /// Most recently built graph for a stream name.
    pub fn find(&self, name: &str) -> Option<Arc<GraphEntry>> {
        self.lock()
            .values()
            .filter(|e| e.handle.name() == name)
            .max_by_key(|e| e.handle.id())
            .cloned()
    }

    pub fn remove(&self, handle: &GraphHandle) -> Option<Arc<GraphEntry>> {
        self.lock().remove(&handle.id())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<GraphEntry>>> {
        self.graphs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataOutput;
    use crate::engine::GraphDescription;
    use std::sync::atomic::AtomicUsize;

    fn topology() -> GraphTopology {
        GraphDescription::from_json_str(
            r#"{ "appsrc0": { "factory": "appsrc", "next": "appsink0" },
                 "appsink0": { "factory": "appsink" } }"#,
        )
        .unwrap()
        .topology()
        .unwrap()
    }

    #[test]
    fn test_dispatch_after_clear_is_dropped() {
        let table = GraphTable::new();
        let handle = table.insert("s", topology());
        let entry = table.get(&handle).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        entry
            .set_callback(0, Arc::new(move |_: SinkDelivery| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(entry.set_callback(1, Arc::new(|_: SinkDelivery| {})).is_err());

        let delivery = SinkDelivery {
            sink: 0,
            tag: None,
            output: Ok(DataOutput::new(b"x".to_vec())),
        };
        assert!(entry.dispatch(delivery.clone()));
        entry.clear_callbacks();
        assert!(!entry.dispatch(delivery));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_table_lookup() {
        let table = GraphTable::new();
        let first = table.insert("s", topology());
        let second = table.insert("s", topology());
        assert_ne!(first.id(), second.id());
        assert_eq!(table.find("s").unwrap().handle, second);
        assert!(table.find("other").is_none());

        table.remove(&first);
        assert_eq!(table.len(), 1);
        let err = table.get(&first).err().unwrap();
        assert_eq!(err.code, codes::UNKNOWN_GRAPH);
    }
}
