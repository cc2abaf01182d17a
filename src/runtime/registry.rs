//! Name-keyed table of live streams.

use super::management::{Maintained, ManagementThreadPool};
use crate::config::RuntimeConfig;
use crate::data::{DataInput, DataOutput, MultiResult, SinkSelector, SourceSelector};
use crate::engine::{ExecutionEngine, GraphDescription};
use crate::error::{Result, StreamError};
use crate::stream::PipelineInstance;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// A name's place in the table.
enum Slot {
    /// Reserved while the engine builds the graph.
    Building,
    Live(Arc<PipelineInstance>),
    /// Being torn down.
    Stopping,
}

/// Creates, finds, and destroys streams by name.
///
/// The table lock is held only for lookups and inserts; building and tearing
/// down graphs happens outside it. A name is reserved for the whole time its
/// stream is being built or destroyed, so two threads can never race to
/// create or destroy the same stream.
pub struct PipelineRegistry {
    engine: Arc<dyn ExecutionEngine>,
    config: RuntimeConfig,
    pool: Arc<ManagementThreadPool>,
    streams: Mutex<HashMap<String, Slot>>,
}

impl PipelineRegistry {
    /// Registry backed by the process-wide management pool.
    pub fn new(engine: Arc<dyn ExecutionEngine>, config: RuntimeConfig) -> Self {
        let pool = ManagementThreadPool::global(&config);
        Self::with_pool(engine, config, pool)
    }

    pub fn with_pool(
        engine: Arc<dyn ExecutionEngine>,
        config: RuntimeConfig,
        pool: Arc<ManagementThreadPool>,
    ) -> Self {
        Self {
            engine,
            config: config.normalized(),
            pool,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ManagementThreadPool> {
        &self.pool
    }

    /// Build, start, and register a stream.
    ///
    /// If anything fails the name is released again.
    pub fn create(&self, name: &str, description: &GraphDescription) -> Result<Arc<PipelineInstance>> {
        {
            let mut streams = self.lock();
            if streams.contains_key(name) {
                return Err(StreamError::AlreadyExists(name.to_string()));
            }
            if streams.len() >= self.config.max_streams {
                return Err(StreamError::InvalidConfig(format!(
                    "stream limit of {} reached",
                    self.config.max_streams
                )));
            }
            streams.insert(name.to_string(), Slot::Building);
        }

        if let Err(err) = self.pool.acquire() {
            self.lock().remove(name);
            return Err(err);
        }

        let instance =
            match PipelineInstance::create(name, description, self.engine.clone(), &self.config) {
                Ok(instance) => Arc::new(instance),
                Err(err) => {
                    self.lock().remove(name);
                    self.pool.release();
                    tracing::error!(stream = name, error = %err, "stream creation failed");
                    return Err(err);
                }
            };

        let weak: Weak<dyn Maintained> = Arc::downgrade(&(instance.clone() as Arc<dyn Maintained>));
        self.pool.watch(weak);
        self.lock()
            .insert(name.to_string(), Slot::Live(instance.clone()));
        tracing::info!(stream = name, "stream created");
        Ok(instance)
    }

    /// Parse a JSON description and create a stream from it.
    pub fn create_from_json(&self, name: &str, description: &str) -> Result<Arc<PipelineInstance>> {
        let description = GraphDescription::from_json_str(description)?;
        self.create(name, &description)
    }

    /// Create every stream of a `{ "name": description, ... }` object.
    ///
    /// Stops at the first failure; streams created before it stay registered.
    pub fn create_multiple(&self, descriptions: &str) -> Result<Vec<String>> {
        let value: serde_json::Value = serde_json::from_str(descriptions)?;
        let serde_json::Value::Object(streams) = value else {
            return Err(StreamError::InvalidConfig(
                "stream set must be a JSON object".to_string(),
            ));
        };

        let mut created = Vec::with_capacity(streams.len());
        for (name, description) in streams {
            let description = GraphDescription::from_value(description)?;
            self.create(&name, &description)?;
            created.push(name);
        }
        Ok(created)
    }

    /// [`create_multiple`](Self::create_multiple) from a file.
    pub fn create_from_file(&self, path: impl AsRef<Path>) -> Result<Vec<String>> {
        let text = std::fs::read_to_string(path)?;
        self.create_multiple(&text)
    }

    /// Look up a live stream.
    pub fn get(&self, name: &str) -> Result<Arc<PipelineInstance>> {
        match self.lock().get(name) {
            Some(Slot::Live(instance)) => Ok(instance.clone()),
            _ => Err(StreamError::StreamNotFound(name.to_string())),
        }
    }

    /// Stop a stream and forget it.
    pub fn destroy(&self, name: &str) -> Result<()> {
        let instance = {
            let mut streams = self.lock();
            match streams.remove(name) {
                Some(Slot::Live(instance)) => {
                    streams.insert(name.to_string(), Slot::Stopping);
                    instance
                }
                Some(other) => {
                    streams.insert(name.to_string(), other);
                    return Err(StreamError::StreamNotFound(name.to_string()));
                }
                None => return Err(StreamError::StreamNotFound(name.to_string())),
            }
        };

        instance.shutdown();
        self.lock().remove(name);
        self.pool.release();
        tracing::info!(stream = name, "stream destroyed");
        Ok(())
    }

    /// Stop every live stream. Returns how many were stopped.
    pub fn destroy_all(&self) -> usize {
        let stopping: Vec<(String, Arc<PipelineInstance>)> = {
            let mut streams = self.lock();
            streams
                .iter_mut()
                .filter_map(|(name, slot)| match std::mem::replace(slot, Slot::Stopping) {
                    Slot::Live(instance) => Some((name.clone(), instance)),
                    other => {
                        *slot = other;
                        None
                    }
                })
                .collect()
        };

        stopping.par_iter().for_each(|(_, instance)| instance.shutdown());

        let mut streams = self.lock();
        for (name, _) in &stopping {
            streams.remove(name);
        }
        drop(streams);
        for _ in &stopping {
            self.pool.release();
        }

        if !stopping.is_empty() {
            tracing::info!(count = stopping.len(), "all streams destroyed");
        }
        stopping.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        matches!(self.lock().get(name), Some(Slot::Live(_)))
    }

    /// Names of live streams, sorted.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of live streams.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn send(&self, name: &str, source: impl Into<SourceSelector>, input: DataInput) -> Result<()> {
        self.get(name)?.send(source, input)
    }

    pub fn send_with_id(
        &self,
        name: &str,
        source: impl Into<SourceSelector>,
        input: DataInput,
    ) -> Result<u64> {
        self.get(name)?.send_with_id(source, input)
    }

    pub fn send_multi(
        &self,
        name: &str,
        sources: &[SourceSelector],
        inputs: Vec<DataInput>,
    ) -> Result<u64> {
        self.get(name)?.send_multi(sources, inputs)
    }

    pub fn get_result(
        &self,
        name: &str,
        sink: impl Into<SinkSelector>,
        timeout: Duration,
    ) -> Result<DataOutput> {
        self.get(name)?.get(sink, timeout)
    }

    pub fn get_result_with_id(&self, name: &str, id: u64, timeout: Duration) -> Result<DataOutput> {
        self.get(name)?.get_with_id(id, timeout)
    }

    pub fn get_multi_result(&self, name: &str, id: u64, timeout: Duration) -> Result<MultiResult> {
        self.get(name)?.get_multi(id, timeout)
    }

    pub fn drop_result(&self, name: &str, id: u64) -> Result<()> {
        self.get(name)?.drop_result(id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        self.destroy_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ManualEngine;
    use crate::error::{EngineError, ErrorKind};
    use crate::runtime::PoolState;

    const DESC: &str = r#"{
        "appsrc0": { "factory": "appsrc", "next": "appsink0" },
        "appsink0": { "factory": "appsink" }
    }"#;

    fn registry() -> (Arc<ManualEngine>, PipelineRegistry) {
        let engine = Arc::new(ManualEngine::new());
        let pool = Arc::new(ManagementThreadPool::new(
            Duration::from_millis(20),
            Duration::from_millis(20),
        ));
        let registry = PipelineRegistry::with_pool(engine.clone(), RuntimeConfig::default(), pool);
        (engine, registry)
    }

    #[test]
    fn test_create_get_destroy() {
        let (_engine, registry) = registry();
        registry.create_from_json("p", DESC).unwrap();
        assert!(registry.contains("p"));
        assert_eq!(registry.pool().ref_count(), 1);

        let err = registry.create_from_json("p", DESC).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        registry.destroy("p").unwrap();
        assert!(registry.get("p").unwrap_err().is_not_found());
        assert!(registry.destroy("p").unwrap_err().is_not_found());
        assert_eq!(registry.pool().ref_count(), 0);
        assert_eq!(registry.pool().state(), PoolState::Stopped);
    }

    #[test]
    fn test_failed_create_releases_name() {
        let (engine, registry) = registry();
        engine.fail_next_build(EngineError::new(4, "bad element"));
        let err = registry.create_from_json("p", DESC).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineFailure);
        assert!(!registry.contains("p"));
        assert_eq!(registry.pool().ref_count(), 0);

        registry.create_from_json("p", DESC).unwrap();
    }

    #[test]
    fn test_invalid_description_rejected() {
        let (_engine, registry) = registry();
        let err = registry.create_from_json("p", "not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stream_limit() {
        let engine = Arc::new(ManualEngine::new());
        let config = RuntimeConfig {
            max_streams: 1,
            ..RuntimeConfig::default()
        };
        let pool = Arc::new(ManagementThreadPool::from_config(&config));
        let registry = PipelineRegistry::with_pool(engine, config, pool);
        registry.create_from_json("a", DESC).unwrap();
        let err = registry.create_from_json("b", DESC).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_create_multiple_and_destroy_all() {
        let (engine, registry) = registry();
        let set = format!(r#"{{ "cam0": {DESC}, "cam1": {DESC} }}"#);
        let created = registry.create_multiple(&set).unwrap();
        assert_eq!(created, vec!["cam0".to_string(), "cam1".to_string()]);
        assert_eq!(registry.stream_names(), created);
        assert_eq!(registry.pool().ref_count(), 2);

        assert_eq!(registry.destroy_all(), 2);
        assert!(registry.is_empty());
        assert_eq!(engine.graph_count(), 0);
        assert_eq!(registry.pool().ref_count(), 0);
    }

    #[test]
    fn test_send_and_get_by_name() {
        let (engine, registry) = registry();
        registry.create_from_json("p", DESC).unwrap();
        let id = registry
            .send_with_id("p", "appsrc0", DataInput::new(b"in".to_vec()))
            .unwrap();
        engine.deliver_to("p", 0, id, DataOutput::new(b"out".to_vec()));
        let output = registry
            .get_result_with_id("p", id, Duration::from_millis(100))
            .unwrap();
        assert_eq!(output.data, b"out");

        assert!(registry
            .send_with_id("missing", 0, DataInput::default())
            .unwrap_err()
            .is_not_found());
    }
}
