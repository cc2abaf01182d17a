//! Engine driven by hand, for deterministic tests.
//!
//! Submissions are recorded instead of executed; results are fired into the
//! registered sink callbacks with [`ManualEngine::deliver`] or
//! [`ManualEngine::deliver_to`] on the calling thread.

use super::description::GraphDescription;
use super::graph::{codes, GraphTable};
use super::traits::{
    ExecutionEngine, FrameTag, GraphHandle, SinkCallback, SinkDelivery, Submission,
};
use crate::data::DataOutput;
use crate::error::EngineError;
use std::sync::Mutex;

#[derive(Default)]
struct Faults {
    build: Option<EngineError>,
    submit: Option<EngineError>,
    /// Remaining successful submits before `submit` fires.
    submit_after: usize,
}

/// Records submissions and delivers results on demand.
pub struct ManualEngine {
    graphs: GraphTable,
    submissions: Mutex<Vec<(String, Submission)>>,
    faults: Mutex<Faults>,
}

impl ManualEngine {
    pub fn new() -> Self {
        Self {
            graphs: GraphTable::new(),
            submissions: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Make the next `build_graph` fail with `error`.
    pub fn fail_next_build(&self, error: EngineError) {
        self.lock_faults().build = Some(error);
    }

    /// Make the next `submit` fail with `error`.
    pub fn fail_next_submit(&self, error: EngineError) {
        self.fail_submit_after(0, error);
    }

    /// Let `successes` submits through, then fail one with `error`.
    pub fn fail_submit_after(&self, successes: usize, error: EngineError) {
        let mut faults = self.lock_faults();
        faults.submit = Some(error);
        faults.submit_after = successes;
    }

    /// Submissions recorded for a stream, oldest first.
    pub fn submissions(&self, stream: &str) -> Vec<Submission> {
        self.lock_submissions()
            .iter()
            .filter(|(name, _)| name == stream)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn last_submission(&self, stream: &str) -> Option<Submission> {
        self.submissions(stream).pop()
    }

    /// Fire a raw delivery at `sink` of the stream's current graph.
    ///
    /// Returns `false` when no callback was registered to receive it.
    pub fn deliver(
        &self,
        stream: &str,
        sink: usize,
        tag: Option<FrameTag>,
        output: Result<DataOutput, EngineError>,
    ) -> bool {
        match self.graphs.find(stream) {
            Some(entry) => entry.dispatch(SinkDelivery { sink, tag, output }),
            None => false,
        }
    }

    /// Deliver a successful result for a correlated submission.
    pub fn deliver_to(&self, stream: &str, sink: usize, unique_id: u64, output: DataOutput) -> bool {
        let origin = self
            .lock_submissions()
            .iter()
            .rev()
            .find(|(name, s)| name == stream && s.tag.unique_id == Some(unique_id))
            .map(|(_, s)| s.tag.origin)
            .unwrap_or(0);
        self.deliver(
            stream,
            sink,
            Some(FrameTag::correlated(origin, unique_id)),
            Ok(output),
        )
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_submissions(&self) -> std::sync::MutexGuard<'_, Vec<(String, Submission)>> {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for ManualEngine {
    fn name(&self) -> &str {
        "manual"
    }

    fn build_graph(
        &self,
        name: &str,
        description: &GraphDescription,
    ) -> Result<GraphHandle, EngineError> {
        if let Some(error) = self.lock_faults().build.take() {
            return Err(error);
        }
        let topology = description
            .topology()
            .map_err(|e| EngineError::new(codes::BUILD_FAILED, e.to_string()))?;
        Ok(self.graphs.insert(name, topology))
    }

    fn register_sink_callback(
        &self,
        graph: &GraphHandle,
        sink: usize,
        callback: SinkCallback,
    ) -> Result<(), EngineError> {
        self.graphs.get(graph)?.set_callback(sink, callback)
    }

    fn unregister_sink_callbacks(&self, graph: &GraphHandle) {
        if let Ok(entry) = self.graphs.get(graph) {
            entry.clear_callbacks();
        }
    }

    fn start(&self, graph: &GraphHandle) -> Result<(), EngineError> {
        self.graphs.get(graph)?.mark_started();
        Ok(())
    }

    fn submit(&self, graph: &GraphHandle, submission: Submission) -> Result<(), EngineError> {
        let entry = self.graphs.get(graph)?;
        entry.ensure_started()?;
        entry.check_source(submission.source)?;

        {
            let mut faults = self.lock_faults();
            if faults.submit.is_some() {
                if faults.submit_after == 0 {
                    if let Some(error) = faults.submit.take() {
                        return Err(error);
                    }
                } else {
                    faults.submit_after -= 1;
                }
            }
        }

        self.lock_submissions()
            .push((graph.name().to_string(), submission));
        Ok(())
    }

    fn teardown(&self, graph: &GraphHandle) {
        if let Some(entry) = self.graphs.remove(graph) {
            entry.clear_callbacks();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataInput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn description() -> GraphDescription {
        GraphDescription::from_json_str(
            r#"{ "appsrc0": { "factory": "appsrc", "next": "appsink0" },
                 "appsink0": { "factory": "appsink" } }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_records_and_delivers() {
        let engine = ManualEngine::new();
        let handle = engine.build_graph("cam", &description()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        engine
            .register_sink_callback(&handle, 0, Arc::new(move |d: SinkDelivery| {
                assert_eq!(d.tag.and_then(|t| t.unique_id), Some(5));
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        engine.start(&handle).unwrap();

        engine
            .submit(
                &handle,
                Submission {
                    source: 0,
                    tag: FrameTag::correlated(0, 5),
                    input: DataInput::new(b"f".to_vec()),
                },
            )
            .unwrap();
        assert_eq!(engine.submissions("cam").len(), 1);
        assert!(engine.deliver_to("cam", 0, 5, DataOutput::new(b"r".to_vec())));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!engine.deliver_to("other", 0, 5, DataOutput::default()));
    }

    #[test]
    fn test_injected_faults() {
        let engine = ManualEngine::new();
        engine.fail_next_build(EngineError::new(9, "no device"));
        assert_eq!(engine.build_graph("a", &description()).unwrap_err().code, 9);

        let handle = engine.build_graph("a", &description()).unwrap();
        engine.start(&handle).unwrap();
        engine.fail_submit_after(1, EngineError::new(7, "queue full"));

        let submission = Submission {
            source: 0,
            tag: FrameTag::indexed(0),
            input: DataInput::default(),
        };
        assert!(engine.submit(&handle, submission.clone()).is_ok());
        assert_eq!(engine.submit(&handle, submission.clone()).unwrap_err().code, 7);
        assert!(engine.submit(&handle, submission).is_ok());
    }
}
