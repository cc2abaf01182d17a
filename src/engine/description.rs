//! Declarative graph descriptions and the topology derived from them.
//!
//! A description is a JSON object mapping element names to element specs:
//!
//! ```json
//! {
//!     "stream_config": { "deviceId": "0" },
//!     "appsrc0": { "factory": "appsrc", "next": "detector" },
//!     "detector": { "factory": "model_infer", "next": ["appsink0", "appsink1"] },
//!     "appsink0": { "factory": "appsink" },
//!     "appsink1": { "factory": "appsink" }
//! }
//! ```
//!
//! Only `appsrc` (entry point) and `appsink` (exit point) elements matter to
//! the coordinator; every other factory is opaque and only contributes links.

use crate::data::{SinkSelector, SourceSelector};
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Factory name of an entry point.
pub const SOURCE_FACTORY: &str = "appsrc";
/// Factory name of an exit point.
pub const SINK_FACTORY: &str = "appsink";
/// Reserved key holding stream-wide settings.
pub const STREAM_CONFIG_KEY: &str = "stream_config";

/// Downstream link(s) of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    One(String),
    Many(Vec<String>),
}

impl NextSpec {
    pub fn targets(&self) -> Vec<&str> {
        match self {
            NextSpec::One(name) => vec![name.as_str()],
            NextSpec::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// One element of a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub factory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, serde_json::Value>,
}

impl ElementSpec {
    pub fn new(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            next: None,
            props: BTreeMap::new(),
        }
    }

    pub fn with_next(mut self, targets: &[&str]) -> Self {
        self.next = match targets {
            [] => None,
            [one] => Some(NextSpec::One(one.to_string())),
            many => Some(NextSpec::Many(many.iter().map(|s| s.to_string()).collect())),
        };
        self
    }
}

/// Parsed description of one stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphDescription {
    pub stream_config: Option<serde_json::Value>,
    pub elements: BTreeMap<String, ElementSpec>,
}

impl GraphDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON description.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Build from an already-parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(map) = value else {
            return Err(StreamError::InvalidConfig(
                "graph description must be a JSON object".to_string(),
            ));
        };

        let mut description = Self::new();
        for (name, spec) in map {
            if name == STREAM_CONFIG_KEY {
                description.stream_config = Some(spec);
                continue;
            }
            let element: ElementSpec = serde_json::from_value(spec).map_err(|e| {
                StreamError::InvalidConfig(format!("element '{}': {}", name, e))
            })?;
            description.elements.insert(name, element);
        }
        Ok(description)
    }

    /// Add an element (builder style).
    pub fn element(mut self, name: impl Into<String>, spec: ElementSpec) -> Self {
        self.elements.insert(name.into(), spec);
        self
    }

    /// Serialize back to the JSON form accepted by [`from_json_str`](Self::from_json_str).
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(config) = &self.stream_config {
            map.insert(STREAM_CONFIG_KEY.to_string(), config.clone());
        }
        for (name, spec) in &self.elements {
            map.insert(
                name.clone(),
                serde_json::to_value(spec).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }

    /// Validate links and derive the entry/exit topology.
    pub fn topology(&self) -> Result<GraphTopology> {
        GraphTopology::from_description(self)
    }
}

/// Entry points, exit points, and which exit points each entry point feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphTopology {
    sources: Vec<String>,
    sinks: Vec<String>,
    /// Reachable sink indices per source index, ascending.
    routes: Vec<Vec<usize>>,
}

/// `appsrc10` sorts after `appsrc2`.
fn port_order(name: &str) -> (u64, String) {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let number = digits.parse::<u64>().unwrap_or(u64::MAX);
    (number, name.to_string())
}

impl GraphTopology {
    pub fn from_description(description: &GraphDescription) -> Result<Self> {
        if description.elements.is_empty() {
            return Err(StreamError::InvalidConfig(
                "graph description has no elements".to_string(),
            ));
        }

        for (name, spec) in &description.elements {
            let Some(next) = &spec.next else { continue };
            if spec.factory == SINK_FACTORY {
                return Err(StreamError::InvalidConfig(format!(
                    "exit point '{}' cannot link downstream",
                    name
                )));
            }
            for target in next.targets() {
                if !description.elements.contains_key(target) {
                    return Err(StreamError::InvalidConfig(format!(
                        "element '{}' links to unknown element '{}'",
                        name, target
                    )));
                }
            }
        }

        let mut sources: Vec<&String> = description
            .elements
            .iter()
            .filter(|(_, s)| s.factory == SOURCE_FACTORY)
            .map(|(n, _)| n)
            .collect();
        sources.sort_by_key(|n| port_order(n));

        let mut sinks: Vec<&String> = description
            .elements
            .iter()
            .filter(|(_, s)| s.factory == SINK_FACTORY)
            .map(|(n, _)| n)
            .collect();
        sinks.sort_by_key(|n| port_order(n));

        let routes = sources
            .iter()
            .map(|source| {
                let mut reached: Vec<usize> = Vec::new();
                let mut visited: HashSet<&str> = HashSet::new();
                let mut stack: Vec<&str> = vec![source.as_str()];
                while let Some(current) = stack.pop() {
                    if !visited.insert(current) {
                        continue;
                    }
                    let spec = &description.elements[current];
                    if spec.factory == SINK_FACTORY {
                        if let Some(idx) = sinks.iter().position(|s| s.as_str() == current) {
                            reached.push(idx);
                        }
                        continue;
                    }
                    if let Some(next) = &spec.next {
                        stack.extend(next.targets());
                    }
                }
                reached.sort_unstable();
                reached
            })
            .collect();

        Ok(Self {
            sources: sources.into_iter().cloned().collect(),
            sinks: sinks.into_iter().cloned().collect(),
            routes,
        })
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn sinks(&self) -> &[String] {
        &self.sinks
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Sink indices fed by a source, ascending.
    pub fn sinks_fed_by(&self, source: usize) -> &[usize] {
        self.routes.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolve a source selector to its index.
    pub fn resolve_source(&self, selector: &SourceSelector) -> Result<usize> {
        match selector {
            SourceSelector::Index(i) if *i < self.sources.len() => Ok(*i),
            SourceSelector::Index(i) => Err(StreamError::InvalidLink(format!(
                "source index {} out of range, stream has {} entry point(s)",
                i,
                self.sources.len()
            ))),
            SourceSelector::Name(name) => {
                if let Some(idx) = self.sources.iter().position(|s| s == name) {
                    Ok(idx)
                } else if self.sinks.contains(name) {
                    Err(StreamError::InvalidLink(format!(
                        "'{}' is an exit point, not an entry point",
                        name
                    )))
                } else {
                    Err(StreamError::InvalidLink(format!(
                        "'{}' is not an entry point of this stream",
                        name
                    )))
                }
            }
        }
    }

    /// Resolve a sink selector to its index.
    pub fn resolve_sink(&self, selector: &SinkSelector) -> Result<usize> {
        match selector {
            SinkSelector::Index(i) if *i < self.sinks.len() => Ok(*i),
            SinkSelector::Index(i) => Err(StreamError::InvalidLink(format!(
                "sink index {} out of range, stream has {} exit point(s)",
                i,
                self.sinks.len()
            ))),
            SinkSelector::Name(name) => {
                if let Some(idx) = self.sinks.iter().position(|s| s == name) {
                    Ok(idx)
                } else if self.sources.contains(name) {
                    Err(StreamError::InvalidLink(format!(
                        "'{}' is an entry point, not an exit point",
                        name
                    )))
                } else {
                    Err(StreamError::InvalidLink(format!(
                        "'{}' is not an exit point of this stream",
                        name
                    )))
                }
            }
        }
    }
}
