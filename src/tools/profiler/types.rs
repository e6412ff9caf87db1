// Types module for profiler
// Contains profiler configuration, session states and trace event records

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::model::{AttrValue, Attributes, NodeId};

/// Category the engine assigns to operator execution events
pub const OPERATOR_CATEGORY: &str = "operator";

/// Attribute keys attached to trace events
pub mod attr_keys {
    pub const LAYER_SEQUENCE_INDEX: &str = "layer_sequence_index";
    pub const OPERATOR_NAME: &str = "operator_name";
    pub const OP_NAME: &str = "op_name";
    pub const LAYER_NAME: &str = "layer_name";
    pub const SHAPE: &str = "shape";
}

/// Native profiler configuration.
///
/// Every flag is passed to the engine verbatim as `"true"`/`"false"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileOptions {
    /// Profile every kind of event
    pub profile_all: bool,
    /// Trace operators executed through the symbolic (graph) executor
    pub profile_symbolic: bool,
    /// Trace operators executed imperatively
    pub profile_imperative: bool,
    /// Trace memory allocations
    pub profile_memory: bool,
    /// Trace C API calls
    pub profile_api: bool,
    /// Keep appending to the dump file instead of writing it once
    pub continuous_dump: bool,
    /// Collect aggregate statistics alongside the trace
    pub aggregate_stats: bool,
    /// Seconds between dumps in continuous mode
    pub dump_period: Option<f64>,
    /// Dump file; a temp-dir path is derived when unset
    pub filename: Option<PathBuf>,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            profile_all: false,
            profile_symbolic: true,
            profile_imperative: true,
            profile_memory: false,
            profile_api: false,
            continuous_dump: false,
            aggregate_stats: false,
            dump_period: None,
            filename: None,
        }
    }
}

impl ProfileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_all(mut self, enable: bool) -> Self {
        self.profile_all = enable;
        self
    }

    pub fn profile_symbolic(mut self, enable: bool) -> Self {
        self.profile_symbolic = enable;
        self
    }

    pub fn profile_imperative(mut self, enable: bool) -> Self {
        self.profile_imperative = enable;
        self
    }

    pub fn profile_memory(mut self, enable: bool) -> Self {
        self.profile_memory = enable;
        self
    }

    pub fn profile_api(mut self, enable: bool) -> Self {
        self.profile_api = enable;
        self
    }

    pub fn continuous_dump(mut self, enable: bool) -> Self {
        self.continuous_dump = enable;
        self
    }

    pub fn aggregate_stats(mut self, enable: bool) -> Self {
        self.aggregate_stats = enable;
        self
    }

    pub fn dump_period(mut self, seconds: f64) -> Self {
        self.dump_period = Some(seconds);
        self
    }

    pub fn filename(mut self, path: impl Into<PathBuf>) -> Self {
        self.filename = Some(path.into());
        self
    }

    /// Key/value pairs for the engine's profiler configuration call
    pub fn to_native_params(&self, dump_path: &Path) -> Vec<(String, String)> {
        let flags = [
            ("profile_all", self.profile_all),
            ("profile_symbolic", self.profile_symbolic),
            ("profile_imperative", self.profile_imperative),
            ("profile_memory", self.profile_memory),
            ("profile_api", self.profile_api),
            ("continuous_dump", self.continuous_dump),
            ("aggregate_stats", self.aggregate_stats),
        ];

        let mut params: Vec<(String, String)> = flags
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        if let Some(period) = self.dump_period {
            params.push(("dump_period".to_string(), period.to_string()));
        }
        params.push(("filename".to_string(), dump_path.display().to_string()));
        params
    }
}

/// Lifecycle state of a profiling session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProfileState {
    NotStarted,
    Started,
    Paused,
    Stopped,
    Dumped,
    Read,
}

impl ProfileState {
    /// The native profiler has been started at some point
    pub fn is_started(&self) -> bool {
        !matches!(self, ProfileState::NotStarted)
    }

    /// The native profiler has been stopped (or was never needed again)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProfileState::Stopped | ProfileState::Dumped | ProfileState::Read)
    }

    /// The native profiler is currently collecting (possibly paused)
    pub fn is_running(&self) -> bool {
        matches!(self, ProfileState::Started | ProfileState::Paused)
    }
}

/// A pause/resume interval within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseInterval {
    pub paused_at: SystemTime,
    pub resumed_at: Option<SystemTime>,
}

/// One operator execution (or other engine activity) collapsed from its
/// begin/end markers
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub category: String,
    /// Raw label as emitted by the engine
    pub name: String,
    pub pid: u64,
    pub tid: u64,
    /// Raw engine timestamps in microseconds
    pub begin_ts: u64,
    pub end_ts: u64,
    /// Wall-clock times derived from the raw timestamps
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    /// Position among the collapsed events of the dump
    pub sequence: usize,
    /// Graph node this event was correlated with
    pub node_id: Option<NodeId>,
    pub attributes: Attributes,
}

impl TraceEvent {
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.end_ts.saturating_sub(self.begin_ts))
    }

    pub fn is_operator(&self) -> bool {
        self.category == OPERATOR_CATEGORY
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }
}

/// Parsed contents of a profiler dump
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub events: Vec<TraceEvent>,
}

impl Trace {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    pub fn operator_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(|e| e.is_operator())
    }
}

/// Trace whose events carry graph correlation attributes, ready for publication
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTrace {
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub events: Vec<TraceEvent>,
    /// Operator events matched to a graph node
    pub matched_events: usize,
}

impl EnrichedTrace {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }

    /// Events correlated with the given node
    pub fn events_for_node(&self, id: NodeId) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(move |e| e.node_id == Some(id))
    }
}

/// Aggregated time spent in one operator label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorSummary {
    pub op_name: String,
    pub calls: usize,
    pub total: Duration,
}

impl OperatorSummary {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / self.calls as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
