// Profiler module
//
// This module drives the native engine's profiler through a forward-only
// session state machine, parses its dump files and correlates the recorded
// events with the operators of the model graph.

mod types;
mod core;
mod reader;
mod correlator;
mod export;
mod utils;

// Re-export public API
pub use types::{
    attr_keys, EnrichedTrace, OperatorSummary, PauseInterval, ProfileOptions, ProfileState,
    Trace, TraceEvent, OPERATOR_CATEGORY,
};
pub use self::core::{default_dump_path, ProfileSession};
pub use reader::{collapse_events, parse_trace, read_trace_file, RawTraceEvent};
pub use correlator::TraceCorrelator;
pub use export::{
    operator_summary, publish_trace, to_chrome_trace, to_csv, write_csv, LogSpanSink, SpanRecord,
    SpanSink, ROOT_SPAN_NAME,
};
pub use utils::{parse_event_label, sanitize_dump, ClockReference, EventLabel};
