// Export module for profiler
// Contains span publication and file formats for enriched traces

use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{AttrValue, Attributes};

use super::types::{attr_keys, EnrichedTrace, OperatorSummary, TraceEvent};

/// Name of the span enclosing a whole profiling session
pub const ROOT_SPAN_NAME: &str = "mxnet.profile";

/// Span handed to a telemetry sink
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    pub attributes: Attributes,
}

impl SpanRecord {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

/// Receiver of published spans, such as a tracing exporter
pub trait SpanSink {
    fn emit(&mut self, span: SpanRecord) -> Result<()>;
}

impl SpanSink for Vec<SpanRecord> {
    fn emit(&mut self, span: SpanRecord) -> Result<()> {
        self.push(span);
        Ok(())
    }
}

/// Sink that writes each span to the `log` facade at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpanSink;

impl SpanSink for LogSpanSink {
    fn emit(&mut self, span: SpanRecord) -> Result<()> {
        log::debug!(
            "span {} (parent {:?}) `{}` took {:?} {:?}",
            span.id,
            span.parent_id,
            span.name,
            span.duration(),
            span.attributes
        );
        Ok(())
    }
}

/// Emit a root span covering the session followed by one child span per event
pub fn publish_trace<S: SpanSink + ?Sized>(trace: &EnrichedTrace, sink: &mut S) -> Result<()> {
    let mut root_attributes = Attributes::new();
    root_attributes.insert("events".to_string(), AttrValue::from(trace.events.len()));
    root_attributes.insert("matched_events".to_string(), AttrValue::from(trace.matched_events));

    sink.emit(SpanRecord {
        id: 0,
        parent_id: None,
        name: ROOT_SPAN_NAME.to_string(),
        start_time: trace.start_time,
        end_time: trace.end_time,
        attributes: root_attributes,
    })?;

    for (offset, event) in trace.events.iter().enumerate() {
        let mut attributes = event.attributes.clone();
        attributes.insert("category".to_string(), AttrValue::from(event.category.as_str()));
        sink.emit(SpanRecord {
            id: offset as u64 + 1,
            parent_id: Some(0),
            name: span_name(event),
            start_time: event.start_time,
            end_time: event.end_time,
            attributes,
        })?;
    }

    log::debug!("published {} spans", trace.events.len() + 1);
    Ok(())
}

// Matched operators are named after their graph node
fn span_name(event: &TraceEvent) -> String {
    event
        .attribute(attr_keys::OPERATOR_NAME)
        .or_else(|| event.attribute(attr_keys::OP_NAME))
        .map(|v| v.to_string())
        .unwrap_or_else(|| event.name.clone())
}

#[derive(Serialize)]
struct ChromeTraceEvent<'a> {
    name: &'a str,
    cat: &'a str,
    ph: &'static str,
    ts: u64,
    dur: u64,
    pid: u64,
    tid: u64,
    args: &'a Attributes,
}

#[derive(Serialize)]
struct ChromeTrace<'a> {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent<'a>>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
}

/// Serialize as a Chrome trace document of complete (`"X"`) events
pub fn to_chrome_trace(trace: &EnrichedTrace) -> Result<String> {
    let document = ChromeTrace {
        trace_events: trace
            .events
            .iter()
            .map(|event| ChromeTraceEvent {
                name: &event.name,
                cat: &event.category,
                ph: "X",
                ts: event.begin_ts,
                dur: event.end_ts.saturating_sub(event.begin_ts),
                pid: event.pid,
                tid: event.tid,
                args: &event.attributes,
            })
            .collect(),
        display_time_unit: "ms",
    };

    serde_json::to_string_pretty(&document)
        .map_err(|e| Error::Export(format!("failed to serialize chrome trace: {}", e)))
}

#[derive(Serialize)]
struct CsvRow<'a> {
    sequence: usize,
    category: &'a str,
    name: &'a str,
    op_name: String,
    operator_name: String,
    layer_sequence_index: String,
    node_id: Option<usize>,
    begin_us: u64,
    end_us: u64,
    duration_us: u64,
}

/// Write one CSV row per event, with a header
pub fn write_csv<W: Write>(trace: &EnrichedTrace, writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for event in &trace.events {
        let text = |key: &str| event.attribute(key).map(|v| v.to_string()).unwrap_or_default();
        csv_writer
            .serialize(CsvRow {
                sequence: event.sequence,
                category: &event.category,
                name: &event.name,
                op_name: text(attr_keys::OP_NAME),
                operator_name: text(attr_keys::OPERATOR_NAME),
                layer_sequence_index: text(attr_keys::LAYER_SEQUENCE_INDEX),
                node_id: event.node_id,
                begin_us: event.begin_ts,
                end_us: event.end_ts,
                duration_us: event.end_ts.saturating_sub(event.begin_ts),
            })
            .map_err(|e| Error::Export(format!("failed to write csv row: {}", e)))?;
    }

    csv_writer
        .flush()
        .map_err(|e| Error::Export(format!("failed to flush csv: {}", e)))
}

/// CSV export into memory
pub fn to_csv(trace: &EnrichedTrace) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    write_csv(trace, &mut output)?;
    Ok(output)
}

/// Call count and total time per operator label, longest first
pub fn operator_summary(trace: &EnrichedTrace) -> Vec<OperatorSummary> {
    let mut by_op: HashMap<String, OperatorSummary> = HashMap::new();

    for event in trace.events.iter().filter(|e| e.is_operator()) {
        let op_name = event
            .attribute(attr_keys::OP_NAME)
            .map(|v| v.to_string())
            .unwrap_or_else(|| event.name.clone());
        let entry = by_op.entry(op_name.clone()).or_insert_with(|| OperatorSummary {
            op_name,
            calls: 0,
            total: Duration::ZERO,
        });
        entry.calls += 1;
        entry.total += event.duration();
    }

    let mut summary: Vec<OperatorSummary> = by_op.into_values().collect();
    summary.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.op_name.cmp(&b.op_name)));
    summary
}
