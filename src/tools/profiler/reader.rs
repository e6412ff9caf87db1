// Reader module for profiler
// Parses engine dump files into collapsed trace events

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{AttrValue, Attributes};

use super::types::TraceEvent;
use super::utils::{sanitize_dump, ClockReference};

/// Event as written by the engine's chrome-trace style dump
#[derive(Debug, Clone, Deserialize)]
pub struct RawTraceEvent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cat: String,
    #[serde(default)]
    pub ph: String,
    #[serde(default)]
    pub ts: f64,
    #[serde(default)]
    pub pid: u64,
    #[serde(default)]
    pub tid: u64,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDump {
    Document {
        #[serde(rename = "traceEvents")]
        trace_events: Vec<RawTraceEvent>,
    },
    Events(Vec<RawTraceEvent>),
}

const PHASE_BEGIN: &str = "B";
const PHASE_END: &str = "E";

/// Read and parse the dump file at `path`
pub fn read_trace_file(path: &Path, clock: &ClockReference) -> Result<Vec<TraceEvent>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(Error::MissingArtifact(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    log::debug!("read {} bytes of profile dump from {}", raw.len(), path.display());
    parse_trace(&raw, clock)
}

/// Parse dump text into begin/end-collapsed events ordered by begin timestamp
pub fn parse_trace(raw: &str, clock: &ClockReference) -> Result<Vec<TraceEvent>> {
    let cleaned = sanitize_dump(raw);
    let dump: RawDump = serde_json::from_str(&cleaned)
        .map_err(|e| Error::Parse(format!("malformed profile dump: {}", e)))?;
    let raw_events = match dump {
        RawDump::Document { trace_events } => trace_events,
        RawDump::Events(events) => events,
    };
    Ok(collapse_events(raw_events, clock))
}

/// Pair begin/end markers into single events.
///
/// Markers are matched per (pid, tid, category, name) with nesting, so a
/// re-entered label closes innermost first. Unpaired markers are dropped.
pub fn collapse_events(raw_events: Vec<RawTraceEvent>, clock: &ClockReference) -> Vec<TraceEvent> {
    let mut markers: Vec<RawTraceEvent> = raw_events
        .into_iter()
        .filter(|e| e.ph == PHASE_BEGIN || e.ph == PHASE_END)
        .collect();
    markers.sort_by(|a, b| a.ts.total_cmp(&b.ts));

    let mut open: HashMap<(u64, u64, String, String), Vec<RawTraceEvent>> = HashMap::new();
    let mut events = Vec::new();
    let mut unpaired = 0usize;

    for marker in markers {
        let key = (marker.pid, marker.tid, marker.cat.clone(), marker.name.clone());
        if marker.ph == PHASE_BEGIN {
            open.entry(key).or_default().push(marker);
            continue;
        }

        let Some(begin) = open.get_mut(&key).and_then(Vec::pop) else {
            unpaired += 1;
            continue;
        };

        let begin_ts = to_micros(begin.ts);
        let end_ts = to_micros(marker.ts).max(begin_ts);

        let mut attributes = Attributes::new();
        for (k, v) in begin.args.iter().chain(marker.args.iter()) {
            attributes.insert(k.clone(), AttrValue::from_json(v));
        }

        events.push(TraceEvent {
            category: begin.cat,
            name: begin.name,
            pid: begin.pid,
            tid: begin.tid,
            begin_ts,
            end_ts,
            start_time: clock.wall_time(begin_ts),
            end_time: clock.wall_time(end_ts),
            sequence: 0,
            node_id: None,
            attributes,
        });
    }

    unpaired += open.values().map(Vec::len).sum::<usize>();
    if unpaired > 0 {
        log::debug!("dropped {} unpaired begin/end markers", unpaired);
    }

    events.sort_by_key(|e| e.begin_ts);
    for (sequence, event) in events.iter_mut().enumerate() {
        event.sequence = sequence;
    }
    events
}

fn to_micros(ts: f64) -> u64 {
    if ts.is_finite() && ts > 0.0 {
        ts.round() as u64
    } else {
        0
    }
}
