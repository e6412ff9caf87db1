// Utilities module for profiler
// Contains label parsing, clock anchoring and dump cleanup helpers

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fields embedded in an engine event label of the form
/// `Convolution{name=conv1;in0=1x3x224x224;...}`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLabel {
    pub op_name: String,
    pub layer_name: Option<String>,
    pub shape: Option<String>,
}

/// Split a raw event name into its operator label, layer name and input shape.
///
/// A name without braces is taken as a bare operator label.
pub fn parse_event_label(raw: &str) -> EventLabel {
    let raw = raw.trim();
    let (op_name, body) = match raw.find('{') {
        Some(open) => {
            let body = raw[open + 1..].strip_suffix('}').unwrap_or(&raw[open + 1..]);
            (raw[..open].trim(), Some(body))
        }
        None => (raw, None),
    };

    let mut label = EventLabel {
        op_name: op_name.to_string(),
        ..Default::default()
    };

    for field in body.into_iter().flat_map(|b| b.split(';')) {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key.trim() {
            "name" => label.layer_name = Some(value.trim().to_string()),
            "in0" => label.shape = Some(value.trim().to_string()),
            _ => {}
        }
    }

    label
}

/// Maps raw profiler timestamps (microseconds) to wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReference {
    /// Wall-clock instant corresponding to `raw_origin_us`
    pub wall: SystemTime,
    pub raw_origin_us: u64,
}

impl ClockReference {
    pub fn new(wall: SystemTime, raw_origin_us: u64) -> Self {
        Self { wall, raw_origin_us }
    }

    /// Raw timestamps are microseconds since the Unix epoch
    pub fn unix_epoch() -> Self {
        Self::new(UNIX_EPOCH, 0)
    }

    /// Reference captured once per process, the first time it is asked for
    pub fn process() -> Self {
        static PROCESS_START: OnceLock<SystemTime> = OnceLock::new();
        Self::new(*PROCESS_START.get_or_init(SystemTime::now), 0)
    }

    /// Wall-clock time of a raw timestamp
    pub fn wall_time(&self, raw_us: u64) -> SystemTime {
        if raw_us >= self.raw_origin_us {
            self.wall
                .checked_add(Duration::from_micros(raw_us - self.raw_origin_us))
                .unwrap_or(self.wall)
        } else {
            self.wall
                .checked_sub(Duration::from_micros(self.raw_origin_us - raw_us))
                .unwrap_or(self.wall)
        }
    }
}

/// Drop separators the engine sometimes leaves in front of a closing bracket.
///
/// Commas directly followed (ignoring whitespace) by `]` or `}` are removed;
/// string contents are left alone.
pub fn sanitize_dump(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = bytes[i + 1..]
                    .iter()
                    .find(|b| !b.is_ascii_whitespace());
                if !matches!(next, Some(b']') | Some(b'}')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
