// Correlator module for profiler
// Matches collapsed trace events to the graph operators that produced them

use std::collections::HashMap;

use crate::error::Result;
use crate::model::Graph;

use super::types::{attr_keys, EnrichedTrace, Trace, TraceEvent};
use super::utils::parse_event_label;

/// Annotates trace events with graph-node information.
///
/// The engine tags operator events only with an operator label, never with a
/// node id. Events are therefore matched against the graph walked in stable
/// topological order: each operator event takes the first not-yet-matched
/// node whose operator type equals the event label (case-insensitively).
/// Graphs with several nodes of the same type can be mismatched when the
/// engine runs them in a different order than the topological walk.
pub struct TraceCorrelator;

impl TraceCorrelator {
    /// Attach label fields to every event and graph attributes to matched
    /// operator events. Unmatched events are kept as they are.
    pub fn annotate(trace: &Trace, graph: &Graph) -> Result<EnrichedTrace> {
        let order = graph.topologically_sorted_nodes()?;
        let op_types: Vec<String> = order.iter().map(|node| node.op.to_lowercase()).collect();
        let mut matched = vec![false; order.len()];
        let mut sequence_indices: HashMap<(String, String), i64> = HashMap::new();
        let mut matched_events = 0;

        let mut events = Vec::with_capacity(trace.events.len());
        for event in &trace.events {
            let mut event = event.clone();
            let op_name = attach_label(&mut event);

            if event.is_operator() {
                let wanted = op_name.to_lowercase();
                let position = op_types
                    .iter()
                    .zip(matched.iter())
                    .position(|(op, &done)| !done && *op == wanted);

                match position {
                    Some(position) => {
                        matched[position] = true;
                        matched_events += 1;
                        let node = order[position];

                        // Fields parsed from the event label take precedence
                        for (key, value) in &node.attributes {
                            event
                                .attributes
                                .entry(key.clone())
                                .or_insert_with(|| value.clone());
                        }

                        let next = sequence_indices.len() as i64;
                        let index = *sequence_indices
                            .entry((node.op.clone(), node.name.clone()))
                            .or_insert(next);

                        event.set_attribute(attr_keys::OPERATOR_NAME, node.name.as_str());
                        event.set_attribute(attr_keys::LAYER_SEQUENCE_INDEX, index);
                        event.node_id = Some(node.id);
                        log::trace!("event {} `{}` -> node {} `{}`", event.sequence, event.name, node.id, node.name);
                    }
                    None => {
                        log::trace!("event {} `{}` has no unmatched graph node", event.sequence, event.name);
                    }
                }
            }

            events.push(event);
        }

        log::debug!(
            "correlated {} of {} trace events with graph nodes",
            matched_events,
            events.len()
        );

        Ok(EnrichedTrace {
            start_time: trace.start_time,
            end_time: trace.end_time,
            events,
            matched_events,
        })
    }

    /// Attach only the fields parsed from event labels, for sessions without a graph
    pub fn annotate_labels(trace: &Trace) -> EnrichedTrace {
        let events = trace
            .events
            .iter()
            .map(|event| {
                let mut event = event.clone();
                attach_label(&mut event);
                event
            })
            .collect();

        EnrichedTrace {
            start_time: trace.start_time,
            end_time: trace.end_time,
            events,
            matched_events: 0,
        }
    }
}

// Returns the parsed operator label
fn attach_label(event: &mut TraceEvent) -> String {
    let label = parse_event_label(&event.name);
    event.set_attribute(attr_keys::OP_NAME, label.op_name.as_str());
    if let Some(layer) = label.layer_name {
        event.set_attribute(attr_keys::LAYER_NAME, layer);
    }
    if let Some(shape) = label.shape {
        event.set_attribute(attr_keys::SHAPE, shape);
    }
    label.op_name
}
