mod common;

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use mxnet_predictor::native::ProfilerRunState;
use mxnet_predictor::tools::profiler::{to_chrome_trace, to_csv, operator_summary, ROOT_SPAN_NAME};
use mxnet_predictor::{
    Error, Graph, LogSpanSink, ProfileOptions, ProfileSession, ProfileState, SpanRecord,
};
use tempfile::TempDir;

use common::{MockEngine, CONV_RELU_DUMP, CONV_RELU_SYMBOL};

fn session(engine: &Arc<MockEngine>, dir: &TempDir) -> ProfileSession<MockEngine> {
    let options = ProfileOptions::new()
        .profile_api(true)
        .filename(dir.path().join("profile.json"));
    ProfileSession::new(Arc::clone(engine), options)
}

#[test]
fn test_full_lifecycle() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);
    assert_eq!(session.state(), ProfileState::NotStarted);

    session.start()?;
    assert_eq!(session.state(), ProfileState::Started);
    assert!(session.holds_profiler());
    {
        let state = engine.state();
        assert!(state
            .profiler_config
            .contains(&("profile_api".to_string(), "true".to_string())));
        assert!(state
            .profiler_config
            .contains(&("profile_memory".to_string(), "false".to_string())));
        assert_eq!(state.profiler_states, vec![ProfilerRunState::Running]);
    }

    session.pause()?;
    assert_eq!(session.state(), ProfileState::Paused);
    session.resume()?;
    assert_eq!(session.state(), ProfileState::Started);
    assert_eq!(session.pauses().len(), 1);
    assert!(session.pauses()[0].resumed_at.is_some());

    session.stop()?;
    assert_eq!(session.state(), ProfileState::Stopped);

    let dumped = session.dump(true)?;
    assert_eq!(dumped.as_deref(), Some(dir.path().join("profile.json").as_path()));
    assert_eq!(session.state(), ProfileState::Dumped);
    assert!(!session.holds_profiler());
    assert_eq!(session.dump(true)?, None);

    let trace = session.read()?;
    assert_eq!(trace.events.len(), 3);
    assert_eq!(trace.operator_events().count(), 2);
    assert_eq!(session.state(), ProfileState::Read);

    let state = engine.state();
    assert_eq!(state.pause_calls, vec![true, false]);
    assert_eq!(
        state.profiler_states,
        vec![ProfilerRunState::Running, ProfilerRunState::Stopped]
    );
    assert_eq!(state.dumps, 1);
    Ok(())
}

#[test]
fn test_calls_before_start_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    assert!(matches!(session.pause(), Err(Error::NotStarted(_))));
    assert!(matches!(session.resume(), Err(Error::NotStarted(_))));
    assert!(matches!(session.stop(), Err(Error::NotStarted(_))));
    assert!(matches!(session.dump(true), Err(Error::NotStarted(_))));
    assert_eq!(session.state(), ProfileState::NotStarted);

    let state = engine.state();
    assert!(state.profiler_states.is_empty());
    assert!(state.pause_calls.is_empty());
}

#[test]
fn test_stop_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    session.start()?;
    session.stop()?;
    session.stop()?;
    assert_eq!(session.state(), ProfileState::Stopped);
    assert_eq!(engine.state().profiler_states.len(), 2);

    // Pause and resume are no-ops once stopped
    session.pause()?;
    session.resume()?;
    assert_eq!(session.state(), ProfileState::Stopped);
    assert!(engine.state().pause_calls.is_empty());
    Ok(())
}

#[test]
fn test_start_twice_and_dump_while_running() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    session.start()?;
    assert!(matches!(session.start(), Err(Error::AlreadyStarted)));
    let err = session.dump(false).unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_)));
    assert!(err.is_state_violation());
    Ok(())
}

#[test]
fn test_read_drives_missing_transitions() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    session.start()?;
    session.pause()?;
    let events = session.read()?.events.len();
    assert_eq!(events, 3);
    assert_eq!(session.state(), ProfileState::Read);
    assert!(session.end_time().is_some());

    // Cached: no further engine calls
    session.read()?;
    let state = engine.state();
    assert_eq!(state.dumps, 1);
    assert_eq!(state.profiler_states.last(), Some(&ProfilerRunState::Stopped));
    Ok(())
}

#[test]
fn test_read_without_start_parses_existing_dump() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("profile.json"), CONV_RELU_DUMP)?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    let trace = session.read()?;
    assert_eq!(trace.events[0].name, "Convolution");
    assert_eq!(trace.events[0].duration().as_micros(), 250);
    assert!(trace.start_time <= trace.end_time);

    let state = engine.state();
    assert!(state.profiler_states.is_empty());
    assert_eq!(state.dumps, 0);
    Ok(())
}

#[test]
fn test_missing_dump_is_missing_artifact() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new().with_dump(None));
    let mut session = session(&engine, &dir);

    session.start()?;
    match session.read() {
        Err(Error::MissingArtifact(path)) => assert_eq!(path, dir.path().join("profile.json")),
        other => panic!("expected a missing artifact, got {:?}", other.map(|t| t.events.len())),
    }
    Ok(())
}

#[test]
fn test_malformed_dump_is_parse_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new().with_dump(Some("{\"traceEvents\": [{\"name\": ")));
    let mut session = session(&engine, &dir);

    session.start()?;
    assert!(matches!(session.read(), Err(Error::Parse(_))));
    Ok(())
}

#[test]
fn test_second_session_is_busy_until_first_dumps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut first = session(&engine, &dir);
    let mut second = ProfileSession::new(
        Arc::clone(&engine),
        ProfileOptions::new().filename(dir.path().join("second.json")),
    );

    first.start()?;
    assert!(matches!(second.start(), Err(Error::ProfilerBusy)));
    assert_eq!(second.state(), ProfileState::NotStarted);

    first.stop()?;
    first.dump(true)?;
    second.start()?;
    assert!(second.holds_profiler());
    Ok(())
}

#[test]
fn test_delete_keeps_state() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let mut session = session(&engine, &dir);

    session.start()?;
    session.stop()?;
    session.dump(true)?;
    assert!(session.path().exists());

    session.delete()?;
    assert!(!session.path().exists());
    assert_eq!(session.state(), ProfileState::Dumped);
    // Already gone
    session.delete()?;

    assert!(matches!(session.read(), Err(Error::MissingArtifact(_))));
    Ok(())
}

#[test]
fn test_close_and_drop_clean_up() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());

    let mut session = session(&engine, &dir);
    session.start()?;
    session.read()?;
    let path = session.path().to_path_buf();
    session.close()?;
    assert!(!path.exists());

    {
        let mut running = ProfileSession::new(
            Arc::clone(&engine),
            ProfileOptions::new().filename(dir.path().join("dropped.json")),
        );
        running.start()?;
        assert!(engine.profiler_slot_claimed());
    }
    assert!(!engine.profiler_slot_claimed());
    assert_eq!(
        engine.state().profiler_states.last(),
        Some(&ProfilerRunState::Stopped)
    );
    Ok(())
}

#[test]
fn test_publish_emits_annotated_spans() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let graph = Graph::load(CONV_RELU_SYMBOL.as_bytes())?;
    let mut session = session(&engine, &dir).with_graph(graph);

    session.start()?;
    let mut spans: Vec<SpanRecord> = Vec::new();
    let enriched = session.publish(&mut spans)?;

    assert_eq!(enriched.matched_events, 2);
    assert_eq!(spans.len(), 4);
    assert_eq!(spans[0].name, ROOT_SPAN_NAME);
    assert_eq!(spans[0].parent_id, None);
    assert_eq!(spans[1].name, "conv1");
    assert_eq!(spans[2].name, "relu1");
    assert!(spans[1..].iter().all(|s| s.parent_id == Some(0)));
    assert_eq!(spans[0].start_time, enriched.start_time);

    // Publishing again reuses the parsed trace
    let again = session.publish(&mut LogSpanSink)?;
    assert_eq!(again, enriched);
    assert_eq!(engine.state().dumps, 1);
    Ok(())
}

#[test]
fn test_exports() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(MockEngine::new());
    let graph = Graph::load(CONV_RELU_SYMBOL.as_bytes())?;
    let mut session = session(&engine, &dir).with_graph(graph);
    session.start()?;
    let enriched = session.publish(&mut LogSpanSink)?;

    let chrome: serde_json::Value = serde_json::from_str(&to_chrome_trace(&enriched)?)?;
    let events = chrome["traceEvents"].as_array().expect("event array");
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["ph"], "X");
    assert_eq!(events[0]["dur"], 250);
    assert_eq!(events[0]["args"]["operator_name"], "conv1");

    let csv = String::from_utf8(to_csv(&enriched)?)?;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("sequence,category,name,op_name,operator_name"));
    assert!(lines[1].contains("conv1"));

    let summary = operator_summary(&enriched);
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].op_name, "Convolution");
    assert_eq!(summary[0].calls, 1);
    assert_eq!(summary[0].total.as_micros(), 250);
    Ok(())
}
