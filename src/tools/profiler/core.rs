// Core profiler implementation module

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::model::Graph;
use crate::native::{NativeEngine, ProfilerClaim, ProfilerRunState};

use super::correlator::TraceCorrelator;
use super::export::{publish_trace, SpanSink};
use super::reader::read_trace_file;
use super::types::{EnrichedTrace, PauseInterval, ProfileOptions, ProfileState, Trace};
use super::utils::ClockReference;

static DUMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique dump path in the system temp directory
pub fn default_dump_path() -> PathBuf {
    let n = DUMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("mxnet-profile-{}-{}.json", std::process::id(), n))
}

/// Profiling session driving the engine's process-wide profiler.
///
/// Transitions only move forward:
///
/// ```text
/// not-started -> started <-> paused -> stopped -> dumped -> read
/// ```
///
/// Only one session per engine can be started at a time; a second `start`
/// fails with `Error::ProfilerBusy` until the first session has dumped,
/// been closed, or been dropped. A session is meant for a single caller
/// thread.
///
/// Closing or dropping the session stops a running profiler, releases the
/// engine's profiler slot and removes the dump file.
pub struct ProfileSession<E: NativeEngine> {
    engine: Arc<E>,
    options: ProfileOptions,
    path: PathBuf,
    state: ProfileState,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    pauses: Vec<PauseInterval>,
    clock: ClockReference,
    graph: Option<Graph>,
    trace: Option<Trace>,
    claim: Option<ProfilerClaim<E>>,
    closed: bool,
}

impl<E: NativeEngine> ProfileSession<E> {
    /// Create a session; nothing is sent to the engine until [`start`](Self::start)
    pub fn new(engine: Arc<E>, options: ProfileOptions) -> Self {
        let path = options.filename.clone().unwrap_or_else(default_dump_path);
        let clock = engine.clock_reference();
        Self {
            engine,
            options,
            path,
            state: ProfileState::NotStarted,
            start_time: None,
            end_time: None,
            pauses: Vec::new(),
            clock,
            graph: None,
            trace: None,
            claim: None,
            closed: false,
        }
    }

    /// Override the dump file location
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Attach the model graph used to annotate events on publish
    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Override how raw timestamps are anchored to wall-clock time
    pub fn with_clock(mut self, clock: ClockReference) -> Self {
        self.clock = clock;
        self
    }

    /// Configure and start the engine's profiler
    pub fn start(&mut self) -> Result<()> {
        if self.state != ProfileState::NotStarted {
            return Err(Error::AlreadyStarted);
        }

        let claim = ProfilerClaim::acquire(&self.engine).ok_or(Error::ProfilerBusy)?;

        let params = self.options.to_native_params(&self.path);
        self.engine.set_profiler_config(&params)?;
        self.engine.set_profiler_state(ProfilerRunState::Running)?;

        self.claim = Some(claim);
        self.state = ProfileState::Started;
        self.start_time = Some(SystemTime::now());
        log::debug!("profiler started, dumping to {}", self.path.display());
        Ok(())
    }

    /// Pause collection. No-op when already paused or stopped.
    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            ProfileState::NotStarted => Err(not_started("pause")),
            ProfileState::Started => {
                self.engine.pause_profiler(true)?;
                self.pauses.push(PauseInterval {
                    paused_at: SystemTime::now(),
                    resumed_at: None,
                });
                self.state = ProfileState::Paused;
                log::debug!("profiler paused");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resume collection. No-op unless paused.
    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            ProfileState::NotStarted => Err(not_started("resume")),
            ProfileState::Paused => {
                self.engine.pause_profiler(false)?;
                self.close_pause_interval();
                self.state = ProfileState::Started;
                log::debug!("profiler resumed");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Stop collection. Repeat calls succeed without touching the engine.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ProfileState::NotStarted => Err(not_started("stop")),
            ProfileState::Started | ProfileState::Paused => {
                self.engine.set_profiler_state(ProfilerRunState::Stopped)?;
                self.close_pause_interval();
                self.state = ProfileState::Stopped;
                self.end_time = Some(SystemTime::now());
                log::debug!("profiler stopped");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Write collected events to the dump file.
    ///
    /// Returns the dump path the first time and `None` on repeat calls. The
    /// engine's profiler slot is released once the dump is written.
    pub fn dump(&mut self, finished: bool) -> Result<Option<PathBuf>> {
        match self.state {
            ProfileState::NotStarted => Err(not_started("dump")),
            ProfileState::Started | ProfileState::Paused => Err(Error::InvalidTransition(format!(
                "cannot dump while the profiler is {}; stop it first",
                self.state
            ))),
            ProfileState::Stopped => {
                self.engine.dump_profile(finished)?;
                self.state = ProfileState::Dumped;
                self.claim = None;
                log::debug!("profile dumped to {}", self.path.display());
                Ok(Some(self.path.clone()))
            }
            ProfileState::Dumped | ProfileState::Read => Ok(None),
        }
    }

    /// Parse the dump file, driving any missing stop/dump first.
    ///
    /// A session that was never started reads whatever is at its dump path
    /// without touching the engine. The parsed trace is cached.
    pub fn read(&mut self) -> Result<&Trace> {
        if self.trace.is_none() {
            if self.state.is_running() {
                self.stop()?;
            }
            if self.state == ProfileState::Stopped {
                self.dump(true)?;
            }

            let events = read_trace_file(&self.path, &self.clock)?;
            let start_time = self
                .start_time
                .or_else(|| events.iter().map(|e| e.start_time).min())
                .unwrap_or_else(SystemTime::now);
            let end_time = self
                .end_time
                .or_else(|| events.iter().map(|e| e.end_time).max())
                .unwrap_or(start_time);

            log::debug!("read {} trace events", events.len());
            self.trace = Some(Trace {
                start_time,
                end_time,
                events,
            });
            self.state = ProfileState::Read;
        }

        self.trace
            .as_ref()
            .ok_or_else(|| Error::MissingArtifact(self.path.clone()))
    }

    /// Read the trace, annotate it and emit it to `sink`
    pub fn publish<S: SpanSink + ?Sized>(&mut self, sink: &mut S) -> Result<EnrichedTrace> {
        let trace = self.read()?.clone();
        let enriched = match &self.graph {
            Some(graph) => TraceCorrelator::annotate(&trace, graph)?,
            None => TraceCorrelator::annotate_labels(&trace),
        };
        publish_trace(&enriched, sink)?;
        Ok(enriched)
    }

    /// Remove the dump file. A missing file is not an error; state is unchanged.
    pub fn delete(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::debug!("removed profile dump {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stop the profiler if running, release the engine and remove the dump file
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    pub fn state(&self) -> ProfileState {
        self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ProfileOptions {
        &self.options
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    pub fn pauses(&self) -> &[PauseInterval] {
        &self.pauses
    }

    pub fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    /// Trace parsed by an earlier [`read`](Self::read)
    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    /// Whether this session currently holds the engine's profiler
    pub fn holds_profiler(&self) -> bool {
        self.claim.is_some()
    }

    fn close_pause_interval(&mut self) {
        if let Some(pause) = self.pauses.last_mut() {
            if pause.resumed_at.is_none() {
                pause.resumed_at = Some(SystemTime::now());
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let stopped = if self.state.is_running() {
            self.stop()
        } else {
            Ok(())
        };
        self.claim = None;
        let deleted = self.delete();
        stopped.and(deleted)
    }
}

impl<E: NativeEngine> Drop for ProfileSession<E> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.state.is_running() {
            log::warn!("profile session dropped while the profiler is running; stopping it");
        }
        if let Err(e) = self.shutdown() {
            log::error!("failed to clean up profile session: {}", e);
        }
    }
}

fn not_started(operation: &str) -> Error {
    Error::NotStarted(format!("{} called before start", operation))
}
