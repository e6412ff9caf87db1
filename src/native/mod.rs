//! Seam between the predictor/profiler and the native inference engine.
//!
//! `NativeEngine` lists exactly the C-level calls the crate relies on. The
//! `mxnet` feature provides [`MxnetEngine`], which links `libmxnet` and calls
//! its predict and profiler API. Anything else implementing the trait (a
//! different build of the engine, a scripted engine in tests) plugs into
//! [`Predictor`](crate::Predictor) and [`ProfileSession`](crate::ProfileSession)
//! unchanged.
//!
//! # Profiler ownership
//!
//! The engine's profiler is process-wide state. Each engine exposes one
//! [`ProfilerSlot`]; a profiling session must hold a [`ProfilerClaim`] on it
//! while it toggles the profiler. Running two profiling sessions against the
//! same engine at once is unsupported and surfaces as `Error::ProfilerBusy`.

use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::execution::context::Device;
use crate::tools::profiler::ClockReference;

#[cfg(feature = "mxnet")]
pub mod ffi;
#[cfg(feature = "mxnet")]
pub mod mxnet;

#[cfg(feature = "mxnet")]
pub use mxnet::{MxnetEngine, PredictorHandle};

/// Arguments of a predictor creation call, already marshalled into the
/// engine's flat encoding: input `i` has shape
/// `shape_data[shape_indptr[i]..shape_indptr[i + 1]]`.
#[derive(Debug)]
pub struct CreateRequest<'a> {
    pub symbol: &'a CStr,
    pub params: &'a [u8],
    pub device: Device,
    pub input_keys: &'a [CString],
    pub shape_indptr: &'a [u32],
    pub shape_data: &'a [u32],
}

/// Run state of the native profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilerRunState {
    Stopped = 0,
    Running = 1,
}

/// Native inference engine API.
///
/// Every fallible call maps a non-zero native status to `Error::Native`
/// carrying the engine's last diagnostic message.
pub trait NativeEngine: Send + Sync {
    /// Owned native predictor handle. Freed by passing it back by value.
    type Handle: Send;

    /// Whether at least one GPU is usable by the engine
    fn gpu_available(&self) -> bool;

    fn create_predictor(&self, request: &CreateRequest<'_>) -> Result<Self::Handle>;

    fn set_input(&self, handle: &mut Self::Handle, key: &CStr, data: &[f32]) -> Result<()>;

    /// Synchronous forward pass
    fn forward(&self, handle: &mut Self::Handle) -> Result<()>;

    fn output_shape(&self, handle: &Self::Handle, index: u32) -> Result<Vec<usize>>;

    /// Copy output `index` into `out`, which must hold exactly the output's element count
    fn output(&self, handle: &Self::Handle, index: u32, out: &mut [f32]) -> Result<()>;

    fn free_predictor(&self, handle: Self::Handle) -> Result<()>;

    /// Barrier on all outstanding asynchronous device work
    fn wait_all(&self) -> Result<()>;

    /// Process-wide profiler configuration as string key/value pairs
    fn set_profiler_config(&self, params: &[(String, String)]) -> Result<()>;

    fn set_profiler_state(&self, state: ProfilerRunState) -> Result<()>;

    fn pause_profiler(&self, paused: bool) -> Result<()>;

    /// Write collected profiler events to the configured file
    fn dump_profile(&self, finished: bool) -> Result<()>;

    /// Token guarding the engine's process-wide profiler
    fn profiler_slot(&self) -> &ProfilerSlot;

    /// Anchor mapping the profiler's raw microsecond timestamps to wall-clock time.
    ///
    /// Defaults to a process-wide reference taken on first use, with raw
    /// timestamps counted from zero at that instant.
    fn clock_reference(&self) -> ClockReference {
        ClockReference::process()
    }
}

/// Single-holder token for an engine's profiler
#[derive(Debug, Default)]
pub struct ProfilerSlot {
    claimed: AtomicBool,
}

impl ProfilerSlot {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Try to take the slot; false if another session holds it
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// RAII hold on an engine's [`ProfilerSlot`]; released on drop
pub struct ProfilerClaim<E: NativeEngine> {
    engine: Arc<E>,
}

impl<E: NativeEngine> ProfilerClaim<E> {
    /// Claim the engine's profiler slot, or `None` if it is already held
    pub fn acquire(engine: &Arc<E>) -> Option<Self> {
        if engine.profiler_slot().try_claim() {
            Some(Self {
                engine: Arc::clone(engine),
            })
        } else {
            None
        }
    }
}

impl<E: NativeEngine> Drop for ProfilerClaim<E> {
    fn drop(&mut self) {
        self.engine.profiler_slot().release();
    }
}
