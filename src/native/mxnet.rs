//! `NativeEngine` implementation over `libmxnet`.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr::{self, NonNull};

use crate::error::{Error, Result};

use super::ffi;
use super::{CreateRequest, NativeEngine, ProfilerRunState, ProfilerSlot};
use crate::tools::profiler::ClockReference;

// The MXNet profiler is global to the process, so every engine value shares one slot
static PROCESS_PROFILER: ProfilerSlot = ProfilerSlot::new();

// profile_process = 0 selects the worker (local) process
const LOCAL_PROCESS: c_int = 0;

/// Owned `PredictorHandle` returned by `MXPredCreate`
#[derive(Debug)]
pub struct PredictorHandle(NonNull<std::os::raw::c_void>);

// SAFETY: a predictor handle is only ever used by the single `Predictor` that
// owns it; MXNet does not tie predictors to the creating thread.
unsafe impl Send for PredictorHandle {}

/// Engine backed by the linked MXNet library
#[derive(Debug, Default, Clone, Copy)]
pub struct MxnetEngine;

impl MxnetEngine {
    pub fn new() -> Self {
        MxnetEngine
    }

    /// Last diagnostic message recorded by MXNet on this thread
    pub fn last_error() -> String {
        // SAFETY: MXGetLastError returns a thread-local NUL-terminated string or null
        let ptr = unsafe { ffi::MXGetLastError() };
        if ptr.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn check(status: c_int, operation: &str) -> Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(Error::native(operation, Self::last_error()))
        }
    }

    fn to_cstring(value: &str, what: &str) -> Result<CString> {
        CString::new(value)
            .map_err(|_| Error::native("MXSetProcessProfilerConfig", format!("{} contains NUL: {:?}", what, value)))
    }
}

impl NativeEngine for MxnetEngine {
    type Handle = PredictorHandle;

    fn gpu_available(&self) -> bool {
        let mut count: c_int = 0;
        // SAFETY: valid out pointer
        let status = unsafe { ffi::MXGetGPUCount(&mut count) };
        status == 0 && count > 0
    }

    fn create_predictor(&self, request: &CreateRequest<'_>) -> Result<PredictorHandle> {
        // Pointer view over the caller-owned keys; lives until the end of this call
        let key_ptrs: Vec<*const c_char> = request.input_keys.iter().map(|k| k.as_ptr()).collect();
        let mut out: ffi::PredictorHandleRaw = ptr::null_mut();

        // SAFETY: all pointers reference buffers borrowed for the duration of the call
        let status = unsafe {
            ffi::MXPredCreate(
                request.symbol.as_ptr(),
                request.params.as_ptr().cast(),
                request.params.len() as c_int,
                request.device.kind as c_int,
                request.device.id as c_int,
                key_ptrs.len() as ffi::MxUint,
                key_ptrs.as_ptr(),
                request.shape_indptr.as_ptr(),
                request.shape_data.as_ptr(),
                &mut out,
            )
        };
        Self::check(status, "MXPredCreate")?;

        NonNull::new(out)
            .map(PredictorHandle)
            .ok_or_else(|| Error::native("MXPredCreate", "returned a null predictor handle"))
    }

    fn set_input(&self, handle: &mut PredictorHandle, key: &CStr, data: &[f32]) -> Result<()> {
        // SAFETY: handle is live, data outlives the call
        let status = unsafe {
            ffi::MXPredSetInput(handle.0.as_ptr(), key.as_ptr(), data.as_ptr(), data.len() as ffi::MxUint)
        };
        Self::check(status, "MXPredSetInput")
    }

    fn forward(&self, handle: &mut PredictorHandle) -> Result<()> {
        // SAFETY: handle is live
        let status = unsafe { ffi::MXPredForward(handle.0.as_ptr()) };
        Self::check(status, "MXPredForward")
    }

    fn output_shape(&self, handle: &PredictorHandle, index: u32) -> Result<Vec<usize>> {
        let mut shape_data: *mut ffi::MxUint = ptr::null_mut();
        let mut shape_ndim: ffi::MxUint = 0;

        // SAFETY: valid out pointers; MXNet owns the returned shape buffer
        let status = unsafe {
            ffi::MXPredGetOutputShape(handle.0.as_ptr(), index, &mut shape_data, &mut shape_ndim)
        };
        Self::check(status, "MXPredGetOutputShape")?;

        if shape_ndim == 0 || shape_data.is_null() {
            return Ok(Vec::new());
        }
        // SAFETY: MXNet guarantees `shape_ndim` entries behind `shape_data`
        let dims = unsafe { std::slice::from_raw_parts(shape_data, shape_ndim as usize) };
        Ok(dims.iter().map(|&d| d as usize).collect())
    }

    fn output(&self, handle: &PredictorHandle, index: u32, out: &mut [f32]) -> Result<()> {
        // SAFETY: `out` is writable for `out.len()` elements
        let status = unsafe {
            ffi::MXPredGetOutput(handle.0.as_ptr(), index, out.as_mut_ptr(), out.len() as ffi::MxUint)
        };
        Self::check(status, "MXPredGetOutput")
    }

    fn free_predictor(&self, handle: PredictorHandle) -> Result<()> {
        // SAFETY: the handle is consumed, so it cannot be freed twice
        let status = unsafe { ffi::MXPredFree(handle.0.as_ptr()) };
        Self::check(status, "MXPredFree")
    }

    fn wait_all(&self) -> Result<()> {
        // SAFETY: no arguments
        let status = unsafe { ffi::MXNDArrayWaitAll() };
        Self::check(status, "MXNDArrayWaitAll")
    }

    fn set_profiler_config(&self, params: &[(String, String)]) -> Result<()> {
        let keys = params
            .iter()
            .map(|(k, _)| Self::to_cstring(k, "profiler key"))
            .collect::<Result<Vec<_>>>()?;
        let vals = params
            .iter()
            .map(|(_, v)| Self::to_cstring(v, "profiler value"))
            .collect::<Result<Vec<_>>>()?;
        let key_ptrs: Vec<*const c_char> = keys.iter().map(|k| k.as_ptr()).collect();
        let val_ptrs: Vec<*const c_char> = vals.iter().map(|v| v.as_ptr()).collect();

        // SAFETY: key/value strings outlive the call
        let status = unsafe {
            ffi::MXSetProcessProfilerConfig(
                params.len() as c_int,
                key_ptrs.as_ptr(),
                val_ptrs.as_ptr(),
                ptr::null_mut(),
            )
        };
        Self::check(status, "MXSetProcessProfilerConfig")
    }

    fn set_profiler_state(&self, state: ProfilerRunState) -> Result<()> {
        // SAFETY: plain integer arguments
        let status = unsafe { ffi::MXSetProcessProfilerState(state as c_int, LOCAL_PROCESS, ptr::null_mut()) };
        Self::check(status, "MXSetProcessProfilerState")
    }

    fn pause_profiler(&self, paused: bool) -> Result<()> {
        // SAFETY: plain integer arguments
        let status = unsafe { ffi::MXProcessProfilePause(paused as c_int, LOCAL_PROCESS, ptr::null_mut()) };
        Self::check(status, "MXProcessProfilePause")
    }

    fn dump_profile(&self, finished: bool) -> Result<()> {
        // SAFETY: plain integer arguments
        let status = unsafe { ffi::MXDumpProcessProfile(finished as c_int, LOCAL_PROCESS, ptr::null_mut()) };
        Self::check(status, "MXDumpProcessProfile")
    }

    fn profiler_slot(&self) -> &ProfilerSlot {
        &PROCESS_PROFILER
    }

    // MXNet stamps profiler events in microseconds since the Unix epoch
    fn clock_reference(&self) -> ClockReference {
        ClockReference::unix_epoch()
    }
}
