//! Raw bindings to the MXNet C predict and profiler API.
//!
//! # Safety
//!
//! All functions are unsafe. `MxnetEngine` is the only caller and owns every
//! handle passed through here.

use std::os::raw::{c_char, c_float, c_int, c_uint, c_void};

pub type MxUint = c_uint;
pub type MxFloat = c_float;
pub type PredictorHandleRaw = *mut c_void;
pub type KVStoreHandle = *mut c_void;

#[link(name = "mxnet")]
extern "C" {
    pub fn MXGetLastError() -> *const c_char;

    pub fn MXGetGPUCount(out: *mut c_int) -> c_int;

    pub fn MXNDArrayWaitAll() -> c_int;

    // ---------- Predict API ----------

    pub fn MXPredCreate(
        symbol_json_str: *const c_char,
        param_bytes: *const c_void,
        param_size: c_int,
        dev_type: c_int,
        dev_id: c_int,
        num_input_nodes: MxUint,
        input_keys: *const *const c_char,
        input_shape_indptr: *const MxUint,
        input_shape_data: *const MxUint,
        out: *mut PredictorHandleRaw,
    ) -> c_int;

    pub fn MXPredSetInput(
        handle: PredictorHandleRaw,
        key: *const c_char,
        data: *const MxFloat,
        size: MxUint,
    ) -> c_int;

    pub fn MXPredForward(handle: PredictorHandleRaw) -> c_int;

    pub fn MXPredGetOutputShape(
        handle: PredictorHandleRaw,
        index: MxUint,
        shape_data: *mut *mut MxUint,
        shape_ndim: *mut MxUint,
    ) -> c_int;

    pub fn MXPredGetOutput(
        handle: PredictorHandleRaw,
        index: MxUint,
        data: *mut MxFloat,
        size: MxUint,
    ) -> c_int;

    pub fn MXPredFree(handle: PredictorHandleRaw) -> c_int;

    // ---------- Profiler API ----------

    pub fn MXSetProcessProfilerConfig(
        num_params: c_int,
        keys: *const *const c_char,
        vals: *const *const c_char,
        kvstore_handle: KVStoreHandle,
    ) -> c_int;

    pub fn MXSetProcessProfilerState(
        state: c_int,
        profile_process: c_int,
        kvstore_handle: KVStoreHandle,
    ) -> c_int;

    pub fn MXProcessProfilePause(
        paused: c_int,
        profile_process: c_int,
        kvstore_handle: KVStoreHandle,
    ) -> c_int;

    pub fn MXDumpProcessProfile(
        finished: c_int,
        profile_process: c_int,
        kvstore_handle: KVStoreHandle,
    ) -> c_int;
}
