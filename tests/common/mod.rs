#![allow(dead_code)]

use std::ffi::CStr;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, UNIX_EPOCH};

use mxnet_predictor::{
    ClockReference, CreateRequest, Error, NativeEngine, ProfilerRunState, ProfilerSlot, Result,
};

/// Symbol file of a two-operator network: data -> conv1 -> relu1
pub const CONV_RELU_SYMBOL: &str = r#"{
    "nodes": [
        {"op": "null", "name": "data", "inputs": []},
        {"op": "null", "name": "conv1_weight", "inputs": []},
        {"op": "Convolution", "name": "conv1",
         "attrs": {"kernel": "(3, 3)", "num_filter": "8"},
         "inputs": [[0, 0, 0], [1, 0, 0]]},
        {"op": "Activation", "name": "relu1", "attrs": {"act_type": "relu"}, "inputs": [[2, 0, 0]]}
    ],
    "arg_nodes": [0, 1],
    "node_row_ptr": [0, 1, 2, 3, 4],
    "heads": [[3, 0, 0]],
    "attrs": {"mxnet_version": ["int", 10500]}
}"#;

/// Profiler dump with one Convolution and one Activation run, plus noise the
/// reader must skip
pub const CONV_RELU_DUMP: &str = r#"{
    "traceEvents": [
        {"name": "process_name", "ph": "M", "pid": 0, "args": {"name": "cpu/0"}},
        {"name": "Convolution", "cat": "operator", "ph": "B", "ts": 1000, "pid": 0, "tid": 7},
        {"name": "Convolution", "cat": "operator", "ph": "E", "ts": 1250, "pid": 0, "tid": 7},
        {"name": "Activation", "cat": "operator", "ph": "B", "ts": 1300, "pid": 0, "tid": 7},
        {"name": "Activation", "cat": "operator", "ph": "E", "ts": 1340, "pid": 0, "tid": 7},
        {"name": "MXNDArrayWaitAll", "cat": "MXNET_C_API", "ph": "B", "ts": 1350, "pid": 0, "tid": 1},
        {"name": "MXNDArrayWaitAll", "cat": "MXNET_C_API", "ph": "E", "ts": 1360, "pid": 0, "tid": 1},
    ],
    "displayTimeUnit": "ms"
}"#;

/// Predictor handle of the scripted engine
#[derive(Debug)]
pub struct MockHandle {
    pub id: usize,
    pub batch: usize,
}

/// Everything the scripted engine observed
#[derive(Debug, Default)]
pub struct MockState {
    pub created: usize,
    pub freed: usize,
    pub live_handles: usize,
    pub inputs: Vec<(String, Vec<f32>)>,
    pub forwards: usize,
    pub wait_alls: usize,
    pub profiler_config: Vec<(String, String)>,
    pub profiler_states: Vec<ProfilerRunState>,
    pub pause_calls: Vec<bool>,
    pub dumps: usize,
}

/// In-memory `NativeEngine` that records calls and produces canned output
pub struct MockEngine {
    state: Mutex<MockState>,
    slot: ProfilerSlot,
    gpu: bool,
    output_per_example: usize,
    dump: Option<String>,
    fail_forward: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            slot: ProfilerSlot::new(),
            gpu: false,
            output_per_example: 10,
            dump: Some(CONV_RELU_DUMP.to_string()),
            fail_forward: false,
        }
    }

    pub fn with_gpu(mut self) -> Self {
        self.gpu = true;
        self
    }

    pub fn with_output_per_example(mut self, size: usize) -> Self {
        self.output_per_example = size;
        self
    }

    /// Dump text written on `dump_profile`; `None` writes nothing
    pub fn with_dump(mut self, dump: Option<&str>) -> Self {
        self.dump = dump.map(str::to_string);
        self
    }

    pub fn failing_forward(mut self) -> Self {
        self.fail_forward = true;
        self
    }

    pub fn profiler_slot_claimed(&self) -> bool {
        self.slot.is_claimed()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn configured_filename(&self) -> Option<PathBuf> {
        self.state()
            .profiler_config
            .iter()
            .find(|(key, _)| key == "filename")
            .map(|(_, value)| PathBuf::from(value))
    }
}

impl NativeEngine for MockEngine {
    type Handle = MockHandle;

    fn gpu_available(&self) -> bool {
        self.gpu
    }

    fn create_predictor(&self, request: &CreateRequest<'_>) -> Result<MockHandle> {
        if request.params.is_empty() || request.input_keys.is_empty() {
            return Err(Error::native("MXPredCreate", "missing parameters"));
        }
        let mut state = self.state();
        state.created += 1;
        state.live_handles += 1;
        Ok(MockHandle {
            id: state.created,
            batch: request.shape_data[0] as usize,
        })
    }

    fn set_input(&self, _handle: &mut MockHandle, key: &CStr, data: &[f32]) -> Result<()> {
        self.state()
            .inputs
            .push((key.to_string_lossy().into_owned(), data.to_vec()));
        Ok(())
    }

    fn forward(&self, _handle: &mut MockHandle) -> Result<()> {
        if self.fail_forward {
            return Err(Error::native("MXPredForward", "scripted failure"));
        }
        self.state().forwards += 1;
        Ok(())
    }

    fn output_shape(&self, handle: &MockHandle, index: u32) -> Result<Vec<usize>> {
        if index != 0 {
            return Err(Error::native("MXPredGetOutputShape", format!("no output {}", index)));
        }
        Ok(vec![handle.batch, self.output_per_example])
    }

    fn output(&self, handle: &MockHandle, _index: u32, out: &mut [f32]) -> Result<()> {
        if out.len() != handle.batch * self.output_per_example {
            return Err(Error::native("MXPredGetOutput", "buffer size mismatch"));
        }
        for (i, value) in out.iter_mut().enumerate() {
            *value = i as f32;
        }
        Ok(())
    }

    fn free_predictor(&self, _handle: MockHandle) -> Result<()> {
        let mut state = self.state();
        state.freed += 1;
        state.live_handles -= 1;
        Ok(())
    }

    fn wait_all(&self) -> Result<()> {
        self.state().wait_alls += 1;
        Ok(())
    }

    fn set_profiler_config(&self, params: &[(String, String)]) -> Result<()> {
        self.state().profiler_config = params.to_vec();
        Ok(())
    }

    fn set_profiler_state(&self, run_state: ProfilerRunState) -> Result<()> {
        self.state().profiler_states.push(run_state);
        Ok(())
    }

    fn pause_profiler(&self, paused: bool) -> Result<()> {
        self.state().pause_calls.push(paused);
        Ok(())
    }

    fn dump_profile(&self, _finished: bool) -> Result<()> {
        self.state().dumps += 1;
        if let (Some(dump), Some(path)) = (&self.dump, self.configured_filename()) {
            fs::write(path, dump)?;
        }
        Ok(())
    }

    fn profiler_slot(&self) -> &ProfilerSlot {
        &self.slot
    }

    fn clock_reference(&self) -> ClockReference {
        ClockReference::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000), 0)
    }
}
