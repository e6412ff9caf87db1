pub mod parser;
pub mod error;
pub mod model;
pub mod native;
pub mod execution;
pub mod tools;

// Re-export commonly used types
pub use model::{AttrValue, Attributes, Graph, GraphNode, InputRef, NodeId};
pub use error::{Error, Result};
pub use native::{CreateRequest, NativeEngine, ProfilerClaim, ProfilerRunState, ProfilerSlot};
#[cfg(feature = "mxnet")]
pub use native::MxnetEngine;
pub use execution::context::{DataType, Device, DeviceKind, InputNode, OutputNode, PredictorOptions};
pub use execution::predictor::Predictor;
pub use execution::tensor::Tensor;
pub use parser::{GraphBuilder, GraphLoader};
pub use tools::profiler::{
    ClockReference, EnrichedTrace, LogSpanSink, ProfileOptions, ProfileSession, ProfileState,
    SpanRecord, SpanSink, Trace, TraceCorrelator, TraceEvent,
};
