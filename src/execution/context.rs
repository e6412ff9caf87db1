use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Device type codes understood by the native engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[strum(serialize = "cpu")]
    Cpu = 1,
    #[strum(to_string = "gpu", serialize = "cuda")]
    Gpu = 2,
}

/// Device a predictor runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub kind: DeviceKind,
    pub id: i32,
}

impl Device {
    pub fn cpu() -> Self {
        Self { kind: DeviceKind::Cpu, id: 0 }
    }

    pub fn gpu(id: i32) -> Self {
        Self { kind: DeviceKind::Gpu, id }
    }

    pub fn is_gpu(&self) -> bool {
        self.kind == DeviceKind::Gpu
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Element types of output tensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(ascii_case_insensitive)]
pub enum DataType {
    #[strum(to_string = "float32", serialize = "float")]
    Float32,
    #[strum(to_string = "float64", serialize = "double")]
    Float64,
    #[strum(to_string = "float16", serialize = "half")]
    Float16,
    #[strum(serialize = "uint8")]
    Uint8,
    #[strum(serialize = "int8")]
    Int8,
    #[strum(serialize = "int32")]
    Int32,
    #[strum(serialize = "int64")]
    Int64,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Float32
    }
}

/// Named input tensor and its shape.
///
/// After option normalisation the first dimension is always the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputNode {
    pub key: String,
    pub shape: Vec<u32>,
}

impl InputNode {
    pub fn new(key: impl Into<String>, shape: Vec<u32>) -> Self {
        Self { key: key.into(), shape }
    }

    /// Elements of a single example (every dimension but the batch)
    pub fn per_example_size(&self) -> usize {
        self.shape.iter().skip(1).map(|&d| d as usize).product()
    }

    /// Batch dimension of the bound shape
    pub fn batch(&self) -> usize {
        self.shape.first().map(|&d| d as usize).unwrap_or(0)
    }

    // A 3-dim shape is a single CHW example; anything else carries its own batch axis
    fn with_batch(&self, batch_size: u32) -> InputNode {
        let shape = if self.shape.len() == 3 {
            std::iter::once(batch_size).chain(self.shape.iter().copied()).collect()
        } else if self.shape.is_empty() {
            vec![batch_size]
        } else {
            let mut shape = self.shape.clone();
            shape[0] = batch_size;
            shape
        };
        InputNode {
            key: self.key.clone(),
            shape,
        }
    }
}

/// Named output and its element type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputNode {
    pub key: String,
    #[serde(default)]
    pub data_type: DataType,
}

impl OutputNode {
    pub fn new(key: impl Into<String>, data_type: DataType) -> Self {
        Self { key: key.into(), data_type }
    }
}

/// Options for predictor creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorOptions {
    /// Symbol JSON of the model graph
    #[serde(skip)]
    pub symbol: Bytes,
    /// Raw parameter blob, passed to the engine untouched
    #[serde(skip)]
    pub weights: Bytes,
    /// Devices to run on; the first one is used
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Number of examples per forward pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Input tensors as given by the caller, before batch normalisation
    #[serde(default)]
    pub input_nodes: Vec<InputNode>,
    /// Outputs the caller is interested in
    #[serde(default)]
    pub output_nodes: Vec<OutputNode>,
}

fn default_batch_size() -> u32 {
    1
}

impl Default for PredictorOptions {
    fn default() -> Self {
        Self {
            symbol: Bytes::new(),
            weights: Bytes::new(),
            devices: vec![Device::cpu()],
            batch_size: default_batch_size(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
        }
    }
}

impl PredictorOptions {
    /// Create a new predictor options object
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the symbol JSON bytes
    pub fn set_symbol(mut self, symbol: impl Into<Bytes>) -> Self {
        self.symbol = symbol.into();
        self
    }

    /// Set the parameter bytes
    pub fn set_weights(mut self, weights: impl Into<Bytes>) -> Self {
        self.weights = weights.into();
        self
    }

    /// Run on a single device
    pub fn set_device(mut self, device: Device) -> Self {
        self.devices = vec![device];
        self
    }

    /// Replace the device list
    pub fn set_devices(mut self, devices: Vec<Device>) -> Self {
        self.devices = devices;
        self
    }

    /// Set the batch size
    pub fn set_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Add an input node
    pub fn add_input_node(mut self, key: impl Into<String>, shape: Vec<u32>) -> Self {
        self.input_nodes.push(InputNode::new(key, shape));
        self
    }

    /// Add an output node
    pub fn add_output_node(mut self, key: impl Into<String>, data_type: DataType) -> Self {
        self.output_nodes.push(OutputNode::new(key, data_type));
        self
    }

    /// Whether the selected device is a GPU
    pub fn uses_gpu(&self) -> bool {
        self.devices.first().map_or(false, Device::is_gpu)
    }

    /// Input nodes with the batch size folded into their leading dimension
    pub fn resolved_input_nodes(&self) -> Vec<InputNode> {
        self.input_nodes
            .iter()
            .map(|node| node.with_batch(self.batch_size))
            .collect()
    }

    /// Check every precondition that can be verified without the native engine
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(Error::Creation("invalid empty symbol".to_string()));
        }
        if self.weights.is_empty() {
            return Err(Error::Creation("invalid empty weights".to_string()));
        }
        if self.input_nodes.is_empty() {
            return Err(Error::Creation("no input nodes found".to_string()));
        }
        if self.devices.is_empty() {
            return Err(Error::Creation("no devices defined".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Creation("batch size must be at least 1".to_string()));
        }
        for node in &self.input_nodes {
            if node.key.is_empty() {
                return Err(Error::Creation("input node with an empty key".to_string()));
            }
            if node.shape.iter().any(|&d| d == 0) {
                return Err(Error::Creation(format!(
                    "input node `{}` has a zero dimension in {:?}",
                    node.key, node.shape
                )));
            }
        }
        Ok(())
    }
}
