use std::borrow::Cow;
use std::ffi::CString;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::native::{CreateRequest, NativeEngine};

use super::context::{InputNode, PredictorOptions};
use super::tensor::Tensor;

/// Batched inference session owning one native predictor handle.
///
/// All operations are synchronous and take `&mut self`; a predictor is not
/// meant to be driven from several threads at once. Independent predictors
/// (each with its own handle) can run on separate threads.
///
/// The native handle is released exactly once, by [`Predictor::close`] or on
/// drop. Any use after `close` fails with `Error::Closed`.
pub struct Predictor<E: NativeEngine> {
    engine: Arc<E>,
    handle: Option<E::Handle>,
    options: PredictorOptions,
    /// Input nodes with batch-normalised shapes
    input_nodes: Vec<InputNode>,
    /// C copies of the input keys, index-aligned with `input_nodes`
    input_keys: Vec<CString>,
}

impl<E: NativeEngine> Predictor<E> {
    /// Create a predictor from symbol and weight bytes.
    ///
    /// All preconditions are checked before the engine is touched, so a
    /// configuration error never leaves native state behind.
    pub fn create(engine: Arc<E>, options: PredictorOptions) -> Result<Self> {
        options.validate()?;

        if options.uses_gpu() && !engine.gpu_available() {
            return Err(Error::DeviceUnavailable("no GPU device".to_string()));
        }

        let symbol = CString::new(options.symbol.to_vec())
            .map_err(|_| Error::Creation("symbol contains an interior NUL byte".to_string()))?;

        let input_nodes = options.resolved_input_nodes();
        let input_keys = input_nodes
            .iter()
            .map(|node| {
                CString::new(node.key.as_str())
                    .map_err(|_| Error::Creation(format!("input key {:?} contains a NUL byte", node.key)))
            })
            .collect::<Result<Vec<_>>>()?;

        let (shape_indptr, shape_data) = marshal_shapes(&input_nodes);
        let device = options.devices[0];

        let request = CreateRequest {
            symbol: &symbol,
            params: &options.weights,
            device,
            input_keys: &input_keys,
            shape_indptr: &shape_indptr,
            shape_data: &shape_data,
        };
        // Scratch buffers are owned here and dropped on every return path
        let handle = engine.create_predictor(&request)?;

        log::debug!(
            "created predictor on {}:{} with batch size {} and inputs {:?}",
            device.kind,
            device.id,
            options.batch_size,
            input_nodes.iter().map(|n| (&n.key, &n.shape)).collect::<Vec<_>>()
        );

        Ok(Self {
            engine,
            handle: Some(handle),
            options,
            input_nodes,
            input_keys,
        })
    }

    /// Bind data to the input named `key`.
    ///
    /// `data` must hold a whole number of examples, at most the configured
    /// batch size. A short batch is zero-padded to the full batch because the
    /// engine only accepts fixed-shape buffers.
    pub fn set_input(&mut self, key: &str, data: &[f32]) -> Result<()> {
        self.ensure_open("set_input")?;

        let index = self
            .input_nodes
            .iter()
            .position(|node| node.key == key)
            .ok_or_else(|| Error::Shape(format!("no input node named `{}`", key)))?;
        let node = &self.input_nodes[index];

        let padded = pad_to_batch(data, node.per_example_size(), node.batch())
            .map_err(|e| match e {
                Error::Shape(msg) => Error::Shape(format!("input `{}`: {}", key, msg)),
                other => other,
            })?;

        let handle = self.handle.as_mut().ok_or_else(|| closed("set_input"))?;
        self.engine.set_input(handle, &self.input_keys[index], &padded)
    }

    /// Run a forward pass and wait for all outstanding device work
    pub fn forward(&mut self) -> Result<()> {
        let handle = self.handle.as_mut().ok_or_else(|| closed("forward"))?;
        self.engine.forward(handle)?;
        self.engine.wait_all()?;
        log::debug!("forward pass finished");
        Ok(())
    }

    /// Bind `data` to the first input node and run a forward pass
    pub fn predict(&mut self, data: &[f32]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::Shape("input data is empty".to_string()));
        }
        let key = self.input_nodes[0].key.clone();
        self.set_input(&key, data)?;
        self.forward()
    }

    /// Shape of output `index` as reported by the engine
    pub fn output_shape(&self, index: u32) -> Result<Vec<usize>> {
        let handle = self.handle.as_ref().ok_or_else(|| closed("output_shape"))?;
        self.engine.output_shape(handle, index)
    }

    /// Copy output `index` out of the engine
    pub fn get_output(&self, index: u32) -> Result<Tensor> {
        let handle = self.handle.as_ref().ok_or_else(|| closed("get_output"))?;
        let shape = self.engine.output_shape(handle, index)?;

        let mut data = vec![0.0f32; shape.iter().product()];
        self.engine.output(handle, index, &mut data)?;

        Tensor::new(shape, data)
    }

    /// Output 0, the usual prediction head
    pub fn read_prediction_output(&self) -> Result<Tensor> {
        self.get_output(0)
    }

    /// Release the native handle. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => {
                log::debug!("releasing predictor handle");
                self.engine.free_predictor(handle)
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn options(&self) -> &PredictorOptions {
        &self.options
    }

    /// Input nodes with the batch dimension resolved
    pub fn input_nodes(&self) -> &[InputNode] {
        &self.input_nodes
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size as usize
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.handle.is_none() {
            return Err(closed(operation));
        }
        Ok(())
    }
}

impl<E: NativeEngine> Drop for Predictor<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            log::warn!("predictor dropped without close; releasing native handle");
            if let Err(e) = self.engine.free_predictor(handle) {
                log::error!("failed to release predictor handle: {}", e);
            }
        }
    }
}

fn closed(operation: &str) -> Error {
    Error::Closed(format!("{} called on a closed predictor", operation))
}

/// Flatten input shapes into the engine's index-pointer encoding.
///
/// Input `i` owns `data[indptr[i]..indptr[i + 1]]`; `indptr` starts at 0.
pub fn marshal_shapes(nodes: &[InputNode]) -> (Vec<u32>, Vec<u32>) {
    let mut indptr = Vec::with_capacity(nodes.len() + 1);
    let mut data = Vec::with_capacity(nodes.iter().map(|n| n.shape.len()).sum());

    indptr.push(0);
    for node in nodes {
        data.extend_from_slice(&node.shape);
        indptr.push(data.len() as u32);
    }

    (indptr, data)
}

/// Zero-pad `data` to `batch` examples of `per_example` elements.
///
/// Fails when `data` is empty, is not a whole number of examples, or holds
/// more examples than `batch`.
pub fn pad_to_batch(data: &[f32], per_example: usize, batch: usize) -> Result<Cow<'_, [f32]>> {
    if per_example == 0 {
        return Err(Error::Shape("bound shape has no elements".to_string()));
    }
    if data.is_empty() || data.len() % per_example != 0 {
        return Err(Error::Shape(format!(
            "{} elements is not a multiple of the per-example size {}",
            data.len(),
            per_example
        )));
    }

    let supplied = data.len() / per_example;
    if supplied > batch {
        return Err(Error::Shape(format!(
            "{} examples supplied but the batch size is {}",
            supplied, batch
        )));
    }
    if supplied == batch {
        return Ok(Cow::Borrowed(data));
    }

    let mut padded = Vec::with_capacity(batch * per_example);
    padded.extend_from_slice(data);
    padded.resize(batch * per_example, 0.0);
    Ok(Cow::Owned(padded))
}
