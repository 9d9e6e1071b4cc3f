// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! CPU inference through ONNX Runtime.
//!
//! Engine blobs for this runtime are the interchange model bytes
//! themselves, validated once by [`OrtConverter`].

use std::sync::Arc;

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;

use super::{
    CompiledModel, ConversionOptions, DeviceBuffer, DeviceFault, ExecutionContext, HostBuffer,
    InferenceRuntime, ModelConverter, TensorShape,
};

fn build_session(blob: &[u8]) -> Result<Session, String> {
    let _ = ort::init().commit();
    Session::builder()
        .map_err(|e| format!("failed to create session builder: {}", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| format!("failed to set optimization level: {}", e))?
        .commit_from_memory(blob)
        .map_err(|e| format!("failed to load model: {}", e))
}

/// [`InferenceRuntime`] over ONNX Runtime sessions.
///
/// Tensor shapes are declared up front; the detector exports this targets
/// take one `[1, 3, H, W]` input and produce `[1, N, 6]` rows.
#[derive(Debug, Clone)]
pub struct OrtRuntime {
    input: TensorShape,
    output: TensorShape,
}

impl OrtRuntime {
    pub fn new(input: TensorShape, output: TensorShape) -> Self {
        Self { input, output }
    }
}

impl Default for OrtRuntime {
    fn default() -> Self {
        Self::new(
            TensorShape::f32([1, 3, 640, 640]),
            TensorShape::f32([1, 300, 6]),
        )
    }
}

impl InferenceRuntime for OrtRuntime {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn deserialize(&self, blob: &[u8]) -> Result<Arc<dyn CompiledModel>, String> {
        // Fails early on a corrupt blob instead of at first context.
        build_session(blob)?;
        Ok(Arc::new(OrtModel {
            blob: blob.to_vec(),
            input: self.input.clone(),
            output: self.output.clone(),
        }))
    }
}

struct OrtModel {
    blob: Vec<u8>,
    input: TensorShape,
    output: TensorShape,
}

impl CompiledModel for OrtModel {
    fn input_shape(&self) -> TensorShape {
        self.input.clone()
    }

    fn output_shape(&self) -> TensorShape {
        self.output.clone()
    }

    fn create_context(&self) -> Result<Box<dyn ExecutionContext>, String> {
        Ok(Box::new(OrtContext {
            session: build_session(&self.blob)?,
            input: self.input.clone(),
        }))
    }
}

struct OrtContext {
    session: Session,
    input: TensorShape,
}

impl ExecutionContext for OrtContext {
    fn execute(
        &mut self,
        input: &dyn DeviceBuffer,
        output: &mut dyn DeviceBuffer,
    ) -> Result<(), DeviceFault> {
        let host_in = input
            .as_any()
            .downcast_ref::<HostBuffer>()
            .ok_or_else(|| DeviceFault::fatal("input buffer is not host memory"))?;
        let dims: Vec<i64> = self.input.dims.iter().map(|&d| d as i64).collect();
        let tensor = Tensor::from_array((dims, host_in.to_f32()))
            .map_err(|e| DeviceFault::recoverable(format!("failed to build input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(|e| DeviceFault::recoverable(format!("inference failed: {}", e)))?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DeviceFault::recoverable(format!("failed to extract output: {}", e)))?;

        let host_out = output
            .as_any_mut()
            .downcast_mut::<HostBuffer>()
            .ok_or_else(|| DeviceFault::fatal("output buffer is not host memory"))?;
        if data.len() * 4 != host_out.len() {
            return Err(DeviceFault::recoverable(format!(
                "model produced {} values, output buffer holds {}",
                data.len(),
                host_out.len() / 4
            )));
        }
        host_out.write_f32(data);
        Ok(())
    }
}

/// Validates an ONNX model and emits it as this runtime's engine blob.
///
/// Precision and workspace options have no effect on the CPU provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrtConverter;

impl ModelConverter for OrtConverter {
    fn convert(&self, model: &[u8], _options: &ConversionOptions) -> Result<Vec<u8>, String> {
        build_session(model)?;
        Ok(model.to_vec())
    }
}
