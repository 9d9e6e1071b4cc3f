// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod buffers;
mod convert;
mod decode;
mod handle;
mod manager;
mod pool;
mod runtime;
mod tensor;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use buffers::DeviceBufferPair;
pub use convert::{
    convert_model, default_engine_path, ConversionOptions, ConversionRequest, ModelConverter,
};
pub use decode::{
    decode_rows, suppress_overlaps, BoundingBox, BoxEncoding, DecodeConfig, Detection,
    DETECTION_ROW_WIDTH,
};
pub use handle::{EngineHandle, EngineHealth};
pub use manager::EngineManager;
pub use pool::{
    engine_input_format, run_job, InferenceJob, InferencePool, JobError, PoolConfig, SubmitError,
};
pub use runtime::{
    CompiledModel, DeviceBuffer, DeviceFault, ExecutionContext, HostBuffer, InferenceRuntime,
};
pub use tensor::{ElementType, TensorShape};
