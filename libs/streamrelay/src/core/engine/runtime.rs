// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Seam to the model-execution runtime.
//!
//! The engine manager only sees these traits; kernels, memory placement and
//! blob formats belong to the implementation behind them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::TensorShape;

/// Fault reported by the device during upload, execution or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub message: String,
    /// `false` when the execution context can no longer be trusted
    pub recoverable: bool,
}

impl DeviceFault {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recoverable: false,
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Memory the runtime executes against.
pub trait DeviceBuffer: Send {
    /// Size in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upload(&mut self, host: &[u8]) -> Result<(), DeviceFault>;

    fn download(&self, host: &mut [u8]) -> Result<(), DeviceFault>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Per-handle execution state over a compiled model.
pub trait ExecutionContext: Send {
    fn execute(
        &mut self,
        input: &dyn DeviceBuffer,
        output: &mut dyn DeviceBuffer,
    ) -> Result<(), DeviceFault>;
}

/// A deserialized, ready-to-execute model.
pub trait CompiledModel: Send + Sync {
    fn input_shape(&self) -> TensorShape;

    fn output_shape(&self) -> TensorShape;

    fn create_context(&self) -> Result<Box<dyn ExecutionContext>, String>;

    /// Allocate a device buffer of `bytes` bytes.
    fn allocate(&self, bytes: usize) -> Result<Box<dyn DeviceBuffer>, String> {
        Ok(Box::new(HostBuffer::zeroed(bytes)))
    }
}

/// Turns engine blobs into compiled models.
pub trait InferenceRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn deserialize(&self, blob: &[u8]) -> Result<Arc<dyn CompiledModel>, String>;
}

/// Device buffer backed by host memory, for CPU runtimes.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    data: Vec<u8>,
}

impl HostBuffer {
    pub fn zeroed(bytes: usize) -> Self {
        Self {
            data: vec![0; bytes],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reinterpret as native-endian f32 values.
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn write_f32(&mut self, values: &[f32]) {
        for (dst, v) in self.data.chunks_exact_mut(4).zip(values) {
            dst.copy_from_slice(&v.to_ne_bytes());
        }
    }
}

impl DeviceBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn upload(&mut self, host: &[u8]) -> Result<(), DeviceFault> {
        if host.len() != self.data.len() {
            return Err(DeviceFault::recoverable(format!(
                "upload of {} bytes into {} byte buffer",
                host.len(),
                self.data.len()
            )));
        }
        self.data.copy_from_slice(host);
        Ok(())
    }

    fn download(&self, host: &mut [u8]) -> Result<(), DeviceFault> {
        if host.len() != self.data.len() {
            return Err(DeviceFault::recoverable(format!(
                "download of {} byte buffer into {} bytes",
                self.data.len(),
                host.len()
            )));
        }
        host.copy_from_slice(&self.data);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_buffer_round_trip_f32() {
        let mut buffer = HostBuffer::zeroed(12);
        buffer.write_f32(&[1.0, -2.5, 0.25]);
        assert_eq!(buffer.to_f32(), vec![1.0, -2.5, 0.25]);
    }

    #[test]
    fn test_host_buffer_size_mismatch_is_recoverable() {
        let mut buffer = HostBuffer::zeroed(4);
        let fault = buffer.upload(&[0; 8]).unwrap_err();
        assert!(fault.recoverable);
        let mut out = [0u8; 2];
        assert!(buffer.download(&mut out).is_err());
    }
}
