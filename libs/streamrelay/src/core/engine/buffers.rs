// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use super::{CompiledModel, DeviceBuffer};
use crate::core::error::LoadError;
use crate::core::logging::{Severity, SharedLogSink};

/// Input and output device buffers owned by one engine handle.
///
/// Allocated together from the model's binding sizes and released together
/// when the pair is dropped, which happens exactly once: on handle drop or
/// when a reload swaps in a fresh pair.
pub struct DeviceBufferPair {
    pub(crate) input: Box<dyn DeviceBuffer>,
    pub(crate) output: Box<dyn DeviceBuffer>,
    log: SharedLogSink,
}

impl DeviceBufferPair {
    pub fn allocate(
        model: &Arc<dyn CompiledModel>,
        log: SharedLogSink,
    ) -> Result<Self, LoadError> {
        let input_bytes = model.input_shape().byte_len();
        let output_bytes = model.output_shape().byte_len();
        let input = model
            .allocate(input_bytes)
            .map_err(|reason| LoadError::Allocation { reason })?;
        let output = model
            .allocate(output_bytes)
            .map_err(|reason| LoadError::Allocation { reason })?;
        log.log(
            Severity::Verbose,
            &format!(
                "allocated device buffers: input {} bytes, output {} bytes",
                input_bytes, output_bytes
            ),
        );
        Ok(Self { input, output, log })
    }

    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    pub fn output_len(&self) -> usize {
        self.output.len()
    }
}

impl Drop for DeviceBufferPair {
    fn drop(&mut self) {
        self.log.log(
            Severity::Verbose,
            &format!(
                "released device buffers: input {} bytes, output {} bytes",
                self.input.len(),
                self.output.len()
            ),
        );
    }
}
