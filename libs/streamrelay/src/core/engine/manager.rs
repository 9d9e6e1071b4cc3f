// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Model lifecycle, buffer ownership and synchronous execution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::handle::ExecutionSlot;
use super::{
    decode_rows, CompiledModel, DecodeConfig, DeviceBufferPair, DeviceFault,
    EngineHandle, EngineHealth, InferenceRuntime, DETECTION_ROW_WIDTH,
};
use crate::core::engine::Detection;
use crate::core::error::{InferError, LoadError};
use crate::core::frames::FrameView;
use crate::core::logging::{Severity, SharedLogSink};

/// Loads engine blobs and runs inference against them.
///
/// Compiled models are cached per blob path and shared; every [`load`]
/// returns a handle with its own execution context and device buffers, so
/// two sessions never contend on one context.
///
/// [`load`]: EngineManager::load
pub struct EngineManager {
    runtime: Arc<dyn InferenceRuntime>,
    models: Mutex<HashMap<PathBuf, Arc<dyn CompiledModel>>>,
    decode: DecodeConfig,
    log: SharedLogSink,
}

impl EngineManager {
    pub fn new(runtime: Arc<dyn InferenceRuntime>, decode: DecodeConfig, log: SharedLogSink) -> Self {
        Self {
            runtime,
            models: Mutex::new(HashMap::new()),
            decode,
            log,
        }
    }

    pub fn decode_config(&self) -> &DecodeConfig {
        &self.decode
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn load(&self, blob_path: &Path) -> Result<Arc<EngineHandle>, LoadError> {
        let model = match self.models.lock().get(blob_path).cloned() {
            Some(model) => model,
            None => {
                let model = self.deserialize(blob_path)?;
                self.models
                    .lock()
                    .insert(blob_path.to_path_buf(), Arc::clone(&model));
                model
            }
        };
        let slot = self.new_slot(model.clone(), blob_path)?;
        self.log.log(
            Severity::Info,
            &format!(
                "loaded engine {} ({}): input {}, output {}",
                blob_path.display(),
                self.runtime.name(),
                model.input_shape(),
                model.output_shape()
            ),
        );
        Ok(Arc::new(EngineHandle::new(
            blob_path.to_path_buf(),
            model.input_shape(),
            model.output_shape(),
            slot,
        )))
    }

    /// Rebuild a handle's model, context and buffers from its blob.
    ///
    /// The previous buffers are released when the new slot replaces them.
    pub fn reload(&self, handle: &EngineHandle) -> Result<(), LoadError> {
        let path = handle.blob_path();
        let model = self.deserialize(path)?;
        if model.input_shape() != *handle.input_shape()
            || model.output_shape() != *handle.output_shape()
        {
            return Err(LoadError::DeserializeFailed {
                path: path.to_path_buf(),
                reason: format!(
                    "reloaded blob changed tensor shapes to {} -> {}",
                    model.input_shape(),
                    model.output_shape()
                ),
            });
        }
        let fresh = self.new_slot(Arc::clone(&model), path)?;
        *handle.slot.lock() = fresh;
        self.models.lock().insert(path.to_path_buf(), model);
        handle.mark_healthy();
        self.log.log(
            Severity::Warning,
            &format!("reloaded engine {}", path.display()),
        );
        Ok(())
    }

    /// Run the model on `view` and decode its output rows.
    ///
    /// Blocks until the device finishes. The view must already match the
    /// engine input exactly.
    pub fn infer(
        &self,
        handle: &EngineHandle,
        view: &FrameView<'_>,
    ) -> Result<Vec<Detection>, InferError> {
        // Counted before the health read so `wait_idle` after `retire`
        // cannot miss a call that saw a healthy engine.
        let _guard = handle.begin();
        match handle.health() {
            EngineHealth::Retired => return Err(InferError::Retired),
            EngineHealth::NeedsReload => {
                return Err(InferError::DeviceFailure {
                    reason: "engine requires reload".to_string(),
                    recoverable: false,
                });
            }
            EngineHealth::Healthy => {}
        }

        let actual = view.tensor_shape();
        if actual != *handle.input_shape() {
            return Err(InferError::ShapeMismatch {
                expected: handle.input_shape().clone(),
                actual,
            });
        }
        let expected_bytes = handle.input_shape().byte_len();
        if view.bytes().len() != expected_bytes {
            return Err(InferError::ShapeMismatch {
                expected: handle.input_shape().clone(),
                actual: view.tensor_shape(),
            });
        }

        handle.count_invocation();
        let mut slot = handle.slot.lock();
        let ExecutionSlot {
            context,
            buffers,
            host_output,
            ..
        } = &mut *slot;

        let run = buffers
            .input
            .upload(view.bytes())
            .and_then(|()| context.execute(buffers.input.as_ref(), buffers.output.as_mut()))
            .and_then(|()| buffers.output.download(host_output));
        if let Err(fault) = run {
            return Err(self.device_failure(handle, fault));
        }

        let values: Vec<f32> = host_output
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        drop(slot);

        let (src_w, src_h) = view.source_size();
        let scale = (
            src_w as f32 / view.width().max(1) as f32,
            src_h as f32 / view.height().max(1) as f32,
        );
        Ok(decode_rows(
            &values,
            handle.output_shape().row_width(),
            &self.decode,
            scale,
        ))
    }

    fn device_failure(&self, handle: &EngineHandle, fault: DeviceFault) -> InferError {
        if !fault.recoverable {
            handle.mark_needs_reload();
            self.log.log(
                Severity::Error,
                &format!(
                    "engine {} device fault, reload required: {}",
                    handle.blob_path().display(),
                    fault
                ),
            );
        } else {
            self.log.log(
                Severity::Warning,
                &format!("engine {} device fault: {}", handle.blob_path().display(), fault),
            );
        }
        InferError::DeviceFailure {
            reason: fault.message,
            recoverable: fault.recoverable,
        }
    }

    fn deserialize(&self, path: &Path) -> Result<Arc<dyn CompiledModel>, LoadError> {
        let blob = std::fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                LoadError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        if blob.is_empty() {
            return Err(LoadError::DeserializeFailed {
                path: path.to_path_buf(),
                reason: "engine blob is empty".to_string(),
            });
        }

        let model = self
            .runtime
            .deserialize(&blob)
            .map_err(|reason| LoadError::DeserializeFailed {
                path: path.to_path_buf(),
                reason,
            })?;

        let output = model.output_shape();
        if output.row_width() < DETECTION_ROW_WIDTH {
            return Err(LoadError::DeserializeFailed {
                path: path.to_path_buf(),
                reason: format!(
                    "output {} has rows narrower than {} values",
                    output, DETECTION_ROW_WIDTH
                ),
            });
        }
        Ok(model)
    }

    fn new_slot(&self, model: Arc<dyn CompiledModel>, path: &Path) -> Result<ExecutionSlot, LoadError> {
        let context = model
            .create_context()
            .map_err(|reason| LoadError::DeserializeFailed {
                path: path.to_path_buf(),
                reason: format!("failed to create execution context: {}", reason),
            })?;
        let buffers = DeviceBufferPair::allocate(&model, Arc::clone(&self.log))?;
        let host_output = vec![0u8; buffers.output_len()];
        Ok(ExecutionSlot {
            model,
            context,
            buffers,
            host_output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{ExecutionContext, HostBuffer, TensorShape};
    use crate::core::frames::{FrameLayout, PixelFormat};
    use crate::core::logging::MemoryLogSink;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Script {
        rows: Vec<f32>,
        faults: VecDeque<DeviceFault>,
        delay: Option<Duration>,
    }

    struct TestRuntime {
        output: TensorShape,
        script: Arc<Mutex<Script>>,
        deserialized: AtomicUsize,
    }

    struct TestModel {
        output: TensorShape,
        script: Arc<Mutex<Script>>,
    }

    struct TestContext {
        script: Arc<Mutex<Script>>,
    }

    impl InferenceRuntime for TestRuntime {
        fn name(&self) -> &str {
            "test"
        }

        fn deserialize(&self, blob: &[u8]) -> Result<Arc<dyn CompiledModel>, String> {
            if blob.starts_with(b"corrupt") {
                return Err("bad magic".to_string());
            }
            self.deserialized.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TestModel {
                output: self.output.clone(),
                script: Arc::clone(&self.script),
            }))
        }
    }

    impl CompiledModel for TestModel {
        fn input_shape(&self) -> TensorShape {
            TensorShape::f32([1, 3, 2, 2])
        }

        fn output_shape(&self) -> TensorShape {
            self.output.clone()
        }

        fn create_context(&self) -> Result<Box<dyn ExecutionContext>, String> {
            Ok(Box::new(TestContext {
                script: Arc::clone(&self.script),
            }))
        }
    }

    impl ExecutionContext for TestContext {
        fn execute(
            &mut self,
            _input: &dyn crate::core::engine::DeviceBuffer,
            output: &mut dyn crate::core::engine::DeviceBuffer,
        ) -> Result<(), DeviceFault> {
            let delay = self.script.lock().delay;
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            let mut script = self.script.lock();
            if let Some(fault) = script.faults.pop_front() {
                return Err(fault);
            }
            let out = output
                .as_any_mut()
                .downcast_mut::<HostBuffer>()
                .ok_or_else(|| DeviceFault::fatal("not host memory"))?;
            out.write_f32(&script.rows);
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        blob: PathBuf,
        runtime: Arc<TestRuntime>,
        manager: EngineManager,
    }

    fn fixture_with_output(output: TensorShape) -> Fixture {
        let dir = TempDir::new().unwrap();
        let blob = dir.path().join("model.engine");
        std::fs::write(&blob, b"engine-bytes").unwrap();
        let runtime = Arc::new(TestRuntime {
            output,
            script: Arc::new(Mutex::new(Script::default())),
            deserialized: AtomicUsize::new(0),
        });
        let manager = EngineManager::new(
            runtime.clone(),
            DecodeConfig::default(),
            MemoryLogSink::new(),
        );
        Fixture {
            _dir: dir,
            blob,
            runtime,
            manager,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_output(TensorShape::f32([1, 2, 6]))
    }

    fn planar(width: u32, height: u32) -> FrameView<'static> {
        let layout = FrameLayout::tight(width, height, PixelFormat::RgbF32Planar);
        FrameView::owned(layout, vec![0u8; layout.required_len()])
    }

    #[test]
    fn test_load_missing_file() {
        let f = fixture();
        let err = f.manager.load(Path::new("/nonexistent/yolo.engine")).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound { .. }));
    }

    #[test]
    fn test_load_empty_or_corrupt_blob() {
        let f = fixture();
        std::fs::write(&f.blob, b"").unwrap();
        assert!(matches!(
            f.manager.load(&f.blob),
            Err(LoadError::DeserializeFailed { .. })
        ));

        std::fs::write(&f.blob, b"corrupt!").unwrap();
        assert!(matches!(
            f.manager.load(&f.blob),
            Err(LoadError::DeserializeFailed { .. })
        ));
    }

    #[test]
    fn test_load_rejects_narrow_output_rows() {
        let f = fixture_with_output(TensorShape::f32([1, 8, 4]));
        assert!(matches!(
            f.manager.load(&f.blob),
            Err(LoadError::DeserializeFailed { .. })
        ));
    }

    #[test]
    fn test_models_cached_but_contexts_private() {
        let f = fixture();
        let a = f.manager.load(&f.blob).unwrap();
        let b = f.manager.load(&f.blob).unwrap();
        assert_eq!(f.runtime.deserialized.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.input_shape(), b.input_shape());
    }

    #[test]
    fn test_shape_mismatch_leaves_engine_reusable() {
        let f = fixture();
        f.runtime.script.lock().rows = vec![1.0, 1.0, 1.0, 1.0, 0.9, 3.0];
        let engine = f.manager.load(&f.blob).unwrap();

        let err = f.manager.infer(&engine, &planar(4, 4)).unwrap_err();
        assert!(matches!(err, InferError::ShapeMismatch { .. }));
        assert!(!err.requires_reload());
        assert!(engine.is_healthy());

        let detections = f.manager.infer(&engine, &planar(2, 2)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 3);
    }

    #[test]
    fn test_detections_scaled_to_source_size() {
        let f = fixture();
        f.runtime.script.lock().rows = vec![1.0, 1.0, 2.0, 2.0, 0.8, 0.0];
        let engine = f.manager.load(&f.blob).unwrap();

        let view = planar(2, 2).with_source_size(20, 10);
        let detections = f.manager.infer(&engine, &view).unwrap();
        let bbox = detections[0].bbox;
        assert_eq!((bbox.x, bbox.y), (0.0, 0.0));
        assert_eq!((bbox.width, bbox.height), (20.0, 10.0));
    }

    #[test]
    fn test_recoverable_fault_keeps_handle_healthy() {
        let f = fixture();
        f.runtime
            .script
            .lock()
            .faults
            .push_back(DeviceFault::recoverable("stream busy"));
        let engine = f.manager.load(&f.blob).unwrap();

        let err = f.manager.infer(&engine, &planar(2, 2)).unwrap_err();
        assert_eq!(
            err,
            InferError::DeviceFailure {
                reason: "stream busy".to_string(),
                recoverable: true
            }
        );
        assert!(engine.is_healthy());
        assert!(f.manager.infer(&engine, &planar(2, 2)).is_ok());
    }

    #[test]
    fn test_fatal_fault_requires_reload() {
        let f = fixture();
        f.runtime
            .script
            .lock()
            .faults
            .push_back(DeviceFault::fatal("device lost"));
        let engine = f.manager.load(&f.blob).unwrap();

        let err = f.manager.infer(&engine, &planar(2, 2)).unwrap_err();
        assert!(err.requires_reload());
        assert_eq!(engine.health(), EngineHealth::NeedsReload);
        assert!(f.manager.infer(&engine, &planar(2, 2)).is_err());

        f.manager.reload(&engine).unwrap();
        assert!(engine.is_healthy());
        assert!(f.manager.infer(&engine, &planar(2, 2)).is_ok());
        assert_eq!(f.runtime.deserialized.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retired_handle_rejects_infer() {
        let f = fixture();
        let engine = f.manager.load(&f.blob).unwrap();
        engine.retire();
        assert_eq!(
            f.manager.infer(&engine, &planar(2, 2)),
            Err(InferError::Retired)
        );
        assert_eq!(engine.invocations(), 0);
        assert!(engine.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_retire_waits_for_running_call() {
        let f = fixture();
        f.runtime.script.lock().delay = Some(Duration::from_millis(100));
        let engine = f.manager.load(&f.blob).unwrap();
        let frame = planar(2, 2);

        std::thread::scope(|scope| {
            let running = scope.spawn(|| f.manager.infer(&engine, &frame));
            while engine.in_flight() == 0 {
                std::thread::yield_now();
            }
            engine.retire();
            assert!(engine.wait_idle(Duration::from_secs(2)));
            assert_eq!(engine.in_flight(), 0);
            assert!(running.join().unwrap().is_ok());
        });

        assert_eq!(
            f.manager.infer(&engine, &frame),
            Err(InferError::Retired)
        );
        assert_eq!(engine.invocations(), 1);
        assert_eq!(engine.in_flight(), 0);
    }
}
