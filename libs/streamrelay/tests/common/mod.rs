// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures: a scripted inference runtime, engine blobs on disk and a
//! coordinator wired to a [`RecordingBackend`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use streamrelay::{
    CompiledModel, Coordinator, DeviceBuffer, DeviceFault, ExecutionContext, FrameLayout,
    HostBuffer, HostFrame, InferenceRuntime, LoopEvent, MemoryLogSink, PadInfo, PixelFormat,
    RecordingBackend, RelayConfig, SessionConfig, SessionId, SessionNotice, TensorShape,
};

// =============================================================================
// Scripted runtime
// =============================================================================

/// What the scripted model produces on each execution.
#[derive(Debug, Default)]
pub struct Script {
    /// Output rows written verbatim when `echo_input` is off.
    pub rows: Vec<f32>,
    /// Emit one detection whose centre x is the first input value.
    pub echo_input: bool,
    /// Faults returned, in order, before any output is written.
    pub faults: VecDeque<DeviceFault>,
    pub delay: Option<Duration>,
    pub executions: usize,
}

pub struct ScriptedRuntime {
    input: TensorShape,
    output: TensorShape,
    pub script: Arc<Mutex<Script>>,
    pub deserialized: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new(input: TensorShape, output: TensorShape) -> Arc<Self> {
        Arc::new(Self {
            input,
            output,
            script: Arc::new(Mutex::new(Script::default())),
            deserialized: AtomicUsize::new(0),
        })
    }

    /// 2x2 planar f32 input, four detection rows out.
    pub fn tiny() -> Arc<Self> {
        Self::new(TensorShape::f32([1, 3, 2, 2]), TensorShape::f32([1, 4, 6]))
    }

    /// Echoes each frame's marker value back as a detection.
    pub fn echo() -> Arc<Self> {
        let runtime = Self::tiny();
        runtime.script.lock().echo_input = true;
        runtime
    }

    pub fn loads(&self) -> usize {
        self.deserialized.load(Ordering::SeqCst)
    }
}

struct ScriptedModel {
    input: TensorShape,
    output: TensorShape,
    script: Arc<Mutex<Script>>,
}

struct ScriptedContext {
    script: Arc<Mutex<Script>>,
}

impl InferenceRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        "scripted"
    }

    fn deserialize(&self, blob: &[u8]) -> Result<Arc<dyn CompiledModel>, String> {
        if !blob.starts_with(ENGINE_MAGIC) {
            return Err("unrecognized engine blob".to_string());
        }
        self.deserialized.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedModel {
            input: self.input.clone(),
            output: self.output.clone(),
            script: Arc::clone(&self.script),
        }))
    }
}

impl CompiledModel for ScriptedModel {
    fn input_shape(&self) -> TensorShape {
        self.input.clone()
    }

    fn output_shape(&self) -> TensorShape {
        self.output.clone()
    }

    fn create_context(&self) -> Result<Box<dyn ExecutionContext>, String> {
        Ok(Box::new(ScriptedContext {
            script: Arc::clone(&self.script),
        }))
    }
}

impl ExecutionContext for ScriptedContext {
    fn execute(
        &mut self,
        input: &dyn DeviceBuffer,
        output: &mut dyn DeviceBuffer,
    ) -> Result<(), DeviceFault> {
        let delay = self.script.lock().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut script = self.script.lock();
        script.executions += 1;
        if let Some(fault) = script.faults.pop_front() {
            return Err(fault);
        }

        let rows = if script.echo_input {
            let marker = input
                .as_any()
                .downcast_ref::<HostBuffer>()
                .and_then(|b| b.to_f32().first().copied())
                .unwrap_or(f32::NAN);
            vec![marker, 0.0, 0.0, 0.0, 0.9, 0.0]
        } else {
            script.rows.clone()
        };

        let out = output
            .as_any_mut()
            .downcast_mut::<HostBuffer>()
            .ok_or_else(|| DeviceFault::fatal("output is not host memory"))?;
        let mut values = vec![0.0f32; out.len() / 4];
        for (dst, src) in values.iter_mut().zip(&rows) {
            *dst = *src;
        }
        out.write_f32(&values);
        Ok(())
    }
}

// =============================================================================
// Engine blobs
// =============================================================================

pub const ENGINE_MAGIC: &[u8] = b"SRENGINE";

/// A directory holding one engine blob the scripted runtime accepts.
pub struct EngineDir {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn engine_blob() -> EngineDir {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.engine");
    std::fs::write(&path, ENGINE_MAGIC).unwrap();
    EngineDir { _dir: dir, path }
}

// =============================================================================
// Frames
// =============================================================================

/// 2x2 planar f32 frame with every sample set to `marker`.
pub fn planar_frame(marker: f32) -> HostFrame {
    sized_frame(2, 2, marker)
}

pub fn sized_frame(width: u32, height: u32, marker: f32) -> HostFrame {
    let layout = FrameLayout::tight(width, height, PixelFormat::RgbF32Planar);
    let samples = layout.required_len() / 4;
    let data = std::iter::repeat(marker.to_ne_bytes())
        .take(samples)
        .flatten()
        .collect();
    HostFrame::new(layout, data)
}

pub fn video_pad() -> PadInfo {
    PadInfo::new(
        "recv_rtp_src_0_1234_96",
        "application/x-rtp, media=(string)video, encoding-name=(string)H264",
    )
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct Harness {
    pub coordinator: Coordinator,
    pub backend: RecordingBackend,
    pub runtime: Arc<ScriptedRuntime>,
    pub engine: EngineDir,
    pub log: Arc<MemoryLogSink>,
}

pub fn harness(runtime: Arc<ScriptedRuntime>, config: RelayConfig) -> Harness {
    let backend = RecordingBackend::new();
    let log = MemoryLogSink::new();
    let coordinator = Coordinator::builder()
        .with_backend(backend.clone())
        .with_runtime(runtime.clone())
        .with_config(config)
        .with_log_sink(log.clone())
        .build()
        .unwrap();
    Harness {
        coordinator,
        backend,
        runtime,
        engine: engine_blob(),
        log,
    }
}

pub fn default_harness() -> Harness {
    harness(ScriptedRuntime::echo(), RelayConfig::default())
}

impl Harness {
    pub fn inference_session(&self) -> SessionConfig {
        SessionConfig::new(streamrelay::GraphConfig::infer_video()).with_engine(&self.engine.path)
    }

    /// Start an inference session and link its source pad.
    pub fn playing_session(&mut self, publish_path: &str) -> SessionId {
        let config = self.inference_session();
        let id = self
            .coordinator
            .start_session("rtsp://camera.local/stream", publish_path, config)
            .unwrap();
        self.backend.emit(LoopEvent::PadAdded {
            session_id: id.clone(),
            pad: video_pad(),
        });
        self.coordinator.process_pending();
        id
    }

    pub fn send_frame(&self, session_id: &SessionId, frame: HostFrame) {
        self.backend.emit(LoopEvent::FrameReady {
            session_id: session_id.clone(),
            frame: Box::new(frame),
        });
    }

    /// Drive the loop until `done` holds or five seconds pass.
    pub fn pump_until(&mut self, mut done: impl FnMut(&Coordinator) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done(&self.coordinator) {
                return true;
            }
            self.coordinator.process_next(Duration::from_millis(10));
        }
        done(&self.coordinator)
    }
}

pub fn drain_notices(coordinator: &Coordinator) -> Vec<SessionNotice> {
    coordinator.notices().try_iter().collect()
}
