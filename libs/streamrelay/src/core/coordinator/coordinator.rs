// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use super::mounts::{is_valid_publish_path, MountTable};
use super::{
    MountRegistration, MountTableView, RetryDecision, SessionConfig, SessionNotice,
    StreamSession,
};
use crate::core::bus::{BusMessage, BusMonitor, DetectionBatch, EventQueue, LoopEvent, MonitorVerdict};
use crate::core::config::RelayConfig;
use crate::core::engine::{
    CompiledModel, EngineHealth, EngineManager, InferenceJob, InferencePool, InferenceRuntime,
    JobError, SubmitError,
};
use crate::core::error::{InferError, StartError};
use crate::core::frames::{FrameExchange, PipelineBuffer};
use crate::core::graph::{GraphBuilder, PipelineState, SessionId};
use crate::core::logging::{Severity, SharedLogSink, TracingLogSink};
use crate::core::media::{MediaBackend, PadInfo};
use crate::core::pads::{PadOutcome, PadResolver};
use crate::core::{Result, StreamError};

/// How long `run` waits for an event before checking due retries.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Runtime used when none is configured. Rejects every engine blob.
struct NoRuntime;

impl InferenceRuntime for NoRuntime {
    fn name(&self) -> &str {
        "none"
    }

    fn deserialize(&self, _blob: &[u8]) -> std::result::Result<Arc<dyn CompiledModel>, String> {
        Err("no inference runtime configured".to_string())
    }
}

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder {
    backend: Option<Box<dyn MediaBackend>>,
    runtime: Option<Arc<dyn InferenceRuntime>>,
    config: RelayConfig,
    log: Option<SharedLogSink>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            runtime: None,
            config: RelayConfig::default(),
            log: None,
        }
    }

    pub fn with_backend<B: MediaBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn with_backend_boxed(mut self, backend: Box<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<dyn InferenceRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`TracingLogSink`] at warning level.
    pub fn with_log_sink(mut self, log: SharedLogSink) -> Self {
        self.log = Some(log);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        let mut backend = self.backend.ok_or_else(|| {
            StreamError::Configuration("a media backend is required".to_string())
        })?;
        let log = self.log.unwrap_or_else(|| TracingLogSink::default().shared());
        let runtime = self.runtime.unwrap_or_else(|| Arc::new(NoRuntime));

        let queue = EventQueue::new();
        backend.attach(queue.sender());

        let engines = Arc::new(EngineManager::new(
            runtime,
            self.config.decode.clone(),
            Arc::clone(&log),
        ));
        let exchange = Arc::new(FrameExchange::new(Arc::clone(&log)));
        let pool = InferencePool::start(
            &self.config.pool,
            Arc::clone(&engines),
            Arc::clone(&exchange),
            queue.sender(),
            Arc::clone(&log),
        )?;
        let (notice_tx, notice_rx) = crossbeam_channel::unbounded();

        log.log(
            Severity::Info,
            &format!(
                "coordinator ready: backend {}, runtime {}, {} inference workers",
                backend.name(),
                engines.runtime_name(),
                pool.worker_count()
            ),
        );

        Ok(Coordinator {
            backend,
            builder: GraphBuilder::new(Arc::clone(&log)),
            monitor: BusMonitor::new(Arc::clone(&log)),
            engines,
            exchange,
            pool,
            queue,
            sessions: HashMap::new(),
            mounts: MountTable::new(),
            config: self.config,
            notice_tx,
            notice_rx,
            shutdown_requested: false,
            log,
        })
    }
}

/// Owns every live session and the published mount table.
///
/// All orchestration runs on the thread that drives the coordinator.
/// Backend callbacks and worker completions arrive as [`LoopEvent`]s and
/// are handled one at a time by [`dispatch`](Self::dispatch).
pub struct Coordinator {
    backend: Box<dyn MediaBackend>,
    builder: GraphBuilder,
    monitor: BusMonitor,
    engines: Arc<EngineManager>,
    exchange: Arc<FrameExchange>,
    pool: InferencePool,
    queue: EventQueue,
    sessions: HashMap<SessionId, StreamSession>,
    mounts: MountTable,
    config: RelayConfig,
    notice_tx: Sender<SessionNotice>,
    notice_rx: Receiver<SessionNotice>,
    shutdown_requested: bool,
    log: SharedLogSink,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn engines(&self) -> &Arc<EngineManager> {
        &self.engines
    }

    pub fn exchange(&self) -> &Arc<FrameExchange> {
        &self.exchange
    }

    pub fn monitor(&self) -> &BusMonitor {
        &self.monitor
    }

    /// Sender for injecting events into this coordinator's loop.
    pub fn event_sender(&self) -> crate::core::bus::EventSender {
        self.queue.sender()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Build, start and publish a new session.
    ///
    /// Either the session is fully registered under `publish_path`, or
    /// nothing from the attempt remains.
    pub fn start_session(
        &mut self,
        ingest: &str,
        publish_path: &str,
        config: SessionConfig,
    ) -> std::result::Result<SessionId, StartError> {
        if !is_valid_publish_path(publish_path) {
            return Err(StartError::InvalidPublishPath(publish_path.to_string()));
        }
        if self.mounts.contains(publish_path) {
            return Err(StartError::DuplicatePublishPath(publish_path.to_string()));
        }

        let id = SessionId::new();
        let graph_config = config.graph.with_ingest(ingest);
        let graph =
            self.builder
                .build(&id, &graph_config, self.backend.as_mut(), &mut self.monitor)?;

        let engine = match &config.engine_path {
            Some(path) => match self.engines.load(path) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    self.rollback(&id, None);
                    return Err(e.into());
                }
            },
            None => None,
        };

        if let Err(reason) = self.backend.start(&id) {
            self.rollback(&id, engine.as_deref());
            return Err(StartError::Backend(reason));
        }

        let mount = MountRegistration {
            path: publish_path.to_string(),
            launch: graph.launch_descriptor(),
            session_id: id.clone(),
        };
        if let Err(reason) = self.backend.publish(&mount) {
            self.rollback(&id, engine.as_deref());
            return Err(StartError::Backend(reason));
        }
        if !self.mounts.insert(mount) {
            self.backend.unpublish(publish_path);
            self.rollback(&id, engine.as_deref());
            return Err(StartError::DuplicatePublishPath(publish_path.to_string()));
        }

        if engine.is_some() && !graph.has_stage(crate::core::graph::StageKind::Infer) {
            self.log.log(
                Severity::Warning,
                &format!("[{}] engine loaded but graph '{}' has no infer stage", id, graph.name()),
            );
        }

        let session = StreamSession {
            id: id.clone(),
            ingest: ingest.to_string(),
            graph,
            engine,
            preprocess: config.preprocess,
            resolver: PadResolver::new(Arc::clone(&self.log)),
            retry: Default::default(),
            awaiting_pad_after_resync: false,
            worker: self.pool.assign(),
            next_seq: 0,
            frames_dropped: 0,
            frames_failed: 0,
            subscribers: Vec::new(),
        };
        self.sessions.insert(id.clone(), session);

        self.log.log(
            Severity::Info,
            &format!(
                "[{}] {} ready at {}",
                id,
                ingest,
                self.config.server.url_for(publish_path)
            ),
        );
        self.notify(SessionNotice::Started {
            session_id: id.clone(),
            publish_path: publish_path.to_string(),
        });
        Ok(id)
    }

    /// Start every session listed in the relay configuration.
    pub fn start_configured_sessions(&mut self) -> Vec<Result<SessionId>> {
        let specs = self.config.sessions.clone();
        specs
            .iter()
            .map(|spec| {
                let config = SessionConfig::from_spec(spec)?;
                Ok(self.start_session(&spec.ingest, &spec.publish_path, config)?)
            })
            .collect()
    }

    /// Publish an existing session under an additional path.
    pub fn add_mount(&mut self, session_id: &SessionId, publish_path: &str) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        if !is_valid_publish_path(publish_path) {
            return Err(StartError::InvalidPublishPath(publish_path.to_string()).into());
        }
        if self.mounts.contains(publish_path) {
            return Err(StartError::DuplicatePublishPath(publish_path.to_string()).into());
        }
        let mount = MountRegistration {
            path: publish_path.to_string(),
            launch: session.graph.launch_descriptor(),
            session_id: session_id.clone(),
        };
        self.backend
            .publish(&mount)
            .map_err(StartError::Backend)?;
        self.mounts.insert(mount);
        self.log.log(
            Severity::Info,
            &format!(
                "[{}] also serving at {}",
                session_id,
                self.config.server.url_for(publish_path)
            ),
        );
        Ok(())
    }

    /// Stop a session and release everything it holds.
    ///
    /// Waits up to `stop_timeout_ms` for an inference already running on
    /// the session's engine before its buffers can go.
    pub fn stop_session(&mut self, session_id: &SessionId) -> Result<()> {
        if !self.sessions.contains_key(session_id) {
            return Err(StreamError::SessionNotFound(session_id.to_string()));
        }
        self.release(
            session_id,
            SessionNotice::Stopped {
                session_id: session_id.clone(),
            },
        );
        Ok(())
    }

    /// Stop every session and the worker pool.
    pub fn shutdown(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.release(
                &id,
                SessionNotice::Stopped {
                    session_id: id.clone(),
                },
            );
        }
        self.pool.shutdown();
        self.log.log(Severity::Info, "coordinator shut down");
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn session(&self, session_id: &SessionId) -> Option<&StreamSession> {
        self.sessions.get(session_id)
    }

    pub fn session_state(&self, session_id: &SessionId) -> Option<PipelineState> {
        self.sessions.get(session_id).map(|s| s.state())
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn mounts(&self) -> MountTableView {
        self.mounts.view()
    }

    /// Receive every detection batch the session produces from now on.
    pub fn subscribe(&mut self, session_id: &SessionId) -> Result<Receiver<DetectionBatch>> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StreamError::SessionNotFound(session_id.to_string()))?;
        let (tx, rx) = crossbeam_channel::unbounded();
        session.subscribers.push(tx);
        Ok(rx)
    }

    pub fn notices(&self) -> Receiver<SessionNotice> {
        self.notice_rx.clone()
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Handle every event already queued. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.queue.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Wait up to `timeout` for one event, then drain the queue.
    pub fn process_next(&mut self, timeout: Duration) -> usize {
        match self.queue.recv_timeout(timeout) {
            Some(event) => {
                self.dispatch(event);
                1 + self.process_pending()
            }
            None => 0,
        }
    }

    /// Run until `shutdown` is set or a [`LoopEvent::Shutdown`] arrives,
    /// then stop every session.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        self.log.log(Severity::Info, "event loop running");
        while !shutdown.load(Ordering::SeqCst) && !self.shutdown_requested {
            if let Some(event) = self.queue.recv_timeout(IDLE_WAIT) {
                self.dispatch(event);
            }
            self.tick(Instant::now());
        }
        self.shutdown();
    }

    pub fn dispatch(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::PadAdded { session_id, pad } => self.on_pad_added(&session_id, &pad),
            LoopEvent::Bus(message) => self.on_bus_message(&message, Instant::now()),
            LoopEvent::FrameReady { session_id, frame } => self.on_frame(&session_id, frame),
            LoopEvent::InferenceDone {
                session_id,
                seq,
                result,
            } => self.on_inference_done(&session_id, seq, result),
            LoopEvent::Shutdown => {
                self.log.log(Severity::Info, "shutdown requested");
                self.shutdown_requested = true;
            }
        }
    }

    /// Run every resync that is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        let due: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.retry.is_due(now))
            .map(|s| s.id.clone())
            .collect();
        for id in due {
            self.resync(&id, now);
        }
    }

    fn on_pad_added(&mut self, session_id: &SessionId, pad: &PadInfo) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            self.log.log(
                Severity::Verbose,
                &format!("[{}] pad {} for unknown session", session_id, pad.name),
            );
            return;
        };
        let outcome = session
            .resolver
            .on_pad_added(&mut session.graph, pad, self.backend.as_mut());

        match outcome {
            PadOutcome::Linked if session.awaiting_pad_after_resync => {
                session.awaiting_pad_after_resync = false;
                if session.graph.transition(PipelineState::Playing).is_ok() {
                    self.notify(SessionNotice::Recovered {
                        session_id: session_id.clone(),
                    });
                }
            }
            PadOutcome::Failed(failure) => {
                self.monitor.report_link_failure(session_id, &failure);
                self.release(
                    session_id,
                    SessionNotice::TornDown {
                        session_id: session_id.clone(),
                        reason: failure.to_string(),
                    },
                );
            }
            _ => {}
        }
    }

    fn on_bus_message(&mut self, message: &BusMessage, now: Instant) {
        let id = &message.session_id;
        let verdict = self
            .monitor
            .handle(message, self.sessions.get_mut(id).map(|s| &mut s.graph));

        match verdict {
            MonitorVerdict::Fault(fault) => {
                self.notify(SessionNotice::Faulted {
                    session_id: id.clone(),
                    source_stage: fault.source_stage.clone(),
                    message: fault.message.clone(),
                });
                let policy = self.config.retry.clone();
                let Some(session) = self.sessions.get_mut(id) else {
                    return;
                };
                match session.retry.on_fault(&policy, now) {
                    RetryDecision::Scheduled(at) => self.log.log(
                        Severity::Warning,
                        &format!(
                            "[{}] resync attempt {} of {} in {:?}",
                            id,
                            session.retry.attempts() + 1,
                            policy.max_attempts,
                            at.saturating_duration_since(now)
                        ),
                    ),
                    RetryDecision::GiveUp => self.give_up(id),
                }
            }
            MonitorVerdict::EndOfStream => {
                if self.sessions.contains_key(id) {
                    self.release(
                        id,
                        SessionNotice::Ended {
                            session_id: id.clone(),
                        },
                    );
                }
            }
            MonitorVerdict::RepeatFault(_)
            | MonitorVerdict::StateRecorded
            | MonitorVerdict::Ignored
            | MonitorVerdict::Unwatched => {}
        }
    }

    fn on_frame(&mut self, session_id: &SessionId, frame: Box<dyn PipelineBuffer>) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let engine = match &session.engine {
            Some(engine) if session.graph.state().accepts_frames() => Arc::clone(engine),
            _ => {
                session.frames_dropped += 1;
                self.log.log(
                    Severity::Verbose,
                    &format!(
                        "[{}] frame dropped in state {}",
                        session_id,
                        session.graph.state()
                    ),
                );
                return;
            }
        };

        let seq = session.next_seq;
        let job = InferenceJob {
            session_id: session_id.clone(),
            seq,
            engine,
            frame,
            preprocess: session.preprocess.clone(),
        };
        match self.pool.submit(session.worker, job) {
            Ok(()) => session.next_seq += 1,
            Err(SubmitError::Full) => {
                session.frames_dropped += 1;
                self.log.log(
                    Severity::Warning,
                    &format!(
                        "[{}] inference queue full, dropped frame ({} dropped so far)",
                        session_id, session.frames_dropped
                    ),
                );
            }
            Err(e) => {
                session.frames_dropped += 1;
                self.log
                    .log(Severity::Error, &format!("[{}] frame not submitted: {}", session_id, e));
            }
        }
    }

    fn on_inference_done(
        &mut self,
        session_id: &SessionId,
        seq: u64,
        result: std::result::Result<Vec<crate::core::engine::Detection>, JobError>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        match result {
            Ok(detections) => {
                let batch = DetectionBatch {
                    session_id: session_id.clone(),
                    seq,
                    detections,
                };
                self.backend.deliver(session_id, &batch);
                session.publish(&batch);
            }
            Err(JobError::Infer(InferError::Retired)) => {}
            Err(JobError::Infer(InferError::DeviceFailure {
                recoverable: false, ..
            })) => {
                session.frames_failed += 1;
                let Some(engine) = session.engine.clone() else {
                    return;
                };
                if engine.health() != EngineHealth::NeedsReload {
                    return;
                }
                if let Err(e) = self.engines.reload(&engine) {
                    self.release(
                        session_id,
                        SessionNotice::TornDown {
                            session_id: session_id.clone(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
            Err(e) => {
                session.frames_failed += 1;
                self.log.log(
                    Severity::Warning,
                    &format!("[{}] frame {} skipped: {}", session_id, seq, e),
                );
            }
        }
    }

    fn resync(&mut self, session_id: &SessionId, now: Instant) {
        let policy = self.config.retry.clone();
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.graph.state() != PipelineState::Faulted {
            session.retry = Default::default();
            return;
        }

        let outcome = self.backend.resync(session_id);
        match session.retry.on_resync(&policy, now, outcome.is_ok()) {
            None if session.graph.awaiting_dynamic_link() => {
                session.awaiting_pad_after_resync = true;
                self.log.log(
                    Severity::Info,
                    &format!("[{}] resynced, waiting for source pad", session_id),
                );
            }
            None => {
                if let Err(e) = session.graph.transition(PipelineState::Playing) {
                    self.log.log(Severity::Warning, &e.to_string());
                    return;
                }
                self.log
                    .log(Severity::Info, &format!("[{}] recovered", session_id));
                self.notify(SessionNotice::Recovered {
                    session_id: session_id.clone(),
                });
            }
            Some(RetryDecision::Scheduled(_)) => {
                self.log.log(
                    Severity::Warning,
                    &format!(
                        "[{}] resync attempt {} failed: {}",
                        session_id,
                        session.retry.attempts(),
                        outcome.err().unwrap_or_default()
                    ),
                );
            }
            Some(RetryDecision::GiveUp) => self.give_up(session_id),
        }
    }

    fn give_up(&mut self, session_id: &SessionId) {
        let attempts = self
            .sessions
            .get(session_id)
            .map(|s| s.retry.attempts())
            .unwrap_or_default();
        let reason = format!("gave up after {} resync attempts", attempts);
        self.log
            .log(Severity::Error, &format!("[{}] {}", session_id, reason));
        self.release(
            session_id,
            SessionNotice::TornDown {
                session_id: session_id.clone(),
                reason,
            },
        );
    }

    /// Remove a session, its engine and every mount registered for it.
    fn release(&mut self, session_id: &SessionId, notice: SessionNotice) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return;
        };

        if let Some(engine) = &session.engine {
            engine.retire();
            if !engine.wait_idle(self.config.stop_timeout()) {
                self.log.log(
                    Severity::Warning,
                    &format!(
                        "[{}] inference still running after {:?}, releasing anyway",
                        session_id,
                        self.config.stop_timeout()
                    ),
                );
            }
        }

        for mount in self.mounts.remove_session(session_id) {
            self.backend.unpublish(&mount.path);
        }
        self.backend.teardown(session_id);
        self.monitor.unregister(session_id);
        if !session.graph.state().is_terminal() {
            let _ = session.graph.transition(PipelineState::Stopped);
        }
        session.subscribers.clear();

        self.log.log(
            Severity::Info,
            &format!("[{}] released ({:?})", session_id, notice),
        );
        self.notify(notice);
    }

    /// Undo a partially started session.
    fn rollback(&mut self, session_id: &SessionId, engine: Option<&crate::core::engine::EngineHandle>) {
        if let Some(engine) = engine {
            engine.retire();
        }
        self.backend.teardown(session_id);
        self.monitor.unregister(session_id);
        self.log.log(
            Severity::Warning,
            &format!("[{}] start failed, rolled back", session_id),
        );
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notice_tx.send(notice);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            self.shutdown();
        }
    }
}
