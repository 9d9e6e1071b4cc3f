// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Assembles and validates one processing graph per session.

use std::collections::HashSet;

use super::{GraphHandle, GraphStage, PipelineState, SessionId, StageKind, StageLink};
use crate::core::bus::BusMonitor;
use crate::core::config::GraphConfig;
use crate::core::error::BuildError;
use crate::core::logging::{Severity, SharedLogSink};
use crate::core::media::MediaBackend;

pub struct GraphBuilder {
    log: SharedLogSink,
}

impl GraphBuilder {
    pub fn new(log: SharedLogSink) -> Self {
        Self { log }
    }

    /// Check chain shape before anything is created.
    pub fn validate(config: &GraphConfig) -> Result<(), BuildError> {
        let stages = &config.stages;
        if stages.len() < 2 {
            return Err(BuildError::InvalidConfig(format!(
                "graph '{}' needs at least a source and a sink",
                config.name
            )));
        }
        if stages[0].kind != StageKind::Source {
            return Err(BuildError::InvalidConfig(format!(
                "graph '{}' must start with a source stage, found {}",
                config.name, stages[0].kind
            )));
        }
        if stages[stages.len() - 1].kind != StageKind::Sink {
            return Err(BuildError::InvalidConfig(format!(
                "graph '{}' must end with a sink stage",
                config.name
            )));
        }
        for pair in stages.windows(2) {
            if pair[0].kind >= pair[1].kind {
                return Err(BuildError::InvalidConfig(format!(
                    "stage {} cannot follow {}",
                    pair[1].kind, pair[0].kind
                )));
            }
        }
        let mut names = HashSet::new();
        for stage in stages {
            if !names.insert(stage.instance_name()) {
                return Err(BuildError::InvalidConfig(format!(
                    "duplicate stage name '{}'",
                    stage.instance_name()
                )));
            }
        }
        Ok(())
    }

    /// Create every stage, link all static edges and register the graph
    /// with `monitor`.
    ///
    /// The returned handle is in [`PipelineState::Linking`], waiting only
    /// for the Source's late-bound pad. Nothing has been started. On error
    /// whatever was created is torn down again.
    pub fn build(
        &self,
        session_id: &SessionId,
        config: &GraphConfig,
        backend: &mut dyn MediaBackend,
        monitor: &mut BusMonitor,
    ) -> Result<GraphHandle, BuildError> {
        Self::validate(config)?;

        let mut handle = GraphHandle::new(session_id.clone(), config.name.clone());
        let mut nodes = Vec::with_capacity(config.stages.len());
        for stage_config in &config.stages {
            let stage = GraphStage {
                kind: stage_config.kind,
                element: stage_config.element_name().to_string(),
                name: stage_config.instance_name(),
                options: stage_config.options.clone(),
            };
            if let Err(reason) = backend.create_stage(session_id, &stage) {
                backend.teardown(session_id);
                self.log.log(
                    Severity::Error,
                    &format!("[{}] failed to create {} ({}): {}", session_id, stage.kind, stage.element, reason),
                );
                return Err(BuildError::StageCreation {
                    stage_kind: stage.kind,
                    reason,
                });
            }
            nodes.push((handle.push_stage(stage.clone()), stage));
        }

        for (i, pair) in nodes.windows(2).enumerate() {
            let (up_index, upstream) = &pair[0];
            let (down_index, downstream) = &pair[1];
            if i == 0 {
                handle.connect(*up_index, *down_index, StageLink::pending_dynamic());
                continue;
            }
            if let Err(reason) = backend.link_static(session_id, upstream, downstream) {
                backend.teardown(session_id);
                return Err(BuildError::StaticLink {
                    upstream: upstream.kind,
                    downstream: downstream.kind,
                    reason,
                });
            }
            handle.connect(*up_index, *down_index, StageLink::linked_static());
        }

        monitor.register(session_id);
        if let Err(reason) = backend.watch(session_id) {
            monitor.unregister(session_id);
            backend.teardown(session_id);
            return Err(BuildError::Watch(reason));
        }

        handle
            .transition(PipelineState::Linking)
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;
        self.log.log(
            Severity::Info,
            &format!(
                "[{}] built '{}' with {} stages, awaiting source pad",
                session_id,
                config.name,
                handle.stage_count()
            ),
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StageConfig;
    use crate::core::graph::{LinkMode, LinkState};
    use crate::core::logging::MemoryLogSink;
    use crate::core::media::RecordingBackend;

    fn fixture() -> (GraphBuilder, RecordingBackend, BusMonitor) {
        let log = MemoryLogSink::new();
        (
            GraphBuilder::new(log.clone()),
            RecordingBackend::new(),
            BusMonitor::new(log),
        )
    }

    #[test]
    fn test_build_relay_lands_in_linking() {
        let (builder, mut backend, mut monitor) = fixture();
        let id = SessionId::new();
        let config = GraphConfig::rtsp_relay().with_ingest("rtsp://cam/1");

        let handle = builder.build(&id, &config, &mut backend, &mut monitor).unwrap();

        assert_eq!(handle.state(), PipelineState::Linking);
        assert_eq!(handle.stage_count(), 7);
        assert!(handle.awaiting_dynamic_link());
        assert_eq!(handle.dynamic_downstream().unwrap().kind, StageKind::Depacketize);
        assert!(monitor.is_watching(&id));

        let state = backend.state();
        assert_eq!(state.created.len(), 7);
        // Every adjacent pair except Source -> Depacketize.
        assert_eq!(state.static_links.len(), 5);
        assert!(state.started.is_empty());
        assert_eq!(state.watched, vec![id.clone()]);
    }

    #[test]
    fn test_links_report_modes() {
        let (builder, mut backend, mut monitor) = fixture();
        let handle = builder
            .build(&SessionId::new(), &GraphConfig::infer_image(), &mut backend, &mut monitor)
            .unwrap();
        let links = handle.links();
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].0, StageKind::Source);
        assert_eq!(links[0].2.mode, LinkMode::Dynamic);
        assert_eq!(links[0].2.state, LinkState::Pending);
        assert!(links[1..].iter().all(|l| l.2 == StageLink::linked_static()));
    }

    #[test]
    fn test_stage_creation_failure_names_kind() {
        let (builder, mut backend, mut monitor) = fixture();
        backend.state().fail_create = Some(StageKind::Decode);
        let id = SessionId::new();

        let err = builder
            .build(&id, &GraphConfig::rtsp_relay(), &mut backend, &mut monitor)
            .unwrap_err();

        assert_eq!(err.stage_kind(), Some(StageKind::Decode));
        assert!(!monitor.is_watching(&id));
        assert_eq!(backend.state().torn_down, vec![id]);
    }

    #[test]
    fn test_static_link_failure() {
        let (builder, mut backend, mut monitor) = fixture();
        backend.state().fail_static_link_into = Some(StageKind::Encode);
        let err = builder
            .build(&SessionId::new(), &GraphConfig::rtsp_relay(), &mut backend, &mut monitor)
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::StaticLink {
                upstream: StageKind::Convert,
                downstream: StageKind::Encode,
                ..
            }
        ));
    }

    #[test]
    fn test_watch_failure_unregisters() {
        let (builder, mut backend, mut monitor) = fixture();
        backend.state().fail_watch = true;
        let id = SessionId::new();
        let err = builder
            .build(&id, &GraphConfig::rtsp_relay(), &mut backend, &mut monitor)
            .unwrap_err();
        assert!(matches!(err, BuildError::Watch(_)));
        assert!(!monitor.is_watching(&id));
    }

    #[test]
    fn test_validate_rejects_bad_chains() {
        let chain = |kinds: &[StageKind]| GraphConfig {
            name: "t".into(),
            stages: kinds.iter().map(|k| StageConfig::new(*k)).collect(),
        };
        use StageKind::*;
        assert!(GraphBuilder::validate(&chain(&[Source])).is_err());
        assert!(GraphBuilder::validate(&chain(&[Decode, Sink])).is_err());
        assert!(GraphBuilder::validate(&chain(&[Source, Decode])).is_err());
        assert!(GraphBuilder::validate(&chain(&[Source, Encode, Decode, Sink])).is_err());
        assert!(GraphBuilder::validate(&chain(&[Source, Decode, Decode, Sink])).is_err());
        assert!(GraphBuilder::validate(&chain(&[Source, Sink])).is_ok());
    }

    #[test]
    fn test_invalid_config_creates_nothing() {
        let (builder, mut backend, mut monitor) = fixture();
        let config = GraphConfig {
            name: "empty".into(),
            stages: vec![],
        };
        assert!(builder
            .build(&SessionId::new(), &config, &mut backend, &mut monitor)
            .is_err());
        assert!(backend.state().created.is_empty());
        assert_eq!(monitor.watched_count(), 0);
    }

    #[test]
    fn test_launch_descriptor_matches_mount_format() {
        let (builder, mut backend, mut monitor) = fixture();
        let config = GraphConfig::rtsp_relay().with_ingest("rtsp://10.0.0.5/live");
        let handle = builder
            .build(&SessionId::new(), &config, &mut backend, &mut monitor)
            .unwrap();
        let launch = handle.launch_descriptor();
        assert!(launch.starts_with("( rtspsrc name=source"));
        assert!(launch.contains("location=rtsp://10.0.0.5/live"));
        assert!(launch.contains(" ! rtph264depay name=depacketize ! queue name=queue"));
        assert!(launch.ends_with("rtph264pay name=pay0 pt=96 )"));
    }
}
