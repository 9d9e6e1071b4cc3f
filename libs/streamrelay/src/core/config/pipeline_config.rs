// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Declarative description of a session graph.
//!
//! The relay, video-inference and image-inference programs differ only in
//! which stages they chain and how those stages are tuned, so each one is a
//! [`GraphConfig`] preset rather than its own construction code.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::graph::StageKind;

/// A per-stage option value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl OptionValue {
    /// Value as written in a gst-launch descriptor.
    pub fn to_launch_value(&self) -> String {
        match self {
            OptionValue::Text(s) if s.chars().any(char::is_whitespace) => format!("\"{}\"", s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(x) => write!(f, "{}", x),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Text(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Text(v)
    }
}

/// Configuration of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub kind: StageKind,
    /// Element factory; defaults to [`StageKind::default_element`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    /// Instance name; defaults to the kind name (`pay0` for the sink).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

impl StageConfig {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            element: None,
            name: None,
            options: BTreeMap::new(),
        }
    }

    pub fn element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn element_name(&self) -> &str {
        self.element
            .as_deref()
            .unwrap_or_else(|| self.kind.default_element())
    }

    pub fn instance_name(&self) -> String {
        match (&self.name, self.kind) {
            (Some(name), _) => name.clone(),
            (None, StageKind::Sink) => "pay0".to_string(),
            (None, kind) => kind.to_string(),
        }
    }
}

/// Ordered stage chain for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub name: String,
    pub stages: Vec<StageConfig>,
}

/// rtspsrc `timeout`, microseconds.
const SOURCE_TIMEOUT_US: i64 = 30_000_000;
/// rtspsrc `latency`, milliseconds.
const SOURCE_LATENCY_MS: i64 = 2000;
const QUEUE_MAX_TIME_NS: i64 = 10_000_000_000;
const QUEUE_MAX_BUFFERS: i64 = 4000;
const QUEUE_MAX_BYTES: i64 = 10_000_000;
const ENCODER_BITRATE: i64 = 2_000_000;
const ENCODER_CONTROL_RATE: i64 = 2;
const ENCODER_IFRAME_INTERVAL: i64 = 30;
const PAYLOAD_TYPE: i64 = 96;

impl GraphConfig {
    /// Ingest → decode → re-encode → RTP payload, no inference.
    pub fn rtsp_relay() -> Self {
        Self {
            name: "rtsp_relay".to_string(),
            stages: vec![
                StageConfig::new(StageKind::Source)
                    .option("timeout", SOURCE_TIMEOUT_US)
                    .option("do-timestamp", true)
                    .option("latency", SOURCE_LATENCY_MS),
                StageConfig::new(StageKind::Depacketize),
                StageConfig::new(StageKind::Queue)
                    .option("max-size-time", QUEUE_MAX_TIME_NS)
                    .option("max-size-buffers", QUEUE_MAX_BUFFERS)
                    .option("max-size-bytes", QUEUE_MAX_BYTES),
                StageConfig::new(StageKind::Decode),
                StageConfig::new(StageKind::Convert),
                StageConfig::new(StageKind::Encode)
                    .option("bitrate", ENCODER_BITRATE)
                    .option("control-rate", ENCODER_CONTROL_RATE)
                    .option("iframeinterval", ENCODER_IFRAME_INTERVAL),
                StageConfig::new(StageKind::Sink).option("pt", PAYLOAD_TYPE),
            ],
        }
    }

    /// The relay chain with an inference tap and overlay before encoding.
    pub fn infer_video() -> Self {
        let mut config = Self::rtsp_relay();
        config.name = "infer_video".to_string();
        let encode_at = config
            .stages
            .iter()
            .position(|s| s.kind == StageKind::Encode)
            .unwrap_or(config.stages.len());
        config.stages.insert(
            encode_at,
            StageConfig::new(StageKind::Overlay).element("identity"),
        );
        config.stages.insert(
            encode_at,
            StageConfig::new(StageKind::Infer).element("identity"),
        );
        config
    }

    /// Still image: decode a file, convert, infer, discard.
    pub fn infer_image() -> Self {
        Self {
            name: "infer_image".to_string(),
            stages: vec![
                StageConfig::new(StageKind::Source).element("uridecodebin"),
                StageConfig::new(StageKind::Convert).element("videoconvert"),
                StageConfig::new(StageKind::Infer).element("identity"),
                StageConfig::new(StageKind::Sink).element("fakesink"),
            ],
        }
    }

    /// Preset by name (`rtsp_relay`, `infer_video`, `infer_image`).
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "rtsp_relay" => Some(Self::rtsp_relay()),
            "infer_video" => Some(Self::infer_video()),
            "infer_image" => Some(Self::infer_image()),
            _ => None,
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn stage_mut(&mut self, kind: StageKind) -> Option<&mut StageConfig> {
        self.stages.iter_mut().find(|s| s.kind == kind)
    }

    /// Point the Source stage at `ingest`.
    ///
    /// `uridecodebin`/`playbin` take a `uri` property, everything else a
    /// `location`.
    pub fn with_ingest(mut self, ingest: &str) -> Self {
        if let Some(source) = self.stage_mut(StageKind::Source) {
            let key = match source.element_name() {
                "uridecodebin" | "uridecodebin3" | "playbin" => "uri",
                _ => "location",
            };
            source
                .options
                .insert(key.to_string(), OptionValue::Text(ingest.to_string()));
        }
        self
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.stage(kind).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_preset_matches_original_tuning() {
        let config = GraphConfig::rtsp_relay();
        let kinds: Vec<_> = config.stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StageKind::Source,
                StageKind::Depacketize,
                StageKind::Queue,
                StageKind::Decode,
                StageKind::Convert,
                StageKind::Encode,
                StageKind::Sink,
            ]
        );
        let source = config.stage(StageKind::Source).unwrap();
        assert_eq!(source.options["latency"], OptionValue::Int(2000));
        assert_eq!(source.options["do-timestamp"], OptionValue::Bool(true));
        let queue = config.stage(StageKind::Queue).unwrap();
        assert_eq!(queue.options["max-size-buffers"], OptionValue::Int(4000));
        let sink = config.stage(StageKind::Sink).unwrap();
        assert_eq!(sink.instance_name(), "pay0");
        assert_eq!(sink.options["pt"], OptionValue::Int(96));
    }

    #[test]
    fn test_infer_video_inserts_infer_before_encode() {
        let config = GraphConfig::infer_video();
        let kinds: Vec<_> = config.stages.iter().map(|s| s.kind).collect();
        let infer = kinds.iter().position(|k| *k == StageKind::Infer).unwrap();
        let overlay = kinds.iter().position(|k| *k == StageKind::Overlay).unwrap();
        let encode = kinds.iter().position(|k| *k == StageKind::Encode).unwrap();
        assert!(infer < overlay && overlay < encode);
    }

    #[test]
    fn test_with_ingest_picks_property() {
        let relay = GraphConfig::rtsp_relay().with_ingest("rtsp://cam/1");
        assert_eq!(
            relay.stage(StageKind::Source).unwrap().options["location"],
            OptionValue::Text("rtsp://cam/1".into())
        );

        let image = GraphConfig::infer_image().with_ingest("file:///tmp/a.jpg");
        assert_eq!(
            image.stage(StageKind::Source).unwrap().options["uri"],
            OptionValue::Text("file:///tmp/a.jpg".into())
        );
    }

    #[test]
    fn test_graph_config_yaml() {
        let yaml = r#"
name: custom
stages:
  - kind: source
    options:
      latency: 500
  - kind: decode
    element: avdec_h264
  - kind: sink
    element: fakesink
    options:
      sync: false
"#;
        let config: GraphConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.stages[0].element_name(), "rtspsrc");
        assert_eq!(config.stages[0].options["latency"], OptionValue::Int(500));
        assert_eq!(config.stages[1].element_name(), "avdec_h264");
        assert_eq!(config.stages[2].options["sync"], OptionValue::Bool(false));
    }

    #[test]
    fn test_launch_value_quotes_whitespace() {
        assert_eq!(OptionValue::from("a b").to_launch_value(), "\"a b\"");
        assert_eq!(OptionValue::from(2.5).to_launch_value(), "2.5");
    }

    #[test]
    fn test_preset_lookup() {
        assert!(GraphConfig::preset("infer_video").is_some());
        assert!(GraphConfig::preset("nope").is_none());
    }
}
