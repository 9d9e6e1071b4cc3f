// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Process-level configuration via `streamrelay.yaml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::GraphConfig;
use crate::core::coordinator::RetryPolicy;
use crate::core::engine::{DecodeConfig, PoolConfig};
use crate::core::{Result, StreamError};

fn default_stop_timeout_ms() -> u64 {
    2000
}

/// Network listener serving the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8554,
        }
    }
}

impl ServerConfig {
    /// URL under which `publish_path` is served.
    pub fn url_for(&self, publish_path: &str) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("rtsp://{}:{}{}", host, self.port, publish_path)
    }
}

/// A session started at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub ingest: String,
    pub publish_path: String,
    #[serde(default)]
    pub engine: Option<PathBuf>,
    /// Named preset; ignored when `graph` is given.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub graph: Option<GraphConfig>,
}

impl SessionSpec {
    /// Inline graph, else the named preset, else `infer_video` with an
    /// engine or `rtsp_relay` without one.
    pub fn graph_config(&self) -> Result<GraphConfig> {
        if let Some(graph) = &self.graph {
            return Ok(graph.clone());
        }
        match &self.preset {
            Some(name) => GraphConfig::preset(name).ok_or_else(|| {
                StreamError::Configuration(format!("Unknown graph preset '{}'", name))
            }),
            None if self.engine.is_some() => Ok(GraphConfig::infer_video()),
            None => Ok(GraphConfig::rtsp_relay()),
        }
    }
}

/// Relay configuration from `streamrelay.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub decode: DecodeConfig,

    /// How long `stop_session` waits for an in-flight inference.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sessions: Vec<SessionSpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            pool: PoolConfig::default(),
            decode: DecodeConfig::default(),
            stop_timeout_ms: default_stop_timeout_ms(),
            server: ServerConfig::default(),
            sessions: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "streamrelay.yaml";

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Load configuration from an explicit file path.
    pub fn load_file(config_path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            StreamError::Configuration(format!("Failed to read {}: {}", config_path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            StreamError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Loaded relay config from {}", config_path.display());
        Ok(config)
    }

    /// Load `streamrelay.yaml` from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_file(&dir.join(Self::FILE_NAME))
    }

    /// Load `streamrelay.yaml` from a directory, returning defaults if the
    /// file is missing or unusable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load_file(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(StreamError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.pool.workers == 0 || self.pool.queue_depth == 0 {
            return Err(StreamError::Configuration(
                "pool.workers and pool.queue_depth must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.decode.confidence_threshold) {
            return Err(StreamError::Configuration(format!(
                "decode.confidence_threshold {} is outside [0, 1]",
                self.decode.confidence_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::BoxEncoding;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.decode.confidence_threshold, 0.2);
        assert_eq!(config.server.port, 8554);
        assert_eq!(config.stop_timeout(), Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(RelayConfig::FILE_NAME),
            r#"
retry:
  max_attempts: 5
decode:
  confidence_threshold: 0.4
  box_encoding: corners
sessions:
  - ingest: rtsp://10.0.0.2/stream
    publish_path: /output1
  - ingest: rtsp://10.0.0.3/stream
    publish_path: /output2
    engine: /models/yolo11s.engine
"#,
        )
        .unwrap();

        let config = RelayConfig::load(tmp.path()).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.decode.box_encoding, BoxEncoding::Corners);
        assert_eq!(config.pool, PoolConfig::default());
        assert_eq!(config.sessions.len(), 2);
        assert_eq!(config.sessions[0].graph_config().unwrap().name, "rtsp_relay");
        assert_eq!(config.sessions[1].graph_config().unwrap().name, "infer_video");
    }

    #[test]
    fn test_load_missing_file_errors() {
        let tmp = TempDir::new().unwrap();
        let err = RelayConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, StreamError::Configuration(_)));
    }

    #[test]
    fn test_load_or_default_on_garbage() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(RelayConfig::FILE_NAME), "retry: [not, a, map]").unwrap();
        let config = RelayConfig::load_or_default(tmp.path());
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(RelayConfig::FILE_NAME),
            "retry:\n  max_attempts: 0\n",
        )
        .unwrap();
        assert!(RelayConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn test_unknown_preset() {
        let spec = SessionSpec {
            ingest: "rtsp://x".into(),
            publish_path: "/a".into(),
            engine: None,
            preset: Some("bogus".into()),
            graph: None,
        };
        assert!(spec.graph_config().is_err());
    }

    #[test]
    fn test_server_url() {
        let server = ServerConfig::default();
        assert_eq!(server.url_for("/output1"), "rtsp://127.0.0.1:8554/output1");
    }
}
