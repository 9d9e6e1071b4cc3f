// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Offline conversion from an interchange model to an engine blob.

use std::path::{Path, PathBuf};

use crate::core::error::ConvertError;
use crate::core::logging::{Severity, SharedLogSink};

/// Builder options handed to a [`ModelConverter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOptions {
    /// Allow reduced-precision kernels.
    pub fp16: bool,
    /// Workspace memory limit for the builder, in bytes.
    pub workspace_bytes: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            fp16: true,
            workspace_bytes: 1 << 30,
        }
    }
}

/// Translates interchange-format model bytes into a serialized engine.
pub trait ModelConverter {
    fn convert(&self, model: &[u8], options: &ConversionOptions) -> Result<Vec<u8>, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub model_path: PathBuf,
    /// Defaults to `model_path` with an `.engine` extension.
    pub engine_path: Option<PathBuf>,
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            engine_path: None,
            options: ConversionOptions::default(),
        }
    }

    pub fn engine_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.engine_path = Some(path.into());
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.engine_path
            .clone()
            .unwrap_or_else(|| default_engine_path(&self.model_path))
    }
}

/// `model.onnx` → `model.engine`, next to the input.
pub fn default_engine_path(model_path: &Path) -> PathBuf {
    model_path.with_extension("engine")
}

/// Run `converter` and write the resulting blob.
///
/// The blob is written to a sibling temp file first and renamed, so a
/// failed conversion never leaves a truncated engine behind.
pub fn convert_model(
    converter: &dyn ModelConverter,
    request: &ConversionRequest,
    log: &SharedLogSink,
) -> Result<PathBuf, ConvertError> {
    let model = std::fs::read(&request.model_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConvertError::InputNotFound {
                path: request.model_path.clone(),
            }
        } else {
            ConvertError::ConversionFailed(format!(
                "failed to read {}: {}",
                request.model_path.display(),
                e
            ))
        }
    })?;

    log.log(
        Severity::Info,
        &format!(
            "converting {} (fp16={}, workspace={} MiB)",
            request.model_path.display(),
            request.options.fp16,
            request.options.workspace_bytes >> 20
        ),
    );
    let blob = converter
        .convert(&model, &request.options)
        .map_err(ConvertError::ConversionFailed)?;
    if blob.is_empty() {
        return Err(ConvertError::ConversionFailed(
            "converter produced an empty engine".to_string(),
        ));
    }

    let out = request.output_path();
    let tmp = out.with_extension("engine.partial");
    let write = |path: &Path, bytes: &[u8]| {
        std::fs::write(path, bytes).map_err(|source| ConvertError::Write {
            path: path.to_path_buf(),
            source,
        })
    };
    write(&tmp, &blob)?;
    std::fs::rename(&tmp, &out).map_err(|source| ConvertError::Write {
        path: out.clone(),
        source,
    })?;

    log.log(
        Severity::Info,
        &format!("engine written to {} ({} bytes)", out.display(), blob.len()),
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logging::MemoryLogSink;
    use tempfile::TempDir;

    struct Reverse;

    impl ModelConverter for Reverse {
        fn convert(&self, model: &[u8], options: &ConversionOptions) -> Result<Vec<u8>, String> {
            assert!(options.fp16);
            Ok(model.iter().rev().copied().collect())
        }
    }

    struct Broken;

    impl ModelConverter for Broken {
        fn convert(&self, _: &[u8], _: &ConversionOptions) -> Result<Vec<u8>, String> {
            Err("unsupported operator".to_string())
        }
    }

    #[test]
    fn test_default_engine_path() {
        assert_eq!(
            default_engine_path(Path::new("/models/yolo11s.onnx")),
            PathBuf::from("/models/yolo11s.engine")
        );
    }

    #[test]
    fn test_convert_writes_next_to_input() {
        let tmp = TempDir::new().unwrap();
        let onnx = tmp.path().join("net.onnx");
        std::fs::write(&onnx, [1u8, 2, 3]).unwrap();
        let log: SharedLogSink = MemoryLogSink::new();

        let out = convert_model(&Reverse, &ConversionRequest::new(&onnx), &log).unwrap();
        assert_eq!(out, tmp.path().join("net.engine"));
        assert_eq!(std::fs::read(&out).unwrap(), vec![3, 2, 1]);
        assert!(!tmp.path().join("net.engine.partial").exists());
    }

    #[test]
    fn test_convert_missing_input() {
        let tmp = TempDir::new().unwrap();
        let log: SharedLogSink = MemoryLogSink::new();
        let err = convert_model(
            &Reverse,
            &ConversionRequest::new(tmp.path().join("absent.onnx")),
            &log,
        )
        .unwrap_err();
        assert!(matches!(err, ConvertError::InputNotFound { .. }));
    }

    #[test]
    fn test_failed_conversion_leaves_no_engine() {
        let tmp = TempDir::new().unwrap();
        let onnx = tmp.path().join("net.onnx");
        std::fs::write(&onnx, [1u8]).unwrap();
        let log: SharedLogSink = MemoryLogSink::new();
        let request = ConversionRequest::new(&onnx).engine_path(tmp.path().join("out.engine"));

        let err = convert_model(&Broken, &request, &log).unwrap_err();
        assert!(matches!(err, ConvertError::ConversionFailed(_)));
        assert!(!tmp.path().join("out.engine").exists());
    }
}
