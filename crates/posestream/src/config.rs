//! Pipeline configuration
//!
//! Loaded from JSON; every field has a default so an empty object is a valid
//! configuration.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{Delegate, EngineOptions, ModelAsset};
use crate::error::{Error, Result};
use crate::types::{CameraFacing, BODY_LANDMARK_COUNT};

/// Bundled pose model asset name.
pub const DEFAULT_MODEL_ASSET: &str = "pose_landmarker_heavy.task";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Path of the pose model asset
    pub model_asset: String,
    /// Delegates tried in order when loading the model
    pub delegates: Vec<Delegate>,
    /// Inference threads (0 = runtime default)
    pub num_threads: usize,
    /// Landmarks per subject the model is expected to produce
    pub landmark_count: usize,
    pub capture: CaptureConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_asset: DEFAULT_MODEL_ASSET.to_string(),
            delegates: vec![Delegate::Gpu, Delegate::Cpu],
            num_threads: 0,
            landmark_count: BODY_LANDMARK_COUNT,
            capture: CaptureConfig::default(),
        }
    }
}

/// Camera analysis settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Target analysis width in pixels
    pub width: u32,
    /// Target analysis height in pixels
    pub height: u32,
    /// Facing a new session starts with
    pub facing: CameraFacing,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 480,
            height: 640,
            facing: CameraFacing::Front,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model_asset.trim().is_empty() {
            return Err(Error::Config("model_asset must not be empty".to_string()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(Error::Config(format!(
                "capture resolution must be non-zero, got {}x{}",
                self.capture.width, self.capture.height
            )));
        }
        if self.delegates.is_empty() {
            return Err(Error::Config("at least one delegate is required".to_string()));
        }
        let mut seen = HashSet::new();
        for delegate in &self.delegates {
            if !seen.insert(delegate) {
                return Err(Error::Config(format!("delegate {} listed twice", delegate)));
            }
        }
        if self.landmark_count == 0 {
            return Err(Error::Config("landmark_count must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            asset: ModelAsset {
                path: self.model_asset.clone(),
                num_threads: self.num_threads,
            },
            delegates: self.delegates.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.model_asset, "pose_landmarker_heavy.task");
        assert_eq!((config.capture.width, config.capture.height), (480, 640));
        assert_eq!(config.capture.facing, CameraFacing::Front);
        assert_eq!(config.delegates, vec![Delegate::Gpu, Delegate::Cpu]);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model_asset": "models/pose.onnx", "delegates": ["cpu"], "capture": {{"facing": "back"}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.model_asset, "models/pose.onnx");
        assert_eq!(config.delegates, vec![Delegate::Cpu]);
        assert_eq!(config.capture.facing, CameraFacing::Back);
        assert_eq!(config.capture.width, 480);

        let options = config.engine_options();
        assert_eq!(options.asset.path, "models/pose.onnx");
        assert_eq!(options.delegates, vec![Delegate::Cpu]);
    }

    #[test]
    fn test_rejects_invalid() {
        for raw in [
            r#"{"model_asset": " "}"#,
            r#"{"capture": {"width": 0}}"#,
            r#"{"delegates": []}"#,
            r#"{"delegates": ["gpu", "gpu"]}"#,
            r#"{"landmark_count": 0}"#,
        ] {
            assert!(
                matches!(PipelineConfig::from_json_str(raw), Err(Error::Config(_))),
                "{}",
                raw
            );
        }
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            PipelineConfig::from_json_file("/nonexistent/posestream.json"),
            Err(Error::Io(_))
        ));
    }
}
