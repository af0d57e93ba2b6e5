//! ONNX Runtime landmark backend
//!
//! Runs a BlazePose-style full-body landmark model: one NHWC float image in,
//! a flat `[1, 39 * 5]` tensor out (x, y, z in input pixels, then visibility
//! and presence logits). Only the first 33 landmarks are body keypoints.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::Array4;
use ort::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    GraphOptimizationLevel, Session,
};
use tracing::{debug, info};

use crate::engine::{Delegate, EngineError, LandmarkRunner, ModelAsset, ModelLoader};
use crate::tracing::prefix;
use crate::types::{DetectionResult, Landmark, BODY_LANDMARK_COUNT};

/// Values per landmark in the raw model output.
const RAW_VALUES_PER_LANDMARK: usize = 5;

/// Loader for `.onnx` landmark models.
#[derive(Debug, Clone)]
pub struct OnnxLoader {
    /// Square model input side in pixels
    pub input_size: u32,
    /// Pose presence below this yields an empty result
    pub presence_threshold: f32,
}

impl Default for OnnxLoader {
    fn default() -> Self {
        Self {
            input_size: 256,
            presence_threshold: 0.5,
        }
    }
}

impl ModelLoader for OnnxLoader {
    fn load(
        &self,
        asset: &ModelAsset,
        delegate: Delegate,
    ) -> Result<Box<dyn LandmarkRunner>, EngineError> {
        if !Path::new(&asset.path).exists() {
            return Err(EngineError::AssetNotFound(asset.path.clone()));
        }

        let provider: ExecutionProviderDispatch = match delegate {
            Delegate::Gpu => CUDAExecutionProvider::default().build().error_on_failure(),
            Delegate::Cpu => CPUExecutionProvider::default().build(),
        };

        let mut builder = Session::builder()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .with_execution_providers([provider])
            .map_err(|_| EngineError::DelegateUnsupported(delegate))?;

        if asset.num_threads > 0 {
            builder = builder
                .with_intra_threads(asset.num_threads)
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        }

        let session = builder
            .commit_from_file(&asset.path)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| EngineError::ModelLoad("model has no inputs".to_string()))?;
        let landmarks_output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EngineError::ModelLoad("model has no outputs".to_string()))?;
        let presence_output = session.outputs.get(1).map(|o| o.name.clone());

        info!(
            "{} ONNX model {} loaded on {} ({} -> {})",
            prefix::ENGINE,
            asset.path,
            delegate,
            input_name,
            landmarks_output
        );

        Ok(Box::new(OnnxRunner {
            session,
            input_name,
            landmarks_output,
            presence_output,
            input_size: self.input_size,
            presence_threshold: self.presence_threshold,
        }))
    }
}

struct OnnxRunner {
    session: Session,
    input_name: String,
    landmarks_output: String,
    presence_output: Option<String>,
    input_size: u32,
    presence_threshold: f32,
}

impl OnnxRunner {
    /// Stretch to the square input and scale to [0, 1]. Coordinates stay
    /// normalized to the source frame since both axes are scaled independently.
    fn input_tensor(&self, image: &RgbaImage) -> Array4<f32> {
        let side = self.input_size;
        let resized = imageops::resize(image, side, side, FilterType::Triangle);
        let side = side as usize;
        Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
        })
    }
}

impl LandmarkRunner for OnnxRunner {
    fn infer(&mut self, image: &RgbaImage) -> Result<DetectionResult, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::InvalidInput("empty image".to_string()));
        }

        let input = self.input_tensor(image);
        let outputs = self
            .session
            .run(
                ort::inputs! {
                    self.input_name.as_str() => input,
                }
                .map_err(|e| EngineError::Inference(e.to_string()))?,
            )
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        if let Some(name) = &self.presence_output {
            if let Some(value) = outputs.get(name.as_str()) {
                let flag: ndarray::ArrayViewD<f32> = value
                    .try_extract_tensor()
                    .map_err(|e| EngineError::Inference(e.to_string()))?;
                let presence = flag.iter().next().copied().unwrap_or(0.0);
                if presence < self.presence_threshold {
                    debug!("{} No subject (presence {:.2})", prefix::ENGINE, presence);
                    return Ok(DetectionResult::empty());
                }
            }
        }

        let raw = outputs
            .get(self.landmarks_output.as_str())
            .ok_or_else(|| EngineError::Inference("no landmark output found".to_string()))?;
        let raw: ndarray::ArrayViewD<f32> = raw
            .try_extract_tensor()
            .map_err(|e| EngineError::Inference(e.to_string()))?;
        let values: Vec<f32> = raw.iter().copied().collect();

        decode_landmarks(&values, self.input_size as f32).map(DetectionResult::single)
    }
}

/// Decode the first 33 raw landmark groups, normalizing by the input side.
fn decode_landmarks(values: &[f32], input_size: f32) -> Result<Vec<Landmark>, EngineError> {
    let needed = BODY_LANDMARK_COUNT * RAW_VALUES_PER_LANDMARK;
    if values.len() < needed {
        return Err(EngineError::Inference(format!(
            "landmark output has {} values, expected at least {}",
            values.len(),
            needed
        )));
    }

    Ok(values[..needed]
        .chunks_exact(RAW_VALUES_PER_LANDMARK)
        .map(|v| {
            Landmark::new(
                v[0] / input_size,
                v[1] / input_size,
                v[2] / input_size,
                sigmoid(v[3]),
            )
        })
        .collect())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
