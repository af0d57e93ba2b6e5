//! Synthetic landmark backend
//!
//! Produces a fixed standing skeleton for every frame. Used by the CLI demo
//! and tests, and as a stand-in wherever no model file is available.

use std::thread;
use std::time::Duration;

use image::RgbaImage;
use tracing::debug;

use crate::engine::{Delegate, EngineError, LandmarkRunner, ModelAsset, ModelLoader};
use crate::tracing::prefix;
use crate::types::{DetectionResult, Landmark, BODY_LANDMARK_COUNT};

/// Upright subject centered in frame, in model index order.
const STANDING_POSE: [(f32, f32); BODY_LANDMARK_COUNT] = [
    (0.500, 0.150), // nose
    (0.510, 0.135),
    (0.520, 0.135),
    (0.530, 0.135),
    (0.490, 0.135),
    (0.480, 0.135),
    (0.470, 0.135),
    (0.550, 0.140), // ears
    (0.450, 0.140),
    (0.515, 0.170), // mouth
    (0.485, 0.170),
    (0.600, 0.250), // shoulders
    (0.400, 0.250),
    (0.630, 0.380), // elbows
    (0.370, 0.380),
    (0.640, 0.500), // wrists
    (0.360, 0.500),
    (0.645, 0.530),
    (0.355, 0.530),
    (0.640, 0.540),
    (0.360, 0.540),
    (0.630, 0.520),
    (0.370, 0.520),
    (0.560, 0.550), // hips
    (0.440, 0.550),
    (0.565, 0.720), // knees
    (0.435, 0.720),
    (0.570, 0.880), // ankles
    (0.430, 0.880),
    (0.565, 0.900),
    (0.435, 0.900),
    (0.585, 0.930),
    (0.415, 0.930),
];

/// Loader for the synthetic backend.
#[derive(Debug, Clone, Default)]
pub struct SyntheticLoader {
    failing: Vec<Delegate>,
    latency: Duration,
    empty: bool,
}

impl SyntheticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make loading on `delegate` fail, e.g. to exercise GPU fallback.
    pub fn failing(mut self, delegate: Delegate) -> Self {
        if !self.failing.contains(&delegate) {
            self.failing.push(delegate);
        }
        self
    }

    /// Simulated inference time per frame.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Report no subject in every frame.
    pub fn with_empty_results(mut self) -> Self {
        self.empty = true;
        self
    }
}

impl ModelLoader for SyntheticLoader {
    fn load(
        &self,
        asset: &ModelAsset,
        delegate: Delegate,
    ) -> Result<Box<dyn LandmarkRunner>, EngineError> {
        if self.failing.contains(&delegate) {
            return Err(EngineError::DelegateUnsupported(delegate));
        }
        debug!(
            "{} Synthetic model standing in for {} on {}",
            prefix::ENGINE,
            asset.path,
            delegate
        );
        Ok(Box::new(SyntheticRunner {
            latency: self.latency,
            empty: self.empty,
        }))
    }
}

struct SyntheticRunner {
    latency: Duration,
    empty: bool,
}

impl LandmarkRunner for SyntheticRunner {
    fn infer(&mut self, image: &RgbaImage) -> Result<DetectionResult, EngineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::InvalidInput("empty image".to_string()));
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.empty {
            return Ok(DetectionResult::empty());
        }
        Ok(DetectionResult::single(standing_pose()))
    }
}

/// The skeleton every synthetic detection reports.
pub fn standing_pose() -> Vec<Landmark> {
    STANDING_POSE
        .iter()
        .map(|&(x, y)| Landmark::new(x, y, 0.0, 0.9))
        .collect()
}
