//! Core types shared across the pipeline
//!
//! Landmarks come out of the model, flat sequences go out to the host.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of body landmarks produced by the pose model.
pub const BODY_LANDMARK_COUNT: usize = 33;

/// Values emitted per landmark in a [`FlatLandmarkSequence`] (x, y, z, visibility).
pub const VALUES_PER_LANDMARK: usize = 4;

/// A single tracked skeletal keypoint
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// Normalized horizontal position, [0, 1] across the upright frame
    pub x: f32,
    /// Normalized vertical position, [0, 1] down the upright frame
    pub y: f32,
    /// Depth relative to the hip midpoint, same scale as x
    pub z: f32,
    /// Visibility confidence in [0, 1], when the model reports one
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: Some(visibility),
        }
    }

    /// Landmark without a visibility score.
    pub fn without_visibility(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility: None,
        }
    }
}

/// Raw model output for one frame: zero or more subjects, each an ordered
/// list of landmarks in model index order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub subjects: Vec<Vec<Landmark>>,
}

impl DetectionResult {
    /// A result with no detected subject.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(landmarks: Vec<Landmark>) -> Self {
        Self {
            subjects: vec![landmarks],
        }
    }

    /// Landmarks of the first detected subject, the only one consumed downstream.
    pub fn first_subject(&self) -> Option<&[Landmark]> {
        self.subjects.first().map(|s| s.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Which physical camera is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::Front => CameraFacing::Back,
            CameraFacing::Back => CameraFacing::Front,
        }
    }

    /// The front camera shows the user a mirrored preview, so landmark x is
    /// mirrored to stay consistent with what the user sees.
    pub fn mirrors_x(self) -> bool {
        matches!(self, CameraFacing::Front)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CameraFacing::Front => "front",
            CameraFacing::Back => "back",
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level output: `x, y, z, visibility` per landmark, flattened in model
/// index order. Length is always a multiple of four and may be zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatLandmarkSequence(Vec<f64>);

impl FlatLandmarkSequence {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn with_landmark_capacity(landmarks: usize) -> Self {
        Self(Vec::with_capacity(landmarks * VALUES_PER_LANDMARK))
    }

    pub(crate) fn push_landmark(&mut self, x: f64, y: f64, z: f64, visibility: f64) {
        self.0.extend_from_slice(&[x, y, z, visibility]);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn landmark_count(&self) -> usize {
        self.0.len() / VALUES_PER_LANDMARK
    }

    /// The `(x, y, z, visibility)` group for landmark `index`.
    pub fn landmark(&self, index: usize) -> Option<[f64; VALUES_PER_LANDMARK]> {
        let start = index * VALUES_PER_LANDMARK;
        let group = self.0.get(start..start + VALUES_PER_LANDMARK)?;
        Some([group[0], group[1], group[2], group[3]])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl From<Vec<f64>> for FlatLandmarkSequence {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Pose model landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    pub fn index(self) -> usize {
        self as usize
    }
}
