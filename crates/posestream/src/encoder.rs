//! Detection result to wire sequence

use crate::types::{CameraFacing, DetectionResult, FlatLandmarkSequence};

/// Flatten the first subject of `result` into `x, y, z, visibility` groups.
///
/// No subject yields an empty sequence. With the front camera the preview is
/// mirrored, so x becomes `1 - x`. Missing visibility encodes as 0.
pub fn encode(result: &DetectionResult, facing: CameraFacing) -> FlatLandmarkSequence {
    let Some(landmarks) = result.first_subject() else {
        return FlatLandmarkSequence::empty();
    };

    let mirror = facing.mirrors_x();
    let mut sequence = FlatLandmarkSequence::with_landmark_capacity(landmarks.len());
    for landmark in landmarks {
        let x = landmark.x as f64;
        sequence.push_landmark(
            if mirror { 1.0 - x } else { x },
            landmark.y as f64,
            landmark.z as f64,
            landmark.visibility.unwrap_or(0.0) as f64,
        );
    }
    sequence
}
