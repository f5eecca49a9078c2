//! Secondary tier: upper lids from the classical 68-point layout.

use std::sync::Arc;

use crate::types::{EyeLandmarks, Point, RgbaImage};

use super::{DetectionResult, LandmarkError, LandmarkMethod, LandmarkProvider};

/// Points a 68-point shape backend must return.
pub const SHAPE_POINT_COUNT: usize = 68;

/// Upper lid of the image-left eye: outer corner, two lid points, inner corner.
pub const LEFT_UPPER_LID_SHAPE: [usize; 4] = [36, 37, 38, 39];

/// Upper lid of the image-right eye, outer corner first.
pub const RIGHT_UPPER_LID_SHAPE: [usize; 4] = [45, 44, 43, 42];

/// A 68-point facial landmark model supplied by the host.
pub trait ShapeBackend: Send + Sync {
    /// Load the face detector and shape predictor.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when the model is unavailable.
    fn load(&self) -> Result<(), LandmarkError>;

    /// The 68 landmarks of the most prominent face, or `None` if no face.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when inference fails.
    fn shape(&self, image: &RgbaImage) -> Result<Option<Vec<Point>>, LandmarkError>;
}

/// [`LandmarkProvider`] over a [`ShapeBackend`].
pub struct ShapeProvider {
    backend: Arc<dyn ShapeBackend>,
}

impl ShapeProvider {
    /// Wrap a 68-point backend.
    #[must_use]
    pub fn new(backend: Arc<dyn ShapeBackend>) -> Self {
        Self { backend }
    }
}

impl LandmarkProvider for ShapeProvider {
    fn method(&self) -> LandmarkMethod {
        LandmarkMethod::Secondary
    }

    fn initialize(&self) -> Result<(), LandmarkError> {
        self.backend.load()
    }

    fn detect(&self, image: &RgbaImage) -> Result<DetectionResult, LandmarkError> {
        let shape = self.backend.shape(image)?.ok_or(LandmarkError::NoFace)?;
        if shape.len() < SHAPE_POINT_COUNT {
            return Err(LandmarkError::Degenerate {
                method: LandmarkMethod::Secondary,
                points: shape.len(),
            });
        }
        let pick = |indices: &[usize]| {
            EyeLandmarks::new(indices.iter().filter_map(|&i| shape.get(i).copied()).collect())
        };
        Ok(DetectionResult::from_eyes(
            pick(&LEFT_UPPER_LID_SHAPE),
            pick(&RIGHT_UPPER_LID_SHAPE),
            LandmarkMethod::Secondary,
        ))
    }
}
