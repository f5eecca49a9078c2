//! Primary tier: eyelid subset of a dense face mesh.

use std::sync::Arc;

use crate::types::{EyeLandmarks, Point, RgbaImage};

use super::{DetectionResult, LandmarkError, LandmarkMethod, LandmarkProvider};

/// Points a face-mesh backend must return.
pub const MESH_POINT_COUNT: usize = 468;

/// Upper-lid mesh indices of the image-left eye, outer corner first.
pub const LEFT_UPPER_LID_MESH: [usize; 9] = [33, 246, 161, 160, 159, 158, 157, 173, 133];

/// Upper-lid mesh indices of the image-right eye, outer corner first
/// (so the set runs right to left in the image).
pub const RIGHT_UPPER_LID_MESH: [usize; 9] = [263, 466, 388, 387, 386, 385, 384, 398, 362];

/// A dense face-mesh model supplied by the host.
pub trait MeshBackend: Send + Sync {
    /// Load weights or open a session. Called once per availability cache.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when the model is unavailable.
    fn load(&self) -> Result<(), LandmarkError>;

    /// Mesh points of the most prominent face, or `None` if no face.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when inference fails.
    fn face_mesh(&self, image: &RgbaImage) -> Result<Option<Vec<Point>>, LandmarkError>;
}

/// [`LandmarkProvider`] over a [`MeshBackend`].
pub struct MeshProvider {
    backend: Arc<dyn MeshBackend>,
}

impl MeshProvider {
    /// Wrap a mesh backend.
    #[must_use]
    pub fn new(backend: Arc<dyn MeshBackend>) -> Self {
        Self { backend }
    }
}

impl LandmarkProvider for MeshProvider {
    fn method(&self) -> LandmarkMethod {
        LandmarkMethod::Primary
    }

    fn initialize(&self) -> Result<(), LandmarkError> {
        self.backend.load()
    }

    fn detect(&self, image: &RgbaImage) -> Result<DetectionResult, LandmarkError> {
        let mesh = self.backend.face_mesh(image)?.ok_or(LandmarkError::NoFace)?;
        if mesh.len() < MESH_POINT_COUNT {
            return Err(LandmarkError::Degenerate {
                method: LandmarkMethod::Primary,
                points: mesh.len(),
            });
        }
        let pick = |indices: &[usize]| -> EyeLandmarks {
            EyeLandmarks::new(indices.iter().filter_map(|&i| mesh.get(i).copied()).collect())
        };
        Ok(DetectionResult::from_eyes(
            pick(&LEFT_UPPER_LID_MESH),
            pick(&RIGHT_UPPER_LID_MESH),
            LandmarkMethod::Primary,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Backend returning a mesh whose point `i` sits at `(i, i / 2)`.
    struct IndexMesh {
        points: usize,
    }

    impl MeshBackend for IndexMesh {
        fn load(&self) -> Result<(), LandmarkError> {
            Ok(())
        }

        #[allow(clippy::cast_precision_loss)]
        fn face_mesh(&self, _image: &RgbaImage) -> Result<Option<Vec<Point>>, LandmarkError> {
            if self.points == 0 {
                return Ok(None);
            }
            Ok(Some(
                (0..self.points)
                    .map(|i| Point::new(i as f64, i as f64 / 2.0))
                    .collect(),
            ))
        }
    }

    fn image() -> RgbaImage {
        RgbaImage::new(8, 8)
    }

    #[test]
    fn picks_lid_indices_in_order() {
        let provider = MeshProvider::new(Arc::new(IndexMesh { points: 478 }));
        let result = provider.detect(&image()).unwrap();
        assert_eq!(result.method, LandmarkMethod::Primary);
        assert_eq!(result.left_eye.len(), 9);
        assert_eq!(result.left_eye.first(), Some(&Point::new(33.0, 16.5)));
        assert_eq!(result.left_eye.last(), Some(&Point::new(133.0, 66.5)));
        assert_eq!(result.right_eye.first(), Some(&Point::new(263.0, 131.5)));
        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn no_face_is_reported() {
        let provider = MeshProvider::new(Arc::new(IndexMesh { points: 0 }));
        assert_eq!(provider.detect(&image()), Err(LandmarkError::NoFace));
    }

    #[test]
    fn truncated_mesh_is_degenerate() {
        let provider = MeshProvider::new(Arc::new(IndexMesh { points: 100 }));
        assert!(matches!(
            provider.detect(&image()),
            Err(LandmarkError::Degenerate { points: 100, .. })
        ));
    }
}
