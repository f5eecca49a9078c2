//! Shared types for the lashview compositing pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compositor::{CompositeError, CompositeVariant};
use crate::diagnostics::CompositeDiagnostics;
use crate::landmark::{HeuristicConfig, LandmarkMethod};

/// Re-export `RgbaImage` so downstream crates can hand decoded photos
/// to the pipeline without depending on `image` directly.
pub use image::RgbaImage;

/// Minimum number of landmarks an eyelid needs before it can be fitted.
pub const MIN_LANDMARKS: usize = 3;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Whether both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Which eye a landmark set or draw call belongs to, in image space.
///
/// `Left` is the eye on the left half of the photo. Its landmarks run
/// left to right; `Right` landmarks run right to left, so index 0 is the
/// outer corner on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EyeSide {
    /// Eye on the left half of the image.
    Left,
    /// Eye on the right half of the image (drawn mirrored).
    Right,
}

impl EyeSide {
    /// Horizontal scale sign applied when drawing this eye.
    #[must_use]
    pub const fn mirror_sign(self) -> f64 {
        match self {
            Self::Left => 1.0,
            Self::Right => -1.0,
        }
    }
}

impl std::fmt::Display for EyeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Ordered upper-eyelid contour for one eye.
///
/// The first and last points are the eye corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeLandmarks(Vec<Point>);

impl EyeLandmarks {
    /// Create a landmark set from ordered points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the set has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of landmarks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Outer corner, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Inner corner, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Whether there are enough finite points to fit a curve through.
    #[must_use]
    pub fn is_fittable(&self) -> bool {
        self.0.len() >= MIN_LANDMARKS && self.0.iter().all(|p| p.is_finite())
    }

    /// Reflect every point across the vertical center line of an image
    /// `width` pixels wide, keeping the index order.
    #[must_use]
    pub fn mirrored(&self, width: f64) -> Self {
        Self(
            self.0
                .iter()
                .map(|p| Point::new(width - p.x, p.y))
                .collect(),
        )
    }
}

/// Tunable parameters for the compositing pipeline.
///
/// Style-specific deformation lives in [`crate::style::StyleConfig`];
/// this struct holds everything that is independent of the chosen style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Catmull-Rom samples per landmark span.
    pub curve_resolution: usize,

    /// JPEG quality of the encoded output (1-100).
    pub jpeg_quality: u8,

    /// Time allowed for the mesh provider, including its first-use
    /// initialization, in milliseconds.
    pub primary_timeout_ms: u64,

    /// Time allowed for the 68-point provider, in milliseconds.
    pub secondary_timeout_ms: u64,

    /// Time allowed for fetching and decoding the overlay asset, in
    /// milliseconds.
    pub overlay_timeout_ms: u64,

    /// Gaussian sigma of the overlay's drop shadow, in overlay pixels.
    pub shadow_blur: f32,

    /// Downward shadow offset in canvas pixels.
    pub shadow_offset_y: f32,

    /// Opacity of the black shadow (0.0 to 1.0).
    pub shadow_alpha: f32,

    /// How far below the lid line the advanced clipping path closes,
    /// in canvas pixels.
    pub mask_depth: f64,

    /// Decision constants of the histogram fallback provider.
    pub heuristic: HeuristicConfig,
}

impl PipelineConfig {
    /// Default Catmull-Rom samples per span.
    pub const DEFAULT_CURVE_RESOLUTION: usize = crate::curve::DEFAULT_RESOLUTION;
    /// Default JPEG quality.
    pub const DEFAULT_JPEG_QUALITY: u8 = 92;
    /// Default primary provider timeout.
    pub const DEFAULT_PRIMARY_TIMEOUT_MS: u64 = 8_000;
    /// Default secondary provider timeout.
    pub const DEFAULT_SECONDARY_TIMEOUT_MS: u64 = 5_000;
    /// Default overlay load timeout.
    pub const DEFAULT_OVERLAY_TIMEOUT_MS: u64 = 10_000;

    /// Primary provider timeout as a [`Duration`].
    #[must_use]
    pub const fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    /// Secondary provider timeout as a [`Duration`].
    #[must_use]
    pub const fn secondary_timeout(&self) -> Duration {
        Duration::from_millis(self.secondary_timeout_ms)
    }

    /// Overlay load timeout as a [`Duration`].
    #[must_use]
    pub const fn overlay_timeout(&self) -> Duration {
        Duration::from_millis(self.overlay_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            curve_resolution: Self::DEFAULT_CURVE_RESOLUTION,
            jpeg_quality: Self::DEFAULT_JPEG_QUALITY,
            primary_timeout_ms: Self::DEFAULT_PRIMARY_TIMEOUT_MS,
            secondary_timeout_ms: Self::DEFAULT_SECONDARY_TIMEOUT_MS,
            overlay_timeout_ms: Self::DEFAULT_OVERLAY_TIMEOUT_MS,
            shadow_blur: 2.0,
            shadow_offset_y: 1.0,
            shadow_alpha: 0.3,
            mask_depth: 30.0,
            heuristic: HeuristicConfig::default(),
        }
    }
}

/// One composite job: a decoded photo and the style to preview on it.
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    /// Decoded client photo.
    pub source_image: RgbaImage,
    /// Style identifier; unknown ids fall back to the default style.
    pub style_id: String,
}

impl CompositeRequest {
    /// Create a request.
    #[must_use]
    pub fn new(source_image: RgbaImage, style_id: impl Into<String>) -> Self {
        Self {
            source_image,
            style_id: style_id.into(),
        }
    }
}

/// Terminal state of a composite job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeStatus {
    /// The output image holds both eyes.
    Success,
    /// Nothing usable was produced; see `error`.
    Failure,
}

/// What the orchestrator hands back to its caller.
///
/// A failed job never carries an image, so a half-drawn canvas can not
/// be mistaken for a finished preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeResult {
    /// JPEG-encoded composite (`Some` only on success).
    pub output_image: Option<Vec<u8>>,
    /// Success or failure.
    pub status: CompositeStatus,
    /// Human-readable failure description.
    pub error: Option<String>,
    /// Wall time from pipeline entry to encoded output.
    pub processing_time_ms: u64,
    /// Estimated preview quality (0-100) from provider tier and variant.
    pub quality_score: Option<u8>,
    /// Landmark tier that produced the geometry.
    pub method: Option<LandmarkMethod>,
    /// Confidence of that tier.
    pub confidence: Option<f64>,
    /// Compositing variant that produced the output.
    pub variant: Option<CompositeVariant>,
    /// Per-stage timings and per-eye reports.
    pub diagnostics: Option<CompositeDiagnostics>,
}

impl CompositeResult {
    /// Whether the job succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CompositeStatus::Success
    }
}

/// Errors that can end a composite job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Every landmark tier failed or produced too few points.
    #[error("no eyelid landmarks could be acquired")]
    LandmarkAcquisition,

    /// Drawing failed in both the segmented and the simple variant.
    #[error(transparent)]
    Composite(#[from] CompositeError),

    /// The finished canvas could not be encoded.
    #[error("failed to encode output image: {0}")]
    Encode(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_finiteness() {
        assert!(Point::new(1.0, 2.0).is_finite());
        assert!(!Point::new(f64::NAN, 2.0).is_finite());
        assert!(!Point::new(1.0, f64::INFINITY).is_finite());
    }

    #[test]
    fn landmarks_fittable_needs_three_finite_points() {
        let two = EyeLandmarks::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        assert!(!two.is_fittable());

        let three = EyeLandmarks::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, -1.0),
            Point::new(2.0, 0.0),
        ]);
        assert!(three.is_fittable());

        let with_nan = EyeLandmarks::new(vec![
            Point::new(0.0, 0.0),
            Point::new(f64::NAN, -1.0),
            Point::new(2.0, 0.0),
        ]);
        assert!(!with_nan.is_fittable());
    }

    #[test]
    fn landmarks_mirror_keeps_order() {
        let set = EyeLandmarks::new(vec![Point::new(10.0, 5.0), Point::new(30.0, 7.0)]);
        let mirrored = set.mirrored(100.0);
        assert_eq!(mirrored.first(), Some(&Point::new(90.0, 5.0)));
        assert_eq!(mirrored.last(), Some(&Point::new(70.0, 7.0)));
    }

    #[test]
    fn eye_side_sign_and_display() {
        assert!((EyeSide::Left.mirror_sign() - 1.0).abs() < f64::EPSILON);
        assert!((EyeSide::Right.mirror_sign() + 1.0).abs() < f64::EPSILON);
        assert_eq!(EyeSide::Right.to_string(), "right");
    }

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.curve_resolution, 24);
        assert_eq!(config.jpeg_quality, 92);
        assert_eq!(config.primary_timeout(), Duration::from_secs(8));
        assert!((config.mask_depth - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pipeline_config_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"jpeg_quality": 95, "curve_resolution": 30}"#).unwrap();
        assert_eq!(config.jpeg_quality, 95);
        assert_eq!(config.curve_resolution, 30);
        assert_eq!(
            config.overlay_timeout_ms,
            PipelineConfig::DEFAULT_OVERLAY_TIMEOUT_MS
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(
            PipelineError::EmptyInput.to_string(),
            "input image data is empty"
        );
        assert_eq!(
            PipelineError::LandmarkAcquisition.to_string(),
            "no eyelid landmarks could be acquired"
        );
    }
}
