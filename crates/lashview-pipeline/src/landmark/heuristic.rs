//! Last-resort tier: place the lids from a row histogram.
//!
//! The band of the face where the eyes sit is darker and busier than
//! the forehead and cheeks. Each row in that band is scored by its dark
//! pixels plus its luma transitions, the best row is taken as the lid
//! line, and a symmetric arc is synthesized for each eye.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::types::{EyeLandmarks, Point, RgbaImage};

use super::{DetectionResult, LandmarkError, LandmarkMethod, LandmarkProvider};

/// Decision constants of the histogram provider.
///
/// Row and column positions are fractions of the image height and width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Top of the scanned band.
    pub region_top: f64,
    /// Bottom of the scanned band (exclusive).
    pub region_bottom: f64,
    /// Luma below which a pixel counts as dark.
    pub dark_threshold: u8,
    /// Minimum luma difference between neighbours that counts as an edge.
    pub contrast_threshold: u8,
    /// Weight of one edge relative to one dark pixel.
    pub contrast_weight: f64,
    /// Lid row used when no row in the band scores at all.
    pub fallback_row: f64,
    /// Horizontal center of the image-left eye.
    pub left_eye_center: f64,
    /// Horizontal center of the image-right eye.
    pub right_eye_center: f64,
    /// Eye width as a fraction of the image width.
    pub eye_width_ratio: f64,
    /// Lid arc height as a fraction of the eye width.
    pub lid_arc_ratio: f64,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            region_top: 0.25,
            region_bottom: 0.55,
            dark_threshold: 100,
            contrast_threshold: 30,
            contrast_weight: 2.0,
            fallback_row: 0.40,
            left_eye_center: 0.35,
            right_eye_center: 0.65,
            eye_width_ratio: 0.15,
            lid_arc_ratio: 0.15,
        }
    }
}

/// Histogram-based [`LandmarkProvider`]. Needs no model and answers for
/// every non-empty image.
///
/// Detection is bounded local work (one grayscale pass and one scan of the
/// band rows), so [`LandmarkAcquirer`](super::LandmarkAcquirer) calls it
/// inline without a timeout.
#[derive(Debug, Clone, Default)]
pub struct HeuristicProvider {
    config: HeuristicConfig,
}

impl HeuristicProvider {
    /// Create a provider with the given constants.
    #[must_use]
    pub const fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    /// Score one row: dark pixels plus weighted neighbour transitions.
    fn row_score(&self, gray: &GrayImage, y: u32) -> f64 {
        let dark = self.config.dark_threshold;
        let edge = self.config.contrast_threshold;
        let mut dark_count = 0_u32;
        let mut edges = 0_u32;
        let mut previous: Option<u8> = None;
        for x in 0..gray.width() {
            let luma = gray.get_pixel(x, y).0[0];
            if luma < dark {
                dark_count += 1;
            }
            if previous.is_some_and(|prev| luma.abs_diff(prev) > edge) {
                edges += 1;
            }
            previous = Some(luma);
        }
        f64::from(edges).mul_add(self.config.contrast_weight, f64::from(dark_count))
    }

    /// Row of the lid line.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn lid_row(&self, gray: &GrayImage) -> f64 {
        let height = f64::from(gray.height());
        let last_row = gray.height().saturating_sub(1);
        let top = ((height * self.config.region_top).floor().max(0.0) as u32).min(last_row);
        let bottom = ((height * self.config.region_bottom).floor().max(0.0) as u32)
            .min(gray.height())
            .max(top + 1);

        let mut best: Option<(u32, f64)> = None;
        for y in top..bottom.min(gray.height()) {
            let score = self.row_score(gray, y);
            // Strict comparison keeps the upper row on ties.
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((y, score));
            }
        }

        match best {
            Some((y, score)) if score > 0.0 => f64::from(y),
            _ => (height * self.config.fallback_row).floor(),
        }
    }

    /// Symmetric five-point lid centered on `center_x`, outer corner
    /// first when `left_to_right`.
    fn synthesize(&self, center_x: f64, row: f64, width: f64, left_to_right: bool) -> EyeLandmarks {
        let arc = width * self.config.lid_arc_ratio;
        let half = width / 2.0;
        let quarter = width / 4.0;
        let mut points = vec![
            Point::new(center_x - half, row),
            Point::new(center_x - quarter, 0.75f64.mul_add(-arc, row)),
            Point::new(center_x, row - arc),
            Point::new(center_x + quarter, 0.75f64.mul_add(-arc, row)),
            Point::new(center_x + half, row),
        ];
        if !left_to_right {
            points.reverse();
        }
        EyeLandmarks::new(points)
    }
}

impl LandmarkProvider for HeuristicProvider {
    fn method(&self) -> LandmarkMethod {
        LandmarkMethod::Heuristic
    }

    fn detect(&self, image: &RgbaImage) -> Result<DetectionResult, LandmarkError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(LandmarkError::Degenerate {
                method: LandmarkMethod::Heuristic,
                points: 0,
            });
        }

        let gray = image::imageops::grayscale(image);
        let row = self.lid_row(&gray);
        let image_width = f64::from(image.width());
        let eye_width = image_width * self.config.eye_width_ratio;

        tracing::debug!(row, eye_width, "histogram lid line");

        let left = self.synthesize(
            image_width * self.config.left_eye_center,
            row,
            eye_width,
            true,
        );
        let right = self.synthesize(
            image_width * self.config.right_eye_center,
            row,
            eye_width,
            false,
        );
        Ok(DetectionResult::from_eyes(
            left,
            right,
            LandmarkMethod::Heuristic,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Rgba;

    use super::*;

    const SKIN: Rgba<u8> = Rgba([210, 180, 160, 255]);
    const DARK: Rgba<u8> = Rgba([20, 15, 10, 255]);

    fn provider() -> HeuristicProvider {
        HeuristicProvider::new(HeuristicConfig::default())
    }

    #[test]
    fn finds_dark_band_inside_region() {
        let image = RgbaImage::from_fn(200, 100, |_, y| if y == 42 { DARK } else { SKIN });
        let result = provider().detect(&image).unwrap();
        assert_eq!(result.method, LandmarkMethod::Heuristic);
        assert_eq!(result.left_eye.first().unwrap().y, 42.0);
        assert_eq!(result.right_eye.first().unwrap().y, 42.0);
    }

    #[test]
    fn ignores_dark_rows_outside_region() {
        // Row 10 is above the band; the uniform band falls back to 40%.
        let image = RgbaImage::from_fn(200, 100, |_, y| if y == 10 { DARK } else { SKIN });
        let result = provider().detect(&image).unwrap();
        assert_eq!(result.left_eye.first().unwrap().y, 40.0);
    }

    #[test]
    fn ties_keep_the_upper_row() {
        let image =
            RgbaImage::from_fn(200, 100, |_, y| if y == 30 || y == 50 { DARK } else { SKIN });
        let result = provider().detect(&image).unwrap();
        assert_eq!(result.left_eye.first().unwrap().y, 30.0);
    }

    #[test]
    fn contrast_counts_toward_score() {
        // Row 35 has alternating stripes (many edges, half dark); row 45
        // is fully dark. 100 dark < 100 dark + 2 * 199 edges.
        let image = RgbaImage::from_fn(200, 100, |x, y| match y {
            35 if x % 2 == 0 => DARK,
            45 => DARK,
            _ => SKIN,
        });
        let result = provider().detect(&image).unwrap();
        assert_eq!(result.left_eye.first().unwrap().y, 35.0);
    }

    #[test]
    fn synthesized_lids_are_symmetric_and_mirrored() {
        let image = RgbaImage::from_pixel(400, 300, SKIN);
        let result = provider().detect(&image).unwrap();
        assert_eq!(result.left_eye.len(), 5);
        assert_eq!(result.right_eye.len(), 5);

        let left = result.left_eye.points();
        assert!(left[0].x < left[4].x);
        assert!((left[2].x - 140.0).abs() < 1e-9);
        assert!(left[2].y < left[1].y && left[1].y < left[0].y);

        let right = result.right_eye.points();
        assert!(right[0].x > right[4].x);
        assert!((right[2].x - 260.0).abs() < 1e-9);

        assert!((result.left_eye_width - 60.0).abs() < 1e-9);
        assert!((result.right_eye_width - 60.0).abs() < 1e-9);
        assert!((result.confidence - 0.60).abs() < f64::EPSILON);
        assert!(result.validate().is_ok());
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(provider().detect(&RgbaImage::new(0, 0)).is_err());
        assert!(provider().detect(&RgbaImage::new(10, 0)).is_err());
    }

    #[test]
    fn single_row_image_still_answers() {
        let image = RgbaImage::from_pixel(50, 1, SKIN);
        let result = provider().detect(&image).unwrap();
        assert!(result.validate().is_ok());
    }

    #[test]
    fn config_overrides_from_json() {
        let config: HeuristicConfig =
            serde_json::from_str(r#"{"fallback_row": 0.5, "eye_width_ratio": 0.2}"#).unwrap();
        assert!((config.fallback_row - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.dark_threshold, 100);
        let result = HeuristicProvider::new(config)
            .detect(&RgbaImage::from_pixel(100, 100, SKIN))
            .unwrap();
        assert_eq!(result.left_eye.first().unwrap().y, 50.0);
        assert!((result.left_eye_width - 20.0).abs() < 1e-9);
    }
}
