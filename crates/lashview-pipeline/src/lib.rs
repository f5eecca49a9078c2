//! lashview-pipeline: eyelash-extension preview compositing (sans-IO).
//!
//! Draws a style's lash overlay onto both upper eyelids of a face photo:
//! landmark acquisition with tiered fallback -> Catmull-Rom lid curves ->
//! per-segment warped multiply compositing -> JPEG.
//!
//! The crate performs no network or filesystem access of its own. Model
//! backends are injected through [`landmark::MeshBackend`] and
//! [`landmark::ShapeBackend`]; overlay assets through [`AssetStore`].

pub mod compositor;
pub mod curve;
pub mod diagnostics;
pub mod landmark;
pub mod overlay;
pub mod pipeline;
pub mod style;
pub mod timeout;
pub mod types;

use std::sync::Arc;

pub use compositor::{Canvas, CompositeError, CompositeVariant, EyeGeometry, EyeReport, Overlay};
pub use curve::{CurvePoint, fit_curve};
pub use diagnostics::{Clock, CompositeDiagnostics, StageTimings, WebClock};
pub use landmark::{
    AvailabilityCache, DetectionResult, HeuristicConfig, LandmarkAcquirer, LandmarkError,
    LandmarkMethod, LandmarkProvider, calculate_eye_width,
};
pub use overlay::{
    AssetStore, DirectoryAssetStore, InMemoryAssetStore, OverlayLoadError, load_overlay,
};
pub use pipeline::{
    CancelToken, Compositor, PipelineStage, decode_image, encode_jpeg, quality_score,
};
pub use style::{StyleConfig, StyleId, get_style_config};
pub use types::{
    CompositeRequest, CompositeResult, CompositeStatus, EyeLandmarks, EyeSide, PipelineConfig,
    PipelineError, Point, RgbaImage,
};

/// Composite `style_id` onto an encoded photo.
///
/// Decodes `image_bytes` (PNG, JPEG, BMP, WebP) and runs a heuristic-only
/// [`Compositor`] over it. Hosts with landmark models build their own
/// [`Compositor`] via [`Compositor::with_acquirer`].
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized. Every later failure is reported inside the returned
/// [`CompositeResult`] instead.
pub fn preview(
    image_bytes: &[u8],
    style_id: &str,
    assets: Arc<dyn AssetStore>,
    config: &PipelineConfig,
) -> Result<CompositeResult, PipelineError> {
    let source_image = decode_image(image_bytes)?;
    let compositor = Compositor::new(assets, config.clone());
    Ok(compositor.composite(&CompositeRequest::new(source_image, style_id)))
}
