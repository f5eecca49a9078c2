//! Composite orchestration: landmarks, curves, both eyes, JPEG.
//!
//! [`Compositor::composite`] drives one request through the stages of
//! [`PipelineStage`] and always returns a [`CompositeResult`]; every
//! failure ends as [`CompositeStatus::Failure`] with an error message and
//! no image.
//!
//! Drawing is attempted with [`CompositeVariant::Segmented`] first. If
//! either eye fails (overlay load, degenerate geometry) the canvas is
//! thrown away and both eyes are redrawn on a fresh canvas with
//! [`CompositeVariant::Simple`]. A second failure is terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgb, RgbImage};

use crate::compositor::{
    Canvas, CompositeError, CompositeVariant, EyeGeometry, EyeReport, Overlay, composite_eye,
};
use crate::curve::{CurvePoint, fit_curve};
use crate::diagnostics::{Clock, CompositeDiagnostics, StageTimings, WebClock};
use crate::landmark::{DetectionResult, LandmarkAcquirer, LandmarkMethod};
use crate::overlay::{AssetStore, load_overlay};
use crate::style::StyleId;
use crate::types::{
    CompositeRequest, CompositeResult, CompositeStatus, EyeSide, PipelineConfig, PipelineError,
    RgbaImage,
};

/// Quality score lost when the simple variant had to be used.
pub const SIMPLE_VARIANT_PENALTY: u8 = 15;

/// Steps of one composite request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Request accepted.
    Start,
    /// Running the landmark tiers.
    AcquireLandmarks,
    /// Fitting a curve to each upper lid.
    FitCurves,
    /// Drawing the image-left eye.
    CompositeLeft,
    /// Drawing the image-right eye.
    CompositeRight,
    /// Encoding the canvas as JPEG.
    EncodeOutput,
    /// Finished successfully.
    Done,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::AcquireLandmarks => "acquire-landmarks",
            Self::FitCurves => "fit-curves",
            Self::CompositeLeft => "composite-left",
            Self::CompositeRight => "composite-right",
            Self::EncodeOutput => "encode-output",
            Self::Done => "done",
        })
    }
}

fn enter(stage: PipelineStage) {
    tracing::debug!(%stage, "pipeline stage");
}

/// Cooperative cancellation flag, checked between the per-eye steps.
///
/// Clones share the flag, so a host can keep one half and hand the
/// other to the compositor.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), CompositeError> {
        if self.is_cancelled() {
            Err(CompositeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) to RGBA.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Encode `image` as a baseline JPEG, dropping alpha.
///
/// `quality` is clamped to `1..=100`.
///
/// # Errors
///
/// Returns [`PipelineError::Encode`] if the encoder rejects the image
/// (for example, zero dimensions).
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let rgb = RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        Rgb([r, g, b])
    });
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(buf)
}

/// Estimated preview quality for a landmark tier and compositing variant.
#[must_use]
pub const fn quality_score(method: LandmarkMethod, variant: CompositeVariant) -> u8 {
    let base = match method {
        LandmarkMethod::Primary => 95,
        LandmarkMethod::Secondary => 85,
        LandmarkMethod::Heuristic => 70,
    };
    match variant {
        CompositeVariant::Segmented => base,
        CompositeVariant::Simple => base - SIMPLE_VARIANT_PENALTY,
    }
}

/// A successful run before it is packed into a [`CompositeResult`].
struct Outcome {
    jpeg: Vec<u8>,
    method: LandmarkMethod,
    confidence: f64,
    variant: CompositeVariant,
    fallback_used: bool,
    left: EyeReport,
    right: EyeReport,
}

/// Runs composite requests against one asset store and configuration.
pub struct Compositor<C: Clock = WebClock> {
    acquirer: LandmarkAcquirer,
    assets: Arc<dyn AssetStore>,
    config: PipelineConfig,
    clock: C,
}

impl<C: Clock> std::fmt::Debug for Compositor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compositor")
            .field("acquirer", &self.acquirer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Compositor<WebClock> {
    /// A compositor using the heuristic tier only, the process-wide
    /// availability cache and the wall clock.
    #[must_use]
    pub fn new(assets: Arc<dyn AssetStore>, config: PipelineConfig) -> Self {
        let acquirer = LandmarkAcquirer::new(config.heuristic.clone())
            .with_timeouts(config.primary_timeout(), config.secondary_timeout());
        Self {
            acquirer,
            assets,
            config,
            clock: WebClock,
        }
    }
}

impl<C: Clock> Compositor<C> {
    /// Replace the landmark acquirer (to install model-backed tiers).
    #[must_use]
    pub fn with_acquirer(mut self, acquirer: LandmarkAcquirer) -> Self {
        self.acquirer = acquirer;
        self
    }

    /// Replace the clock used for timings.
    #[must_use]
    pub fn with_clock<D: Clock>(self, clock: D) -> Compositor<D> {
        Compositor {
            acquirer: self.acquirer,
            assets: self.assets,
            config: self.config,
            clock,
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The landmark acquirer in use.
    #[must_use]
    pub const fn acquirer(&self) -> &LandmarkAcquirer {
        &self.acquirer
    }

    /// Composite the request's style onto both eyes.
    #[must_use]
    pub fn composite(&self, request: &CompositeRequest) -> CompositeResult {
        self.run(request, None, &CancelToken::new())
    }

    /// Like [`composite`](Self::composite), checking `cancel` between
    /// the per-eye steps.
    #[must_use]
    pub fn composite_cancellable(
        &self,
        request: &CompositeRequest,
        cancel: &CancelToken,
    ) -> CompositeResult {
        self.run(request, None, cancel)
    }

    /// Composite using landmarks the caller already holds, skipping
    /// acquisition.
    #[must_use]
    pub fn composite_landmarks(
        &self,
        request: &CompositeRequest,
        landmarks: DetectionResult,
    ) -> CompositeResult {
        self.run(request, Some(landmarks), &CancelToken::new())
    }

    /// Like [`composite_landmarks`](Self::composite_landmarks), checking
    /// `cancel` between the per-eye steps.
    #[must_use]
    pub fn composite_landmarks_cancellable(
        &self,
        request: &CompositeRequest,
        landmarks: DetectionResult,
        cancel: &CancelToken,
    ) -> CompositeResult {
        self.run(request, Some(landmarks), cancel)
    }

    fn run(
        &self,
        request: &CompositeRequest,
        supplied: Option<DetectionResult>,
        cancel: &CancelToken,
    ) -> CompositeResult {
        let started = self.clock.now();
        let style = StyleId::parse(&request.style_id);
        let mut timings = StageTimings::default();
        let mut detection = None;

        enter(PipelineStage::Start);
        let outcome = self.execute(
            &request.source_image,
            style,
            supplied,
            cancel,
            &mut timings,
            &mut detection,
        );
        let total_duration = self.clock.elapsed(&started);
        let processing_time_ms = u64::try_from(total_duration.as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(outcome) => {
                enter(PipelineStage::Done);
                let (method, confidence) = (outcome.method, outcome.confidence);
                let score = quality_score(method, outcome.variant);
                tracing::info!(
                    %style,
                    %method,
                    variant = %outcome.variant,
                    quality_score = score,
                    processing_time_ms,
                    "composite finished"
                );
                CompositeResult {
                    output_image: Some(outcome.jpeg),
                    status: CompositeStatus::Success,
                    error: None,
                    processing_time_ms,
                    quality_score: Some(score),
                    method: Some(method),
                    confidence: Some(confidence),
                    variant: Some(outcome.variant),
                    diagnostics: Some(CompositeDiagnostics {
                        image_width: request.source_image.width(),
                        image_height: request.source_image.height(),
                        style,
                        method,
                        confidence,
                        variant: outcome.variant,
                        fallback_used: outcome.fallback_used,
                        left: outcome.left,
                        right: outcome.right,
                        timings,
                        total_duration,
                    }),
                }
            }
            Err(error) => {
                tracing::warn!(%style, %error, processing_time_ms, "composite failed");
                CompositeResult {
                    output_image: None,
                    status: CompositeStatus::Failure,
                    error: Some(error.to_string()),
                    processing_time_ms,
                    quality_score: None,
                    method: detection.as_ref().map(|d| d.method),
                    confidence: detection.as_ref().map(|d| d.confidence),
                    variant: None,
                    diagnostics: None,
                }
            }
        }
    }

    fn execute(
        &self,
        image: &RgbaImage,
        style: StyleId,
        supplied: Option<DetectionResult>,
        cancel: &CancelToken,
        timings: &mut StageTimings,
        detection: &mut Option<DetectionResult>,
    ) -> Result<Outcome, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::EmptyInput);
        }

        enter(PipelineStage::AcquireLandmarks);
        let t = self.clock.now();
        let landmarks = match supplied {
            Some(landmarks) => landmarks
                .validate()
                .map(|()| landmarks)
                .map_err(|error| {
                    tracing::warn!(%error, "supplied landmarks rejected");
                    PipelineError::LandmarkAcquisition
                })?,
            None => self
                .acquirer
                .acquire(image)
                .ok_or(PipelineError::LandmarkAcquisition)?,
        };
        timings.acquire = self.clock.elapsed(&t);
        let landmarks = detection.insert(landmarks);

        enter(PipelineStage::FitCurves);
        let t = self.clock.now();
        let resolution = self.config.curve_resolution;
        let left_curve = fit_curve(landmarks.left_eye.points(), resolution);
        let right_curve = fit_curve(landmarks.right_eye.points(), resolution);
        timings.fit = self.clock.elapsed(&t);

        let t = self.clock.now();
        let mut drawn = None;
        for variant in [CompositeVariant::Segmented, CompositeVariant::Simple] {
            match self.draw_both(
                image,
                style,
                landmarks,
                [&left_curve, &right_curve],
                variant,
                cancel,
            ) {
                Ok(result) => {
                    drawn = Some((variant, result));
                    break;
                }
                Err(CompositeError::Cancelled) => return Err(CompositeError::Cancelled.into()),
                Err(error) if variant == CompositeVariant::Segmented => {
                    tracing::warn!(%style, %error, "segmented composite failed, retrying simple");
                }
                Err(error) => return Err(error.into()),
            }
        }
        timings.composite = self.clock.elapsed(&t);
        let Some((variant, (canvas, left, right))) = drawn else {
            return Err(PipelineError::Composite(CompositeError::Canvas(
                "no compositing variant ran".to_string(),
            )));
        };

        enter(PipelineStage::EncodeOutput);
        let t = self.clock.now();
        let jpeg = encode_jpeg(&canvas, self.config.jpeg_quality)?;
        timings.encode = self.clock.elapsed(&t);

        Ok(Outcome {
            jpeg,
            method: landmarks.method,
            confidence: landmarks.confidence,
            variant,
            fallback_used: variant == CompositeVariant::Simple,
            left,
            right,
        })
    }

    /// Load the overlay and draw both eyes on a fresh canvas.
    fn draw_both(
        &self,
        image: &RgbaImage,
        style: StyleId,
        landmarks: &DetectionResult,
        curves: [&[CurvePoint]; 2],
        variant: CompositeVariant,
        cancel: &CancelToken,
    ) -> Result<(RgbaImage, EyeReport, EyeReport), CompositeError> {
        let tuning = style.config();
        let overlay = load_overlay(&self.assets, style, self.config.overlay_timeout())?;
        let overlay = Overlay::new(&overlay, &self.config)?;
        let mut canvas = Canvas::from_rgba(image)?;

        let [left_curve, right_curve] = curves;
        let eyes = [
            (
                PipelineStage::CompositeLeft,
                EyeSide::Left,
                &landmarks.left_eye,
                left_curve,
            ),
            (
                PipelineStage::CompositeRight,
                EyeSide::Right,
                &landmarks.right_eye,
                right_curve,
            ),
        ];

        let mut reports = Vec::with_capacity(2);
        for (stage, side, eye, curve) in eyes {
            cancel.check()?;
            enter(stage);
            let geometry = EyeGeometry::compute(eye, curve, tuning, side)?;
            reports.push(composite_eye(
                &mut canvas,
                &overlay,
                curve,
                &geometry,
                tuning,
                variant,
                &self.config,
            )?);
        }
        cancel.check()?;

        let mut reports = reports.into_iter();
        match (reports.next(), reports.next()) {
            (Some(left), Some(right)) => Ok((canvas.into_rgba(), left, right)),
            _ => Err(CompositeError::Canvas("eye reports missing".to_string())),
        }
    }
}
