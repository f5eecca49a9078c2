//! Eyelid landmark acquisition with tiered fallback.
//!
//! This module defines the [`LandmarkProvider`] trait for pluggable
//! landmark sources and the [`LandmarkAcquirer`] that tries them in order
//! of precision:
//!
//! 1. [`MeshProvider`]: dense face mesh, eyelid subset mapped by index.
//! 2. [`ShapeProvider`]: classical 68-point facial landmarks.
//! 3. [`HeuristicProvider`]: row histogram analysis. Always answers.
//!
//! The first two wrap host-supplied model backends. Their first-use
//! initialization result is remembered in an [`AvailabilityCache`] so an
//! unavailable model is not reloaded on every request. Tier failures are
//! logged and swallowed; the caller only sees a result or `None`.

mod heuristic;
mod mesh;
mod shape;

use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timeout::{TimeoutError, run_with_timeout};
use crate::types::{EyeLandmarks, Point, RgbaImage};

pub use heuristic::{HeuristicConfig, HeuristicProvider};
pub use mesh::{
    LEFT_UPPER_LID_MESH, MESH_POINT_COUNT, MeshBackend, MeshProvider, RIGHT_UPPER_LID_MESH,
};
pub use shape::{
    LEFT_UPPER_LID_SHAPE, RIGHT_UPPER_LID_SHAPE, SHAPE_POINT_COUNT, ShapeBackend, ShapeProvider,
};

/// Eye width reported when a landmark set is too small to measure.
pub const DEFAULT_EYE_WIDTH: f64 = 60.0;

/// Which provider tier produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandmarkMethod {
    /// Dense face-mesh detector.
    Primary,
    /// 68-point facial landmark detector.
    Secondary,
    /// Row histogram analysis.
    Heuristic,
}

impl LandmarkMethod {
    /// Fixed confidence reported for this tier.
    ///
    /// None of the tiers exposes a per-detection score, so confidence
    /// encodes the expected accuracy of the tier itself.
    #[must_use]
    pub const fn confidence(self) -> f64 {
        match self {
            Self::Primary => 0.95,
            Self::Secondary => 0.80,
            Self::Heuristic => 0.60,
        }
    }
}

impl std::fmt::Display for LandmarkMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Secondary => f.write_str("secondary"),
            Self::Heuristic => f.write_str("heuristic"),
        }
    }
}

/// Eyelid landmarks for both eyes of one photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Upper lid of the image-left eye, ordered left to right.
    pub left_eye: EyeLandmarks,
    /// Upper lid of the image-right eye, ordered right to left.
    pub right_eye: EyeLandmarks,
    /// Corner-to-corner width of the left eye.
    pub left_eye_width: f64,
    /// Corner-to-corner width of the right eye.
    pub right_eye_width: f64,
    /// Tier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Tier that produced the landmarks.
    pub method: LandmarkMethod,
}

impl DetectionResult {
    /// Build a result, measuring both eyes and taking the tier's
    /// fixed confidence.
    #[must_use]
    pub fn from_eyes(left_eye: EyeLandmarks, right_eye: EyeLandmarks, method: LandmarkMethod) -> Self {
        Self {
            left_eye_width: calculate_eye_width(left_eye.points()),
            right_eye_width: calculate_eye_width(right_eye.points()),
            left_eye,
            right_eye,
            confidence: method.confidence(),
            method,
        }
    }

    /// Reject results a curve can not be fitted through.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError::Degenerate`] when either eye has fewer
    /// than three finite points.
    pub fn validate(&self) -> Result<(), LandmarkError> {
        if self.left_eye.is_fittable() && self.right_eye.is_fittable() {
            Ok(())
        } else {
            Err(LandmarkError::Degenerate {
                method: self.method,
                points: self.left_eye.len().min(self.right_eye.len()),
            })
        }
    }
}

/// Why a single tier produced no landmarks.
///
/// These never leave [`LandmarkAcquirer::acquire`]; they are logged and
/// the next tier is tried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LandmarkError {
    /// The tier's model could not be initialized (cached).
    #[error("{0} landmark provider is unavailable")]
    Unavailable(LandmarkMethod),

    /// The model ran but found no face.
    #[error("no face found")]
    NoFace,

    /// The model returned too few usable points.
    #[error("{method} provider returned a degenerate landmark set ({points} points)")]
    Degenerate {
        /// Tier that returned the points.
        method: LandmarkMethod,
        /// Number of points in the smaller eye.
        points: usize,
    },

    /// The tier did not answer in time.
    #[error("{method} provider timed out after {after:?}")]
    Timeout {
        /// Tier that timed out.
        method: LandmarkMethod,
        /// The deadline that passed.
        after: Duration,
    },

    /// The host backend reported an error.
    #[error("landmark backend error: {0}")]
    Backend(String),
}

/// A source of eyelid landmarks.
pub trait LandmarkProvider: Send + Sync {
    /// Which tier this provider represents.
    fn method(&self) -> LandmarkMethod;

    /// One-time expensive setup (model download, session creation).
    ///
    /// Called at most once per [`AvailabilityCache`]; a failure marks the
    /// tier unavailable for the life of the cache.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when the backing model can not be loaded.
    fn initialize(&self) -> Result<(), LandmarkError> {
        Ok(())
    }

    /// Detect both upper eyelids in `image`.
    ///
    /// # Errors
    ///
    /// Returns [`LandmarkError`] when no usable landmarks were found.
    fn detect(&self, image: &RgbaImage) -> Result<DetectionResult, LandmarkError>;
}

/// Corner-to-corner width of an eye.
///
/// Returns [`DEFAULT_EYE_WIDTH`] when fewer than two points are given or
/// the distance is not finite. Never negative.
#[must_use]
pub fn calculate_eye_width(points: &[Point]) -> f64 {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() >= 2 => {
            let width = first.distance(*last);
            if width.is_finite() {
                width
            } else {
                DEFAULT_EYE_WIDTH
            }
        }
        _ => DEFAULT_EYE_WIDTH,
    }
}

/// Remembers whether each model-backed tier initialized successfully.
///
/// Each slot is a mutex-guarded `Option<bool>`. Initialization runs while
/// the lock is held, so two requests racing on a cold start run the
/// expensive setup once and both observe its outcome.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    primary: Mutex<Option<bool>>,
    secondary: Mutex<Option<bool>>,
}

static GLOBAL_AVAILABILITY: LazyLock<Arc<AvailabilityCache>> =
    LazyLock::new(|| Arc::new(AvailabilityCache::new()));

impl AvailabilityCache {
    /// An empty cache.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            primary: Mutex::new(None),
            secondary: Mutex::new(None),
        }
    }

    /// The process-wide cache shared by default-built acquirers.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_AVAILABILITY)
    }

    const fn slot(&self, method: LandmarkMethod) -> Option<&Mutex<Option<bool>>> {
        match method {
            LandmarkMethod::Primary => Some(&self.primary),
            LandmarkMethod::Secondary => Some(&self.secondary),
            LandmarkMethod::Heuristic => None,
        }
    }

    /// The remembered availability, if the tier has been tried.
    ///
    /// The heuristic tier needs no initialization and is always
    /// available.
    #[must_use]
    pub fn get(&self, method: LandmarkMethod) -> Option<bool> {
        self.slot(method).map_or(Some(true), |slot| {
            *slot.lock().unwrap_or_else(PoisonError::into_inner)
        })
    }

    /// Return the remembered availability, running `init` first if the
    /// tier has never been tried.
    pub fn ensure(&self, method: LandmarkMethod, init: impl FnOnce() -> bool) -> bool {
        let Some(slot) = self.slot(method) else {
            return true;
        };
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(available) = *state {
            return available;
        }
        let available = init();
        *state = Some(available);
        available
    }

    /// Forget every remembered outcome.
    ///
    /// Intended for tests; production code never needs to re-probe.
    pub fn reset(&self) {
        for slot in [&self.primary, &self.secondary] {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }
}

/// Runs the provider tiers in order and returns the first usable result.
pub struct LandmarkAcquirer {
    primary: Option<Arc<dyn LandmarkProvider>>,
    secondary: Option<Arc<dyn LandmarkProvider>>,
    heuristic: HeuristicProvider,
    primary_timeout: Duration,
    secondary_timeout: Duration,
    availability: Arc<AvailabilityCache>,
}

impl std::fmt::Debug for LandmarkAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LandmarkAcquirer")
            .field("primary", &self.primary.is_some())
            .field("secondary", &self.secondary.is_some())
            .field("heuristic", &self.heuristic)
            .field("primary_timeout", &self.primary_timeout)
            .field("secondary_timeout", &self.secondary_timeout)
            .finish_non_exhaustive()
    }
}

impl LandmarkAcquirer {
    /// An acquirer with only the heuristic tier, sharing the process-wide
    /// availability cache.
    #[must_use]
    pub fn new(heuristic: HeuristicConfig) -> Self {
        Self {
            primary: None,
            secondary: None,
            heuristic: HeuristicProvider::new(heuristic),
            primary_timeout: Duration::from_millis(
                crate::PipelineConfig::DEFAULT_PRIMARY_TIMEOUT_MS,
            ),
            secondary_timeout: Duration::from_millis(
                crate::PipelineConfig::DEFAULT_SECONDARY_TIMEOUT_MS,
            ),
            availability: AvailabilityCache::global(),
        }
    }

    /// Install the dense-mesh tier.
    #[must_use]
    pub fn with_primary(mut self, provider: Arc<dyn LandmarkProvider>) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Install the 68-point tier.
    #[must_use]
    pub fn with_secondary(mut self, provider: Arc<dyn LandmarkProvider>) -> Self {
        self.secondary = Some(provider);
        self
    }

    /// Per-tier deadlines for the model-backed providers.
    #[must_use]
    pub fn with_timeouts(mut self, primary: Duration, secondary: Duration) -> Self {
        self.primary_timeout = primary;
        self.secondary_timeout = secondary;
        self
    }

    /// Use a private availability cache instead of the process-wide one.
    #[must_use]
    pub fn with_availability(mut self, availability: Arc<AvailabilityCache>) -> Self {
        self.availability = availability;
        self
    }

    /// The availability cache this acquirer consults.
    #[must_use]
    pub const fn availability(&self) -> &Arc<AvailabilityCache> {
        &self.availability
    }

    /// Acquire landmarks for both eyes, trying each tier in order.
    ///
    /// Model tiers run on a helper thread under their timeouts. The
    /// heuristic tier runs inline with no deadline: it is one grayscale
    /// conversion plus one pass over the band rows, bounded by the image
    /// size and free of external calls.
    ///
    /// Returns `None` only when even the heuristic tier could not place
    /// eyes (e.g. an empty image).
    #[must_use]
    pub fn acquire(&self, image: &RgbaImage) -> Option<DetectionResult> {
        let tiers = [
            (self.primary.as_ref(), self.primary_timeout),
            (self.secondary.as_ref(), self.secondary_timeout),
        ];

        if tiers.iter().any(|(provider, _)| provider.is_some()) {
            let shared = Arc::new(image.clone());
            for (provider, timeout) in tiers {
                let Some(provider) = provider else {
                    continue;
                };
                match self.try_tier(provider, &shared, timeout) {
                    Ok(result) => {
                        tracing::info!(
                            method = %result.method,
                            confidence = result.confidence,
                            "eyelid landmarks acquired"
                        );
                        return Some(result);
                    }
                    Err(error) => {
                        tracing::warn!(
                            method = %provider.method(),
                            %error,
                            "landmark tier failed, falling through"
                        );
                    }
                }
            }
        }

        match self
            .heuristic
            .detect(image)
            .and_then(|result| result.validate().map(|()| result))
        {
            Ok(result) => {
                tracing::info!(
                    method = %result.method,
                    confidence = result.confidence,
                    "eyelid landmarks estimated"
                );
                Some(result)
            }
            Err(error) => {
                tracing::warn!(%error, "heuristic landmark tier failed");
                None
            }
        }
    }

    fn try_tier(
        &self,
        provider: &Arc<dyn LandmarkProvider>,
        image: &Arc<RgbaImage>,
        timeout: Duration,
    ) -> Result<DetectionResult, LandmarkError> {
        let method = provider.method();

        let available = self.availability.ensure(method, || {
            let setup = Arc::clone(provider);
            match run_with_timeout(timeout, move || setup.initialize()) {
                Ok(Ok(())) => {
                    tracing::debug!(%method, "landmark provider initialized");
                    true
                }
                Ok(Err(error)) => {
                    tracing::warn!(%method, %error, "landmark provider failed to initialize");
                    false
                }
                Err(error) => {
                    tracing::warn!(%method, %error, "landmark provider initialization aborted");
                    false
                }
            }
        });
        if !available {
            return Err(LandmarkError::Unavailable(method));
        }

        let worker = Arc::clone(provider);
        let frame = Arc::clone(image);
        let result = run_with_timeout(timeout, move || worker.detect(&frame)).map_err(
            |error| match error {
                TimeoutError::Elapsed(after) => LandmarkError::Timeout { method, after },
                other => LandmarkError::Backend(other.to_string()),
            },
        )??;
        result.validate()?;
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn lid(offset_x: f64) -> EyeLandmarks {
        EyeLandmarks::new(vec![
            Point::new(offset_x, 150.0),
            Point::new(offset_x + 20.0, 140.0),
            Point::new(offset_x + 40.0, 138.0),
            Point::new(offset_x + 60.0, 140.0),
            Point::new(offset_x + 80.0, 150.0),
        ])
    }

    /// Provider returning fixed landmarks, counting `initialize` calls.
    struct FixedProvider {
        method: LandmarkMethod,
        init_ok: bool,
        delay: Duration,
        inits: AtomicUsize,
    }

    impl FixedProvider {
        fn new(method: LandmarkMethod, init_ok: bool) -> Self {
            Self {
                method,
                init_ok,
                delay: Duration::ZERO,
                inits: AtomicUsize::new(0),
            }
        }
    }

    impl LandmarkProvider for FixedProvider {
        fn method(&self) -> LandmarkMethod {
            self.method
        }

        fn initialize(&self) -> Result<(), LandmarkError> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.init_ok {
                Ok(())
            } else {
                Err(LandmarkError::Backend("model missing".to_string()))
            }
        }

        fn detect(&self, _image: &RgbaImage) -> Result<DetectionResult, LandmarkError> {
            std::thread::sleep(self.delay);
            Ok(DetectionResult::from_eyes(
                lid(100.0),
                lid(220.0),
                self.method,
            ))
        }
    }

    fn photo() -> RgbaImage {
        RgbaImage::from_pixel(400, 300, image::Rgba([200, 170, 150, 255]))
    }

    #[test]
    fn eye_width_is_corner_distance() {
        let width = calculate_eye_width(lid(100.0).points());
        assert!((width - 80.0).abs() < 1e-9);
    }

    #[test]
    fn eye_width_falls_back_for_short_sets() {
        assert!((calculate_eye_width(&[]) - DEFAULT_EYE_WIDTH).abs() < f64::EPSILON);
        assert!(
            (calculate_eye_width(&[Point::new(3.0, 4.0)]) - DEFAULT_EYE_WIDTH).abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn eye_width_never_negative_or_nan() {
        let cases = [
            [Point::new(0.0, 0.0), Point::new(0.0, 0.0)],
            [Point::new(-5.0, -5.0), Point::new(-9.0, -2.0)],
            [Point::new(f64::MAX, 0.0), Point::new(-f64::MAX, 0.0)],
        ];
        for case in cases {
            let width = calculate_eye_width(&case);
            assert!(width >= 0.0 && width.is_finite(), "{case:?} -> {width}");
        }
    }

    #[test]
    fn confidences_are_ordered_by_tier() {
        assert!(LandmarkMethod::Primary.confidence() > LandmarkMethod::Secondary.confidence());
        assert!(LandmarkMethod::Secondary.confidence() > LandmarkMethod::Heuristic.confidence());
    }

    #[test]
    fn validate_rejects_short_eye() {
        let short = EyeLandmarks::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]);
        let result = DetectionResult::from_eyes(short, lid(0.0), LandmarkMethod::Secondary);
        assert_eq!(
            result.validate(),
            Err(LandmarkError::Degenerate {
                method: LandmarkMethod::Secondary,
                points: 2
            })
        );
    }

    #[test]
    fn primary_tier_wins_when_available() {
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::new(AvailabilityCache::new()))
            .with_primary(Arc::new(FixedProvider::new(LandmarkMethod::Primary, true)));
        let result = acquirer.acquire(&photo()).unwrap();
        assert_eq!(result.method, LandmarkMethod::Primary);
        assert!((result.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn unavailable_primary_falls_through_to_secondary() {
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::new(AvailabilityCache::new()))
            .with_primary(Arc::new(FixedProvider::new(LandmarkMethod::Primary, false)))
            .with_secondary(Arc::new(FixedProvider::new(LandmarkMethod::Secondary, true)));
        let result = acquirer.acquire(&photo()).unwrap();
        assert_eq!(result.method, LandmarkMethod::Secondary);
    }

    #[test]
    fn timed_out_tier_falls_through_to_heuristic() {
        let mut slow = FixedProvider::new(LandmarkMethod::Primary, true);
        slow.delay = Duration::from_millis(500);
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::new(AvailabilityCache::new()))
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20))
            .with_primary(Arc::new(slow));
        let result = acquirer.acquire(&photo()).unwrap();
        assert_eq!(result.method, LandmarkMethod::Heuristic);
    }

    #[test]
    fn heuristic_answers_after_both_model_tiers_stall() {
        let stall = Duration::from_secs(2);
        let mut primary = FixedProvider::new(LandmarkMethod::Primary, true);
        primary.delay = stall;
        let mut secondary = FixedProvider::new(LandmarkMethod::Secondary, true);
        secondary.delay = stall;
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::new(AvailabilityCache::new()))
            .with_timeouts(Duration::from_millis(20), Duration::from_millis(20))
            .with_primary(Arc::new(primary))
            .with_secondary(Arc::new(secondary));

        let large = RgbaImage::from_pixel(1280, 960, image::Rgba([200, 170, 150, 255]));
        let started = std::time::Instant::now();
        let result = acquirer.acquire(&large).unwrap();

        assert_eq!(result.method, LandmarkMethod::Heuristic);
        assert!(started.elapsed() < stall);
    }

    #[test]
    fn availability_is_probed_once() {
        let provider = Arc::new(FixedProvider::new(LandmarkMethod::Primary, false));
        let cache = Arc::new(AvailabilityCache::new());
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::clone(&cache))
            .with_primary(Arc::clone(&provider) as Arc<dyn LandmarkProvider>);

        for _ in 0..3 {
            let result = acquirer.acquire(&photo()).unwrap();
            assert_eq!(result.method, LandmarkMethod::Heuristic);
        }
        assert_eq!(provider.inits.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(LandmarkMethod::Primary), Some(false));

        cache.reset();
        assert_eq!(cache.get(LandmarkMethod::Primary), None);
        let _ = acquirer.acquire(&photo());
        assert_eq!(provider.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_cold_start_initializes_once() {
        let cache = Arc::new(AvailabilityCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    cache.ensure(LandmarkMethod::Secondary, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(10));
                        true
                    })
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn heuristic_is_always_available() {
        let cache = AvailabilityCache::new();
        assert_eq!(cache.get(LandmarkMethod::Heuristic), Some(true));
        assert!(cache.ensure(LandmarkMethod::Heuristic, || false));
    }

    #[test]
    fn empty_image_yields_none() {
        let acquirer = LandmarkAcquirer::new(HeuristicConfig::default())
            .with_availability(Arc::new(AvailabilityCache::new()));
        assert!(acquirer.acquire(&RgbaImage::new(0, 0)).is_none());
    }
}
