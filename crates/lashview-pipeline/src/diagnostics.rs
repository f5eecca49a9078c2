//! Composite diagnostics: per-stage timing and what was drawn.
//!
//! Every [`Compositor::composite`](crate::Compositor::composite) run that
//! reaches the drawing stage returns a [`CompositeDiagnostics`] inside its
//! result.
//!
//! Timestamps come from an injected [`Clock`]. The default [`WebClock`]
//! uses the `web-time` crate, which maps to `performance.now()` on WASM
//! and `std::time::Instant` on native, so the pipeline stays usable in a
//! browser host.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compositor::{CompositeVariant, EyeReport};
use crate::landmark::LandmarkMethod;
use crate::style::StyleId;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of monotonic timestamps.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Wall-clock duration of each pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    /// Landmark acquisition (zero when landmarks were supplied).
    #[serde(with = "duration_serde")]
    pub acquire: Duration,
    /// Curve fitting for both eyes.
    #[serde(with = "duration_serde")]
    pub fit: Duration,
    /// Overlay loading and drawing, including any fallback attempt.
    #[serde(with = "duration_serde")]
    pub composite: Duration,
    /// JPEG encoding.
    #[serde(with = "duration_serde")]
    pub encode: Duration,
}

/// Diagnostics collected from a single composite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDiagnostics {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Style that was drawn.
    pub style: StyleId,
    /// Landmark tier that produced the geometry.
    pub method: LandmarkMethod,
    /// Confidence of that tier.
    pub confidence: f64,
    /// Variant of the successful attempt.
    pub variant: CompositeVariant,
    /// Whether the segmented attempt failed and the simple one was used.
    pub fallback_used: bool,
    /// What was drawn on the image-left eye.
    pub left: EyeReport,
    /// What was drawn on the image-right eye.
    pub right: EyeReport,
    /// Per-stage durations.
    pub timings: StageTimings,
    /// Total wall-clock duration from entry to encoded output (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl CompositeDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Composite Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{}  |  Style: {} ({})",
            self.image_width,
            self.image_height,
            self.style,
            self.style.label(),
        ));
        lines.push(format!(
            "Landmarks: {} (confidence {:.2})  |  Variant: {}{}",
            self.method,
            self.confidence,
            self.variant,
            if self.fallback_used { " (fallback)" } else { "" },
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!("{:<16} {:>10} {:>10}", "Stage", "Duration", "% Total"));
        lines.push("-".repeat(40));
        let total_ms = duration_ms(self.total_duration);
        for (name, duration) in [
            ("Acquire", self.timings.acquire),
            ("Fit curves", self.timings.fit),
            ("Composite", self.timings.composite),
            ("Encode", self.timings.encode),
        ] {
            let ms = duration_ms(duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            lines.push(format!("{name:<16} {ms:>8.3}ms {pct:>9.1}%"));
        }

        lines.push(String::new());
        for eye in [&self.left, &self.right] {
            lines.push(format_eye(eye));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_eye(eye: &EyeReport) -> String {
    format!(
        "{:<6} {:.1}x{:.1} at ({:.1}, {:.1}) rot={:.1}° segments={}{}",
        eye.side.to_string(),
        eye.target_width,
        eye.target_height,
        eye.anchor.x,
        eye.anchor.y,
        eye.rotation_degrees,
        eye.segments_drawn,
        if eye.advanced_mask_applied {
            " +mask"
        } else {
            ""
        },
    )
}
