//! Catmull-Rom fitting of sparse eyelid landmarks into a dense curve.
//!
//! The fitted curve passes through every landmark and carries a tangent
//! angle per sample, which the compositor uses to orient overlay strips.
//! Boundary spans reuse the end landmarks as their outer control points
//! (index clamping), so the curve starts and ends exactly on the eye
//! corners.

use serde::{Deserialize, Serialize};

use crate::types::{MIN_LANDMARKS, Point};

/// Default number of samples per landmark span.
pub const DEFAULT_RESOLUTION: usize = 24;

/// Derivatives shorter than this fall back to the chord direction.
const DERIVATIVE_EPSILON: f64 = 1e-12;

/// A sample on a fitted curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Position in image coordinates.
    pub point: Point,
    /// Direction of travel at this sample, in radians.
    pub tangent: f64,
}

impl CurvePoint {
    /// A sample with a flat tangent.
    #[must_use]
    pub const fn flat(point: Point) -> Self {
        Self {
            point,
            tangent: 0.0,
        }
    }
}

/// Fit a Catmull-Rom spline through `control` points.
///
/// Each span between consecutive control points is sampled `resolution`
/// times, and the final control point is appended, so the result holds
/// `resolution * (n - 1) + 1` samples. The tangent at each sample is the
/// direction of the cubic's first derivative, unwrapped so it never jumps
/// by more than π between neighbours.
///
/// Fewer than [`MIN_LANDMARKS`] control points are returned unchanged with
/// a zero tangent. Exactly three points (one short of a full control
/// quadruple) are joined by linear interpolation with a zero tangent.
///
/// A `resolution` of zero is treated as one.
#[must_use = "returns the fitted curve"]
pub fn fit_curve(control: &[Point], resolution: usize) -> Vec<CurvePoint> {
    let n = control.len();
    if n < MIN_LANDMARKS {
        return control.iter().copied().map(CurvePoint::flat).collect();
    }

    let resolution = resolution.max(1);
    if n < 4 {
        return interpolate_linear(control, resolution);
    }

    let mut curve = Vec::with_capacity(resolution * (n - 1) + 1);
    let mut last_span = None;
    for i in 0..n - 1 {
        let span = Span {
            p0: control[i.saturating_sub(1)],
            p1: control[i],
            p2: control[i + 1],
            p3: control[(i + 2).min(n - 1)],
        };
        for step in 0..resolution {
            #[allow(clippy::cast_precision_loss)]
            let t = step as f64 / resolution as f64;
            curve.push(CurvePoint {
                point: span.position(t),
                tangent: span.tangent(t),
            });
        }
        last_span = Some(span);
    }

    if let (Some(span), Some(&end)) = (last_span, control.last()) {
        // Pin the end exactly to the last landmark instead of trusting
        // the cubic to land on it at t = 1.
        curve.push(CurvePoint {
            point: end,
            tangent: span.tangent(1.0),
        });
    }

    unwrap_tangents(&mut curve);
    curve
}

/// Linear interpolation between consecutive points with zero tangents.
fn interpolate_linear(control: &[Point], resolution: usize) -> Vec<CurvePoint> {
    let mut curve = Vec::with_capacity(resolution * (control.len() - 1) + 1);
    for pair in control.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        for step in 0..resolution {
            #[allow(clippy::cast_precision_loss)]
            let t = step as f64 / resolution as f64;
            curve.push(CurvePoint::flat(Point::new(
                (b.x - a.x).mul_add(t, a.x),
                (b.y - a.y).mul_add(t, a.y),
            )));
        }
    }
    if let Some(&end) = control.last() {
        curve.push(CurvePoint::flat(end));
    }
    curve
}

/// Four control points of one Catmull-Rom span (curve runs `p1` to `p2`).
#[derive(Debug, Clone, Copy)]
struct Span {
    p0: Point,
    p1: Point,
    p2: Point,
    p3: Point,
}

impl Span {
    fn position(&self, t: f64) -> Point {
        Point::new(
            catmull_rom(self.p0.x, self.p1.x, self.p2.x, self.p3.x, t),
            catmull_rom(self.p0.y, self.p1.y, self.p2.y, self.p3.y, t),
        )
    }

    fn tangent(&self, t: f64) -> f64 {
        let dx = catmull_rom_derivative(self.p0.x, self.p1.x, self.p2.x, self.p3.x, t);
        let dy = catmull_rom_derivative(self.p0.y, self.p1.y, self.p2.y, self.p3.y, t);
        if dx.abs() < DERIVATIVE_EPSILON && dy.abs() < DERIVATIVE_EPSILON {
            (self.p2.y - self.p1.y).atan2(self.p2.x - self.p1.x)
        } else {
            dy.atan2(dx)
        }
    }
}

/// `0.5 * (2p1 + (-p0 + p2)t + (2p0 - 5p1 + 4p2 - p3)t² + (-p0 + 3p1 - 3p2 + p3)t³)`
fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let a = 2.0 * p1;
    let b = p2 - p0;
    let c = 4.0f64.mul_add(p2, 2.0f64.mul_add(p0, -5.0 * p1)) - p3;
    let d = 3.0f64.mul_add(p1 - p2, p3 - p0);
    0.5 * d.mul_add(t, c).mul_add(t, b).mul_add(t, a)
}

/// First derivative of [`catmull_rom`] with respect to `t`.
fn catmull_rom_derivative(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let b = p2 - p0;
    let c = 4.0f64.mul_add(p2, 2.0f64.mul_add(p0, -5.0 * p1)) - p3;
    let d = 3.0f64.mul_add(p1 - p2, p3 - p0);
    0.5 * (3.0 * d).mul_add(t, 2.0 * c).mul_add(t, b)
}

/// Shift tangents by whole turns so consecutive samples differ by at
/// most π. Right-eye curves run right to left, where a raw `atan2` would
/// flip between +π and -π on every tiny vertical wobble.
fn unwrap_tangents(curve: &mut [CurvePoint]) {
    use std::f64::consts::{PI, TAU};

    for i in 1..curve.len() {
        let prev = curve[i - 1].tangent;
        let mut current = curve[i].tangent;
        while current - prev > PI {
            current -= TAU;
        }
        while current - prev < -PI {
            current += TAU;
        }
        curve[i].tangent = current;
    }
}

/// The sample at `progress` (0.0 to 1.0) along the curve.
///
/// The index is clamped to the last valid sample, so asking for more
/// positions than the curve holds never reads out of bounds.
#[must_use]
pub fn sample_at(curve: &[CurvePoint], progress: f64) -> Option<&CurvePoint> {
    let last = curve.len().checked_sub(1)?;
    let progress = if progress.is_finite() {
        progress.clamp(0.0, 1.0)
    } else {
        0.0
    };
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let index = (progress * last as f64).round() as usize;
    curve.get(index.min(last))
}

/// Midpoint of the curve's horizontal extent.
#[must_use]
pub fn horizontal_midpoint(curve: &[CurvePoint]) -> Option<f64> {
    let (min_x, max_x) = curve.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(lo, hi), c| (lo.min(c.point.x), hi.max(c.point.x)),
    );
    (min_x <= max_x).then(|| f64::midpoint(min_x, max_x))
}

/// The sample whose x coordinate is closest to `x`.
#[must_use]
pub fn nearest_to_x(curve: &[CurvePoint], x: f64) -> Option<&CurvePoint> {
    curve
        .iter()
        .min_by(|a, b| (a.point.x - x).abs().total_cmp(&(b.point.x - x).abs()))
}
