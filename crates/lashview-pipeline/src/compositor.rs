//! Draws a lash overlay onto a photo, bent along one eye's fitted curve.
//!
//! All drawing goes through a premultiplied [`tiny_skia::Pixmap`]. Each
//! draw is one `draw_pixmap` call with its own [`PixmapPaint`], so blend
//! mode and opacity never carry over from one draw to the next: a soft
//! black shadow first, then the overlay itself with
//! [`BlendMode::Multiply`] so skin tone and shading show through.
//!
//! Every transform of a pass is computed and validated before the first
//! pixel is touched. A degenerate pass fails without drawing anything.

use std::f64::consts::{PI, TAU};

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use tiny_skia::{
    BlendMode, ColorU8, FillRule, FilterQuality, IntRect, Mask, PathBuilder, Pixmap, PixmapPaint,
    PixmapRef, Transform,
};

use crate::curve::{self, CurvePoint};
use crate::landmark::calculate_eye_width;
use crate::overlay::OverlayLoadError;
use crate::style::StyleConfig;
use crate::types::{EyeLandmarks, EyeSide, PipelineConfig, Point, RgbaImage};

/// Largest tilt applied to an overlay, in degrees either way.
pub const MAX_ROTATION_DEGREES: f64 = 25.0;

/// Eyes tilted less than this are treated as level.
pub const LEVEL_THRESHOLD_DEGREES: f64 = 5.0;

/// Upward lash angle added to level eyes, in degrees.
pub const LEVEL_BIAS_DEGREES: f64 = 3.0;

/// Overlay height never drops below this fraction of the eye width.
pub const MIN_HEIGHT_RATIO: f64 = 0.3;

/// How the overlay is laid along the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeVariant {
    /// Vertical strips, each placed and rotated on its own curve sample.
    Segmented,
    /// One draw using only the global rotation and scale.
    Simple,
}

impl std::fmt::Display for CompositeVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segmented => f.write_str("segmented"),
            Self::Simple => f.write_str("simple"),
        }
    }
}

/// Errors raised while drawing an eye.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositeError {
    /// The style's overlay asset could not be loaded.
    #[error(transparent)]
    OverlayLoad(#[from] OverlayLoadError),

    /// A size, anchor or transform came out zero, negative or non-finite.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// A pixmap or mask could not be created.
    #[error("canvas error: {0}")]
    Canvas(String),

    /// The caller cancelled the request.
    #[error("composite cancelled")]
    Cancelled,
}

/// Premultiplied drawing surface holding the photo being composited.
pub struct Canvas {
    pixmap: Pixmap,
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.pixmap.width())
            .field("height", &self.pixmap.height())
            .finish()
    }
}

impl Canvas {
    /// Copy a straight-alpha photo onto a new canvas.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::Canvas`] when the image is empty or too
    /// large to allocate.
    pub fn from_rgba(image: &RgbaImage) -> Result<Self, CompositeError> {
        premultiplied(image).map(|pixmap| Self { pixmap })
    }

    /// Canvas width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    /// Canvas height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Convert back to a straight-alpha image.
    #[must_use]
    pub fn into_rgba(self) -> RgbaImage {
        let mut image = RgbaImage::new(self.pixmap.width(), self.pixmap.height());
        for (dst, src) in image.pixels_mut().zip(self.pixmap.pixels()) {
            let color = src.demultiply();
            *dst = image::Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
        }
        image
    }
}

/// A decoded overlay ready to draw, with its pre-blurred shadow.
pub struct Overlay {
    image: Pixmap,
    shadow: Pixmap,
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish_non_exhaustive()
    }
}

impl Overlay {
    /// Prepare an overlay: premultiply it and build its shadow from the
    /// Gaussian-blurred alpha channel.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::Canvas`] for an empty overlay.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(image: &RgbaImage, config: &PipelineConfig) -> Result<Self, CompositeError> {
        let pixels = premultiplied(image)?;

        let alpha = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([image.get_pixel(x, y).0[3]])
        });
        let blurred = if config.shadow_blur.is_finite() && config.shadow_blur > 0.0 {
            imageproc::filter::gaussian_blur_f32(&alpha, config.shadow_blur)
        } else {
            alpha
        };
        let strength = if config.shadow_alpha.is_finite() {
            config.shadow_alpha.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut shadow = empty_pixmap(image.width(), image.height())?;
        for (dst, src) in shadow.pixels_mut().iter_mut().zip(blurred.pixels()) {
            let a = (f32::from(src.0[0]) * strength).round().clamp(0.0, 255.0) as u8;
            *dst = ColorU8::from_rgba(0, 0, 0, a).premultiply();
        }

        Ok(Self {
            image: pixels,
            shadow,
        })
    }

    /// Overlay width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Overlay height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

fn empty_pixmap(width: u32, height: u32) -> Result<Pixmap, CompositeError> {
    Pixmap::new(width, height)
        .ok_or_else(|| CompositeError::Canvas(format!("can not allocate a {width}x{height} pixmap")))
}

fn premultiplied(image: &RgbaImage) -> Result<Pixmap, CompositeError> {
    let mut pixmap = empty_pixmap(image.width(), image.height())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Ok(pixmap)
}

/// Placement of one eye's overlay, derived from its landmarks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeGeometry {
    /// Which eye; the right eye is drawn mirrored.
    pub side: EyeSide,
    /// Corner-to-corner eye width.
    pub eye_width: f64,
    /// Drawn overlay width.
    pub target_width: f64,
    /// Drawn overlay height.
    pub target_height: f64,
    /// Where the overlay center lands on the canvas.
    pub anchor: Point,
    /// Global rotation in radians after clamping and level bias.
    pub rotation: f64,
    /// Unclamped corner-to-corner angle, mirror-normalised.
    pub corner_angle: f64,
}

impl EyeGeometry {
    /// Derive size, anchor and rotation for one eye.
    ///
    /// Angles are measured as if every eye were a left eye: the right
    /// eye's horizontal direction is negated, so a mirrored landmark set
    /// yields the same rotation and the negative X scale does the rest.
    ///
    /// # Errors
    ///
    /// Returns [`CompositeError::DegenerateGeometry`] when the landmark
    /// set or curve is empty, or any derived value is zero, negative or
    /// non-finite.
    pub fn compute(
        landmarks: &EyeLandmarks,
        curve: &[CurvePoint],
        style: &StyleConfig,
        side: EyeSide,
    ) -> Result<Self, CompositeError> {
        let (Some(first), Some(last)) = (landmarks.first(), landmarks.last()) else {
            return Err(CompositeError::DegenerateGeometry(format!(
                "{side} eye has no landmarks"
            )));
        };

        let eye_width = calculate_eye_width(landmarks.points());
        let target_width = eye_width * style.elongation_factor;
        let target_height =
            (target_width * style.max_projection_ratio).max(eye_width * MIN_HEIGHT_RATIO);
        if !(is_positive(target_width) && is_positive(target_height)) {
            return Err(CompositeError::DegenerateGeometry(format!(
                "{side} eye overlay size {target_width}x{target_height}"
            )));
        }

        let apex = curve::horizontal_midpoint(curve)
            .and_then(|mid| curve::nearest_to_x(curve, mid))
            .ok_or_else(|| {
                CompositeError::DegenerateGeometry(format!("{side} eye curve is empty"))
            })?;
        let anchor = Point::new(
            apex.point.x,
            style
                .anatomical_offset_ratio
                .mul_add(-target_height, apex.point.y),
        );
        if !anchor.is_finite() {
            return Err(CompositeError::DegenerateGeometry(format!(
                "{side} eye anchor is not finite"
            )));
        }

        let corner_angle = side_angle(side, last.y - first.y, last.x - first.x);
        let rotation = global_rotation(corner_angle);
        if !rotation.is_finite() {
            return Err(CompositeError::DegenerateGeometry(format!(
                "{side} eye rotation is not finite"
            )));
        }

        Ok(Self {
            side,
            eye_width,
            target_width,
            target_height,
            anchor,
            rotation,
            corner_angle,
        })
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Direction of `(dx, dy)` as seen on a left eye.
fn side_angle(side: EyeSide, dy: f64, dx: f64) -> f64 {
    dy.atan2(dx * side.mirror_sign())
}

/// Clamp to the maximum tilt and bias level eyes upward.
fn global_rotation(corner_angle: f64) -> f64 {
    let limit = MAX_ROTATION_DEGREES.to_radians();
    let clamped = corner_angle.clamp(-limit, limit);
    if clamped.abs() <= LEVEL_THRESHOLD_DEGREES.to_radians() {
        clamped + LEVEL_BIAS_DEGREES.to_radians()
    } else {
        clamped
    }
}

/// Wrap an angle into `[-π, π)`.
fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// What one [`composite_eye`] call drew.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeReport {
    /// Which eye.
    pub side: EyeSide,
    /// Variant used.
    pub variant: CompositeVariant,
    /// Overlay draws made along the curve (strips, or 1 for simple).
    pub segments_drawn: u32,
    /// Whether the clipped volume pass ran.
    pub advanced_mask_applied: bool,
    /// Drawn overlay width.
    pub target_width: f64,
    /// Drawn overlay height.
    pub target_height: f64,
    /// Global rotation in degrees.
    pub rotation_degrees: f64,
    /// Overlay center on the canvas.
    pub anchor: Point,
}

/// Draw one eye's overlay onto `canvas`.
///
/// # Errors
///
/// Returns [`CompositeError::DegenerateGeometry`] when a transform is
/// not finite or not invertible, and [`CompositeError::Canvas`] when the
/// clip mask can not be built. Nothing is drawn in either case.
pub fn composite_eye(
    canvas: &mut Canvas,
    overlay: &Overlay,
    curve: &[CurvePoint],
    geometry: &EyeGeometry,
    style: &StyleConfig,
    variant: CompositeVariant,
    config: &PipelineConfig,
) -> Result<EyeReport, CompositeError> {
    let whole = whole_overlay_transform(overlay, geometry)?;

    let (strips, volume) = match variant {
        CompositeVariant::Segmented => {
            let strips = segment_plan(overlay, curve, geometry, style)?;
            let volume = if style.wants_advanced_mask() {
                Some(volume_mask(curve, geometry, config, canvas.width(), canvas.height())?)
            } else {
                None
            };
            (strips, volume)
        }
        CompositeVariant::Simple => (Vec::new(), None),
    };

    let layer = Layer {
        opacity: style.blend_opacity,
        shadow_offset: if config.shadow_offset_y.is_finite() {
            config.shadow_offset_y
        } else {
            0.0
        },
    };

    let segments_drawn = if strips.is_empty() {
        layer.draw(
            &mut canvas.pixmap,
            overlay.image.as_ref(),
            overlay.shadow.as_ref(),
            whole,
            None,
        );
        1
    } else {
        for strip in &strips {
            let (Some(image), Some(shadow)) = (
                overlay.image.clone_rect(strip.rect),
                overlay.shadow.clone_rect(strip.rect),
            ) else {
                return Err(CompositeError::Canvas(format!(
                    "strip {:?} lies outside the overlay",
                    strip.rect
                )));
            };
            layer.draw(
                &mut canvas.pixmap,
                image.as_ref(),
                shadow.as_ref(),
                strip.transform,
                None,
            );
        }
        u32::try_from(strips.len()).unwrap_or(u32::MAX)
    };

    let advanced_mask_applied = volume.is_some();
    if let Some(mask) = &volume {
        layer.draw(
            &mut canvas.pixmap,
            overlay.image.as_ref(),
            overlay.shadow.as_ref(),
            whole,
            Some(mask),
        );
    }

    tracing::debug!(
        side = %geometry.side,
        %variant,
        segments_drawn,
        advanced_mask_applied,
        width = geometry.target_width,
        height = geometry.target_height,
        "eye composited"
    );

    Ok(EyeReport {
        side: geometry.side,
        variant,
        segments_drawn,
        advanced_mask_applied,
        target_width: geometry.target_width,
        target_height: geometry.target_height,
        rotation_degrees: geometry.rotation.to_degrees(),
        anchor: geometry.anchor,
    })
}

/// Paint settings shared by every draw of one eye.
struct Layer {
    opacity: f32,
    shadow_offset: f32,
}

impl Layer {
    fn draw(
        &self,
        canvas: &mut Pixmap,
        image: PixmapRef<'_>,
        shadow: PixmapRef<'_>,
        transform: Transform,
        mask: Option<&Mask>,
    ) {
        let shadow_paint = PixmapPaint {
            opacity: 1.0,
            blend_mode: BlendMode::SourceOver,
            quality: FilterQuality::Bilinear,
        };
        canvas.draw_pixmap(
            0,
            0,
            shadow,
            &shadow_paint,
            transform.post_translate(0.0, self.shadow_offset),
            mask,
        );

        let paint = PixmapPaint {
            opacity: self.opacity.clamp(0.0, 1.0),
            blend_mode: BlendMode::Multiply,
            quality: FilterQuality::Bilinear,
        };
        canvas.draw_pixmap(0, 0, image, &paint, transform, mask);
    }
}

/// One strip of the segmented variant.
struct Strip {
    rect: IntRect,
    transform: Transform,
}

fn whole_overlay_transform(
    overlay: &Overlay,
    geometry: &EyeGeometry,
) -> Result<Transform, CompositeError> {
    let width = f64::from(overlay.width());
    let height = f64::from(overlay.height());
    Affine::placement(
        Point::new(width / 2.0, height / 2.0),
        geometry.anchor,
        geometry.side,
        geometry.rotation,
        geometry.target_width / width,
        geometry.target_height / height,
    )
    .to_transform()
}

/// Cut the overlay into equal-width strips and place each on its curve
/// sample.
fn segment_plan(
    overlay: &Overlay,
    curve: &[CurvePoint],
    geometry: &EyeGeometry,
    style: &StyleConfig,
) -> Result<Vec<Strip>, CompositeError> {
    let overlay_width = overlay.width();
    let overlay_height = overlay.height();
    let segments = style.segment_count.clamp(1, overlay_width.max(1));
    let scale_x = geometry.target_width / f64::from(overlay_width);
    let scale_y = geometry.target_height / f64::from(overlay_height);
    let lift = style.anatomical_offset_ratio * geometry.target_height;
    // Linearly interpolated lids carry no tangents; their strips follow
    // the global rotation alone.
    let oriented = curve.iter().any(|c| c.tangent.abs() > 0.0);

    let mut strips = Vec::with_capacity(segments as usize);
    for i in 0..segments {
        let x0 = strip_edge(i, segments, overlay_width);
        let x1 = strip_edge(i + 1, segments, overlay_width);
        let strip_width = x1 - x0;

        let progress = if segments == 1 {
            0.5
        } else {
            f64::from(i) / f64::from(segments - 1)
        };
        let sample = curve::sample_at(curve, progress).ok_or_else(|| {
            CompositeError::DegenerateGeometry(format!("{} eye curve is empty", geometry.side))
        })?;

        let deviation = if oriented {
            let local = side_angle(geometry.side, sample.tangent.sin(), sample.tangent.cos());
            wrap_angle(local - geometry.corner_angle)
        } else {
            0.0
        };
        let angle = deviation.mul_add(style.tangent_smoothing, geometry.rotation);
        let warp = (2.0 * style.warp_strength).mul_add((progress * PI).sin(), 0.8);

        let transform = Affine::placement(
            Point::new(f64::from(strip_width) / 2.0, f64::from(overlay_height) / 2.0),
            Point::new(sample.point.x, sample.point.y - lift),
            geometry.side,
            angle,
            scale_x,
            scale_y * warp,
        )
        .to_transform()?;

        let left = i32::try_from(x0)
            .map_err(|_| CompositeError::Canvas(format!("overlay too wide: {overlay_width}")))?;
        let rect = IntRect::from_xywh(left, 0, strip_width, overlay_height).ok_or_else(|| {
            CompositeError::Canvas(format!("empty strip {i} of {segments}"))
        })?;
        strips.push(Strip { rect, transform });
    }
    Ok(strips)
}

/// Left edge of strip `i` when `width` pixels are cut into `segments`.
#[allow(clippy::cast_possible_truncation)]
fn strip_edge(i: u32, segments: u32, width: u32) -> u32 {
    (u64::from(i) * u64::from(width) / u64::from(segments)) as u32
}

/// Clip region for the volume pass: from the lash-tip envelope (the lid
/// curve raised by the overlay height) down to `mask_depth` below the
/// lid.
#[allow(clippy::cast_possible_truncation)]
fn volume_mask(
    curve: &[CurvePoint],
    geometry: &EyeGeometry,
    config: &PipelineConfig,
    width: u32,
    height: u32,
) -> Result<Mask, CompositeError> {
    let lift = geometry.target_height;
    let upper: Vec<Point> = curve
        .iter()
        .map(|c| Point::new(c.point.x, c.point.y - lift))
        .collect();

    let mut pb = PathBuilder::new();
    if let Some((first, rest)) = upper.split_first() {
        pb.move_to(first.x as f32, first.y as f32);
        // Samples act as control points; midpoints between them are on
        // the path, which keeps the stitched quads tangent-continuous.
        for pair in rest.windows(2) {
            let (control, next) = (pair[0], pair[1]);
            pb.quad_to(
                control.x as f32,
                control.y as f32,
                f64::midpoint(control.x, next.x) as f32,
                f64::midpoint(control.y, next.y) as f32,
            );
        }
        if let Some(last) = rest.last() {
            pb.line_to(last.x as f32, last.y as f32);
        }
    }
    for c in curve.iter().rev() {
        pb.line_to(c.point.x as f32, (c.point.y + config.mask_depth) as f32);
    }
    pb.close();

    let path = pb.finish().ok_or_else(|| {
        CompositeError::DegenerateGeometry(format!(
            "{} eye clip path is empty",
            geometry.side
        ))
    })?;
    let mut mask = Mask::new(width, height)
        .ok_or_else(|| CompositeError::Canvas(format!("can not allocate a {width}x{height} mask")))?;
    mask.fill_path(&path, FillRule::Winding, true, Transform::identity());
    Ok(mask)
}

/// Row-major 2D affine map: `x' = sx·x + kx·y + tx`, `y' = ky·x + sy·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Affine {
    sx: f64,
    ky: f64,
    kx: f64,
    sy: f64,
    tx: f64,
    ty: f64,
}

impl Affine {
    const fn translate(tx: f64, ty: f64) -> Self {
        Self {
            sx: 1.0,
            ky: 0.0,
            kx: 0.0,
            sy: 1.0,
            tx,
            ty,
        }
    }

    const fn scale(sx: f64, sy: f64) -> Self {
        Self {
            sx,
            ky: 0.0,
            kx: 0.0,
            sy,
            tx: 0.0,
            ty: 0.0,
        }
    }

    fn rotate(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            sx: cos,
            ky: sin,
            kx: -sin,
            sy: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Apply `self` first, then `outer`.
    fn then(self, outer: Self) -> Self {
        Self {
            sx: outer.sx.mul_add(self.sx, outer.kx * self.ky),
            ky: outer.ky.mul_add(self.sx, outer.sy * self.ky),
            kx: outer.sx.mul_add(self.kx, outer.kx * self.sy),
            sy: outer.ky.mul_add(self.kx, outer.sy * self.sy),
            tx: outer.sx.mul_add(self.tx, outer.kx.mul_add(self.ty, outer.tx)),
            ty: outer.ky.mul_add(self.tx, outer.sy.mul_add(self.ty, outer.ty)),
        }
    }

    /// Map `center` of a source image to `target`: scale, rotate, mirror
    /// for the right eye, then translate.
    fn placement(
        center: Point,
        target: Point,
        side: EyeSide,
        angle: f64,
        scale_x: f64,
        scale_y: f64,
    ) -> Self {
        Self::translate(-center.x, -center.y)
            .then(Self::scale(scale_x, scale_y))
            .then(Self::rotate(angle))
            .then(Self::scale(side.mirror_sign(), 1.0))
            .then(Self::translate(target.x, target.y))
    }

    #[cfg(test)]
    fn apply(self, p: Point) -> Point {
        Point::new(
            self.sx.mul_add(p.x, self.kx.mul_add(p.y, self.tx)),
            self.ky.mul_add(p.x, self.sy.mul_add(p.y, self.ty)),
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn to_transform(self) -> Result<Transform, CompositeError> {
        let values = [self.sx, self.ky, self.kx, self.sy, self.tx, self.ty];
        let determinant = self.sx.mul_add(self.sy, -(self.kx * self.ky));
        if values.iter().any(|v| !v.is_finite()) || determinant.abs() < f64::EPSILON {
            return Err(CompositeError::DegenerateGeometry(format!(
                "overlay transform {values:?} is not invertible"
            )));
        }
        Ok(Transform::from_row(
            self.sx as f32,
            self.ky as f32,
            self.kx as f32,
            self.sy as f32,
            self.tx as f32,
            self.ty as f32,
        ))
    }
}
