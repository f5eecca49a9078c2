//! Integration tests: full composite runs over synthetic photos and overlays.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lashview_pipeline::landmark::{
    LEFT_UPPER_LID_MESH, MESH_POINT_COUNT, MeshBackend, MeshProvider, RIGHT_UPPER_LID_MESH,
};
use lashview_pipeline::{
    AssetStore, AvailabilityCache, CompositeRequest, CompositeStatus, CompositeVariant,
    Compositor, DetectionResult, EyeLandmarks, HeuristicConfig, InMemoryAssetStore,
    LandmarkAcquirer, LandmarkError, LandmarkMethod, PipelineConfig, Point, RgbaImage, StyleId,
    decode_image, get_style_config,
};

const SKIN: image::Rgba<u8> = image::Rgba([214, 182, 160, 255]);

/// A lash-like overlay: dark vertical strokes on a transparent ground,
/// longest in the middle.
fn overlay_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        let reach = height - (x.abs_diff(width / 2) * height / width);
        if x % 3 == 0 && height - y <= reach {
            image::Rgba([25, 15, 10, 240])
        } else {
            image::Rgba([0, 0, 0, 0])
        }
    });
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgba8,
    )
    .unwrap();
    buf
}

fn store_with(styles: &[StyleId]) -> Arc<dyn AssetStore> {
    let mut store = InMemoryAssetStore::new();
    for &style in styles {
        store.insert(style, overlay_png(96, 40));
    }
    Arc::new(store)
}

fn plain_photo() -> RgbaImage {
    RgbaImage::from_pixel(400, 300, SKIN)
}

fn left_lid() -> EyeLandmarks {
    EyeLandmarks::new(vec![
        Point::new(100.0, 150.0),
        Point::new(120.0, 140.0),
        Point::new(140.0, 138.0),
        Point::new(160.0, 140.0),
        Point::new(180.0, 150.0),
    ])
}

/// Private cache so model-tier tests do not see each other's outcomes.
fn heuristic_only() -> LandmarkAcquirer {
    LandmarkAcquirer::new(HeuristicConfig::default())
        .with_availability(Arc::new(AvailabilityCache::new()))
}

/// Mesh backend that places the lid indices on [`left_lid`] and its
/// mirror, and every other mesh point at the image center.
struct SyntheticMesh {
    available: bool,
}

impl MeshBackend for SyntheticMesh {
    fn load(&self) -> Result<(), LandmarkError> {
        if self.available {
            Ok(())
        } else {
            Err(LandmarkError::Backend("weights not bundled".to_string()))
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn face_mesh(&self, image: &RgbaImage) -> Result<Option<Vec<Point>>, LandmarkError> {
        let width = f64::from(image.width());
        let mut mesh = vec![Point::new(width / 2.0, 150.0); MESH_POINT_COUNT];
        let lid = left_lid();
        let lid = lid.points();
        for (slot, &index) in LEFT_UPPER_LID_MESH.iter().enumerate() {
            // Nine mesh points over five control points: interpolate.
            let t = slot as f64 / (LEFT_UPPER_LID_MESH.len() - 1) as f64 * 4.0;
            let i = (t.floor() as usize).min(3);
            let f = t - i as f64;
            let (a, b) = (lid[i], lid[i + 1]);
            let p = Point::new(a.x + (b.x - a.x) * f, a.y + (b.y - a.y) * f);
            mesh[index] = p;
            mesh[RIGHT_UPPER_LID_MESH[slot]] = Point::new(width - p.x, p.y);
        }
        Ok(Some(mesh))
    }
}

#[test]
fn featureless_photo_uses_heuristic_and_succeeds() {
    let compositor = Compositor::new(
        store_with(&[StyleId::BrasileiroBoneca]),
        PipelineConfig::default(),
    )
    .with_acquirer(heuristic_only());

    let result = compositor.composite(&CompositeRequest::new(plain_photo(), "brasileiro-boneca"));

    assert_eq!(result.status, CompositeStatus::Success, "{:?}", result.error);
    assert_eq!(result.method, Some(LandmarkMethod::Heuristic));
    assert!((result.confidence.unwrap() - 0.6).abs() < 1e-9);
    assert_eq!(result.variant, Some(CompositeVariant::Segmented));
    assert_eq!(result.quality_score, Some(70));

    let jpeg = result.output_image.unwrap();
    let decoded = decode_image(&jpeg).unwrap();
    assert_eq!(decoded.dimensions(), (400, 300));

    // Multiply can only darken a uniform skin tone, and the lashes sit in
    // the upper half of the frame.
    let darkened = decoded
        .enumerate_pixels()
        .filter(|(_, _, p)| u16::from(p.0[0]) + 20 < u16::from(SKIN.0[0]))
        .map(|(_, y, _)| y)
        .collect::<Vec<_>>();
    assert!(!darkened.is_empty(), "no lash pixels were drawn");
    assert!(darkened.iter().all(|&y| y < 180));
}

#[test]
fn cat_eye_style_runs_advanced_mask() {
    let compositor = Compositor::new(
        store_with(&[StyleId::RussoGatinho]),
        PipelineConfig::default(),
    )
    .with_acquirer(heuristic_only());
    let left = left_lid();
    let right = left.mirrored(400.0);
    let landmarks = DetectionResult::from_eyes(left, right, LandmarkMethod::Primary);

    let result = compositor.composite_landmarks(
        &CompositeRequest::new(plain_photo(), "russo-gatinho"),
        landmarks,
    );

    assert!(result.is_success(), "{:?}", result.error);
    let diagnostics = result.diagnostics.unwrap();
    assert_eq!(diagnostics.style, StyleId::RussoGatinho);
    assert!(!diagnostics.fallback_used);
    for eye in [&diagnostics.left, &diagnostics.right] {
        assert_eq!(eye.variant, CompositeVariant::Segmented);
        assert!(eye.advanced_mask_applied);
        assert_eq!(eye.segments_drawn, 16);
    }
    assert!((diagnostics.left.rotation_degrees - diagnostics.right.rotation_degrees).abs() < 1e-9);
    assert!((diagnostics.left.anchor.x + diagnostics.right.anchor.x - 400.0).abs() < 1e-6);
}

#[test]
fn unknown_style_resolves_to_default_entry() {
    assert!(std::ptr::eq(
        get_style_config("nonexistent-style"),
        get_style_config("brasileiro-boneca"),
    ));

    let compositor = Compositor::new(
        store_with(&[StyleId::BrasileiroBoneca]),
        PipelineConfig::default(),
    )
    .with_acquirer(heuristic_only());
    let result = compositor.composite(&CompositeRequest::new(plain_photo(), "nonexistent-style"));
    assert!(result.is_success());
    assert_eq!(
        result.diagnostics.unwrap().style,
        StyleId::BrasileiroBoneca
    );
}

#[test]
fn unreachable_overlay_fails_after_simple_retry() {
    let compositor = Compositor::new(Arc::new(InMemoryAssetStore::new()), PipelineConfig::default())
        .with_acquirer(heuristic_only());

    let result = compositor.composite(&CompositeRequest::new(plain_photo(), "fox-eye"));

    assert_eq!(result.status, CompositeStatus::Failure);
    assert!(result.output_image.is_none());
    assert!(result.diagnostics.is_none());
    assert!(result.quality_score.is_none());
    let error = result.error.unwrap();
    assert!(error.contains("memory://fox-eye"), "{error}");
    // Landmarks were acquired before drawing failed.
    assert_eq!(result.method, Some(LandmarkMethod::Heuristic));
}

/// Store whose first fetch fails, as a dropped connection would.
struct FlakyStore {
    inner: InMemoryAssetStore,
    fetches: AtomicUsize,
}

impl AssetStore for FlakyStore {
    fn locate(&self, style: StyleId) -> String {
        self.inner.locate(style)
    }

    fn fetch(&self, location: &str) -> Result<Vec<u8>, String> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err("connection reset".to_string());
        }
        self.inner.fetch(location)
    }
}

#[test]
fn failed_segmented_attempt_recovers_with_simple_variant() {
    let mut inner = InMemoryAssetStore::new();
    inner.insert(StyleId::BrasileiroBoneca, overlay_png(96, 40));
    let store = Arc::new(FlakyStore {
        inner,
        fetches: AtomicUsize::new(0),
    });
    let compositor = Compositor::new(
        Arc::clone(&store) as Arc<dyn AssetStore>,
        PipelineConfig::default(),
    )
    .with_acquirer(heuristic_only());

    let result = compositor.composite(&CompositeRequest::new(plain_photo(), "brasileiro-boneca"));

    assert_eq!(result.status, CompositeStatus::Success, "{:?}", result.error);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(result.variant, Some(CompositeVariant::Simple));
    assert_eq!(result.method, Some(LandmarkMethod::Heuristic));
    assert_eq!(
        result.quality_score,
        Some(lashview_pipeline::quality_score(
            LandmarkMethod::Heuristic,
            CompositeVariant::Simple
        ))
    );
    assert!(result.quality_score < Some(70));
    assert!(result.output_image.is_some());

    let diagnostics = result.diagnostics.unwrap();
    assert!(diagnostics.fallback_used);
    for eye in [&diagnostics.left, &diagnostics.right] {
        assert_eq!(eye.variant, CompositeVariant::Simple);
        assert_eq!(eye.segments_drawn, 1);
    }
}

#[test]
fn mesh_tier_outranks_heuristic() {
    let photo = plain_photo();
    let store = store_with(&[StyleId::ClassicoNatural]);
    let request = CompositeRequest::new(photo, "classico-natural");

    let with_mesh = Compositor::new(Arc::clone(&store), PipelineConfig::default()).with_acquirer(
        heuristic_only().with_primary(Arc::new(MeshProvider::new(Arc::new(SyntheticMesh {
            available: true,
        })))),
    );
    let without = Compositor::new(store, PipelineConfig::default()).with_acquirer(
        heuristic_only().with_primary(Arc::new(MeshProvider::new(Arc::new(SyntheticMesh {
            available: false,
        })))),
    );

    let good = with_mesh.composite(&request);
    let degraded = without.composite(&request);

    assert!(good.is_success() && degraded.is_success());
    assert_eq!(good.method, Some(LandmarkMethod::Primary));
    assert_eq!(degraded.method, Some(LandmarkMethod::Heuristic));
    assert!(good.confidence.unwrap() > degraded.confidence.unwrap());
    assert!(good.quality_score.unwrap() > degraded.quality_score.unwrap());

    // The mesh lids span 100..180; the eye width reported reflects that.
    let left = good.diagnostics.unwrap().left;
    let style = StyleId::ClassicoNatural.config();
    assert!((left.target_width - 80.0 * style.elongation_factor).abs() < 1e-6);
}

#[test]
fn preview_decodes_and_composites_bytes() {
    let mut png = Vec::new();
    plain_photo()
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();
    let result = lashview_pipeline::preview(
        &png,
        "mega-volume",
        store_with(&[StyleId::MegaVolume]),
        &PipelineConfig::default(),
    )
    .unwrap();
    assert!(result.is_success(), "{:?}", result.error);
    assert!(result.processing_time_ms < 60_000);

    assert!(matches!(
        lashview_pipeline::preview(&[], "mega-volume", store_with(&[]), &PipelineConfig::default()),
        Err(lashview_pipeline::PipelineError::EmptyInput)
    ));
}
