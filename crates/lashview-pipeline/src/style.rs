//! Per-style deformation and blend tuning.
//!
//! Every eyelash style in the catalog maps to one immutable
//! [`StyleConfig`]. The table is a closed enum with an exhaustive match,
//! so adding a style without tuning values is a compile error.
//!
//! Unknown style ids are not an error: [`StyleId::parse`] resolves them to
//! [`StyleId::BrasileiroBoneca`], the default entry.

use serde::{Deserialize, Serialize};

/// Deformation and blend parameters for one style.
///
/// Natural and classic styles run at higher opacity with gentle
/// curvature. Volume and cat-eye styles use more segments, stronger warp
/// and the advanced mask pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StyleConfig {
    /// Overlay height as a fraction of its width (lash length).
    pub max_projection_ratio: f64,
    /// Upward lift of the overlay anchor as a fraction of overlay height.
    pub anatomical_offset_ratio: f64,
    /// Opacity of the multiply-blended overlay (0.0 to 1.0).
    pub blend_opacity: f32,
    /// How strongly the style curls; gates the advanced mask pass.
    pub curvature_intensity: f64,
    /// Number of vertical strips the overlay is cut into.
    pub segment_count: u32,
    /// Amplitude of the sinusoidal centre bulge.
    pub warp_strength: f64,
    /// Fraction of the local tangent deviation applied to each strip.
    pub tangent_smoothing: f64,
    /// Overlay width as a multiple of eye width.
    pub elongation_factor: f64,
    /// Whether the clipped single-image volume pass may run.
    pub use_advanced_mask: bool,
}

impl StyleConfig {
    /// Curvature above which the advanced mask pass runs.
    pub const ADVANCED_MASK_CURVATURE: f64 = 0.35;

    /// Whether this style gets the clipped volume pass.
    #[must_use]
    pub fn wants_advanced_mask(&self) -> bool {
        self.use_advanced_mask && self.curvature_intensity > Self::ADVANCED_MASK_CURVATURE
    }
}

/// Identifier of a style in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StyleId {
    /// Classic one-to-one extensions, natural length.
    ClassicoNatural,
    /// Classic extensions, longest at the centre.
    ClassicoBoneca,
    /// Brazilian volume, natural mapping.
    BrasileiroNatural,
    /// Brazilian volume, doll-eye mapping. The default style.
    #[default]
    BrasileiroBoneca,
    /// Brazilian volume, cat-eye mapping.
    BrasileiroGatinho,
    /// Hybrid classic/volume, natural mapping.
    HibridoNatural,
    /// Hybrid, squirrel mapping (peak two-thirds out).
    HibridoEsquilo,
    /// Russian volume, doll-eye mapping.
    RussoBoneca,
    /// Russian volume, cat-eye mapping.
    RussoGatinho,
    /// Dense mega-volume fans.
    MegaVolume,
    /// Lifted outer corner, elongated.
    FoxEye,
}

static CLASSICO_NATURAL: StyleConfig = StyleConfig {
    max_projection_ratio: 0.45,
    anatomical_offset_ratio: 0.18,
    blend_opacity: 0.90,
    curvature_intensity: 0.15,
    segment_count: 6,
    warp_strength: 0.04,
    tangent_smoothing: 0.5,
    elongation_factor: 1.0,
    use_advanced_mask: false,
};

static CLASSICO_BONECA: StyleConfig = StyleConfig {
    max_projection_ratio: 0.50,
    anatomical_offset_ratio: 0.20,
    blend_opacity: 0.88,
    curvature_intensity: 0.20,
    segment_count: 8,
    warp_strength: 0.06,
    tangent_smoothing: 0.55,
    elongation_factor: 1.02,
    use_advanced_mask: false,
};

static BRASILEIRO_NATURAL: StyleConfig = StyleConfig {
    max_projection_ratio: 0.52,
    anatomical_offset_ratio: 0.20,
    blend_opacity: 0.85,
    curvature_intensity: 0.22,
    segment_count: 8,
    warp_strength: 0.07,
    tangent_smoothing: 0.6,
    elongation_factor: 1.05,
    use_advanced_mask: false,
};

static BRASILEIRO_BONECA: StyleConfig = StyleConfig {
    max_projection_ratio: 0.55,
    anatomical_offset_ratio: 0.20,
    blend_opacity: 0.85,
    curvature_intensity: 0.28,
    segment_count: 10,
    warp_strength: 0.08,
    tangent_smoothing: 0.6,
    elongation_factor: 1.05,
    use_advanced_mask: false,
};

static BRASILEIRO_GATINHO: StyleConfig = StyleConfig {
    max_projection_ratio: 0.55,
    anatomical_offset_ratio: 0.20,
    blend_opacity: 0.82,
    curvature_intensity: 0.38,
    segment_count: 12,
    warp_strength: 0.10,
    tangent_smoothing: 0.65,
    elongation_factor: 1.15,
    use_advanced_mask: true,
};

static HIBRIDO_NATURAL: StyleConfig = StyleConfig {
    max_projection_ratio: 0.58,
    anatomical_offset_ratio: 0.20,
    blend_opacity: 0.80,
    curvature_intensity: 0.25,
    segment_count: 10,
    warp_strength: 0.09,
    tangent_smoothing: 0.6,
    elongation_factor: 1.08,
    use_advanced_mask: false,
};

static HIBRIDO_ESQUILO: StyleConfig = StyleConfig {
    max_projection_ratio: 0.60,
    anatomical_offset_ratio: 0.22,
    blend_opacity: 0.78,
    curvature_intensity: 0.36,
    segment_count: 12,
    warp_strength: 0.11,
    tangent_smoothing: 0.65,
    elongation_factor: 1.12,
    use_advanced_mask: true,
};

static RUSSO_BONECA: StyleConfig = StyleConfig {
    max_projection_ratio: 0.65,
    anatomical_offset_ratio: 0.22,
    blend_opacity: 0.75,
    curvature_intensity: 0.32,
    segment_count: 14,
    warp_strength: 0.12,
    tangent_smoothing: 0.7,
    elongation_factor: 1.10,
    use_advanced_mask: true,
};

static RUSSO_GATINHO: StyleConfig = StyleConfig {
    max_projection_ratio: 0.68,
    anatomical_offset_ratio: 0.22,
    blend_opacity: 0.72,
    curvature_intensity: 0.42,
    segment_count: 16,
    warp_strength: 0.14,
    tangent_smoothing: 0.7,
    elongation_factor: 1.18,
    use_advanced_mask: true,
};

static MEGA_VOLUME: StyleConfig = StyleConfig {
    max_projection_ratio: 0.75,
    anatomical_offset_ratio: 0.24,
    blend_opacity: 0.70,
    curvature_intensity: 0.45,
    segment_count: 18,
    warp_strength: 0.16,
    tangent_smoothing: 0.75,
    elongation_factor: 1.12,
    use_advanced_mask: true,
};

static FOX_EYE: StyleConfig = StyleConfig {
    max_projection_ratio: 0.62,
    anatomical_offset_ratio: 0.22,
    blend_opacity: 0.75,
    curvature_intensity: 0.48,
    segment_count: 16,
    warp_strength: 0.13,
    tangent_smoothing: 0.75,
    elongation_factor: 1.25,
    use_advanced_mask: true,
};

impl StyleId {
    /// Every style, in catalog order.
    pub const ALL: [Self; 11] = [
        Self::ClassicoNatural,
        Self::ClassicoBoneca,
        Self::BrasileiroNatural,
        Self::BrasileiroBoneca,
        Self::BrasileiroGatinho,
        Self::HibridoNatural,
        Self::HibridoEsquilo,
        Self::RussoBoneca,
        Self::RussoGatinho,
        Self::MegaVolume,
        Self::FoxEye,
    ];

    /// Resolve an identifier, falling back to the default style.
    #[must_use]
    pub fn parse(id: &str) -> Self {
        Self::lookup(id).unwrap_or_else(|| {
            tracing::debug!(style = id, fallback = Self::default().as_str(), "unknown style id");
            Self::default()
        })
    }

    /// Resolve an identifier exactly, without the default fallback.
    #[must_use]
    pub fn lookup(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|style| style.as_str().eq_ignore_ascii_case(id))
    }

    /// The catalog key, also used as the overlay asset's file stem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClassicoNatural => "classico-natural",
            Self::ClassicoBoneca => "classico-boneca",
            Self::BrasileiroNatural => "brasileiro-natural",
            Self::BrasileiroBoneca => "brasileiro-boneca",
            Self::BrasileiroGatinho => "brasileiro-gatinho",
            Self::HibridoNatural => "hibrido-natural",
            Self::HibridoEsquilo => "hibrido-esquilo",
            Self::RussoBoneca => "russo-boneca",
            Self::RussoGatinho => "russo-gatinho",
            Self::MegaVolume => "mega-volume",
            Self::FoxEye => "fox-eye",
        }
    }

    /// User-facing name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ClassicoNatural => "Clássico Natural",
            Self::ClassicoBoneca => "Clássico Boneca",
            Self::BrasileiroNatural => "Volume Brasileiro Natural",
            Self::BrasileiroBoneca => "Volume Brasileiro Boneca",
            Self::BrasileiroGatinho => "Volume Brasileiro Gatinho",
            Self::HibridoNatural => "Híbrido Natural",
            Self::HibridoEsquilo => "Híbrido Esquilo",
            Self::RussoBoneca => "Volume Russo Boneca",
            Self::RussoGatinho => "Volume Russo Gatinho",
            Self::MegaVolume => "Mega Volume",
            Self::FoxEye => "Fox Eye",
        }
    }

    /// Tuning parameters for this style.
    #[must_use]
    pub const fn config(self) -> &'static StyleConfig {
        match self {
            Self::ClassicoNatural => &CLASSICO_NATURAL,
            Self::ClassicoBoneca => &CLASSICO_BONECA,
            Self::BrasileiroNatural => &BRASILEIRO_NATURAL,
            Self::BrasileiroBoneca => &BRASILEIRO_BONECA,
            Self::BrasileiroGatinho => &BRASILEIRO_GATINHO,
            Self::HibridoNatural => &HIBRIDO_NATURAL,
            Self::HibridoEsquilo => &HIBRIDO_ESQUILO,
            Self::RussoBoneca => &RUSSO_BONECA,
            Self::RussoGatinho => &RUSSO_GATINHO,
            Self::MegaVolume => &MEGA_VOLUME,
            Self::FoxEye => &FOX_EYE,
        }
    }
}

impl std::fmt::Display for StyleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for StyleId {
    fn from(id: &str) -> Self {
        Self::parse(id)
    }
}

/// Tuning parameters for a style id string; never fails.
#[must_use]
pub fn get_style_config(id: &str) -> &'static StyleConfig {
    StyleId::parse(id).config()
}
