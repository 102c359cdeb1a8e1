//! Restoration modes and their typed parameters.
//!
//! [`Mode`] is the closed set of operators a pipeline can sequence.
//! Mode names arriving from the outside world are parsed with
//! [`FromStr`], so an unknown name is rejected when the request is
//! built, long before any stage runs.
//!
//! [`ModeParams`] is the per-mode parameter bag threaded through every
//! stage. Values that belong to a small closed set ([`Scale`],
//! [`NoiseLevel`]) are validated on construction via `TryFrom`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::stage::Conditioning;
use crate::types::{Channels, ConfigError};

/// One restoration operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Upscale by an integer factor.
    SuperResolution,
    /// Remove block artifacts from block-based codecs.
    Deblocking,
    /// Remove additive noise.
    Denoising,
    /// Remove ringing and mosquito artifacts from lossy compression.
    CompressionArtifactRemoval,
    /// Remove scratches and dust from scanned photographs.
    ScratchRemoval,
    /// Enhance faces.
    FaceEnhancement,
    /// General perceptual quality enhancement.
    ImageQualityEnhance,
}

impl Mode {
    /// Every supported mode, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::SuperResolution,
        Self::Deblocking,
        Self::Denoising,
        Self::CompressionArtifactRemoval,
        Self::ScratchRemoval,
        Self::FaceEnhancement,
        Self::ImageQualityEnhance,
    ];

    /// Canonical mode name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SuperResolution => "SuperResolution",
            Self::Deblocking => "Deblocking",
            Self::Denoising => "Denoising",
            Self::CompressionArtifactRemoval => "CompressionArtifactRemoval",
            Self::ScratchRemoval => "ScratchRemoval",
            Self::FaceEnhancement => "FaceEnhancement",
            Self::ImageQualityEnhance => "ImageQualityEnhance",
        }
    }

    /// Short prefix used in output file names.
    #[must_use]
    pub const fn short_tag(self) -> &'static str {
        match self {
            Self::SuperResolution => "sr",
            Self::Deblocking => "db",
            Self::Denoising => "dn",
            Self::CompressionArtifactRemoval => "car",
            Self::ScratchRemoval => "sc",
            Self::FaceEnhancement => "fe",
            Self::ImageQualityEnhance => "iqe",
        }
    }

    /// Model used when the caller does not name one.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::SuperResolution => SuperResolutionParams::DEFAULT_MODEL,
            Self::Denoising => DenoisingParams::DEFAULT_MODEL,
            Self::Deblocking | Self::CompressionArtifactRemoval => "gaussian",
            Self::ScratchRemoval => "median",
            Self::FaceEnhancement | Self::ImageQualityEnhance => "sharpen",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_owned()))
    }
}

/// Super-resolution upscale factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Scale {
    /// 2x upscaling.
    #[default]
    X2,
    /// 3x upscaling.
    X3,
    /// 4x upscaling.
    X4,
}

impl Scale {
    /// The integer upscale factor.
    #[must_use]
    pub const fn factor(self) -> u32 {
        match self {
            Self::X2 => 2,
            Self::X3 => 3,
            Self::X4 => 4,
        }
    }
}

impl TryFrom<u32> for Scale {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::X2),
            3 => Ok(Self::X3),
            4 => Ok(Self::X4),
            other => Err(ConfigError::InvalidScale(other)),
        }
    }
}

impl From<Scale> for u32 {
    fn from(scale: Scale) -> Self {
        scale.factor()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.factor())
    }
}

/// Fidelity/perception trade-off of a super-resolution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SrKind {
    /// Trained for distortion (PSNR) metrics.
    #[default]
    Psnr,
    /// Trained for perceptual quality.
    Perception,
    /// Between the two.
    Balanced,
}

impl SrKind {
    /// Lowercase name used in model identifiers and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Psnr => "psnr",
            Self::Perception => "perception",
            Self::Balanced => "balanced",
        }
    }
}

impl fmt::Display for SrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Noise standard deviation on the 8-bit scale, in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct NoiseLevel(u8);

impl NoiseLevel {
    /// Largest accepted noise level.
    pub const MAX: u8 = 100;

    /// Validate a noise level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidNoiseLevel`] if `level > 100`.
    pub fn new(level: u32) -> Result<Self, ConfigError> {
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= Self::MAX)
            .map(Self)
            .ok_or(ConfigError::InvalidNoiseLevel(level))
    }

    /// The raw level.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Standard deviation on the normalized `[0, 1]` scale.
    #[must_use]
    pub fn sigma(self) -> f32 {
        f32::from(self.0) / 255.0
    }
}

impl Default for NoiseLevel {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u32> for NoiseLevel {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NoiseLevel> for u32 {
    fn from(level: NoiseLevel) -> Self {
        Self::from(level.0)
    }
}

/// Parameters for [`Mode::SuperResolution`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperResolutionParams {
    /// Upscale factor.
    pub scale: Scale,
    /// Model flavour.
    pub kind: SrKind,
    /// Model family name.
    pub model: String,
}

impl SuperResolutionParams {
    /// Default model family.
    pub const DEFAULT_MODEL: &'static str = "bicubic";

    /// Identifier of the weights for this family, scale and flavour.
    #[must_use]
    pub fn model_id(&self) -> String {
        format!("{}_{}_{}", self.model, self.scale, self.kind)
    }
}

impl Default for SuperResolutionParams {
    fn default() -> Self {
        Self {
            scale: Scale::default(),
            kind: SrKind::default(),
            model: Self::DEFAULT_MODEL.to_owned(),
        }
    }
}

/// Parameters for [`Mode::Denoising`].
///
/// The model variant name follows the model-zoo convention: a name
/// containing `gray` is a single-channel model, and one containing
/// `clip` was trained on inputs quantized back to 8 bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoisingParams {
    /// Noise level the model is conditioned on.
    pub noise_level: NoiseLevel,
    /// Model variant name.
    pub model: String,
}

impl DenoisingParams {
    /// Default model variant.
    pub const DEFAULT_MODEL: &'static str = "median_color";

    /// Channel layout the variant expects.
    #[must_use]
    pub fn channels(&self) -> Channels {
        if self.model.contains("gray") {
            Channels::Gray
        } else {
            Channels::Color
        }
    }

    /// Whether the variant expects 8-bit quantized noisy input.
    #[must_use]
    pub fn wants_clipped_input(&self) -> bool {
        self.model.contains("clip")
    }
}

impl Default for DenoisingParams {
    fn default() -> Self {
        Self {
            noise_level: NoiseLevel::default(),
            model: Self::DEFAULT_MODEL.to_owned(),
        }
    }
}

/// Per-mode parameter bag shared by every step of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeParams {
    /// Super-resolution settings.
    pub super_resolution: SuperResolutionParams,
    /// Denoising settings.
    pub denoising: DenoisingParams,
    /// Model overrides for the modes without dedicated settings.
    pub models: BTreeMap<Mode, String>,
}

impl ModeParams {
    /// Model identifier a stage of `mode` should load.
    #[must_use]
    pub fn model_id(&self, mode: Mode) -> String {
        match mode {
            Mode::SuperResolution => self.super_resolution.model_id(),
            Mode::Denoising => self.denoising.model.clone(),
            other => self
                .models
                .get(&other)
                .cloned()
                .unwrap_or_else(|| other.default_model().to_owned()),
        }
    }

    /// Channel layout the model for `mode` consumes.
    #[must_use]
    pub fn channels(&self, mode: Mode) -> Channels {
        match mode {
            Mode::Denoising => self.denoising.channels(),
            _ => Channels::Color,
        }
    }

    /// Side information handed to the model alongside the image.
    #[must_use]
    pub fn conditioning(&self, mode: Mode) -> Conditioning {
        match mode {
            Mode::SuperResolution => Conditioning {
                scale: self.super_resolution.scale.factor(),
                noise_sigma: None,
            },
            Mode::Denoising => Conditioning {
                scale: 1,
                noise_sigma: Some(self.denoising.noise_level.sigma()),
            },
            _ => Conditioning::default(),
        }
    }

    /// Pixels excluded from each edge when scoring output of `mode`.
    ///
    /// Super-resolution borders are unreliable up to the scale factor.
    #[must_use]
    pub fn metric_border(&self, mode: Mode) -> u32 {
        match mode {
            Mode::SuperResolution => self.super_resolution.scale.factor(),
            _ => 0,
        }
    }

    /// File-name tag encoding `mode` and the parameters it ran with.
    #[must_use]
    pub fn output_tag(&self, mode: Mode) -> String {
        match mode {
            Mode::SuperResolution => format!(
                "{}_{}_{}",
                mode.short_tag(),
                self.super_resolution.scale,
                self.super_resolution.kind,
            ),
            Mode::Denoising => format!(
                "{}_{}_s{}",
                mode.short_tag(),
                self.denoising.model,
                self.denoising.noise_level.get(),
            ),
            other => format!("{}_{}", other.short_tag(), self.model_id(other)),
        }
    }
}
