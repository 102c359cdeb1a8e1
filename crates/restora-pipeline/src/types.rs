//! Shared types for the restora pipeline.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::metrics::Evaluation;
use crate::mode::Mode;

/// Re-export `DynamicImage` so downstream crates can hand images to the
/// pipeline without depending on `image` directly.
pub use image::DynamicImage;

/// Re-export `GrayImage` for single-channel stage output.
pub use image::GrayImage;

/// Re-export `RgbImage` for colour stage output.
pub use image::RgbImage;

/// Channel layout a model consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Channels {
    /// One luminance channel.
    Gray,
    /// Three RGB channels.
    #[default]
    Color,
}

impl Channels {
    /// Number of samples per pixel.
    #[must_use]
    pub const fn count(self) -> u8 {
        match self {
            Self::Gray => 1,
            Self::Color => 3,
        }
    }

    /// Layout of an already-decoded image: grayscale sources stay
    /// single-channel, everything else is treated as RGB.
    #[must_use]
    pub fn of(image: &DynamicImage) -> Self {
        if image.color().channel_count() <= 2 {
            Self::Gray
        } else {
            Self::Color
        }
    }
}

/// Width, height and channel count of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Samples per pixel.
    pub channels: u8,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// A normalized floating-point image in row-major, channel-interleaved
/// (HWC) order. Samples of a clean image lie in `[0, 1]`; degraded
/// observations may fall outside that range.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<f32>,
}

impl FloatImage {
    /// Wrap raw samples.
    ///
    /// Returns `None` if `data.len()` does not equal
    /// `width * height * channels`.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, channels: Channels, data: Vec<f32>) -> Option<Self> {
        let expected = width as usize * height as usize * usize::from(channels.count());
        (data.len() == expected).then_some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Convert an 8-bit image into normalized samples with the requested
    /// channel layout.
    #[must_use]
    pub fn from_dynamic(image: &DynamicImage, channels: Channels) -> Self {
        let raw = match channels {
            Channels::Gray => image.to_luma8().into_raw(),
            Channels::Color => image.to_rgb8().into_raw(),
        };
        Self {
            width: image.width(),
            height: image.height(),
            channels,
            data: raw.into_iter().map(|v| f32::from(v) / 255.0).collect(),
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Channel layout.
    #[must_use]
    pub const fn channels(&self) -> Channels {
        self.channels
    }

    /// Width, height and channel count.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        Shape {
            width: self.width,
            height: self.height,
            channels: self.channels.count(),
        }
    }

    /// All samples in HWC order.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to all samples in HWC order.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Sample at `(x, y)` for channel `c`.
    #[must_use]
    pub fn sample(&self, x: u32, y: u32, c: u8) -> f32 {
        let n = usize::from(self.channels.count());
        let idx = (y as usize * self.width as usize + x as usize) * n + usize::from(c);
        self.data[idx]
    }

    /// Quantize back to 8 bits, clamping to the valid range.
    #[must_use]
    pub fn to_dynamic(&self) -> DynamicImage {
        match self.channels {
            Channels::Gray => DynamicImage::ImageLuma8(GrayImage::from_fn(
                self.width,
                self.height,
                |x, y| image::Luma([quantize(self.sample(x, y, 0))]),
            )),
            Channels::Color => {
                DynamicImage::ImageRgb8(RgbImage::from_fn(self.width, self.height, |x, y| {
                    image::Rgb([
                        quantize(self.sample(x, y, 0)),
                        quantize(self.sample(x, y, 1)),
                        quantize(self.sample(x, y, 2)),
                    ])
                }))
            }
        }
    }
}

/// Map a normalized sample to 8 bits: clamp to `[0, 1]`, scale, round.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Output of one successful pipeline step.
#[derive(Debug, Clone)]
pub struct RestorationResult {
    /// Position of the step in the request, starting at 0.
    pub step: usize,
    /// Mode that produced the image.
    pub mode: Mode,
    /// Model identifier the stage was asked to use.
    pub model: String,
    /// File-name tag encoding the mode and its parameters.
    pub tag: String,
    /// Restored 8-bit image.
    pub image: DynamicImage,
    /// Fidelity against the reference, if one was supplied.
    pub evaluation: Evaluation,
}

/// Configuration problems, all detected before any stage executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The mode name is not one of the supported modes.
    #[error("unknown restoration mode `{0}`")]
    UnknownMode(String),

    /// No stage is registered for the mode.
    #[error("no stage registered for {0}")]
    UnknownStage(Mode),

    /// A stage was registered twice for the same mode.
    #[error("a stage is already registered for {0}")]
    DuplicateStage(Mode),

    /// Super-resolution scale outside `{2, 3, 4}`.
    #[error("super-resolution scale must be 2, 3 or 4, got {0}")]
    InvalidScale(u32),

    /// Noise level outside `0..=100`.
    #[error("noise level must be within 0..=100, got {0}")]
    InvalidNoiseLevel(u32),

    /// A step asks for the previous output but is the first step.
    #[error("step {step} ({mode}) reads the previous output but no step precedes it")]
    NoPreviousOutput {
        /// Offending step.
        step: usize,
        /// Its mode.
        mode: Mode,
    },
}

/// Failure of a single restoration stage. Always fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The pretrained artifact is missing or unusable.
    #[error("failed to load model `{model}`: {reason}")]
    ModelLoad {
        /// Model identifier.
        model: String,
        /// What went wrong.
        reason: String,
    },

    /// The restoration computation itself failed.
    #[error("inference with `{model}` failed: {reason}")]
    Inference {
        /// Model identifier.
        model: String,
        /// What went wrong.
        reason: String,
    },

    /// The model produced an image of the wrong shape.
    #[error("malformed stage output: expected {expected}, got {actual}")]
    MalformedOutput {
        /// Shape implied by the input and the conditioning.
        expected: Shape,
        /// Shape actually produced.
        actual: Shape,
    },

    /// An external operation finished with a failure status.
    #[error("external operation `{program}` failed: {status}")]
    External {
        /// Program that was run.
        program: String,
        /// Its completion status.
        status: String,
    },

    /// An external operation finished but left no output artifact.
    #[error("external operation produced no artifact at {}", .0.display())]
    MissingArtifact(PathBuf),

    /// Reading or writing a stage's working files failed.
    #[error("stage I/O failed at {}: {source}", path.display())]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stage artifact could not be encoded or decoded.
    #[error("stage artifact {} could not be processed: {source}", path.display())]
    Codec {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },
}

/// Errors surfaced by [`Orchestrator::run`](crate::Orchestrator::run)
/// and [`run_dataset`](crate::run_dataset).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The request or registry is misconfigured; nothing ran.
    #[error("invalid pipeline configuration: {0}")]
    Config(#[from] ConfigError),

    /// A stage failed; remaining steps were not run.
    #[error("step {step} ({mode}) failed after {} completed step(s): {source}", completed.len())]
    Stage {
        /// Index of the failing step.
        step: usize,
        /// Mode of the failing step.
        mode: Mode,
        /// Results of the steps that finished before the failure.
        completed: Vec<RestorationResult>,
        /// The stage failure.
        #[source]
        source: StageError,
    },

    /// The result sink could not persist a result.
    #[error("result sink failed: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}
