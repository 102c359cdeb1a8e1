//! Controlled degradation for evaluation runs.
//!
//! Synthesizes a noisy observation from a clean image so a restoration
//! stage can be scored against a known ground truth. Noise is drawn
//! from a generator re-seeded right before sampling, so the same seed,
//! noise level and image shape always produce the same noise field.
//!
//! Production restoration never degrades its input; this module is only
//! reached when a request carries a [`DegradationSpec`].

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::mode::NoiseLevel;
use crate::types::{Channels, DynamicImage, FloatImage, quantize};

/// How a degradation seed is chosen for each image of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedPolicy {
    /// Every image uses the same seed, so every image of a given shape
    /// receives the identical noise field.
    Fixed(u64),
    /// Each image gets a seed derived from its identifier, keyed by
    /// `base`. Stable across runs, distinct across images.
    PerImage {
        /// Key mixed into every derived seed.
        base: u64,
    },
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self::Fixed(0)
    }
}

impl SeedPolicy {
    /// Seed for the image named `item`.
    #[must_use]
    pub fn seed_for(&self, item: &str) -> u64 {
        match *self {
            Self::Fixed(seed) => seed,
            Self::PerImage { base } => {
                let mut hasher = SipHasher13::new_with_keys(base, 0);
                hasher.write(item.as_bytes());
                hasher.finish()
            }
        }
    }
}

/// Noise to apply before handing an image to a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationSpec {
    /// Gaussian standard deviation on the 8-bit scale.
    pub noise_level: NoiseLevel,
    /// Quantize the noisy image back to 8 bits.
    pub clip: bool,
    /// Seed selection.
    pub seed: SeedPolicy,
}

/// A noisy image synthesized from a clean one.
///
/// Lives only as long as the stage invocation it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct DegradedObservation {
    /// Noisy samples, possibly outside `[0, 1]` when not clipped.
    pub image: FloatImage,
    /// Noise level applied.
    pub noise_level: NoiseLevel,
    /// Seed the noise was drawn with.
    pub seed: u64,
    /// Whether the samples were quantized to 8 bits.
    pub clipped: bool,
}

/// Add seeded Gaussian noise to a clean image.
///
/// The image is converted to normalized samples with the given channel
/// layout, then zero-mean Gaussian noise with standard deviation
/// `noise_level / 255` is added sample by sample in HWC order. With
/// `clip`, the result is rounded through the 8-bit domain and back.
#[must_use]
pub fn degrade(
    image: &DynamicImage,
    channels: Channels,
    noise_level: NoiseLevel,
    seed: u64,
    clip: bool,
) -> DegradedObservation {
    let mut float = FloatImage::from_dynamic(image, channels);
    add_gaussian_noise(&mut float, noise_level, seed);
    if clip {
        for v in float.as_mut_slice() {
            *v = f32::from(quantize(*v)) / 255.0;
        }
    }
    DegradedObservation {
        image: float,
        noise_level,
        seed,
        clipped: clip,
    }
}

/// Degrade according to `spec`, deriving the seed for `item`.
#[must_use]
pub fn degrade_with(
    image: &DynamicImage,
    channels: Channels,
    spec: &DegradationSpec,
    item: &str,
) -> DegradedObservation {
    degrade(
        image,
        channels,
        spec.noise_level,
        spec.seed.seed_for(item),
        spec.clip,
    )
}

#[allow(clippy::cast_possible_truncation)]
fn add_gaussian_noise(image: &mut FloatImage, noise_level: NoiseLevel, seed: u64) {
    let sigma = f64::from(noise_level.get()) / 255.0;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut gaussian = BoxMuller::default();
    for v in image.as_mut_slice() {
        let noise = gaussian.sample(&mut rng) * sigma;
        *v = (f64::from(*v) + noise) as f32;
    }
}

/// Standard normal sampler using the Box-Muller transform.
///
/// Each pair of uniform draws yields two normal samples; the second is
/// cached for the next call.
#[derive(Debug, Default)]
struct BoxMuller {
    spare: Option<f64>,
}

impl BoxMuller {
    fn sample<R: Rng>(&mut self, rng: &mut R) -> f64 {
        if let Some(z) = self.spare.take() {
            return z;
        }
        // `random::<f64>()` is in [0, 1); shift to (0, 1] so ln() is finite.
        let u1 = 1.0 - rng.random::<f64>();
        let u2 = rng.random::<f64>();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = std::f64::consts::TAU * u2;
        self.spare = Some(radius * theta.sin());
        radius * theta.cos()
    }
}
