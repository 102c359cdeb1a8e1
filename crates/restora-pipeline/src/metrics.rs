//! Fidelity metrics: PSNR and SSIM against a ground-truth reference.
//!
//! Both metrics are computed on the 8-bit sample scale in `f64`, after
//! cropping `border` pixels from every edge of both images.
//!
//! # SSIM
//!
//! Follows Wang et al. (2004): an 11x11 Gaussian window with sigma 1.5,
//! evaluated only where the window fits entirely inside the image, with
//! stabilizing constants `C1 = (0.01 * 255)^2` and
//! `C2 = (0.03 * 255)^2`. Colour images report the mean of the
//! per-channel SSIM values.

use serde::{Deserialize, Serialize};

use crate::types::{Channels, DynamicImage, Shape};

/// Maximum representable 8-bit sample value.
pub const MAX_VALUE: f64 = 255.0;

/// Side length of the SSIM window.
pub const SSIM_WINDOW: u32 = 11;

const SSIM_SIGMA: f64 = 1.5;
const C1: f64 = (0.01 * MAX_VALUE) * (0.01 * MAX_VALUE);
const C2: f64 = (0.03 * MAX_VALUE) * (0.03 * MAX_VALUE);

/// Errors from metric computation. These never abort a pipeline run:
/// the affected image is flagged as skipped instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum MetricError {
    /// Cropped restored and reference images differ in shape.
    #[error("restored image {restored} does not match reference {reference} after cropping")]
    DimensionMismatch {
        /// Cropped restored shape.
        restored: Shape,
        /// Cropped reference shape.
        reference: Shape,
    },

    /// The cropped image cannot hold a single SSIM window.
    #[error("cropped image {shape} is smaller than the {window}x{window} SSIM window")]
    TooSmall {
        /// Cropped shape.
        shape: Shape,
        /// Window side length.
        window: u32,
    },

    /// There were no samples to aggregate.
    #[error("cannot aggregate an empty set of metric samples")]
    EmptyDataset,
}

/// PSNR and SSIM for one restored/reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Peak signal-to-noise ratio in dB; `f64::INFINITY` for identical images.
    pub psnr: f64,
    /// Structural similarity, `1.0` for identical images.
    pub ssim: f64,
    /// Pixels cropped from each edge before comparison.
    pub border: u32,
}

/// Outcome of scoring one step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Evaluation {
    /// No reference image was supplied.
    NoReference,
    /// The output was scored.
    Scored(MetricSample),
    /// A reference existed but the pair could not be scored.
    Skipped(MetricError),
}

impl Evaluation {
    /// The sample, if the output was scored.
    #[must_use]
    pub const fn sample(&self) -> Option<&MetricSample> {
        match self {
            Self::Scored(sample) => Some(sample),
            Self::NoReference | Self::Skipped(_) => None,
        }
    }
}

/// Dataset-level averages with the samples they were computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Arithmetic mean PSNR.
    pub mean_psnr: f64,
    /// Arithmetic mean SSIM.
    pub mean_ssim: f64,
    /// Every sample, in the order it was recorded.
    pub samples: Vec<MetricSample>,
}

/// Score `restored` against `reference`.
///
/// # Errors
///
/// Returns [`MetricError::DimensionMismatch`] if the cropped images
/// differ in width, height or channel count, and
/// [`MetricError::TooSmall`] if the cropped images are smaller than the
/// SSIM window.
pub fn evaluate(
    restored: &DynamicImage,
    reference: &DynamicImage,
    border: u32,
) -> Result<MetricSample, MetricError> {
    let restored = Samples::cropped(restored, border);
    let reference = Samples::cropped(reference, border);
    if restored.shape != reference.shape {
        return Err(MetricError::DimensionMismatch {
            restored: restored.shape,
            reference: reference.shape,
        });
    }
    Ok(MetricSample {
        psnr: psnr(&restored, &reference),
        ssim: ssim(&restored, &reference)?,
        border,
    })
}

/// Average a set of samples.
///
/// # Errors
///
/// Returns [`MetricError::EmptyDataset`] if `samples` is empty.
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(samples: &[MetricSample]) -> Result<AggregateReport, MetricError> {
    if samples.is_empty() {
        return Err(MetricError::EmptyDataset);
    }
    let n = samples.len() as f64;
    Ok(AggregateReport {
        mean_psnr: samples.iter().map(|s| s.psnr).sum::<f64>() / n,
        mean_ssim: samples.iter().map(|s| s.ssim).sum::<f64>() / n,
        samples: samples.to_vec(),
    })
}

/// Cropped 8-bit samples widened to `f64`, HWC order.
struct Samples {
    shape: Shape,
    data: Vec<f64>,
}

impl Samples {
    fn cropped(image: &DynamicImage, border: u32) -> Self {
        let channels = Channels::of(image);
        let raw = match channels {
            Channels::Gray => image.to_luma8().into_raw(),
            Channels::Color => image.to_rgb8().into_raw(),
        };
        let n = usize::from(channels.count());
        let (w, h) = (image.width(), image.height());
        let cw = w.saturating_sub(border.saturating_mul(2));
        let ch = h.saturating_sub(border.saturating_mul(2));

        let mut data = Vec::with_capacity(cw as usize * ch as usize * n);
        for y in border..border + ch {
            let row = (y as usize * w as usize + border as usize) * n;
            data.extend(raw[row..row + cw as usize * n].iter().map(|v| f64::from(*v)));
        }

        Self {
            shape: Shape {
                width: cw,
                height: ch,
                channels: channels.count(),
            },
            data,
        }
    }

    fn plane(&self, c: u8) -> Vec<f64> {
        self.data
            .iter()
            .skip(usize::from(c))
            .step_by(usize::from(self.shape.channels))
            .copied()
            .collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn psnr(a: &Samples, b: &Samples) -> f64 {
    if a.data.is_empty() {
        return f64::INFINITY;
    }
    let mse = a
        .data
        .iter()
        .zip(&b.data)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        / a.data.len() as f64;
    if mse == 0.0 {
        return f64::INFINITY;
    }
    10.0 * (MAX_VALUE * MAX_VALUE / mse).log10()
}

fn ssim(a: &Samples, b: &Samples) -> Result<f64, MetricError> {
    if a.shape.width < SSIM_WINDOW || a.shape.height < SSIM_WINDOW {
        return Err(MetricError::TooSmall {
            shape: a.shape,
            window: SSIM_WINDOW,
        });
    }
    let kernel = gaussian_kernel();
    let (w, h) = (a.shape.width as usize, a.shape.height as usize);
    let total: f64 = (0..a.shape.channels)
        .map(|c| ssim_plane(&a.plane(c), &b.plane(c), w, h, &kernel))
        .sum();
    Ok(total / f64::from(a.shape.channels))
}

#[allow(clippy::cast_precision_loss)]
fn ssim_plane(a: &[f64], b: &[f64], w: usize, h: usize, kernel: &[f64]) -> f64 {
    let aa: Vec<f64> = a.iter().map(|v| v * v).collect();
    let bb: Vec<f64> = b.iter().map(|v| v * v).collect();
    let ab: Vec<f64> = a.iter().zip(b).map(|(x, y)| x * y).collect();

    let mu_a = filter_valid(a, w, h, kernel);
    let mu_b = filter_valid(b, w, h, kernel);
    let e_aa = filter_valid(&aa, w, h, kernel);
    let e_bb = filter_valid(&bb, w, h, kernel);
    let e_ab = filter_valid(&ab, w, h, kernel);

    let mut sum = 0.0;
    for i in 0..mu_a.len() {
        let (ma, mb) = (mu_a[i], mu_b[i]);
        let var_a = e_aa[i] - ma * ma;
        let var_b = e_bb[i] - mb * mb;
        let cov = e_ab[i] - ma * mb;
        let num = (2.0 * ma * mb + C1) * (2.0 * cov + C2);
        let den = (ma * ma + mb * mb + C1) * (var_a + var_b + C2);
        sum += num / den;
    }
    sum / mu_a.len() as f64
}

/// Normalized 1-D Gaussian window; the 2-D window is its outer product.
fn gaussian_kernel() -> Vec<f64> {
    let radius = f64::from(SSIM_WINDOW / 2);
    let weights: Vec<f64> = (0..SSIM_WINDOW)
        .map(|i| {
            let x = f64::from(i) - radius;
            (-(x * x) / (2.0 * SSIM_SIGMA * SSIM_SIGMA)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|v| v / total).collect()
}

/// Separable correlation keeping only positions where the window fits.
fn filter_valid(plane: &[f64], w: usize, h: usize, kernel: &[f64]) -> Vec<f64> {
    let n = kernel.len();
    let (ow, oh) = (w + 1 - n, h + 1 - n);

    let mut rows = vec![0.0; ow * h];
    for y in 0..h {
        for x in 0..ow {
            let start = y * w + x;
            rows[y * ow + x] = plane[start..start + n]
                .iter()
                .zip(kernel)
                .map(|(v, k)| v * k)
                .sum();
        }
    }

    let mut out = vec![0.0; ow * oh];
    for y in 0..oh {
        for x in 0..ow {
            out[y * ow + x] = kernel
                .iter()
                .enumerate()
                .map(|(i, k)| rows[(y + i) * ow + x] * k)
                .sum();
        }
    }
    out
}
