//! Classical reference operators usable without learned weights.
//!
//! These give every mode a working in-process model, and give learned
//! models something to beat. A model identifier selects its operator by
//! its first `_`-separated token, so `bicubic_x2_psnr` and
//! `median_color` resolve to [`Baseline::Bicubic`] and
//! [`Baseline::Median`].
//!
//! The filtering operators work per channel on 8-bit planes, because
//! `imageproc`'s filters operate on `GrayImage`.

use std::sync::Arc;

use image::imageops::FilterType;
use image::{ImageBuffer, Luma, Rgb};

use crate::stage::{Conditioning, Model, ModelLoader};
use crate::types::{Channels, FloatImage, GrayImage, StageError, quantize};

/// Blur sigma used when a stage carries no noise estimate.
pub const DEFAULT_BLUR_SIGMA: f32 = 1.0;

/// A classical restoration operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// Returns the input unchanged.
    Identity,
    /// Catmull-Rom upscaling by the conditioning scale.
    Bicubic,
    /// Median filter; radius grows with the noise level.
    Median,
    /// Gaussian smoothing; sigma follows the noise level.
    Gaussian,
    /// 3x3 sharpening.
    Sharpen,
}

impl Baseline {
    /// Resolve the operator named by the first token of `id`.
    #[must_use]
    pub fn from_model_id(id: &str) -> Option<Self> {
        match id.split('_').next()? {
            "identity" => Some(Self::Identity),
            "bicubic" => Some(Self::Bicubic),
            "median" => Some(Self::Median),
            "gaussian" => Some(Self::Gaussian),
            "sharpen" => Some(Self::Sharpen),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Bicubic => "bicubic",
            Self::Median => "median",
            Self::Gaussian => "gaussian",
            Self::Sharpen => "sharpen",
        }
    }
}

impl Model for Baseline {
    fn forward(
        &self,
        input: &FloatImage,
        conditioning: &Conditioning,
    ) -> Result<FloatImage, StageError> {
        let output = match *self {
            Self::Identity => Some(input.clone()),
            Self::Bicubic => upscale(input, conditioning.scale),
            Self::Median => {
                let radius = if conditioning.noise_sigma.unwrap_or(0.0) >= 30.0 / 255.0 {
                    2
                } else {
                    1
                };
                map_planes(input, |plane| {
                    imageproc::filter::median_filter(plane, radius, radius)
                })
            }
            Self::Gaussian => {
                let sigma = conditioning
                    .noise_sigma
                    .map_or(DEFAULT_BLUR_SIGMA, |s| (s * 255.0 / 20.0).max(0.5));
                map_planes(input, |plane| {
                    imageproc::filter::gaussian_blur_f32(plane, sigma)
                })
            }
            Self::Sharpen => map_planes(input, imageproc::filter::sharpen3x3),
        };
        output.ok_or_else(|| StageError::Inference {
            model: self.name().to_owned(),
            reason: "operator produced a buffer of the wrong length".to_owned(),
        })
    }
}

/// Loads [`Baseline`] operators by model identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineLoader;

impl ModelLoader for BaselineLoader {
    fn load(&self, id: &str) -> Result<Arc<dyn Model>, StageError> {
        Baseline::from_model_id(id)
            .map(|baseline| Arc::new(baseline) as Arc<dyn Model>)
            .ok_or_else(|| StageError::ModelLoad {
                model: id.to_owned(),
                reason: "no built-in operator with that name".to_owned(),
            })
    }
}

fn upscale(input: &FloatImage, scale: u32) -> Option<FloatImage> {
    let (w, h) = (input.width() * scale, input.height() * scale);
    let raw = input.as_slice().to_vec();
    let data = match input.channels() {
        Channels::Gray => {
            let buf: ImageBuffer<Luma<f32>, Vec<f32>> =
                ImageBuffer::from_raw(input.width(), input.height(), raw)?;
            image::imageops::resize(&buf, w, h, FilterType::CatmullRom).into_raw()
        }
        Channels::Color => {
            let buf: ImageBuffer<Rgb<f32>, Vec<f32>> =
                ImageBuffer::from_raw(input.width(), input.height(), raw)?;
            image::imageops::resize(&buf, w, h, FilterType::CatmullRom).into_raw()
        }
    };
    FloatImage::from_raw(w, h, input.channels(), data)
}

/// Apply an 8-bit single-channel filter to every channel independently.
fn map_planes(input: &FloatImage, op: impl Fn(&GrayImage) -> GrayImage) -> Option<FloatImage> {
    let (w, h) = (input.width(), input.height());
    let planes: Vec<GrayImage> = (0..input.channels().count())
        .map(|c| {
            op(&GrayImage::from_fn(w, h, |x, y| {
                Luma([quantize(input.sample(x, y, c))])
            }))
        })
        .collect();

    let mut data = Vec::with_capacity(input.as_slice().len());
    for y in 0..h {
        for x in 0..w {
            data.extend(
                planes
                    .iter()
                    .map(|plane| f32::from(plane.get_pixel(x, y).0[0]) / 255.0),
            );
        }
    }
    FloatImage::from_raw(w, h, input.channels(), data)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn checker(w: u32, h: u32) -> FloatImage {
        let data = (0..h)
            .flat_map(|y| (0..w).map(move |x| if (x + y) % 2 == 0 { 0.0 } else { 1.0 }))
            .collect();
        FloatImage::from_raw(w, h, Channels::Gray, data).unwrap()
    }

    #[test]
    fn model_ids_resolve_by_first_token() {
        assert_eq!(
            Baseline::from_model_id("bicubic_x4_perception"),
            Some(Baseline::Bicubic)
        );
        assert_eq!(
            Baseline::from_model_id("median_gray_clip"),
            Some(Baseline::Median)
        );
        assert_eq!(Baseline::from_model_id("ffdnet_color"), None);
    }

    #[test]
    fn loader_rejects_unknown_families() {
        let err = BaselineLoader.load("ffdnet_color").err().unwrap();
        assert!(matches!(err, StageError::ModelLoad { ref model, .. } if model == "ffdnet_color"));
    }

    #[test]
    fn identity_returns_input() {
        let input = checker(4, 4);
        let out = Baseline::Identity
            .forward(&input, &Conditioning::default())
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn bicubic_scales_dimensions() {
        let input = FloatImage::from_raw(3, 2, Channels::Color, vec![0.25; 18]).unwrap();
        let conditioning = Conditioning {
            scale: 3,
            noise_sigma: None,
        };
        let out = Baseline::Bicubic.forward(&input, &conditioning).unwrap();
        assert_eq!((out.width(), out.height()), (9, 6));
        assert_eq!(out.channels(), Channels::Color);
        for v in out.as_slice() {
            assert!((v - 0.25).abs() < 1e-4, "flat input should stay flat, got {v}");
        }
    }

    #[test]
    fn median_removes_isolated_outlier() {
        let mut data = vec![0.5; 25];
        data[12] = 1.0;
        let input = FloatImage::from_raw(5, 5, Channels::Gray, data).unwrap();
        let out = Baseline::Median
            .forward(&input, &Conditioning::default())
            .unwrap();
        assert_eq!(quantize(out.sample(2, 2, 0)), quantize(0.5));
    }

    #[test]
    fn gaussian_smooths_checkerboard() {
        let input = checker(9, 9);
        let conditioning = Conditioning {
            scale: 1,
            noise_sigma: Some(30.0 / 255.0),
        };
        let out = Baseline::Gaussian.forward(&input, &conditioning).unwrap();
        let centre = out.sample(4, 4, 0);
        assert!(centre > 0.2 && centre < 0.8, "expected smoothing, got {centre}");
    }

    #[test]
    fn filters_preserve_shape() {
        let input = FloatImage::from_raw(6, 4, Channels::Color, vec![0.3; 72]).unwrap();
        for op in [Baseline::Median, Baseline::Gaussian, Baseline::Sharpen] {
            let out = op.forward(&input, &Conditioning::default()).unwrap();
            assert_eq!(out.shape(), input.shape(), "{op:?}");
        }
    }
}
