//! Ordered execution of restoration steps.
//!
//! A [`PipelineRequest`] lists the steps to run. Each step names a
//! [`Mode`] and where its input comes from. The [`Orchestrator`] runs
//! them strictly in that order:
//!
//! ```rust
//! # use std::sync::Arc;
//! # use restora_pipeline::{
//! #     BaselineLoader, DynamicImage, ModelLoader, Orchestrator, PipelineError,
//! #     PipelineRequest, StageRegistry,
//! # };
//! # fn run(source: &DynamicImage) -> Result<(), PipelineError> {
//! let loader: Arc<dyn ModelLoader> = Arc::new(BaselineLoader);
//! let orchestrator = Orchestrator::new(StageRegistry::builtin(&loader));
//! let request = PipelineRequest::from_mode_names(["Denoising", "SuperResolution"], true)?;
//! let results = orchestrator.run(&request, source)?;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! Every mode is resolved before the first stage runs, so a
//! misconfigured request fails without touching any model. Once running,
//! the first stage failure ends the run; results of the steps that had
//! already finished travel inside [`PipelineError::Stage`].

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::degrade::{self, DegradationSpec};
use crate::metrics::{self, Evaluation};
use crate::mode::{Mode, ModeParams};
use crate::registry::StageRegistry;
use crate::stage::RestorationStage;
use crate::types::{
    Channels, ConfigError, DynamicImage, FloatImage, PipelineError, RestorationResult,
};

/// Where a step takes its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputSelection {
    /// The request's source image.
    #[default]
    Source,
    /// The output of the step immediately before.
    PreviousOutput,
}

/// One entry of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Operator to run.
    pub mode: Mode,
    /// Input for the operator.
    pub input: InputSelection,
}

impl PipelineStep {
    /// A step reading the source image.
    #[must_use]
    pub const fn source(mode: Mode) -> Self {
        Self {
            mode,
            input: InputSelection::Source,
        }
    }

    /// A step reading the previous step's output.
    #[must_use]
    pub const fn chained(mode: Mode) -> Self {
        Self {
            mode,
            input: InputSelection::PreviousOutput,
        }
    }
}

/// Everything needed to run a pipeline over one image.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    /// Steps in execution order. Duplicates run independently.
    pub steps: Vec<PipelineStep>,
    /// Parameters shared by all steps.
    pub params: ModeParams,
    /// Noise to synthesize on the source before source-reading steps.
    pub degradation: Option<DegradationSpec>,
    /// Ground truth to score every step's output against.
    pub reference: Option<DynamicImage>,
    /// Identifier of the image, used for seeding and logging.
    pub item: String,
}

impl PipelineRequest {
    /// A request running `steps` with default parameters.
    #[must_use]
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Build a request from mode names.
    ///
    /// The first step always reads the source. With `chain`, every later
    /// step reads the output of the one before it; otherwise each step
    /// reads the source independently.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownMode`] for the first unrecognized name.
    pub fn from_mode_names<I, S>(names: I, chain: bool) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let steps = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let mode: Mode = name.as_ref().parse()?;
                Ok(if chain && i > 0 {
                    PipelineStep::chained(mode)
                } else {
                    PipelineStep::source(mode)
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self::new(steps))
    }

    /// Replace the parameters.
    #[must_use]
    pub fn with_params(mut self, params: ModeParams) -> Self {
        self.params = params;
        self
    }

    /// Degrade the source before source-reading steps.
    #[must_use]
    pub const fn with_degradation(mut self, spec: DegradationSpec) -> Self {
        self.degradation = Some(spec);
        self
    }

    /// Score outputs against `reference`.
    #[must_use]
    pub fn with_reference(mut self, reference: DynamicImage) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Name the image being processed.
    #[must_use]
    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = item.into();
        self
    }
}

/// Runs requests against a fixed set of registered stages.
#[derive(Debug)]
pub struct Orchestrator {
    registry: StageRegistry,
}

impl Orchestrator {
    /// Wrap a fully populated registry.
    #[must_use]
    pub const fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    /// Run every step of `request` on `source`, in order.
    ///
    /// Returns one [`RestorationResult`] per step. An empty step list
    /// yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a mode has no registered stage
    /// or the first step reads a previous output; no stage has run in
    /// that case. Returns [`PipelineError::Stage`] on the first stage
    /// failure, carrying the results completed so far.
    pub fn run(
        &self,
        request: &PipelineRequest,
        source: &DynamicImage,
    ) -> Result<Vec<RestorationResult>, PipelineError> {
        let stages = self.resolve(request)?;
        let params = &request.params;
        let mut results: Vec<RestorationResult> = Vec::with_capacity(stages.len());

        for (step, (spec, stage)) in request.steps.iter().zip(stages).enumerate() {
            let mode = spec.mode;
            let model = params.model_id(mode);
            log::info!("{}: step {step} {mode} with {model}", request.item);

            let input = match spec.input {
                InputSelection::Source => prepare_source(request, mode, source),
                // `resolve` guarantees a previous result exists.
                InputSelection::PreviousOutput => FloatImage::from_dynamic(
                    results.last().map_or(source, |previous| &previous.image),
                    params.channels(mode),
                ),
            };

            let image = match stage.execute(&input, params) {
                Ok(image) => image,
                Err(err) => {
                    log::error!("{}: step {step} {mode} failed: {err}", request.item);
                    return Err(PipelineError::Stage {
                        step,
                        mode,
                        completed: results,
                        source: err,
                    });
                }
            };

            let evaluation = score(request, mode, &image);
            results.push(RestorationResult {
                step,
                mode,
                model,
                tag: params.output_tag(mode),
                image,
                evaluation,
            });
        }
        Ok(results)
    }

    /// Resolve every step's stage and check input wiring.
    fn resolve<'a>(
        &'a self,
        request: &PipelineRequest,
    ) -> Result<Vec<&'a dyn RestorationStage>, ConfigError> {
        if let Some(first) = request.steps.first()
            && first.input == InputSelection::PreviousOutput
        {
            return Err(ConfigError::NoPreviousOutput {
                step: 0,
                mode: first.mode,
            });
        }
        request
            .steps
            .iter()
            .map(|step| self.registry.resolve(step.mode))
            .collect()
    }
}

/// Normalize the source for `mode`, degrading it when the request asks.
///
/// A `*_clip` denoiser variant always sees quantized input.
fn prepare_source(request: &PipelineRequest, mode: Mode, source: &DynamicImage) -> FloatImage {
    let channels = request.params.channels(mode);
    let Some(spec) = &request.degradation else {
        return FloatImage::from_dynamic(source, channels);
    };
    let spec = DegradationSpec {
        clip: spec.clip
            || (mode == Mode::Denoising && request.params.denoising.wants_clipped_input()),
        ..*spec
    };
    let observation = degrade::degrade_with(source, channels, &spec, &request.item);
    log::debug!(
        "{}: degraded with noise level {}, seed {}, clip {}",
        request.item,
        observation.noise_level.get(),
        observation.seed,
        observation.clipped,
    );
    observation.image
}

/// `image` converted to `channels`, borrowed when it already matches.
fn in_layout(image: &DynamicImage, channels: Channels) -> Cow<'_, DynamicImage> {
    if Channels::of(image) == channels {
        return Cow::Borrowed(image);
    }
    Cow::Owned(match channels {
        Channels::Gray => DynamicImage::ImageLuma8(image.to_luma8()),
        Channels::Color => DynamicImage::ImageRgb8(image.to_rgb8()),
    })
}

/// Score `image` against the request's reference, both read in the
/// layout the model for `mode` consumes.
fn score(request: &PipelineRequest, mode: Mode, image: &DynamicImage) -> Evaluation {
    let Some(reference) = &request.reference else {
        return Evaluation::NoReference;
    };
    let channels = request.params.channels(mode);
    let restored = in_layout(image, channels);
    let reference = in_layout(reference, channels);
    match metrics::evaluate(&restored, &reference, request.params.metric_border(mode)) {
        Ok(sample) => {
            log::info!(
                "{} - PSNR: {:.2} dB; SSIM: {:.4}.",
                request.item,
                sample.psnr,
                sample.ssim
            );
            Evaluation::Scored(sample)
        }
        Err(err) => {
            log::warn!("{}: {mode} output not scored: {err}", request.item);
            Evaluation::Skipped(err)
        }
    }
}
