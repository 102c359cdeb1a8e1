//! restora-pipeline: sans-IO image restoration orchestration.
//!
//! Sequences restoration stages (super-resolution, denoising,
//! deblocking, ...) in caller-specified order, synthesizes reproducible
//! degraded inputs for evaluation, and scores outputs against ground
//! truth with PSNR and SSIM.
//!
//! This crate has **no I/O dependencies**: it works on decoded images
//! held in memory. Reading datasets, writing results and running
//! out-of-process models live in `restora-io`.
//!
//! # Flow
//!
//! 1. Every step of a [`PipelineRequest`] is resolved in the
//!    [`StageRegistry`]; an unknown mode aborts before anything runs.
//! 2. Each step takes the source image or the previous output, degraded
//!    with seeded Gaussian noise when the request carries a
//!    [`DegradationSpec`].
//! 3. The step's [`RestorationStage`] restores the image.
//! 4. The output is scored against the reference, if any.
//! 5. [`run_dataset`] repeats this per image and aggregates the scores
//!    into a [`RunReport`].

pub mod baseline;
pub mod degrade;
pub mod metrics;
pub mod mode;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod stage;
pub mod types;

pub use baseline::{Baseline, BaselineLoader};
pub use degrade::{DegradationSpec, DegradedObservation, SeedPolicy, degrade, degrade_with};
pub use metrics::{AggregateReport, Evaluation, MetricError, MetricSample, aggregate, evaluate};
pub use mode::{DenoisingParams, Mode, ModeParams, NoiseLevel, Scale, SrKind, SuperResolutionParams};
pub use pipeline::{InputSelection, Orchestrator, PipelineRequest, PipelineStep};
pub use registry::StageRegistry;
pub use report::{DatasetItem, ResultSink, RunReport, StepSummary, run_dataset};
pub use stage::{
    Conditioning, Model, ModelCache, ModelLoader, ModelStage, RestorationStage, check_output_shape,
};
pub use types::{
    Channels, ConfigError, DynamicImage, FloatImage, GrayImage, PipelineError,
    RestorationResult, RgbImage, Shape, StageError,
};
