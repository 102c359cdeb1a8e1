//! restora: restore an image or a dataset and score it against ground truth.
//!
//! Runs the requested restoration modes in order over every image of the
//! source, writes the restored images and a run log to the output
//! directory, and reports mean PSNR/SSIM when references are available.
//!
//! # Usage
//!
//! ```text
//! restora [OPTIONS] --modes <MODES>... <SOURCE>
//! restora testsets/set12 --modes Denoising --reference testsets/set12 --degrade --noise-level 25
//! restora lq/ --modes SuperResolution,Deblocking --chain --sr-scale 4 --reference hq/
//! ```
//!
//! Logging goes through `env_logger`; set `RUST_LOG` to change the level.

#![allow(clippy::print_stdout)]

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use restora_io::{Dataset, DirectoryReporter, ExternalStage, IoError, ModelZoo};
use restora_pipeline::{
    BaselineLoader, ConfigError, DegradationSpec, DenoisingParams, Mode, ModeParams, ModelLoader,
    NoiseLevel, Orchestrator, PipelineError, PipelineRequest, Scale, SeedPolicy, SrKind,
    StageRegistry, SuperResolutionParams, run_dataset,
};

use crate::config::{ConfigFileError, RestoraConfig};

/// Restore images with a sequence of restoration modes and score the output.
#[derive(Parser)]
#[command(name = "restora", version)]
struct Cli {
    /// Image file or directory of images to restore.
    #[arg(required_unless_present = "list_modes")]
    source: Option<PathBuf>,

    /// Modes to run, in order (comma-separated or repeated).
    #[arg(long, value_delimiter = ',', required_unless_present = "list_modes")]
    modes: Vec<String>,

    /// Super-resolution scale factor.
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(2..=4))]
    sr_scale: u32,

    /// Super-resolution model flavour.
    #[arg(long, value_enum, default_value_t = SrType::Psnr)]
    sr_type: SrType,

    /// Super-resolution model family.
    #[arg(long, default_value = SuperResolutionParams::DEFAULT_MODEL)]
    sr_model: String,

    /// Noise level (0-100) on the 8-bit scale, for denoising and degradation.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(0..=100))]
    noise_level: u32,

    /// Denoising model variant.
    #[arg(long, default_value = DenoisingParams::DEFAULT_MODEL)]
    dn_model: String,

    /// Ground-truth image, or directory of images sharing the source names.
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Add seeded Gaussian noise of `--noise-level` to each source first.
    #[arg(long)]
    degrade: bool,

    /// Quantize degraded images back to 8 bits.
    #[arg(long)]
    clip: bool,

    /// Degradation seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Derive a distinct seed per image from `--seed` and the file name.
    #[arg(long)]
    per_image_seed: bool,

    /// Feed each mode the previous mode's output instead of the source.
    #[arg(long)]
    chain: bool,

    /// Directory receiving a subdirectory per run.
    #[arg(long, default_value = "results")]
    output: PathBuf,

    /// Directory of model weights for external stages.
    #[arg(long)]
    model_zoo: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run name; defaults to the source name followed by the mode tags.
    #[arg(long)]
    run_name: Option<String>,

    /// List the supported modes and exit.
    #[arg(long)]
    list_modes: bool,
}

/// Super-resolution flavour selection.
#[derive(Clone, Copy, ValueEnum)]
enum SrType {
    /// Trained for fidelity.
    Psnr,
    /// Trained for perceptual quality.
    Perception,
    /// Between the two.
    Balanced,
}

impl From<SrType> for SrKind {
    fn from(value: SrType) -> Self {
        match value {
            SrType::Psnr => Self::Psnr,
            SrType::Perception => Self::Perception,
            SrType::Balanced => Self::Balanced,
        }
    }
}

/// Anything that ends a run.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("no images found in {}", .0.display())]
    EmptyDataset(PathBuf),
}

/// Build the per-mode parameters from flags and config.
///
/// The denoiser is conditioned on the noise actually added when a
/// degradation is active, and on `--noise-level` otherwise.
fn params_from_cli(
    cli: &Cli,
    config: &RestoraConfig,
    degradation: Option<&DegradationSpec>,
) -> Result<ModeParams, ConfigError> {
    let noise_level = match degradation {
        Some(spec) => spec.noise_level,
        None => NoiseLevel::new(cli.noise_level)?,
    };
    Ok(ModeParams {
        super_resolution: SuperResolutionParams {
            scale: Scale::try_from(cli.sr_scale)?,
            kind: cli.sr_type.into(),
            model: cli.sr_model.clone(),
        },
        denoising: DenoisingParams {
            noise_level,
            model: cli.dn_model.clone(),
        },
        models: config.models.clone(),
    })
}

/// Degradation from `--degrade`, falling back to the config file.
fn degradation_from_cli(
    cli: &Cli,
    config: &RestoraConfig,
) -> Result<Option<DegradationSpec>, ConfigError> {
    if !cli.degrade {
        return Ok(config.degradation);
    }
    Ok(Some(DegradationSpec {
        noise_level: NoiseLevel::new(cli.noise_level)?,
        clip: cli.clip,
        seed: if cli.per_image_seed {
            SeedPolicy::PerImage { base: cli.seed }
        } else {
            SeedPolicy::Fixed(cli.seed)
        },
    }))
}

/// Built-in stages for every mode, with configured modes swapped for
/// external programs.
fn registry_from_config(config: &RestoraConfig, zoo: Option<&ModelZoo>) -> StageRegistry {
    let loader: Arc<dyn ModelLoader> = Arc::new(BaselineLoader);
    let mut registry = StageRegistry::builtin(&loader);
    for (&mode, command) in &config.external {
        let mut stage = ExternalStage::new(mode, command.clone());
        if let Some(zoo) = zoo {
            stage = stage.with_zoo(zoo.clone());
        }
        log::info!("{mode} runs {}", command.program.display());
        registry.replace(mode, Box::new(stage));
    }
    registry
}

fn default_run_name(source: &Path, params: &ModeParams, request: &PipelineRequest) -> String {
    let mut name = source
        .file_stem()
        .map_or_else(|| "run".to_owned(), |s| s.to_string_lossy().into_owned());
    for step in &request.steps {
        name.push('_');
        name.push_str(&params.output_tag(step.mode));
    }
    name
}

fn list_modes() {
    for mode in Mode::ALL {
        println!("{:<28} {:<4} {}", mode.name(), mode.short_tag(), mode.default_model());
    }
}

fn run(cli: &Cli, source: &Path) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => RestoraConfig::load(path)?,
        None => RestoraConfig::default(),
    };
    let degradation = degradation_from_cli(cli, &config)?;
    let params = params_from_cli(cli, &config, degradation.as_ref())?;
    let mut template = PipelineRequest::from_mode_names(&cli.modes, cli.chain)?.with_params(params);
    template.degradation = degradation;

    let zoo = cli
        .model_zoo
        .clone()
        .map(ModelZoo::new)
        .or_else(|| config.model_zoo.clone());
    let orchestrator = Orchestrator::new(registry_from_config(&config, zoo.as_ref()));

    let dataset = Dataset::discover(source, cli.reference.as_deref())?;
    if dataset.is_empty() {
        return Err(CliError::EmptyDataset(source.to_path_buf()));
    }
    let run_name = cli
        .run_name
        .clone()
        .unwrap_or_else(|| default_run_name(source, &template.params, &template));
    log::info!("{run_name}: {} image(s) from {}", dataset.len(), source.display());

    let items = dataset.load()?;
    let mut reporter = DirectoryReporter::create(cli.output.join(&run_name), &run_name)?;
    let report = run_dataset(&orchestrator, &template, items, &run_name, &mut reporter)?;
    log::info!(
        "{run_name}: finished {} image(s), log at {}",
        report.items(),
        reporter.log_path().display()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_modes {
        list_modes();
        return ExitCode::SUCCESS;
    }
    let Some(source) = cli.source.as_deref() else {
        log::error!("no source given");
        return ExitCode::FAILURE;
    };

    match run(&cli, source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use restora_pipeline::InputSelection;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("restora").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_mode_defaults() {
        let cli = parse(&["in", "--modes", "Denoising"]);
        let params = params_from_cli(&cli, &RestoraConfig::default(), None).unwrap();
        assert_eq!(params, ModeParams::default());
        assert_eq!(degradation_from_cli(&cli, &RestoraConfig::default()).unwrap(), None);
    }

    #[test]
    fn modes_accept_commas_and_repeats() {
        let cli = parse(&["in", "--modes", "Denoising,SuperResolution", "--modes", "Deblocking"]);
        assert_eq!(cli.modes, vec!["Denoising", "SuperResolution", "Deblocking"]);
    }

    #[test]
    fn out_of_range_scale_is_rejected_by_parser() {
        let args = ["restora", "in", "--modes", "SuperResolution", "--sr-scale", "5"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn list_modes_needs_no_source() {
        let cli = parse(&["--list-modes"]);
        assert!(cli.list_modes && cli.source.is_none());
    }

    #[test]
    fn degrade_flags_build_seed_policy() {
        let cli = parse(&[
            "in", "--modes", "Denoising", "--degrade", "--clip", "--noise-level", "50",
            "--seed", "4", "--per-image-seed",
        ]);
        let spec = degradation_from_cli(&cli, &RestoraConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(spec.noise_level.get(), 50);
        assert!(spec.clip);
        assert_eq!(spec.seed, SeedPolicy::PerImage { base: 4 });
    }

    #[test]
    fn configured_degradation_sets_denoiser_noise_level() {
        let cli = parse(&["in", "--modes", "Denoising"]);
        let config = RestoraConfig {
            degradation: Some(DegradationSpec {
                noise_level: NoiseLevel::new(15).unwrap(),
                ..DegradationSpec::default()
            }),
            ..RestoraConfig::default()
        };
        let degradation = degradation_from_cli(&cli, &config).unwrap();
        let params = params_from_cli(&cli, &config, degradation.as_ref()).unwrap();
        assert_eq!(params.denoising.noise_level.get(), 15);
        assert_eq!(params.output_tag(Mode::Denoising), "dn_median_color_s15");

        let flagged = parse(&["in", "--modes", "Denoising", "--degrade", "--noise-level", "50"]);
        let degradation = degradation_from_cli(&flagged, &config).unwrap();
        let params = params_from_cli(&flagged, &config, degradation.as_ref()).unwrap();
        assert_eq!(params.denoising.noise_level.get(), 50);
    }

    #[test]
    fn default_run_name_lists_tags() {
        let cli = parse(&["data/set5", "--modes", "SuperResolution,Denoising", "--chain"]);
        let params = params_from_cli(&cli, &RestoraConfig::default(), None).unwrap();
        let request = PipelineRequest::from_mode_names(&cli.modes, cli.chain).unwrap();
        assert_eq!(request.steps[1].input, InputSelection::PreviousOutput);
        assert_eq!(
            default_run_name(Path::new("data/set5"), &params, &request),
            "set5_sr_x2_psnr_dn_median_color_s30"
        );
    }

    #[test]
    fn external_config_replaces_builtin_stage() {
        let mut config = RestoraConfig::default();
        config.external.insert(
            Mode::Deblocking,
            restora_io::ExternalCommand {
                program: "deblock".into(),
                args: vec!["{input}".to_owned(), "{output}".to_owned()],
                weights: None,
            },
        );
        let registry = registry_from_config(&config, None);
        assert_eq!(registry.len(), Mode::ALL.len());
    }
}
