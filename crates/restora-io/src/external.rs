//! Restoration stages run by an external program.
//!
//! The input is written to a PNG in a fresh temporary directory, the
//! program is started with an expanded argument list, and the image it
//! leaves at the output path is read back. Arguments are passed as a
//! vector; no shell is involved.
//!
//! Recognized placeholders in arguments:
//!
//! | placeholder | value                                  |
//! |-------------|----------------------------------------|
//! | `{input}`   | path of the input PNG                  |
//! | `{output}`  | path the program must write            |
//! | `{scale}`   | upscale factor (1 outside SR)          |
//! | `{noise}`   | denoising noise level, 0-100           |
//! | `{model}`   | model identifier for the mode          |
//! | `{weights}` | weight file located in the model zoo   |

use std::path::{Path, PathBuf};
use std::process::Command;

use restora_pipeline::{
    DynamicImage, FloatImage, Mode, ModeParams, RestorationStage, StageError, check_output_shape,
};
use serde::{Deserialize, Serialize};

use crate::zoo::ModelZoo;

/// Program and argument template of an external stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Argument template.
    #[serde(default)]
    pub args: Vec<String>,
    /// Zoo variant substituted for `{weights}`; defaults to the mode's
    /// model identifier.
    #[serde(default)]
    pub weights: Option<String>,
}

impl ExternalCommand {
    fn needs_weights(&self) -> bool {
        self.weights.is_some() || self.args.iter().any(|arg| arg.contains("{weights}"))
    }
}

/// A [`RestorationStage`] that shells out to a program.
#[derive(Debug, Clone)]
pub struct ExternalStage {
    mode: Mode,
    command: ExternalCommand,
    zoo: Option<ModelZoo>,
}

impl ExternalStage {
    /// A stage for `mode` running `command`.
    #[must_use]
    pub const fn new(mode: Mode, command: ExternalCommand) -> Self {
        Self {
            mode,
            command,
            zoo: None,
        }
    }

    /// Resolve `{weights}` through `zoo`.
    #[must_use]
    pub fn with_zoo(mut self, zoo: ModelZoo) -> Self {
        self.zoo = Some(zoo);
        self
    }

    fn weights(&self, params: &ModeParams) -> Result<Option<PathBuf>, StageError> {
        if !self.command.needs_weights() {
            return Ok(None);
        }
        let variant = self
            .command
            .weights
            .clone()
            .unwrap_or_else(|| params.model_id(self.mode));
        let zoo = self.zoo.as_ref().ok_or_else(|| StageError::ModelLoad {
            model: variant.clone(),
            reason: "no model zoo configured".to_owned(),
        })?;
        zoo.locate(&variant).map(Some)
    }

    fn expand(
        &self,
        params: &ModeParams,
        input: &Path,
        output: &Path,
        weights: Option<&Path>,
    ) -> Vec<String> {
        let scale = params.conditioning(self.mode).scale.to_string();
        let noise = params.denoising.noise_level.get().to_string();
        let model = params.model_id(self.mode);
        let weights = weights.map(|w| w.display().to_string()).unwrap_or_default();
        self.command
            .args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input.display().to_string())
                    .replace("{output}", &output.display().to_string())
                    .replace("{scale}", &scale)
                    .replace("{noise}", &noise)
                    .replace("{model}", &model)
                    .replace("{weights}", &weights)
            })
            .collect()
    }
}

impl RestorationStage for ExternalStage {
    fn execute(&self, image: &FloatImage, params: &ModeParams) -> Result<DynamicImage, StageError> {
        let weights = self.weights(params)?;

        let dir = tempfile::tempdir().map_err(|source| StageError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let input = dir.path().join("input.png");
        let output = dir.path().join("output.png");
        image
            .to_dynamic()
            .save_with_format(&input, image::ImageFormat::Png)
            .map_err(|source| StageError::Codec {
                path: input.clone(),
                source,
            })?;

        let args = self.expand(params, &input, &output, weights.as_deref());
        let program = self.command.program.display().to_string();
        log::debug!("running {program} {}", args.join(" "));
        let status = Command::new(&self.command.program)
            .args(&args)
            .status()
            .map_err(|source| StageError::Io {
                path: self.command.program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(StageError::External {
                program,
                status: status.to_string(),
            });
        }
        if !output.is_file() {
            return Err(StageError::MissingArtifact(output));
        }

        let restored = image::open(&output).map_err(|source| StageError::Codec {
            path: output.clone(),
            source,
        })?;
        let restored = FloatImage::from_dynamic(&restored, image.channels());
        check_output_shape(image, &params.conditioning(self.mode), &restored)?;
        Ok(restored.to_dynamic())
    }
}
