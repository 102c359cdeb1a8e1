//! Restoration stages: the uniform interface over every operator.
//!
//! A [`RestorationStage`] turns a normalized input image into a restored
//! 8-bit image. Whether the work happens in-process ([`ModelStage`]) or
//! in an external program (see `restora-io`) is invisible to the
//! orchestrator; both report failure through [`StageError`].
//!
//! In-process stages load their [`Model`] through a [`ModelLoader`] and
//! keep it in a [`ModelCache`] for the lifetime of the stage, so each
//! model identifier is loaded at most once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::mode::{Mode, ModeParams};
use crate::types::{DynamicImage, FloatImage, Shape, StageError};

/// Side information a model receives with its input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditioning {
    /// Output is this many times larger than the input along each axis.
    pub scale: u32,
    /// Noise standard deviation on the `[0, 1]` scale, for denoisers.
    pub noise_sigma: Option<f32>,
}

impl Default for Conditioning {
    fn default() -> Self {
        Self {
            scale: 1,
            noise_sigma: None,
        }
    }
}

/// A loaded, inference-only restoration model.
pub trait Model: Send + Sync {
    /// Run one forward pass.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] if the computation fails.
    fn forward(
        &self,
        input: &FloatImage,
        conditioning: &Conditioning,
    ) -> Result<FloatImage, StageError>;
}

/// Resolves a model identifier to a loaded model.
pub trait ModelLoader: Send + Sync {
    /// Load the model named `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ModelLoad`] if the artifact is missing or
    /// cannot be used.
    fn load(&self, id: &str) -> Result<Arc<dyn Model>, StageError>;
}

/// Models loaded so far, keyed by identifier.
#[derive(Default)]
pub struct ModelCache {
    models: Mutex<HashMap<String, Arc<dyn Model>>>,
}

impl ModelCache {
    /// Return the cached model for `id`, loading it on first use.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error. Failed loads are not cached.
    pub fn get_or_load(
        &self,
        id: &str,
        loader: &dyn ModelLoader,
    ) -> Result<Arc<dyn Model>, StageError> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = models.get(id) {
            log::debug!("model cache hit for {id}");
            return Ok(Arc::clone(model));
        }
        log::info!("loading model {id}");
        let model = loader.load(id)?;
        models.insert(id.to_owned(), Arc::clone(&model));
        Ok(model)
    }

    /// Number of distinct models loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing has been loaded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.len())
            .finish()
    }
}

/// Uniform interface implemented once per operator.
pub trait RestorationStage {
    /// Restore `image` using the parameters relevant to this stage.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] on model load failure, inference
    /// failure, or malformed output.
    fn execute(&self, image: &FloatImage, params: &ModeParams)
    -> Result<DynamicImage, StageError>;
}

/// In-process stage backed by a [`ModelLoader`].
pub struct ModelStage {
    mode: Mode,
    loader: Arc<dyn ModelLoader>,
    cache: ModelCache,
}

impl ModelStage {
    /// Create a stage for `mode` that loads models through `loader`.
    #[must_use]
    pub fn new(mode: Mode, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            mode,
            loader,
            cache: ModelCache::default(),
        }
    }

    /// Models this stage has loaded so far.
    #[must_use]
    pub const fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

impl fmt::Debug for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelStage")
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RestorationStage for ModelStage {
    fn execute(
        &self,
        image: &FloatImage,
        params: &ModeParams,
    ) -> Result<DynamicImage, StageError> {
        let id = params.model_id(self.mode);
        let model = self.cache.get_or_load(&id, self.loader.as_ref())?;
        let conditioning = params.conditioning(self.mode);
        let output = model.forward(image, &conditioning)?;
        check_output_shape(image, &conditioning, &output)?;
        Ok(output.to_dynamic())
    }
}

/// Verify a model kept the channel layout and applied the expected scale.
///
/// # Errors
///
/// Returns [`StageError::MalformedOutput`] on any mismatch.
pub fn check_output_shape(
    input: &FloatImage,
    conditioning: &Conditioning,
    output: &FloatImage,
) -> Result<(), StageError> {
    let expected = Shape {
        width: input.width().saturating_mul(conditioning.scale),
        height: input.height().saturating_mul(conditioning.scale),
        channels: input.channels().count(),
    };
    let actual = output.shape();
    if actual == expected {
        Ok(())
    } else {
        Err(StageError::MalformedOutput { expected, actual })
    }
}
