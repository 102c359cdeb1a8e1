//! Mapping from [`Mode`] to the stage that implements it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::mode::Mode;
use crate::stage::{ModelLoader, ModelStage, RestorationStage};
use crate::types::ConfigError;

/// Registered stages, at most one per mode.
///
/// The registry never decides execution order; that comes from the
/// request's step list.
#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<Mode, Box<dyn RestorationStage>>,
}

impl StageRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with an in-process [`ModelStage`] for every mode, all
    /// loading through the same `loader`.
    #[must_use]
    pub fn builtin(loader: &Arc<dyn ModelLoader>) -> Self {
        let stages = Mode::ALL
            .into_iter()
            .map(|mode| {
                let stage: Box<dyn RestorationStage> =
                    Box::new(ModelStage::new(mode, Arc::clone(loader)));
                (mode, stage)
            })
            .collect();
        Self { stages }
    }

    /// Register `stage` for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateStage`] if `mode` already has a
    /// stage. The existing stage is kept.
    pub fn register(
        &mut self,
        mode: Mode,
        stage: Box<dyn RestorationStage>,
    ) -> Result<(), ConfigError> {
        if self.stages.contains_key(&mode) {
            return Err(ConfigError::DuplicateStage(mode));
        }
        self.stages.insert(mode, stage);
        Ok(())
    }

    /// Swap the stage for `mode`, returning the previous one.
    pub fn replace(
        &mut self,
        mode: Mode,
        stage: Box<dyn RestorationStage>,
    ) -> Option<Box<dyn RestorationStage>> {
        self.stages.insert(mode, stage)
    }

    /// The stage registered for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownStage`] if nothing is registered.
    pub fn resolve(&self, mode: Mode) -> Result<&dyn RestorationStage, ConfigError> {
        self.stages
            .get(&mode)
            .map(|stage| stage.as_ref())
            .ok_or(ConfigError::UnknownStage(mode))
    }

    /// Registered modes in declaration order.
    pub fn modes(&self) -> impl Iterator<Item = Mode> + '_ {
        self.stages.keys().copied()
    }

    /// Number of registered stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.stages.keys()).finish()
    }
}
