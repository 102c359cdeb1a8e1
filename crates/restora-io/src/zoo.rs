//! Model weight storage: `<root>/<variant>.<extension>`.

use std::path::PathBuf;

use restora_pipeline::StageError;
use serde::{Deserialize, Serialize};

/// A directory of pretrained weights, one file per variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelZoo {
    root: PathBuf,
    #[serde(default = "ModelZoo::default_extension")]
    extension: String,
}

impl ModelZoo {
    /// Weight file extension used unless configured otherwise.
    pub const DEFAULT_EXTENSION: &'static str = "pth";

    fn default_extension() -> String {
        Self::DEFAULT_EXTENSION.to_owned()
    }

    /// A zoo rooted at `root` with `.pth` weights.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: Self::default_extension(),
        }
    }

    /// Use `extension` instead of `pth`.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Where the weights of `variant` would be.
    #[must_use]
    pub fn path(&self, variant: &str) -> PathBuf {
        self.root.join(format!("{variant}.{}", self.extension))
    }

    /// Path to the weights of `variant`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::ModelLoad`] if the file is missing.
    pub fn locate(&self, variant: &str) -> Result<PathBuf, StageError> {
        let path = self.path(variant);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StageError::ModelLoad {
                model: variant.to_owned(),
                reason: format!("no weights at {}", path.display()),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn variant_paths_follow_layout() {
        let zoo = ModelZoo::new("model_zoo");
        assert_eq!(
            zoo.path("ffdnet_gray_clip"),
            Path::new("model_zoo/ffdnet_gray_clip.pth")
        );
        let onnx = zoo.with_extension("onnx");
        assert_eq!(onnx.path("rrdb_x4"), Path::new("model_zoo/rrdb_x4.onnx"));
    }

    #[test]
    fn locate_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let zoo = ModelZoo::new(dir.path());
        assert!(matches!(
            zoo.locate("ffdnet_color"),
            Err(StageError::ModelLoad { ref model, .. }) if model == "ffdnet_color"
        ));
        std::fs::write(dir.path().join("ffdnet_color.pth"), b"weights").unwrap();
        assert_eq!(
            zoo.locate("ffdnet_color").unwrap(),
            dir.path().join("ffdnet_color.pth")
        );
    }

    #[test]
    fn extension_defaults_when_deserialized() {
        let zoo: ModelZoo = serde_json::from_str(r#"{"root": "weights"}"#).unwrap();
        assert_eq!(zoo.path("a"), Path::new("weights/a.pth"));
    }
}
