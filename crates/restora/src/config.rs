//! JSON configuration file.
//!
//! ```json
//! {
//!   "model_zoo": { "root": "model_zoo", "extension": "pth" },
//!   "models": { "Deblocking": "gaussian" },
//!   "external": {
//!     "SuperResolution": {
//!       "program": "python3",
//!       "args": ["main_test_rrdb.py", "-i", "{input}", "-o", "{output}", "-w", "{weights}"]
//!     }
//!   }
//! }
//! ```
//!
//! Every field is optional. Command-line flags take precedence for the
//! settings both can express.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use restora_io::{ExternalCommand, ModelZoo};
use restora_pipeline::{DegradationSpec, Mode};
use serde::{Deserialize, Serialize};

/// Contents of a `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestoraConfig {
    /// Weight directory for external stages.
    pub model_zoo: Option<ModelZoo>,
    /// Model overrides for modes without dedicated flags.
    pub models: BTreeMap<Mode, String>,
    /// Modes run by external programs instead of built-in operators.
    pub external: BTreeMap<Mode, ExternalCommand>,
    /// Degradation applied when `--degrade` is not given.
    pub degradation: Option<DegradationSpec>,
}

/// Errors reading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid configuration.
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl RestoraConfig {
    /// Load a configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigFileError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
