//! Writes restored images and the run log to an output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use restora_pipeline::{RestorationResult, ResultSink, RunReport};

use crate::error::IoError;
use crate::raster::write_png;

/// File name of the output for `item` at `step`: `{stem}_{step:02}_{tag}.png`.
///
/// Items differing only in extension map to the same name;
/// [`DirectoryReporter`] refuses to let one overwrite the other.
#[must_use]
pub fn output_file_name(item: &str, step: usize, tag: &str) -> String {
    let stem = Path::new(item)
        .file_stem()
        .map_or_else(|| item.to_owned(), |s| s.to_string_lossy().into_owned());
    format!("{stem}_{step:02}_{tag}.png")
}

/// [`ResultSink`] writing PNGs and a `{run}.log` into one directory.
#[derive(Debug, Clone)]
pub struct DirectoryReporter {
    dir: PathBuf,
    run: String,
    /// Output path to the item that wrote it.
    written: HashMap<PathBuf, String>,
}

impl DirectoryReporter {
    /// Report into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::CreateDir`] if the directory cannot be created.
    pub fn create(dir: impl Into<PathBuf>, run: impl Into<String>) -> Result<Self, IoError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| IoError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            run: run.into(),
            written: HashMap::new(),
        })
    }

    /// Path of the run log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.run))
    }

    /// Number of images written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.written.len()
    }
}

impl ResultSink for DirectoryReporter {
    type Error = IoError;

    /// # Errors
    ///
    /// Returns [`IoError::NameCollision`] without writing if another item
    /// already produced one of the output files.
    fn record(&mut self, item: &str, results: &[RestorationResult]) -> Result<(), IoError> {
        let paths: Vec<PathBuf> = results
            .iter()
            .map(|result| {
                self.dir
                    .join(output_file_name(item, result.step, &result.tag))
            })
            .collect();
        for path in &paths {
            if let Some(earlier) = self.written.get(path)
                && earlier != item
            {
                return Err(IoError::NameCollision {
                    path: path.clone(),
                    earlier: earlier.clone(),
                    item: item.to_owned(),
                });
            }
        }
        for (path, result) in paths.into_iter().zip(results) {
            write_png(&path, &result.image)?;
            log::debug!("wrote {}", path.display());
            self.written.insert(path, item.to_owned());
        }
        Ok(())
    }

    fn finish(&mut self, report: &RunReport) -> Result<(), IoError> {
        let lines: Vec<String> = report
            .lines()
            .iter()
            .cloned()
            .chain(report.average_lines())
            .collect();
        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        let path = self.log_path();
        std::fs::write(&path, text).map_err(|source| IoError::WriteFile {
            path: path.clone(),
            source,
        })?;
        log::info!(
            "{}: {} image(s) written to {}",
            self.run,
            self.written.len(),
            self.dir.display()
        );
        Ok(())
    }
}
