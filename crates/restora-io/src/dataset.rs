//! Dataset discovery and loading.
//!
//! A dataset is a single image file or a directory of images. Reference
//! images, when given, live in a parallel directory and are matched by
//! file name, falling back to the same stem with any image extension.

use std::path::{Path, PathBuf};

use restora_pipeline::DatasetItem;

use crate::error::IoError;
use crate::raster::{IMAGE_EXTENSIONS, is_image_path, read_image};

/// Image files directly inside `dir`, sorted by path.
///
/// # Errors
///
/// Returns [`IoError::ReadDir`] if the directory cannot be listed.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, IoError> {
    let read_dir_err = |source| IoError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_err)? {
        let path = entry.map_err(read_dir_err)?.path();
        if path.is_file() && is_image_path(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// The images named by `source`: the file itself, or the images in the
/// directory.
///
/// # Errors
///
/// Returns [`IoError::NotAnImage`] for a file without an image extension,
/// and [`IoError::ReadDir`] if a directory cannot be listed.
pub fn image_paths(source: &Path) -> Result<Vec<PathBuf>, IoError> {
    if source.is_dir() {
        list_images(source)
    } else if source.is_file() && is_image_path(source) {
        Ok(vec![source.to_path_buf()])
    } else {
        Err(IoError::NotAnImage(source.to_path_buf()))
    }
}

/// Source images paired with optional references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    entries: Vec<(PathBuf, Option<PathBuf>)>,
}

impl Dataset {
    /// Discover the images under `source` and pair each with its
    /// reference under `reference`.
    ///
    /// A `reference` file is used as-is for every source image; a
    /// `reference` directory is searched per image. Images without a
    /// reference are kept and simply not scored.
    ///
    /// # Errors
    ///
    /// Propagates [`image_paths`] failures.
    pub fn discover(source: &Path, reference: Option<&Path>) -> Result<Self, IoError> {
        let entries = image_paths(source)?
            .into_iter()
            .map(|path| {
                let paired = reference.and_then(|r| find_reference(&path, r));
                if reference.is_some() && paired.is_none() {
                    log::warn!("no reference found for {}", path.display());
                }
                (path, paired)
            })
            .collect();
        Ok(Self { entries })
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no image was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Source paths with their paired references, sorted by source.
    #[must_use]
    pub fn entries(&self) -> &[(PathBuf, Option<PathBuf>)] {
        &self.entries
    }

    /// Decode every image and reference.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Read`] for the first file that fails to decode.
    pub fn load(&self) -> Result<Vec<DatasetItem>, IoError> {
        self.entries
            .iter()
            .map(|(path, reference)| {
                Ok(DatasetItem {
                    name: item_name(path),
                    image: read_image(path)?,
                    reference: reference.as_deref().map(read_image).transpose()?,
                })
            })
            .collect()
    }
}

/// File name of `path`, used as the item identifier.
#[must_use]
pub fn item_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

fn find_reference(source: &Path, reference: &Path) -> Option<PathBuf> {
    if reference.is_file() {
        return Some(reference.to_path_buf());
    }
    let exact = reference.join(source.file_name()?);
    if exact.is_file() {
        return Some(exact);
    }
    let stem = source.file_stem()?;
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| {
            let mut name = stem.to_os_string();
            name.push(".");
            name.push(ext);
            reference.join(name)
        })
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use restora_pipeline::{DynamicImage, GrayImage};

    use super::*;
    use crate::raster::write_png;

    fn touch_image(path: &Path) {
        write_png(path, &DynamicImage::ImageLuma8(GrayImage::new(2, 2))).unwrap();
    }

    #[test]
    fn listing_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch_image(&dir.path().join("b.png"));
        touch_image(&dir.path().join("a.png"));
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let names: Vec<String> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| item_name(p))
            .collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }

    #[test]
    fn single_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.png");
        touch_image(&file);
        assert_eq!(image_paths(&file).unwrap(), vec![file]);
    }

    #[test]
    fn non_image_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(image_paths(&file), Err(IoError::NotAnImage(_))));
    }

    #[test]
    fn references_pair_by_name_then_stem() {
        let root = tempfile::tempdir().unwrap();
        let lq = root.path().join("lq");
        let hq = root.path().join("hq");
        std::fs::create_dir_all(&lq).unwrap();
        std::fs::create_dir_all(&hq).unwrap();
        for name in ["a.png", "b.png", "c.png"] {
            touch_image(&lq.join(name));
        }
        touch_image(&hq.join("a.png"));
        touch_image(&hq.join("b.bmp"));

        let dataset = Dataset::discover(&lq, Some(&hq)).unwrap();
        let refs: Vec<Option<String>> = dataset
            .entries()
            .iter()
            .map(|(_, r)| r.as_deref().map(item_name))
            .collect();
        assert_eq!(
            refs,
            vec![Some("a.png".to_owned()), Some("b.bmp".to_owned()), None]
        );

        let items = dataset.load().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items[0].reference.is_some());
        assert!(items[2].reference.is_none());
    }
}
