//! Reading and writing images on disk.

use std::path::Path;

use image::ImageFormat;
use restora_pipeline::DynamicImage;

use crate::error::IoError;

/// File extensions treated as dataset images, compared case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Returns `true` if `path` has one of [`IMAGE_EXTENSIONS`].
#[must_use]
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

/// Decode the image at `path`.
///
/// # Errors
///
/// Returns [`IoError::Read`] if the file cannot be opened or decoded.
pub fn read_image(path: &Path) -> Result<DynamicImage, IoError> {
    image::open(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Encode `image` as PNG at `path`, whatever the path's extension.
///
/// # Errors
///
/// Returns [`IoError::Write`] if encoding or writing fails.
pub fn write_png(path: &Path, image: &DynamicImage) -> Result<(), IoError> {
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| IoError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use restora_pipeline::RgbImage;

    use super::*;

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert!(is_image_path(Path::new("a/b.PNG")));
        assert!(is_image_path(Path::new("b.jpeg")));
        assert!(!is_image_path(Path::new("notes.txt")));
        assert!(!is_image_path(Path::new("no_extension")));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(5, 3, |x, y| {
            image::Rgb([(x * 40) as u8, (y * 70) as u8, 9])
        }));
        write_png(&path, &img).unwrap();
        let back = read_image(&path).unwrap();
        assert_eq!(back.to_rgb8().as_raw(), img.to_rgb8().as_raw());
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = read_image(Path::new("/nonexistent/restora.png")).unwrap_err();
        assert!(matches!(err, IoError::Read { ref path, .. } if path.ends_with("restora.png")));
    }
}
