//! Error type for filesystem operations.

use std::path::PathBuf;

/// Failure to read or write something on disk. Every variant names the
/// offending path.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// An image could not be opened or decoded.
    #[error("failed to read image {}: {source}", path.display())]
    Read {
        /// Image path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// An image could not be encoded or written.
    #[error("failed to write image {}: {source}", path.display())]
    Write {
        /// Image path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: image::ImageError,
    },

    /// A text artifact such as the run log could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteFile {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An output directory could not be created.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A dataset directory could not be listed.
    #[error("failed to list directory {}: {source}", path.display())]
    ReadDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Two dataset items would write the same output file, as `a.png`
    /// and `a.jpg` do.
    #[error("{} from {item} would overwrite the output of {earlier}", path.display())]
    NameCollision {
        /// Output path.
        path: PathBuf,
        /// Item that wrote the file first.
        earlier: String,
        /// Item that would overwrite it.
        item: String,
    },

    /// The path is neither a directory nor a supported image file.
    #[error("{} is not an image file or directory", .0.display())]
    NotAnImage(PathBuf),
}
