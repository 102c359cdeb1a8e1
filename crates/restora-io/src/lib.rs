//! restora-io: filesystem side of restora.
//!
//! Loads datasets, locates model weights, runs out-of-process
//! restoration programs, and writes restored images with their run log.
//! All image processing lives in `restora-pipeline`.

pub mod dataset;
pub mod error;
pub mod external;
pub mod raster;
pub mod reporter;
pub mod zoo;

pub use dataset::Dataset;
pub use error::IoError;
pub use external::{ExternalCommand, ExternalStage};
pub use raster::{read_image, write_png};
pub use reporter::DirectoryReporter;
pub use zoo::ModelZoo;
