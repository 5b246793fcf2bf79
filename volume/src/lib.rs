//! Reconstruction of MR image volumes from their DICOM encodings.
//!
//! Two encodings are covered:
//!
//! - Siemens [`mosaic`] images,
//!   where all slices of a volume are tiled into a single 2D frame;
//! - [`multi_frame`] images of the Enhanced MR Image Storage SOP class,
//!   where frames are stacked along one flat axis
//!   and described by per-frame functional groups.
//!
//! Pixel data decoding is not done here:
//! both reconstructions take an already decoded pixel array
//! alongside the DICOM object holding its attributes.
//!
//! # Example
//!
//! ```no_run
//! # use std::error::Error;
//! use dicom_object::open_file;
//! use dicom_volume::mosaic::{is_mosaic, MosaicGeometry};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn Error>> {
//! let obj = open_file("mosaic.dcm")?;
//! if is_mosaic(&obj) {
//!     let geometry = MosaicGeometry::from_object(&obj)?;
//!     # let pixels = Array2::<u16>::zeros((768, 768));
//!     let volume = geometry.fold(pixels.view())?;
//!     println!("volume shape: {:?}", volume.dim());
//! }
//! #   Ok(())
//! # }
//! ```
use std::fmt;

pub mod attribute;
pub mod mosaic;
pub mod multi_frame;
pub mod siemens;

pub use mosaic::MosaicGeometry;
pub use multi_frame::MultiFrame;

/// The broad category of a reconstruction error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input lacks information required by the reconstruction,
    /// or describes a layout which is not supported.
    Geometry,
    /// The input describes itself in contradictory ways.
    Consistency,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Geometry => f.write_str("geometry"),
            ErrorKind::Consistency => f.write_str("consistency"),
        }
    }
}
