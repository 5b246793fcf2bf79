//! Siemens mosaic images.
//!
//! A mosaic stores every slice of a volume as a tile
//! in a single 2D image, laid out row by row
//! on the smallest square grid which fits them all.
//! Unused grid cells at the end are left blank.
//!
//! [`MosaicGeometry`] describes the layout
//! and [`MosaicGeometry::fold`] cuts the tiles back out into a 3D volume.
use crate::attribute::{self, GetAttributeError};
use crate::siemens;
use crate::ErrorKind;
use dicom_core::DataDictionary;
use dicom_csa::{AscconvNode, CsaHeader};
use dicom_object::InMemDicomObject;
use ndarray::{s, Array3, ArrayView2, Axis};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::convert::TryFrom;
use tracing::{debug, warn};

/// The CSA image header element holding the tile count.
const TILE_COUNT_ELEMENT: &str = "NumberOfImagesInMosaic";
/// The protocol entry describing the slice stack.
const SLICE_ARRAY_KEY: &str = "sSliceArray";
/// Present in the slice array only when slices were acquired in ascending order.
const ASCENDING_KEY: &str = "anAsc";
const SLICE_COUNT_KEY: &str = "lSize";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Number of images in mosaic is missing"))]
    MissingTileCount { backtrace: Backtrace },

    #[snafu(display("Invalid number of images in mosaic `{}`", value))]
    InvalidTileCount { value: String, backtrace: Backtrace },

    #[snafu(display("Mosaic shape is undetermined: missing rows or columns"))]
    ShapeUndetermined { backtrace: Backtrace },

    #[snafu(display(
        "Mosaic of {}x{} pixels cannot hold a {}x{} grid of images",
        rows,
        columns,
        grid_size,
        grid_size
    ))]
    GridTooLarge {
        rows: usize,
        columns: usize,
        grid_size: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Pixel array of shape {:?} is smaller than the mosaic shape {:?}",
        found,
        expected
    ))]
    PixelArrayShape {
        expected: (usize, usize),
        found: (usize, usize),
        backtrace: Backtrace,
    },

    #[snafu(display("Could not stack mosaic tiles"))]
    StackTiles {
        source: ndarray::ShapeError,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read mosaic attribute"))]
    ReadAttribute {
        #[snafu(backtrace)]
        source: GetAttributeError,
    },

    #[snafu(display("Could not read Siemens private attribute"))]
    ReadSiemens {
        #[snafu(backtrace)]
        source: siemens::Error,
    },
}

impl Error {
    /// Whether the mosaic cannot be handled,
    /// or describes itself inconsistently.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidTileCount { .. }
            | Error::GridTooLarge { .. }
            | Error::PixelArrayShape { .. }
            | Error::StackTiles { .. } => ErrorKind::Consistency,
            _ => ErrorKind::Geometry,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether the DICOM object's Image Type marks it as a mosaic.
pub fn is_mosaic<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> bool {
    match attribute::image_type(obj) {
        Ok(Some(values)) => values.iter().any(|v| v == "MOSAIC"),
        _ => false,
    }
}

/// The layout of the images in a mosaic.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicGeometry {
    /// Rows and columns of the whole mosaic.
    shape: Option<(usize, usize)>,
    tile_count: usize,
    ascending: bool,
    slice_count: Option<usize>,
}

impl MosaicGeometry {
    /// Describe a mosaic of `tile_count` images.
    ///
    /// `shape` holds the rows and columns of the whole mosaic,
    /// if known.
    /// The tile count must be positive
    /// and, with a known shape, no larger than its number of pixels.
    pub fn new(shape: Option<(usize, usize)>, tile_count: usize, ascending: bool) -> Result<Self> {
        let fits = shape.map_or(true, |(rows, columns)| {
            rows.checked_mul(columns)
                .map_or(true, |pixels| tile_count <= pixels)
        });
        ensure!(
            tile_count > 0 && fits,
            InvalidTileCountSnafu {
                value: tile_count.to_string()
            }
        );
        Ok(MosaicGeometry {
            shape,
            tile_count,
            ascending,
            slice_count: None,
        })
    }

    /// Attach the number of slices declared in the protocol.
    pub fn with_slice_count(mut self, slice_count: usize) -> Self {
        self.slice_count = Some(slice_count);
        self
    }

    /// Read the mosaic layout from a DICOM object.
    ///
    /// The tile count comes from Number Of Images In Mosaic (0019,100A),
    /// or from the CSA image header if that element is missing.
    /// The slice order and count come from the protocol
    /// in the CSA series header.
    pub fn from_object<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> Result<Self> {
        let shape = attribute::rows_and_cols(obj)
            .context(ReadAttributeSnafu)?
            .map(|(rows, cols)| (usize::from(rows), usize::from(cols)));

        let tile_count = match siemens::read_number_of_images_in_mosaic(obj)
            .context(ReadSiemensSnafu)?
        {
            Some(count) => count,
            None => {
                let header = siemens::csa_image_header(obj).context(ReadSiemensSnafu)?;
                tile_count_from_csa(header.as_ref())?
            }
        };
        let tile_count = usize::try_from(tile_count)
            .ok()
            .context(InvalidTileCountSnafu {
                value: tile_count.to_string(),
            })?;

        let series = siemens::csa_series_header(obj).context(ReadSiemensSnafu)?;
        let slice_array = series
            .as_ref()
            .and_then(CsaHeader::protocol)
            .and_then(|protocol| protocol.root().get(SLICE_ARRAY_KEY))
            .and_then(AscconvNode::as_map);
        let ascending = slice_array.map_or(false, |array| array.contains_key(ASCENDING_KEY));
        if slice_array.is_none() {
            debug!("No slice array in protocol, assuming descending slice order");
        }

        let mut geometry = MosaicGeometry::new(shape, tile_count, ascending)?;
        if let Some(n) = slice_array
            .and_then(|array| array.get(SLICE_COUNT_KEY))
            .and_then(AscconvNode::as_int)
            .and_then(|n| usize::try_from(n).ok())
        {
            if n != tile_count {
                debug!(
                    "Protocol declares {} slices for {} images in mosaic",
                    n, tile_count
                );
            }
            geometry = geometry.with_slice_count(n);
        }
        Ok(geometry)
    }

    /// The number of images in the mosaic.
    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Whether slices were acquired in ascending order.
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    /// The number of slices declared in the protocol, if known.
    pub fn slice_count(&self) -> Option<usize> {
        self.slice_count
    }

    /// Rows and columns of the whole mosaic, if known.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.shape
    }

    /// The number of tiles along each side of the grid.
    pub fn grid_size(&self) -> usize {
        let mut size = (self.tile_count as f64).sqrt().ceil() as usize;
        // guard against rounding on either side of a perfect square
        while size
            .checked_mul(size)
            .map_or(false, |square| square < self.tile_count)
        {
            size += 1;
        }
        while size > 1
            && (size - 1)
                .checked_mul(size - 1)
                .map_or(false, |square| square >= self.tile_count)
        {
            size -= 1;
        }
        size
    }

    /// Rows and columns of a single tile.
    pub fn tile_shape(&self) -> Result<(usize, usize)> {
        let (rows, columns) = self.shape.context(ShapeUndeterminedSnafu)?;
        let grid_size = self.grid_size();
        let tile = (rows / grid_size, columns / grid_size);
        ensure!(
            tile.0 > 0 && tile.1 > 0,
            GridTooLargeSnafu {
                rows,
                columns,
                grid_size,
            }
        );
        Ok(tile)
    }

    /// The shape of the folded volume.
    ///
    /// Tiles are transposed when folded,
    /// so the first axis runs along a tile's columns.
    pub fn volume_shape(&self) -> Result<(usize, usize, usize)> {
        let (rows, columns) = self.tile_shape()?;
        Ok((columns, rows, self.tile_count))
    }

    /// Cut the tiles out of a mosaic and stack them into a volume,
    /// slices along the last axis.
    ///
    /// The tiles are taken row by row,
    /// reversed if slices were acquired in descending order,
    /// then transposed and mirrored along the second axis
    /// to match the patient coordinate system.
    pub fn fold<A: Clone>(&self, mosaic: ArrayView2<'_, A>) -> Result<Array3<A>> {
        let (rows, columns) = self.shape.context(ShapeUndeterminedSnafu)?;
        let found = mosaic.dim();
        ensure!(
            found.0 >= rows && found.1 >= columns,
            PixelArrayShapeSnafu {
                expected: (rows, columns),
                found,
            }
        );
        if found != (rows, columns) {
            warn!(
                "Pixel array of shape {:?} is larger than the mosaic shape {:?}",
                found,
                (rows, columns)
            );
        }

        let (tile_rows, tile_cols) = self.tile_shape()?;
        let grid_size = self.grid_size();
        let mut tiles: Vec<_> = (0..grid_size)
            .flat_map(|i| (0..grid_size).map(move |j| (i, j)))
            .take(self.tile_count)
            .map(|(i, j)| {
                mosaic.slice(s![
                    i * tile_rows..(i + 1) * tile_rows,
                    j * tile_cols..(j + 1) * tile_cols
                ])
            })
            .collect();
        if !self.ascending {
            tiles.reverse();
        }

        let volume = ndarray::stack(Axis(2), &tiles).context(StackTilesSnafu)?;
        let mut volume = volume.permuted_axes([1, 0, 2]);
        volume.invert_axis(Axis(1));
        Ok(volume.as_standard_layout().into_owned())
    }

    /// Correct the Image Position (Patient) of a mosaic,
    /// which refers to the corner of the whole mosaic,
    /// to the position of the first slice.
    ///
    /// `orientation` is the Image Orientation (Patient)
    /// (row direction cosines, then column direction cosines),
    /// `pixel_spacing` the Pixel Spacing (row spacing, then column spacing).
    pub fn image_position(
        &self,
        position: [f64; 3],
        orientation: [f64; 6],
        pixel_spacing: [f64; 2],
    ) -> Result<[f64; 3]> {
        let (rows, columns) = self.shape.context(ShapeUndeterminedSnafu)?;
        let grid_size = self.grid_size() as f64;
        let mosaic_shape = [rows as f64, columns as f64];
        let offset = [
            (mosaic_shape[0] - mosaic_shape[0] / grid_size) / 2.,
            (mosaic_shape[1] - mosaic_shape[1] / grid_size) / 2.,
        ];

        let mut corrected = position;
        for (i, value) in corrected.iter_mut().enumerate() {
            // the direction matrix with its columns swapped
            let along_rows = orientation[i + 3] * pixel_spacing[0];
            let along_cols = orientation[i] * pixel_spacing[1];
            *value += along_rows * offset[0] + along_cols * offset[1];
        }
        Ok(corrected)
    }

    /// Read the position, orientation and pixel spacing from a DICOM object
    /// and correct the position with [`image_position`](Self::image_position).
    ///
    /// Returns `None` if any of these attributes is missing.
    pub fn image_position_from_object<D: DataDictionary + Clone>(
        &self,
        obj: &InMemDicomObject<D>,
    ) -> Result<Option<[f64; 3]>> {
        let position = attribute::image_position_patient(obj).context(ReadAttributeSnafu)?;
        let orientation = attribute::image_orientation_patient(obj).context(ReadAttributeSnafu)?;
        let spacing = attribute::pixel_spacing(obj).context(ReadAttributeSnafu)?;
        match (position, orientation, spacing) {
            (Some(position), Some(orientation), Some(spacing)) => {
                self.image_position(position, orientation, spacing).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn tile_count_from_csa(header: Option<&CsaHeader>) -> Result<u64> {
    let value = header
        .and_then(|header| header.get(TILE_COUNT_ELEMENT))
        .and_then(|element| element.first())
        .context(MissingTileCountSnafu)?;
    value
        .as_int()
        .and_then(|n| u64::try_from(n).ok())
        .context(InvalidTileCountSnafu {
            value: value.to_string(),
        })
}
