//! Enhanced MR multi-frame images.
//!
//! An enhanced multi-frame object stores all frames of an acquisition
//! one after the other,
//! and describes each of them with an item of the
//! Per-frame Functional Groups Sequence.
//! The Dimension Index Values of each frame,
//! along with the Dimension Index Sequence naming what they index,
//! give the position of the frame in the N-D volume.
//!
//! Only single stack acquisitions are supported.
//! Some vendors append derived frames (such as isotropic diffusion images)
//! after the acquired ones;
//! these are detected and left out of the volume.
use crate::attribute::{self, GetAttributeError};
use crate::ErrorKind;
use dicom_core::{DataDictionary, Tag};
use dicom_dictionary_std::{tags, uids};
use dicom_object::InMemDicomObject;
use ndarray::{ArrayD, ArrayView3, IxDyn};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::collections::BTreeSet;
use tracing::debug;

mod functional_groups;

pub use functional_groups::FunctionalGroups;

/// The dimension index pointer to Stack ID,
/// which carries no shape information.
pub const STACK_ID_POINTER: Tag = tags::STACK_ID;
/// The dimension index pointer to Diffusion b-value,
/// which separates derived frames from acquired ones.
pub const DERIVED_VOLUME_POINTER: Tag = tags::DIFFUSION_B_VALUE;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Missing {} functional groups sequence", sequence))]
    MissingFunctionalGroups {
        sequence: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("All {} frames are derived frames", frames))]
    NoAcquiredFrames { frames: usize, backtrace: Backtrace },

    #[snafu(display("Missing frame content sequence for frame #{}", frame))]
    MissingContentSequence { frame: usize, backtrace: Backtrace },

    #[snafu(display("Missing dimension index values for frame #{}", frame))]
    MissingFrameIndex { frame: usize, backtrace: Backtrace },

    #[snafu(display("Missing stack ID for frame #{}", frame))]
    MissingStackId { frame: usize, backtrace: Backtrace },

    #[snafu(display(
        "Missing MR diffusion sequence for frame #{} of an object with derived frames",
        frame
    ))]
    MissingDiffusionSequence { frame: usize, backtrace: Backtrace },

    #[snafu(display("Multi-frame images with multiple stacks are not supported: {:?}", ids))]
    MultipleStackIds {
        ids: Vec<String>,
        backtrace: Backtrace,
    },

    #[snafu(display("Missing dimension index pointers"))]
    MissingDimensionIndexPointers { backtrace: Backtrace },

    #[snafu(display("Missing dimension index pointer to the derived volume b-value"))]
    MissingDerivedIndices { backtrace: Backtrace },

    #[snafu(display("Image shape is undetermined: missing rows or columns"))]
    ShapeUndetermined { backtrace: Backtrace },

    #[snafu(display("Missing image orientation (patient)"))]
    MissingImageOrientation { backtrace: Backtrace },

    #[snafu(display("Missing image position (patient)"))]
    MissingImagePosition { backtrace: Backtrace },

    #[snafu(display("Missing pixel spacing"))]
    MissingPixelSpacing { backtrace: Backtrace },

    #[snafu(display("Missing slice thickness"))]
    MissingSliceThickness { backtrace: Backtrace },

    #[snafu(display(
        "Ambiguous number of frames: {} declared, {} described by functional groups",
        declared,
        described
    ))]
    AmbiguousFrameCount {
        declared: u32,
        described: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Frame #{} has {} dimension index values, expected {}",
        frame,
        found,
        expected
    ))]
    FrameIndexLength {
        frame: usize,
        expected: usize,
        found: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Calculated shape does not match the number of frames: {} volumes of {} frames make {}, but there are {} frames",
        volumes,
        frames_per_volume,
        calculated,
        frames
    ))]
    ShapeMismatch {
        volumes: usize,
        frames_per_volume: usize,
        calculated: usize,
        frames: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Pixel array of shape {:?} does not fit {} frames of {}x{}",
        found,
        frames,
        rows,
        columns
    ))]
    PixelArrayShape {
        found: (usize, usize, usize),
        frames: usize,
        rows: usize,
        columns: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read multi-frame attribute"))]
    ReadAttribute {
        #[snafu(backtrace)]
        source: GetAttributeError,
    },
}

impl Error {
    /// Whether the object cannot be handled,
    /// or describes itself inconsistently.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AmbiguousFrameCount { .. }
            | Error::FrameIndexLength { .. }
            | Error::ShapeMismatch { .. }
            | Error::PixelArrayShape { .. } => ErrorKind::Consistency,
            _ => ErrorKind::Geometry,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether the DICOM object is an Enhanced MR Image.
pub fn is_multi_frame<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> bool {
    matches!(
        attribute::sop_class_uid(obj),
        Ok(Some(uid)) if uid == uids::ENHANCED_MR_IMAGE_STORAGE
    )
}

/// An enhanced multi-frame image, resolved into the shape of its volume.
#[derive(Debug)]
pub struct MultiFrame<'a, D: DataDictionary + Clone> {
    obj: &'a InMemDicomObject<D>,
    frames: Vec<FunctionalGroups<'a, D>>,
    shared: Option<FunctionalGroups<'a, D>>,
    has_derived_appendix: bool,
    stack_id: String,
    dimension_index_pointers: Vec<Tag>,
    frame_indices: Vec<Vec<u32>>,
    shape: Option<Vec<usize>>,
}

impl<'a, D: DataDictionary + Clone> MultiFrame<'a, D> {
    /// Read the functional groups of a multi-frame object
    /// and resolve the shape of its volume.
    pub fn new(obj: &'a InMemDicomObject<D>) -> Result<Self> {
        let items = attribute::sequence_items(obj, tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE)
            .filter(|items| !items.is_empty())
            .context(MissingFunctionalGroupsSnafu {
                sequence: "per-frame",
            })?;
        let shared = attribute::first_item(obj, tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE)
            .map(FunctionalGroups::shared);

        let first = FunctionalGroups::per_frame(&items[0], 0);
        let has_derived_appendix = first.has_appendix_flag();

        let mut frames = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let frame = FunctionalGroups::per_frame(item, i);
            if !frame.is_derived(has_derived_appendix)? {
                frames.push(frame);
            }
        }
        ensure!(
            !frames.is_empty(),
            NoAcquiredFramesSnafu {
                frames: items.len()
            }
        );
        if frames.len() != items.len() {
            debug!(
                "Removed {} derived frames out of {}",
                items.len() - frames.len(),
                items.len()
            );
        }

        let stack_id = single_stack_id(&frames)?;

        let n_frames = frames.len();
        if !has_derived_appendix {
            let declared = attribute::number_of_frames(obj).context(ReadAttributeSnafu)?;
            ensure!(
                declared as usize == n_frames,
                AmbiguousFrameCountSnafu {
                    declared,
                    described: n_frames,
                }
            );
        }

        let dimension_index_pointers = dimension_index_pointers(obj)?;
        let frame_indices = frame_indices(&frames, &dimension_index_pointers, has_derived_appendix)?;

        let mut multi_frame = MultiFrame {
            obj,
            frames,
            shared,
            has_derived_appendix,
            stack_id,
            dimension_index_pointers,
            frame_indices,
            shape: None,
        };
        multi_frame.shape = multi_frame.calculate_shape()?;
        Ok(multi_frame)
    }

    /// The number of frames in the volume,
    /// derived frames excluded.
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// The functional groups of the frames in the volume.
    pub fn frames(&self) -> &[FunctionalGroups<'a, D>] {
        &self.frames
    }

    /// The shared functional groups, if present.
    pub fn shared(&self) -> Option<FunctionalGroups<'a, D>> {
        self.shared
    }

    /// Whether derived frames were appended to the acquired ones.
    pub fn has_derived_appendix(&self) -> bool {
        self.has_derived_appendix
    }

    /// The Stack ID shared by all frames.
    pub fn stack_id(&self) -> &str {
        &self.stack_id
    }

    /// The Dimension Index Pointers declared by the object.
    pub fn dimension_index_pointers(&self) -> &[Tag] {
        &self.dimension_index_pointers
    }

    /// The dimension index values of each frame,
    /// without the columns for the stack ID and the derived volume flag.
    pub fn frame_indices(&self) -> &[Vec<u32>] {
        &self.frame_indices
    }

    /// The shape of the volume:
    /// rows, columns, then one dimension per remaining frame index.
    ///
    /// `None` if the rows or columns are unknown.
    pub fn image_shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    fn calculate_shape(&self) -> Result<Option<Vec<usize>>> {
        let (rows, columns) = match attribute::rows_and_cols(self.obj).context(ReadAttributeSnafu)? {
            Some((rows, columns)) => (usize::from(rows), usize::from(columns)),
            None => return Ok(None),
        };
        let n_columns = self.frame_indices.first().map_or(0, Vec::len);
        if n_columns < 2 {
            return Ok(Some(vec![rows, columns, self.n_frames()]));
        }

        let mut shape = vec![rows, columns];
        shape.extend((0..n_columns).map(|column| {
            self.frame_indices
                .iter()
                .map(|index| index[column])
                .collect::<BTreeSet<_>>()
                .len()
        }));

        let frames_per_volume = shape[2];
        let volumes = shape[3..]
            .iter()
            .try_fold(1_usize, |product, &len| product.checked_mul(len));
        let calculated = volumes.and_then(|volumes| volumes.checked_mul(frames_per_volume));
        match (volumes, calculated) {
            (Some(_), Some(calculated)) if calculated == self.n_frames() => {}
            _ => {
                return ShapeMismatchSnafu {
                    volumes: volumes.unwrap_or(usize::MAX),
                    frames_per_volume,
                    calculated: calculated.unwrap_or(usize::MAX),
                    frames: self.n_frames(),
                }
                .fail()
            }
        }
        Ok(Some(shape))
    }

    fn plane_orientation(&self) -> Option<&'a InMemDicomObject<D>> {
        self.shared
            .and_then(|shared| shared.plane_orientation())
            .or_else(|| self.frames[0].plane_orientation())
    }

    fn plane_position(&self) -> Option<&'a InMemDicomObject<D>> {
        self.shared
            .and_then(|shared| shared.plane_position())
            .or_else(|| self.frames[0].plane_position())
    }

    fn pixel_measures(&self) -> Option<&'a InMemDicomObject<D>> {
        self.shared
            .and_then(|shared| shared.pixel_measures())
            .or_else(|| self.frames[0].pixel_measures())
    }

    /// The Image Orientation (Patient) as a 3×2 matrix,
    /// the row direction cosines in the first column
    /// and the column direction cosines in the second.
    ///
    /// Read from the shared functional groups,
    /// or from the first frame's.
    pub fn image_orientation(&self) -> Result<[[f64; 2]; 3]> {
        let orientation = self
            .plane_orientation()
            .map(attribute::image_orientation_patient)
            .transpose()
            .context(ReadAttributeSnafu)?
            .flatten()
            .context(MissingImageOrientationSnafu)?;
        Ok([
            [orientation[0], orientation[3]],
            [orientation[1], orientation[4]],
            [orientation[2], orientation[5]],
        ])
    }

    /// The Image Position (Patient),
    /// read from the shared functional groups or from the first frame's.
    pub fn image_position(&self) -> Result<[f64; 3]> {
        self.plane_position()
            .map(attribute::image_position_patient)
            .transpose()
            .context(ReadAttributeSnafu)?
            .flatten()
            .context(MissingImagePositionSnafu)
    }

    /// The voxel sizes: pixel spacing, then slice thickness.
    ///
    /// The slice thickness falls back to the object's Spacing Between Slices.
    pub fn voxel_sizes(&self) -> Result<[f64; 3]> {
        let measures = self.pixel_measures();
        let spacing = measures
            .map(attribute::pixel_spacing)
            .transpose()
            .context(ReadAttributeSnafu)?
            .flatten()
            .context(MissingPixelSpacingSnafu)?;
        let thickness = match measures
            .map(attribute::slice_thickness)
            .transpose()
            .context(ReadAttributeSnafu)?
            .flatten()
        {
            Some(thickness) => thickness,
            None => attribute::spacing_between_slices(self.obj)
                .context(ReadAttributeSnafu)?
                .context(MissingSliceThicknessSnafu)?,
        };
        Ok([spacing[0], spacing[1], thickness])
    }

    /// The rescale slope and intercept.
    ///
    /// Read from the first frame's Pixel Value Transformation Sequence,
    /// falling back to the object's Rescale Slope and Rescale Intercept.
    pub fn scaling(&self) -> (f64, f64) {
        let transformation = self.frames[0].pixel_value_transformation();
        let slope = transformation
            .and_then(|t| t.element(tags::RESCALE_SLOPE).ok())
            .and_then(|e| e.to_float64().ok());
        let intercept = transformation
            .and_then(|t| t.element(tags::RESCALE_INTERCEPT).ok())
            .and_then(|e| e.to_float64().ok());
        match (slope, intercept) {
            (Some(slope), Some(intercept)) => (slope, intercept),
            _ => (
                attribute::rescale_slope(self.obj),
                attribute::rescale_intercept(self.obj),
            ),
        }
    }

    /// Rearrange decoded frames into the volume.
    ///
    /// `pixels` holds every frame of the object in storage order,
    /// derived ones included, with shape (frames, rows, columns).
    /// The result has the shape of [`image_shape`](Self::image_shape),
    /// with the frames laid out so that the first frame dimension varies fastest.
    pub fn reconstruct<A: Clone>(&self, pixels: ArrayView3<'_, A>) -> Result<ArrayD<A>> {
        let shape = self.shape.as_deref().context(ShapeUndeterminedSnafu)?;
        let (rows, columns) = (shape[0], shape[1]);
        let positions: Vec<usize> = self
            .frames
            .iter()
            .map(|frame| frame.frame().unwrap_or_default())
            .collect();
        let found = pixels.dim();
        let needed = positions.last().map_or(0, |&p| p + 1);
        ensure!(
            found.0 >= needed && found.1 == rows && found.2 == columns,
            PixelArrayShapeSnafu {
                found,
                frames: needed,
                rows,
                columns,
            }
        );

        Ok(ArrayD::from_shape_fn(IxDyn(shape), |index| {
            let mut frame = 0;
            let mut stride = 1;
            for (axis, &len) in shape.iter().enumerate().skip(2) {
                frame += index[axis] * stride;
                stride *= len;
            }
            pixels[[positions[frame], index[0], index[1]]].clone()
        }))
    }
}

fn single_stack_id<D: DataDictionary + Clone>(frames: &[FunctionalGroups<'_, D>]) -> Result<String> {
    let mut ids = Vec::new();
    for frame in frames {
        let id = frame.stack_id()?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ensure!(ids.len() <= 1, MultipleStackIdsSnafu { ids: ids.clone() });
    ids.pop().context(MissingStackIdSnafu { frame: 0_usize })
}

fn dimension_index_pointers<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> Result<Vec<Tag>> {
    let dimensions = attribute::sequence_items(obj, tags::DIMENSION_INDEX_SEQUENCE)
        .context(MissingDimensionIndexPointersSnafu)?;
    dimensions
        .iter()
        .map(|dimension| {
            attribute::attribute_tag(dimension, tags::DIMENSION_INDEX_POINTER)
                .context(MissingDimensionIndexPointersSnafu)
        })
        .collect()
}

/// Collect the dimension index values of each frame,
/// removing the columns which do not contribute to the volume shape.
fn frame_indices<D: DataDictionary + Clone>(
    frames: &[FunctionalGroups<'_, D>],
    pointers: &[Tag],
    has_derived_appendix: bool,
) -> Result<Vec<Vec<u32>>> {
    let mut pointers = pointers.to_vec();
    let mut indices = Vec::with_capacity(frames.len());
    for frame in frames {
        let values = frame.dimension_index_values()?;
        ensure!(
            values.len() == pointers.len(),
            FrameIndexLengthSnafu {
                frame: frame.frame().unwrap_or_default(),
                expected: pointers.len(),
                found: values.len(),
            }
        );
        indices.push(values);
    }

    let mut remove_column = |pointer: Tag| -> bool {
        match pointers.iter().position(|&p| p == pointer) {
            Some(column) => {
                pointers.remove(column);
                for index in &mut indices {
                    index.remove(column);
                }
                true
            }
            None => false,
        }
    };
    remove_column(STACK_ID_POINTER);
    if has_derived_appendix {
        ensure!(
            remove_column(DERIVED_VOLUME_POINTER),
            MissingDerivedIndicesSnafu
        );
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::value::{DataSetSequence, PrimitiveValue};
    use dicom_core::{DataElement, Length, VR};
    use dicom_object::mem::InMemElement;
    use ndarray::Array3;

    fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> InMemElement {
        DataElement::new(tag, VR::SQ, DataSetSequence::new(items, Length::UNDEFINED))
    }

    fn frame(stack_id: &str, index: &[u32], directionality: Option<&str>) -> InMemDicomObject {
        let content = InMemDicomObject::from_element_iter([
            DataElement::new(tags::STACK_ID, VR::SH, PrimitiveValue::from(stack_id)),
            DataElement::new(
                tags::DIMENSION_INDEX_VALUES,
                VR::UL,
                PrimitiveValue::U32(index.to_vec().into()),
            ),
        ]);
        let mut groups = vec![sequence(tags::FRAME_CONTENT_SEQUENCE, vec![content])];
        if let Some(directionality) = directionality {
            let diffusion = InMemDicomObject::from_element_iter([DataElement::new(
                tags::DIFFUSION_DIRECTIONALITY,
                VR::CS,
                PrimitiveValue::from(directionality),
            )]);
            groups.push(sequence(tags::MR_DIFFUSION_SEQUENCE, vec![diffusion]));
        }
        InMemDicomObject::from_element_iter(groups)
    }

    fn object(
        frames: Vec<InMemDicomObject>,
        pointers: &[Tag],
        number_of_frames: usize,
    ) -> InMemDicomObject {
        let dimensions = pointers
            .iter()
            .map(|&pointer| {
                InMemDicomObject::from_element_iter([DataElement::new(
                    tags::DIMENSION_INDEX_POINTER,
                    VR::AT,
                    PrimitiveValue::Tags(vec![pointer].into()),
                )])
            })
            .collect();
        InMemDicomObject::from_element_iter([
            DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(uids::ENHANCED_MR_IMAGE_STORAGE),
            ),
            DataElement::new(tags::ROWS, VR::US, PrimitiveValue::U16(vec![2].into())),
            DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::U16(vec![2].into())),
            DataElement::new(
                tags::NUMBER_OF_FRAMES,
                VR::IS,
                PrimitiveValue::from(number_of_frames.to_string()),
            ),
            sequence(tags::DIMENSION_INDEX_SEQUENCE, dimensions),
            sequence(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE, frames),
        ])
    }

    fn pixels(n_frames: usize) -> Array3<u32> {
        Array3::from_shape_fn((n_frames, 2, 2), |(f, i, j)| (f * 100 + i * 10 + j) as u32)
    }

    #[test]
    fn single_volume() {
        let frames = (1..=3).map(|z| frame("1", &[1, z], None)).collect();
        let obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 3);
        assert!(is_multi_frame(&obj));

        let multi_frame = MultiFrame::new(&obj).unwrap();
        assert_eq!(multi_frame.stack_id(), "1");
        assert!(!multi_frame.has_derived_appendix());
        assert_eq!(multi_frame.frame_indices(), &[vec![1], vec![2], vec![3]]);
        assert_eq!(multi_frame.image_shape(), Some(&[2, 2, 3][..]));

        let pixels = pixels(3);
        let volume = multi_frame.reconstruct(pixels.view()).unwrap();
        assert_eq!(volume.shape(), &[2, 2, 3]);
        assert_eq!(volume[[1, 0, 2]], pixels[[2, 1, 0]]);
    }

    #[test]
    fn time_series() {
        let mut frames = Vec::new();
        for t in 1..=2 {
            for z in 1..=3 {
                frames.push(frame("1", &[1, z, t], None));
            }
        }
        let obj = object(
            frames,
            &[
                STACK_ID_POINTER,
                tags::IN_STACK_POSITION_NUMBER,
                tags::TEMPORAL_POSITION_INDEX,
            ],
            6,
        );
        let multi_frame = MultiFrame::new(&obj).unwrap();
        assert_eq!(multi_frame.image_shape(), Some(&[2, 2, 3, 2][..]));

        let pixels = pixels(6);
        let volume = multi_frame.reconstruct(pixels.view()).unwrap();
        for z in 0..3 {
            for t in 0..2 {
                assert_eq!(volume[[0, 1, z, t]], pixels[[z + 3 * t, 0, 1]]);
            }
        }
    }

    #[test]
    fn multiple_stacks_are_rejected_first() {
        let frames = vec![frame("1", &[1, 1], None), frame("2", &[2, 1], None)];
        // the frame count is inconsistent as well
        let obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 9);
        let err = MultiFrame::new(&obj).unwrap_err();
        assert!(matches!(err, Error::MultipleStackIds { ref ids, .. } if ids.len() == 2));
        assert_eq!(err.kind(), ErrorKind::Geometry);
    }

    #[test]
    fn declared_frame_count_must_match() {
        let frames = (1..=3).map(|z| frame("1", &[1, z], None)).collect();
        let obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 4);
        let err = MultiFrame::new(&obj).unwrap_err();
        assert!(matches!(
            err,
            Error::AmbiguousFrameCount {
                declared: 4,
                described: 3,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn shape_must_account_for_all_frames() {
        let indices = [[1, 1], [1, 2], [1, 3], [2, 1], [2, 2]];
        let frames = indices.iter().map(|index| frame("1", index, None)).collect();
        let obj = object(
            frames,
            &[tags::IN_STACK_POSITION_NUMBER, tags::TEMPORAL_POSITION_INDEX],
            5,
        );
        let err = MultiFrame::new(&obj).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                volumes: 3,
                frames_per_volume: 2,
                calculated: 6,
                frames: 5,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn oversized_shape_is_a_mismatch() {
        // 100 distinct values in each of 10 index columns
        let pointers: Vec<Tag> = std::iter::once(STACK_ID_POINTER)
            .chain((0..10).map(|i| Tag(0x0021, 0x1000 + i)))
            .collect();
        let frames = (0..100)
            .map(|f| {
                let mut index = vec![1];
                index.extend(std::iter::repeat(f).take(10));
                frame("1", &index, None)
            })
            .collect();
        let obj = object(frames, &pointers, 100);
        let err = MultiFrame::new(&obj).unwrap_err();
        assert!(matches!(
            err,
            Error::ShapeMismatch {
                frames_per_volume: 100,
                calculated: usize::MAX,
                frames: 100,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn derived_frames_are_removed() {
        let pointers = [
            STACK_ID_POINTER,
            tags::IN_STACK_POSITION_NUMBER,
            DERIVED_VOLUME_POINTER,
        ];
        let frames = vec![
            frame("1", &[1, 1, 1], Some("DIRECTIONAL")),
            frame("1", &[1, 1, 2], Some("ISOTROPIC")),
            frame("1", &[1, 2, 1], Some("DIRECTIONAL")),
            frame("1", &[1, 2, 2], Some("ISOTROPIC")),
        ];
        // the declared frame count includes the derived frames
        let obj = object(frames, &pointers, 4);
        let multi_frame = MultiFrame::new(&obj).unwrap();
        assert!(multi_frame.has_derived_appendix());
        assert_eq!(multi_frame.n_frames(), 2);
        assert_eq!(multi_frame.frame_indices(), &[vec![1], vec![2]]);
        assert_eq!(multi_frame.image_shape(), Some(&[2, 2, 2][..]));

        let pixels = pixels(4);
        let volume = multi_frame.reconstruct(pixels.view()).unwrap();
        assert_eq!(volume[[1, 1, 0]], pixels[[0, 1, 1]]);
        assert_eq!(volume[[1, 1, 1]], pixels[[2, 1, 1]]);
    }

    #[test]
    fn derived_frames_need_their_index() {
        let frames = vec![
            frame("1", &[1, 1], Some("DIRECTIONAL")),
            frame("1", &[1, 2], Some("DIRECTIONAL")),
        ];
        let obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 2);
        assert!(matches!(
            MultiFrame::new(&obj),
            Err(Error::MissingDerivedIndices { .. })
        ));

        let frames = vec![frame("1", &[1, 1, 1], Some("DIRECTIONAL")), frame("1", &[1, 2, 1], None)];
        let obj = object(
            frames,
            &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER, DERIVED_VOLUME_POINTER],
            2,
        );
        assert!(matches!(
            MultiFrame::new(&obj),
            Err(Error::MissingDiffusionSequence { frame: 1, .. })
        ));
    }

    #[test]
    fn undetermined_shape() {
        let frames = (1..=2).map(|z| frame("1", &[1, z], None)).collect();
        let mut obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 2);
        obj.remove_element(tags::ROWS);
        let multi_frame = MultiFrame::new(&obj).unwrap();
        assert_eq!(multi_frame.image_shape(), None);
        assert!(matches!(
            multi_frame.reconstruct(pixels(2).view()),
            Err(Error::ShapeUndetermined { .. })
        ));
    }

    #[test]
    fn pixel_array_must_fit() {
        let frames = (1..=3).map(|z| frame("1", &[1, z], None)).collect();
        let obj = object(frames, &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER], 3);
        let multi_frame = MultiFrame::new(&obj).unwrap();
        let err = multi_frame.reconstruct(pixels(2).view()).unwrap_err();
        assert!(matches!(err, Error::PixelArrayShape { frames: 3, .. }));
    }

    #[test]
    fn geometry() {
        let shared = InMemDicomObject::from_element_iter([
            sequence(
                tags::PLANE_ORIENTATION_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([DataElement::new(
                    tags::IMAGE_ORIENTATION_PATIENT,
                    VR::FD,
                    PrimitiveValue::F64(vec![1., 0., 0., 0., 0., -1.].into()),
                )])],
            ),
            sequence(
                tags::PIXEL_MEASURES_SEQUENCE,
                vec![InMemDicomObject::from_element_iter([DataElement::new(
                    tags::PIXEL_SPACING,
                    VR::FD,
                    PrimitiveValue::F64(vec![0.625, 0.625].into()),
                )])],
            ),
        ]);
        let mut first = frame("1", &[1, 1], None);
        first.put(sequence(
            tags::PLANE_POSITION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([DataElement::new(
                tags::IMAGE_POSITION_PATIENT,
                VR::FD,
                PrimitiveValue::F64(vec![-163.2, 93.3, 195.8].into()),
            )])],
        ));
        first.put(sequence(
            tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE,
            vec![InMemDicomObject::from_element_iter([
                DataElement::new(tags::RESCALE_SLOPE, VR::FD, PrimitiveValue::F64(vec![2.].into())),
                DataElement::new(
                    tags::RESCALE_INTERCEPT,
                    VR::FD,
                    PrimitiveValue::F64(vec![-1.].into()),
                ),
            ])],
        ));
        let mut obj = object(
            vec![first, frame("1", &[1, 2], None)],
            &[STACK_ID_POINTER, tags::IN_STACK_POSITION_NUMBER],
            2,
        );
        obj.put(sequence(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE, vec![shared]));

        {
            let multi_frame = MultiFrame::new(&obj).unwrap();
            assert_eq!(
                multi_frame.image_orientation().unwrap(),
                [[1., 0.], [0., 0.], [0., -1.]]
            );
            assert_eq!(multi_frame.image_position().unwrap(), [-163.2, 93.3, 195.8]);
            assert_eq!(multi_frame.scaling(), (2., -1.));
            assert!(matches!(
                multi_frame.voxel_sizes(),
                Err(Error::MissingSliceThickness { .. })
            ));
        }

        obj.put(DataElement::new(
            tags::SPACING_BETWEEN_SLICES,
            VR::FD,
            PrimitiveValue::F64(vec![3.].into()),
        ));
        let multi_frame = MultiFrame::new(&obj).unwrap();
        assert_eq!(multi_frame.voxel_sizes().unwrap(), [0.625, 0.625, 3.]);
    }
}
