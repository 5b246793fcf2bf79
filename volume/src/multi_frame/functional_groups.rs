//! Access to the functional groups of a single frame,
//! or to the groups shared by all frames.
use super::{
    MissingContentSequenceSnafu, MissingDiffusionSequenceSnafu, MissingFrameIndexSnafu,
    MissingStackIdSnafu, ReadAttributeSnafu, Result,
};
use crate::attribute;
use dicom_core::DataDictionary;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use snafu::{OptionExt, ResultExt};

/// The Diffusion Directionality of frames derived from the acquisition,
/// such as trace-weighted images.
const DERIVED_DIRECTIONALITY: &str = "ISOTROPIC";

/// One item of a functional groups sequence.
#[derive(Debug)]
pub struct FunctionalGroups<'a, D: DataDictionary + Clone> {
    item: &'a InMemDicomObject<D>,
    /// Position of the frame in the per-frame sequence,
    /// `None` for the shared groups.
    frame: Option<usize>,
}

impl<'a, D: DataDictionary + Clone> Clone for FunctionalGroups<'a, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, D: DataDictionary + Clone> Copy for FunctionalGroups<'a, D> {}

impl<'a, D: DataDictionary + Clone> FunctionalGroups<'a, D> {
    pub fn per_frame(item: &'a InMemDicomObject<D>, frame: usize) -> Self {
        FunctionalGroups {
            item,
            frame: Some(frame),
        }
    }

    pub fn shared(item: &'a InMemDicomObject<D>) -> Self {
        FunctionalGroups { item, frame: None }
    }

    /// The underlying sequence item.
    pub fn item(&self) -> &'a InMemDicomObject<D> {
        self.item
    }

    /// The position of this frame in the per-frame sequence.
    pub fn frame(&self) -> Option<usize> {
        self.frame
    }

    fn frame_number(&self) -> usize {
        self.frame.unwrap_or_default()
    }

    /// Frame Content Sequence
    pub fn content(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::FRAME_CONTENT_SEQUENCE)
    }

    /// Pixel Measures Sequence
    pub fn pixel_measures(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::PIXEL_MEASURES_SEQUENCE)
    }

    /// Plane Orientation Sequence
    pub fn plane_orientation(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::PLANE_ORIENTATION_SEQUENCE)
    }

    /// Plane Position Sequence
    pub fn plane_position(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::PLANE_POSITION_SEQUENCE)
    }

    /// Pixel Value Transformation Sequence
    pub fn pixel_value_transformation(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::PIXEL_VALUE_TRANSFORMATION_SEQUENCE)
    }

    /// MR Diffusion Sequence
    pub fn diffusion(&self) -> Option<&'a InMemDicomObject<D>> {
        attribute::first_item(self.item, tags::MR_DIFFUSION_SEQUENCE)
    }

    /// Whether the groups carry an MR Diffusion Sequence,
    /// which flags derived frames appended after the acquired ones.
    pub fn has_appendix_flag(&self) -> bool {
        self.item.element(tags::MR_DIFFUSION_SEQUENCE).is_ok()
    }

    /// The Dimension Index Values of this frame.
    pub fn dimension_index_values(&self) -> Result<Vec<u32>> {
        let frame = self.frame_number();
        let content = self.content().context(MissingContentSequenceSnafu { frame })?;
        attribute::retrieve_optional_multi_u32(
            content,
            tags::DIMENSION_INDEX_VALUES,
            "DimensionIndexValues",
        )
        .context(ReadAttributeSnafu)?
        .context(MissingFrameIndexSnafu { frame })
    }

    /// The Stack ID of this frame.
    pub fn stack_id(&self) -> Result<String> {
        let frame = self.frame_number();
        let content = self.content().context(MissingContentSequenceSnafu { frame })?;
        attribute::retrieve_optional_string(content, tags::STACK_ID, "StackID")
            .context(ReadAttributeSnafu)?
            .context(MissingStackIdSnafu { frame })
    }

    /// The Diffusion Directionality of this frame.
    pub fn diffusion_directionality(&self) -> Result<String> {
        let frame = self.frame_number();
        let diffusion = self
            .diffusion()
            .context(MissingDiffusionSequenceSnafu { frame })?;
        attribute::retrieve_optional_string(
            diffusion,
            tags::DIFFUSION_DIRECTIONALITY,
            "DiffusionDirectionality",
        )
        .context(ReadAttributeSnafu)?
        .context(MissingDiffusionSequenceSnafu { frame })
    }

    /// Whether this frame was derived from the acquired frames
    /// rather than acquired itself.
    ///
    /// Only frames of an object flagged as having derived frames appended
    /// are checked.
    pub fn is_derived(&self, appendix_flag: bool) -> Result<bool> {
        if !appendix_flag {
            return Ok(false);
        }
        Ok(self.diffusion_directionality()? == DERIVED_DIRECTIONALITY)
    }
}
