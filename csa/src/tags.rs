//! Siemens private data element tags.
//!
//! These live in private groups reserved under the creator `SIEMENS CSA HEADER`
//! (group 0029) and `SIEMENS MR HEADER` (group 0019),
//! and are not part of the standard data dictionary.
use dicom_core::Tag;

/// CSA Image Header Type
pub const CSA_IMAGE_HEADER_TYPE: Tag = Tag(0x0029, 0x1008);
/// CSA Image Header Version
pub const CSA_IMAGE_HEADER_VERSION: Tag = Tag(0x0029, 0x1009);
/// CSA Image Header Info
pub const CSA_IMAGE_HEADER_INFO: Tag = Tag(0x0029, 0x1010);
/// CSA Series Header Type
pub const CSA_SERIES_HEADER_TYPE: Tag = Tag(0x0029, 0x1018);
/// CSA Series Header Version
pub const CSA_SERIES_HEADER_VERSION: Tag = Tag(0x0029, 0x1019);
/// CSA Series Header Info
pub const CSA_SERIES_HEADER_INFO: Tag = Tag(0x0029, 0x1020);

/// Number Of Images In Mosaic
pub const NUMBER_OF_IMAGES_IN_MOSAIC: Tag = Tag(0x0019, 0x100A);
/// Slice Measurement Duration
pub const SLICE_MEASUREMENT_DURATION: Tag = Tag(0x0019, 0x100B);
/// B Value
pub const B_VALUE: Tag = Tag(0x0019, 0x100C);
/// Diffusion Directionality
pub const DIFFUSION_DIRECTIONALITY: Tag = Tag(0x0019, 0x100D);
/// Diffusion Gradient Direction
pub const DIFFUSION_GRADIENT_DIRECTION: Tag = Tag(0x0019, 0x100E);
/// Gradient Mode
pub const GRADIENT_MODE: Tag = Tag(0x0019, 0x100F);
/// B Matrix
pub const B_MATRIX: Tag = Tag(0x0019, 0x1027);
/// Bandwidth Per Pixel Phase Encode
pub const BANDWIDTH_PER_PIXEL_PHASE_ENCODE: Tag = Tag(0x0019, 0x1028);
/// Mosaic Ref Acq Times
pub const MOSAIC_REF_ACQ_TIMES: Tag = Tag(0x0019, 0x1029);

/// All known Siemens private tags by keyword.
pub const SIEMENS_PRIVATE_TAGS: &[(&str, Tag)] = &[
    ("CSAImageHeaderType", CSA_IMAGE_HEADER_TYPE),
    ("CSAImageHeaderVersion", CSA_IMAGE_HEADER_VERSION),
    ("CSAImageHeaderInfo", CSA_IMAGE_HEADER_INFO),
    ("CSASeriesHeaderType", CSA_SERIES_HEADER_TYPE),
    ("CSASeriesHeaderVersion", CSA_SERIES_HEADER_VERSION),
    ("CSASeriesHeaderInfo", CSA_SERIES_HEADER_INFO),
    ("NumberOfImagesInMosaic", NUMBER_OF_IMAGES_IN_MOSAIC),
    ("SliceMeasurementDuration", SLICE_MEASUREMENT_DURATION),
    ("B_value", B_VALUE),
    ("DiffusionDirectionality", DIFFUSION_DIRECTIONALITY),
    ("DiffusionGradientDirection", DIFFUSION_GRADIENT_DIRECTION),
    ("GradientMode", GRADIENT_MODE),
    ("B_matrix", B_MATRIX),
    ("BandwidthPerPixelPhaseEncode", BANDWIDTH_PER_PIXEL_PHASE_ENCODE),
    ("MosaicRefAcqTimes", MOSAIC_REF_ACQ_TIMES),
];

/// Look up a Siemens private tag by keyword.
pub fn by_name(name: &str) -> Option<Tag> {
    SIEMENS_PRIVATE_TAGS
        .iter()
        .find(|(keyword, _)| *keyword == name)
        .map(|(_, tag)| *tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(by_name("CSASeriesHeaderInfo"), Some(Tag(0x0029, 0x1020)));
        assert_eq!(by_name("MosaicRefAcqTimes"), Some(MOSAIC_REF_ACQ_TIMES));
        assert_eq!(by_name("PatientName"), None);
    }
}
