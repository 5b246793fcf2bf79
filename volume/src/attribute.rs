//! Utility module for fetching key attributes from a DICOM object.
//!
//! All functions work on an [`InMemDicomObject`],
//! so they apply both to whole files
//! (through [`FileDicomObject`](dicom_object::FileDicomObject)'s `Deref`)
//! and to sequence items such as functional groups.

use dicom_core::value::PrimitiveValue;
use dicom_core::{DataDictionary, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::borrow::Cow;
use std::convert::TryFrom;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum GetAttributeError {
    #[snafu(display("Could not get attribute `{}`", name))]
    CastValue {
        name: &'static str,
        source: dicom_core::value::CastValueError,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not convert attribute `{}`", name))]
    ConvertValue {
        name: &'static str,
        source: dicom_core::value::ConvertValueError,
        backtrace: Backtrace,
    },

    #[snafu(display("Semantically invalid value `{}` for attribute `{}`", value, name))]
    InvalidValue {
        name: &'static str,
        value: String,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = GetAttributeError> = std::result::Result<T, E>;

/// Get the Rows and Columns from the DICOM object,
/// or `None` if either of them is missing.
pub fn rows_and_cols<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<(u16, u16)>> {
    let rows = retrieve_optional_u16(obj, tags::ROWS, "Rows")?;
    let cols = retrieve_optional_u16(obj, tags::COLUMNS, "Columns")?;
    Ok(rows.zip(cols))
}

/// Get the NumberOfFrames from the DICOM object,
/// returning 1 if it is not present
pub fn number_of_frames<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> Result<u32> {
    let elem = match obj.element(tags::NUMBER_OF_FRAMES).ok() {
        Some(e) => e,
        None => return Ok(1),
    };

    let integer = elem.to_int::<i32>().context(ConvertValueSnafu {
        name: "NumberOfFrames",
    })?;

    ensure!(
        integer > 0,
        InvalidValueSnafu {
            name: "NumberOfFrames",
            value: integer.to_string(),
        }
    );

    Ok(integer as u32)
}

/// Get the ImageType values from the DICOM object, if present
pub fn image_type<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<Vec<String>>> {
    let elem = match obj.element(tags::IMAGE_TYPE).ok() {
        Some(e) => e,
        None => return Ok(None),
    };
    let values = elem
        .to_multi_str()
        .context(CastValueSnafu { name: "ImageType" })?
        .iter()
        .map(|v| v.trim().to_string())
        .collect();
    Ok(Some(values))
}

/// Get the SOPClassUID from the DICOM object, if present
pub fn sop_class_uid<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<String>> {
    retrieve_optional_string(obj, tags::SOP_CLASS_UID, "SOPClassUID")
        .map(|uid| uid.map(|uid| uid.trim_end_matches('\0').to_string()))
}

/// Get the ImagePositionPatient from the DICOM object, if present
pub fn image_position_patient<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<[f64; 3]>> {
    retrieve_optional_f64_array(obj, tags::IMAGE_POSITION_PATIENT, "ImagePositionPatient")
}

/// Get the ImageOrientationPatient from the DICOM object, if present
pub fn image_orientation_patient<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<[f64; 6]>> {
    retrieve_optional_f64_array(
        obj,
        tags::IMAGE_ORIENTATION_PATIENT,
        "ImageOrientationPatient",
    )
}

/// Get the PixelSpacing from the DICOM object, if present
pub fn pixel_spacing<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<[f64; 2]>> {
    retrieve_optional_f64_array(obj, tags::PIXEL_SPACING, "PixelSpacing")
}

/// Get the SliceThickness from the DICOM object, if present
pub fn slice_thickness<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<f64>> {
    retrieve_optional_to_f64(obj, tags::SLICE_THICKNESS, "SliceThickness")
}

/// Get the SpacingBetweenSlices from the DICOM object, if present
pub fn spacing_between_slices<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<f64>> {
    retrieve_optional_to_f64(obj, tags::SPACING_BETWEEN_SLICES, "SpacingBetweenSlices")
}

/// Get the RescaleIntercept from the DICOM object or returns 0
pub fn rescale_intercept<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> f64 {
    obj.element(tags::RESCALE_INTERCEPT)
        .map_or(Ok(0.), |e| e.to_float64())
        .unwrap_or(0.)
}

/// Get the RescaleSlope from the DICOM object or returns 1.0
pub fn rescale_slope<D: DataDictionary + Clone>(obj: &InMemDicomObject<D>) -> f64 {
    obj.element(tags::RESCALE_SLOPE)
        .map_or(Ok(1.0), |e| e.to_float64())
        .unwrap_or(1.0)
}

/// Get the items of a sequence element,
/// or `None` if the element is missing or is not a sequence.
pub fn sequence_items<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
) -> Option<&[InMemDicomObject<D>]> {
    obj.element(tag).ok().and_then(|e| e.value().items())
}

/// Get the first item of a sequence element, if any.
pub fn first_item<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
) -> Option<&InMemDicomObject<D>> {
    sequence_items(obj, tag).and_then(|items| items.first())
}

/// Get the first attribute tag of an AT element, if present
pub fn attribute_tag<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
) -> Option<Tag> {
    match obj.element(tag).ok()?.value().primitive()? {
        PrimitiveValue::Tags(values) => values.first().copied(),
        _ => None,
    }
}

/// Get the raw bytes of an element, if present.
///
/// Textual values are returned in their encoded form.
pub fn bytes<'a, D: DataDictionary + Clone>(
    obj: &'a InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<Cow<'a, [u8]>>> {
    obj.element(tag)
        .ok()
        .map(|e| e.to_bytes().context(ConvertValueSnafu { name }))
        .transpose()
}

/// Whether the element was read without a known value representation,
/// in which case its value is only available as raw bytes.
pub fn is_opaque<D: DataDictionary + Clone>(elem: &InMemElement<D>) -> bool {
    matches!(elem.vr(), VR::UN | VR::OB)
}

/// Get an element's string value, trimmed of padding, if present
pub fn retrieve_optional_string<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<String>> {
    obj.element(tag)
        .ok()
        .map(|e| {
            e.to_str()
                .map(|s| s.trim().to_string())
                .context(ConvertValueSnafu { name })
        })
        .transpose()
}

/// Get an element's integer values, if present
pub fn retrieve_optional_multi_u32<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<Vec<u32>>> {
    obj.element(tag)
        .ok()
        .map(|e| e.to_multi_int::<u32>().context(ConvertValueSnafu { name }))
        .transpose()
}

#[inline]
fn retrieve_optional_u16<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<u16>> {
    obj.element(tag)
        .ok()
        .map(|e| e.to_int::<u16>().context(ConvertValueSnafu { name }))
        .transpose()
}

#[inline]
fn retrieve_optional_to_f64<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<f64>> {
    obj.element(tag)
        .ok()
        .map(|e| e.to_float64().context(ConvertValueSnafu { name }))
        .transpose()
}

fn retrieve_optional_f64_array<D: DataDictionary + Clone, const N: usize>(
    obj: &InMemDicomObject<D>,
    tag: Tag,
    name: &'static str,
) -> Result<Option<[f64; N]>> {
    let values = match obj.element(tag).ok() {
        Some(e) => e.to_multi_float64().context(ConvertValueSnafu { name })?,
        None => return Ok(None),
    };
    <[f64; N]>::try_from(values)
        .map(Some)
        .map_err(|values| {
            InvalidValueSnafu {
                name,
                value: format!("{:?}", values),
            }
            .build()
        })
}
