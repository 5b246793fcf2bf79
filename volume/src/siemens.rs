//! Siemens private attributes stored as raw binary values.
//!
//! Elements in the `SIEMENS MR HEADER` group hold little endian
//! numeric arrays, which are only available as bytes
//! when the file is read without a private dictionary.
//! The CSA headers in group 0029 are decoded with [`dicom_csa`].
use crate::attribute::{self, GetAttributeError};
use byteorder::{ByteOrder, LittleEndian};
use dicom_core::DataDictionary;
use dicom_csa::tags;
use dicom_csa::CsaHeader;
use dicom_object::InMemDicomObject;
use ndarray::Array2;
use snafu::{ensure, Backtrace, ResultExt, Snafu};

/// Positions of the six stored upper triangle values
/// in the row-major symmetric B matrix.
const B_MATRIX_INDICES: [usize; 9] = [0, 1, 2, 1, 3, 4, 2, 4, 5];

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Value of `{}` is {} bytes long, not a multiple of 8", name, length))]
    InvalidLength {
        name: &'static str,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Expected {} values in `{}`, found {}", expected, name, found))]
    ValueCount {
        name: &'static str,
        expected: usize,
        found: usize,
        backtrace: Backtrace,
    },

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

    #[snafu(display("Could not read attribute"))]
    ReadAttribute {
        #[snafu(backtrace)]
        source: GetAttributeError,
    },

    #[snafu(display("Could not decode CSA header `{}`", name))]
    DecodeCsa {
        name: &'static str,
        #[snafu(backtrace)]
        source: dicom_csa::header::DecodeError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn read_f64s(name: &'static str, value: &[u8]) -> Result<Vec<f64>> {
    ensure!(
        value.len() % 8 == 0,
        InvalidLengthSnafu {
            name,
            length: value.len()
        }
    );
    Ok(value.chunks_exact(8).map(LittleEndian::read_f64).collect())
}

fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

/// Decode the slice acquisition times of a mosaic (0019,1029),
/// in milliseconds rounded to 5 decimal places.
pub fn mosaic_ref_acq_times(value: &[u8]) -> Result<Vec<f64>> {
    Ok(read_f64s("MosaicRefAcqTimes", value)?
        .into_iter()
        .map(round5)
        .collect())
}

/// Decode the diffusion gradient direction (0019,100E).
pub fn gradient_direction(value: &[u8]) -> Result<Vec<f64>> {
    read_f64s("DiffusionGradientDirection", value)
}

/// Decode the number of images in a mosaic (0019,100A),
/// a little endian unsigned integer of any width up to 8 bytes.
pub fn number_of_images_in_mosaic(value: &[u8]) -> u64 {
    value
        .iter()
        .take(8)
        .rev()
        .fold(0, |acc, &byte| (acc << 8) | u64::from(byte))
}

/// Decode the bandwidth per pixel in the phase encoding direction (0019,1028).
pub fn bandwidth_per_pixel_phase_encode(value: &[u8]) -> Result<Option<f64>> {
    Ok(read_f64s("BandwidthPerPixelPhaseEncode", value)?
        .first()
        .copied())
}

/// Decode the B matrix (0019,1027) into its full symmetric 3×3 form.
pub fn b_matrix(value: &[u8]) -> Result<Array2<f64>> {
    let upper = read_f64s("B_matrix", value)?;
    ensure!(
        upper.len() == 6,
        ValueCountSnafu {
            name: "B_matrix",
            expected: 6_usize,
            found: upper.len(),
        }
    );
    Ok(Array2::from_shape_fn((3, 3), |(row, col)| {
        upper[B_MATRIX_INDICES[row * 3 + col]]
    }))
}

/// Read the number of images in a mosaic (0019,100A)
/// of a DICOM object, if present.
pub fn read_number_of_images_in_mosaic<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<u64>> {
    let name = "NumberOfImagesInMosaic";
    let elem = match obj.element(tags::NUMBER_OF_IMAGES_IN_MOSAIC).ok() {
        Some(e) => e,
        None => return Ok(None),
    };
    if attribute::is_opaque(elem) {
        let raw = elem.to_bytes().context(ConvertValueSnafu { name })?;
        return Ok(Some(number_of_images_in_mosaic(&raw)));
    }
    elem.to_int::<u64>()
        .map(Some)
        .context(ConvertValueSnafu { name })
}

/// Read the slice acquisition times of a mosaic (0019,1029)
/// of a DICOM object, if present.
pub fn read_mosaic_ref_acq_times<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<Vec<f64>>> {
    let name = "MosaicRefAcqTimes";
    let elem = match obj.element(tags::MOSAIC_REF_ACQ_TIMES).ok() {
        Some(e) => e,
        None => return Ok(None),
    };
    if attribute::is_opaque(elem) {
        let raw = elem.to_bytes().context(ConvertValueSnafu { name })?;
        return mosaic_ref_acq_times(&raw).map(Some);
    }
    let times = elem
        .to_multi_float64()
        .context(ConvertValueSnafu { name })?;
    Ok(Some(times.into_iter().map(round5).collect()))
}

/// Decode the CSA Image Header Info (0029,1010) of a DICOM object,
/// if present.
pub fn csa_image_header<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<CsaHeader>> {
    decode_csa(obj, tags::CSA_IMAGE_HEADER_INFO, "CSAImageHeaderInfo")
}

/// Decode the CSA Series Header Info (0029,1020) of a DICOM object,
/// if present.
pub fn csa_series_header<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
) -> Result<Option<CsaHeader>> {
    decode_csa(obj, tags::CSA_SERIES_HEADER_INFO, "CSASeriesHeaderInfo")
}

fn decode_csa<D: DataDictionary + Clone>(
    obj: &InMemDicomObject<D>,
    tag: dicom_core::Tag,
    name: &'static str,
) -> Result<Option<CsaHeader>> {
    match attribute::bytes(obj, tag, name).context(ReadAttributeSnafu)? {
        Some(raw) => CsaHeader::decode(&raw)
            .map(Some)
            .context(DecodeCsaSnafu { name }),
        None => Ok(None),
    }
}
