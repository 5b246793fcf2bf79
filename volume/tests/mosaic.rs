//! Read the layout of a mosaic from its Siemens private headers
//! and fold the tiles into a volume.
use dicom_core::value::PrimitiveValue;
use dicom_core::{DataElement, VR};
use dicom_csa::tags as csa_tags;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_volume::mosaic::{self, MosaicGeometry};
use ndarray::Array2;

fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Encode a type 2 CSA header with one value per element.
fn csa_header(elements: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut out = b"SV10\x04\x03\x02\x01".to_vec();
    push_i32(&mut out, elements.len() as i32);
    push_i32(&mut out, 77);
    for &(name, vr, value) in elements {
        let mut field = [0_u8; 64];
        field[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&field);
        push_i32(&mut out, 1);
        let mut field = [0_u8; 4];
        field[..vr.len()].copy_from_slice(vr.as_bytes());
        out.extend_from_slice(&field);
        push_i32(&mut out, 0);
        push_i32(&mut out, 1);
        push_i32(&mut out, 77);

        let len = value.len() as i32;
        for field in [len, len, 77, len] {
            push_i32(&mut out, field);
        }
        out.extend_from_slice(value);
        out.resize(out.len() + (4 - value.len() % 4) % 4, 0);
    }
    out
}

fn mosaic_object(protocol: &str) -> InMemDicomObject {
    let image_header = csa_header(&[
        ("EchoLinePosition", "IS", b"48\0"),
        ("NumberOfImagesInMosaic", "US", b"3\0"),
    ]);
    let mut protocol = protocol.as_bytes().to_vec();
    protocol.push(0);
    let series_header = csa_header(&[("MrPhoenixProtocol", "UN", &protocol)]);

    InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::IMAGE_TYPE,
            VR::CS,
            PrimitiveValue::Strs(
                ["ORIGINAL", "PRIMARY", "M", "ND", "MOSAIC"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::U16(vec![4].into())),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::U16(vec![4].into())),
        DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            PrimitiveValue::F64(vec![2., 2.].into()),
        ),
        DataElement::new(
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            PrimitiveValue::F64(vec![1., 0., 0., 0., 1., 0.].into()),
        ),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            PrimitiveValue::F64(vec![-4., -4., 0.].into()),
        ),
        DataElement::new(
            csa_tags::CSA_IMAGE_HEADER_INFO,
            VR::OB,
            PrimitiveValue::U8(image_header.into()),
        ),
        DataElement::new(
            csa_tags::CSA_SERIES_HEADER_INFO,
            VR::OB,
            PrimitiveValue::U8(series_header.into()),
        ),
    ])
}

#[test]
fn ascending_mosaic_from_csa_headers() {
    let obj = mosaic_object(
        "### ASCCONV BEGIN ###\n\
         sSliceArray.anAsc[1]\t = \t1\n\
         sSliceArray.anAsc[2]\t = \t2\n\
         sSliceArray.lSize\t = \t3\n\
         ### ASCCONV END ###",
    );
    assert!(mosaic::is_mosaic(&obj));

    let geometry = MosaicGeometry::from_object(&obj).unwrap();
    assert_eq!(geometry.tile_count(), 3);
    assert!(geometry.is_ascending());
    assert_eq!(geometry.slice_count(), Some(3));
    assert_eq!(geometry.grid_size(), 2);
    assert_eq!(geometry.volume_shape().unwrap(), (2, 2, 3));

    let pixels = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as u16);
    let volume = geometry.fold(pixels.view()).unwrap();
    assert_eq!(volume.dim(), (2, 2, 3));
    // the first tile is the top left corner of the mosaic
    assert_eq!(volume[[0, 1, 0]], 0);
    assert_eq!(volume[[0, 1, 1]], 2);
    assert_eq!(volume[[0, 1, 2]], 8);

    // half a tile along both directions
    assert_eq!(
        geometry.image_position_from_object(&obj).unwrap(),
        Some([-2., -2., 0.])
    );
}

#[test]
fn descending_without_slice_order() {
    let obj = mosaic_object(
        "### ASCCONV BEGIN ###\n\
         sSliceArray.lSize\t = \t3\n\
         ### ASCCONV END ###",
    );
    let geometry = MosaicGeometry::from_object(&obj).unwrap();
    assert!(!geometry.is_ascending());

    let pixels = Array2::from_shape_fn((4, 4), |(i, j)| (i * 4 + j) as u16);
    let volume = geometry.fold(pixels.view()).unwrap();
    assert_eq!(volume[[0, 1, 0]], 8);
    assert_eq!(volume[[0, 1, 2]], 0);
}
