//! Decoding of the binary CSA header format.
//!
//! A CSA header is a sequence of named tags,
//! each holding a list of length-prefixed text items,
//! stored in the private elements
//! CSA Image Header Info (0029,1010) and CSA Series Header Info (0029,1020).
//! Two variants exist:
//! type 2 headers start with the magic code `SV10`
//! and state item lengths directly,
//! whereas type 1 headers have no magic code
//! and derive item lengths from the item count of the second tag.
//!
//! See <https://nipy.org/nibabel/dicom/siemens_csa.html>
//! for a description of the format.
use crate::ascconv::{self, Ascconv, DOUBLE_QUOTE_DELIMITER};
use crate::unpack::{self, Field, Fields, Unpacker};
use dicom_core::VR;
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::fmt;
use tracing::{debug, trace};

/// The magic code at the start of a type 2 CSA header.
pub const TYPE_2_MAGIC: &[u8; 4] = b"SV10";

/// The name of the element holding the ASCCONV protocol.
pub const PROTOCOL_ELEMENT: &str = "MrPhoenixProtocol";

/// Number of tags and an unused value.
const PREFIX_FORMAT: &str = "2I";
/// Name, VM, VR, syngo data type, number of items and check value.
const TAG_FORMAT: &str = "64si4s3i";
/// Four item length fields.
const ITEM_FORMAT: &str = "4i";

const VALID_CHECK_VALUES: [i64; 2] = [77, 205];

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum DecodeError {
    #[snafu(display("Could not read {}", field))]
    ReadField {
        field: &'static str,
        #[snafu(backtrace)]
        source: unpack::Error,
    },

    #[snafu(display("Tag #{} has an invalid check value {}", index, value))]
    InvalidCheckBit {
        index: usize,
        value: i64,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Item of tag `{}` ends at {}, beyond the header length {}",
        tag,
        destination,
        length
    ))]
    ItemOverrun {
        tag: String,
        destination: i64,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not convert item `{}` of tag `{}` to {}", item, tag, vr))]
    ConvertItem {
        tag: String,
        item: String,
        vr: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not parse the protocol in tag `{}`", tag))]
    ParseProtocol {
        tag: String,
        #[snafu(backtrace)]
        source: ascconv::ParseError,
    },
}

pub type Result<T, E = DecodeError> = std::result::Result<T, E>;

/// The variant of a CSA header.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum CsaKind {
    Type1,
    Type2,
}

impl CsaKind {
    /// Identify the variant of a raw CSA header.
    pub fn detect(raw: &[u8]) -> Self {
        if raw.starts_with(TYPE_2_MAGIC) {
            CsaKind::Type2
        } else {
            CsaKind::Type1
        }
    }
}

/// A single decoded item.
#[derive(Debug, Clone, PartialEq)]
pub enum CsaValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl CsaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CsaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Retrieve a numeric item as a float,
    /// converting integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            CsaValue::Int(v) => Some(*v as f64),
            CsaValue::Float(v) => Some(*v),
            CsaValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CsaValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for CsaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsaValue::Int(v) => write!(f, "{}", v),
            CsaValue::Float(v) => write!(f, "{}", v),
            CsaValue::Text(v) => f.write_str(v),
        }
    }
}

/// How the items of a tag are interpreted, by VR.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ItemKind {
    Int,
    Float,
    Text,
}

impl ItemKind {
    fn from_vr(vr: &str) -> Self {
        match vr.parse::<VR>() {
            Ok(VR::FL) | Ok(VR::FD) | Ok(VR::DS) => ItemKind::Float,
            Ok(VR::SS) | Ok(VR::US) | Ok(VR::SL) | Ok(VR::UL) | Ok(VR::IS) => ItemKind::Int,
            _ => ItemKind::Text,
        }
    }

    fn is_numeric(self) -> bool {
        self != ItemKind::Text
    }

    fn convert(self, item: String) -> Option<CsaValue> {
        match self {
            ItemKind::Int => item.trim().parse().ok().map(CsaValue::Int),
            ItemKind::Float => item.trim().parse().ok().map(CsaValue::Float),
            ItemKind::Text => Some(CsaValue::Text(item)),
        }
    }
}

/// A tag of a CSA header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsaElement {
    name: String,
    index: usize,
    vr: String,
    vm: i64,
    syngo_dt: i64,
    n_items: i64,
    items: Vec<CsaValue>,
    protocol: Option<Box<Ascconv>>,
}

impl CsaElement {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The position of the tag in the header.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn vr(&self) -> &str {
        &self.vr
    }

    /// The value multiplicity.
    /// A multiplicity of 0 means that all items are meaningful.
    pub fn vm(&self) -> i64 {
        self.vm
    }

    /// The numeric syngo data type code, redundant with the VR.
    pub fn syngo_dt(&self) -> i64 {
        self.syngo_dt
    }

    /// The number of items declared,
    /// which may be more than the values actually kept.
    pub fn n_items(&self) -> i64 {
        self.n_items
    }

    pub fn items(&self) -> &[CsaValue] {
        &self.items
    }

    pub fn first(&self) -> Option<&CsaValue> {
        self.items.first()
    }

    /// The parsed ASCCONV protocol,
    /// if this is the protocol element.
    pub fn protocol(&self) -> Option<&Ascconv> {
        self.protocol.as_deref()
    }
}

/// A decoded CSA header.
#[derive(Debug, Clone, PartialEq)]
pub struct CsaHeader {
    kind: CsaKind,
    elements: Vec<CsaElement>,
}

impl CsaHeader {
    /// Decode a CSA header from the raw value of its DICOM element.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let kind = CsaKind::detect(raw);
        debug!(?kind, length = raw.len(), "Decoding CSA header");

        let mut unpacker = Unpacker::new(raw);
        if kind == CsaKind::Type2 {
            // magic code and 4 unused bytes
            unpacker.seek(8);
        }
        let prefix = unpacker
            .unpack(PREFIX_FORMAT)
            .context(ReadFieldSnafu { field: "tag count" })?;
        let n_tags = int_field(&prefix, 0);

        let mut decoder = Decoder {
            unpacker,
            kind,
            length: raw.len(),
            first_tag_n_items: None,
        };
        let elements = (0..n_tags.max(0) as usize)
            .map(|index| decoder.tag(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(CsaHeader { kind, elements })
    }

    pub fn kind(&self) -> CsaKind {
        self.kind
    }

    /// The number of tags.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Get a tag by name.
    pub fn get(&self, name: &str) -> Option<&CsaElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Iterate over the tags in header order.
    pub fn iter(&self) -> std::slice::Iter<'_, CsaElement> {
        self.elements.iter()
    }

    pub fn elements(&self) -> &[CsaElement] {
        &self.elements
    }

    /// The ASCCONV protocol of the header, if it has one.
    pub fn protocol(&self) -> Option<&Ascconv> {
        self.elements.iter().find_map(CsaElement::protocol)
    }
}

impl<'a> IntoIterator for &'a CsaHeader {
    type Item = &'a CsaElement;
    type IntoIter = std::slice::Iter<'a, CsaElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Decoding state over a single header.
struct Decoder<'a> {
    unpacker: Unpacker<'a>,
    kind: CsaKind,
    length: usize,
    /// Item count of the tag at index 1,
    /// which offsets type 1 item lengths.
    first_tag_n_items: Option<i64>,
}

impl<'a> Decoder<'a> {
    fn tag(&mut self, index: usize) -> Result<CsaElement> {
        let fields = self
            .unpacker
            .unpack(TAG_FORMAT)
            .context(ReadFieldSnafu { field: "tag header" })?;
        let name = strip_to_null(bytes_field(&fields, 0));
        let vm = int_field(&fields, 1);
        let vr = strip_to_null(bytes_field(&fields, 2));
        let syngo_dt = int_field(&fields, 3);
        let n_items = int_field(&fields, 4);
        let check = int_field(&fields, 5);
        ensure!(
            VALID_CHECK_VALUES.contains(&check),
            InvalidCheckBitSnafu {
                index,
                value: check
            }
        );
        if index == 1 {
            self.first_tag_n_items = Some(n_items);
        }
        trace!(index, %name, %vr, vm, n_items, "Reading tag");

        let items = self.items(&name, &vr, vm, n_items)?;
        let protocol = if name == PROTOCOL_ELEMENT {
            parse_protocol(&name, &items)?
        } else {
            None
        };

        Ok(CsaElement {
            name,
            index,
            vr,
            vm,
            syngo_dt,
            n_items,
            items,
            protocol,
        })
    }

    fn items(&mut self, tag: &str, vr: &str, vm: i64, n_items: i64) -> Result<Vec<CsaValue>> {
        let kind = ItemKind::from_vr(vr);
        let mut n_values = if vm != 0 { vm } else { n_items };
        let mut items = Vec::new();

        for i_item in 0..n_items.max(0) {
            let fields = self
                .unpacker
                .unpack(ITEM_FORMAT)
                .context(ReadFieldSnafu { field: "item header" })?;
            let position = self.unpacker.position() as i64;
            let length = match self.kind {
                CsaKind::Type1 => {
                    let length = int_field(&fields, 0) - self.first_tag_n_items.unwrap_or(0);
                    if length < 0 || position + length > self.length as i64 {
                        trace!(tag, i_item, n_items, "No more items");
                        if i_item < vm {
                            items.push(CsaValue::Text(String::new()));
                        }
                        break;
                    }
                    length
                }
                CsaKind::Type2 => {
                    let length = int_field(&fields, 1);
                    let destination = position + length;
                    ensure!(
                        length >= 0 && destination <= self.length as i64,
                        ItemOverrunSnafu {
                            tag,
                            destination,
                            length: self.length,
                        }
                    );
                    length
                }
            } as usize;

            if i_item >= n_values {
                // padding item
                self.unpacker.skip(length + padding(length));
                continue;
            }

            let raw = self
                .unpacker
                .read(length)
                .context(ReadFieldSnafu { field: "item" })?;
            let item = strip_to_null(raw);
            if kind.is_numeric() && length == 0 {
                // an empty item ends the numeric values
                n_values = i_item;
                continue;
            }
            let value = kind.convert(item).with_context(|| ConvertItemSnafu {
                tag,
                item: crate::decode_latin1(raw).trim_end_matches('\0').to_owned(),
                vr,
            })?;
            items.push(value);
            self.unpacker.skip(padding(length));
        }
        Ok(items)
    }
}

fn parse_protocol(tag: &str, items: &[CsaValue]) -> Result<Option<Box<Ascconv>>> {
    let text = match items.first().and_then(CsaValue::as_str) {
        Some(text) => text,
        None => return Ok(None),
    };
    match ascconv::parse_ascconv(text, DOUBLE_QUOTE_DELIMITER) {
        Ok(protocol) => Ok(Some(Box::new(protocol))),
        Err(ascconv::ParseError::MissingBlock { .. }) => {
            debug!(tag, "Protocol element has no ASCCONV block");
            Ok(None)
        }
        Err(e) => Err(e).context(ParseProtocolSnafu { tag }),
    }
}

/// Bytes needed to reach the next 4 byte boundary.
fn padding(length: usize) -> usize {
    (4 - length % 4) % 4
}

fn int_field(fields: &Fields<'_>, i: usize) -> i64 {
    fields.get(i).and_then(Field::to_int).unwrap_or_default()
}

fn bytes_field<'a>(fields: &Fields<'a>, i: usize) -> &'a [u8] {
    fields.get(i).and_then(Field::as_bytes).unwrap_or_default()
}

/// Decode a byte string up to its first null character.
fn strip_to_null(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    crate::decode_latin1(&bytes[..end])
}
