//! Decoding of Siemens CSA headers and the ASCCONV protocol within them.
//!
//! Siemens MR scanners store most of their acquisition parameters
//! in two private DICOM elements,
//! CSA Image Header Info (0029,1010) and CSA Series Header Info (0029,1020),
//! using a binary tagged format of their own.
//! The series header further embeds the full scanner protocol
//! as an ASCCONV text dump.
//!
//! - [`header`] decodes the binary CSA format (both type 1 and type 2)
//!   into a [`CsaHeader`].
//! - [`ascconv`] parses ASCCONV blocks into a nested [`AscconvNode`] tree.
//! - [`ascii`] reads the same text line by line,
//!   for protocols stored without the binary wrapper.
//! - [`unpack`] holds the byte level reader used by the decoder.
//!
//! No I/O is performed here:
//! the raw element values are obtained by the caller,
//! typically through `dicom-object`.
//!
//! # Example
//!
//! ```
//! use dicom_csa::ascconv::parse_ascconv;
//!
//! let text = "### ASCCONV BEGIN ###
//! sSliceArray.lSize = 36
//! sSliceArray.anAsc[1] = 1
//! ### ASCCONV END ###";
//! let protocol = parse_ascconv(text, "\"")?;
//! let n_slices = protocol.lookup("sSliceArray.lSize").and_then(|n| n.as_int());
//! assert_eq!(n_slices, Some(36));
//! # Ok::<(), dicom_csa::ascconv::ParseError>(())
//! ```
use encoding::all::ISO_8859_1;
use encoding::{DecoderTrap, Encoding};

pub mod ascconv;
pub mod ascii;
pub mod header;
pub mod tags;
pub mod tree;
pub mod unpack;

pub use ascconv::{parse_ascconv, parse_ascconv_text, Ascconv};
pub use ascii::{parse_ascii_header, parse_ascii_text};
pub use header::{CsaElement, CsaHeader, CsaKind, CsaValue};
pub use tree::{AscconvMap, AscconvNode};

/// Decode ISO-8859-1 text,
/// the character set of all text in CSA headers.
pub(crate) fn decode_latin1(bytes: &[u8]) -> String {
    ISO_8859_1
        .decode(bytes, DecoderTrap::Replace)
        .unwrap_or_else(|text| text.into_owned())
}
