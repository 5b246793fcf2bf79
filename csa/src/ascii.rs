//! Line-oriented reader for ASCCONV text stored outside of a CSA header.
//!
//! Some files keep the protocol dump directly in a private element,
//! with no binary CSA wrapper around it.
//! Here each `key = value` line is read on its own:
//! the lowercase type prefix of every key segment is dropped
//! (`sSliceArray.lSize` becomes `SliceArray.Size`)
//! and values are coerced to the narrowest type that fits.
use crate::tree::{self, AscconvMap, AscconvNode, PathError};
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::{ResultExt, Snafu};
use tracing::trace;

static ASCCONV_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)### ASCCONV BEGIN(.*?)### ASCCONV END ###")
        .expect("ASCCONV section pattern should be valid")
});

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ParseError {
    #[snafu(display("Invalid key `{}` on line {}", key, line))]
    InvalidKey {
        line: usize,
        key: String,
        source: PathError,
    },

    #[snafu(display("Conflicting assignment to `{}` on line {}", key, line))]
    Conflict {
        line: usize,
        key: String,
        source: PathError,
    },
}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Decode a raw ISO-8859-1 element value
/// and parse the ASCCONV section within it.
///
/// A value without an ASCCONV section yields an empty tree.
pub fn parse_ascii_header(raw: &[u8]) -> Result<AscconvMap> {
    parse_ascii_text(&crate::decode_latin1(raw))
}

/// Parse the ASCCONV section within `text`.
///
/// A text without an ASCCONV section yields an empty tree.
pub fn parse_ascii_text(text: &str) -> Result<AscconvMap> {
    let section = match ASCCONV_SECTION.captures(text).and_then(|c| c.get(1)) {
        Some(section) => section.as_str(),
        None => {
            trace!("No ASCCONV section found");
            return Ok(AscconvMap::new());
        }
    };

    let mut root = AscconvMap::new();
    // the first line holds what is left of the BEGIN heading
    for (i, line) in section.lines().enumerate().skip(1) {
        let line_number = i + 1;
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), strip_comment(value)),
            None => {
                if !line.trim().is_empty() {
                    trace!(line = line_number, "Skipped `{}`", line.trim());
                }
                continue;
            }
        };
        let path = tree::parse_key(key, true).context(InvalidKeySnafu {
            line: line_number,
            key,
        })?;
        let assigned = tree::assign(&mut root, &path, coerce(value)).context(ConflictSnafu {
            line: line_number,
            key,
        })?;
        if !assigned {
            trace!(line = line_number, "Skipped `{}`", key);
        }
    }
    Ok(root)
}

/// Remove a trailing `#` comment from a value.
/// Quoted strings are kept whole, since they may contain `#` themselves.
fn strip_comment(value: &str) -> &str {
    let value = value.trim();
    if value.starts_with('"') {
        if let Some(end) = value.rfind('"') {
            return &value[..=end];
        }
    }
    match value.find('#') {
        Some(i) => value[..i].trim_end(),
        None => value,
    }
}

/// Convert a raw value to an integer, a float,
/// a hexadecimal integer, or a string stripped of its quotes,
/// in that order of preference.
///
/// Floats without a fractional part become integers.
/// Hexadecimal values may carry a `0x` prefix or be bare digits,
/// so a word made only of the letters `a` to `f` is read as a number.
pub fn coerce(value: &str) -> AscconvNode {
    if let Ok(v) = value.parse::<i64>() {
        return AscconvNode::Int(v);
    }
    if let Ok(v) = value.parse::<f64>() {
        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
            return AscconvNode::Int(v as i64);
        }
        return AscconvNode::Float(v);
    }
    if let Some(v) = parse_hex(value.trim()) {
        return AscconvNode::Int(v);
    }
    AscconvNode::Text(value.trim_matches('"').to_owned())
}

fn parse_hex(value: &str) -> Option<i64> {
    let (negative, unsigned) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let digits = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
        .unwrap_or(unsigned);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let v = i64::from_str_radix(digits, 16).ok()?;
    Some(if negative { -v } else { v })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const HEADER: &str = "### ASCCONV BEGIN object=MrProtDataImpl@MrProtocolData version=51130001 ###
ulVersion\t = \t51130001
tSequenceFileName\t = \t\"\"%SiemensSeq%\\ep2d_bold\"\"
sGRADSPEC.asGPAData[0].sEddyCompensationY.aflTimeConstant[1]\t = \t0.917683601379
sSliceArray.lSize\t = \t64
sSliceArray.asSlice[0].dThickness\t = \t2.0
sSliceArray.asSlice[1].dThickness\t = \t2.5
sWipMemBlock.tFree\t = \t\"\"WIP#919B\"\"   # free text
sWipMemBlock.alFree.__attribute__.size\t = \t64
sDiffusion.sFreeDiffusionData.sComment.0\t\t = 0x41    # 'A'
PtabAbsStartPosZValid\t = \t0x1
### ASCCONV END ###";

    #[test]
    fn parse_header() {
        let root = parse_ascii_header(HEADER.as_bytes()).unwrap();
        assert_eq!(root["Version"], AscconvNode::Int(51130001));
        assert_eq!(
            root["SequenceFileName"],
            AscconvNode::Text("%SiemensSeq%\\ep2d_bold".to_string())
        );
        assert_eq!(
            tree::lookup(&root, "GRADSPEC.GPAData[0].EddyCompensationY.TimeConstant"),
            Some(&AscconvNode::List(vec![
                None,
                Some(AscconvNode::Float(0.917683601379))
            ]))
        );
        assert_eq!(tree::lookup(&root, "SliceArray.Size"), Some(&AscconvNode::Int(64)));
        assert_eq!(
            tree::lookup(&root, "SliceArray.Slice[1].Thickness"),
            Some(&AscconvNode::Float(2.5))
        );
        // whole floats become integers
        assert_eq!(
            tree::lookup(&root, "SliceArray.Slice[0].Thickness"),
            Some(&AscconvNode::Int(2))
        );
        assert_eq!(
            tree::lookup(&root, "WipMemBlock.Free"),
            Some(&AscconvNode::Text("WIP#919B".to_string()))
        );
        assert_eq!(
            tree::lookup(&root, "Diffusion.FreeDiffusionData.Comment[0]"),
            Some(&AscconvNode::Int(0x41))
        );
        assert_eq!(root["PtabAbsStartPosZValid"], AscconvNode::Int(1));
    }

    #[test]
    fn oversized_indices_are_errors() {
        let text = "### ASCCONV BEGIN ###\nsSliceArray.asSlice[10000000000].dThickness = 1\n### ASCCONV END ###";
        assert!(matches!(
            parse_ascii_text(text),
            Err(ParseError::Conflict {
                line: 2,
                source: PathError::IndexTooLarge { .. },
                ..
            })
        ));
    }

    #[test]
    fn no_section() {
        assert!(parse_ascii_text("sSliceArray.lSize = 64").unwrap().is_empty());
    }

    #[test]
    fn conflicts_are_reported() {
        let text = "### ASCCONV BEGIN ###\na.b[0] = 1\na.b.c = 2\n### ASCCONV END ###";
        assert!(matches!(
            parse_ascii_text(text),
            Err(ParseError::Conflict { line: 3, .. })
        ));
    }

    #[rstest]
    #[case("12", AscconvNode::Int(12))]
    #[case("-7", AscconvNode::Int(-7))]
    #[case("3.0", AscconvNode::Int(3))]
    #[case("0.5", AscconvNode::Float(0.5))]
    #[case("1e-3", AscconvNode::Float(0.001))]
    #[case("0x1F", AscconvNode::Int(31))]
    #[case("\"\"Siemens\"\"", AscconvNode::Text("Siemens".to_string()))]
    #[case("0X1f", AscconvNode::Int(31))]
    #[case("ff", AscconvNode::Int(255))]
    #[case("abc", AscconvNode::Int(0xabc))]
    #[case("-0x10", AscconvNode::Int(-16))]
    #[case("Siemens", AscconvNode::Text("Siemens".to_string()))]
    #[case("0xZZ", AscconvNode::Text("0xZZ".to_string()))]
    #[case("0x", AscconvNode::Text("0x".to_string()))]
    fn value_coercion(#[case] raw: &str, #[case] expected: AscconvNode) {
        assert_eq!(coerce(raw), expected);
    }
}
