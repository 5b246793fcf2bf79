//! Parser for the ASCCONV protocol dump.
//!
//! Siemens MR protocols are stored as plain text
//! between `### ASCCONV BEGIN ###` and `### ASCCONV END ###` lines,
//! one assignment per line:
//!
//! ```text
//! ### ASCCONV BEGIN object=MrProtDataImpl@MrProtocolData version=41340006 ###
//! sGroupArray.lSize	 = 	1
//! sGroupArray.anMember[1]	 = 	1
//! sWipMemBlock.tFree	 = 	""WIP_Identifier: WIP#919B""
//! sWipMemBlock.alFree.__attribute__.size	 = 	64
//! sDiffusion.sFreeDiffusionData.sComment.0		 = 0x41    # 'A'
//! ### ASCCONV END ###
//! ```
//!
//! Variable names carry a lowercase type prefix in Hungarian notation,
//! which is kept as is,
//! since sibling names may only differ by their prefix
//! (`tFree` and `alFree` above).
//! A purely numeric last segment (`sComment.0`) indexes an array,
//! and paths through `__attribute__` only declare array sizes
//! and are dropped.
use crate::tree::{self, AscconvMap, AscconvNode, PathError};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::borrow::Cow;
use std::fmt::{self, Write as _};
use tracing::trace;

mod grammar;

use grammar::Lexer;

/// The block delimiters, with attributes on the opening line.
static ASCCONV_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ms)^### ASCCONV BEGIN((?:\s*[^=\s]+=[^=\s]+)*) ###\n(.*?)\n### ASCCONV END ###",
    )
    .expect("ASCCONV block pattern should be valid")
});

/// An assignment to a terminal numeric segment, `foo.3 = ...`.
static TERMINAL_DIGIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(.*)\.(\d+)(\s+=)").expect("terminal digit pattern should be valid")
});

/// The string delimiter used by protocols embedded in CSA headers.
pub const DOUBLE_QUOTE_DELIMITER: &str = "\"\"";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ParseError {
    #[snafu(display("No ASCCONV block found"))]
    MissingBlock { backtrace: Backtrace },

    #[snafu(display("String delimiter cannot be empty"))]
    EmptyDelimiter { backtrace: Backtrace },

    #[snafu(display("Syntax error on line {}: {} in `{}`", line, reason, fragment))]
    Syntax {
        line: usize,
        fragment: String,
        reason: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Too many assignment targets on line {}: `{}`", line, fragment))]
    TooManyTargets {
        line: usize,
        fragment: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Unexpected left hand side on line {}: `{}`", line, fragment))]
    UnexpectedLhs {
        line: usize,
        fragment: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Unexpected right hand side on line {}: `{}`", line, fragment))]
    UnexpectedRhs {
        line: usize,
        fragment: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid assignment target on line {}: `{}`", line, fragment))]
    PathConflict {
        line: usize,
        fragment: String,
        source: PathError,
    },
}

pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// A parsed ASCCONV block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ascconv {
    attributes: IndexMap<String, String>,
    root: AscconvMap,
}

impl Ascconv {
    pub fn new(attributes: IndexMap<String, String>, root: AscconvMap) -> Self {
        Ascconv { attributes, root }
    }

    /// The `key=value` pairs declared on the block's opening line.
    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    /// The protocol tree.
    pub fn root(&self) -> &AscconvMap {
        &self.root
    }

    pub fn into_root(self) -> AscconvMap {
        self.root
    }

    /// Look up a value by key path,
    /// such as `sSliceArray.asSlice[0].dThickness`.
    pub fn lookup(&self, path: &str) -> Option<&AscconvNode> {
        tree::lookup(&self.root, path)
    }

    /// Render the block back into ASCCONV text,
    /// with strings delimited by [`DOUBLE_QUOTE_DELIMITER`].
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Ascconv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("### ASCCONV BEGIN")?;
        for (key, value) in &self.attributes {
            write!(f, " {}={}", key, value)?;
        }
        f.write_str(" ###\n")?;
        let mut body = String::new();
        for (key, node) in &self.root {
            write_node(&mut body, key, node)?;
        }
        f.write_str(&body)?;
        f.write_str("### ASCCONV END ###")
    }
}

fn write_node(out: &mut String, path: &str, node: &AscconvNode) -> fmt::Result {
    match node {
        AscconvNode::Int(v) => writeln!(out, "{} = {}", path, v),
        AscconvNode::Float(v) => writeln!(out, "{} = {:?}", path, v),
        AscconvNode::Text(v) => writeln!(
            out,
            "{} = {}{}{}",
            path, DOUBLE_QUOTE_DELIMITER, v, DOUBLE_QUOTE_DELIMITER
        ),
        AscconvNode::List(items) => {
            for (i, item) in items.iter().enumerate() {
                if let Some(item) = item {
                    write_node(out, &format!("{}[{}]", path, i), item)?;
                }
            }
            Ok(())
        }
        AscconvNode::Map(map) => {
            for (key, item) in map {
                write_node(out, &format!("{}.{}", path, key), item)?;
            }
            Ok(())
        }
    }
}

/// Extract and parse the ASCCONV block in `text`.
///
/// `delimiter` is the string delimiter used in the block,
/// usually `"` or `""`.
pub fn parse_ascconv(text: &str, delimiter: &str) -> Result<Ascconv> {
    let captures = ASCCONV_BLOCK.captures(text).context(MissingBlockSnafu)?;
    let attributes = captures
        .get(1)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    let content = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    let root = parse_ascconv_text(content, delimiter)?;
    Ok(Ascconv { attributes, root })
}

/// Parse the assignments of an ASCCONV block,
/// without the enclosing `BEGIN` and `END` lines.
pub fn parse_ascconv_text(content: &str, delimiter: &str) -> Result<AscconvMap> {
    ensure!(!delimiter.is_empty(), EmptyDelimiterSnafu);

    let content = normalize(content);
    let mut lexer = Lexer::new(&content, delimiter);
    let mut root = AscconvMap::new();
    while let Some(statement) = lexer.next_statement()? {
        let (path, value) = statement.assignment()?;
        let assigned = tree::assign(&mut root, &path, value).context(PathConflictSnafu {
            line: statement.line,
            fragment: statement.source,
        })?;
        if !assigned {
            trace!(line = statement.line, "Skipped `{}`", statement.source);
        }
    }
    Ok(root)
}

/// Rewrite terminal numeric segments into subscripts
/// (`sComment.0 = 0x41` becomes `sComment[0] = 0x41`).
fn normalize(content: &str) -> Cow<'_, str> {
    TERMINAL_DIGIT.replace_all(content, "${1}[${2}]${3}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<AscconvMap> {
        parse_ascconv_text(content, "\"")
    }

    #[test]
    fn nested_assignment() {
        let root = parse("foo.bar.baz = 64").unwrap();
        assert_eq!(tree::lookup(&root, "foo.bar.baz"), Some(&AscconvNode::Int(64)));
    }

    #[test]
    fn terminal_digits_become_subscripts() {
        assert_eq!(
            normalize("sDiffusion.sFreeDiffusionData.sComment.0\t\t = 0x41    # 'A'"),
            "sDiffusion.sFreeDiffusionData.sComment[0]\t\t = 0x41    # 'A'"
        );
        let root = parse("sComment.0 = 0x41\nsComment.2 = 0x42").unwrap();
        assert_eq!(
            root["sComment"].as_list().unwrap(),
            &[Some(AscconvNode::Int(0x41)), None, Some(AscconvNode::Int(0x42))]
        );
    }

    #[test]
    fn values() {
        let root = parse_ascconv_text(
            "a = 1\nb = -1.5\nc = 2.5e-3\nd = \"\"Hello World\"\"\ne = -3",
            DOUBLE_QUOTE_DELIMITER,
        )
        .unwrap();
        assert_eq!(root["a"], AscconvNode::Int(1));
        assert_eq!(root["b"], AscconvNode::Float(-1.5));
        assert_eq!(root["c"], AscconvNode::Float(2.5e-3));
        assert_eq!(root["d"], AscconvNode::Text("Hello World".to_string()));
        assert_eq!(root["e"], AscconvNode::Int(-3));
    }

    #[test]
    fn bad_right_hand_sides() {
        for content in ["a = b", "a = -\"x\"", "a = 1 2", "a = "] {
            assert!(
                matches!(parse(content), Err(ParseError::UnexpectedRhs { .. })),
                "{} should be rejected",
                content,
            );
        }
    }

    #[test]
    fn oversized_subscripts_are_errors() {
        for content in [
            "a[18446744073709551615] = 1",
            "a[4611686018427387903] = 1",
            "a[10000000000] = 1",
            "sComment.65536 = 0x41",
        ] {
            assert!(
                matches!(
                    parse(content),
                    Err(ParseError::PathConflict {
                        source: PathError::IndexTooLarge { .. },
                        ..
                    })
                ),
                "{} should be rejected",
                content,
            );
        }
        let text = "### ASCCONV BEGIN ###\na[4611686018427387903] = 1\n### ASCCONV END ###";
        assert!(parse_ascconv(text, "\"").is_err());
    }

    #[test]
    fn errors_carry_the_offending_statement() {
        let err = parse("a = 1\nb = c = 2").unwrap_err();
        match err {
            ParseError::TooManyTargets { line, fragment, .. } => {
                assert_eq!(line, 2);
                assert_eq!(fragment, "b = c = 2");
            }
            e => panic!("unexpected error {:?}", e),
        }

        assert!(matches!(
            parse("a.b = 1\na[0] = 2"),
            Err(ParseError::PathConflict { line: 2, .. })
        ));
        assert!(matches!(parse("1 = 2"), Err(ParseError::UnexpectedLhs { .. })));
        assert!(matches!(parse("a = 1;"), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse("a = \"open"), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse("a"), Err(ParseError::Syntax { .. })));
    }

    #[test]
    fn block_with_attributes() {
        let text = "### ASCCONV BEGIN object=MrProtDataImpl@MrProtocolData \
                    version=41340006 converter=%MEASCONST%/ConverterList/Prot_Converter.txt ###\n\
                    test = \"hello\"\n\
                    ### ASCCONV END ###";
        let ascconv = parse_ascconv(text, "\"").unwrap();
        assert_eq!(ascconv.root()["test"], AscconvNode::Text("hello".to_string()));
        let attributes: Vec<_> = ascconv
            .attributes()
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            attributes,
            [
                ("object", "MrProtDataImpl@MrProtocolData"),
                ("version", "41340006"),
                ("converter", "%MEASCONST%/ConverterList/Prot_Converter.txt"),
            ]
        );
    }

    #[test]
    fn missing_block() {
        assert!(matches!(
            parse_ascconv("sGroupArray.lSize = 1", "\""),
            Err(ParseError::MissingBlock { .. })
        ));
        assert!(matches!(
            parse_ascconv_text("a = 1", ""),
            Err(ParseError::EmptyDelimiter { .. })
        ));
    }

    #[test]
    fn text_output_parses_back() {
        let text = "### ASCCONV BEGIN version=1 ###\n\
                    sSliceArray.asSlice[0].dThickness = 2.5\n\
                    sSliceArray.asSlice[0].sPosition.dTra = -20\n\
                    sSliceArray.asSlice[2].dThickness = 3.0\n\
                    sSliceArray.anAsc[1] = 1\n\
                    sSliceArray.lSize = 3\n\
                    tProtocolName = \"\"ep2d_bold\"\"\n\
                    ### ASCCONV END ###";
        let ascconv = parse_ascconv(text, DOUBLE_QUOTE_DELIMITER).unwrap();
        let reparsed = parse_ascconv(&ascconv.to_text(), DOUBLE_QUOTE_DELIMITER).unwrap();
        assert_eq!(reparsed, ascconv);
        assert_eq!(
            reparsed.lookup("sSliceArray.asSlice[2].dThickness"),
            Some(&AscconvNode::Float(3.0))
        );
    }
}
