//! The nested value tree shared by both protocol text parsers.
//!
//! A protocol dump assigns scalar values to dotted, bracketed key paths
//! such as `sSliceArray.asSlice[0].sPosition.dCor = -20.5`.
//! Each path is split into [`PathAtom`]s
//! and [`assign`] walks the tree along them,
//! creating the intermediate objects and arrays on demand.
use indexmap::IndexMap;
use smallvec::SmallVec;
use snafu::{Backtrace, OptionExt, Snafu};
use std::fmt;

/// The path segment marking array size declarations
/// (`sWipMemBlock.alFree.__attribute__.size = 64`),
/// which carry no value of their own.
pub const ATTRIBUTE_SENTINEL: &str = "__attribute__";

/// The largest array index accepted in a key path.
/// Protocol arrays hold at most a few thousand entries.
pub const MAX_ARRAY_INDEX: usize = 65535;

/// An object node: string keys in first-assignment order.
pub type AscconvMap = IndexMap<String, AscconvNode>;

/// A node of a parsed protocol tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AscconvNode {
    Int(i64),
    Float(f64),
    Text(String),
    /// An ordinal array.
    /// Indices which were never assigned are `None`,
    /// so that index `i` in the source text is always position `i` here.
    List(Vec<Option<AscconvNode>>),
    /// A nested object.
    Map(AscconvMap),
}

impl AscconvNode {
    /// The kind of container this node is, if any.
    pub fn container_kind(&self) -> Option<ContainerKind> {
        match self {
            AscconvNode::List(_) => Some(ContainerKind::Array),
            AscconvNode::Map(_) => Some(ContainerKind::Object),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            AscconvNode::Int(_) => "integer",
            AscconvNode::Float(_) => "float",
            AscconvNode::Text(_) => "string",
            AscconvNode::List(_) => "array",
            AscconvNode::Map(_) => "object",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AscconvNode::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Retrieve a numeric value as a float,
    /// converting integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            AscconvNode::Int(v) => Some(*v as f64),
            AscconvNode::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AscconvNode::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Option<AscconvNode>]> {
        match self {
            AscconvNode::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&AscconvMap> {
        match self {
            AscconvNode::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Get a member of an object node.
    pub fn get(&self, key: &str) -> Option<&AscconvNode> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Get an element of an array node.
    /// Absent entries yield `None`.
    pub fn get_index(&self, index: usize) -> Option<&AscconvNode> {
        self.as_list()
            .and_then(|list| list.get(index))
            .and_then(Option::as_ref)
    }

    /// Look up a node by a key path such as `asSlice[0].sPosition.dCor`,
    /// relative to this node.
    pub fn lookup(&self, path: &str) -> Option<&AscconvNode> {
        let atoms = parse_key(path, false).ok()?;
        let mut node = self;
        for atom in &atoms {
            node = node.get(&atom.name)?;
            if let Some(index) = atom.index {
                node = node.get_index(index)?;
            }
        }
        Some(node)
    }
}

impl From<i64> for AscconvNode {
    fn from(value: i64) -> Self {
        AscconvNode::Int(value)
    }
}

impl From<f64> for AscconvNode {
    fn from(value: f64) -> Self {
        AscconvNode::Float(value)
    }
}

impl From<String> for AscconvNode {
    fn from(value: String) -> Self {
        AscconvNode::Text(value)
    }
}

impl From<&str> for AscconvNode {
    fn from(value: &str) -> Self {
        AscconvNode::Text(value.to_owned())
    }
}

/// Look up a node by key path from the root object of a tree.
pub fn lookup<'a>(root: &'a AscconvMap, path: &str) -> Option<&'a AscconvNode> {
    let (first, rest) = match path.find('.') {
        Some(i) => (&path[..i], Some(&path[i + 1..])),
        None => (path, None),
    };
    let atom = parse_segment(first, false).ok()?;
    let mut node = root.get(&atom.name)?;
    if let Some(index) = atom.index {
        node = node.get_index(index)?;
    }
    match rest {
        Some(rest) => node.lookup(rest),
        None => Some(node),
    }
}

/// The kind of container a path segment addresses.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum ContainerKind {
    /// Attribute access, `a.b`
    Object,
    /// Subscript access, `a[0]`
    Array,
}

impl ContainerKind {
    fn empty(self) -> AscconvNode {
        match self {
            ContainerKind::Object => AscconvNode::Map(AscconvMap::new()),
            ContainerKind::Array => AscconvNode::List(Vec::new()),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ContainerKind::Object => "object",
            ContainerKind::Array => "array",
        })
    }
}

/// One segment of a key path: a name, optionally subscripted.
///
/// `asSlice[2]` is the atom `{ name: "asSlice", index: Some(2) }`,
/// which addresses an array under `asSlice`.
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct PathAtom {
    pub name: String,
    pub index: Option<usize>,
}

impl PathAtom {
    pub fn new(name: impl Into<String>, index: Option<usize>) -> Self {
        PathAtom {
            name: name.into(),
            index,
        }
    }

    /// The kind of container stored under this atom's name,
    /// when the atom is not the last one of its path.
    pub fn container_kind(&self) -> ContainerKind {
        if self.index.is_some() {
            ContainerKind::Array
        } else {
            ContainerKind::Object
        }
    }

    pub fn is_attribute_metadata(&self) -> bool {
        self.name == ATTRIBUTE_SENTINEL
    }
}

impl fmt::Display for PathAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(index) = self.index {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

/// A full key path.
pub type Path = SmallVec<[PathAtom; 8]>;

/// Render a path back into its dotted form.
pub fn display_path(path: &[PathAtom]) -> String {
    let mut out = String::new();
    for (i, atom) in path.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&atom.to_string());
    }
    out
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum PathError {
    /// A path addresses a node as a different kind of value
    /// than it was previously assigned.
    #[snafu(display(
        "`{}` is addressed as {}, but already holds {}",
        path,
        expected,
        found
    ))]
    Conflict {
        path: String,
        expected: &'static str,
        found: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Index {} of `{}` exceeds the maximum array index {}",
        index,
        path,
        MAX_ARRAY_INDEX
    ))]
    IndexTooLarge {
        path: String,
        index: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Empty key path"))]
    EmptyPath { backtrace: Backtrace },

    #[snafu(display("Malformed key path segment `{}`", segment))]
    MalformedSegment {
        segment: String,
        backtrace: Backtrace,
    },
}

/// Assign `value` at `path` in the tree rooted at `root`.
///
/// Objects and arrays are created along the path as needed,
/// arrays being padded with absent entries up to the target index.
/// Addressing an existing node as a different kind of container,
/// or overwriting a container with a scalar, is a conflict.
/// Paths containing the [`ATTRIBUTE_SENTINEL`] are ignored
/// and `Ok(false)` is returned.
pub fn assign(root: &mut AscconvMap, path: &[PathAtom], value: AscconvNode) -> Result<bool, PathError> {
    if path.is_empty() {
        return EmptyPathSnafu.fail();
    }
    if path.iter().any(PathAtom::is_attribute_metadata) {
        return Ok(false);
    }

    let mut map = root;
    for (depth, atom) in path.iter().enumerate() {
        let last = depth + 1 == path.len();
        let slot = if let Some(index) = atom.index {
            let entry = map
                .entry(atom.name.clone())
                .or_insert_with(|| ContainerKind::Array.empty());
            let list = match entry {
                AscconvNode::List(list) => list,
                other => return conflict(&path[..=depth], "array", other),
            };
            let len = index
                .checked_add(1)
                .filter(|_| index <= MAX_ARRAY_INDEX)
                .with_context(|| IndexTooLargeSnafu {
                    path: display_path(&path[..=depth]),
                    index,
                })?;
            if list.len() < len {
                list.resize(len, None);
            }
            Slot::Element(&mut list[index])
        } else {
            Slot::Member(map, &atom.name)
        };

        if last {
            return slot.put(value, path).map(|_| true);
        }
        map = match resolve_or_insert(slot, ContainerKind::Object, &path[..=depth])? {
            AscconvNode::Map(m) => m,
            // resolve_or_insert only hands back the requested kind
            other => return conflict(&path[..=depth], "object", other),
        };
    }
    Ok(true)
}

/// The location addressed by a single path atom.
enum Slot<'a> {
    Member(&'a mut AscconvMap, &'a str),
    Element(&'a mut Option<AscconvNode>),
}

impl<'a> Slot<'a> {
    fn put(self, value: AscconvNode, path: &[PathAtom]) -> Result<(), PathError> {
        let existing = match self {
            Slot::Member(map, name) => match map.entry(name.to_owned()) {
                indexmap::map::Entry::Occupied(entry) => entry.into_mut(),
                indexmap::map::Entry::Vacant(entry) => {
                    entry.insert(value);
                    return Ok(());
                }
            },
            Slot::Element(element) => match element {
                Some(node) => node,
                None => {
                    *element = Some(value);
                    return Ok(());
                }
            },
        };
        if existing.container_kind().is_some() {
            return conflict(path, "a scalar", existing);
        }
        *existing = value;
        Ok(())
    }
}

/// Get the container at `slot`, creating it if absent,
/// and check that it is of the `expected` kind.
fn resolve_or_insert<'a>(
    slot: Slot<'a>,
    expected: ContainerKind,
    path: &[PathAtom],
) -> Result<&'a mut AscconvNode, PathError> {
    let node = match slot {
        Slot::Member(map, name) => map
            .entry(name.to_owned())
            .or_insert_with(|| expected.empty()),
        Slot::Element(element) => element.get_or_insert_with(|| expected.empty()),
    };
    if node.container_kind() != Some(expected) {
        let expected = match expected {
            ContainerKind::Object => "object",
            ContainerKind::Array => "array",
        };
        return conflict(path, expected, node);
    }
    Ok(node)
}

fn conflict<T>(path: &[PathAtom], expected: &'static str, found: &AscconvNode) -> Result<T, PathError> {
    ConflictSnafu {
        path: display_path(path),
        expected,
        found: found.type_name(),
    }
    .fail()
}

/// Split a key such as `asSlice[2].sNormal.dSag` into path atoms.
///
/// A purely numeric final segment (`sComment.0`)
/// is taken as an index into the preceding segment.
/// With `strip_prefix`, the leading lowercase type prefix
/// of each segment is removed (`asSlice` becomes `Slice`).
pub fn parse_key(key: &str, strip_prefix: bool) -> Result<Path, PathError> {
    let segments: SmallVec<[&str; 8]> = key.split('.').map(str::trim).collect();
    let mut path = Path::new();
    let n = segments.len();
    for (i, segment) in segments.into_iter().enumerate() {
        if i + 1 == n && i > 0 && !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            let index = segment.parse::<usize>().map_err(|_| {
                MalformedSegmentSnafu {
                    segment: segment.to_owned(),
                }
                .build()
            })?;
            match path.last_mut() {
                Some(atom) if atom.index.is_none() => {
                    atom.index = Some(index);
                    continue;
                }
                _ => {
                    return MalformedSegmentSnafu {
                        segment: segment.to_owned(),
                    }
                    .fail()
                }
            }
        }
        path.push(parse_segment(segment, strip_prefix)?);
    }
    if path.is_empty() {
        return EmptyPathSnafu.fail();
    }
    Ok(path)
}

/// Parse a single `name` or `name[index]` segment.
fn parse_segment(segment: &str, strip_prefix: bool) -> Result<PathAtom, PathError> {
    let malformed = || {
        MalformedSegmentSnafu {
            segment: segment.to_owned(),
        }
        .build()
    };
    let (name, index) = match segment.find('[') {
        Some(open) => {
            let inner = segment[open + 1..]
                .strip_suffix(']')
                .ok_or_else(malformed)?;
            let index = inner.trim().parse::<usize>().map_err(|_| malformed())?;
            (&segment[..open], Some(index))
        }
        None => (segment, None),
    };
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(malformed());
    }
    let name = if strip_prefix { strip_type_prefix(name) } else { name };
    Ok(PathAtom::new(name, index))
}

/// Remove the lowercase type prefix of a segment name,
/// keeping everything from the first uppercase letter on.
/// Names without any uppercase letter are kept whole.
pub fn strip_type_prefix(name: &str) -> &str {
    match name.find(|c: char| c.is_ascii_uppercase()) {
        Some(i) => &name[i..],
        None => name,
    }
}
