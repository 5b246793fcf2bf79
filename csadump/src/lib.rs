//! Siemens CSA header dumping library
//!
//! This is a helper library
//! for printing the decoded CSA headers of a DICOM object
//! and the scanner protocol embedded in them.
//!
//! # Example
//!
//! ```no_run
//! use dicom_object::open_file;
//! use dicom_csadump::{CsaDumpOptions, HeaderSelection};
//!
//! let obj = open_file("path/to/file.dcm")?;
//! let mut options = CsaDumpOptions::new();
//! options.headers(HeaderSelection::Series).protocol(true);
//! options.dump_object(&obj)?;
//! # Result::<(), Box<dyn std::error::Error>>::Ok(())
//! ```
use dicom_core::DataDictionary;
use dicom_csa::{Ascconv, AscconvMap, AscconvNode, CsaHeader};
use dicom_object::InMemDicomObject;
use dicom_volume::siemens;
use serde_json::{Map, Number, Value};
use snafu::{ResultExt, Snafu};
use std::io::{stdout, Write};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not read the CSA {} header", header))]
    ReadHeader {
        header: &'static str,
        #[snafu(backtrace)]
        source: siemens::Error,
    },

    #[snafu(display("Could not serialize the protocol"))]
    SerializeJson { source: serde_json::Error },

    #[snafu(display("Could not write the dump"))]
    WriteDump { source: std::io::Error },
}

impl Error {
    /// The underlying I/O error, if the dump could not be written.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            Error::WriteDump { source } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which of the two CSA headers to dump.
#[derive(Debug, Copy, Clone, Default, Eq, Hash, PartialEq)]
pub enum HeaderSelection {
    /// CSA Image Header Info (0029,1010)
    Image,
    /// CSA Series Header Info (0029,1020)
    Series,
    #[default]
    Both,
}

impl HeaderSelection {
    fn includes_image(self) -> bool {
        matches!(self, HeaderSelection::Image | HeaderSelection::Both)
    }

    fn includes_series(self) -> bool {
        matches!(self, HeaderSelection::Series | HeaderSelection::Both)
    }
}

/// Options to configure how the CSA headers of a DICOM object are dumped.
#[derive(Debug, Default, Clone, PartialEq)]
#[non_exhaustive]
pub struct CsaDumpOptions {
    /// the headers to print
    pub headers: HeaderSelection,
    /// whether to print the protocol tree after the elements
    pub protocol: bool,
    /// whether to print the protocol tree as JSON
    pub json: bool,
}

impl CsaDumpOptions {
    pub fn new() -> Self {
        Default::default()
    }

    /// Set which headers to dump.
    pub fn headers(&mut self, headers: HeaderSelection) -> &mut Self {
        self.headers = headers;
        self
    }

    /// Set whether to print the protocol embedded in the headers.
    pub fn protocol(&mut self, protocol: bool) -> &mut Self {
        self.protocol = protocol;
        self
    }

    /// Set whether to print the protocol as JSON
    /// instead of ASCCONV text.
    pub fn json(&mut self, json: bool) -> &mut Self {
        self.json = json;
        self
    }

    /// Dump the CSA headers of a DICOM object to standard output.
    pub fn dump_object<D>(&self, obj: &InMemDicomObject<D>) -> Result<()>
    where
        D: DataDictionary + Clone,
    {
        self.dump_object_to(stdout().lock(), obj)
    }

    /// Dump the CSA headers of a DICOM object to the given writer.
    pub fn dump_object_to<D>(&self, mut to: impl Write, obj: &InMemDicomObject<D>) -> Result<()>
    where
        D: DataDictionary + Clone,
    {
        if self.headers.includes_image() {
            let header =
                siemens::csa_image_header(obj).context(ReadHeaderSnafu { header: "image" })?;
            self.dump_header_to(&mut to, "image", header.as_ref())?;
        }
        if self.headers.includes_series() {
            let header =
                siemens::csa_series_header(obj).context(ReadHeaderSnafu { header: "series" })?;
            self.dump_header_to(&mut to, "series", header.as_ref())?;
        }
        Ok(())
    }

    fn dump_header_to(
        &self,
        to: &mut impl Write,
        label: &str,
        header: Option<&CsaHeader>,
    ) -> Result<()> {
        let header = match header {
            Some(header) => header,
            None => {
                writeln!(to, "# no CSA {} header", label).context(WriteDumpSnafu)?;
                return Ok(());
            }
        };
        writeln!(
            to,
            "# CSA {} header ({:?}, {} elements)",
            label,
            header.kind(),
            header.len()
        )
        .context(WriteDumpSnafu)?;
        dump_header(&mut *to, header).context(WriteDumpSnafu)?;

        if self.protocol {
            if let Some(protocol) = header.protocol() {
                writeln!(to, "# protocol").context(WriteDumpSnafu)?;
                if self.json {
                    serde_json::to_writer_pretty(&mut *to, &protocol_to_json(protocol))
                        .context(SerializeJsonSnafu)?;
                    writeln!(to).context(WriteDumpSnafu)?;
                } else {
                    to.write_all(protocol.to_text().as_bytes())
                        .context(WriteDumpSnafu)?;
                }
            }
        }
        Ok(())
    }
}

/// Print one line per element of a CSA header:
/// index, name, VR, VM and the meaningful items.
pub fn dump_header(mut to: impl Write, header: &CsaHeader) -> std::io::Result<()> {
    for element in header {
        let items: Vec<String> = element.items().iter().map(ToString::to_string).collect();
        let items = items.join("\\");
        // the protocol dump spans hundreds of lines
        let items = if element.protocol().is_some() {
            format!("({} bytes of protocol text)", items.len())
        } else {
            items
        };
        writeln!(
            to,
            "{:>3} {:<40} {:<2} {:>3} {}",
            element.index(),
            element.name(),
            element.vr(),
            element.vm(),
            items
        )?;
    }
    Ok(())
}

/// Convert a protocol tree into a JSON value.
///
/// Objects keep their key order,
/// unassigned array positions become `null`,
/// and so do non-finite floats.
pub fn protocol_to_json(protocol: &Ascconv) -> Value {
    let mut out = Map::new();
    if !protocol.attributes().is_empty() {
        let attributes = protocol
            .attributes()
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        out.insert("__attributes__".to_string(), Value::Object(attributes));
    }
    out.extend(map_to_json(protocol.root()));
    Value::Object(out)
}

fn map_to_json(map: &AscconvMap) -> Map<String, Value> {
    map.iter()
        .map(|(key, node)| (key.clone(), node_to_json(node)))
        .collect()
}

fn node_to_json(node: &AscconvNode) -> Value {
    match node {
        AscconvNode::Int(value) => Value::Number((*value).into()),
        AscconvNode::Float(value) => Number::from_f64(*value).map_or(Value::Null, Value::Number),
        AscconvNode::Text(value) => Value::String(value.clone()),
        AscconvNode::List(items) => Value::Array(
            items
                .iter()
                .map(|item| item.as_ref().map_or(Value::Null, node_to_json))
                .collect(),
        ),
        AscconvNode::Map(map) => Value::Object(map_to_json(map)),
    }
}
