//! A CLI tool for inspecting the Siemens CSA headers of DICOM files
//! and the scanner protocol embedded in them.
use clap::Parser;
use dicom_csadump::{CsaDumpOptions, HeaderSelection};
use dicom_object::open_file;
use snafu::{Report, ResultExt, Whatever};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{debug, error, Level};

/// Dump the CSA headers of Siemens DICOM files
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// The DICOM file(s) to read
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Dump only the CSA series header
    #[arg(long = "series", conflicts_with_all = ["image", "both"])]
    series: bool,

    /// Dump only the CSA image header
    #[arg(long = "image", conflicts_with_all = ["series", "both"])]
    image: bool,

    /// Dump both CSA headers (the default)
    #[arg(long = "both")]
    both: bool,

    /// Print the scanner protocol tree
    #[arg(long = "protocol")]
    protocol: bool,

    /// Print the protocol tree as JSON
    /// (implies `--protocol`)
    #[arg(long = "json")]
    json: bool,

    /// Print more information while reading the files
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    let App {
        files,
        series,
        image,
        both: _,
        protocol,
        json,
        verbose,
    } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::io::stderr)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let headers = match (series, image) {
        (true, _) => HeaderSelection::Series,
        (_, true) => HeaderSelection::Image,
        _ => HeaderSelection::Both,
    };
    let mut options = CsaDumpOptions::new();
    options
        .headers(headers)
        .protocol(protocol || json)
        .json(json);

    let mut errors: i32 = 0;
    for file in &files {
        println!("{}:", file.display());
        let obj = match open_file(file) {
            Ok(obj) => obj,
            Err(e) => {
                error!("{}", Report::from_error(e));
                errors += 1;
                continue;
            }
        };
        debug!("Opened {}", file.display());

        if let Err(e) = options.dump_object(&*obj) {
            if e.io_error().map(|e| e.kind()) == Some(ErrorKind::BrokenPipe) {
                // stop quietly when the output is closed early
                break;
            }
            error!("{}", Report::from_error(e));
            errors += 1;
        }
    }

    std::process::exit(errors);
}
