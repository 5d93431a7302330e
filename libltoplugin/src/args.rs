//! Parsing of the options that the linker passes through to us. With GCC, these are the
//! `-plugin-opt=` flags given to the linker.
//!
//! The options are:
//!
//! * `-debug` Log the backend command line and keep the temporary directory when we're done.
//! * `-nop` Don't run the backend. Pass the claimed files back to the linker unchanged. This only
//!   works if the inputs also contain native code.
//! * `-resolution=PATH` Write symbol resolutions to PATH for the backend to read.
//! * `-pass-through=ITEM` Once the backend has run, pass ITEM back to the linker. ITEM is either a
//!   library, `-lname`, or a file.
//!
//! Everything else is passed to the backend. The first of those is the path of the backend itself.

use crate::bail;
use crate::error::Result;
use std::path::Path;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Options {
    pub verbose: bool,
    pub bypass_backend: bool,
    pub resolution_file: Option<PathBuf>,
    pub pass_through: Vec<PassThrough>,

    /// The backend executable followed by arguments for it.
    pub backend_args: Vec<String>,
}

/// Something to hand back to the linker after the backend has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassThrough {
    Library(String),
    File(PathBuf),
}

const RESOLUTION_PREFIX: &str = "-resolution=";
const PASS_THROUGH_PREFIX: &str = "-pass-through=";
const LIBRARY_PREFIX: &str = "-l";

impl Options {
    pub fn parse<S: AsRef<str>, I: Iterator<Item = S>>(input: I) -> Result<Options> {
        let mut options = Options::default();

        for arg in input {
            let arg = arg.as_ref();

            if arg == "-debug" {
                options.verbose = true;
            } else if arg == "-nop" {
                options.bypass_backend = true;
            } else if let Some(path) = arg.strip_prefix(RESOLUTION_PREFIX) {
                if path.is_empty() {
                    bail!("Missing path for {RESOLUTION_PREFIX}");
                }
                options.resolution_file = Some(PathBuf::from(path));
            } else if let Some(item) = arg.strip_prefix(PASS_THROUGH_PREFIX) {
                options.pass_through.push(PassThrough::parse(item)?);
            } else {
                options.backend_args.push(arg.to_owned());
            }
        }

        Ok(options)
    }

    /// The path of the backend, if one was given.
    #[must_use]
    pub fn backend_executable(&self) -> Option<&Path> {
        self.backend_args.first().map(Path::new)
    }

    /// Arguments to the backend, excluding the backend itself.
    #[must_use]
    pub fn backend_flags(&self) -> &[String] {
        self.backend_args.get(1..).unwrap_or_default()
    }
}

impl PassThrough {
    fn parse(item: &str) -> Result<PassThrough> {
        if item.is_empty() {
            bail!("Missing value for {PASS_THROUGH_PREFIX}");
        }
        Ok(match item.strip_prefix(LIBRARY_PREFIX) {
            Some(name) => PassThrough::Library(name.to_owned()),
            None => PassThrough::File(PathBuf::from(item)),
        })
    }
}
