pub use anyhow::Error;
pub(crate) use anyhow::Context;
use std::fmt::Display;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// An error indicating that we attempted to initialise global state that can only be initialised
/// once. When the linker that loaded us is itself written in Rust, it may already have installed
/// a tracing subscriber.
#[derive(Debug, Clone, Copy)]
pub struct AlreadyInitialised;

/// Formats an error together with its full chain of causes on a single line, which is what the
/// linker's diagnostic sink expects.
pub(crate) fn one_line(error: &Error) -> String {
    format!("{error:#}")
}

impl Display for AlreadyInitialised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attempted to initialise global state more than once")
    }
}

impl core::error::Error for AlreadyInitialised {}
