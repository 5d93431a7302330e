//! Raw definitions of the GNU linker plugin API, as seen from the plugin's side. The linker passes
//! us a transfer vector of tagged values when it calls `onload`. Some of those values are options,
//! the rest are functions that we can call back into.
//!
//! See the linker plugin API docs at https://gcc.gnu.org/wiki/whopr/driver

use crate::bail;
use crate::error::Result;
use libc::c_char;
use libc::c_int;
use libc::c_void;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct LdPluginTv {
    /// Obtained from casting a `Tag`.
    pub tag: u32,

    /// This is either a pointer or a numeric value depending on the tag.
    pub value: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    Null = 0,
    ApiVersion = 1,
    GoldVersion = 2,
    LinkerOutput = 3,
    Option = 4,
    RegisterClaimFileHook = 5,
    RegisterAllSymbolsReadHook = 6,
    RegisterCleanupHook = 7,
    AddSymbols = 8,
    GetSymbols = 9,
    AddInputFile = 10,
    Message = 11,
    GetInputFile = 12,
    ReleaseInputFile = 13,
    AddInputLibrary = 14,
    OutputName = 15,
    SetExtraLibraryPath = 16,
    GnuLdVersion = 17,
    GetView = 18,
    GetInputSectionCount = 19,
    GetInputSectionType = 20,
    GetInputSectionName = 21,
    GetInputSectionContents = 22,
    UpdateSectionOrder = 23,
    AllowSectionOrdering = 24,
    GetSymbolsV2 = 25,
    AllowUniqueSegmentForSections = 26,
    UniqueSegmentForSections = 27,
    GetSymbolsV3 = 28,
    GetInputSectionAlignment = 29,
    GetInputSectionSize = 30,
    RegisterNewInputHook = 31,
    GetWrapSymbols = 32,
    AddSymbolsV2 = 33,
    GetApiVersion = 34,
}

/// Status codes. We return these from our hooks. The linker's functions return them too, but since
/// we can't trust the linker to only return valid variants, those come back to us as a raw
/// `c_int` and go through `Status::from_raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub enum Status {
    Ok = 0,
    NoSyms,
    BadHandle,
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
    Fatal = 3,
}

/// Describes an input file that the linker is asking us whether we'd like to claim.
#[repr(C)]
pub struct LdPluginInputFile {
    pub name: *const c_char,
    pub fd: c_int,
    pub offset: libc::off_t,
    pub file_size: libc::off_t,
    pub handle: *mut c_void,
}

/// A symbol as passed to `add_symbols` and filled in by `get_symbols`.
#[repr(C)]
#[derive(Debug)]
pub struct RawPluginSymbol {
    pub name: *const c_char,
    pub version: *const c_char,
    pub def: c_char,
    pub symbol_type: c_char,
    pub section_kind: c_char,
    pub unused: c_char,
    pub visibility: c_int,
    pub size: u64,
    pub comdat_key: *const c_char,
    pub resolution: c_int,
}

// The arrays we pass to the linker live inside the session, which is shared between the hooks.
// The pointers only ever refer to heap data owned by the same session.
unsafe impl Send for RawPluginSymbol {}

pub type ClaimFileHook = unsafe extern "C" fn(*const LdPluginInputFile, *mut c_int) -> Status;
pub type AllSymbolsReadHook = extern "C" fn() -> Status;
pub type CleanupHook = extern "C" fn() -> Status;

pub(crate) type RegisterClaimFileFn = unsafe extern "C" fn(ClaimFileHook) -> c_int;
pub(crate) type RegisterAllSymbolsReadFn = unsafe extern "C" fn(AllSymbolsReadHook) -> c_int;
pub(crate) type RegisterCleanupFn = unsafe extern "C" fn(CleanupHook) -> c_int;
pub(crate) type AddSymbolsFn =
    unsafe extern "C" fn(*mut c_void, c_int, *const RawPluginSymbol) -> c_int;
pub(crate) type GetSymbolsFn =
    unsafe extern "C" fn(*const c_void, c_int, *mut RawPluginSymbol) -> c_int;
pub(crate) type AddInputFileFn = unsafe extern "C" fn(*const c_char) -> c_int;
pub(crate) type AddInputLibraryFn = unsafe extern "C" fn(*const c_char) -> c_int;

/// The message function is printf-like. We only ever pass "%s" as the format.
pub(crate) type MessageFn = unsafe extern "C" fn(c_int, *const c_char, ...) -> c_int;

impl Tag {
    pub(crate) fn from_raw(tag: u32) -> Option<Tag> {
        const TAGS: [Tag; 35] = [
            Tag::Null,
            Tag::ApiVersion,
            Tag::GoldVersion,
            Tag::LinkerOutput,
            Tag::Option,
            Tag::RegisterClaimFileHook,
            Tag::RegisterAllSymbolsReadHook,
            Tag::RegisterCleanupHook,
            Tag::AddSymbols,
            Tag::GetSymbols,
            Tag::AddInputFile,
            Tag::Message,
            Tag::GetInputFile,
            Tag::ReleaseInputFile,
            Tag::AddInputLibrary,
            Tag::OutputName,
            Tag::SetExtraLibraryPath,
            Tag::GnuLdVersion,
            Tag::GetView,
            Tag::GetInputSectionCount,
            Tag::GetInputSectionType,
            Tag::GetInputSectionName,
            Tag::GetInputSectionContents,
            Tag::UpdateSectionOrder,
            Tag::AllowSectionOrdering,
            Tag::GetSymbolsV2,
            Tag::AllowUniqueSegmentForSections,
            Tag::UniqueSegmentForSections,
            Tag::GetSymbolsV3,
            Tag::GetInputSectionAlignment,
            Tag::GetInputSectionSize,
            Tag::RegisterNewInputHook,
            Tag::GetWrapSymbols,
            Tag::AddSymbolsV2,
            Tag::GetApiVersion,
        ];
        TAGS.get(tag as usize).copied()
    }
}

impl Status {
    pub(crate) fn from_raw(status: c_int) -> Option<Status> {
        match status {
            0 => Some(Status::Ok),
            1 => Some(Status::NoSyms),
            2 => Some(Status::BadHandle),
            3 => Some(Status::Err),
            _ => None,
        }
    }

    /// Converts a status returned by one of the linker's functions into a result.
    pub(crate) fn check_raw(status: c_int, context: &str) -> Result {
        match Status::from_raw(status) {
            Some(status) => status.to_result(context),
            None => bail!("{context}: linker returned unknown status {status}"),
        }
    }

    pub(crate) fn to_result(self, context: &str) -> Result {
        match self {
            Status::Ok => Ok(()),
            Status::NoSyms => bail!("{context}: NoSyms"),
            Status::BadHandle => bail!("{context}: BadHandle"),
            Status::Err => bail!("{context}: Err"),
        }
    }
}

impl std::fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            MessageLevel::Info => "message",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
            MessageLevel::Fatal => "fatal error",
        };
        std::fmt::Display::fmt(message, f)
    }
}

impl LdPluginTv {
    pub(crate) fn tag(&self) -> Option<Tag> {
        Tag::from_raw(self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_numbering() {
        assert_eq!(Tag::from_raw(0), Some(Tag::Null));
        assert_eq!(Tag::from_raw(11), Some(Tag::Message));
        assert_eq!(Tag::from_raw(28), Some(Tag::GetSymbolsV3));
        assert_eq!(Tag::from_raw(34), Some(Tag::GetApiVersion));
        assert_eq!(Tag::from_raw(35), None);
        for raw in 0..35 {
            assert_eq!(Tag::from_raw(raw).map(|tag| tag as u32), Some(raw));
        }
    }

    #[test]
    fn test_raw_status() {
        assert!(Status::check_raw(0, "add_symbols").is_ok());
        assert!(Status::check_raw(3, "add_symbols").is_err());
        let error = Status::check_raw(17, "add_symbols").unwrap_err();
        assert!(error.to_string().contains("unknown status 17"));
    }
}
