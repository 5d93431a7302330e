//! The services that the linker provides to us. `Host` is what the rest of the plugin talks to.
//! `RawHost` implements it on top of the function pointers from the linker's transfer vector.

use crate::bail;
use crate::error::Context as _;
use crate::error::Result;
use crate::plugin_api::AddInputFileFn;
use crate::plugin_api::AddInputLibraryFn;
use crate::plugin_api::AddSymbolsFn;
use crate::plugin_api::GetSymbolsFn;
use crate::plugin_api::LdPluginTv;
use crate::plugin_api::MessageFn;
use crate::plugin_api::MessageLevel;
use crate::plugin_api::RawPluginSymbol;
use crate::plugin_api::RegisterAllSymbolsReadFn;
use crate::plugin_api::RegisterCleanupFn;
use crate::plugin_api::RegisterClaimFileFn;
use crate::plugin_api::Status;
use crate::plugin_api::Tag;
use crate::symbol::Resolution;
use crate::symbol::SymbolRecord;
use libc::c_char;
use libc::c_int;
use libc::c_void;
use std::ffi::CStr;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt as _;
use std::path::Path;

/// The linker's opaque identifier for an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostHandle(pub usize);

/// What happened when we asked the linker for resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionQuery {
    Resolved,

    /// The linker didn't load the file, e.g. because it was an archive member that nothing
    /// referenced. Resolutions are left as unknown.
    NotLoaded,
}

pub trait Host {
    /// Tells the linker about the symbols of a file that we've claimed.
    fn add_symbols(&mut self, handle: HostHandle, symbols: &[SymbolRecord]) -> Result;

    /// Fills in the resolution of each of `symbols`, which must be the same symbols, in the same
    /// order, as were passed to `add_symbols` for `handle`.
    fn get_symbols(
        &mut self,
        handle: HostHandle,
        symbols: &mut [SymbolRecord],
    ) -> Result<ResolutionQuery>;

    fn add_input_file(&mut self, path: &Path) -> Result;

    /// Adds a library to be searched for, as if by `-l{name}`.
    fn add_input_library(&mut self, name: &str) -> Result;

    /// Shows a message to the user. Returns false if the linker didn't give us a way to do so.
    fn message(&self, level: MessageLevel, text: &str) -> bool;

    /// Called once the linker no longer needs the symbols passed to `add_symbols`.
    fn release_symbols(&mut self) {}
}

/// The function pointers that the linker passed to us, together with the options.
#[derive(Default)]
pub(crate) struct TransferVector {
    pub(crate) bindings: HostBindings,
    pub(crate) options: Vec<CString>,
}

#[derive(Default, Clone, Copy)]
pub(crate) struct HostBindings {
    pub(crate) register_claim_file: Option<RegisterClaimFileFn>,
    pub(crate) register_all_symbols_read: Option<RegisterAllSymbolsReadFn>,
    pub(crate) register_cleanup: Option<RegisterCleanupFn>,
    pub(crate) add_symbols: Option<AddSymbolsFn>,
    pub(crate) get_symbols: Option<GetSymbolsFn>,
    pub(crate) add_input_file: Option<AddInputFileFn>,
    pub(crate) add_input_library: Option<AddInputLibraryFn>,
    pub(crate) message: Option<MessageFn>,
    get_symbols_version: u8,
}

pub struct RawHost {
    bindings: HostBindings,

    /// Symbol arrays that we've passed to `add_symbols`. The linker may hold on to these, so they
    /// need to stay put until we're told that it's done with them.
    pinned: Vec<PinnedSymbols>,
}

struct PinnedSymbols {
    _names: Vec<CString>,
    _comdat_keys: Vec<Option<CString>>,
    raw: Vec<RawPluginSymbol>,
}

impl TransferVector {
    /// Reads the transfer vector up to the terminating null tag.
    ///
    /// # Safety
    /// `tv` must point to a valid transfer vector that is terminated by a null tag. Values must be
    /// valid for their tags.
    pub(crate) unsafe fn read(mut tv: *const LdPluginTv) -> TransferVector {
        let mut out = TransferVector::default();
        loop {
            let entry = unsafe { *tv };
            if entry.tag == Tag::Null as u32 {
                break;
            }
            unsafe { out.apply(entry) };
            tv = unsafe { tv.add(1) };
        }
        out
    }

    unsafe fn apply(&mut self, entry: LdPluginTv) {
        let value = entry.value;
        let bindings = &mut self.bindings;
        match entry.tag() {
            Some(Tag::Option) => {
                if value != 0 {
                    let option = unsafe { CStr::from_ptr(value as *const c_char) };
                    self.options.push(option.to_owned());
                }
            }
            Some(Tag::RegisterClaimFileHook) => {
                bindings.register_claim_file = unsafe { function(value) };
            }
            Some(Tag::RegisterAllSymbolsReadHook) => {
                bindings.register_all_symbols_read = unsafe { function(value) };
            }
            Some(Tag::RegisterCleanupHook) => {
                bindings.register_cleanup = unsafe { function(value) };
            }
            Some(Tag::AddSymbols) => bindings.add_symbols = unsafe { function(value) },
            Some(Tag::GetSymbols) => unsafe { bindings.offer_get_symbols(1, value) },
            Some(Tag::GetSymbolsV2) => unsafe { bindings.offer_get_symbols(2, value) },
            Some(Tag::GetSymbolsV3) => unsafe { bindings.offer_get_symbols(3, value) },
            Some(Tag::AddInputFile) => bindings.add_input_file = unsafe { function(value) },
            Some(Tag::AddInputLibrary) => {
                bindings.add_input_library = unsafe { function(value) };
            }
            Some(Tag::Message) => bindings.message = unsafe { function(value) },
            Some(tag) => tracing::trace!("Ignoring transfer vector entry {tag:?}"),
            None => tracing::trace!("Ignoring unknown transfer vector tag {}", entry.tag),
        }
    }
}

impl HostBindings {
    /// All versions of get-symbols have the same signature. They differ in which resolutions the
    /// linker may return, so we want the newest one on offer.
    unsafe fn offer_get_symbols(&mut self, version: u8, value: usize) {
        if version > self.get_symbols_version && value != 0 {
            self.get_symbols = unsafe { function(value) };
            self.get_symbols_version = version;
        }
    }
}

/// Converts a transfer vector value into a function pointer, or None if it's null.
///
/// # Safety
/// `value` must be null or a function with signature `F`.
unsafe fn function<F: Copy>(value: usize) -> Option<F> {
    if value == 0 {
        return None;
    }
    debug_assert_eq!(size_of::<F>(), size_of::<usize>());
    Some(unsafe { std::mem::transmute_copy::<usize, F>(&value) })
}

impl RawHost {
    pub(crate) fn new(bindings: HostBindings) -> Self {
        Self {
            bindings,
            pinned: Vec::new(),
        }
    }
}

impl Host for RawHost {
    fn add_symbols(&mut self, handle: HostHandle, symbols: &[SymbolRecord]) -> Result {
        let add_symbols = self
            .bindings
            .add_symbols
            .context("Linker didn't provide add_symbols")?;

        let names: Vec<CString> = symbols.iter().map(|s| s.name.clone()).collect();
        let comdat_keys: Vec<Option<CString>> =
            symbols.iter().map(|s| s.comdat_key.clone()).collect();
        let raw: Vec<RawPluginSymbol> = symbols
            .iter()
            .zip(&names)
            .zip(&comdat_keys)
            .map(|((symbol, name), comdat_key)| raw_symbol(symbol, name, comdat_key.as_deref()))
            .collect();

        let count = c_int::try_from(raw.len()).context("Too many symbols for add_symbols")?;
        let status = unsafe { add_symbols(handle.0 as *mut c_void, count, raw.as_ptr()) };

        // Pin before checking the status. The linker may have kept pointers even if it failed.
        self.pinned.push(PinnedSymbols {
            _names: names,
            _comdat_keys: comdat_keys,
            raw,
        });

        Status::check_raw(status, "add_symbols")
    }

    fn get_symbols(
        &mut self,
        handle: HostHandle,
        symbols: &mut [SymbolRecord],
    ) -> Result<ResolutionQuery> {
        let get_symbols = self
            .bindings
            .get_symbols
            .context("Linker didn't provide get_symbols")?;

        let mut raw: Vec<RawPluginSymbol> = symbols
            .iter()
            .map(|symbol| raw_symbol(symbol, &symbol.name, symbol.comdat_key.as_deref()))
            .collect();
        let count = c_int::try_from(raw.len()).context("Too many symbols for get_symbols")?;

        let status = unsafe { get_symbols(handle.0 as *const c_void, count, raw.as_mut_ptr()) };
        if status == Status::NoSyms as c_int {
            return Ok(ResolutionQuery::NotLoaded);
        }
        Status::check_raw(status, "get_symbols")?;

        for (symbol, raw) in symbols.iter_mut().zip(&raw) {
            let Some(resolution) = Resolution::from_raw(raw.resolution) else {
                bail!(
                    "Linker returned invalid resolution {} for `{}`",
                    raw.resolution,
                    symbol.name.to_string_lossy()
                );
            };
            symbol.resolution = resolution;
        }

        Ok(ResolutionQuery::Resolved)
    }

    fn add_input_file(&mut self, path: &Path) -> Result {
        let add_input_file = self
            .bindings
            .add_input_file
            .context("Linker didn't provide add_input_file")?;
        let path_c = CString::new(path.as_os_str().as_bytes())
            .with_context(|| format!("Invalid path `{}`", path.display()))?;
        Status::check_raw(unsafe { add_input_file(path_c.as_ptr()) }, "add_input_file")
            .with_context(|| format!("Failed to add `{}`", path.display()))
    }

    fn add_input_library(&mut self, name: &str) -> Result {
        let add_input_library = self
            .bindings
            .add_input_library
            .context("Linker didn't provide add_input_library")?;
        let name_c = CString::new(name).with_context(|| format!("Invalid library name `{name}`"))?;
        Status::check_raw(
            unsafe { add_input_library(name_c.as_ptr()) },
            "add_input_library",
        )
        .with_context(|| format!("Failed to add library `{name}`"))
    }

    fn message(&self, level: MessageLevel, text: &str) -> bool {
        let Some(message) = self.bindings.message else {
            return false;
        };
        unsafe { send_message(message, level, text) };
        true
    }

    fn release_symbols(&mut self) {
        self.pinned.clear();
    }
}

/// Passes `text` to the linker's message function.
///
/// # Safety
/// `message` must be the linker's message function.
unsafe fn send_message(message: MessageFn, level: MessageLevel, text: &str) {
    let text = CString::new(text.replace('\0', " ")).unwrap_or_default();
    unsafe { message(level as c_int, c"%s".as_ptr(), text.as_ptr()) };
}

fn raw_symbol(
    symbol: &SymbolRecord,
    name: &CStr,
    comdat_key: Option<&CStr>,
) -> RawPluginSymbol {
    RawPluginSymbol {
        name: name.as_ptr(),
        version: std::ptr::null(),
        def: symbol.kind as c_char,
        symbol_type: 0,
        section_kind: 0,
        unused: 0,
        visibility: symbol.visibility as c_int,
        size: symbol.size,
        comdat_key: comdat_key.map_or(std::ptr::null(), CStr::as_ptr),
        resolution: Resolution::Unknown as c_int,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_api::AllSymbolsReadHook;
    use crate::plugin_api::ClaimFileHook;
    use crate::plugin_api::CleanupHook;
    use crate::symbol::SymbolKind;
    use crate::symbol::Visibility;
    use std::sync::Mutex;

    // The linker functions below are plain functions, so they record into statics. Each test uses
    // its own statics so that tests can run in parallel.

    static ADDED: Mutex<Vec<(usize, Vec<String>)>> = Mutex::new(Vec::new());

    unsafe extern "C" fn add_symbols(
        handle: *mut c_void,
        count: c_int,
        symbols: *const RawPluginSymbol,
    ) -> c_int {
        let symbols = unsafe { std::slice::from_raw_parts(symbols, count as usize) };
        let names = symbols
            .iter()
            .map(|s| {
                unsafe { CStr::from_ptr(s.name) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        ADDED.lock().unwrap().push((handle as usize, names));
        Status::Ok as c_int
    }

    unsafe extern "C" fn get_symbols_v1(
        _handle: *const c_void,
        _count: c_int,
        _symbols: *mut RawPluginSymbol,
    ) -> c_int {
        Status::Err as c_int
    }

    unsafe extern "C" fn get_symbols_v3(
        handle: *const c_void,
        count: c_int,
        symbols: *mut RawPluginSymbol,
    ) -> c_int {
        if handle as usize == 99 {
            return Status::NoSyms as c_int;
        }
        let symbols = unsafe { std::slice::from_raw_parts_mut(symbols, count as usize) };
        for (i, symbol) in symbols.iter_mut().enumerate() {
            symbol.resolution = if i == 0 {
                Resolution::PrevailingDef as c_int
            } else {
                Resolution::ResolvedIr as c_int
            };
        }
        Status::Ok as c_int
    }

    unsafe extern "C" fn register_claim_file(_hook: ClaimFileHook) -> c_int {
        Status::Ok as c_int
    }

    unsafe extern "C" fn register_all_symbols_read(_hook: AllSymbolsReadHook) -> c_int {
        Status::Ok as c_int
    }

    unsafe extern "C" fn register_cleanup(_hook: CleanupHook) -> c_int {
        Status::Ok as c_int
    }

    fn entry(tag: Tag, value: usize) -> LdPluginTv {
        LdPluginTv {
            tag: tag as u32,
            value,
        }
    }

    fn symbols() -> Vec<SymbolRecord> {
        vec![
            SymbolRecord::new(
                c"foo".to_owned(),
                None,
                SymbolKind::Def,
                Visibility::Default,
                4,
            ),
            SymbolRecord::new(
                c"bar".to_owned(),
                Some(c"bar".to_owned()),
                SymbolKind::WeakDef,
                Visibility::Hidden,
                8,
            ),
        ]
    }

    fn bindings_for(entries: &[LdPluginTv]) -> TransferVector {
        let mut entries = entries.to_vec();
        entries.push(entry(Tag::Null, 0));
        unsafe { TransferVector::read(entries.as_ptr()) }
    }

    #[test]
    fn test_read_transfer_vector() {
        let gcc_option = c"-debug";
        let tv = bindings_for(&[
            entry(Tag::ApiVersion, 1),
            entry(Tag::Option, gcc_option.as_ptr() as usize),
            entry(
                Tag::RegisterClaimFileHook,
                register_claim_file as RegisterClaimFileFn as usize,
            ),
            entry(
                Tag::RegisterAllSymbolsReadHook,
                register_all_symbols_read as RegisterAllSymbolsReadFn as usize,
            ),
            entry(
                Tag::RegisterCleanupHook,
                register_cleanup as RegisterCleanupFn as usize,
            ),
            entry(Tag::GetSymbolsV3, get_symbols_v3 as GetSymbolsFn as usize),
            entry(Tag::GetSymbols, get_symbols_v1 as GetSymbolsFn as usize),
            LdPluginTv {
                tag: 1000,
                value: 5,
            },
        ]);
        assert_eq!(tv.options, vec![c"-debug".to_owned()]);
        let bindings = tv.bindings;
        assert!(bindings.register_claim_file.is_some());
        assert!(bindings.register_all_symbols_read.is_some());
        assert!(bindings.register_cleanup.is_some());
        assert!(bindings.add_symbols.is_none());
        assert!(bindings.message.is_none());
        assert_eq!(bindings.get_symbols_version, 3);

        // The v1 entry came later, but v3 should still be the one we use.
        let mut host = RawHost::new(bindings);
        let mut symbols = symbols();
        assert_eq!(
            host.get_symbols(HostHandle(1), &mut symbols).unwrap(),
            ResolutionQuery::Resolved
        );
        assert_eq!(symbols[0].resolution, Resolution::PrevailingDef);
        assert_eq!(symbols[1].resolution, Resolution::ResolvedIr);
    }

    #[test]
    fn test_get_symbols_not_loaded() {
        let tv = bindings_for(&[entry(
            Tag::GetSymbolsV2,
            get_symbols_v3 as GetSymbolsFn as usize,
        )]);
        let mut host = RawHost::new(tv.bindings);
        let mut symbols = symbols();
        assert_eq!(
            host.get_symbols(HostHandle(99), &mut symbols).unwrap(),
            ResolutionQuery::NotLoaded
        );
        assert!(
            symbols
                .iter()
                .all(|symbol| symbol.resolution == Resolution::Unknown)
        );
    }

    #[test]
    fn test_add_symbols_pins_arrays() {
        let tv = bindings_for(&[entry(Tag::AddSymbols, add_symbols as AddSymbolsFn as usize)]);
        let mut host = RawHost::new(tv.bindings);
        host.add_symbols(HostHandle(42), &symbols()).unwrap();
        assert_eq!(host.pinned.len(), 1);
        let pinned = &host.pinned[0];
        assert_eq!(pinned.raw.len(), 2);
        assert_eq!(pinned.raw[1].def, SymbolKind::WeakDef as c_char);
        assert_eq!(pinned.raw[1].visibility, Visibility::Hidden as c_int);
        assert_eq!(
            unsafe { CStr::from_ptr(pinned.raw[1].comdat_key) },
            c"bar"
        );
        assert!(pinned.raw[0].comdat_key.is_null());
        assert!(
            ADDED
                .lock()
                .unwrap()
                .contains(&(42, vec!["foo".to_owned(), "bar".to_owned()]))
        );
        host.release_symbols();
        assert!(host.pinned.is_empty());
    }

    #[test]
    fn test_missing_functions() {
        let mut host = RawHost::new(HostBindings::default());
        assert!(host.add_symbols(HostHandle(0), &symbols()).is_err());
        assert!(host.add_input_file(Path::new("a.o")).is_err());
        assert!(host.add_input_library("c").is_err());
        assert!(!host.message(MessageLevel::Info, "hello"));
    }
}
