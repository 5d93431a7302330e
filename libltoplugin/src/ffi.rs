//! The C ABI surface. The linker calls `onload` with a transfer vector, then the hooks that we
//! register from there. Errors are reported to the linker as fatal and never unwind across this
//! boundary.

use crate::args::Options;
use crate::claim::InputFile;
use crate::error::Context as _;
use crate::error::Result;
use crate::error::one_line;
use crate::host::Host;
use crate::host::HostHandle;
use crate::host::RawHost;
use crate::host::TransferVector;
use crate::plugin_api::LdPluginInputFile;
use crate::plugin_api::LdPluginTv;
use crate::plugin_api::MessageLevel;
use crate::plugin_api::Status;
use crate::session::Session;
use libc::c_int;
use std::ffi::CStr;
use std::ffi::OsStr;
use std::fs::File;
use std::mem::ManuallyDrop;
use std::os::fd::FromRawFd as _;
use std::os::unix::ffi::OsStrExt as _;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

static SESSION: Mutex<Option<Session<RawHost>>> = Mutex::new(None);

/// Entry point called by the linker when it loads us.
///
/// # Safety
/// `tv` must point to a transfer vector that is terminated by a null tag and whose values are valid
/// for their tags.
pub unsafe fn onload(tv: *const LdPluginTv) -> Status {
    if tv.is_null() {
        return report_fatal(None, "Linker passed a null transfer vector");
    }
    let tv = unsafe { TransferVector::read(tv) };
    // Only used for reporting. The session gets its own.
    let host = RawHost::new(tv.bindings);

    match std::panic::catch_unwind(AssertUnwindSafe(|| start_session(tv))) {
        Ok(Ok(())) => Status::Ok,
        Ok(Err(error)) => report_fatal(Some(&host), &one_line(&error)),
        Err(_) => report_fatal(Some(&host), "Panic in linker plugin onload"),
    }
}

fn start_session(tv: TransferVector) -> Result {
    let options = tv
        .options
        .iter()
        .map(|option| {
            option
                .to_str()
                .with_context(|| format!("Linker plugin option {option:?} isn't valid UTF-8"))
        })
        .collect::<Result<Vec<&str>>>()?;
    let options = Options::parse(options.iter())?;

    if crate::logging::init(options.verbose).is_err() {
        tracing::debug!("A tracing subscriber was already installed");
    }

    let bindings = tv.bindings;
    let register_claim_file = bindings
        .register_claim_file
        .context("Linker didn't provide a way to register a claim-file hook")?;
    bindings
        .add_symbols
        .context("Linker didn't provide add_symbols")?;
    if bindings.register_all_symbols_read.is_some() {
        bindings
            .get_symbols
            .context("Linker can register an all-symbols-read hook, but didn't provide get_symbols")?;
    }

    let session = Session::new(RawHost::new(bindings), options)?;
    *lock_session() = Some(session);

    Status::check_raw(
        unsafe { register_claim_file(claim_file_hook) },
        "register claim-file hook",
    )?;
    if let Some(register) = bindings.register_cleanup {
        Status::check_raw(unsafe { register(cleanup_hook) }, "register cleanup hook")?;
    }
    if let Some(register) = bindings.register_all_symbols_read {
        Status::check_raw(
            unsafe { register(all_symbols_read_hook) },
            "register all-symbols-read hook",
        )?;
    }

    Ok(())
}

fn lock_session() -> MutexGuard<'static, Option<Session<RawHost>>> {
    SESSION.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `body` against the current session, converting errors and panics into a fatal message.
fn with_session(hook: &str, body: impl FnOnce(&mut Session<RawHost>) -> Result) -> Status {
    let mut guard = lock_session();
    let Some(session) = guard.as_mut() else {
        return report_fatal(None, &format!("{hook} called without a plugin session"));
    };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| body(&mut *session)));
    let host = session.host();
    match outcome {
        Ok(Ok(())) => Status::Ok,
        Ok(Err(error)) => report_fatal(Some(host), &one_line(&error)),
        Err(_) => report_fatal(Some(host), &format!("Panic in linker plugin {hook}")),
    }
}

unsafe extern "C" fn claim_file_hook(
    file: *const LdPluginInputFile,
    claimed: *mut c_int,
) -> Status {
    if !claimed.is_null() {
        unsafe { claimed.write(0) };
    }
    with_session("claim-file hook", |session| {
        let file = unsafe { file.as_ref() }.context("Linker passed a null input file")?;
        let name = unsafe { CStr::from_ptr(file.name) };
        let path = Path::new(OsStr::from_bytes(name.to_bytes()));

        // The descriptor belongs to the linker, so we mustn't close it.
        let source = ManuallyDrop::new(unsafe { File::from_raw_fd(file.fd) });

        let input = InputFile {
            path,
            file: &source,
            offset: u64::try_from(file.offset).context("Negative input file offset")?,
            size: u64::try_from(file.file_size).context("Negative input file size")?,
            handle: HostHandle(file.handle as usize),
        };
        let did_claim = session.claim_file(&input)?;
        if !claimed.is_null() {
            unsafe { claimed.write(c_int::from(did_claim)) };
        }
        Ok(())
    })
}

extern "C" fn all_symbols_read_hook() -> Status {
    with_session("all-symbols-read hook", Session::all_symbols_read)
}

extern "C" fn cleanup_hook() -> Status {
    let mut guard = lock_session();
    // A second cleanup finds no session and has nothing to do.
    let Some(mut session) = guard.take() else {
        return Status::Ok;
    };
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| session.cleanup()));
    let host = session.host();
    match outcome {
        Ok(Ok(())) => Status::Ok,
        Ok(Err(error)) => report_fatal(Some(host), &one_line(&error)),
        Err(_) => report_fatal(Some(host), "Panic in linker plugin cleanup hook"),
    }
}

/// Reports an error that the link can't recover from. If the linker gave us a message function,
/// it's expected to abort the link. Otherwise we do so ourselves.
fn report_fatal(host: Option<&RawHost>, text: &str) -> Status {
    tracing::error!("{text}");
    if host.is_some_and(|host| host.message(MessageLevel::Fatal, text)) {
        return Status::Err;
    }
    eprintln!("{}: {text}", MessageLevel::Fatal);
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin_api::AllSymbolsReadHook;
    use crate::plugin_api::ClaimFileHook;
    use crate::plugin_api::RawPluginSymbol;
    use libc::c_void;
    use std::ffi::CString;

    unsafe extern "C" fn register_claim_file(_hook: ClaimFileHook) -> c_int {
        Status::Ok as c_int
    }

    unsafe extern "C" fn register_all_symbols_read(_hook: AllSymbolsReadHook) -> c_int {
        Status::Ok as c_int
    }

    unsafe extern "C" fn add_symbols(
        _handle: *mut c_void,
        _count: c_int,
        _symbols: *const RawPluginSymbol,
    ) -> c_int {
        Status::Ok as c_int
    }

    fn start_error(tv: TransferVector) -> String {
        format!("{:#}", start_session(tv).unwrap_err())
    }

    /// A transfer vector with everything needed to start apart from get-symbols.
    fn without_get_symbols() -> TransferVector {
        let mut tv = TransferVector::default();
        tv.bindings.register_claim_file = Some(register_claim_file);
        tv.bindings.add_symbols = Some(add_symbols);
        tv.bindings.register_all_symbols_read = Some(register_all_symbols_read);
        tv
    }

    #[test]
    fn test_claim_file_registration_is_required() {
        let mut tv = without_get_symbols();
        tv.bindings.register_claim_file = None;
        let message = start_error(tv);
        assert!(message.contains("claim-file hook"), "{message}");
    }

    #[test]
    fn test_add_symbols_is_required() {
        let mut tv = TransferVector::default();
        tv.bindings.register_claim_file = Some(register_claim_file);
        let message = start_error(tv);
        assert!(message.contains("add_symbols"), "{message}");
    }

    #[test]
    fn test_get_symbols_is_required_with_all_symbols_read() {
        let message = start_error(without_get_symbols());
        assert!(message.contains("get_symbols"), "{message}");
    }

    #[test]
    fn test_invalid_options() {
        let mut tv = without_get_symbols();
        tv.options.push(c"-resolution=".to_owned());
        let message = start_error(tv);
        assert!(message.contains("-resolution="), "{message}");

        let mut tv = without_get_symbols();
        tv.options.push(CString::new(b"-pass-through=\xff".to_vec()).unwrap());
        let message = start_error(tv);
        assert!(message.contains("UTF-8"), "{message}");
    }
}
