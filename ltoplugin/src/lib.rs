use libltoplugin::plugin_api::LdPluginTv;
use libltoplugin::plugin_api::Status;

/// Called by the linker when it loads the plugin.
///
/// # Safety
/// Must only be called by a linker that implements the GNU plugin API, passing a valid transfer
/// vector.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn onload(tv: *const LdPluginTv) -> Status {
    unsafe { libltoplugin::ffi::onload(tv) }
}
