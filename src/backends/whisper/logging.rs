use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::sync::Once;

/// Forward whisper.cpp's native log lines to `tracing` at TRACE level.
///
/// whisper.cpp is very chatty while loading a model; at TRACE it stays out of the service
/// logs unless explicitly enabled with `MAILSCRIBE_LOG=whisper_cpp=trace`.
unsafe extern "C" fn whisper_log_callback(
    _level: u32,
    c_msg: *const c_char,
    _user_data: *mut c_void,
) {
    if c_msg.is_null() {
        return;
    }
    // SAFETY: whisper.cpp passes a valid NUL-terminated string for the duration of the call.
    let msg = unsafe { CStr::from_ptr(c_msg) }.to_string_lossy();
    let msg = msg.trim_end();
    if !msg.is_empty() {
        tracing::trace!(target: "whisper_cpp", "{msg}");
    }
}

/// Install the log callback exactly once for the lifetime of the process.
pub fn init_whisper_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    });
}
