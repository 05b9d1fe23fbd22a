//! Test engine exporting the Warden engine ABI.
//!
//! - `loop` never returns
//! - `boom` fails with status 1 and `boom` on stderr
//! - `silent` succeeds without producing any buffers
//! - anything else is echoed to stdout with a trailing newline

use std::time::Duration;

fn hand_out(text: String, ptr: *mut *mut u8, len: *mut usize) {
    let bytes = text.into_bytes().into_boxed_slice();
    let size = bytes.len();
    // SAFETY: the caller passes valid out-parameters.
    unsafe {
        *len = size;
        *ptr = Box::into_raw(bytes).cast::<u8>();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn warden_engine_init() -> i32 {
    0
}

/// # Safety
///
/// `code` must point at `code_len` readable bytes and every out-parameter
/// must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn warden_engine_execute(
    code: *const u8,
    code_len: usize,
    stdout_ptr: *mut *mut u8,
    stdout_len: *mut usize,
    stderr_ptr: *mut *mut u8,
    stderr_len: *mut usize,
) -> i32 {
    let code = unsafe { std::slice::from_raw_parts(code, code_len) };
    let code = String::from_utf8_lossy(code);

    match code.as_ref() {
        "loop" => loop {
            std::thread::sleep(Duration::from_secs(1));
        },
        "boom" => {
            hand_out("boom".to_string(), stderr_ptr, stderr_len);
            1
        }
        "silent" => 0,
        other => {
            hand_out(format!("{other}\n"), stdout_ptr, stdout_len);
            0
        }
    }
}

/// # Safety
///
/// `ptr` and `len` must come from a buffer returned by
/// `warden_engine_execute` and must not be freed twice.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn warden_engine_free(ptr: *mut u8, len: usize) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, len)) });
}
