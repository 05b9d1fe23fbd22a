//! Engine loaded from a shared library.
//!
//! The library exports a small C ABI:
//!
//! ```text
//! int32_t warden_engine_init(void);                        // optional, 0 = ok
//! int32_t warden_engine_execute(const uint8_t *code, size_t code_len,
//!                               uint8_t **stdout_ptr, size_t *stdout_len,
//!                               uint8_t **stderr_ptr, size_t *stderr_len);
//! void    warden_engine_free(uint8_t *ptr, size_t len);
//! ```
//!
//! `warden_engine_execute` returns 0 on success. Any other status is a
//! failure whose message is the stderr buffer. Buffers returned through the
//! out-parameters belong to the library and are handed back through
//! `warden_engine_free`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::ipc::ENGINE_PATH_ENV;

use super::{CapabilitySlot, Engine, EngineError, EngineLoader, EngineOutput};

/// Base name of the engine library (`libwarden_engine.so` on Linux).
pub const ENGINE_LIBRARY_NAME: &str = "warden_engine";

type InitFn = unsafe extern "C" fn() -> i32;

/// `(code, code_len, stdout, stdout_len, stderr, stderr_len) -> status`
type ExecuteFn = unsafe extern "C" fn(
    *const u8,
    usize,
    *mut *mut u8,
    *mut usize,
    *mut *mut u8,
    *mut usize,
) -> i32;

type FreeFn = unsafe extern "C" fn(*mut u8, usize);

/// Loads the engine from a shared library at a fixed location.
#[derive(Debug, Clone)]
pub struct DylibEngineLoader {
    path: PathBuf,
}

impl DylibEngineLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The well-known location: `WARDEN_ENGINE_PATH`, else the platform
    /// library name next to the current executable.
    ///
    /// Existence is not checked here; a missing library surfaces as a
    /// bootstrap failure.
    pub fn locate() -> Self {
        if let Ok(path) = std::env::var(ENGINE_PATH_ENV) {
            return Self::new(path);
        }

        let file_name = libloading::library_filename(ENGINE_LIBRARY_NAME);
        let path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
            .unwrap_or_else(|| PathBuf::from(&file_name));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DylibEngine, EngineError> {
        // SAFETY: the engine library is trusted host code; running its
        // initializers is the point of loading it.
        let library = unsafe { Library::new(&self.path) }.map_err(|e| {
            EngineError::new(format!(
                "failed to load engine library '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        // Bootstrap routine, if the library has one
        if let Ok(init) = unsafe { library.get::<InitFn>("warden_engine_init".as_bytes()) } {
            let status = unsafe { init() };
            if status != 0 {
                return Err(EngineError::new(format!(
                    "engine init returned status {}",
                    status
                )));
            }
        }

        let (execute, free) = {
            let execute: Symbol<ExecuteFn> =
                unsafe { library.get("warden_engine_execute".as_bytes()) }.map_err(|e| {
                    EngineError::new(format!("engine has no execute entry point: {}", e))
                })?;
            let free: Symbol<FreeFn> = unsafe { library.get("warden_engine_free".as_bytes()) }
                .map_err(|e| EngineError::new(format!("engine has no free entry point: {}", e)))?;
            (*execute, *free)
        };

        Ok(DylibEngine {
            execute,
            free,
            _library: library,
        })
    }
}

impl EngineLoader for DylibEngineLoader {
    fn start(&self, slot: CapabilitySlot) -> Result<(), EngineError> {
        let engine = self.load()?;
        tracing::debug!(library = %self.path.display(), "engine library loaded");
        slot.publish(Arc::new(engine));
        Ok(())
    }
}

/// Engine backed by a loaded library.
///
/// The function pointers stay valid for as long as `_library` is alive.
struct DylibEngine {
    execute: ExecuteFn,
    free: FreeFn,
    _library: Library,
}

impl DylibEngine {
    /// Copy a library-owned buffer out and release it.
    fn take_buffer(&self, ptr: *mut u8, len: usize) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        // SAFETY: the library promises `ptr` points at `len` initialized bytes
        // until it is passed back to `free`.
        let text = unsafe {
            let bytes = std::slice::from_raw_parts(ptr, len);
            String::from_utf8_lossy(bytes).into_owned()
        };
        unsafe { (self.free)(ptr, len) };
        Some(text)
    }
}

impl Engine for DylibEngine {
    fn execute(&self, code: &str) -> Result<EngineOutput, EngineError> {
        let mut stdout_ptr: *mut u8 = std::ptr::null_mut();
        let mut stdout_len: usize = 0;
        let mut stderr_ptr: *mut u8 = std::ptr::null_mut();
        let mut stderr_len: usize = 0;

        let status = unsafe {
            (self.execute)(
                code.as_ptr(),
                code.len(),
                &mut stdout_ptr,
                &mut stdout_len,
                &mut stderr_ptr,
                &mut stderr_len,
            )
        };

        let stdout = self.take_buffer(stdout_ptr, stdout_len);
        let stderr = self.take_buffer(stderr_ptr, stderr_len);

        if status == 0 {
            Ok(EngineOutput { stdout, stderr })
        } else {
            Err(EngineError::new(stderr.unwrap_or_else(|| {
                format!("engine returned status {}", status)
            })))
        }
    }
}
