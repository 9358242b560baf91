//! Error types for the Galaxy3D GPU resource layer
//!
//! Only recoverable or externally caused failures are represented here
//! (driver failures, bad configuration). Misuse of allocation ids, GPU lock
//! underflow and similar programmer errors panic at the call site instead.

use std::fmt;

/// Result type for Galaxy3D GPU operations
pub type Result<T> = std::result::Result<T, Error>;

/// Galaxy3D GPU errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, mock device, etc.)
    BackendError(String),

    /// Out of GPU memory, or a buffer size no longer fits the addressable range
    OutOfMemory,

    /// Invalid resource (unknown handle, out-of-range write, etc.)
    InvalidResource(String),

    /// Initialization failed (bad configuration, device creation)
    InitializationFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Log an ERROR message with file:line and build a `BackendError` from it
///
/// # Example
///
/// ```no_run
/// # use galaxy_3d_gpu::engine_err;
/// let err = engine_err!("galaxy3d::vulkan", "Failed to create fence: {}", 42);
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::galaxy3d::Engine::log_detailed(
            $crate::galaxy3d::log::LogSeverity::Error,
            $source,
            message.clone(),
            file!(),
            line!()
        );
        $crate::galaxy3d::Error::BackendError(message)
    }};
}

/// Log an ERROR message and return early with a `BackendError`
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $($arg)*))
    };
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
