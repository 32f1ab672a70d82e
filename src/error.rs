//! Error types and the native error-checking facility.
//!
//! Fallible setup (shader compilation, program linking, object creation)
//! returns [`Error`]. Failures the native API only reports asynchronously are
//! queued by the driver and drained with [`check`], which logs every pending
//! [`GlErrorCode`] together with the call site that asked.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::device::{Device, ShaderStage};

/// Errors raised while building the transparency pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// A shader stage failed to compile.
    #[error("failed to compile {stage} shader: {log}")]
    ShaderCompile {
        /// The stage being compiled.
        stage: ShaderStage,
        /// The driver's info log.
        log: String,
    },

    /// A program failed to link.
    #[error("failed to link program: {0}")]
    ProgramLink(String),

    /// The native API refused to create an object.
    #[error("failed to create {kind}: {reason}")]
    ResourceCreation {
        /// What was being created (`"texture"`, `"framebuffer"`, ...).
        kind: &'static str,
        /// The reason reported by the driver.
        reason: String,
    },

    /// A shader source file could not be read.
    #[error("failed to read shader source {}: {source}", path.display())]
    ShaderIo {
        /// The file that was requested.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A shader `#include` named a string that was never registered.
    #[error("unresolved shader include {0:?}")]
    UnresolvedInclude(String),

    /// Include expansion nested deeper than the preprocessor allows.
    #[error("shader include nesting too deep while expanding {0:?}")]
    IncludeDepth(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A queued native error, as returned by `glGetError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlErrorCode {
    /// `GL_INVALID_ENUM`
    InvalidEnum,
    /// `GL_INVALID_VALUE`
    InvalidValue,
    /// `GL_INVALID_OPERATION`
    InvalidOperation,
    /// `GL_STACK_OVERFLOW`
    StackOverflow,
    /// `GL_STACK_UNDERFLOW`
    StackUnderflow,
    /// `GL_OUT_OF_MEMORY`
    OutOfMemory,
    /// `GL_INVALID_FRAMEBUFFER_OPERATION`
    InvalidFramebufferOperation,
    /// Any code this crate has no name for.
    Unknown(u32),
}

impl GlErrorCode {
    /// Maps a raw error code. Returns `None` for `GL_NO_ERROR`.
    #[must_use]
    pub fn from_raw(code: u32) -> Option<Self> {
        Some(match code {
            0 => return None,
            0x0500 => Self::InvalidEnum,
            0x0501 => Self::InvalidValue,
            0x0502 => Self::InvalidOperation,
            0x0503 => Self::StackOverflow,
            0x0504 => Self::StackUnderflow,
            0x0505 => Self::OutOfMemory,
            0x0506 => Self::InvalidFramebufferOperation,
            other => Self::Unknown(other),
        })
    }

    /// The symbolic name of the code.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::InvalidEnum => "GL_INVALID_ENUM",
            Self::InvalidValue => "GL_INVALID_VALUE",
            Self::InvalidOperation => "GL_INVALID_OPERATION",
            Self::StackOverflow => "GL_STACK_OVERFLOW",
            Self::StackUnderflow => "GL_STACK_UNDERFLOW",
            Self::OutOfMemory => "GL_OUT_OF_MEMORY",
            Self::InvalidFramebufferOperation => "GL_INVALID_FRAMEBUFFER_OPERATION",
            Self::Unknown(_) => "unknown GL error",
        }
    }
}

impl fmt::Display for GlErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown GL error 0x{code:04x}"),
            known => f.write_str(known.name()),
        }
    }
}

/// Upper bound on errors drained per check. A lost context can report the
/// same error forever.
const MAX_DRAINED_ERRORS: usize = 32;

static CHECKING: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Whether [`check`] polls the driver. Defaults to on in debug builds.
pub fn is_checking() -> bool {
    CHECKING.load(Ordering::Relaxed)
}

/// Enables or disables [`check`] for every device in the process.
pub fn set_checking(enable: bool) {
    CHECKING.store(enable, Ordering::Relaxed);
}

/// Drains every queued native error, logging each with `location`.
///
/// Returns `true` if at least one error was pending. Does nothing (and
/// returns `false`) while checking is disabled.
pub fn check<D: Device + ?Sized>(device: &D, location: &str) -> bool {
    if !is_checking() {
        return false;
    }

    let mut found = false;
    for _ in 0..MAX_DRAINED_ERRORS {
        let Some(code) = device.error() else {
            break;
        };
        log::error!("{code} at {location}");
        found = true;
    }
    found
}

/// Clears every queued native error without reporting it.
pub fn clear<D: Device + ?Sized>(device: &D) {
    for _ in 0..MAX_DRAINED_ERRORS {
        if device.error().is_none() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingDevice;

    #[test]
    fn from_raw_maps_known_codes() {
        assert_eq!(GlErrorCode::from_raw(0), None);
        assert_eq!(GlErrorCode::from_raw(0x0502), Some(GlErrorCode::InvalidOperation));
        assert_eq!(
            GlErrorCode::from_raw(0x0506),
            Some(GlErrorCode::InvalidFramebufferOperation)
        );
        assert_eq!(GlErrorCode::from_raw(0x1234), Some(GlErrorCode::Unknown(0x1234)));
    }

    #[test]
    fn display_uses_symbolic_names() {
        assert_eq!(GlErrorCode::OutOfMemory.to_string(), "GL_OUT_OF_MEMORY");
        assert_eq!(
            GlErrorCode::Unknown(0xbeef).to_string(),
            "unknown GL error 0xbeef"
        );
    }

    #[test]
    fn clear_discards_queued_errors() {
        let device = RecordingDevice::new();
        device.state.borrow_mut().pending_errors.extend([
            GlErrorCode::InvalidEnum,
            GlErrorCode::InvalidValue,
            GlErrorCode::OutOfMemory,
        ]);

        clear(&device);

        assert!(device.state.borrow().pending_errors.is_empty());
        assert_eq!(device.error(), None);
    }

    #[test]
    fn clear_stops_at_the_drain_limit() {
        let device = RecordingDevice::new();
        device
            .state
            .borrow_mut()
            .pending_errors
            .extend(std::iter::repeat_n(GlErrorCode::InvalidOperation, MAX_DRAINED_ERRORS + 3));

        clear(&device);

        assert_eq!(device.state.borrow().pending_errors.len(), 3);
    }

    #[test]
    fn shader_compile_error_names_the_stage() {
        let err = Error::ShaderCompile {
            stage: ShaderStage::Compute,
            log: "0:1: syntax error".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to compile compute shader: 0:1: syntax error"
        );
    }
}
