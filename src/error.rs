//! Result codes shared by every fallible call in the crate.
//!
//! Mirrors the `err_t` taxonomy of the original firmware: callers that can
//! recover (e.g. [`crate::trigger`]) fold failure into a `bool`/default value
//! instead of propagating, while real-time paths (the ADC ISR, the DSP
//! pipeline, oscillogram append) never surface an `Error` at all — they drop
//! the offending input and keep running.

use core::fmt;

/// The result code taxonomy from the original firmware's `err_t`.
///
/// `NoError` has no variant here: success is `Ok(())`/`Ok(T)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A required input was absent (e.g. a `None` where a channel was
    /// expected, or a zero-length name).
    NullPointer,
    /// An argument was outside its accepted domain (e.g. a negative dwell
    /// time, or an unrecognized enum discriminant from the config file).
    InvalidValue,
    /// An index exceeded a static bound (channel index, buffer index).
    OutOfRange,
    /// A pool or queue was exhausted.
    OutOfMemory,
    /// A filesystem or SD card access failed.
    IoError,
    /// The operation is not allowed in the current state.
    State,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::NullPointer => "null pointer",
            Error::InvalidValue => "invalid value",
            Error::OutOfRange => "out of range",
            Error::OutOfMemory => "out of memory",
            Error::IoError => "I/O error",
            Error::State => "invalid state for operation",
        };
        f.write_str(s)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
