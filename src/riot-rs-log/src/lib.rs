//! Provides logging facilities.
//!
//! The macros forward to [`defmt`] when the `defmt` feature is enabled, to the `log` facade
//! when the `log` feature is enabled, and otherwise compile to nothing while still evaluating
//! their arguments.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![deny(clippy::pedantic)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("feature \"defmt\" and feature \"log\" cannot be enabled at the same time");

#[cfg(feature = "defmt")]
pub mod defmt {
    //! Selected [`defmt`] items.

    // This module is hidden in the docs, but would still be imported by a wildcard import of this
    // crate's items.
    #[doc(hidden)]
    pub mod hidden {
        // Required so the macros can access it.
        #[doc(hidden)]
        pub use defmt;
    }

    pub use defmt::{unreachable, Debug2Format, Display2Format, Format};

    // These are required "internally" by `defmt`.
    pub use defmt::{export, Formatter, Str};
}

#[cfg(feature = "log")]
#[doc(hidden)]
pub mod hidden {
    pub use log;
}

// The declarative macros are required because the defmt macros expect defmt to be in scope.

/// Logs a message at the trace level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(feature = "defmt")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        use $crate::defmt::hidden::defmt;
        defmt::error!($($arg)*);
    }};
}

/// Logs a message at the trace level.
#[cfg(feature = "log")]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        $crate::hidden::log::trace!($($arg)*);
    }};
}

/// Logs a message at the debug level.
#[cfg(feature = "log")]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        $crate::hidden::log::debug!($($arg)*);
    }};
}

/// Logs a message at the info level.
#[cfg(feature = "log")]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        $crate::hidden::log::info!($($arg)*);
    }};
}

/// Logs a message at the warn level.
#[cfg(feature = "log")]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        $crate::hidden::log::warn!($($arg)*);
    }};
}

/// Logs a message at the error level.
#[cfg(feature = "log")]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        $crate::hidden::log::error!($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}

/// No-op log macro.
#[cfg(not(any(feature = "defmt", feature = "log")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        let _ = ($($arg)*);
    }};
}
