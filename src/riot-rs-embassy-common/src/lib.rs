//! Architecture-agnostic types shared between architectures and bus drivers.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::pedantic)]
#![deny(missing_docs)]

pub mod errno;
pub mod gpio;

#[cfg(feature = "i2c")]
pub mod i2c;

pub mod reexports {
    //! Crates used by macros provided by this crate.
    pub use embedded_hal;
    pub use fugit;
}
