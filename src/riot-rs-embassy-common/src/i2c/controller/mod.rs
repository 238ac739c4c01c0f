//! Provides architecture-agnostic I2C-related types, for controller mode.

use fugit::MicrosDurationU32;

pub use embedded_hal::i2c::Operation;
pub use fugit::KilohertzU32 as Kilohertz;

use crate::errno;

/// Default upper bound for a target stretching the clock.
///
/// Drivers are allowed to time out earlier.
pub const CLOCK_STRETCH_TIMEOUT: MicrosDurationU32 = MicrosDurationU32::millis(10);

/// I2C bus frequency.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frequency {
    /// Standard mode: 100 kHz.
    _100k,
    /// Fast mode: 400 kHz.
    _400k,
}

#[doc(hidden)]
#[macro_export]
macro_rules! impl_i2c_from_frequency {
    () => {
        impl From<riot_rs_embassy_common::i2c::controller::Frequency> for Frequency {
            fn from(freq: riot_rs_embassy_common::i2c::controller::Frequency) -> Self {
                match freq {
                    riot_rs_embassy_common::i2c::controller::Frequency::_100k => Frequency::_100k,
                    riot_rs_embassy_common::i2c::controller::Frequency::_400k => Frequency::_400k,
                }
            }
        }
    };
}

bitflags::bitflags! {
    /// Per-transfer flags, with the bit values of the RIOT `periph_i2c` API.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// The address is a 10-bit address.
        const ADDR10 = 0x01;
        /// The register address is 16 bits wide, sent big-endian.
        const REG16 = 0x02;
        /// Do not issue a STOP condition after the transfer.
        const NOSTOP = 0x04;
        /// Skip the START condition and the address; continue an open transfer.
        const NOSTART = 0x08;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Flags {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "Flags({=u8:#x})", self.bits());
    }
}

/// An I2C error, for controller mode.
// NOTE(eq): not deriving `Eq` here because it *could* semantically contain floats later.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A protocol error occurred (e.g., the transaction was terminated earlier than expected).
    Bus,
    /// Bus arbitration was lost (e.g., because there are multiple controllers on the bus).
    ArbitrationLoss,
    /// No acknowledgement was received when expected.
    NoAcknowledge(NoAcknowledgeSource),
    /// Overrun of the receive buffer, or a parameter too large for the transfer.
    Overrun,
    /// Timeout when attempting to use the bus; a target kept the clock stretched too long.
    Timeout,
    /// The requested combination of flags is not supported by this operation.
    Unsupported,
    /// An argument was out of range (e.g., an address wider than its addressing mode).
    InvalidParameter,
    /// An other error occurred.
    Other,
}

impl Error {
    /// Returns the negative errno value used to report this error through a C-style API.
    #[must_use]
    pub const fn errno(&self) -> i32 {
        -match self {
            Self::NoAcknowledge(_) => errno::ENXIO,
            Self::Timeout => errno::ETIMEDOUT,
            Self::ArbitrationLoss => errno::EAGAIN,
            Self::Overrun => errno::EOVERFLOW,
            Self::Unsupported => errno::EOPNOTSUPP,
            Self::InvalidParameter => errno::EINVAL,
            Self::Bus | Self::Other => errno::EIO,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Bus => f.write_str("bus error"),
            Self::ArbitrationLoss => f.write_str("arbitration lost"),
            Self::NoAcknowledge(NoAcknowledgeSource::Address) => {
                f.write_str("address not acknowledged")
            }
            Self::NoAcknowledge(NoAcknowledgeSource::Data) => f.write_str("data not acknowledged"),
            Self::NoAcknowledge(NoAcknowledgeSource::Unknown) => f.write_str("not acknowledged"),
            Self::Overrun => f.write_str("overrun"),
            Self::Timeout => f.write_str("clock stretching timed out"),
            Self::Unsupported => f.write_str("unsupported flags"),
            Self::InvalidParameter => f.write_str("invalid parameter"),
            Self::Other => f.write_str("other error"),
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        #[expect(clippy::enum_glob_use, reason = "local import only")]
        use embedded_hal::i2c::ErrorKind::*;

        match self {
            Self::Bus => Bus,
            Self::ArbitrationLoss => ArbitrationLoss,
            Self::NoAcknowledge(ack_source) => NoAcknowledge((*ack_source).into()),
            Self::Overrun => Overrun,
            Self::Timeout | Self::Unsupported | Self::InvalidParameter | Self::Other => Other,
        }
    }
}

/// Indicates what protocol step was not acknowledged by the target device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NoAcknowledgeSource {
    /// The device did not acknowledge its address.
    Address,
    /// The device did not acknowledge the data.
    Data,
    /// The device did not acknowledge either its address or its data.
    Unknown,
}

impl From<NoAcknowledgeSource> for embedded_hal::i2c::NoAcknowledgeSource {
    fn from(src: NoAcknowledgeSource) -> Self {
        match src {
            NoAcknowledgeSource::Address => embedded_hal::i2c::NoAcknowledgeSource::Address,
            NoAcknowledgeSource::Data => embedded_hal::i2c::NoAcknowledgeSource::Data,
            NoAcknowledgeSource::Unknown => embedded_hal::i2c::NoAcknowledgeSource::Unknown,
        }
    }
}
