use fugit::MicrosDurationU32;
use riot_rs_embassy_common::i2c::controller::{Kilohertz, CLOCK_STRETCH_TIMEOUT};

/// I2C bus configuration.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// SCL frequency, before clock stretching.
    pub frequency: Frequency,
    /// How long a target may hold SCL low before the transfer fails with
    /// [`Error::Timeout`](crate::Error::Timeout).
    pub clock_stretch_timeout: MicrosDurationU32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frequency: Frequency::_100k,
            clock_stretch_timeout: CLOCK_STRETCH_TIMEOUT,
        }
    }
}

/// I2C bus frequency.
// NOTE: high-speed mode (3.4 MHz) cannot be reached by toggling GPIOs and is not offered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Frequency {
    /// Low speed.
    _10k,
    /// Standard mode.
    _100k,
    /// Fast mode.
    _400k,
    /// Fast mode plus.
    _1M,
}

impl Frequency {
    pub const fn first() -> Self {
        Self::_10k
    }

    pub const fn last() -> Self {
        Self::_1M
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::_10k => Some(Self::_100k),
            Self::_100k => Some(Self::_400k),
            Self::_400k => Some(Self::_1M),
            Self::_1M => None,
        }
    }

    pub const fn prev(self) -> Option<Self> {
        match self {
            Self::_10k => None,
            Self::_100k => Some(Self::_10k),
            Self::_400k => Some(Self::_100k),
            Self::_1M => Some(Self::_400k),
        }
    }

    pub const fn khz(self) -> u32 {
        match self {
            Self::_10k => 10,
            Self::_100k => 100,
            Self::_400k => 400,
            Self::_1M => 1000,
        }
    }

    /// Returns the duration of half an SCL period, in nanoseconds.
    pub const fn half_period_ns(self) -> u32 {
        500_000 / self.khz()
    }
}

riot_rs_embassy_common::impl_i2c_from_frequency!();

impl From<Frequency> for Kilohertz {
    fn from(freq: Frequency) -> Self {
        Kilohertz::kHz(freq.khz())
    }
}

/// Returns the highest I2C frequency available that fits into the requested range.
///
/// # Examples
///
/// ```
/// # use riot_rs_soft_i2c::{highest_freq_in, Frequency, Kilohertz};
/// let freq = const { highest_freq_in(Kilohertz::kHz(100)..=Kilohertz::kHz(250)) };
/// assert_eq!(freq, Frequency::_100k);
/// ```
///
/// # Panics
///
/// This function is only intended to be used in a `const` context.
/// It panics if no suitable frequency can be found.
pub const fn highest_freq_in(range: core::ops::RangeInclusive<Kilohertz>) -> Frequency {
    let min = range.start().to_kHz();
    let max = range.end().to_kHz();

    assert!(max >= min);

    let mut freq = Frequency::first();

    loop {
        // If not yet in the requested range
        if freq.khz() < min {
            if let Some(next) = freq.next() {
                freq = next;
            } else {
                const_panic::concat_panic!(
                    "could not find a suitable I2C frequency: ",
                    min,
                    " kHz (minimum requested)",
                    " > ",
                    freq.khz(),
                    " kHz (highest available)"
                );
            }
        } else {
            break;
        }
    }

    loop {
        // If already outside of the requested range
        if freq.khz() > max {
            const_panic::concat_panic!(
                "could not find a suitable I2C frequency: ",
                max,
                " kHz (maximum requested) < ",
                freq.khz(),
                " kHz (lowest available)"
            );
        } else if let Some(next) = freq.next() {
            // The upper bound is inclusive.
            if next.khz() <= max {
                freq = next;
            } else {
                break;
            }
        } else {
            break;
        }
    }

    freq
}
