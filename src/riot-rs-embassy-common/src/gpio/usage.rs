//! Bookkeeping of which peripheral currently uses which GPIO pin.
//!
//! Pin multiplexing itself is done by the HAL; the table only records ownership so that two
//! drivers cannot silently take over the same pin. It is shared between threads and interrupt
//! handlers, and is therefore guarded by a critical section.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};

/// What a GPIO pin is currently used for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinUsage {
    /// Free for general-purpose use.
    Gpio,
    /// Used by an I2C bus, either hardware or software.
    I2c,
    /// Used by an SPI bus.
    Spi,
    /// Used by the SPI bus connected to the external flash.
    SpiFlash,
    /// Used by a UART.
    Uart,
    /// Used as PWM channel output.
    Pwm,
    /// Used as ADC input.
    Adc,
    /// Used as DAC output.
    Dac,
    /// Used by the CAN controller.
    Can,
    /// Reserved by the board, e.g., for strapping or a crystal.
    Reserved,
    /// The pin does not exist on this MCU.
    NotExist,
}

/// Errors returned by a [`PinUsageRegistry`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The pin number is outside of the table.
    NoSuchPin,
    /// The pin is already used by another peripheral.
    InUse(PinUsage),
}

/// Object-safe interface to a pin-usage table, so drivers do not need to know its size.
pub trait PinUsageRegistry: Sync {
    /// Returns the current usage of `pin`, [`PinUsage::NotExist`] if it is out of range.
    fn usage(&self, pin: u8) -> PinUsage;

    /// Records `usage` for `pin` if the pin is free or already used the same way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InUse`] with the current usage if another peripheral owns the pin, or
    /// [`Error::NoSuchPin`] if the pin is not in the table.
    fn claim(&self, pin: u8, usage: PinUsage) -> Result<(), Error>;

    /// Gives `pin` back to GPIO use, if it is currently claimed for `usage`.
    fn release(&self, pin: u8, usage: PinUsage);
}

/// Pin-usage table for an MCU with `N` GPIO pins.
///
/// # Examples
///
/// ```
/// use riot_rs_embassy_common::gpio::usage::{PinUsage, PinUsageTable};
///
/// static PINS: PinUsageTable<40> = PinUsageTable::new();
///
/// PINS.set(6, PinUsage::SpiFlash).unwrap();
/// assert_eq!(PINS.get(6), PinUsage::SpiFlash);
/// assert_eq!(PINS.get(40), PinUsage::NotExist);
/// ```
pub struct PinUsageTable<const N: usize> {
    table: Mutex<CriticalSectionRawMutex, RefCell<[PinUsage; N]>>,
}

impl<const N: usize> PinUsageTable<N> {
    /// Creates a table where every pin is available as GPIO.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new([PinUsage::Gpio; N])),
        }
    }

    /// Returns the current usage of `pin`.
    #[must_use]
    pub fn get(&self, pin: u8) -> PinUsage {
        self.table.lock(|table| {
            table
                .borrow()
                .get(usize::from(pin))
                .copied()
                .unwrap_or(PinUsage::NotExist)
        })
    }

    /// Unconditionally records `usage` for `pin`.
    ///
    /// This is meant for board initialization (e.g., marking strapping pins as reserved).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchPin`] if the pin is not in the table.
    pub fn set(&self, pin: u8, usage: PinUsage) -> Result<(), Error> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let slot = table.get_mut(usize::from(pin)).ok_or(Error::NoSuchPin)?;
            *slot = usage;
            Ok(())
        })
    }
}

impl<const N: usize> Default for PinUsageTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PinUsageRegistry for PinUsageTable<N> {
    fn usage(&self, pin: u8) -> PinUsage {
        self.get(pin)
    }

    fn claim(&self, pin: u8, usage: PinUsage) -> Result<(), Error> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let slot = table.get_mut(usize::from(pin)).ok_or(Error::NoSuchPin)?;
            match *slot {
                PinUsage::Gpio => {
                    *slot = usage;
                    Ok(())
                }
                current if current == usage => Ok(()),
                current => Err(Error::InUse(current)),
            }
        })
    }

    fn release(&self, pin: u8, usage: PinUsage) {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            if let Some(slot) = table.get_mut(usize::from(pin)) {
                if *slot == usage {
                    *slot = PinUsage::Gpio;
                }
            }
        });
    }
}
