//! Software I2C controller, toggling two open-drain GPIOs.
//!
//! This provides an I2C bus in controller mode on any pair of pins, for MCUs without a free
//! I2C peripheral or when the peripheral cannot be routed to the required pins.
//!
//! Both lines must be configured as open-drain outputs whose input buffer stays enabled (e.g.,
//! `esp_hal::gpio::OutputOpenDrain`), so that setting a line high releases it and reading it
//! returns the actual bus level. Clock stretching by targets is honored up to
//! [`Config::clock_stretch_timeout`], and bus arbitration loss is detected by reading back
//! every transmitted bit.
//!
//! Transfers never retry on their own: each failing call returns its error after bringing the
//! bus back to an idle state when possible.

#![cfg_attr(not(test), no_std)]
#![deny(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::indexing_slicing))]

mod config;
mod hal;
mod shared;

#[cfg(test)]
mod sim;

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};
use riot_rs_embassy_common::gpio::{
    usage::{self, PinUsage, PinUsageRegistry},
    Level,
};
use riot_rs_log::{debug, trace, warn};

pub use config::{highest_freq_in, Config, Frequency};
pub use riot_rs_embassy_common::i2c::controller::{Error, Flags, Kilohertz, NoAcknowledgeSource};
pub use shared::{I2cDevice, SharedSoftI2c};

/// Number of SCL pulses sent to make a target release SDA.
const RECOVERY_PULSES: u8 = 10;

/// Interval between two polls of a line a target may hold low.
const POLL_INTERVAL_NS: u32 = 1_000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Direction {
    Write,
    Read,
}

impl Direction {
    const fn rw_bit(self) -> u8 {
        match self {
            Self::Write => 0,
            Self::Read => 1,
        }
    }
}

struct PinClaim {
    registry: &'static dyn PinUsageRegistry,
    sda: u8,
    scl: u8,
}

/// Bit-banged I2C controller.
///
/// `SDA` and `SCL` are open-drain lines, `D` provides the bus timing.
/// Use [`SharedSoftI2c`] to share the bus between tasks.
pub struct SoftI2c<SDA, SCL, D> {
    sda: SDA,
    scl: SCL,
    delay: D,
    half_period_ns: u32,
    stretch_polls: u32,
    /// Whether a START was sent without a matching STOP yet.
    started: bool,
    claim: Option<PinClaim>,
}

impl<SDA, SCL, D> SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    /// Creates a controller on the given lines and releases both of them.
    ///
    /// If a target is found holding SDA low, the bus is clocked until it lets go.
    pub fn new(sda: SDA, scl: SCL, delay: D, config: Config) -> Self {
        let mut bus = Self {
            sda,
            scl,
            delay,
            half_period_ns: config.frequency.half_period_ns(),
            stretch_polls: config.clock_stretch_timeout.to_micros(),
            started: false,
            claim: None,
        };

        debug!(
            "[soft_i2c] init: {} kHz, half period {} ns",
            config.frequency.khz(),
            bus.half_period_ns
        );

        let _ = bus.sda_release();
        let _ = bus.scl_release();

        if bus.sda_level() != Ok(Level::High) {
            warn!("[soft_i2c] bus found locked during init, trying to recover");
            let _ = bus.recover_locked_bus();
        }

        bus
    }

    /// Like [`SoftI2c::new()`], but first records both pins as used by I2C in `registry`.
    ///
    /// The pins are handed back to GPIO use by [`SoftI2c::release()`].
    ///
    /// # Errors
    ///
    /// Fails if one of the pins is used by another peripheral or does not exist, in which case
    /// the registry is left unchanged. Using the same pin for both lines fails with
    /// [`usage::Error::InUse`].
    pub fn new_tracked(
        sda: SDA,
        scl: SCL,
        delay: D,
        config: Config,
        registry: &'static dyn PinUsageRegistry,
        sda_pin: u8,
        scl_pin: u8,
    ) -> Result<Self, usage::Error> {
        if sda_pin == scl_pin {
            return Err(usage::Error::InUse(PinUsage::I2c));
        }

        let scl_was_claimed = registry.usage(scl_pin) == PinUsage::I2c;
        registry.claim(scl_pin, PinUsage::I2c)?;

        if let Err(err) = registry.claim(sda_pin, PinUsage::I2c) {
            if !scl_was_claimed {
                registry.release(scl_pin, PinUsage::I2c);
            }
            return Err(err);
        }

        let mut bus = Self::new(sda, scl, delay, config);
        bus.claim = Some(PinClaim {
            registry,
            sda: sda_pin,
            scl: scl_pin,
        });

        Ok(bus)
    }

    /// Releases both lines and gives the pins back.
    pub fn release(mut self) -> (SDA, SCL, D) {
        let _ = self.sda_release();
        let _ = self.scl_release();

        let Self {
            sda,
            scl,
            delay,
            claim,
            ..
        } = self;

        if let Some(claim) = claim {
            claim.registry.release(claim.sda, PinUsage::I2c);
            claim.registry.release(claim.scl, PinUsage::I2c);
        }

        (sda, scl, delay)
    }

    /// Reads `buffer.len()` bytes from the target at `address`.
    ///
    /// The last byte is not acknowledged, signaling the end of the read to the target. With
    /// [`Flags::NOSTOP`] it is acknowledged instead, so the read must be continued by another
    /// one with [`Flags::NOSTART`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an empty buffer or an address out of range, and
    /// the bus error otherwise.
    pub fn read_bytes(&mut self, address: u16, buffer: &mut [u8], flags: Flags) -> Result<(), Error> {
        trace!(
            "[soft_i2c] read_bytes(addr: {:#x}, len: {}, flags: {:#x})",
            address,
            buffer.len(),
            flags.bits()
        );

        if buffer.is_empty() {
            return Err(Error::InvalidParameter);
        }
        let ten_bit = flags.contains(Flags::ADDR10);
        check_address(address, ten_bit)?;

        self.with_recovery(|bus| {
            if !flags.contains(Flags::NOSTART) {
                bus.send_address(address, Direction::Read, ten_bit)?;
            }
            bus.receive(buffer, !flags.contains(Flags::NOSTOP))?;
            if !flags.contains(Flags::NOSTOP) {
                bus.stop_condition()?;
            }
            Ok(())
        })
    }

    /// Writes `data` to the target at `address`.
    ///
    /// An empty `data` only addresses the target, which can be used to probe for its presence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an address out of range, and the bus error
    /// otherwise.
    pub fn write_bytes(&mut self, address: u16, data: &[u8], flags: Flags) -> Result<(), Error> {
        trace!(
            "[soft_i2c] write_bytes(addr: {:#x}, len: {}, flags: {:#x})",
            address,
            data.len(),
            flags.bits()
        );

        let ten_bit = flags.contains(Flags::ADDR10);
        check_address(address, ten_bit)?;

        self.with_recovery(|bus| {
            if !flags.contains(Flags::NOSTART) {
                bus.send_address(address, Direction::Write, ten_bit)?;
            }
            bus.transmit(data)?;
            if !flags.contains(Flags::NOSTOP) {
                bus.stop_condition()?;
            }
            Ok(())
        })
    }

    /// Reads a single byte from the target at `address`.
    ///
    /// # Errors
    ///
    /// See [`SoftI2c::read_bytes()`].
    pub fn read_byte(&mut self, address: u16, flags: Flags) -> Result<u8, Error> {
        let mut buffer = [0];
        self.read_bytes(address, &mut buffer, flags)?;
        let [byte] = buffer;
        Ok(byte)
    }

    /// Writes a single byte to the target at `address`.
    ///
    /// # Errors
    ///
    /// See [`SoftI2c::write_bytes()`].
    pub fn write_byte(&mut self, address: u16, byte: u8, flags: Flags) -> Result<(), Error> {
        self.write_bytes(address, &[byte], flags)
    }

    /// Reads consecutive registers of the target at `address`, starting at `reg`.
    ///
    /// The register address is written first, followed by a repeated START and the read.
    /// With [`Flags::REG16`] the register address is sent as two big-endian bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] if [`Flags::NOSTART`] or [`Flags::NOSTOP`] is set, and
    /// [`Error::InvalidParameter`] if `reg` does not fit into the register address width.
    pub fn read_regs(
        &mut self,
        address: u16,
        reg: u16,
        buffer: &mut [u8],
        flags: Flags,
    ) -> Result<(), Error> {
        let reg_bytes = reg.to_be_bytes();
        let reg_bytes = register_address(&reg_bytes, flags)?;
        if buffer.is_empty() {
            return Err(Error::InvalidParameter);
        }
        check_address(address, flags.contains(Flags::ADDR10))?;

        self.write_bytes(address, reg_bytes, flags | Flags::NOSTOP)?;
        self.read_bytes(address, buffer, flags)
    }

    /// Reads a single register of the target at `address`.
    ///
    /// # Errors
    ///
    /// See [`SoftI2c::read_regs()`].
    pub fn read_reg(&mut self, address: u16, reg: u16, flags: Flags) -> Result<u8, Error> {
        let mut buffer = [0];
        self.read_regs(address, reg, &mut buffer, flags)?;
        let [byte] = buffer;
        Ok(byte)
    }

    /// Writes `data` into consecutive registers of the target at `address`, starting at `reg`.
    ///
    /// # Errors
    ///
    /// See [`SoftI2c::read_regs()`].
    pub fn write_regs(
        &mut self,
        address: u16,
        reg: u16,
        data: &[u8],
        flags: Flags,
    ) -> Result<(), Error> {
        let reg_bytes = reg.to_be_bytes();
        let reg_bytes = register_address(&reg_bytes, flags)?;

        self.write_bytes(address, reg_bytes, flags | Flags::NOSTOP)?;
        self.write_bytes(address, data, flags | Flags::NOSTART)
    }

    /// Writes a single register of the target at `address`.
    ///
    /// # Errors
    ///
    /// See [`SoftI2c::read_regs()`].
    pub fn write_reg(&mut self, address: u16, reg: u16, byte: u8, flags: Flags) -> Result<(), Error> {
        self.write_regs(address, reg, &[byte], flags)
    }

    /// Runs the operations of an embedded-hal transaction.
    pub(crate) fn run_transaction(
        &mut self,
        address: u16,
        ten_bit: bool,
        operations: &mut [hal::Operation<'_>],
    ) -> Result<(), Error> {
        if operations
            .iter()
            .any(|op| matches!(op, hal::Operation::Read(buffer) if buffer.is_empty()))
        {
            return Err(Error::InvalidParameter);
        }
        check_address(address, ten_bit)?;

        if operations.is_empty() {
            return Ok(());
        }

        self.with_recovery(|bus| {
            let mut previous = None;
            let mut operations = operations.iter_mut().peekable();

            while let Some(operation) = operations.next() {
                let next = operations.peek().map(|op| hal::direction_of(op));

                match operation {
                    hal::Operation::Read(buffer) => {
                        if previous != Some(Direction::Read) {
                            bus.send_address(address, Direction::Read, ten_bit)?;
                        }
                        // Adjacent reads are merged; only the end of the run is not acknowledged.
                        bus.receive(buffer, next != Some(Direction::Read))?;
                        previous = Some(Direction::Read);
                    }
                    hal::Operation::Write(data) => {
                        if previous != Some(Direction::Write) {
                            bus.send_address(address, Direction::Write, ten_bit)?;
                        }
                        bus.transmit(data)?;
                        previous = Some(Direction::Write);
                    }
                }
            }

            bus.stop_condition()
        })
    }

    fn with_recovery<T>(
        &mut self,
        transfer: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let res = transfer(&mut *self);
        res.map_err(|err| self.handle_error(err))
    }

    /// Brings the bus back to idle after a failed transfer, as far as possible.
    fn handle_error(&mut self, err: Error) -> Error {
        self.started = false;

        let err = match err {
            Error::NoAcknowledge(_) => {
                let _ = self.stop_condition();
                err
            }
            Error::ArbitrationLoss => {
                let _ = self.scl_release();
                self.half_period();
                if self.sda_up_and_wait().is_ok() {
                    err
                } else {
                    // Not an arbitration loss but a target holding SDA.
                    self.recover_locked_bus()
                }
            }
            _ => err,
        };

        debug!("[soft_i2c] transfer failed: {}", err);
        err
    }

    /// Clocks the bus until a target holding SDA low lets go, then sends a STOP.
    ///
    /// Always returns an error: [`Error::Timeout`] if SCL is held low as well,
    /// [`Error::ArbitrationLoss`] otherwise, as the interrupted transfer is lost either way.
    fn recover_locked_bus(&mut self) -> Error {
        warn!("[soft_i2c] trying to recover locked bus");

        for _ in 0..RECOVERY_PULSES {
            self.half_period();
            if let Err(err) = self.scl_up_and_wait() {
                warn!("[soft_i2c] recovery timed out");
                return err;
            }
            self.half_period();
            if let Err(err) = self.scl_low() {
                return err;
            }
        }

        if self.sda_level() == Ok(Level::High) {
            let _ = self.stop_condition();
            debug!("[soft_i2c] SDA no longer locked");
        }

        Error::ArbitrationLoss
    }

    fn send_address(&mut self, address: u16, direction: Direction, ten_bit: bool) -> Result<(), Error> {
        let [high, low] = address.to_be_bytes();

        self.start_condition()?;

        if ten_bit {
            let header = 0xf0 | ((high & 0x03) << 1);
            self.tx_byte(header, NoAcknowledgeSource::Address)?;
            self.tx_byte(low, NoAcknowledgeSource::Address)?;
            if direction == Direction::Read {
                // 10-bit reads re-send the header with the read bit after a repeated START.
                self.start_condition()?;
                self.tx_byte(header | Direction::Read.rw_bit(), NoAcknowledgeSource::Address)?;
            }
            Ok(())
        } else {
            self.tx_byte((low << 1) | direction.rw_bit(), NoAcknowledgeSource::Address)
        }
    }

    fn receive(&mut self, buffer: &mut [u8], nack_last: bool) -> Result<(), Error> {
        let last = buffer.len().saturating_sub(1);
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.rx_byte(nack_last && i == last)?;
        }
        Ok(())
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), Error> {
        for byte in data {
            self.tx_byte(*byte, NoAcknowledgeSource::Data)?;
        }
        Ok(())
    }

    /// Sends a START, or a repeated START if a transfer is already open.
    fn start_condition(&mut self) -> Result<(), Error> {
        trace!(
            "[soft_i2c] {}start condition",
            if self.started { "repeated " } else { "" }
        );

        if self.started {
            self.sda_release()?;
            self.half_period();
            self.scl_up_and_wait()?;
            self.half_period();
        }

        if self.sda_level()? == Level::Low {
            return Err(Error::ArbitrationLoss);
        }

        self.sda_low()?;
        self.half_period();
        self.scl_low()?;
        self.started = true;

        Ok(())
    }

    fn stop_condition(&mut self) -> Result<(), Error> {
        trace!("[soft_i2c] stop condition");

        self.sda_low()?;
        self.half_period();
        self.scl_up_and_wait()?;
        self.half_period();
        self.sda_release()?;
        self.half_period();
        self.started = false;

        // Someone else is still driving SDA.
        if self.sda_level()? == Level::Low {
            return Err(Error::ArbitrationLoss);
        }

        Ok(())
    }

    fn tx_bit(&mut self, bit: Level) -> Result<(), Error> {
        match bit {
            Level::High => self.sda_release()?,
            Level::Low => self.sda_low()?,
        }

        self.half_period();
        self.scl_up_and_wait()?;
        self.half_period();

        if self.sda_level()? != bit {
            return Err(Error::ArbitrationLoss);
        }

        self.scl_low()
    }

    fn rx_bit(&mut self) -> Result<Level, Error> {
        self.sda_release()?;
        self.half_period();
        self.scl_up_and_wait()?;
        self.half_period();
        let bit = self.sda_level()?;
        self.scl_low()?;

        Ok(bit)
    }

    fn tx_byte(&mut self, byte: u8, source: NoAcknowledgeSource) -> Result<(), Error> {
        trace!("[soft_i2c] TX: {:#x}", byte);

        for i in (0..8).rev() {
            self.tx_bit(Level::from(byte & (1 << i) != 0))?;
        }

        match self.rx_bit()? {
            Level::Low => Ok(()),
            Level::High => Err(Error::NoAcknowledge(source)),
        }
    }

    fn rx_byte(&mut self, nack: bool) -> Result<u8, Error> {
        let mut byte = 0u8;
        for _ in 0..8 {
            byte = (byte << 1) | u8::from(bool::from(self.rx_bit()?));
        }

        self.tx_bit(Level::from(nack))?;

        trace!("[soft_i2c] RX: {:#x}", byte);
        Ok(byte)
    }

    fn half_period(&mut self) {
        self.delay.delay_ns(self.half_period_ns);
    }

    fn scl_up_and_wait(&mut self) -> Result<(), Error> {
        self.scl_release()?;
        wait_for_high(&mut self.scl, &mut self.delay, self.stretch_polls)
    }

    fn sda_up_and_wait(&mut self) -> Result<(), Error> {
        self.sda_release()?;
        wait_for_high(&mut self.sda, &mut self.delay, self.stretch_polls)
    }

    fn sda_level(&mut self) -> Result<Level, Error> {
        self.sda.is_high().map(Level::from).map_err(pin_error)
    }

    fn sda_release(&mut self) -> Result<(), Error> {
        self.sda.set_high().map_err(pin_error)
    }

    fn sda_low(&mut self) -> Result<(), Error> {
        self.sda.set_low().map_err(pin_error)
    }

    fn scl_release(&mut self) -> Result<(), Error> {
        self.scl.set_high().map_err(pin_error)
    }

    fn scl_low(&mut self) -> Result<(), Error> {
        self.scl.set_low().map_err(pin_error)
    }
}

/// Polls `line` until it is high, for at most `polls` poll intervals.
fn wait_for_high<P: InputPin, D: DelayNs>(line: &mut P, delay: &mut D, polls: u32) -> Result<(), Error> {
    for _ in 0..polls {
        if line.is_high().map_err(pin_error)? {
            return Ok(());
        }
        delay.delay_ns(POLL_INTERVAL_NS);
    }

    if line.is_high().map_err(pin_error)? {
        Ok(())
    } else {
        Err(Error::Timeout)
    }
}

#[allow(clippy::needless_pass_by_value, reason = "used as map_err() callback")]
fn pin_error<E>(_err: E) -> Error {
    Error::Other
}

fn check_address(address: u16, ten_bit: bool) -> Result<(), Error> {
    let max = if ten_bit { 0x3ff } else { 0x7f };
    if address > max {
        return Err(Error::InvalidParameter);
    }
    Ok(())
}

/// Returns the bytes of a register address on the wire, out of its big-endian representation.
fn register_address(reg_be: &[u8; 2], flags: Flags) -> Result<&[u8], Error> {
    if flags.intersects(Flags::NOSTART | Flags::NOSTOP) {
        return Err(Error::Unsupported);
    }

    if flags.contains(Flags::REG16) {
        return Ok(reg_be);
    }

    match reg_be {
        [0, low] => Ok(core::slice::from_ref(low)),
        _ => Err(Error::InvalidParameter),
    }
}
