//! Sharing one software I2C bus between tasks.

use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    mutex::{Mutex, MutexGuard},
};
use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::SoftI2c;

/// A handle on a shared I2C bus, implementing [`embedded_hal_async::i2c::I2c`].
///
/// Every transaction locks the bus for its whole duration.
pub type I2cDevice<'a, M, BUS> =
    embassy_embedded_hal::shared_bus::asynch::i2c::I2cDevice<'a, M, BUS>;

/// A [`SoftI2c`] behind a mutex.
///
/// [`acquire()`](SharedSoftI2c::acquire) gives exclusive access to the bus for a sequence of
/// transfers, which ends when the returned guard is dropped.
///
/// # Examples
///
/// ```ignore
/// static I2C_BUS: StaticCell<SharedSoftI2c<CriticalSectionRawMutex, Sda, Scl, Delay>> =
///     StaticCell::new();
///
/// let bus = I2C_BUS.init(SharedSoftI2c::new(SoftI2c::new(sda, scl, Delay, Config::default())));
///
/// let mut i2c = bus.acquire().await;
/// i2c.write_regs(0x19, 0x20, &[0x57], Flags::empty())?;
/// drop(i2c);
/// ```
pub struct SharedSoftI2c<M: RawMutex, SDA, SCL, D> {
    bus: Mutex<M, SoftI2c<SDA, SCL, D>>,
}

impl<M, SDA, SCL, D> SharedSoftI2c<M, SDA, SCL, D>
where
    M: RawMutex,
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    pub const fn new(bus: SoftI2c<SDA, SCL, D>) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    /// Waits until the bus is available and locks it.
    pub async fn acquire(&self) -> MutexGuard<'_, M, SoftI2c<SDA, SCL, D>> {
        self.bus.lock().await
    }

    /// Locks the bus if it is currently available.
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, M, SoftI2c<SDA, SCL, D>>> {
        self.bus.try_lock().ok()
    }

    /// Returns a device handle locking the bus around each transaction.
    pub fn device(&self) -> I2cDevice<'_, M, SoftI2c<SDA, SCL, D>> {
        I2cDevice::new(&self.bus)
    }

    pub fn into_inner(self) -> SoftI2c<SDA, SCL, D> {
        self.bus.into_inner()
    }
}
