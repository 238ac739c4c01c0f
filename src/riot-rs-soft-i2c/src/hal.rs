//! `embedded-hal` and `embedded-hal-async` I2C traits for [`SoftI2c`].

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    i2c::{ErrorType, SevenBitAddress, TenBitAddress},
};

use crate::{Direction, Error, SoftI2c};

pub(crate) use riot_rs_embassy_common::i2c::controller::Operation;

pub(crate) fn direction_of(operation: &Operation<'_>) -> Direction {
    match operation {
        Operation::Read(_) => Direction::Read,
        Operation::Write(_) => Direction::Write,
    }
}

impl<SDA, SCL, D> ErrorType for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    type Error = Error;
}

impl<SDA, SCL, D> embedded_hal::i2c::I2c<SevenBitAddress> for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_transaction(u16::from(address), false, operations)
    }
}

impl<SDA, SCL, D> embedded_hal::i2c::I2c<TenBitAddress> for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_transaction(address, true, operations)
    }
}

// NOTE: bit-banging keeps the CPU busy, the futures complete on their first poll.
impl<SDA, SCL, D> embedded_hal_async::i2c::I2c<SevenBitAddress> for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_transaction(u16::from(address), false, operations)
    }
}

impl<SDA, SCL, D> embedded_hal_async::i2c::I2c<TenBitAddress> for SoftI2c<SDA, SCL, D>
where
    SDA: InputPin + OutputPin,
    SCL: InputPin + OutputPin,
    D: DelayNs,
{
    async fn transaction(
        &mut self,
        address: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.run_transaction(address, true, operations)
    }
}
