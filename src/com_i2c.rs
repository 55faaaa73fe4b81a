use super::com::Com;
use embedded_hal::blocking::i2c;

/// I2C link. The MFRC522 takes the plain register number as the first byte.
pub struct ComI2c<I2C> {
    com: I2C,
    addr: u8,
}
impl<I2C> ComI2c<I2C> {
    pub fn new(i2c: I2C, addr: u8) -> Self {
        Self { com: i2c, addr }
    }

    pub fn release(self) -> I2C {
        self.com
    }
}
impl<I2C, E> Com for ComI2c<I2C>
where
    I2C: i2c::WriteRead<Error = E> + i2c::Write<Error = E>,
{
    type Error = E;

    fn read(&mut self, reg: u8) -> Result<u8, E> {
        let mut value = [0u8];
        self.com.write_read(self.addr, &[reg & 0x3F], &mut value)?;
        Ok(value[0])
    }
    fn write(&mut self, reg: u8, value: u8) -> Result<(), E> {
        self.com.write(self.addr, &[reg & 0x3F, value])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::I2cRegisters;

    #[test]
    fn register_round_trip() {
        let bus = I2cRegisters::new(0x28);
        let mut link = ComI2c::new(bus, 0x28);
        link.write(0x26, 0x7F).unwrap();
        assert_eq!(link.read(0x26).unwrap(), 0x7F);
        link.clear_bits(0x26, 0x0F).unwrap();
        assert_eq!(link.read(0x26).unwrap(), 0x70);
    }

    #[test]
    fn wrong_address_is_reported() {
        let bus = I2cRegisters::new(0x28);
        let mut link = ComI2c::new(bus, 0x29);
        assert!(link.read(0x01).is_err());
    }
}
