/// Register-level link to the MFRC522.
///
/// Addresses are raw 6-bit register numbers (0..=63); each implementation
/// applies its own bus addressing convention.
pub trait Com {
    type Error;

    fn read(&mut self, reg: u8) -> Result<u8, Self::Error>;
    fn write(&mut self, reg: u8, value: u8) -> Result<(), Self::Error>;

    fn set_bits(&mut self, reg: u8, mask: u8) -> Result<(), Self::Error> {
        let tmp = self.read(reg)?;
        self.write(reg, tmp | mask)
    }

    fn clear_bits(&mut self, reg: u8, mask: u8) -> Result<(), Self::Error> {
        let tmp = self.read(reg)?;
        self.write(reg, tmp & !mask)
    }
}

impl<T: Com + ?Sized> Com for &mut T {
    type Error = T::Error;

    fn read(&mut self, reg: u8) -> Result<u8, Self::Error> {
        (**self).read(reg)
    }
    fn write(&mut self, reg: u8, value: u8) -> Result<(), Self::Error> {
        (**self).write(reg, value)
    }
}
