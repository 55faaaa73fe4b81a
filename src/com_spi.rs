use super::com::Com;
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::spi::{Mode, Phase, Polarity};
use thiserror::Error;

/// Settle time around chip-select edges, in microseconds.
const CS_SETTLE_US: u16 = 2;

#[derive(Debug, Error)]
pub enum SpiError<S, P> {
    #[error("spi transfer failed: {0:?}")]
    Spi(S),
    #[error("chip select failed: {0:?}")]
    ChipSelect(P),
}

/// SPI link: every register access is one 2-byte exchange with CS held low.
pub struct ComSpi<SPI, CS, D> {
    com: SPI,
    cs: CS,
    delay: D,
}

impl<SPI, CS, D> ComSpi<SPI, CS, D> {
    /// SPI mode 0, MSB first.
    pub const MODE: Mode = Mode {
        polarity: Polarity::IdleLow,
        phase: Phase::CaptureOnFirstTransition,
    };

    pub fn new(spi: SPI, cs: CS, delay: D) -> Self {
        Self {
            com: spi,
            cs,
            delay,
        }
    }

    pub fn release(self) -> (SPI, CS, D) {
        (self.com, self.cs, self.delay)
    }

    pub(crate) fn read_address(reg: u8) -> u8 {
        ((reg << 1) & 0x7E) | 0x80
    }

    pub(crate) fn write_address(reg: u8) -> u8 {
        (reg << 1) & 0x7E
    }
}

impl<SPI, CS, D, S, P> ComSpi<SPI, CS, D>
where
    SPI: spi::Transfer<u8, Error = S>,
    CS: OutputPin<Error = P>,
    D: DelayUs<u16>,
{
    fn exchange(&mut self, frame: &mut [u8; 2]) -> Result<(), SpiError<S, P>> {
        self.cs.set_low().map_err(SpiError::ChipSelect)?;
        self.delay.delay_us(CS_SETTLE_US);
        let res = self.com.transfer(frame).map(|_| ()).map_err(SpiError::Spi);
        self.delay.delay_us(CS_SETTLE_US);
        // release CS even when the transfer failed
        self.cs.set_high().map_err(SpiError::ChipSelect)?;
        res
    }
}

impl<SPI, CS, D, S, P> Com for ComSpi<SPI, CS, D>
where
    SPI: spi::Transfer<u8, Error = S>,
    CS: OutputPin<Error = P>,
    D: DelayUs<u16>,
{
    type Error = SpiError<S, P>;

    fn read(&mut self, reg: u8) -> Result<u8, Self::Error> {
        let mut frame = [Self::read_address(reg), 0x00];
        self.exchange(&mut frame)?;
        // the first returned byte is filler
        Ok(frame[1])
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Self::Error> {
        let mut frame = [Self::write_address(reg), value];
        self.exchange(&mut frame)
    }
}
