use embedded_hal::blocking::delay::DelayUs;
use log::warn;

use super::com::Com;
use super::mfrc522::{Command, Register, CRC_IRQ, MFRC522};
use super::poll::await_condition;
use super::{Error, Result};

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    /// CRC_A over `data` on the coprocessor, as `[low, high]`.
    ///
    /// A coprocessor timeout is not an error: whatever sits in the result
    /// registers is returned and the card rejects the frame if it is wrong.
    pub fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2], C::Error> {
        self.idle_unless_authenticated()?;
        self.write_register(Register::DivIrqReg, CRC_IRQ)?;
        self.flush_fifo()?;
        for &b in data {
            self.write_register(Register::FIFODataReg, b)?;
        }
        self.command(Command::CalcCRC)?;

        // Wait for the CRC calculation to complete.
        let budget = self.config.crc_budget;
        let done = await_condition(&mut self.com, &mut self.delay, budget, |com| {
            let n = com.read(Register::DivIrqReg as u8)?;
            Ok(if n & CRC_IRQ != 0 { Some(()) } else { None })
        })
        .map_err(Error::Interface)?;
        if done.is_none() {
            warn!("CRC coprocessor did not finish, using current result");
        }

        self.idle_unless_authenticated()?;
        let res_low = self.read_register(Register::CRCResultRegLow)?;
        let res_high = self.read_register(Register::CRCResultRegHigh)?;
        Ok([res_low, res_high])
    }
}
