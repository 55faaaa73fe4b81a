//! MIFARE Classic block access inside an authenticated sector.
//!
//! Once [`MFRC522::authenticate`] succeeds the reader holds a crypto session;
//! nothing here issues Idle or SoftReset until [`MFRC522::stop_crypto1`].

use embedded_hal::blocking::delay::DelayUs;
use log::{debug, warn};

use super::com::Com;
use super::mfrc522::{Command, Register, MF_CRYPTO1_ON, MFRC522};
use super::picc::{self, Uid};
use super::transceive::{Frame, Status, Transaction};
use super::{Error, MifareKey, Result};

/// A MIFARE block is 16 bytes.
pub const BLOCK_SIZE: usize = 16;
/// Read answer in bits: 16 data bytes plus CRC_A.
const READ_RESPONSE_BITS: u16 = ((BLOCK_SIZE + 2) * 8) as u16;
/// The 4-bit ACK of the write phases.
const MF_ACK: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    fn command(self) -> picc::Command {
        match self {
            KeyType::A => picc::Command::MfAuthKeyA,
            KeyType::B => picc::Command::MfAuthKeyB,
        }
    }
}

/// Checks for the 4-bit ACK a MIFARE card sends after each write phase.
fn require_ack<E>(trans: &Transaction) -> Result<(), E> {
    if trans.status == Status::NoTag {
        return Err(Error::NoTag);
    }
    let code = trans.data.first().map_or(0, |b| b & 0x0F);
    if trans.bits != 4 || code != MF_ACK {
        return Err(Error::MifareNack(code));
    }
    Ok(())
}

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    /// Opens a crypto session for the sector holding `block`.
    ///
    /// MFAuthent must complete without error and MFCrypto1On must be set
    /// afterwards. MFCrypto1On alone is not enough: inside an open session it
    /// is still set from the previous sector. On failure the session flag is
    /// cleared, whatever the chip still reports.
    pub fn authenticate(
        &mut self,
        key_type: KeyType,
        block: u8,
        key: &MifareKey,
        uid: &Uid,
    ) -> Result<(), C::Error> {
        let mut buffer = [0u8; 12];
        buffer[0] = key_type.command() as u8;
        buffer[1] = block;
        buffer[2..8].copy_from_slice(key);
        buffer[8..].copy_from_slice(uid.bytes());

        let completed = match self.execute(Command::MFAuthent, &buffer) {
            Err(Error::Interface(e)) => return Err(Error::Interface(e)),
            Err(Error::Timeout) => {
                debug!("MFAuthent for block {} timed out", block);
                false
            }
            Err(_) => false,
            Ok(trans) => trans.status == Status::Ok,
        };

        if !completed || !self.crypto1_on()? {
            self.authenticated = false;
            let error = self.read_register(Register::ErrorReg)?;
            warn!(
                "authentication of block {} failed, ErrorReg={:#04x}",
                block, error
            );
            return Err(Error::AuthFailed);
        }
        self.authenticated = true;
        debug!("authenticated block {} with key {:?}", block, key_type);
        Ok(())
    }

    /// Reads one block. Needs an open session for its sector.
    pub fn read_block(&mut self, block: u8) -> Result<[u8; BLOCK_SIZE], C::Error> {
        let mut buffer = [picc::Command::MfRead as u8, block, 0, 0];
        let crc = self.calculate_crc(&buffer[..2])?;
        buffer[2..].copy_from_slice(&crc);

        let trans = self.execute(Command::Transceive, &buffer)?;
        if trans.status == Status::NoTag {
            return Err(Error::NoTag);
        }
        if trans.bits == 4 {
            return Err(Error::MifareNack(trans.data[0] & 0x0F));
        }
        if trans.bits != READ_RESPONSE_BITS {
            return Err(Error::ShortResponse {
                expected_bits: READ_RESPONSE_BITS,
                actual_bits: trans.bits,
            });
        }

        let mut data = [0u8; BLOCK_SIZE];
        data.copy_from_slice(&trans.data[..BLOCK_SIZE]);
        Ok(data)
    }

    /// Writes one block in the two phases MIFARE Classic requires. A failure
    /// in either phase aborts the write; the session stays as the chip
    /// reports it.
    pub fn write_block(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<(), C::Error> {
        let mut buffer = [picc::Command::MfWrite as u8, block, 0, 0];
        let crc = self.calculate_crc(&buffer[..2])?;
        buffer[2..].copy_from_slice(&crc);
        let trans = self.transceive_encrypted(Frame::new(&buffer))?;
        require_ack::<C::Error>(&trans)?;

        let mut buffer = [0u8; BLOCK_SIZE + 2];
        buffer[..BLOCK_SIZE].copy_from_slice(data);
        let crc = self.calculate_crc(data)?;
        buffer[BLOCK_SIZE..].copy_from_slice(&crc);
        let trans = self.transceive_encrypted(Frame::new(&buffer))?;
        require_ack::<C::Error>(&trans)?;

        debug!("wrote block {}", block);
        Ok(())
    }

    /// Ends the crypto session. The only way a session is closed.
    pub fn stop_crypto1(&mut self) -> Result<(), C::Error> {
        self.clear_register_bitmask(Register::Status2Reg, MF_CRYPTO1_ON)?;
        self.authenticated = false;
        Ok(())
    }
}
