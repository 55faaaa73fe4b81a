//! MFRC522 transceive engine and ISO 14443A / MIFARE Classic card protocol.
//!
//! Layers, leaves first: a register link ([`com::Com`]), the transceive
//! engine and CRC coprocessor adapter on [`MFRC522`], the PICC session layer
//! ([`picc`]), the block access layer ([`mifare`]), and the upward facade in
//! [`reader`].
//!
//! `no_std` without the default `std` feature; `std` adds the simulated chip
//! in [`mock`] and the companion line protocol in [`relay`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod com;
pub mod com_i2c;
pub mod com_spi;
pub mod config;
mod crc;
pub mod mfrc522;
pub mod mifare;
#[cfg(any(test, feature = "std"))]
pub mod mock;
pub mod picc;
pub mod poll;
pub mod reader;
#[cfg(feature = "std")]
pub mod relay;
pub mod transceive;
pub mod util;

use thiserror::Error;

pub use config::Config;
pub use mfrc522::{Command, Register, MFRC522};
pub use picc::Uid;
pub use poll::Budget;
pub use reader::AccessError;
pub use transceive::{Frame, Status, Transaction};

/// 6-byte MIFARE Classic sector key.
pub type MifareKey = [u8; 6];

#[derive(Debug, Error)]
pub enum Error<E> {
    /// 通信接口出错
    #[error("interface error: {0:?}")]
    Interface(E),
    /// No completion IRQ within the poll budget.
    #[error("timed out waiting for the reader")]
    Timeout,
    /// ErrorReg reported BufferOvfl, CollErr, ParityErr or ProtocolErr.
    #[error("transceive error, ErrorReg={0:#04x}")]
    Transceive(u8),
    /// The reader timer expired without any card answering.
    #[error("no tag responded")]
    NoTag,
    /// The answer was shorter than the frame requires, counted in bits.
    #[error("short response: expected {expected_bits} bits, got {actual_bits}")]
    ShortResponse { expected_bits: u16, actual_bits: u16 },
    /// MFCrypto1On was not set after MFAuthent.
    #[error("authentication failed")]
    AuthFailed,
    /// A MIFARE PICC responded with a 4-bit NAK.
    #[error("card answered NAK {0:#03x}")]
    MifareNack(u8),
    /// Refused to issue a command that would end the open crypto session.
    #[error("crypto session is active")]
    SessionActive,
}

pub type Result<T, E> = core::result::Result<T, Error<E>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_response_display() {
        let err: Error<()> = Error::ShortResponse {
            expected_bits: 144,
            actual_bits: 32,
        };
        let s = format!("{}", err);
        assert!(s.contains("expected 144 bits"));
        assert!(s.contains("got 32"));
    }

    #[test]
    fn transceive_display_shows_register() {
        let err: Error<()> = Error::Transceive(0x1B);
        assert!(format!("{}", err).contains("0x1b"));
    }

    #[test]
    fn interface_display_uses_debug() {
        let err: Error<&str> = Error::Interface("nss");
        assert!(format!("{}", err).contains("\"nss\""));
    }
}
