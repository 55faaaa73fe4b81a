use embedded_hal::blocking::delay::DelayUs;
use log::{debug, warn};

use super::com::Com;
use super::mfrc522::MFRC522;
use super::transceive::{Frame, Status, Transaction};
use super::{Error, Result};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    REQA = 0x26, // REQuest command, Type A. Invites PICCs in state IDLE to go to READY. 7 bit frame.
    WUPA = 0x52, // Wake-UP command, Type A. Invites PICCs in state IDLE and HALT to go to READY. 7 bit frame.
    CT = 0x88,   // Cascade Tag. Not really a command, but used during anti collision.
    SelCl1 = 0x93, // Anti collision/Select, Cascade Level 1
    HLTA = 0x50, // HaLT command, Type A. Instructs an ACTIVE PICC to go to state HALT.
    // MIFARE Classic (MF1S503x, section 9)
    MfAuthKeyA = 0x60, // Perform authentication with Key A
    MfAuthKeyB = 0x61, // Perform authentication with Key B
    MfRead = 0x30,     // Reads one 16 byte block from the authenticated sector of the PICC.
    MfWrite = 0xA0,    // Writes one 16 byte block to the authenticated sector of the PICC.
}

/// NVB for "send me the whole UID": 2 bytes, no UID bits.
const NVB_ANTICOLL: u8 = 0x20;
/// NVB for select: 7 full bytes.
const NVB_SELECT: u8 = 0x70;
/// SAK bit 3: UID not complete, a further cascade level follows.
const SAK_CASCADE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardType {
    Unknown,
    Iso14443_4,    // PICC compliant with ISO/IEC 14443-4
    Iso18092,      // PICC compliant with ISO/IEC 18092 (NFC)
    MifareMini,    // MIFARE Classic protocol, 320 bytes
    Mifare1k,      // MIFARE Classic protocol, 1KB
    Mifare4k,      // MIFARE Classic protocol, 4KB
    MifareUL,      // MIFARE Ultralight or Ultralight C
    MifarePlus,    // MIFARE Plus
    TNP3XXX,       // Only mentioned in NXP AN 10833 MIFARE Type Identification Procedure
    NotComplete,   // SAK indicates UID is not complete.
}

impl CardType {
    pub fn from_sak(sak: u8) -> Self {
        // http://www.nxp.com/documents/application_note/AN10833.pdf
        // 3.2 Coding of Select Acknowledge (SAK)
        // ignore 8-bit (iso14443 starts with LSBit = bit 1)
        // fixes wrong type for manufacturer Infineon (http://nfc-tools.org/index.php?title=ISO14443A)
        match sak & 0x7F {
            0x04 => CardType::NotComplete, // UID not complete
            0x09 => CardType::MifareMini,
            0x08 => CardType::Mifare1k,
            0x18 => CardType::Mifare4k,
            0x00 => CardType::MifareUL,
            0x10 | 0x11 => CardType::MifarePlus,
            0x01 => CardType::TNP3XXX,
            0x20 => CardType::Iso14443_4,
            0x40 => CardType::Iso18092,
            _ => CardType::Unknown,
        }
    }
}

/// Single-size UID captured by cascade level 1 anticollision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uid {
    bytes: [u8; 4],
    bcc: u8,
    sak: Option<u8>,
}

impl Uid {
    /// UID with its BCC computed.
    pub fn new(bytes: [u8; 4]) -> Self {
        Self {
            bytes,
            bcc: bcc(&bytes),
            sak: None,
        }
    }

    /// UID and check byte as received from the card.
    pub fn from_anticollision(raw: [u8; 5]) -> Self {
        Self {
            bytes: [raw[0], raw[1], raw[2], raw[3]],
            bcc: raw[4],
            sak: None,
        }
    }

    pub fn bytes(&self) -> &[u8; 4] {
        &self.bytes
    }

    pub fn bcc(&self) -> u8 {
        self.bcc
    }

    /// SAK, once the card has been selected.
    pub fn sak(&self) -> Option<u8> {
        self.sak
    }

    pub fn card_type(&self) -> Option<CardType> {
        self.sak.map(CardType::from_sak)
    }

    /// The check byte matches the XOR of the UID bytes.
    pub fn is_valid(&self) -> bool {
        bcc(&self.bytes) == self.bcc
    }
}

fn bcc(bytes: &[u8; 4]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn require_tag<E>(trans: &Transaction) -> Result<(), E> {
    match trans.status {
        Status::Ok => Ok(()),
        Status::NoTag => Err(Error::NoTag),
    }
}

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    /// REQA: wakes cards in IDLE. Returns the ATQA.
    pub fn request_a(&mut self) -> Result<[u8; 2], C::Error> {
        self.wake(Command::REQA)
    }

    /// WUPA: wakes cards in IDLE or HALT. Returns the ATQA.
    pub fn wakeup_a(&mut self) -> Result<[u8; 2], C::Error> {
        self.wake(Command::WUPA)
    }

    fn wake(&mut self, cmd: Command) -> Result<[u8; 2], C::Error> {
        let trans = self.transceive(Frame::short(&[cmd as u8], 7))?;
        require_tag::<C::Error>(&trans)?;
        match trans.data.as_slice() {
            &[a, b] => {
                debug!("{:?} -> ATQA {:02x}{:02x}", cmd, a, b);
                Ok([a, b])
            }
            _ => Err(Error::ShortResponse {
                expected_bits: 16,
                actual_bits: trans.bits,
            }),
        }
    }

    /// Cascade level 1 anticollision: asks the card for its full UID.
    ///
    /// A BCC mismatch is logged and left to select, which the card will
    /// refuse.
    pub fn anticollision_cl1(&mut self) -> Result<Uid, C::Error> {
        let trans = self.transceive(Frame::new(&[Command::SelCl1 as u8, NVB_ANTICOLL]))?;
        require_tag::<C::Error>(&trans)?;
        if trans.len() < 5 {
            return Err(Error::ShortResponse {
                expected_bits: 40,
                actual_bits: trans.bits,
            });
        }
        let d = &trans.data;
        let uid = Uid::from_anticollision([d[0], d[1], d[2], d[3], d[4]]);
        if !uid.is_valid() {
            warn!("BCC mismatch for UID {:02x?}: {:#04x}", uid.bytes(), uid.bcc());
        }
        Ok(uid)
    }

    /// Selects `uid` at cascade level 1 and records its SAK.
    ///
    /// Any answer of at least one byte counts as selected.
    pub fn select(&mut self, uid: &mut Uid) -> Result<u8, C::Error> {
        let mut buffer = [0u8; 9];
        buffer[0] = Command::SelCl1 as u8;
        buffer[1] = NVB_SELECT;
        buffer[2..6].copy_from_slice(&uid.bytes);
        buffer[6] = uid.bcc;
        let crc = self.calculate_crc(&buffer[..7])?;
        buffer[7..].copy_from_slice(&crc);

        let trans = self.transceive(Frame::new(&buffer))?;
        require_tag::<C::Error>(&trans)?;
        let sak = match trans.data.first() {
            Some(&sak) => sak,
            None => {
                return Err(Error::ShortResponse {
                    expected_bits: 8,
                    actual_bits: trans.bits,
                })
            }
        };
        if sak & SAK_CASCADE != 0 {
            debug!("SAK {:#04x} announces another cascade level", sak);
        }
        debug!("selected {:02x?}, {:?}", uid.bytes, CardType::from_sak(sak));
        uid.sak = Some(sak);
        Ok(sak)
    }
}
