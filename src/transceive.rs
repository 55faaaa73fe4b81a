//! The command cycle shared by every PICC exchange: flush, load the FIFO,
//! trigger, poll ComIrqReg, classify ErrorReg, drain the FIFO.

use embedded_hal::blocking::delay::DelayUs;
use heapless::Vec;
use log::debug;

use super::com::Com;
use super::mfrc522::{
    Command, Register, BUFFER_OVFL, COLL_ERR, ERR_IRQ, IDLE_IRQ, IRQ_INV,
    LO_ALERT_IRQ, MFRC522, PARITY_ERR, PROTOCOL_ERR, RX_IRQ, START_SEND, TIMER_IRQ, TX_IRQ,
};
use super::poll::{await_condition, Budget};
use super::{Error, Result};

/// Longest response kept from the FIFO.
pub const MAX_RESPONSE: usize = 16;

/// Errors that abort a cycle. The session-preserving transceive tolerates
/// collisions while no session is open.
const ERROR_MASK: u8 = BUFFER_OVFL | COLL_ERR | PARITY_ERR | PROTOCOL_ERR;
const ERROR_MASK_ANTICOLL: u8 = BUFFER_OVFL | PARITY_ERR | PROTOCOL_ERR;

/// Bytes to transmit plus the number of valid bits in the last byte
/// (0 means all eight).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub bytes: &'a [u8],
    pub valid_bits: u8,
}

impl<'a> Frame<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            valid_bits: 0,
        }
    }

    /// Short frame: only `valid_bits` of the last byte go on air.
    pub fn short(bytes: &'a [u8], valid_bits: u8) -> Self {
        Self {
            bytes,
            valid_bits: valid_bits & 0x07,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// The reader timer expired: no card answered. Any buffered bytes are
    /// still returned.
    NoTag,
}

/// Outcome of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub status: Status,
    pub data: Vec<u8, MAX_RESPONSE>,
    /// Received length in bits. Can exceed `data.len() * 8` when the FIFO
    /// held more than [`MAX_RESPONSE`] bytes.
    pub bits: u16,
}

impl Transaction {
    fn empty(status: Status) -> Self {
        Self {
            status,
            data: Vec::new(),
            bits: 0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Interrupt setup per command: (ComIEnReg enable bits, completion bits).
fn irq_masks(command: Command) -> (u8, u8) {
    match command {
        Command::Transceive | Command::Receive => (
            TIMER_IRQ | ERR_IRQ | LO_ALERT_IRQ | IDLE_IRQ | RX_IRQ | TX_IRQ,
            RX_IRQ | IDLE_IRQ,
        ),
        _ => (ERR_IRQ | IDLE_IRQ, IDLE_IRQ),
    }
}

fn is_transceive(command: Command) -> bool {
    matches!(command, Command::Transceive | Command::Receive)
}

/// Bit length from FIFOLevel and RxLastBits.
pub(crate) fn received_bits(level: u8, last_bits: u8) -> u16 {
    let level = u16::from(level);
    if last_bits != 0 {
        level.saturating_sub(1) * 8 + u16::from(last_bits)
    } else {
        level * 8
    }
}

struct Cycle {
    command: Command,
    irq_enable: Option<u8>,
    wait_irq: u8,
    idle_baseline: bool,
    bit_framing: Option<u8>,
    error_mask: u8,
    budget: Budget,
    /// Drain at least one byte even when the FIFO reports none.
    drain_min_one: bool,
}

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    /// Runs `command` over `send_data` and waits for completion.
    ///
    /// Transceive-class commands wait for RxIRq or IdleIRq, anything else
    /// (MFAuthent) for IdleIRq only. The Idle baseline is skipped while a
    /// crypto session is open.
    pub fn execute(&mut self, command: Command, send_data: &[u8]) -> Result<Transaction, C::Error> {
        let (irq_enable, wait_irq) = irq_masks(command);
        let cycle = Cycle {
            command,
            irq_enable: Some(irq_enable),
            wait_irq,
            idle_baseline: true,
            bit_framing: None,
            error_mask: ERROR_MASK,
            budget: self.config.command_budget,
            drain_min_one: true,
        };
        self.run(&cycle, send_data)
    }

    /// Transceive with an explicit valid-bit count for the last byte. Never
    /// drops an open crypto session.
    pub fn transceive(&mut self, frame: Frame<'_>) -> Result<Transaction, C::Error> {
        let in_session = self.session_active()?;
        let cycle = Cycle {
            command: Command::Transceive,
            irq_enable: None,
            wait_irq: RX_IRQ | IDLE_IRQ,
            idle_baseline: !in_session,
            bit_framing: Some(frame.valid_bits),
            error_mask: if in_session {
                ERROR_MASK
            } else {
                ERROR_MASK_ANTICOLL
            },
            budget: self.config.transceive_budget,
            drain_min_one: false,
        };
        self.run(&cycle, frame.bytes)
    }

    /// Transceive inside an open crypto session: no Idle baseline and the
    /// shorter encrypted budget. An empty answer is an error.
    pub fn transceive_encrypted(&mut self, frame: Frame<'_>) -> Result<Transaction, C::Error> {
        let cycle = Cycle {
            command: Command::Transceive,
            irq_enable: None,
            wait_irq: RX_IRQ | IDLE_IRQ,
            idle_baseline: false,
            bit_framing: Some(frame.valid_bits),
            error_mask: ERROR_MASK,
            budget: self.config.encrypted_budget,
            drain_min_one: false,
        };
        let trans = self.run(&cycle, frame.bytes)?;
        if trans.is_empty() {
            return Err(Error::NoTag);
        }
        Ok(trans)
    }

    fn run(&mut self, cycle: &Cycle, send_data: &[u8]) -> Result<Transaction, C::Error> {
        if let Some(enable) = cycle.irq_enable {
            self.write_register(Register::ComlEnReg, enable | IRQ_INV)?;
        }
        // Idle before clearing the IRQs so a terminated command cannot leave
        // a stale IdleIRq behind.
        if cycle.idle_baseline {
            self.idle_unless_authenticated()?;
        }
        self.write_register(Register::ComIrqReg, 0x7F)?;
        self.flush_fifo()?;

        for &b in send_data {
            self.write_register(Register::FIFODataReg, b)?;
        }
        if let Some(bits) = cycle.bit_framing {
            self.write_register(Register::BitFramingReg, bits & 0x07)?;
        }

        self.command(cycle.command)?;
        let transceive = is_transceive(cycle.command);
        if transceive {
            // StartSend only takes effect once the command is running.
            self.set_register_bitmask(Register::BitFramingReg, START_SEND)?;
        }

        let wait = cycle.wait_irq | TIMER_IRQ;
        let irq = await_condition(&mut self.com, &mut self.delay, cycle.budget, |com| {
            let n = com.read(Register::ComIrqReg as u8)?;
            Ok(if n & wait != 0 { Some(n) } else { None })
        })
        .map_err(Error::Interface)?;

        self.clear_register_bitmask(Register::BitFramingReg, START_SEND)?;

        let irq = match irq {
            Some(irq) => irq,
            None => {
                debug!("{:?} timed out", cycle.command);
                return Err(Error::Timeout);
            }
        };

        let error_reg_value = self.read_register(Register::ErrorReg)?;
        if error_reg_value & cycle.error_mask != 0 {
            debug!("{:?} failed, ErrorReg={:#04x}", cycle.command, error_reg_value);
            return Err(Error::Transceive(error_reg_value));
        }

        let timer_fired = match cycle.irq_enable {
            Some(enable) => irq & enable & TIMER_IRQ != 0,
            None => irq & TIMER_IRQ != 0,
        };
        let status = if timer_fired { Status::NoTag } else { Status::Ok };

        if !transceive {
            debug!("{:?} -> {:?}", cycle.command, status);
            return Ok(Transaction::empty(status));
        }

        let trans = self.drain_fifo(status, cycle.drain_min_one)?;
        debug!(
            "{:?} -> {:?}, {} bytes, {} bits",
            cycle.command,
            trans.status,
            trans.len(),
            trans.bits
        );
        Ok(trans)
    }

    fn drain_fifo(&mut self, status: Status, min_one: bool) -> Result<Transaction, C::Error> {
        let level = self.read_register(Register::FIFOLevelReg)? & 0x7F;
        // RxLastBits[2:0]: valid bits of the last received byte, 0 = all.
        let last_bits = self.read_register(Register::ControlReg)? & 0x07;
        let bits = received_bits(level, last_bits);

        let floor = if min_one { 1 } else { 0 };
        let n = level.clamp(floor, MAX_RESPONSE as u8);
        let mut data = Vec::new();
        for _ in 0..n {
            let b = self.read_register(Register::FIFODataReg)?;
            if data.push(b).is_err() {
                break;
            }
        }
        Ok(Transaction { status, data, bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{NoDelay, SimCard, SimChip};
    use crate::mfrc522::{MF_CRYPTO1_ON, CRC_ERR};
    use crate::Config;

    fn reader(chip: &mut SimChip) -> MFRC522<&mut SimChip, NoDelay> {
        MFRC522::new(chip, NoDelay, Config::fast())
    }

    #[test]
    fn bit_length_arithmetic() {
        assert_eq!(received_bits(2, 0), 16);
        assert_eq!(received_bits(1, 4), 4);
        assert_eq!(received_bits(18, 0), 144);
        assert_eq!(received_bits(3, 7), 23);
        assert_eq!(received_bits(0, 0), 0);
        assert_eq!(received_bits(0, 3), 3);
    }

    #[test]
    fn irq_mask_table() {
        assert_eq!(irq_masks(Command::Transceive), (0x77, 0x30));
        assert_eq!(irq_masks(Command::MFAuthent), (0x12, 0x10));
        assert_eq!(ERROR_MASK, 0x1B);
        assert_eq!(ERROR_MASK_ANTICOLL, 0x13);
    }

    #[test]
    fn stalled_chip_times_out() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        chip.stall(true);
        let mut mfrc = reader(&mut chip);
        assert!(matches!(
            mfrc.execute(Command::Transceive, &[0x26]),
            Err(Error::Timeout)
        ));
        assert!(matches!(
            mfrc.transceive(Frame::short(&[0x26], 7)),
            Err(Error::Timeout)
        ));
        // StartSend is cleared even after a timeout
        assert_eq!(chip.register(Register::BitFramingReg) & START_SEND, 0);
    }

    #[test]
    fn empty_field_reports_no_tag() {
        let mut chip = SimChip::new();
        let mut mfrc = reader(&mut chip);
        let trans = mfrc.execute(Command::Transceive, &[0x93, 0x20]).unwrap();
        assert_eq!(trans.status, Status::NoTag);
        // the engine drains at least one byte
        assert_eq!(trans.len(), 1);
        assert_eq!(trans.bits, 0);

        let trans = mfrc.transceive(Frame::short(&[0x26], 7)).unwrap();
        assert_eq!(trans.status, Status::NoTag);
        assert!(trans.is_empty());
    }

    #[test]
    fn error_register_classifies_failure() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        chip.inject_error(PROTOCOL_ERR);
        let mut mfrc = reader(&mut chip);
        assert!(matches!(
            mfrc.transceive(Frame::short(&[0x26], 7)),
            Err(Error::Transceive(0x01))
        ));
    }

    #[test]
    fn collisions_tolerated_only_outside_session() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        chip.inject_error(COLL_ERR);
        let mut mfrc = reader(&mut chip);
        let trans = mfrc.transceive(Frame::short(&[0x26], 7)).unwrap();
        assert_eq!(trans.data.as_slice(), &[0x04, 0x00]);

        chip.inject_error(COLL_ERR);
        let mut mfrc = reader(&mut chip);
        assert!(matches!(
            mfrc.execute(Command::Transceive, &[0x26]),
            Err(Error::Transceive(_))
        ));
    }

    #[test]
    fn crc_error_bit_is_not_in_mask() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        chip.inject_error(CRC_ERR);
        let mut mfrc = reader(&mut chip);
        assert!(mfrc.transceive(Frame::short(&[0x26], 7)).is_ok());
    }

    #[test]
    fn short_frame_sets_tx_last_bits() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        let mut mfrc = reader(&mut chip);
        let trans = mfrc.transceive(Frame::short(&[0x26], 7)).unwrap();
        assert_eq!(trans.bits, 16);
        assert_eq!(chip.transmitted().last(), Some(&(vec![0x26], 7)));
    }

    #[test]
    fn idle_completion_is_accepted() {
        let mut chip = SimChip::with_card(SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]));
        chip.complete_with_idle(true);
        // execute leaves BitFramingReg alone, REQA needs 7 bits
        chip.set_register(Register::BitFramingReg, 0x07);
        let mut mfrc = reader(&mut chip);
        let trans = mfrc.execute(Command::Transceive, &[0x26]).unwrap();
        assert!(trans.is_ok());
    }

    #[test]
    fn execute_skips_idle_inside_session() {
        let mut chip = SimChip::new();
        chip.set_register(Register::Status2Reg, MF_CRYPTO1_ON);
        let mut mfrc = reader(&mut chip);
        let _ = mfrc.execute(Command::Transceive, &[0x30, 0x04]).unwrap();
        let _ = mfrc.transceive(Frame::new(&[0x30, 0x04])).unwrap();
        assert!(!chip.commands().contains(&Command::Idle));
        assert_eq!(chip.register(Register::Status2Reg) & MF_CRYPTO1_ON, MF_CRYPTO1_ON);
    }

    #[test]
    fn overfull_fifo_keeps_capacity() {
        let card = SimCard::classic_1k([0x04, 0x1A, 0x2B, 0x3C]).with_block(4, [0x5A; 16]);
        let mut chip = SimChip::with_card(card);
        let mut mfrc = reader(&mut chip);
        mfrc.request_a().unwrap();
        let mut uid = mfrc.anticollision_cl1().unwrap();
        mfrc.select(&mut uid).unwrap();
        mfrc.authenticate(crate::mifare::KeyType::A, 4, &[0xFF; 6], &uid).unwrap();

        let mut read = [0x30, 0x04, 0, 0];
        let crc = mfrc.calculate_crc(&read[..2]).unwrap();
        read[2..].copy_from_slice(&crc);
        // 16 data bytes plus CRC_A sit in the FIFO
        let trans = mfrc.execute(Command::Transceive, &read).unwrap();
        assert_eq!(trans.bits, 144);
        assert_eq!(trans.len(), MAX_RESPONSE);
        assert_eq!(trans.data.as_slice(), &[0x5A; 16]);
    }

    #[test]
    fn encrypted_empty_answer_is_no_tag() {
        let mut chip = SimChip::new();
        chip.set_register(Register::Status2Reg, MF_CRYPTO1_ON);
        let mut mfrc = reader(&mut chip);
        assert!(matches!(
            mfrc.transceive_encrypted(Frame::new(&[0xA0, 0x04, 0x00, 0x00])),
            Err(Error::NoTag)
        ));
    }
}
