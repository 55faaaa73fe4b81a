//! Test doubles: a register-level MFRC522 model with a MIFARE Classic card in
//! its field, an SPI loopback bus, an I2C register file and a no-op delay.
//!
//! The models are deliberately small. The reader does not encrypt; the card
//! simply answers plaintext block commands while MFCrypto1On is set.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::rc::Rc;

use crc16::{State, CRC_A};
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::blocking::{i2c, spi};
use embedded_hal::digital::v2::OutputPin;

use crate::com::Com;
use crate::mfrc522::{
    Command, Register, BUFFER_OVFL, CRC_IRQ, ERR_IRQ, IDLE_IRQ, MF_CRYPTO1_ON, PROTOCOL_ERR,
    RX_IRQ, START_SEND, TIMER_IRQ,
};
use crate::MifareKey;

const FIFO_SIZE: usize = 64;
const VERSION: u8 = 0x92;

/// MIFARE 4-bit ACK.
pub const ACK: u8 = 0x0A;
/// MIFARE 4-bit NAK, invalid operation.
pub const NAK: u8 = 0x04;

pub fn crc_a(data: &[u8]) -> [u8; 2] {
    State::<CRC_A>::calculate(data).to_le_bytes()
}

fn crc_ok(frame: &[u8]) -> bool {
    match frame.len() {
        n if n >= 3 => crc_a(&frame[..n - 2]) == frame[n - 2..],
        _ => false,
    }
}

fn with_crc(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.extend_from_slice(&crc_a(data));
    out
}

/// Delay that returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayUs<u16> for NoDelay {
    fn delay_us(&mut self, _us: u16) {}
}

impl DelayMs<u16> for NoDelay {
    fn delay_ms(&mut self, _ms: u16) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready,
    Active,
    Halted,
}

/// MIFARE Classic 1K with a single-size UID.
#[derive(Debug, Clone)]
pub struct SimCard {
    pub uid: [u8; 4],
    pub atqa: [u8; 2],
    pub sak: u8,
    pub key_a: MifareKey,
    pub blocks: [[u8; 16]; 64],
    state: CardState,
    sector: Option<u8>,
    pending_write: Option<u8>,
}

impl SimCard {
    /// Card with transport keys (all 0xFF).
    pub fn classic_1k(uid: [u8; 4]) -> Self {
        Self {
            uid,
            atqa: [0x04, 0x00],
            sak: 0x08,
            key_a: [0xFF; 6],
            blocks: [[0u8; 16]; 64],
            state: CardState::Idle,
            sector: None,
            pending_write: None,
        }
    }

    pub fn with_key_a(mut self, key: MifareKey) -> Self {
        self.key_a = key;
        self
    }

    pub fn with_block(mut self, block: u8, data: [u8; 16]) -> Self {
        self.blocks[block as usize] = data;
        self
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn bcc(&self) -> u8 {
        self.uid.iter().fold(0, |acc, b| acc ^ b)
    }

    fn authenticate(&mut self, frame: &[u8]) -> bool {
        if frame.len() != 12 || self.state != CardState::Active {
            return false;
        }
        let block = frame[1];
        if frame[0] != 0x60 || block >= 64 || frame[2..8] != self.key_a || frame[8..12] != self.uid
        {
            // a refused key ends whatever sector was open
            self.drop_session();
            return false;
        }
        self.sector = Some(block / 4);
        true
    }

    /// Answer to `frame`, as (bytes, valid bits of the last byte).
    fn respond(&mut self, frame: &[u8], tx_last_bits: u8, crypto: bool) -> Option<(Vec<u8>, u8)> {
        if tx_last_bits == 7 && frame.len() == 1 {
            return match (frame[0], self.state) {
                (0x26, CardState::Idle) | (0x52, CardState::Idle) | (0x52, CardState::Halted) => {
                    self.state = CardState::Ready;
                    Some((self.atqa.to_vec(), 0))
                }
                _ => None,
            };
        }
        if tx_last_bits != 0 {
            return None;
        }

        match frame {
            [0x93, 0x20] if self.state == CardState::Ready => {
                let mut out = self.uid.to_vec();
                out.push(self.bcc());
                Some((out, 0))
            }
            [0x93, 0x70, ..] if frame.len() == 9 => {
                let addressed = frame[2..6] == self.uid && frame[6] == self.bcc() && crc_ok(frame);
                if addressed && matches!(self.state, CardState::Ready | CardState::Active) {
                    self.state = CardState::Active;
                    Some((with_crc(&[self.sak]), 0))
                } else {
                    None
                }
            }
            [0x50, 0x00, _, _] if crc_ok(frame) => {
                self.state = CardState::Halted;
                self.sector = None;
                None
            }
            _ if crypto && self.state == CardState::Active && self.sector.is_some() => {
                self.respond_in_session(frame)
            }
            _ => None,
        }
    }

    fn respond_in_session(&mut self, frame: &[u8]) -> Option<(Vec<u8>, u8)> {
        if !crc_ok(frame) {
            return None;
        }
        let sector = self.sector?;
        if let Some(block) = self.pending_write.take() {
            if frame.len() != 18 {
                return Some((vec![NAK], 4));
            }
            self.blocks[block as usize].copy_from_slice(&frame[..16]);
            return Some((vec![ACK], 4));
        }
        match frame {
            [0x30, block, _, _] if *block < 64 && block / 4 == sector => {
                Some((with_crc(&self.blocks[*block as usize]), 0))
            }
            [0xA0, block, _, _] if *block < 64 && block / 4 == sector => {
                self.pending_write = Some(*block);
                Some((vec![ACK], 4))
            }
            _ => Some((vec![NAK], 4)),
        }
    }

    fn drop_session(&mut self) {
        self.sector = None;
        self.pending_write = None;
    }
}

/// Register-level MFRC522 model.
#[derive(Debug)]
pub struct SimChip {
    regs: [u8; 64],
    fifo: VecDeque<u8>,
    card: Option<SimCard>,
    commands: Vec<Command>,
    transmitted: Vec<(Vec<u8>, u8)>,
    stall: bool,
    stall_crc: bool,
    idle_completion: bool,
    inject_error: Option<u8>,
    sessions_dropped_by_idle: usize,
}

impl Default for SimChip {
    fn default() -> Self {
        Self::new()
    }
}

impl SimChip {
    pub fn new() -> Self {
        let mut chip = Self {
            regs: [0u8; 64],
            fifo: VecDeque::new(),
            card: None,
            commands: Vec::new(),
            transmitted: Vec::new(),
            stall: false,
            stall_crc: false,
            idle_completion: false,
            inject_error: None,
            sessions_dropped_by_idle: 0,
        };
        chip.power_on();
        chip
    }

    pub fn with_card(card: SimCard) -> Self {
        let mut chip = Self::new();
        chip.card = Some(card);
        chip
    }

    fn power_on(&mut self) {
        self.regs = [0u8; 64];
        self.regs[Register::CommandReg as usize] = 0x20;
        self.regs[Register::ComlEnReg as usize] = 0x80;
        self.regs[Register::ControlReg as usize] = 0x10;
        self.regs[Register::ModeReg as usize] = 0x3F;
        self.regs[Register::TxControlReg as usize] = 0x80;
        self.regs[Register::RFCfgReg as usize] = 0x48;
        self.regs[Register::VersionReg as usize] = VERSION;
        self.fifo.clear();
    }

    pub fn insert_card(&mut self, card: SimCard) {
        self.card = Some(card);
    }

    pub fn remove_card(&mut self) -> Option<SimCard> {
        self.card.take()
    }

    pub fn card(&self) -> Option<&SimCard> {
        self.card.as_ref()
    }

    /// Never raise a completion IRQ.
    pub fn stall(&mut self, on: bool) {
        self.stall = on;
    }

    /// Never finish CalcCRC.
    pub fn stall_crc(&mut self, on: bool) {
        self.stall_crc = on;
    }

    /// Signal reception with IdleIRq instead of RxIRq.
    pub fn complete_with_idle(&mut self, on: bool) {
        self.idle_completion = on;
    }

    /// Report `bits` in ErrorReg on the next transmission.
    pub fn inject_error(&mut self, bits: u8) {
        self.inject_error = Some(bits);
    }

    pub fn register(&self, reg: Register) -> u8 {
        self.regs[reg as usize]
    }

    pub fn set_register(&mut self, reg: Register, value: u8) {
        self.regs[reg as usize] = value;
    }

    /// Commands written to CommandReg, oldest first.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Frames sent to the card with their TxLastBits.
    pub fn transmitted(&self) -> &[(Vec<u8>, u8)] {
        &self.transmitted
    }

    /// How often Idle was issued while MFCrypto1On was set.
    pub fn sessions_dropped_by_idle(&self) -> usize {
        self.sessions_dropped_by_idle
    }

    pub fn crypto1_on(&self) -> bool {
        self.regs[Register::Status2Reg as usize] & MF_CRYPTO1_ON != 0
    }

    fn raise(&mut self, reg: Register, bits: u8) {
        self.regs[reg as usize] |= bits;
    }

    fn end_session(&mut self) {
        self.regs[Register::Status2Reg as usize] &= !MF_CRYPTO1_ON;
        if let Some(card) = self.card.as_mut() {
            card.drop_session();
        }
    }

    fn decode(value: u8) -> Option<Command> {
        let cmd = match value & 0x0F {
            0b0000 => Command::Idle,
            0b0001 => Command::Mem,
            0b0010 => Command::GenerateRandomId,
            0b0011 => Command::CalcCRC,
            0b0100 => Command::Transmit,
            0b0111 => Command::NoCmdChange,
            0b1000 => Command::Receive,
            0b1100 => Command::Transceive,
            0b1110 => Command::MFAuthent,
            0b1111 => Command::SoftReset,
            _ => return None,
        };
        Some(cmd)
    }

    fn run_command(&mut self, value: u8) {
        let cmd = match Self::decode(value) {
            Some(cmd) => cmd,
            None => return,
        };
        self.commands.push(cmd);
        self.regs[Register::CommandReg as usize] = cmd as u8;
        match cmd {
            Command::Idle => {
                if self.crypto1_on() {
                    self.sessions_dropped_by_idle += 1;
                    self.end_session();
                }
            }
            Command::SoftReset => {
                self.end_session();
                self.power_on();
            }
            Command::CalcCRC => {
                if !self.stall_crc {
                    let data: Vec<u8> = self.fifo.drain(..).collect();
                    let [lo, hi] = crc_a(&data);
                    self.regs[Register::CRCResultRegLow as usize] = lo;
                    self.regs[Register::CRCResultRegHigh as usize] = hi;
                    self.raise(Register::DivIrqReg, CRC_IRQ);
                }
            }
            Command::MFAuthent => self.mf_authent(),
            _ => {}
        }
    }

    fn mf_authent(&mut self) {
        if self.stall {
            return;
        }
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        self.regs[Register::ErrorReg as usize] = 0;
        let ok = match self.card.as_mut() {
            Some(card) => card.authenticate(&frame),
            None => false,
        };
        if ok {
            self.raise(Register::Status2Reg, MF_CRYPTO1_ON);
            self.raise(Register::ComIrqReg, IDLE_IRQ);
        } else {
            self.raise(Register::ErrorReg, PROTOCOL_ERR);
            self.raise(Register::ComIrqReg, IDLE_IRQ | ERR_IRQ);
        }
        self.regs[Register::CommandReg as usize] = Command::Idle as u8;
    }

    fn transmit(&mut self) {
        if self.stall {
            return;
        }
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        let tx_last_bits = self.regs[Register::BitFramingReg as usize] & 0x07;
        self.transmitted.push((frame.clone(), tx_last_bits));

        self.regs[Register::ErrorReg as usize] = 0;
        self.regs[Register::ControlReg as usize] &= !0x07;
        if let Some(bits) = self.inject_error.take() {
            self.raise(Register::ErrorReg, bits);
            self.raise(Register::ComIrqReg, ERR_IRQ);
        }

        let crypto = self.crypto1_on();
        let answer = match self.card.as_mut() {
            Some(card) => card.respond(&frame, tx_last_bits, crypto),
            None => None,
        };
        match answer {
            Some((bytes, last_bits)) => {
                self.fifo.extend(bytes);
                self.regs[Register::ControlReg as usize] |= last_bits & 0x07;
                let done = if self.idle_completion { IDLE_IRQ } else { RX_IRQ };
                self.raise(Register::ComIrqReg, done);
            }
            None => self.raise(Register::ComIrqReg, TIMER_IRQ),
        }
    }

    fn write_irq(&mut self, reg: Register, value: u8) {
        // bit 7 selects set (1) or clear (0) of the marked bits
        if value & 0x80 != 0 {
            self.regs[reg as usize] |= value & 0x7F;
        } else {
            self.regs[reg as usize] &= !(value & 0x7F);
        }
    }
}

impl Com for SimChip {
    type Error = Infallible;

    fn read(&mut self, reg: u8) -> Result<u8, Infallible> {
        let reg = reg & 0x3F;
        let value = match reg {
            r if r == Register::FIFODataReg as u8 => self.fifo.pop_front().unwrap_or(0),
            r if r == Register::FIFOLevelReg as u8 => self.fifo.len().min(FIFO_SIZE) as u8,
            r => self.regs[r as usize],
        };
        Ok(value)
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), Infallible> {
        let reg = reg & 0x3F;
        match reg {
            r if r == Register::CommandReg as u8 => self.run_command(value),
            r if r == Register::FIFODataReg as u8 => {
                if self.fifo.len() < FIFO_SIZE {
                    self.fifo.push_back(value);
                } else {
                    self.raise(Register::ErrorReg, BUFFER_OVFL);
                }
            }
            r if r == Register::FIFOLevelReg as u8 => {
                if value & 0x80 != 0 {
                    self.fifo.clear();
                    self.regs[Register::ErrorReg as usize] &= !BUFFER_OVFL;
                }
            }
            r if r == Register::ComIrqReg as u8 => self.write_irq(Register::ComIrqReg, value),
            r if r == Register::DivIrqReg as u8 => self.write_irq(Register::DivIrqReg, value),
            r if r == Register::BitFramingReg as u8 => {
                self.regs[reg as usize] = value;
                let running = self.regs[Register::CommandReg as usize] & 0x0F;
                if value & START_SEND != 0 && running == Command::Transceive as u8 {
                    self.transmit();
                }
            }
            r if r == Register::Status2Reg as u8 => {
                let crypto_before = self.crypto1_on();
                self.regs[reg as usize] = value;
                if crypto_before && !self.crypto1_on() {
                    if let Some(card) = self.card.as_mut() {
                        card.drop_session();
                    }
                }
            }
            r if r == Register::VersionReg as u8 => {}
            r => self.regs[r as usize] = value,
        }
        Ok(())
    }
}

/// Error from the SPI loopback when a transfer happens without chip select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

#[derive(Debug)]
struct Loopback {
    regs: [u8; 64],
    frames: Vec<[u8; 2]>,
    cs_low: bool,
    cs_cycles: usize,
}

impl Default for Loopback {
    fn default() -> Self {
        Loopback {
            regs: [0; 64],
            frames: Vec::new(),
            cs_low: false,
            cs_cycles: 0,
        }
    }
}

/// SPI bus and chip-select pin in one: a plain register file behind the
/// MFRC522 SPI addressing. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SpiLoopback {
    inner: Rc<RefCell<Loopback>>,
}

impl SpiLoopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every exchanged frame as sent by the host.
    pub fn frames(&self) -> Vec<[u8; 2]> {
        self.inner.borrow().frames.clone()
    }

    pub fn cs_cycles(&self) -> usize {
        self.inner.borrow().cs_cycles
    }

    pub fn cs_released(&self) -> bool {
        !self.inner.borrow().cs_low
    }
}

impl spi::Transfer<u8> for SpiLoopback {
    type Error = BusFault;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], BusFault> {
        let mut bus = self.inner.borrow_mut();
        if !bus.cs_low || words.len() != 2 {
            return Err(BusFault);
        }
        bus.frames.push([words[0], words[1]]);
        let reg = ((words[0] >> 1) & 0x3F) as usize;
        if words[0] & 0x80 != 0 {
            words[0] = 0x00;
            words[1] = bus.regs[reg];
        } else {
            bus.regs[reg] = words[1];
            words[0] = 0x00;
            words[1] = 0x00;
        }
        Ok(words)
    }
}

impl OutputPin for SpiLoopback {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut bus = self.inner.borrow_mut();
        bus.cs_low = true;
        bus.cs_cycles += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.inner.borrow_mut().cs_low = false;
        Ok(())
    }
}

/// I2C register file answering at one 7-bit address.
#[derive(Debug)]
pub struct I2cRegisters {
    addr: u8,
    regs: [u8; 64],
}

impl I2cRegisters {
    pub fn new(addr: u8) -> Self {
        Self {
            addr,
            regs: [0u8; 64],
        }
    }
}

impl i2c::Write for I2cRegisters {
    type Error = BusFault;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        if address != self.addr {
            return Err(BusFault);
        }
        match bytes {
            [reg, value] => {
                self.regs[(*reg & 0x3F) as usize] = *value;
                Ok(())
            }
            _ => Err(BusFault),
        }
    }
}

impl i2c::WriteRead for I2cRegisters {
    type Error = BusFault;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), BusFault> {
        if address != self.addr || bytes.len() != 1 {
            return Err(BusFault);
        }
        let reg = (bytes[0] & 0x3F) as usize;
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = self.regs[(reg + i) & 0x3F];
        }
        Ok(())
    }
}
