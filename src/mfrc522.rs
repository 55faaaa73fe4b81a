use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;
use log::{debug, trace, warn};

use super::com::Com;
use super::config::Config;
use super::{Error, Result};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    // Reserved         = 0x00,
    CommandReg = 0x01,
    ComlEnReg = 0x02,
    DivlEnReg = 0x03,
    ComIrqReg = 0x04,
    DivIrqReg = 0x05,
    ErrorReg = 0x06,
    Status1Reg = 0x07,
    Status2Reg = 0x08,
    FIFODataReg = 0x09,
    FIFOLevelReg = 0x0A,
    WaterLevelReg = 0x0B,
    ControlReg = 0x0C,
    BitFramingReg = 0x0D,
    CollReg = 0x0E,
    // Reserved         = 0x0F,
    // Reserved         = 0x10,
    ModeReg = 0x11,
    TxModeReg = 0x12,
    RxModeReg = 0x13,
    TxControlReg = 0x14,
    TxASKReg = 0x15,
    TxSelReg = 0x16,
    RxSelReg = 0x17,
    RxThresholdReg = 0x18,
    DemodReg = 0x19,
    // Reserved         = 0x1A,
    // Reserved         = 0x1B,
    MfTxReg = 0x1C,
    MfRxReg = 0x1D,
    // Reserved         = 0x1E,
    SerialSpeedReg = 0x1F,
    // Reserved         = 0x20,
    CRCResultRegHigh = 0x21,
    CRCResultRegLow = 0x22,
    // Reserved         = 0x23,
    ModWidthReg = 0x24,
    // Reserved         = 0x25,
    RFCfgReg = 0x26,
    GsNReg = 0x27,
    CWGsPReg = 0x28,
    ModGsPReg = 0x29,
    TModeReg = 0x2A,
    TPrescalerReg = 0x2B,
    TReloadRegHigh = 0x2C,
    TReloadRegLow = 0x2D,
    TCounterValRegHigh = 0x2E,
    TCounterValRegLow = 0x2F,
    // Reserved         = 0x30,
    TestSel1Reg = 0x31,
    TestSel2Reg = 0x32,
    TestPinEnReg = 0x33,
    TestPinValueReg = 0x34,
    TestBusReg = 0x35,
    AutoTestReg = 0x36,
    VersionReg = 0x37,
    AnalogTestReg = 0x38,
    TestDAC1Reg = 0x39,
    TestDAC2Reg = 0x3A,
    TestADCReg = 0x3B,
    // Reserved         = 0x3C-0x3F,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Idle = 0b0000,
    Mem = 0b0001,
    GenerateRandomId = 0b0010,
    CalcCRC = 0b0011,
    Transmit = 0b0100,
    NoCmdChange = 0b0111,
    Receive = 0b1000,
    Transceive = 0b1100,
    MFAuthent = 0b1110,
    SoftReset = 0b1111,
}

impl Command {
    /// Idle and SoftReset drop MFCrypto1On on the reader.
    pub fn ends_session(self) -> bool {
        matches!(self, Command::Idle | Command::SoftReset)
    }
}

// ComIrqReg / ComIEnReg
pub const TIMER_IRQ: u8 = 1 << 0;
pub const ERR_IRQ: u8 = 1 << 1;
pub const LO_ALERT_IRQ: u8 = 1 << 2;
pub const HI_ALERT_IRQ: u8 = 1 << 3;
pub const IDLE_IRQ: u8 = 1 << 4;
pub const RX_IRQ: u8 = 1 << 5;
pub const TX_IRQ: u8 = 1 << 6;
/// ComIEnReg IRqInv: IRQ pin inverted.
pub const IRQ_INV: u8 = 1 << 7;

// DivIrqReg
pub const CRC_IRQ: u8 = 1 << 2;

// ErrorReg
pub const PROTOCOL_ERR: u8 = 1 << 0;
pub const PARITY_ERR: u8 = 1 << 1;
pub const CRC_ERR: u8 = 1 << 2;
pub const COLL_ERR: u8 = 1 << 3;
pub const BUFFER_OVFL: u8 = 1 << 4;

// Status2Reg
pub const MF_CRYPTO1_ON: u8 = 1 << 3;

// FIFOLevelReg
pub const FLUSH_BUFFER: u8 = 1 << 7;

// BitFramingReg
pub const START_SEND: u8 = 1 << 7;

// CommandReg
pub const POWER_DOWN: u8 = 1 << 4;

/// MFRC522 handle. Owns the register link and tracks the crypto session so
/// that Idle and SoftReset can be refused while a card is authenticated.
pub struct MFRC522<C, D> {
    pub(crate) com: C,
    pub(crate) delay: D,
    pub(crate) config: Config,
    pub(crate) authenticated: bool,
}

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    pub fn new(com: C, delay: D, config: Config) -> Self {
        Self {
            com,
            delay,
            config,
            authenticated: false,
        }
    }

    pub fn release(self) -> (C, D) {
        (self.com, self.delay)
    }

    pub fn com(&self) -> &C {
        &self.com
    }

    pub fn com_mut(&mut self) -> &mut C {
        &mut self.com
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn read_register(&mut self, reg: Register) -> Result<u8, C::Error> {
        let value = self.com.read(reg as u8).map_err(Error::Interface)?;
        trace!("Read {:#04x} from {:?}", value, reg);
        Ok(value)
    }

    pub fn write_register(&mut self, reg: Register, value: u8) -> Result<(), C::Error> {
        trace!("Write {:#04x} to {:?}", value, reg);
        self.com.write(reg as u8, value).map_err(Error::Interface)
    }

    pub fn set_register_bitmask(&mut self, reg: Register, mask: u8) -> Result<(), C::Error> {
        self.com.set_bits(reg as u8, mask).map_err(Error::Interface)
    }

    pub fn clear_register_bitmask(&mut self, reg: Register, mask: u8) -> Result<(), C::Error> {
        self.com.clear_bits(reg as u8, mask).map_err(Error::Interface)
    }

    /// Pulses the NRSTPD line and waits for the oscillator to start.
    pub fn hard_reset<P: OutputPin>(&mut self, rst: &mut P) -> core::result::Result<(), P::Error> {
        rst.set_low()?;
        self.delay_ms(50);
        rst.set_high()?;
        self.delay_ms(100);
        Ok(())
    }

    pub fn init(&mut self) -> Result<(), C::Error> {
        if self.crypto1_on()? {
            self.stop_crypto1()?;
        }
        self.reset()?;

        self.write_register(Register::FIFOLevelReg, FLUSH_BUFFER)?;
        self.write_register(Register::ComIrqReg, 0x7F)?;

        let cfg = self.config;
        self.write_register(Register::TModeReg, cfg.timer_mode)?;
        self.write_register(Register::TPrescalerReg, cfg.timer_prescaler)?;
        self.write_register(Register::TReloadRegHigh, (cfg.timer_reload >> 8) as u8)?;
        self.write_register(Register::TReloadRegLow, cfg.timer_reload as u8)?;
        self.write_register(Register::TxASKReg, cfg.tx_ask)?;
        self.write_register(Register::ModeReg, cfg.mode)?;
        self.write_register(Register::RFCfgReg, cfg.rx_gain)?;
        self.idle()?;
        self.delay_ms(10);

        self.enable_antenna()?;
        let version = self.version()?;
        debug!("reader initialised, version {:#04x}", version);
        Ok(())
    }

    /// SoftReset. Refused while a crypto session is open.
    pub fn reset(&mut self) -> Result<(), C::Error> {
        self.issue_session_ending(Command::SoftReset)?;
        let mut count = 0;
        loop {
            self.delay_ms(50);
            let cmd_val = self.read_register(Register::CommandReg)?;
            if cmd_val & POWER_DOWN == 0 || count >= 3 {
                break;
            }
            count += 1;
        }
        Ok(())
    }

    /// Puts the reader in Idle, cancelling any running command. Refused while
    /// a crypto session is open.
    pub fn idle(&mut self) -> Result<(), C::Error> {
        self.issue_session_ending(Command::Idle)
    }

    /// Idle when no session is open; returns whether Idle was issued.
    pub(crate) fn idle_unless_authenticated(&mut self) -> Result<bool, C::Error> {
        if self.session_active()? {
            trace!("session open, skipping Idle");
            return Ok(false);
        }
        self.write_register(Register::CommandReg, Command::Idle as u8)?;
        Ok(true)
    }

    fn issue_session_ending(&mut self, command: Command) -> Result<(), C::Error> {
        debug_assert!(command.ends_session());
        if self.session_active()? {
            warn!("refusing {:?} while a crypto session is open", command);
            return Err(Error::SessionActive);
        }
        self.write_register(Register::CommandReg, command as u8)
    }

    /// Writes a command that keeps the session intact.
    pub(crate) fn command(&mut self, command: Command) -> Result<(), C::Error> {
        if command.ends_session() {
            return self.issue_session_ending(command);
        }
        self.write_register(Register::CommandReg, command as u8)
    }

    /// True when this handle opened a session or the reader reports
    /// MFCrypto1On.
    pub fn session_active(&mut self) -> Result<bool, C::Error> {
        if self.authenticated {
            return Ok(true);
        }
        self.crypto1_on()
    }

    /// MFCrypto1On as reported by Status2Reg.
    pub fn crypto1_on(&mut self) -> Result<bool, C::Error> {
        Ok(self.read_register(Register::Status2Reg)? & MF_CRYPTO1_ON != 0)
    }

    pub fn version(&mut self) -> Result<u8, C::Error> {
        self.read_register(Register::VersionReg)
    }

    pub fn enable_antenna(&mut self) -> Result<(), C::Error> {
        let control_reg = self.read_register(Register::TxControlReg)?;
        if (control_reg & 0x03) != 0x03 {
            self.write_register(Register::TxControlReg, control_reg | 0x03)?;
        }
        Ok(())
    }

    pub fn disable_antenna(&mut self) -> Result<(), C::Error> {
        self.clear_register_bitmask(Register::TxControlReg, 0x03)
    }

    pub(crate) fn flush_fifo(&mut self) -> Result<(), C::Error> {
        self.write_register(Register::FIFOLevelReg, FLUSH_BUFFER)
    }

    fn delay_ms(&mut self, ms: u16) {
        for _ in 0..ms {
            self.delay.delay_us(1000);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{NoDelay, SimChip};

    fn reader(chip: &mut SimChip) -> MFRC522<&mut SimChip, NoDelay> {
        MFRC522::new(chip, NoDelay, Config::fast())
    }

    #[test]
    fn init_programs_timer_and_antenna() {
        let mut chip = SimChip::new();
        reader(&mut chip).init().unwrap();
        assert_eq!(chip.register(Register::TModeReg), 0x8D);
        assert_eq!(chip.register(Register::TPrescalerReg), 0x3E);
        assert_eq!(chip.register(Register::TReloadRegLow), 30);
        assert_eq!(chip.register(Register::RFCfgReg), 0x7F);
        assert_eq!(chip.register(Register::TxControlReg) & 0x03, 0x03);
        assert_eq!(chip.commands().last(), Some(&Command::Idle));
    }

    #[test]
    fn version_reads_version_register() {
        let mut chip = SimChip::new();
        assert_eq!(reader(&mut chip).version().unwrap(), 0x92);
    }

    #[test]
    fn idle_refused_while_crypto_on() {
        let mut chip = SimChip::new();
        chip.set_register(Register::Status2Reg, MF_CRYPTO1_ON);
        let mut mfrc = reader(&mut chip);
        assert!(matches!(mfrc.idle(), Err(Error::SessionActive)));
        assert!(matches!(mfrc.reset(), Err(Error::SessionActive)));
        assert!(!mfrc.idle_unless_authenticated().unwrap());
        assert!(mfrc.crypto1_on().unwrap());
        assert!(chip.commands().is_empty());
    }

    #[test]
    fn disable_antenna_clears_driver_bits() {
        let mut chip = SimChip::new();
        let mut mfrc = reader(&mut chip);
        mfrc.enable_antenna().unwrap();
        mfrc.disable_antenna().unwrap();
        assert_eq!(chip.register(Register::TxControlReg) & 0x03, 0);
    }

    #[test]
    fn session_ending_commands() {
        assert!(Command::Idle.ends_session());
        assert!(Command::SoftReset.ends_session());
        assert!(!Command::Transceive.ends_session());
        assert!(!Command::CalcCRC.ends_session());
    }
}
