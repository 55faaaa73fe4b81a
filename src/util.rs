use embedded_hal::blocking::delay::DelayUs;
use log::debug;

use super::com::Com;
use super::mfrc522::{Register, MFRC522};
use super::Result;

/// Logs the diagnostic register set at debug level.
///
/// FIFODataReg is left out: reading it pops a byte.
pub fn dump_registers<C, D>(mfrc: &mut MFRC522<C, D>) -> Result<(), C::Error>
where
    C: Com,
    D: DelayUs<u16>,
{
    for &reg in [
        Register::CommandReg,
        Register::ComlEnReg,
        Register::DivlEnReg,
        Register::ComIrqReg,
        Register::DivIrqReg,
        Register::ErrorReg,
        Register::Status1Reg,
        Register::Status2Reg,
        Register::FIFOLevelReg,
        Register::WaterLevelReg,
        Register::ControlReg,
        Register::BitFramingReg,
        Register::CollReg,
        Register::ModeReg,
        Register::TxModeReg,
        Register::RxModeReg,
        Register::TxControlReg,
        Register::TxASKReg,
        Register::TxSelReg,
        Register::RxSelReg,
        Register::RxThresholdReg,
        Register::DemodReg,
        Register::MfTxReg,
        Register::MfRxReg,
        Register::SerialSpeedReg,
        Register::CRCResultRegLow,
        Register::CRCResultRegHigh,
        Register::ModWidthReg,
        Register::RFCfgReg,
        Register::GsNReg,
        Register::CWGsPReg,
        Register::ModGsPReg,
        Register::TModeReg,
        Register::TPrescalerReg,
        Register::TReloadRegLow,
        Register::TReloadRegHigh,
        Register::TCounterValRegLow,
        Register::TCounterValRegHigh,
    ]
    .iter()
    {
        let value = mfrc.read_register(reg)?;
        debug!("{:?}: {:02x?}", reg, value);
    }
    Ok(())
}
