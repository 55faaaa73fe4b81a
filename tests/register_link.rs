mod common;

use proptest::prelude::*;
use rfid_mifare::com::Com;
use rfid_mifare::com_spi::ComSpi;
use rfid_mifare::mock::{NoDelay, SpiLoopback};
use rfid_mifare::{Config, Register, MFRC522};

proptest! {
    #[test]
    fn write_then_read_returns_value(addr in 0u8..64, value in any::<u8>()) {
        let bus = SpiLoopback::new();
        let mut link = ComSpi::new(bus.clone(), bus.clone(), NoDelay);
        link.write(addr, value).unwrap();
        prop_assert_eq!(link.read(addr).unwrap(), value);
        prop_assert!(bus.cs_released());
        prop_assert_eq!(bus.cs_cycles(), 2);
    }

    #[test]
    fn address_byte_never_spills_into_rw_bit(addr in 0u8..64) {
        let bus = SpiLoopback::new();
        let mut link = ComSpi::new(bus.clone(), bus.clone(), NoDelay);
        link.write(addr, 0).unwrap();
        link.read(addr).unwrap();
        let frames = bus.frames();
        prop_assert_eq!(frames[0][0], (addr << 1) & 0x7E);
        prop_assert_eq!(frames[1][0], ((addr << 1) & 0x7E) | 0x80);
    }
}

#[test]
fn bit_helpers_read_modify_write() {
    common::init_logger();
    let bus = SpiLoopback::new();
    let link = ComSpi::new(bus.clone(), bus.clone(), NoDelay);
    let mut mfrc = MFRC522::new(link, NoDelay, Config::default());
    mfrc.write_register(Register::TxControlReg, 0x80).unwrap();
    mfrc.set_register_bitmask(Register::TxControlReg, 0x03).unwrap();
    assert_eq!(mfrc.read_register(Register::TxControlReg).unwrap(), 0x83);
    mfrc.clear_register_bitmask(Register::TxControlReg, 0x01).unwrap();
    assert_eq!(mfrc.read_register(Register::TxControlReg).unwrap(), 0x82);
}
