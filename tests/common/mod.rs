// Shared fixtures for the integration tests.
#![allow(dead_code)]

use rfid_mifare::mock::{NoDelay, SimCard, SimChip};
use rfid_mifare::{Config, MifareKey, Uid, MFRC522};

pub const UID: [u8; 4] = [0x04, 0x1A, 0x2B, 0x3C];
pub const TRANSPORT_KEY: MifareKey = [0xFF; 6];

pub type Reader<'a> = MFRC522<&'a mut SimChip, NoDelay>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Block 4 holding 0x41..=0x50.
pub fn sample_block() -> [u8; 16] {
    let mut block = [0u8; 16];
    for (i, b) in block.iter_mut().enumerate() {
        *b = 0x41 + i as u8;
    }
    block
}

pub fn card() -> SimCard {
    SimCard::classic_1k(UID).with_block(4, sample_block())
}

pub fn reader(chip: &mut SimChip) -> Reader<'_> {
    MFRC522::new(chip, NoDelay, Config::fast())
}

/// REQA, anticollision and select through the individual calls.
pub fn select(mfrc: &mut Reader<'_>) -> Uid {
    mfrc.request_a().expect("REQA");
    let mut uid = mfrc.anticollision_cl1().expect("anticollision");
    mfrc.select(&mut uid).expect("select");
    uid
}
