//! Card-level entry points for the polling loop and the companion relay.

use embedded_hal::blocking::delay::DelayUs;
use log::{debug, info};

use super::com::Com;
use super::mfrc522::MFRC522;
use super::mifare::{KeyType, BLOCK_SIZE};
use super::picc::Uid;
use super::{Error, MifareKey, Result};

/// Failure of an authenticated block access, tagged with the phase that
/// failed.
#[derive(Debug, thiserror::Error)]
pub enum AccessError<E> {
    #[error("authentication failed: {0}")]
    Auth(Error<E>),
    #[error("read failed: {0}")]
    Read(Error<E>),
    #[error("write failed: {0}")]
    Write(Error<E>),
}

impl<E> AccessError<E> {
    /// The underlying reader error.
    pub fn inner(&self) -> &Error<E> {
        match self {
            AccessError::Auth(e) | AccessError::Read(e) | AccessError::Write(e) => e,
        }
    }
}

impl<C, D> MFRC522<C, D>
where
    C: Com,
    D: DelayUs<u16>,
{
    /// REQA, anticollision and select in one go.
    ///
    /// Any card-side failure yields `Ok(None)`; only bus errors are
    /// returned. A session left open by a previous card is closed first.
    pub fn detect_and_select(&mut self) -> Result<Option<Uid>, C::Error> {
        if self.session_active()? {
            debug!("closing stale crypto session");
            self.stop_crypto1()?;
        }

        match self.request_a().and_then(|_| self.anticollision_cl1()) {
            Ok(mut uid) => match self.select(&mut uid) {
                Ok(_) => {
                    info!("card {:02X?} selected", uid.bytes());
                    Ok(Some(uid))
                }
                Err(e) => no_card(e),
            },
            Err(e) => no_card(e),
        }
    }

    /// Authenticates with key A and reads `block`.
    pub fn authenticate_read(
        &mut self,
        block: u8,
        key: &MifareKey,
        uid: &Uid,
    ) -> core::result::Result<[u8; BLOCK_SIZE], AccessError<C::Error>> {
        self.authenticate(KeyType::A, block, key, uid)
            .map_err(AccessError::Auth)?;
        self.read_block(block).map_err(AccessError::Read)
    }

    /// Authenticates with key A and writes `data` to `block`.
    pub fn authenticate_write(
        &mut self,
        block: u8,
        data: &[u8; BLOCK_SIZE],
        key: &MifareKey,
        uid: &Uid,
    ) -> core::result::Result<(), AccessError<C::Error>> {
        self.authenticate(KeyType::A, block, key, uid)
            .map_err(AccessError::Auth)?;
        self.write_block(block, data).map_err(AccessError::Write)
    }

    /// Closes the crypto session once the card is done with.
    pub fn end_session(&mut self) -> Result<(), C::Error> {
        self.stop_crypto1()
    }
}

fn no_card<T, E>(e: Error<E>) -> Result<Option<T>, E> {
    match e {
        Error::Interface(e) => Err(Error::Interface(e)),
        _ => {
            debug!("no card selected");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{NoDelay, SimCard, SimChip};
    use crate::Config;

    const UID: [u8; 4] = [0x04, 0x1A, 0x2B, 0x3C];
    const KEY: MifareKey = [0xFF; 6];

    fn reader(chip: &mut SimChip) -> MFRC522<&mut SimChip, NoDelay> {
        MFRC522::new(chip, NoDelay, Config::fast())
    }

    #[test]
    fn empty_field_is_none() {
        let mut chip = SimChip::new();
        assert_eq!(reader(&mut chip).detect_and_select().unwrap(), None);
    }

    #[test]
    fn detects_card() {
        let mut chip = SimChip::with_card(SimCard::classic_1k(UID));
        let uid = reader(&mut chip).detect_and_select().unwrap().unwrap();
        assert_eq!(uid.bytes(), &UID);
        assert_eq!(uid.sak(), Some(0x08));
    }

    #[test]
    fn access_errors_name_the_phase() {
        let mut chip = SimChip::with_card(SimCard::classic_1k(UID).with_key_a([0x11; 6]));
        let mut mfrc = reader(&mut chip);
        let uid = mfrc.detect_and_select().unwrap().unwrap();
        let err = mfrc.authenticate_read(4, &KEY, &uid).unwrap_err();
        assert!(matches!(err, AccessError::Auth(Error::AuthFailed)));
        assert!(format!("{}", err).starts_with("authentication failed"));
    }

    #[test]
    fn read_failure_is_read_error() {
        let mut chip = SimChip::with_card(SimCard::classic_1k(UID));
        let mut mfrc = reader(&mut chip);
        let uid = mfrc.detect_and_select().unwrap().unwrap();
        mfrc.authenticate(KeyType::A, 4, &KEY, &uid).unwrap();
        // authenticating block 8 moves the session to sector 2
        assert!(mfrc.authenticate_read(8, &KEY, &uid).is_ok());
        let err = mfrc.read_block(4).map_err(AccessError::<_>::Read).unwrap_err();
        assert!(matches!(err.inner(), Error::MifareNack(_)));
    }

    #[test]
    fn stale_session_is_closed_before_detection() {
        let mut chip = SimChip::with_card(SimCard::classic_1k(UID));
        let mut mfrc = reader(&mut chip);
        let uid = mfrc.detect_and_select().unwrap().unwrap();
        mfrc.authenticate_read(4, &KEY, &uid).unwrap();
        assert!(mfrc.session_active().unwrap());

        // the card is still ACTIVE, so REQA goes unanswered
        assert_eq!(mfrc.detect_and_select().unwrap(), None);
        assert!(!mfrc.session_active().unwrap());
        drop(mfrc);
        assert_eq!(chip.sessions_dropped_by_idle(), 0);
    }
}
