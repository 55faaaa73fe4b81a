//! Line protocol spoken with the companion controller.
//!
//! Pure formatting: the transport and the polling loop live elsewhere.

use core::fmt::Write;

use super::mifare::BLOCK_SIZE;
use super::picc::Uid;
use super::reader::AccessError;

pub const READY: &str = "STM32_READY\r\n";
pub const READ_FAIL: &str = "READ:FAIL\r\n";
pub const AUTH_FAIL: &str = "AUTH:FAIL\r\n";
pub const WRITE_OK: &str = "WRITE:OK\r\n";
pub const WRITE_FAIL: &str = "WRITE:FAIL\r\n";

/// `UID:XXXXXXXX\r\n`
pub fn uid_line(uid: &Uid) -> String {
    let mut line = String::from("UID:");
    push_hex(&mut line, uid.bytes());
    line.push_str("\r\n");
    line
}

/// `DATA:` followed by the block as 32 upper-case hex digits.
pub fn data_line(data: &[u8; BLOCK_SIZE]) -> String {
    let mut line = String::from("DATA:");
    push_hex(&mut line, data);
    line.push_str("\r\n");
    line
}

/// Line reporting the outcome of an authenticated read.
pub fn read_result_line<E>(result: &Result<[u8; BLOCK_SIZE], AccessError<E>>) -> String {
    match result {
        Ok(data) => data_line(data),
        Err(AccessError::Auth(_)) => AUTH_FAIL.to_string(),
        Err(_) => READ_FAIL.to_string(),
    }
}

/// Line reporting the outcome of an authenticated write.
pub fn write_result_line<E>(result: &Result<(), AccessError<E>>) -> &'static str {
    match result {
        Ok(()) => WRITE_OK,
        Err(AccessError::Auth(_)) => AUTH_FAIL,
        Err(_) => WRITE_FAIL,
    }
}

/// Printable ASCII view of a block, `.` for anything else.
pub fn ascii_preview(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '.' })
        .collect()
}

fn push_hex(line: &mut String, bytes: &[u8]) {
    for b in bytes {
        // writing to a String cannot fail
        let _ = write!(line, "{:02X}", b);
    }
}

/// Access level the companion asks to be written to the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Admin,
    Student,
    Visitor,
    Unknown,
}

impl AccessLevel {
    /// Level from the companion's command byte, `'0'` to `'2'`.
    pub fn from_code(code: u8) -> Self {
        match code {
            b'0' => AccessLevel::Admin,
            b'1' => AccessLevel::Student,
            b'2' => AccessLevel::Visitor,
            _ => AccessLevel::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::Admin => "ADMIN",
            AccessLevel::Student => "STUDENT",
            AccessLevel::Visitor => "VISITOR",
            AccessLevel::Unknown => "UNKNOWN",
        }
    }

    /// Block payload: the name padded with spaces to 16 bytes.
    pub fn block(self) -> [u8; BLOCK_SIZE] {
        let mut block = [b' '; BLOCK_SIZE];
        let name = self.name().as_bytes();
        block[..name.len()].copy_from_slice(name);
        block
    }

    /// Reads a level back from a block written by [`AccessLevel::block`].
    pub fn from_block(block: &[u8; BLOCK_SIZE]) -> Self {
        let name = block
            .iter()
            .position(|&b| b == b' ' || b == 0)
            .map_or(&block[..], |end| &block[..end]);
        match name {
            b"ADMIN" => AccessLevel::Admin,
            b"STUDENT" => AccessLevel::Student,
            b"VISITOR" => AccessLevel::Visitor,
            _ => AccessLevel::Unknown,
        }
    }
}
