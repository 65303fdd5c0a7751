//! SPI flash command vocabulary.
//!
//! The board stores its event log in an LE25FU406B serial flash.
//! Commands are tunnelled through the [`RequestCode::SpiSendCommand`](crate::RequestCode)
//! feature request as raw SPI transactions; the builders below produce those transactions.

use crate::hex;
use alloc::{vec, vec::Vec};
use strum::{Display, FromRepr};

/// Length of an address field in a flash command.
pub const ADDR_LEN: usize = 3;

/// Length of the data field in a page write command.
pub const DATA_LEN: usize = 4;

/// Length of a raw command typed by the operator.
pub const RAW_COMMAND_LEN: usize = 8;

/// Flash instruction opcodes (LE25FU406B datasheet, table 2).
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum SpiCommand {
    /// Write status register.
    StatusRegWrite = 0x01,
    /// Page program.
    Write = 0x02,
    /// Read data.
    Read = 0x03,
    /// Reset the write enable latch.
    WriteDisable = 0x04,
    /// Read status register.
    StatusRegRead = 0x05,
    /// Set the write enable latch.
    WriteEnable = 0x06,
    /// Erase a 4 KiB sector.
    SmallSectorErase = 0xd7,
}

impl SpiCommand {
    /// Returns whether responses to this command are worth logging on their own.
    ///
    /// Reads are issued in bulk while dumping the flash log and are not.
    #[must_use]
    pub const fn is_noteworthy(self) -> bool {
        matches!(
            self,
            Self::StatusRegRead | Self::StatusRegWrite | Self::WriteEnable | Self::WriteDisable
        )
    }
}

/// Converts an address into its three big-endian address bytes.
///
/// Addresses wider than 24 bits are truncated.
#[must_use]
pub fn addr_bytes(addr: u32) -> [u8; ADDR_LEN] {
    let [_, a2, a1, a0] = addr.to_be_bytes();

    [a2, a1, a0]
}

/// Builds a read command for a numeric address.
#[must_use]
pub fn read(addr: u32) -> Vec<u8> {
    let mut cmd = vec![SpiCommand::Read as u8];

    cmd.extend_from_slice(&addr_bytes(addr));
    cmd
}

/// Builds a read command from address bytes, keeping at most three of them.
#[must_use]
pub fn read_from_bytes(addr: &[u8]) -> Vec<u8> {
    let mut cmd = vec![SpiCommand::Read as u8];

    cmd.extend(hex::pad_or_truncate(addr.to_vec(), ADDR_LEN));
    cmd
}

/// Builds a page write command. Must be preceded by [`write_enable`].
#[must_use]
pub fn write(addr: &[u8], data: &[u8]) -> Vec<u8> {
    let mut cmd = vec![SpiCommand::Write as u8];

    cmd.extend(hex::pad_or_truncate(addr.to_vec(), ADDR_LEN));
    cmd.extend(hex::pad_or_truncate(data.to_vec(), DATA_LEN));
    cmd
}

/// Builds a small sector erase command. Must be preceded by [`write_enable`].
#[must_use]
pub fn small_sector_erase(addr: &[u8]) -> Vec<u8> {
    let a0 = addr.first().copied().unwrap_or_default();
    let a1 = addr.get(1).copied().unwrap_or_default() & 0xf0;

    vec![SpiCommand::SmallSectorErase as u8, a0, a1, 0x00]
}

/// Builds a status register read command.
#[must_use]
pub fn status_register_read() -> Vec<u8> {
    vec![SpiCommand::StatusRegRead as u8, 0x00, 0x00, 0x00]
}

/// Builds a write enable command.
#[must_use]
pub fn write_enable() -> Vec<u8> {
    vec![SpiCommand::WriteEnable as u8, 0x00, 0x00, 0x00]
}

/// Builds a write disable command.
#[must_use]
pub fn write_disable() -> Vec<u8> {
    vec![SpiCommand::WriteDisable as u8, 0x00, 0x00, 0x00]
}

/// Pads or truncates an operator-typed command to [`RAW_COMMAND_LEN`] bytes.
#[must_use]
pub fn raw(cmd: &[u8]) -> Vec<u8> {
    hex::pad_or_truncate(cmd.to_vec(), RAW_COMMAND_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_commands() {
        assert_eq!(read(0x0001_2348), [0x03, 0x01, 0x23, 0x48]);
        assert_eq!(read(0x1234_5678), [0x03, 0x34, 0x56, 0x78]);
        assert_eq!(
            read_from_bytes(&[0x12]),
            [0x03, 0x12, 0x00, 0x00],
            "short address should be zero-padded"
        );
        assert_eq!(
            read_from_bytes(&[0x12, 0x34, 0x56, 0x78]),
            [0x03, 0x12, 0x34, 0x56],
            "long address should be truncated"
        );
    }

    #[test]
    fn write_command() {
        assert_eq!(
            write(&[0x01, 0x02], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee]),
            [0x02, 0x01, 0x02, 0x00, 0xaa, 0xbb, 0xcc, 0xdd],
            "write command should be correct"
        );
    }

    #[test]
    fn erase_command() {
        assert_eq!(
            small_sector_erase(&[0x07, 0x5f, 0x33]),
            [0xd7, 0x07, 0x50, 0x00],
            "erase command should be correct"
        );
        assert_eq!(small_sector_erase(&[]), [0xd7, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn raw_command() {
        assert_eq!(raw(&[0x9f]), [0x9f, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn noteworthy_commands() {
        assert!(SpiCommand::StatusRegRead.is_noteworthy());
        assert!(SpiCommand::WriteEnable.is_noteworthy());
        assert!(!SpiCommand::Read.is_noteworthy());
    }
}
