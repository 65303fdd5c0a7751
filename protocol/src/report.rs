//! Decoding of inbound HID input reports.
//!
//! Every input report starts with a [`ResponseCode`] byte followed by
//! opcode-specific fields at fixed offsets. [`Report::decode`] turns the raw
//! bytes into a typed [`Report`].

use crate::{
    bean::{self, TickCount},
    hex,
    spi::SpiCommand,
    state::{GlobalState, PORTS_SNAPSHOT_LEN, StatusRegister},
};
use alloc::{string::String, vec::Vec};
use core::fmt::{Display, Formatter};
use log::trace;
use strum::{Display, FromRepr};

/// Raw HID input report as delivered by the transport.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct InputReport {
    /// HID report ID (0 for devices without numbered reports).
    pub report_id: u8,
    /// Report payload, starting with the response code.
    pub data: Vec<u8>,
}

impl InputReport {
    /// Constructs a report from its ID and payload.
    pub fn new(report_id: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            report_id,
            data: data.into(),
        }
    }

    /// Returns the leading response code byte, if any.
    #[must_use]
    pub fn opcode(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Renders the report as `RId: 0, L: 3, Data: 90 0 1f`.
    #[must_use]
    pub fn dump(&self) -> String {
        alloc::format!(
            "RId: {}, L: {}, Data: {}",
            self.report_id,
            self.data.len(),
            hex::format_bytes(&self.data, " ")
        )
    }
}

/// Response code in the first byte of an input report.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum ResponseCode {
    /// Port register snapshot.
    PortsState = 0x03,
    /// Result of a tunnelled SPI transaction.
    SpiResponse = 0x11,
    /// SPI flash status register.
    SpiStatusRegister = 0x12,
    /// A BEAN frame was received.
    BeanCommand = 0x21,
    /// BEAN pulse widths were recorded.
    TickCounts = 0x23,
    /// Global diagnostic state.
    GlobalState = 0x41,
    /// Reply to an echo request.
    Echo = 0x90,
}

impl ResponseCode {
    /// Returns the minimum report length (including the code byte).
    #[must_use]
    pub const fn min_len(self) -> usize {
        match self {
            Self::PortsState => 1 + PORTS_SNAPSHOT_LEN,
            Self::SpiResponse => 9,
            Self::SpiStatusRegister => 3,
            Self::BeanCommand | Self::GlobalState => 18,
            Self::TickCounts | Self::Echo => 1,
        }
    }
}

/// Error type for [`Report::decode`].
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum DecodeError {
    /// The report contains no bytes at all.
    Empty,
    /// The report is shorter than its response code requires.
    Truncated {
        /// Response code of the report.
        code: ResponseCode,
        /// Required length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty report"),
            Self::Truncated {
                code,
                expected,
                actual,
            } => write!(
                f,
                "truncated {code} report: expected {expected} bytes, got {actual}"
            ),
        }
    }
}

impl core::error::Error for DecodeError {}

/// Echo of a tunnelled SPI transaction.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct SpiResponse {
    /// Bytes exchanged on the SPI bus (command byte first).
    pub transaction: [u8; 8],
}

impl SpiResponse {
    /// Returns the SPI command this response belongs to, if recognized.
    #[must_use]
    pub fn command(&self) -> Option<SpiCommand> {
        SpiCommand::from_repr(self.transaction[0])
    }

    /// Returns the four data bytes clocked in after command and address.
    #[must_use]
    pub fn data(&self) -> [u8; 4] {
        let [_, _, _, _, d0, d1, d2, d3] = self.transaction;

        [d0, d1, d2, d3]
    }
}

/// Decoded input report.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Report {
    /// Raw `PORTA`/`PORTB` snapshot.
    PortsState([u8; PORTS_SNAPSHOT_LEN]),
    /// SPI transaction echo.
    Spi(SpiResponse),
    /// SPI flash status register.
    SpiStatus(StatusRegister),
    /// Received BEAN frame, always 17 bytes long.
    BeanCommand([u8; bean::RECEIVED_FRAME_LEN]),
    /// Recorded BEAN pulse widths.
    TickCounts(Vec<TickCount>),
    /// Global diagnostic state.
    GlobalState(GlobalState),
    /// Echo reply.
    Echo,
    /// Report with an unrecognized response code.
    Unknown(u8),
}

impl Report {
    /// Decodes the payload of an input report.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let (&opcode, rest) = data.split_first().ok_or(DecodeError::Empty)?;
        let Some(code) = ResponseCode::from_repr(opcode) else {
            return Ok(Self::Unknown(opcode));
        };

        if data.len() < code.min_len() {
            return Err(DecodeError::Truncated {
                code,
                expected: code.min_len(),
                actual: data.len(),
            });
        }

        let report = match code {
            ResponseCode::PortsState => Self::PortsState(fixed(rest)),
            ResponseCode::SpiResponse => Self::Spi(SpiResponse {
                transaction: fixed(rest),
            }),
            ResponseCode::SpiStatusRegister => {
                Self::SpiStatus(StatusRegister::from_bits_truncate(rest[1]))
            }
            ResponseCode::BeanCommand => Self::BeanCommand(fixed(rest)),
            ResponseCode::TickCounts => Self::TickCounts(TickCount::decode_all(rest)),
            ResponseCode::GlobalState => Self::GlobalState(GlobalState::from(fixed::<17>(rest))),
            ResponseCode::Echo => Self::Echo,
        };

        trace!("Decoded report: {report:x?}");

        Ok(report)
    }

    /// Returns whether the report belongs to the known vocabulary.
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Returns whether the report should be logged even when known events are muted.
    ///
    /// Unknown reports and responses to one-off SPI commands (status register,
    /// write enable/disable) always qualify.
    #[must_use]
    pub fn always_log(&self) -> bool {
        match self {
            Self::Spi(resp) => resp.command().is_some_and(SpiCommand::is_noteworthy),
            _ => !self.is_known(),
        }
    }
}

/// Copies the first `N` bytes of a length-checked slice.
fn fixed<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut buf = [0x00; N];

    buf.copy_from_slice(&data[..N]);
    buf
}
