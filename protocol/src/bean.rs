//! BEAN bus message framing.
//!
//! A BEAN frame has the layout `| PRI-ML | DST-ID | MSG-ID | data (1–11) | CRC |`.
//! The low nibble of the first byte (`ML`) holds the number of bytes that
//! follow it, excluding the CRC. The CRC is [`hex::crc8`] over all preceding bytes.

use crate::hex;
use alloc::{
    collections::btree_map::{self, BTreeMap},
    string::String,
    vec::Vec,
};
use core::fmt::{Display, Formatter};

/// Number of frame bytes carried by a received-command report.
pub const RECEIVED_FRAME_LEN: usize = 17;

/// Largest value the length nibble can encode.
const MAX_ML: u8 = 0x0f;

/// Error type for [`BeanCommand`] framing.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum FrameError {
    /// The text contains no bytes.
    Empty,
    /// The command has more bytes than the length nibble can describe.
    TooLong(usize),
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty BEAN command"),
            Self::TooLong(len) => write!(f, "BEAN command too long: {len} bytes"),
        }
    }
}

impl core::error::Error for FrameError {}

/// Outbound BEAN command with computed length nibble and CRC.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BeanCommand(Vec<u8>);

impl BeanCommand {
    /// Frames raw bytes `| PRI | DST-ID | MSG-ID | data |`.
    ///
    /// The low nibble of the first byte is replaced by the byte count minus one
    /// and the CRC is appended.
    pub fn frame(mut bytes: Vec<u8>) -> Result<Self, FrameError> {
        let ml = bytes.len().checked_sub(1).ok_or(FrameError::Empty)?;
        let ml = u8::try_from(ml)
            .ok()
            .filter(|&ml| ml <= MAX_ML)
            .ok_or(FrameError::TooLong(bytes.len()))?;

        bytes[0] = (bytes[0] & 0xf0) | ml;
        bytes.push(hex::crc8(&bytes));

        Ok(Self(bytes))
    }

    /// Frames operator-typed hex text, e.g. `"10 fe 01 02"`.
    ///
    /// Non-hex characters are stripped first.
    pub fn from_hex(text: &str) -> Result<Self, FrameError> {
        Self::frame(hex::parse_bytes(&hex::sanitize(text)))
    }

    /// Returns the framed bytes, including the CRC.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for BeanCommand {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "{}", hex::format_bytes_padded(&self.0, " "))
    }
}

/// Returns the declared length nibble of a frame.
#[must_use]
pub fn declared_len(frame: &[u8]) -> usize {
    frame.first().map_or(0, |b| usize::from(b & 0x0f))
}

/// Returns the bytes following the declared frame and its trailer, if any are nonzero.
///
/// Received frames are always 17 bytes long; anything after the declared
/// length plus header, CRC and trailer indicates a corrupted frame.
#[must_use]
pub fn trailing_garbage(frame: &[u8]) -> Option<&[u8]> {
    let tail = frame.get(declared_len(frame) + 4..)?;

    tail.iter().any(|&b| b != 0).then_some(tail)
}

/// A received BEAN frame together with its occurrence count.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LoggedCommand {
    /// Bytes of the first occurrence.
    pub bytes: Vec<u8>,
    /// Number of times the frame was received.
    pub count: u32,
}

impl Display for LoggedCommand {
    /// Renders as `ccc:  PRI-DST-MSG-data-CRC-tail`.
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        let ml = declared_len(&self.bytes);
        let byte = |idx: usize| {
            self.bytes
                .get(idx)
                .map(|b| alloc::format!("{b:02X}"))
                .unwrap_or_default()
        };
        let data = self
            .bytes
            .get(3..=ml.max(2))
            .map(|data| hex::format_bytes_padded(data, ""))
            .unwrap_or_default();

        write!(
            f,
            "{:03}:  {}-{}-{}-{}-{}-{}{}",
            self.count,
            byte(0),
            byte(1),
            byte(2),
            data,
            byte(ml + 1),
            byte(ml + 2),
            byte(ml + 3),
        )
    }
}

/// Histogram of received BEAN frames.
///
/// Frames are keyed by the hex string of their declared-length prefix, so two
/// frames that only differ after that prefix count as the same command.
#[derive(Default, Debug)]
pub struct CommandLog(BTreeMap<String, LoggedCommand>);

impl CommandLog {
    /// Returns the key a frame is aggregated under.
    #[must_use]
    pub fn key(frame: &[u8]) -> String {
        let len = (declared_len(frame) + 3).min(frame.len());

        hex::format_bytes_padded(&frame[..len], "").to_lowercase()
    }

    /// Records one received frame.
    pub fn add(&mut self, frame: &[u8]) {
        match self.0.entry(Self::key(frame)) {
            btree_map::Entry::Vacant(entry) => {
                entry.insert(LoggedCommand {
                    bytes: frame.to_vec(),
                    count: 1,
                });
            }
            btree_map::Entry::Occupied(mut entry) => entry.get_mut().count += 1,
        }
    }

    /// Returns the entry recorded under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&LoggedCommand> {
        self.0.get(&key.to_lowercase())
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoggedCommand)> {
        self.0.iter().map(|(key, cmd)| (key.as_str(), cmd))
    }

    /// Returns the number of distinct commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no command has been received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Forgets all received commands.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One BEAN line pulse measured by the tick recorder.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct TickCount {
    /// Line level before the pulse.
    pub level: bool,
    /// Pulse width in bit times (1–6).
    pub bits: u8,
    /// Timer remainder after dividing by the bit time.
    pub remainder: Option<u8>,
}

impl TickCount {
    /// Decodes the pairs following the opcode of a tick-count report.
    ///
    /// Each pair is `0bLccccccc` (level, bit count) followed by the remainder.
    #[must_use]
    pub fn decode_all(data: &[u8]) -> Vec<Self> {
        data.chunks(2)
            .map(|pair| Self {
                level: pair[0] & 0x80 != 0,
                bits: pair[0] & 0x7f,
                remainder: pair.get(1).copied(),
            })
            .collect()
    }
}

impl Display for TickCount {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self.remainder {
            Some(rem) => write!(f, "{}-{rem:x}", self.bits),
            None => write!(f, "{}", self.bits),
        }
    }
}
