//! Event log stored in the SPI flash.
//!
//! Every log entry occupies two 4-byte words: a timestamp header
//! `[hour, min, ms10 high, ms10 low]` followed by a payload
//! `[cmd, data1, data2, data3]`. The log is read back with paired flash reads
//! (see [`Interface::read_spi_log`](crate::Interface::read_spi_log)); the
//! responses are assembled into [`SpiLogEntry`]s by [`SpiLog`].

use crate::{hex, state::Inputs};
use alloc::{collections::vec_deque::VecDeque, sync::Arc};
use bitflags_derive::FlagsDebug;
use core::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};
use strum::FromRepr;

/// Highest address read when no end address is given.
pub const LAST_ADDR: u32 = 0x7ffff;

/// Pause after every read request so the device can answer.
pub const READ_DELAY_MS: u32 = 20;

/// Size of one flash word.
pub const WORD_LEN: u32 = 4;

/// Size of one log entry (header and payload word).
pub const ENTRY_LEN: u32 = 2 * WORD_LEN;

/// Maximum number of hex digits accepted for an address.
const ADDR_DIGITS: usize = 6;

/// Address range of a log read, aligned to whole entries.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct ReadRange {
    start: u32,
    end: Option<u32>,
}

impl ReadRange {
    /// Creates a range, rounding both addresses down to a multiple of [`ENTRY_LEN`].
    ///
    /// An end address that rounds down to zero means "until the end of the log".
    #[must_use]
    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self {
            start: start & !(ENTRY_LEN - 1),
            end: end.map(|end| end & !(ENTRY_LEN - 1)).filter(|&end| end > 0),
        }
    }

    /// Parses operator-typed hex addresses.
    ///
    /// Only the first six hex digits are used. Empty or unparsable text counts as zero.
    #[must_use]
    pub fn parse(start: &str, end: &str) -> Self {
        Self::new(parse_addr(start), Some(parse_addr(end)))
    }

    /// Returns the aligned start address.
    #[must_use]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Returns the aligned end address, or `None` if the read is unbounded.
    #[must_use]
    pub fn end(&self) -> Option<u32> {
        self.end
    }

    /// Returns the last address the read may reach.
    #[must_use]
    pub fn effective_end(&self) -> u32 {
        self.end.unwrap_or(LAST_ADDR)
    }

    /// Returns whether the range can be read at all.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.end.is_none_or(|end| self.start <= end)
    }
}

fn parse_addr(text: &str) -> u32 {
    let digits: alloc::string::String = hex::sanitize(text)
        .chars()
        .filter(|c| *c != ' ')
        .take(ADDR_DIGITS)
        .collect();

    u32::from_str_radix(&digits, 16).unwrap_or_default()
}

/// Reason a log read stopped.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum ReadOutcome {
    /// The end address was reached.
    Completed,
    /// The end-of-log marker was found.
    EndOfLog,
    /// The session was cancelled.
    Cancelled,
    /// The start address lies after the end address; nothing was read.
    InvalidRange,
}

#[derive(Debug)]
struct Shared {
    range: ReadRange,
    current: AtomicU32,
    cancelled: AtomicBool,
    end_of_log: AtomicBool,
    finished: AtomicBool,
}

/// Handle to a running log read.
///
/// Clones share the same state, so one clone can drive the read loop while
/// another one is used to watch progress or cancel it.
#[derive(Clone, Debug)]
pub struct SpiLogSession(Arc<Shared>);

impl SpiLogSession {
    /// Creates a session positioned at the start of `range`.
    #[must_use]
    pub fn new(range: ReadRange) -> Self {
        Self(Arc::new(Shared {
            range,
            current: AtomicU32::new(range.start()),
            cancelled: AtomicBool::new(false),
            end_of_log: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }))
    }

    /// Returns the range being read.
    #[must_use]
    pub fn range(&self) -> ReadRange {
        self.0.range
    }

    /// Returns the address of the next read pair.
    #[must_use]
    pub fn current_addr(&self) -> u32 {
        self.0.current.load(Ordering::Acquire)
    }

    /// Requests the read loop to stop before its next read pair.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    /// Returns whether the session was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::Acquire)
    }

    /// Returns whether the read loop has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::Acquire)
    }

    /// Returns whether the newest accumulated entry is the end-of-log marker.
    #[must_use]
    pub fn reached_end_of_log(&self) -> bool {
        self.0.end_of_log.load(Ordering::Acquire)
    }

    /// Returns the read progress in `0.0..=1.0`, or zero once the read stopped.
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.is_finished() {
            return 0.0;
        }

        let start = f64::from(self.0.range.start());
        let end = f64::from(self.0.range.effective_end());
        let current = f64::from(self.current_addr());

        if end <= start {
            return 1.0;
        }

        ((current - start) / (end - start)).clamp(0.0, 1.0)
    }

    pub(crate) fn set_current_addr(&self, addr: u32) {
        self.0.current.store(addr, Ordering::Release);
    }

    pub(crate) fn set_end_of_log(&self, end_of_log: bool) {
        self.0.end_of_log.store(end_of_log, Ordering::Release);
    }

    pub(crate) fn finish(&self) {
        self.0.finished.store(true, Ordering::Release);
    }
}

/// Command stored in a log entry.
#[derive(FromRepr, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum LogCmd {
    /// The device was reset.
    Reset = 0x00,
    /// A debounced input changed.
    StateChange = 0x01,
    /// The immobilizer was engaged after a 5 s delay.
    ImmoIn5sDelay = 0x02,
    /// Erased flash, no entries follow.
    EndOfLog = 0xff,
}

impl LogCmd {
    /// Returns the short name used in log listings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reset => "R",
            Self::StateChange => "SC",
            Self::ImmoIn5sDelay => "IMMO 5S",
            Self::EndOfLog => "END OF LOG",
        }
    }
}

bitflags::bitflags! {
    /// Reset causes latched by the microcontroller.
    ///
    /// The high byte comes from `data1`, the low byte from `data2`.
    #[derive(FlagsDebug, Default, PartialEq, Eq, Copy, Clone)]
    pub struct ResetReason: u16 {
        /// Configuration mismatch.
        const ConfigMismatch = 0x0200;
        /// `MCLR` pin reset.
        const Mclr = 0x0080;
        /// Software reset.
        const Software = 0x0040;
        /// Watchdog timeout.
        const Watchdog = 0x0010;
        /// Wake from sleep.
        const WakeFromSleep = 0x0008;
        /// Wake from idle.
        const WakeFromIdle = 0x0004;
        /// Brown-out.
        const BrownOut = 0x0002;
        /// Power-on.
        const PowerOn = 0x0001;
    }
}

impl ResetReason {
    /// All causes with their abbreviations, in listing order.
    pub const NAMED: [(&'static str, Self); 8] = [
        ("CM", Self::ConfigMismatch),
        ("MCLR", Self::Mclr),
        ("SW", Self::Software),
        ("WD", Self::Watchdog),
        ("WFS", Self::WakeFromSleep),
        ("WFI", Self::WakeFromIdle),
        ("BO", Self::BrownOut),
        ("PO", Self::PowerOn),
    ];

    /// Decodes the causes from the first two data bytes of a reset entry.
    #[must_use]
    pub fn from_data(data1: u8, data2: u8) -> Self {
        Self::from_bits_truncate(u16::from_be_bytes([data1, data2]))
    }
}

/// Inputs in the order they are listed for state change entries.
const INPUT_NAMES: [(&str, Inputs); 4] = [
    ("ASR12V", Inputs::Asr12V),
    ("IMMO", Inputs::ImmoSense),
    ("CAPOT", Inputs::Capot),
    ("BTN", Inputs::Button),
];

/// One decoded log entry.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct SpiLogEntry {
    /// Flash address the entry was read from.
    pub addr: u32,
    /// Uptime hours.
    pub hour: u8,
    /// Uptime minutes.
    pub min: u8,
    /// Seconds derived from the 10 ms counter.
    pub sec: u16,
    /// Milliseconds derived from the 10 ms counter.
    pub ms: u16,
    raw: [u8; 8],
}

impl SpiLogEntry {
    fn from_header(addr: u32, header: [u8; 4]) -> Self {
        let [hour, min, ms10_high, ms10_low] = header;
        let ms_total = u32::from(u16::from_be_bytes([ms10_high, ms10_low])) * 10;
        let mut raw = [0xff; 8];

        raw[..4].copy_from_slice(&header);

        Self {
            addr,
            hour,
            min,
            // At most 655 s, both fit
            sec: u16::try_from(ms_total / 1000).unwrap_or(u16::MAX),
            ms: u16::try_from(ms_total % 1000).unwrap_or_default(),
            raw,
        }
    }

    fn fill_payload(&mut self, payload: [u8; 4]) {
        self.raw[4..].copy_from_slice(&payload);
    }

    /// Returns the raw command byte.
    #[must_use]
    pub fn cmd_raw(&self) -> u8 {
        self.raw[4]
    }

    /// Returns the decoded command, if known.
    #[must_use]
    pub fn cmd(&self) -> Option<LogCmd> {
        LogCmd::from_repr(self.cmd_raw())
    }

    /// Returns the three data bytes.
    #[must_use]
    pub fn data(&self) -> [u8; 3] {
        [self.raw[5], self.raw[6], self.raw[7]]
    }

    /// Returns the reset causes of a reset entry.
    #[must_use]
    pub fn reset_reason(&self) -> Option<ResetReason> {
        let [data1, data2, _] = self.data();

        (self.cmd() == Some(LogCmd::Reset)).then(|| ResetReason::from_data(data1, data2))
    }

    /// Returns the input levels of a state change entry.
    #[must_use]
    pub fn inputs(&self) -> Option<Inputs> {
        (self.cmd() == Some(LogCmd::StateChange))
            .then(|| Inputs::from_bits_truncate(self.data()[2]))
    }

    /// Returns whether this is the marker written past the last entry (erased flash).
    #[must_use]
    pub fn is_end_of_log(&self) -> bool {
        self.raw == [0xff; 8]
    }
}

impl Display for SpiLogEntry {
    /// Renders as `0x000010 - 1:2:3.450 - SC ASR12V+ IMMO- CAPOT- BTN+`.
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(
            f,
            "0x{:06x} - {}:{}:{}.{} - {}",
            self.addr,
            self.hour,
            self.min,
            self.sec,
            self.ms,
            self.cmd().map_or("UNKNOWN", LogCmd::name)
        )?;

        if let Some(reason) = self.reset_reason() {
            for (name, flag) in ResetReason::NAMED {
                if reason.contains(flag) {
                    write!(f, " {name}")?;
                }
            }
        }

        if let Some(inputs) = self.inputs() {
            for (name, flag) in INPUT_NAMES {
                let level = if inputs.contains(flag) { '+' } else { '-' };

                write!(f, " {name}{level}")?;
            }
        }

        Ok(())
    }
}

#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
enum Phase {
    #[default]
    AwaitingHeader,
    AwaitingPayload,
}

/// Assembles log entries from the data words of consecutive read responses.
///
/// Words are paired strictly in arrival order: the first word of a pair opens
/// a new entry, the second one completes it. Entries are kept newest-first.
#[derive(Default, Debug)]
pub struct SpiLog {
    entries: VecDeque<SpiLogEntry>,
    phase: Phase,
}

impl SpiLog {
    /// Feeds one data word read at the time `addr` was the current session address.
    ///
    /// Until its payload arrives, a new entry's payload reads as `0xff`.
    pub fn accumulate(&mut self, addr: u32, word: [u8; 4]) {
        self.phase = match self.phase {
            Phase::AwaitingHeader => {
                self.entries.push_front(SpiLogEntry::from_header(addr, word));
                Phase::AwaitingPayload
            }
            Phase::AwaitingPayload => {
                if let Some(entry) = self.entries.front_mut() {
                    entry.fill_payload(word);
                }

                Phase::AwaitingHeader
            }
        };
    }

    /// Returns the newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<&SpiLogEntry> {
        self.entries.front()
    }

    /// Iterates over the entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &SpiLogEntry> {
        self.entries.iter()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no entry was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops all entries and waits for a header again.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.phase = Phase::AwaitingHeader;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn range_alignment() {
        let range = ReadRange::parse("00000f", "00 0017");

        assert_eq!(range.start(), 0x08, "start address should be aligned");
        assert_eq!(range.end(), Some(0x10), "end address should be aligned");
        assert!(range.is_valid(), "range should be valid");
    }

    #[test]
    fn range_unbounded() {
        for end in ["", "zz", "7", "000000"] {
            let range = ReadRange::parse("10", end);

            assert_eq!(range.end(), None, "end address should be unbounded");
            assert_eq!(range.effective_end(), LAST_ADDR);
            assert!(range.is_valid(), "unbounded range should be valid");
        }
    }

    #[test]
    fn range_invalid() {
        assert!(!ReadRange::parse("20", "10").is_valid());
        assert_eq!(
            ReadRange::parse("1234567", "").start(),
            0x12_3450,
            "only six digits should be used"
        );
    }

    #[test]
    fn session_progress() {
        let session = SpiLogSession::new(ReadRange::new(0x00, Some(0x40)));

        assert!((session.progress() - 0.0).abs() < f64::EPSILON);

        session.set_current_addr(0x10);

        assert!((session.progress() - 0.25).abs() < f64::EPSILON);

        session.set_current_addr(0x48);

        assert!((session.progress() - 1.0).abs() < f64::EPSILON, "progress should be clamped");

        session.finish();

        assert!(session.progress().abs() < f64::EPSILON, "finished session should report zero");
    }

    #[test]
    fn session_clones_share_state() {
        let session = SpiLogSession::new(ReadRange::new(0x00, None));
        let other = session.clone();

        other.cancel();

        assert!(session.is_cancelled(), "cancellation should be shared");
        assert!(!session.is_finished());
    }

    #[test]
    fn accumulate_pairs() {
        let mut log = SpiLog::default();

        log.accumulate(0x08, [1, 2, 0x01, 0x2d]);

        let entry = log.latest().unwrap();

        assert_eq!(entry.addr, 0x08, "address should be correct");
        assert_eq!((entry.hour, entry.min, entry.sec, entry.ms), (1, 2, 3, 10));
        assert_eq!(entry.cmd_raw(), 0xff, "payload should be a placeholder");

        log.accumulate(0x08, [0x01, 0x00, 0x00, 0b1001]);

        assert_eq!(log.len(), 1, "payload should not open an entry");
        assert_eq!(log.latest().unwrap().inputs(), Some(Inputs::Button | Inputs::Asr12V));

        log.accumulate(0x10, [0, 0, 0, 0]);

        assert_eq!(log.len(), 2);
        assert_eq!(log.latest().unwrap().addr, 0x10, "newest entry should come first");
    }

    #[test]
    fn end_of_log_marker() {
        let mut log = SpiLog::default();

        log.accumulate(0x00, [0xff; 4]);

        assert!(log.latest().unwrap().is_end_of_log(), "erased header should match");

        log.accumulate(0x00, [0xff, 0xff, 0xff, 0xfe]);

        assert!(!log.latest().unwrap().is_end_of_log());

        log.clear();
        log.accumulate(0x00, [0, 0, 0, 0]);

        assert_eq!(log.len(), 1, "clear should restart pairing");
        assert_eq!(log.latest().unwrap().cmd_raw(), 0xff);
    }

    #[test]
    fn entry_render() {
        let mut log = SpiLog::default();

        log.accumulate(0x10, [1, 2, 0x01, 0x59]);
        log.accumulate(0x10, [0x00, 0x02, 0x81, 0x00]);

        assert_eq!(log.latest().unwrap().to_string(), "0x000010 - 1:2:3.450 - R CM MCLR PO");

        log.accumulate(0x18, [0, 0, 0, 0]);
        log.accumulate(0x18, [0x01, 0x00, 0x00, 0b0100]);

        assert_eq!(
            log.latest().unwrap().to_string(),
            "0x000018 - 0:0:0.0 - SC ASR12V- IMMO+ CAPOT- BTN-"
        );

        log.accumulate(0x20, [0, 0, 0, 0]);
        log.accumulate(0x20, [0x33, 0, 0, 0]);

        assert_eq!(log.latest().unwrap().to_string(), "0x000020 - 0:0:0.0 - UNKNOWN");
    }
}
