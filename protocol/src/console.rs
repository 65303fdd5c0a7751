//! Decoded device state and the operator log.
//!
//! [`Console`] is the single writer of everything derived from input reports.
//! Reports are handed to [`Console::dispatch`] in arrival order together with
//! a monotonic timestamp supplied by the caller.

use crate::{
    bean::{self, CommandLog, TickCount},
    hex,
    report::{InputReport, Report},
    spi_log::{ReadRange, SpiLog, SpiLogEntry, SpiLogSession},
    state::{GlobalState, PortStates, StatusRegister},
};
use alloc::{
    collections::vec_deque::VecDeque,
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::{
    fmt::{Display, Formatter},
    time::Duration,
};
use log::{debug, warn};
use strum::Display;

/// How long the echo indicator stays lit after an echo reply.
pub const ECHO_WINDOW: Duration = Duration::from_millis(1000);

/// Number of operator log entries kept, older ones are dropped.
pub const MAX_LOG_ENTRIES: usize = 1000;

/// Severity of an operator log entry.
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum LogLevel {
    /// Regular event.
    Info,
    /// Anomaly that did not stop processing.
    Warning,
    /// Failed operation.
    Error,
}

/// Content of an operator log entry.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum LogMessage {
    /// Plain text.
    Text(String),
    /// Recorded BEAN pulse widths, rendered by the front end.
    Ticks(Vec<TickCount>),
}

impl Display for LogMessage {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Ticks(ticks) => {
                for (i, tick) in ticks.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }

                    write!(f, "{tick}")?;
                }

                Ok(())
            }
        }
    }
}

/// Operator log entry.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LogEntry {
    /// Time the entry was created.
    pub at: Duration,
    /// Severity.
    pub level: LogLevel,
    /// Content.
    pub message: LogMessage,
}

/// Owner of all protocol-derived state.
#[derive(Debug)]
pub struct Console {
    ports: PortStates,
    status_register: Option<StatusRegister>,
    global_state: Option<GlobalState>,
    bean_log: CommandLog,
    spi_log: SpiLog,
    session: Option<SpiLogSession>,
    // Cancelled read whose loop has not stopped yet, its responses are dropped
    draining: Option<SpiLogSession>,
    logs: VecDeque<LogEntry>,
    log_known_events: bool,
    echo_at: Option<Duration>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Console {
    /// Creates an empty console.
    ///
    /// If `log_known_events` is set, every report is dumped to the operator log.
    #[must_use]
    pub fn new(log_known_events: bool) -> Self {
        Self {
            ports: PortStates::default(),
            status_register: None,
            global_state: None,
            bean_log: CommandLog::default(),
            spi_log: SpiLog::default(),
            session: None,
            draining: None,
            logs: VecDeque::new(),
            log_known_events,
            echo_at: None,
        }
    }

    /// Applies one input report.
    ///
    /// Malformed reports are logged as warnings and otherwise ignored.
    pub fn dispatch(&mut self, now: Duration, input: &InputReport) {
        let report = match Report::decode(&input.data) {
            Ok(report) => report,
            Err(err) => {
                warn!("Dropping report: {err}");
                self.log(now, LogLevel::Warning, format!("{err}: {}", input.dump()));

                return;
            }
        };

        if self.log_known_events || report.always_log() {
            self.log(now, LogLevel::Info, input.dump());
        }

        match report {
            Report::PortsState(snapshot) => self.ports.update(&snapshot),
            Report::Spi(resp) => {
                if self.draining.as_ref().is_some_and(|s| !s.is_finished()) {
                    debug!("Dropping response of cancelled flash log read");
                    return;
                }

                self.draining = None;

                if let Some(session) = self.session.as_ref().filter(|s| !s.is_finished()) {
                    self.spi_log.accumulate(session.current_addr(), resp.data());
                    session.set_end_of_log(
                        self.spi_log
                            .latest()
                            .is_some_and(SpiLogEntry::is_end_of_log),
                    );
                }
            }
            Report::SpiStatus(reg) => self.status_register = Some(reg),
            Report::BeanCommand(frame) => {
                self.bean_log.add(&frame);

                if let Some(tail) = bean::trailing_garbage(&frame) {
                    self.log(
                        now,
                        LogLevel::Warning,
                        format!(
                            "Trailing data after BEAN command: {}",
                            hex::format_bytes(tail, " ")
                        ),
                    );
                }
            }
            Report::TickCounts(ticks) => self.push(now, LogLevel::Info, LogMessage::Ticks(ticks)),
            Report::GlobalState(state) => self.global_state = Some(state),
            Report::Echo => self.echo_at = Some(now),
            Report::Unknown(_) => {}
        }
    }

    /// Returns the last known port levels.
    #[must_use]
    pub fn ports(&self) -> &PortStates {
        &self.ports
    }

    /// Returns the last reported flash status register.
    #[must_use]
    pub fn status_register(&self) -> Option<StatusRegister> {
        self.status_register
    }

    /// Returns the last reported global state.
    #[must_use]
    pub fn global_state(&self) -> Option<&GlobalState> {
        self.global_state.as_ref()
    }

    /// Returns the histogram of received BEAN commands.
    #[must_use]
    pub fn bean_log(&self) -> &CommandLog {
        &self.bean_log
    }

    /// Returns the entries read from the flash log.
    #[must_use]
    pub fn spi_log(&self) -> &SpiLog {
        &self.spi_log
    }

    /// Iterates over the operator log, newest first.
    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    /// Returns whether an echo reply arrived within the last [`ECHO_WINDOW`].
    #[must_use]
    pub fn is_echo_received(&self, now: Duration) -> bool {
        self.echo_at
            .is_some_and(|at| now.saturating_sub(at) < ECHO_WINDOW)
    }

    /// Returns whether every report is dumped to the operator log.
    #[must_use]
    pub fn log_known_events(&self) -> bool {
        self.log_known_events
    }

    /// Switches dumping of known reports on or off.
    pub fn toggle_log_known_events(&mut self) {
        self.log_known_events = !self.log_known_events;
    }

    /// Clears the operator log.
    pub fn clear_logs(&mut self) {
        self.logs.clear();
    }

    /// Clears the BEAN command histogram.
    pub fn clear_bean_log(&mut self) {
        self.bean_log.clear();
    }

    /// Clears the flash log entries.
    pub fn clear_spi_log(&mut self) {
        self.spi_log.clear();
    }

    /// Starts a new flash log read, cancelling the one in progress.
    ///
    /// Previously read entries are discarded. The returned session has to be
    /// driven by [`Interface::read_spi_log`](crate::Interface::read_spi_log).
    pub fn start_spi_log_read(&mut self, range: ReadRange) -> SpiLogSession {
        self.cancel_spi_log_read();
        self.spi_log.clear();

        if let Some(prev) = self.session.take().filter(|s| !s.is_finished()) {
            self.draining = Some(prev);
        }

        let session = SpiLogSession::new(range);

        debug!("Starting flash log read: {range:x?}");

        self.session = Some(session.clone());

        session
    }

    /// Cancels the flash log read in progress, if any.
    pub fn cancel_spi_log_read(&mut self) {
        if let Some(session) = &self.session {
            session.cancel();
        }
    }

    /// Returns whether a flash log read is running.
    #[must_use]
    pub fn is_reading_spi_log(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_finished())
    }

    /// Returns whether the running flash log read was cancelled but has not stopped yet.
    #[must_use]
    pub fn is_spi_log_read_cancelled(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_cancelled() && !s.is_finished())
    }

    /// Returns the progress of the running read, or zero.
    #[must_use]
    pub fn spi_log_progress(&self) -> f64 {
        self.session.as_ref().map_or(0.0, SpiLogSession::progress)
    }

    /// Appends a text entry to the operator log.
    pub fn log(&mut self, now: Duration, level: LogLevel, text: impl Into<String>) {
        self.push(now, level, LogMessage::Text(text.into()));
    }

    /// Logs a failed transport operation.
    pub fn log_transport_error(&mut self, now: Duration, err: &impl Display) {
        warn!("Transport error: {err}");
        self.log(now, LogLevel::Error, err.to_string());
    }

    /// Logs that a device was opened.
    pub fn log_connected(&mut self, now: Duration, name: &str) {
        self.log(now, LogLevel::Info, format!("Connected to {name}"));
    }

    /// Logs that the device was closed and abandons the flash log read.
    pub fn log_disconnected(&mut self, now: Duration) {
        self.cancel_spi_log_read();
        // Loops die with the connection and never finish
        self.session = None;
        self.draining = None;
        self.log(now, LogLevel::Info, "Disconnected");
    }

    fn push(&mut self, at: Duration, level: LogLevel, message: LogMessage) {
        self.logs.push_front(LogEntry { at, level, message });
        self.logs.truncate(MAX_LOG_ENTRIES);
    }
}
