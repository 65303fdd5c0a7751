//! Talk to the BEAN-bus/SPI-flash debug board over its vendor-defined USB HID protocol.
//!
//! # Overview
//!
//! The `beandbg` crate implements the debug protocol of a PIC-based board
//! that sits on a car's BEAN bus and keeps an event log in SPI flash.
//! It offers an asynchronous, platform-agnostic API for both directions
//! of the protocol:
//!
//! - [`Interface`] encodes the host's feature requests (port toggling,
//!   SPI flash commands, BEAN commands, bootloader trigger) and drives
//!   the paced flash log read.
//! - [`console::Console`] decodes the board's input reports into typed state
//!   and keeps a human-readable log.
//!
//! # Getting started
//!
//! The board enumerates as a HID device with vendor ID `0x04D8` and
//! product ID `0x0032`. If you enable the `native-hid` feature, you can open
//! it using [`hid::open`]:
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> beandbg::Result<(), beandbg::hid::PortError> {
//! let (port, mut reports) = beandbg::hid::open(beandbg::hid::VENDOR_ID, beandbg::hid::PRODUCT_ID)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Examples
//!
//! ## Sending requests and decoding the replies
//!
//! ```no_run
//! use beandbg::{Interface, console::Console};
//! use std::time::Instant;
//!
//! # #[tokio::main]
//! # async fn main() -> beandbg::Result<(), beandbg::hid::PortError> {
//! # let (port, mut reports) = beandbg::hid::open(0x04d8, 0x0032)?;
//! let mut intf = Interface::new(port);
//! let mut console = Console::default();
//! let started = Instant::now();
//!
//! intf.get_ports_state().await?;
//!
//! while let Some(report) = reports.recv().await {
//!     console.dispatch(started.elapsed(), &report);
//! }
//!
//! # Ok(())
//! # }
//! ```
//!
//! # Protocol details
//!
//! Every request is a single output report `[code, sub-command, payload...]`.
//! The board answers asynchronously with input reports whose first byte
//! identifies their content. Requests and replies are not correlated; the
//! flash log read relies on a fixed pause after every request instead.

#![no_std]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

pub mod bean;
pub mod console;
pub mod hex;
pub mod report;
pub mod spi;
pub mod spi_log;
pub mod state;

#[cfg(feature = "native-hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "native-hid")))]
pub mod hid;

pub use embedded_hal_async;
pub use embedded_io_async;

use alloc::{sync::Arc, vec::Vec};
use bean::BeanCommand;
use core::{
    fmt::{Display, Formatter},
    sync::atomic::{AtomicBool, Ordering},
};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use log::{debug, trace};
use spi_log::{READ_DELAY_MS, ReadOutcome, SpiLogSession, WORD_LEN};
use state::{OutputPort, PortDrive};
use strum::{Display, FromRepr};

/// A specialized [`Result`] type for [`Interface`] operations.
///
/// Uses [`Error<E>`] as the error variant, which can include port-specific errors.
pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Error type for [`Interface`] operations.
///
/// The generic parameter `E` allows the error type to carry a port-specific error.
///
/// This enum is marked `#[non_exhaustive]` to allow for future variants.
#[non_exhaustive]
#[derive(PartialEq, Eq, Debug)]
pub enum Error<E> {
    /// The provided argument is invalid.
    InvalidArgument,
    /// A port-specific input/output error.
    Io(E),
}

impl<E: core::error::Error> Display for Error<E> {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Io(err) => write!(f, "input/output error: {err}"),
        }
    }
}

impl<E: core::error::Error> core::error::Error for Error<E> {}

impl<E> From<E> for Error<E> {
    fn from(err: E) -> Self {
        Self::Io(err)
    }
}

/// Feature request code, the first byte of every output report.
#[derive(FromRepr, Display, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum RequestCode {
    /// No operation.
    NoCmd = 0x00,
    /// Drive the BEAN debug pin (selected by the sub-command).
    BeanDebug = 0x01,
    /// Report the `PORTA`/`PORTB` snapshot.
    GetPortsState = 0x02,
    /// Drive the masked pins low.
    SetPortState0 = 0x03,
    /// Drive the masked pins high.
    SetPortState1 = 0x04,
    /// Run a raw SPI flash transaction.
    SpiSendCommand = 0x11,
    /// Report the SPI controller registers.
    SpiGetRegs = 0x12,
    /// Transmit a BEAN frame.
    SendBeanCmd = 0x21,
    /// Report received BEAN frames.
    ListenBean = 0x22,
    /// Transmit a BEAN frame and record the line's pulse widths.
    SendBeanCmdRecTicks = 0x23,
    /// Record the pulse widths of received BEAN frames.
    ListenBeanRecTicks = 0x24,
    /// Play the beep sound.
    PlayBeep = 0x31,
    /// Report the global state once.
    GetGlobalState = 0x41,
    /// Report the global state periodically.
    MonitorGlobalState = 0x42,
    /// Stop sending the periodic immobilizer BEAN command.
    DisablePeriodicImmo = 0x51,
    /// Resume sending the periodic immobilizer BEAN command.
    EnablePeriodicImmo = 0x52,
    /// Reboot into the bootloader.
    StartBootloader = 0x80,
    /// Request an echo reply.
    Echo = 0x90,
}

/// Sub-command, the second byte of every output report.
#[derive(FromRepr, Display, Default, PartialEq, Eq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum SubCommand {
    /// No sub-command.
    #[default]
    None = 0x00,
    /// Set the BEAN debug pin.
    BeanDebugSet1 = 0x01,
    /// Clear the BEAN debug pin.
    BeanDebugSet0 = 0x02,
}

/// Feature request sent to the board.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Request {
    code: RequestCode,
    sub: SubCommand,
    payload: Vec<u8>,
}

impl Request {
    /// Constructs a request. The payload length is not validated.
    pub fn new(code: RequestCode, sub: SubCommand, payload: impl Into<Vec<u8>>) -> Self {
        let req = Self {
            code,
            sub,
            payload: payload.into(),
        };

        trace!("New request: {req:x?}");

        req
    }

    /// Constructs a request without sub-command and payload.
    pub fn simple(code: RequestCode) -> Self {
        Self::new(code, SubCommand::None, Vec::new())
    }

    /// Returns the request code.
    #[must_use]
    pub fn code(&self) -> RequestCode {
        self.code
    }

    /// Serializes the request as `[code, sub-command, payload...]`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.payload.len());

        buf.push(self.code as u8);
        buf.push(self.sub as u8);
        buf.extend_from_slice(&self.payload);

        buf
    }
}

/// Cooperative cancellation flag shared between a loop and its controller.
#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Asynchronous feature request interface.
///
/// Requires a port that implements [`Write`]. Every request is written
/// in one go and then flushed; the flush marks the end of one output report.
///
/// Replies arrive independently as input reports and should be passed to
/// a [`console::Console`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> beandbg::Result<(), beandbg::hid::PortError> {
/// use beandbg::state::{OutputPort, PortDrive};
///
/// let (port, _reports) = beandbg::hid::open(0x04d8, 0x0032)?;
/// let mut intf = beandbg::Interface::new(port);
///
/// intf.set_port(OutputPort::Beeper, PortDrive::High).await?;
/// intf.play_beep().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Interface<P> {
    port: P,
}

impl<P: Write> Interface<P> {
    /// Constructs a new request interface.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Returns a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Sends an arbitrary request.
    pub async fn send(&mut self, req: &Request) -> Result<(), P::Error> {
        let buf = req.to_bytes();

        trace!("Write to port: {buf:02x?}");
        self.port.write_all(&buf).await?;
        self.port.flush().await?;

        Ok(())
    }

    /// Asks for a `PORTA`/`PORTB` snapshot.
    pub async fn get_ports_state(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::GetPortsState))
            .await
    }

    /// Drives an output pin.
    ///
    /// [`PortDrive::Release`] leaves the pin to the firmware and sends nothing.
    pub async fn set_port(&mut self, port: OutputPort, drive: PortDrive) -> Result<(), P::Error> {
        let code = match drive {
            PortDrive::Low => RequestCode::SetPortState0,
            PortDrive::High => RequestCode::SetPortState1,
            PortDrive::Release => return Ok(()),
        };

        self.send(&Request::new(code, SubCommand::None, port.mask()))
            .await
    }

    /// Runs a raw SPI flash transaction. See [`spi`] for command builders.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the command is empty.
    pub async fn spi_send_command(&mut self, cmd: &[u8]) -> Result<(), P::Error> {
        if cmd.is_empty() {
            return Err(Error::InvalidArgument);
        }

        self.send(&Request::new(
            RequestCode::SpiSendCommand,
            SubCommand::None,
            cmd,
        ))
        .await
    }

    /// Asks for the SPI controller registers.
    pub async fn spi_get_registers(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::SpiGetRegs)).await
    }

    /// Reads the flash status register.
    pub async fn read_status_register(&mut self) -> Result<(), P::Error> {
        self.spi_send_command(&spi::status_register_read()).await
    }

    /// Sets or clears the flash write enable latch.
    pub async fn set_write_enable(&mut self, enable: bool) -> Result<(), P::Error> {
        let cmd = if enable {
            spi::write_enable()
        } else {
            spi::write_disable()
        };

        self.spi_send_command(&cmd).await
    }

    /// Programs one flash word, enabling writes first.
    pub async fn write_flash(&mut self, addr: &[u8], data: &[u8]) -> Result<(), P::Error> {
        self.set_write_enable(true).await?;
        self.spi_send_command(&spi::write(addr, data)).await
    }

    /// Erases the 4 KiB sector containing `addr`, enabling writes first.
    pub async fn erase_flash_sector(&mut self, addr: &[u8]) -> Result<(), P::Error> {
        self.set_write_enable(true).await?;
        self.spi_send_command(&spi::small_sector_erase(addr)).await
    }

    /// Transmits a BEAN frame.
    ///
    /// If `record_ticks` is set, the board also reports the pulse widths it observes.
    pub async fn send_bean_command(
        &mut self,
        cmd: &BeanCommand,
        record_ticks: bool,
    ) -> Result<(), P::Error> {
        let code = if record_ticks {
            RequestCode::SendBeanCmdRecTicks
        } else {
            RequestCode::SendBeanCmd
        };

        self.send(&Request::new(code, SubCommand::None, cmd.as_bytes()))
            .await
    }

    /// Transmits a BEAN frame `repeat` times, pausing `interval_ms` between sends.
    ///
    /// Cancellation is checked after every send and after every pause.
    /// Returns the number of frames sent.
    pub async fn send_bean_command_repeated<D: DelayNs>(
        &mut self,
        cmd: &BeanCommand,
        repeat: u32,
        interval_ms: u32,
        cancel: &CancelToken,
        delay: &mut D,
    ) -> Result<u32, P::Error> {
        let mut sent = 0;

        for _ in 0..repeat {
            self.send_bean_command(cmd, false).await?;
            sent += 1;

            if cancel.is_cancelled() {
                break;
            }

            delay.delay_ms(interval_ms).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        debug!("Sent BEAN command {sent} times");

        Ok(sent)
    }

    /// Starts listening on the BEAN bus, optionally recording pulse widths.
    pub async fn listen_bean(&mut self, record_ticks: bool) -> Result<(), P::Error> {
        let code = if record_ticks {
            RequestCode::ListenBeanRecTicks
        } else {
            RequestCode::ListenBean
        };

        self.send(&Request::simple(code)).await
    }

    /// Drives the BEAN debug pin.
    pub async fn set_bean_debug(&mut self, level: bool) -> Result<(), P::Error> {
        let sub = if level {
            SubCommand::BeanDebugSet1
        } else {
            SubCommand::BeanDebugSet0
        };

        self.send(&Request::new(RequestCode::BeanDebug, sub, Vec::new()))
            .await
    }

    /// Plays the beep sound.
    pub async fn play_beep(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::PlayBeep)).await
    }

    /// Asks for the global state once.
    pub async fn get_global_state(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::GetGlobalState))
            .await
    }

    /// Asks for the global state to be reported periodically.
    pub async fn monitor_global_state(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::MonitorGlobalState))
            .await
    }

    /// Enables or disables the periodic immobilizer BEAN command.
    pub async fn set_periodic_immo(&mut self, enable: bool) -> Result<(), P::Error> {
        let code = if enable {
            RequestCode::EnablePeriodicImmo
        } else {
            RequestCode::DisablePeriodicImmo
        };

        self.send(&Request::simple(code)).await
    }

    /// Reboots the board into its bootloader.
    pub async fn start_bootloader(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::StartBootloader))
            .await
    }

    /// Asks for an echo reply.
    pub async fn echo(&mut self) -> Result<(), P::Error> {
        self.send(&Request::simple(RequestCode::Echo)).await
    }

    /// Reads the flash log of `session` with paired, paced read requests.
    ///
    /// Each iteration reads one entry (two words) and then publishes the next
    /// address through the session. Replies are not awaited; they have to be
    /// dispatched to the [`console::Console`] that created the session while
    /// this loop is running.
    ///
    /// The loop stops when the session is cancelled, the end address is passed
    /// or, for unbounded reads, the end-of-log marker was accumulated.
    /// The session is finished in every case, including transport errors.
    pub async fn read_spi_log<D: DelayNs>(
        &mut self,
        session: &SpiLogSession,
        delay: &mut D,
    ) -> Result<ReadOutcome, P::Error> {
        let outcome = self.read_spi_log_entries(session, delay).await;

        session.finish();
        debug!("Flash log read stopped: {outcome:?}");

        outcome
    }

    async fn read_spi_log_entries<D: DelayNs>(
        &mut self,
        session: &SpiLogSession,
        delay: &mut D,
    ) -> Result<ReadOutcome, P::Error> {
        let range = session.range();

        if !range.is_valid() {
            return Ok(ReadOutcome::InvalidRange);
        }

        let mut addr = session.current_addr();

        loop {
            if session.is_cancelled() {
                return Ok(ReadOutcome::Cancelled);
            }

            if addr > range.effective_end() {
                return Ok(ReadOutcome::Completed);
            }

            if range.end().is_none() && session.reached_end_of_log() {
                return Ok(ReadOutcome::EndOfLog);
            }

            for _ in 0..2 {
                self.spi_send_command(&spi::read(addr)).await?;
                delay.delay_ms(READ_DELAY_MS).await;
                addr += WORD_LEN;
            }

            session.set_current_addr(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{console::Console, report::InputReport, spi_log::ReadRange};
    use alloc::vec;
    use core::time::Duration;
    use embedded_io_async::{ErrorKind, ErrorType};
    use log::LevelFilter;

    pub fn init_logger() {
        let _ = env_logger::builder()
            .filter_level(LevelFilter::max())
            .is_test(true)
            .try_init();
    }

    /// Collects flushed output reports.
    #[derive(Default)]
    struct Recorder {
        pending: Vec<u8>,
        reports: Vec<Vec<u8>>,
        fail_after: Option<usize>,
    }

    impl ErrorType for Recorder {
        type Error = ErrorKind;
    }

    impl Write for Recorder {
        async fn write(&mut self, buf: &[u8]) -> core::result::Result<usize, ErrorKind> {
            if self.fail_after == Some(self.reports.len()) {
                return Err(ErrorKind::NotConnected);
            }

            self.pending.extend_from_slice(buf);

            Ok(buf.len())
        }

        async fn flush(&mut self) -> core::result::Result<(), ErrorKind> {
            self.reports.push(core::mem::take(&mut self.pending));

            Ok(())
        }
    }

    /// Counts pauses and runs a hook after each one.
    struct HookDelay<F> {
        pauses: Vec<u32>,
        hook: F,
    }

    impl<F: FnMut(usize)> HookDelay<F> {
        fn new(hook: F) -> Self {
            Self {
                pauses: Vec::new(),
                hook,
            }
        }
    }

    impl<F: FnMut(usize)> DelayNs for HookDelay<F> {
        async fn delay_ns(&mut self, ns: u32) {
            self.delay_ms(ns / 1_000_000).await;
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.pauses.push(ms);
            (self.hook)(self.pauses.len());
        }
    }

    fn spi_reply(word: [u8; 4]) -> InputReport {
        let mut data = vec![0x11, 0x03, 0x00, 0x00, 0x00];

        data.extend(word);
        InputReport::new(0, data)
    }

    #[test]
    fn request_bytes() {
        init_logger();

        assert_eq!(
            Request::new(RequestCode::SpiSendCommand, SubCommand::None, [0x03, 0, 1, 8]).to_bytes(),
            [0x11, 0x00, 0x03, 0x00, 0x01, 0x08],
            "request bytes should be correct"
        );
        assert_eq!(Request::simple(RequestCode::Echo).to_bytes(), [0x90, 0x00]);
    }

    #[tokio::test]
    async fn simple_requests() -> Result<(), ErrorKind> {
        init_logger();

        let mut intf = Interface::new(Recorder::default());

        intf.get_ports_state().await?;
        intf.play_beep().await?;
        intf.get_global_state().await?;
        intf.monitor_global_state().await?;
        intf.set_periodic_immo(false).await?;
        intf.set_periodic_immo(true).await?;
        intf.start_bootloader().await?;
        intf.echo().await?;
        intf.spi_get_registers().await?;
        intf.listen_bean(false).await?;
        intf.listen_bean(true).await?;
        intf.set_bean_debug(true).await?;
        intf.set_bean_debug(false).await?;

        assert_eq!(
            intf.port().reports,
            [
                [0x02, 0x00],
                [0x31, 0x00],
                [0x41, 0x00],
                [0x42, 0x00],
                [0x51, 0x00],
                [0x52, 0x00],
                [0x80, 0x00],
                [0x90, 0x00],
                [0x12, 0x00],
                [0x22, 0x00],
                [0x24, 0x00],
                [0x01, 0x01],
                [0x01, 0x02],
            ],
            "reports should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn set_port() -> Result<(), ErrorKind> {
        init_logger();

        let mut intf = Interface::new(Recorder::default());

        intf.set_port(OutputPort::ImmoOn, PortDrive::High).await?;
        intf.set_port(OutputPort::BeanOut, PortDrive::Low).await?;
        intf.set_port(OutputPort::Beeper, PortDrive::Release).await?;

        assert_eq!(
            intf.port().reports,
            [
                vec![0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00],
                vec![0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00],
            ],
            "release should not send a request"
        );

        Ok(())
    }

    #[tokio::test]
    async fn spi_commands() -> Result<(), ErrorKind> {
        init_logger();

        let mut intf = Interface::new(Recorder::default());

        intf.read_status_register().await?;
        intf.write_flash(&[0x01, 0x02, 0x03], &[0xaa, 0xbb]).await?;
        intf.erase_flash_sector(&[0x07, 0x5f]).await?;
        intf.set_write_enable(false).await?;

        assert_eq!(
            intf.port().reports,
            [
                vec![0x11, 0x00, 0x05, 0x00, 0x00, 0x00],
                vec![0x11, 0x00, 0x06, 0x00, 0x00, 0x00],
                vec![0x11, 0x00, 0x02, 0x01, 0x02, 0x03, 0xaa, 0xbb, 0x00, 0x00],
                vec![0x11, 0x00, 0x06, 0x00, 0x00, 0x00],
                vec![0x11, 0x00, 0xd7, 0x07, 0x50, 0x00],
                vec![0x11, 0x00, 0x04, 0x00, 0x00, 0x00],
            ],
            "reports should be correct"
        );
        assert_eq!(
            intf.spi_send_command(&[]).await,
            Err(Error::InvalidArgument),
            "empty command should be rejected"
        );

        Ok(())
    }

    #[tokio::test]
    async fn send_bean_command() -> Result<(), ErrorKind> {
        init_logger();

        let cmd = BeanCommand::from_hex("10 01 02 03").map_err(|_| Error::InvalidArgument)?;
        let mut intf = Interface::new(Recorder::default());

        intf.send_bean_command(&cmd, false).await?;
        intf.send_bean_command(&cmd, true).await?;

        assert_eq!(
            intf.port().reports,
            [
                [0x21, 0x00, 0x13, 0x01, 0x02, 0x03, 0x29],
                [0x23, 0x00, 0x13, 0x01, 0x02, 0x03, 0x29],
            ],
            "reports should be correct"
        );

        Ok(())
    }

    #[tokio::test]
    async fn send_bean_command_repeated() -> Result<(), ErrorKind> {
        init_logger();

        let cmd = BeanCommand::from_hex("10 fe 01").map_err(|_| Error::InvalidArgument)?;
        let mut intf = Interface::new(Recorder::default());
        let cancel = CancelToken::new();
        let mut delay = HookDelay::new(|_| {});
        let sent = intf
            .send_bean_command_repeated(&cmd, 3, 200, &cancel, &mut delay)
            .await?;

        assert_eq!(sent, 3, "send count should be correct");
        assert_eq!(delay.pauses, [200, 200, 200], "pauses should be correct");
        assert_eq!(intf.port().reports.len(), 3);

        let stop = cancel.clone();
        let mut delay = HookDelay::new(|n| {
            if n == 2 {
                stop.cancel();
            }
        });
        let sent = intf
            .send_bean_command_repeated(&cmd, 10, 200, &cancel, &mut delay)
            .await?;

        assert_eq!(sent, 2, "loop should stop after the cancelled pause");
        assert_eq!(intf.port().reports.len(), 5);

        Ok(())
    }

    #[tokio::test]
    async fn read_spi_log_range() -> Result<(), ErrorKind> {
        init_logger();

        let session = SpiLogSession::new(ReadRange::parse("000000", "000010"));
        let mut intf = Interface::new(Recorder::default());
        let mut delay = HookDelay::new(|_| {});
        let outcome = intf.read_spi_log(&session, &mut delay).await?;

        assert_eq!(outcome, ReadOutcome::Completed, "outcome should be correct");
        assert_eq!(
            intf.port().reports,
            [0x00, 0x04, 0x08, 0x0c, 0x10, 0x14].map(|addr| vec![0x11, 0x00, 0x03, 0x00, 0x00, addr]),
            "three read pairs should be sent"
        );
        assert_eq!(delay.pauses, [READ_DELAY_MS; 6], "every read should be paced");
        assert_eq!(session.current_addr(), 0x18, "address should be correct");
        assert!(session.is_finished(), "session should be finished");

        Ok(())
    }

    #[tokio::test]
    async fn read_spi_log_cancelled() -> Result<(), ErrorKind> {
        init_logger();

        let mut console = Console::default();
        let session = console.start_spi_log_read(ReadRange::parse("000000", "000010"));
        let mut intf = Interface::new(Recorder::default());
        let mut delay = HookDelay::new(|n| {
            console.dispatch(Duration::ZERO, &spi_reply([1, 2, 0, n as u8]));

            if n == 2 {
                console.cancel_spi_log_read();
            }
        });
        let outcome = intf.read_spi_log(&session, &mut delay).await?;

        drop(delay);

        assert_eq!(outcome, ReadOutcome::Cancelled, "outcome should be correct");
        assert_eq!(intf.port().reports.len(), 2, "one read pair should be sent");
        assert_eq!(console.spi_log().len(), 1, "one entry should be accumulated");
        assert!(!console.is_reading_spi_log());

        Ok(())
    }

    #[tokio::test]
    async fn read_spi_log_end_of_log() -> Result<(), ErrorKind> {
        init_logger();

        let mut console = Console::default();
        let session = console.start_spi_log_read(ReadRange::parse("000020", ""));
        let mut intf = Interface::new(Recorder::default());
        let mut delay = HookDelay::new(|n| {
            let word = if n <= 2 { [0, 0, 0, 0] } else { [0xff; 4] };

            console.dispatch(Duration::ZERO, &spi_reply(word));
        });
        let outcome = intf.read_spi_log(&session, &mut delay).await?;

        drop(delay);

        assert_eq!(outcome, ReadOutcome::EndOfLog, "outcome should be correct");
        assert_eq!(intf.port().reports.len(), 4, "two read pairs should be sent");
        assert_eq!(session.current_addr(), 0x30, "address should be correct");
        assert_eq!(console.spi_log().len(), 2);
        assert!(
            console.spi_log().latest().is_some_and(|e| e.is_end_of_log()),
            "newest entry should be the end marker"
        );

        Ok(())
    }

    #[tokio::test]
    async fn read_spi_log_invalid_range() -> Result<(), ErrorKind> {
        init_logger();

        let session = SpiLogSession::new(ReadRange::parse("000040", "000010"));
        let mut intf = Interface::new(Recorder::default());
        let mut delay = HookDelay::new(|_| {});
        let outcome = intf.read_spi_log(&session, &mut delay).await?;

        assert_eq!(outcome, ReadOutcome::InvalidRange, "outcome should be correct");
        assert!(intf.port().reports.is_empty(), "nothing should be sent");
        assert!(session.is_finished());

        Ok(())
    }

    #[tokio::test]
    async fn read_spi_log_transport_error() {
        init_logger();

        let session = SpiLogSession::new(ReadRange::parse("000000", ""));
        let mut intf = Interface::new(Recorder {
            fail_after: Some(3),
            ..Recorder::default()
        });
        let mut delay = HookDelay::new(|_| {});
        let outcome = intf.read_spi_log(&session, &mut delay).await;

        assert_eq!(
            outcome,
            Err(Error::Io(ErrorKind::NotConnected)),
            "error should be propagated"
        );
        assert!(session.is_finished(), "session should be finished");
        assert_eq!(session.current_addr(), 0x08, "address should be correct");
    }
}
