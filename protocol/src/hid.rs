//! Native USB HID support for [`Interface`](crate::Interface).
//!
//! Uses the [`hidapi`](https://crates.io/crates/hidapi) crate. Input reports
//! are read on a background thread and delivered through a tokio channel.

extern crate std;

use crate::{Error, hex, report::InputReport};
use core::fmt::{Display, Formatter};
use embedded_io_async::{ErrorKind, ErrorType, Write};
use hidapi::{HidApi, HidDevice, HidError};
use log::{debug, warn};
use std::{
    string::String,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
    vec::Vec,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Vendor ID of the debug board.
pub const VENDOR_ID: u16 = 0x04d8;

/// Product ID of the debug board.
pub const PRODUCT_ID: u16 = 0x0032;

/// Size of one output report, excluding the report ID.
pub const REPORT_LEN: usize = 64;

/// Pause of the reader thread after a poll that returned nothing.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Stream of input reports read from the device.
///
/// Yields `None` once the device was closed or failed.
pub type Reports = UnboundedReceiver<InputReport>;

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
#[derive(Debug)]
pub struct PortError(HidError);

impl Display for PortError {
    fn fmt(&self, f: &mut Formatter) -> core::fmt::Result {
        write!(f, "HID error: {}", self.0)
    }
}

impl core::error::Error for PortError {}

impl embedded_io_async::Error for PortError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

type Device = Arc<Mutex<Option<HidDevice>>>;

/// Non-blocking source of input reports.
trait ReportSource {
    /// Reads one pending report into `buf`, returning zero if none is queued.
    fn read_now(&self, buf: &mut [u8]) -> Result<usize, HidError>;
}

impl ReportSource for HidDevice {
    fn read_now(&self, buf: &mut [u8]) -> Result<usize, HidError> {
        self.read_timeout(buf, 0)
    }
}

fn lock<D>(device: &Mutex<Option<D>>) -> MutexGuard<'_, Option<D>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// HID port implementing [`Write`].
///
/// Bytes written are collected until [`Write::flush`], which sends them as one
/// zero-padded output report. Writes to a closed port are dropped silently.
pub struct Port {
    device: Device,
    pending: Vec<u8>,
}

impl Port {
    /// Returns the product string reported by the device.
    #[must_use]
    pub fn product(&self) -> Option<String> {
        lock(&self.device)
            .as_ref()
            .and_then(|dev| dev.get_product_string().ok().flatten())
    }

    /// Closes the device. The report stream ends shortly after.
    pub fn close(&self) {
        if lock(&self.device).take().is_some() {
            debug!("Closed HID device");
        }
    }
}

impl ErrorType for Port {
    type Error = PortError;
}

impl Write for Port {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.pending.extend_from_slice(buf);

        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        let data = hex::pad_or_truncate(core::mem::take(&mut self.pending), REPORT_LEN);
        let guard = lock(&self.device);
        let Some(dev) = guard.as_ref() else {
            return Ok(());
        };
        let mut report = Vec::with_capacity(1 + REPORT_LEN);

        // Unnumbered reports are prefixed with ID 0
        report.push(0x00);
        report.extend(data);
        dev.write(&report).map_err(PortError)?;

        Ok(())
    }
}

/// Opens the first HID device with the given IDs.
///
/// Returns a [`Port`] that can be passed to [`Interface::new`](crate::Interface::new)
/// and the stream of [`Reports`] to hand to a [`Console`](crate::console::Console).
pub fn open(vendor_id: u16, product_id: u16) -> Result<(Port, Reports), Error<PortError>> {
    let api = HidApi::new().map_err(PortError)?;
    let device = api.open(vendor_id, product_id).map_err(PortError)?;

    debug!("Opened HID device {vendor_id:04x}:{product_id:04x}");

    let device = Arc::new(Mutex::new(Some(device)));
    let (tx, rx) = mpsc::unbounded_channel();
    let reader = Arc::clone(&device);

    thread::spawn(move || read_reports(&reader, &tx));

    Ok((
        Port {
            device,
            pending: Vec::new(),
        },
        rx,
    ))
}

fn read_reports<D: ReportSource>(device: &Mutex<Option<D>>, tx: &UnboundedSender<InputReport>) {
    let mut buf = [0x00; REPORT_LEN];

    loop {
        // Lock is only held for the non-blocking read, never while waiting
        let read = {
            let guard = lock(device);
            let Some(dev) = guard.as_ref() else {
                break;
            };

            dev.read_now(&mut buf)
        };

        match read {
            Ok(0) => thread::sleep(POLL_INTERVAL),
            Ok(len) => {
                if tx.send(InputReport::new(0, &buf[..len])).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!("Failed to read input report: {err}");
                lock(device).take();
                break;
            }
        }
    }

    debug!("Input report reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::VecDeque, vec};

    /// Device replaying queued reads, then reporting nothing.
    struct Replay(Mutex<VecDeque<Result<Vec<u8>, HidError>>>);

    impl Replay {
        fn new(reads: impl IntoIterator<Item = Result<Vec<u8>, HidError>>) -> Self {
            Self(Mutex::new(reads.into_iter().collect()))
        }
    }

    impl ReportSource for Replay {
        fn read_now(&self, buf: &mut [u8]) -> Result<usize, HidError> {
            match self.0.lock().unwrap().pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);

                    Ok(data.len())
                }
                Some(Err(err)) => Err(err),
                None => Ok(0),
            }
        }
    }

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn spawn_reader(device: &Arc<Mutex<Option<Replay>>>) -> (thread::JoinHandle<()>, Reports) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = Arc::clone(device);

        (thread::spawn(move || read_reports(&reader, &tx)), rx)
    }

    #[test]
    fn close_while_idle() {
        init_logger();

        let device = Arc::new(Mutex::new(Some(Replay::new([Ok(vec![0x90])]))));
        let (reader, mut rx) = spawn_reader(&device);

        assert_eq!(
            rx.blocking_recv().map(|report| report.data),
            Some(vec![0x90]),
            "report should be correct"
        );

        // Writers and close contend for the same lock as the idle reader
        for _ in 0..10 {
            assert!(lock(&device).is_some(), "device should still be open");
            thread::sleep(POLL_INTERVAL);
        }

        lock(&device).take();

        assert!(rx.blocking_recv().is_none(), "stream should end after close");
        assert!(reader.join().is_ok(), "reader should stop");
    }

    #[test]
    fn read_error_closes_device() {
        init_logger();

        let err = HidError::HidApiError {
            message: "device disconnected".into(),
        };
        let device = Arc::new(Mutex::new(Some(Replay::new([Ok(vec![0x23, 0x01]), Err(err)]))));
        let (reader, mut rx) = spawn_reader(&device);

        assert_eq!(rx.blocking_recv().map(|report| report.data), Some(vec![0x23, 0x01]));
        assert!(rx.blocking_recv().is_none(), "stream should end after an error");
        assert!(reader.join().is_ok(), "reader should stop");
        assert!(lock(&device).is_none(), "device should be closed");
    }
}
