use anyhow::{Context, Result};
use beandbg::{
    CancelToken, Interface,
    bean::BeanCommand,
    embedded_hal_async::delay::DelayNs,
    hid::{self, Port, Reports},
    spi_log::{ReadOutcome, SpiLogSession},
    state::{OutputPort, PortDrive},
};
use log::debug;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task,
    time::{self, Duration},
};

// Delay between device connection attempts
const DEVICE_CONNECT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum Request {
    GetPortsState,
    SetPort(OutputPort, PortDrive),
    SpiCommand(Vec<u8>),
    SpiGetRegisters,
    ReadStatusRegister,
    SetWriteEnable(bool),
    WriteFlash {
        addr: Vec<u8>,
        data: Vec<u8>,
    },
    EraseFlashSector(Vec<u8>),
    SendBean {
        cmd: BeanCommand,
        record_ticks: bool,
    },
    RepeatBean {
        cmd: BeanCommand,
        repeat: u32,
        interval_ms: u32,
        cancel: CancelToken,
    },
    ListenBean(bool),
    SetBeanDebug(bool),
    PlayBeep,
    GetGlobalState,
    MonitorGlobalState,
    SetPeriodicImmo(bool),
    StartBootloader,
    Echo,
    ReadSpiLog(SpiLogSession),
}

#[derive(Debug)]
pub enum Response {
    DeviceConnected {
        name: String,
        reports: Reports,
        tx: UnboundedSender<Request>,
    },
    RequestFailed(String),
    BeanRepeated(u32),
    SpiLogRead(ReadOutcome),
}

/// Pauses on the tokio timer.
struct TokioDelay;

impl DelayNs for TokioDelay {
    async fn delay_ns(&mut self, ns: u32) {
        time::sleep(Duration::from_nanos(ns.into())).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        time::sleep(Duration::from_millis(ms.into())).await;
    }
}

pub struct Worker<'a> {
    intf: Interface<Port>,
    tx: &'a UnboundedSender<Response>,
}

impl Worker<'_> {
    pub fn start(vendor_id: u16, product_id: u16) -> UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();

        task::spawn_local(async move {
            loop {
                match hid::open(vendor_id, product_id) {
                    Ok((port, reports)) => {
                        let mut worker = Worker {
                            intf: Interface::new(port),
                            tx: &tx,
                        };

                        if let Err(err) = worker.run(reports).await {
                            debug!("Error running device worker: {err:#}");
                        }

                        worker.intf.port().close();
                    }
                    Err(err) => debug!("Error opening device: {err}"),
                }

                if tx.is_closed() {
                    break;
                }

                time::sleep(DEVICE_CONNECT_INTERVAL).await;
            }
        });

        rx
    }

    async fn run(&mut self, reports: Reports) -> Result<()> {
        let (dev_tx, mut dev_rx) = mpsc::unbounded_channel();
        let name = self
            .intf
            .port()
            .product()
            .unwrap_or_else(|| "unnamed device".to_string());

        self.tx.send(Response::DeviceConnected {
            name,
            reports,
            tx: dev_tx,
        })?;

        // Requests stop once the session drops its sender
        while let Some(req) = dev_rx.recv().await {
            debug!("Handling request: {req:x?}");

            // Transport failures are reported, the device stays open
            match self.handle_request(req).await {
                Ok(Some(resp)) => self.tx.send(resp)?,
                Ok(None) => {}
                Err(err) => self.tx.send(Response::RequestFailed(format!("{err:#}")))?,
            }
        }

        Ok(())
    }

    async fn handle_request(&mut self, req: Request) -> Result<Option<Response>> {
        let intf = &mut self.intf;

        match req {
            Request::GetPortsState => intf
                .get_ports_state()
                .await
                .context("Failed to get ports state")?,
            Request::SetPort(port, drive) => intf
                .set_port(port, drive)
                .await
                .with_context(|| format!("Failed to drive {port}"))?,
            Request::SpiCommand(cmd) => intf
                .spi_send_command(&cmd)
                .await
                .context("Failed to send SPI command")?,
            Request::SpiGetRegisters => intf
                .spi_get_registers()
                .await
                .context("Failed to get SPI registers")?,
            Request::ReadStatusRegister => intf
                .read_status_register()
                .await
                .context("Failed to read status register")?,
            Request::SetWriteEnable(enable) => intf
                .set_write_enable(enable)
                .await
                .context("Failed to toggle write enable")?,
            Request::WriteFlash { addr, data } => intf
                .write_flash(&addr, &data)
                .await
                .context("Failed to write flash")?,
            Request::EraseFlashSector(addr) => intf
                .erase_flash_sector(&addr)
                .await
                .context("Failed to erase flash sector")?,
            Request::SendBean { cmd, record_ticks } => intf
                .send_bean_command(&cmd, record_ticks)
                .await
                .context("Failed to send BEAN command")?,
            Request::RepeatBean {
                cmd,
                repeat,
                interval_ms,
                cancel,
            } => {
                let sent = intf
                    .send_bean_command_repeated(&cmd, repeat, interval_ms, &cancel, &mut TokioDelay)
                    .await
                    .context("Failed to repeat BEAN command")?;

                return Ok(Some(Response::BeanRepeated(sent)));
            }
            Request::ListenBean(record_ticks) => intf
                .listen_bean(record_ticks)
                .await
                .context("Failed to listen on BEAN")?,
            Request::SetBeanDebug(level) => intf
                .set_bean_debug(level)
                .await
                .context("Failed to set BEAN debug pin")?,
            Request::PlayBeep => intf.play_beep().await.context("Failed to play beep")?,
            Request::GetGlobalState => intf
                .get_global_state()
                .await
                .context("Failed to get global state")?,
            Request::MonitorGlobalState => intf
                .monitor_global_state()
                .await
                .context("Failed to monitor global state")?,
            Request::SetPeriodicImmo(enable) => intf
                .set_periodic_immo(enable)
                .await
                .context("Failed to set periodic immo")?,
            Request::StartBootloader => intf
                .start_bootloader()
                .await
                .context("Failed to start bootloader")?,
            Request::Echo => intf.echo().await.context("Failed to send echo")?,
            Request::ReadSpiLog(session) => {
                let outcome = intf
                    .read_spi_log(&session, &mut TokioDelay)
                    .await
                    .context("Failed to read flash log")?;

                return Ok(Some(Response::SpiLogRead(outcome)));
            }
        }

        Ok(None)
    }
}
