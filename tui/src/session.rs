use crate::{
    bar::{Action, CommandBar, Tab},
    popup::{Popup, State},
    table::{ListPanel, PropertyTable},
    worker::{Request, Response},
};
use anyhow::Result;
use beandbg::{
    CancelToken,
    bean::BeanCommand,
    console::{Console, LogLevel},
    hex,
    report::InputReport,
    spi,
    spi_log::{ReadOutcome, ReadRange},
    state::StatusRegister,
};
use log::debug;
use ratatui::{
    buffer::Buffer,
    crossterm::event::{Event, KeyCode, KeyEvent},
    layout::{Constraint, Layout, Position, Rect},
    style::Stylize,
    text::{Line, Span},
    widgets::{Block, Borders, Padding, StatefulWidget, Widget},
};
use std::time::{Duration, Instant};
use strum::IntoEnumIterator;
use tokio::sync::mpsc::UnboundedSender;
use tui_input::Input;

/// Operator-adjustable settings of the BEAN repeat loop.
#[derive(Copy, Clone, Debug)]
pub struct BeanRepeat {
    pub count: u32,
    pub interval_ms: u32,
}

#[derive(Debug)]
struct Link {
    name: String,
    tx: UnboundedSender<Request>,
}

#[derive(Debug)]
pub struct Session {
    console: Console,
    started: Instant,
    link: Option<Link>,
    tab: Tab,
    bar: CommandBar,
    popup: Option<Popup>,
    record_ticks: bool,
    bean_repeat: BeanRepeat,
    repeating: Option<CancelToken>,
}

impl Session {
    pub fn new(log_known_events: bool, bean_repeat: BeanRepeat) -> Self {
        let tab = Tab::Ports;

        Self {
            console: Console::new(log_known_events),
            started: Instant::now(),
            link: None,
            tab,
            bar: CommandBar::new(tab.actions()),
            popup: None,
            record_ticks: false,
            bean_repeat,
            repeating: None,
        }
    }

    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn connect(&mut self, name: String, tx: UnboundedSender<Request>) {
        self.console.log_connected(self.now(), &name);
        self.link = Some(Link { name, tx });
    }

    pub fn disconnect(&mut self) {
        if let Some(token) = self.repeating.take() {
            token.cancel();
        }

        self.link = None;
        self.console.log_disconnected(self.now());
    }

    pub fn dispatch(&mut self, report: &InputReport) {
        self.console.dispatch(self.now(), report);
    }

    pub fn handle_event(&mut self, event: &Event) -> Result<bool> {
        if let Some(popup) = &mut self.popup {
            match popup.handle_event(event) {
                State::Dismissed => self.popup = None,
                State::Confirmed => {
                    let popup = self.popup.take();

                    if let Some(Popup::TriggerAction(action, input)) = popup {
                        self.trigger(action, input.value())?;
                    }
                }
                State::Open => {}
            }

            Ok(true)
        } else if let Some(action) = self.bar.event_to_action(event) {
            self.open_action(action)?;

            Ok(true)
        } else if let Some(KeyEvent { code, .. }) = event.as_key_press_event() {
            match code {
                KeyCode::Tab => {
                    self.tab = self.tab.next();
                    self.bar = CommandBar::new(self.tab.actions());
                }
                KeyCode::Char('l') => self.console.toggle_log_known_events(),
                KeyCode::Char('x') => self.console.clear_logs(),
                // Event wasn't handled
                _ => return Ok(false),
            }

            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn handle_worker_response(&mut self, resp: Response) {
        let now = self.now();

        match resp {
            Response::DeviceConnected { .. } => {}
            Response::RequestFailed(err) => self.console.log_transport_error(now, &err),
            Response::BeanRepeated(sent) => {
                self.repeating = None;
                self.console
                    .log(now, LogLevel::Info, format!("Sent BEAN command {sent} times"));
            }
            Response::SpiLogRead(outcome) => {
                let (level, msg) = match outcome {
                    ReadOutcome::Completed => (LogLevel::Info, "Flash log read completed"),
                    ReadOutcome::EndOfLog => (LogLevel::Info, "Reached end of flash log"),
                    ReadOutcome::Cancelled => (LogLevel::Info, "Flash log read cancelled"),
                    ReadOutcome::InvalidRange => (LogLevel::Warning, "Invalid flash log range"),
                };

                self.console.log(now, level, msg);
            }
        }
    }

    fn open_action(&mut self, action: Action) -> Result<()> {
        // Running loops are stopped by their own key
        if action == Action::RepeatBean
            && let Some(token) = self.repeating.take()
        {
            token.cancel();

            return Ok(());
        }

        // A cancelled read that is still winding down can be replaced right away
        if action == Action::ReadSpiLog
            && self.is_reading_spi_log()
            && !self.console.is_spi_log_read_cancelled()
        {
            self.console.cancel_spi_log_read();

            return Ok(());
        }

        if action.prompt().is_some() {
            self.popup = Some(Popup::TriggerAction(action, Input::default()));

            Ok(())
        } else {
            self.trigger(action, "")
        }
    }

    fn trigger(&mut self, action: Action, input: &str) -> Result<()> {
        let bytes = || hex::parse_bytes(&hex::sanitize(input));

        match action {
            Action::GetPortsState => self.send(Request::GetPortsState)?,
            Action::DrivePort(port) => {
                self.send(Request::SetPort(port, Action::port_drive(input)))?;
            }
            Action::PlayBeep => self.send(Request::PlayBeep)?,
            Action::GetGlobalState => self.send(Request::GetGlobalState)?,
            Action::MonitorGlobalState => self.send(Request::MonitorGlobalState)?,
            Action::PeriodicImmo => match input.trim() {
                "0" => self.send(Request::SetPeriodicImmo(false))?,
                "1" => self.send(Request::SetPeriodicImmo(true))?,
                _ => self.popup = Some(Popup::InvalidInput(action, "expected 0 or 1".into())),
            },
            Action::Echo => self.send(Request::Echo)?,
            Action::StartBootloader => self.send(Request::StartBootloader)?,
            Action::ReadStatusRegister => self.send(Request::ReadStatusRegister)?,
            Action::ToggleWriteEnable => {
                let enabled = self
                    .console
                    .status_register()
                    .is_some_and(|reg| reg.contains(StatusRegister::Wen));

                self.send(Request::SetWriteEnable(!enabled))?;
            }
            Action::SpiRead => {
                self.send(Request::SpiCommand(spi::read_from_bytes(&bytes())))?;
            }
            Action::SpiWrite => {
                let (addr, data) = input.split_once(',').unwrap_or((input, ""));

                self.send(Request::WriteFlash {
                    addr: hex::parse_bytes(&hex::sanitize(addr)),
                    data: hex::parse_bytes(&hex::sanitize(data)),
                })?;
            }
            Action::SpiErase => self.send(Request::EraseFlashSector(bytes()))?,
            Action::SpiRaw => self.send(Request::SpiCommand(spi::raw(&bytes())))?,
            Action::SpiGetRegisters => self.send(Request::SpiGetRegisters)?,
            Action::SendBean => match BeanCommand::from_hex(input) {
                Ok(cmd) => self.send(Request::SendBean {
                    cmd,
                    record_ticks: self.record_ticks,
                })?,
                Err(err) => self.popup = Some(Popup::InvalidInput(action, err.to_string())),
            },
            Action::RepeatBean => match BeanCommand::from_hex(input) {
                Ok(cmd) => {
                    let cancel = CancelToken::new();

                    self.send(Request::RepeatBean {
                        cmd,
                        repeat: self.bean_repeat.count,
                        interval_ms: self.bean_repeat.interval_ms,
                        cancel: cancel.clone(),
                    })?;

                    if self.link.is_some() {
                        self.repeating = Some(cancel);
                    }
                }
                Err(err) => self.popup = Some(Popup::InvalidInput(action, err.to_string())),
            },
            Action::ListenBean => self.send(Request::ListenBean(self.record_ticks))?,
            Action::ToggleTicks => self.record_ticks = !self.record_ticks,
            Action::BeanDebug(level) => self.send(Request::SetBeanDebug(level))?,
            Action::ClearBeanLog => self.console.clear_bean_log(),
            Action::ReadSpiLog => {
                let (start, end) = input.split_once(',').unwrap_or((input, ""));
                let range = ReadRange::parse(start, end);

                if !range.is_valid() {
                    self.popup = Some(Popup::InvalidInput(
                        action,
                        "end address is before start address".into(),
                    ));
                } else if self.link.is_some() {
                    let session = self.console.start_spi_log_read(range);

                    self.send(Request::ReadSpiLog(session))?;
                }
            }
            Action::ClearSpiLog => self.console.clear_spi_log(),
        }

        Ok(())
    }

    /// Forwards a request to the worker. Requests without a device are dropped.
    fn send(&self, req: Request) -> Result<()> {
        if let Some(link) = &self.link {
            link.tx.send(req)?;
        } else {
            debug!("Dropping request without device: {req:x?}");
        }

        Ok(())
    }

    fn is_reading_spi_log(&self) -> bool {
        // Queued reads are dropped with the worker on disconnect
        self.link.is_some() && self.console.is_reading_spi_log()
    }

    fn render_tab(&self, area: Rect, buf: &mut Buffer) {
        let [left, right] = Layout::horizontal([Constraint::Fill(1); 2])
            .spacing(2)
            .areas(area);

        match self.tab {
            Tab::Ports => {
                PropertyTable::ports(self.console.ports()).render(left, buf);
                PropertyTable::global_state(self.console.global_state()).render(right, buf);
            }
            Tab::Spi => {
                PropertyTable::status_register(self.console.status_register()).render(left, buf);
                PropertyTable::global_state(self.console.global_state()).render(right, buf);
            }
            Tab::Bean => {
                let [top, bottom] =
                    Layout::vertical([Constraint::Length(6), Constraint::Fill(1)]).areas(area);

                PropertyTable::bean_settings(
                    self.record_ticks,
                    self.bean_repeat.count,
                    self.bean_repeat.interval_ms,
                    self.repeating.is_some(),
                )
                .render(top, buf);
                ListPanel::bean_log(self.console.bean_log(), bottom.height.into())
                    .render(bottom, buf);
            }
            Tab::SpiLog => {
                let [top, bottom] =
                    Layout::vertical([Constraint::Length(6), Constraint::Fill(1)]).areas(area);
                let reading = self.is_reading_spi_log();
                let progress = if reading {
                    self.console.spi_log_progress()
                } else {
                    0.0
                };

                PropertyTable::spi_log_progress(reading, progress, self.console.spi_log().len())
                    .render(top, buf);
                ListPanel::spi_log(self.console.spi_log(), bottom.height.into())
                    .render(bottom, buf);
            }
        }
    }

    fn render_tabs(&self, area: Rect, buf: &mut Buffer) {
        let spans = Tab::iter()
            .flat_map(|tab| {
                let name = format!(" {tab} ");
                let name = if tab == self.tab {
                    name.bold().reversed()
                } else {
                    Span::raw(name)
                };

                [name, " ".into()]
            })
            .chain([" <Tab> ".bold(), "switch, ".into(), "<l> ".bold(), "all events, ".into()])
            .chain(["<x> ".bold(), "clear log".into()])
            .collect::<Vec<_>>();

        Line::from(spans).render(area, buf);
    }

    fn render_bar(&self, area: Rect, buf: &mut Buffer) {
        let status = match &self.link {
            Some(link) => {
                let echo = if self.console.is_echo_received(self.now()) {
                    "●".green()
                } else {
                    "○".dark_gray()
                };

                Line::from(vec![" ".into(), link.name.clone().into(), " ".into(), echo, " ".into()])
            }
            None => Line::from(" Waiting for device connection... ".yellow()),
        };
        let block = Block::bordered()
            .borders(Borders::TOP)
            .padding(Padding::proportional(1))
            .title("Actions ".bold())
            .title(status.bold().right_aligned());

        self.bar.render(block.inner(area), buf);
        block.render(area, buf);
    }
}

impl StatefulWidget for &Session {
    type State = Option<Position>;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        let [tabs, top, bottom] = Layout::vertical([
            Constraint::Length(1),
            Constraint::Fill(1),
            Constraint::Length(4),
        ])
        .spacing(1)
        .areas(area);
        let [content, log] = Layout::horizontal([Constraint::Fill(3), Constraint::Fill(2)])
            .spacing(2)
            .areas(top);

        self.render_tabs(tabs, buf);
        self.render_tab(content, buf);
        ListPanel::operator_log(
            self.console.logs(),
            self.console.log_known_events(),
            log.height.into(),
        )
        .render(log, buf);
        self.render_bar(bottom, buf);

        if let Some(popup) = &self.popup {
            // Pass cursor position state to popup
            popup.render(top, buf, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;
    use tokio::sync::mpsc;

    fn key(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(sess: &mut Session, text: &str) -> Result<()> {
        for c in text.chars() {
            sess.handle_event(&key(KeyCode::Char(c)))?;
        }

        sess.handle_event(&key(KeyCode::Enter))?;

        Ok(())
    }

    fn session() -> (Session, mpsc::UnboundedReceiver<Request>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sess = Session::new(
            false,
            BeanRepeat {
                count: 10,
                interval_ms: 200,
            },
        );

        sess.connect("Debug board".into(), tx);

        (sess, rx)
    }

    #[test]
    fn send_bean_from_prompt() -> Result<()> {
        let (mut sess, mut rx) = session();

        // BEAN tab
        sess.handle_event(&key(KeyCode::Tab))?;
        sess.handle_event(&key(KeyCode::Tab))?;
        sess.handle_event(&key(KeyCode::F(1)))?;
        type_text(&mut sess, "10 01 02 03")?;

        match rx.try_recv()? {
            Request::SendBean { cmd, record_ticks } => {
                assert_eq!(cmd.as_bytes(), [0x13, 0x01, 0x02, 0x03, 0x29]);
                assert!(!record_ticks, "tick recording should be off");
            }
            req => panic!("unexpected request: {req:?}"),
        }

        Ok(())
    }

    #[test]
    fn repeat_key_cancels_loop() -> Result<()> {
        let (mut sess, mut rx) = session();

        sess.open_action(Action::RepeatBean)?;
        type_text(&mut sess, "10 01 02 03")?;

        let Request::RepeatBean { cancel, repeat, .. } = rx.try_recv()? else {
            panic!("repeat request should be sent");
        };

        assert_eq!(repeat, 10, "repeat count should be correct");

        sess.open_action(Action::RepeatBean)?;

        assert!(cancel.is_cancelled(), "second press should cancel the loop");
        assert!(sess.popup.is_none(), "no prompt should be opened");

        Ok(())
    }

    #[test]
    fn invalid_bean_input() -> Result<()> {
        let (mut sess, rx) = session();

        sess.open_action(Action::SendBean)?;
        type_text(&mut sess, "zz")?;

        assert!(matches!(sess.popup, Some(Popup::InvalidInput(..))));
        assert!(rx.is_empty(), "nothing should be sent");

        Ok(())
    }

    #[test]
    fn spi_log_read_toggle() -> Result<()> {
        let (mut sess, mut rx) = session();

        sess.open_action(Action::ReadSpiLog)?;
        type_text(&mut sess, "000000, 000040")?;

        let Request::ReadSpiLog(log) = rx.try_recv()? else {
            panic!("read request should be sent");
        };

        assert_eq!(log.range(), ReadRange::new(0, Some(0x40)));
        assert!(sess.is_reading_spi_log());

        sess.open_action(Action::ReadSpiLog)?;

        assert!(log.is_cancelled(), "second press should cancel the read");

        Ok(())
    }

    #[test]
    fn spi_log_read_restart_while_cancelling() -> Result<()> {
        let (mut sess, mut rx) = session();

        sess.open_action(Action::ReadSpiLog)?;
        type_text(&mut sess, "000000")?;

        let Request::ReadSpiLog(first) = rx.try_recv()? else {
            panic!("read request should be sent");
        };

        sess.open_action(Action::ReadSpiLog)?;

        assert!(first.is_cancelled(), "second press should cancel the read");
        assert!(sess.is_reading_spi_log(), "cancelled loop should still be running");

        // Third press while the worker has not stopped the first loop yet
        sess.open_action(Action::ReadSpiLog)?;

        assert!(
            matches!(sess.popup, Some(Popup::TriggerAction(Action::ReadSpiLog, _))),
            "read prompt should be opened"
        );

        type_text(&mut sess, "000100, 000200")?;

        let Request::ReadSpiLog(second) = rx.try_recv()? else {
            panic!("new read request should be sent");
        };

        assert_eq!(second.range(), ReadRange::new(0x100, Some(0x200)), "range should be correct");
        assert!(!second.is_cancelled(), "new read should be running");

        Ok(())
    }

    #[test]
    fn requests_dropped_while_disconnected() -> Result<()> {
        let (mut sess, mut rx) = session();

        sess.disconnect();
        sess.open_action(Action::GetPortsState)?;

        assert!(rx.try_recv().is_err(), "nothing should be sent");
        assert_eq!(
            sess.console.logs().next().map(|entry| entry.message.to_string()),
            Some("Disconnected".into()),
            "latest log entry should be correct"
        );

        Ok(())
    }

    #[test]
    fn toggle_write_enable() -> Result<()> {
        let (mut sess, mut rx) = session();

        sess.open_action(Action::ToggleWriteEnable)?;

        assert!(matches!(rx.try_recv()?, Request::SetWriteEnable(true)));

        Ok(())
    }
}
