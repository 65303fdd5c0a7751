mod bar;
mod popup;
mod session;
mod table;
mod worker;

use crate::{
    session::{BeanRepeat, Session},
    worker::{Response, Worker},
};
use anyhow::{Context, Result};
use beandbg::{hid::Reports, report::InputReport};
use clap::Parser;
use futures::{StreamExt, future::FutureExt};
use ratatui::{
    DefaultTerminal,
    buffer::Buffer,
    crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyModifiers},
    layout::{Margin, Position, Rect},
    style::Stylize,
    text::Line,
    widgets::{Block, BorderType, Borders, Padding, StatefulWidget, Widget},
};
use std::future;
use tokio::{
    task::LocalSet,
    time::{self, Duration},
};

// Redraw interval for time-based indicators (echo, read progress)
const REDRAW_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// USB vendor ID in hex (e.g. 04d8)
    #[arg(long, value_parser = parse_hex_id, default_value = "0x04d8")]
    vendor_id: u16,
    /// USB product ID in hex (e.g. 0032)
    #[arg(long, value_parser = parse_hex_id, default_value = "0x0032")]
    product_id: u16,
    /// Write every received report to the log, not only unknown ones
    #[arg(long)]
    log_known_events: bool,
    /// Pause between repeated BEAN commands in milliseconds
    #[arg(long, default_value_t = 200)]
    bean_interval: u32,
    /// Number of sends of a repeated BEAN command
    #[arg(long, default_value_t = 10)]
    bean_repeat: u32,
}

fn parse_hex_id(arg: &str) -> Result<u16> {
    let digits = arg.trim_start_matches("0x").trim_start_matches("0X");

    u16::from_str_radix(digits, 16).with_context(|| format!("Invalid hex ID: {arg}"))
}

#[derive(Debug)]
struct App {
    session: Session,
    reports: Option<Reports>,
    should_exit: bool,
}

impl App {
    async fn run(&mut self, args: &Args, term: &mut DefaultTerminal) -> Result<()> {
        let mut events = EventStream::new();
        let mut rx = Worker::start(args.vendor_id, args.product_id);
        let mut redraw = time::interval(REDRAW_INTERVAL);

        while !self.should_exit {
            // Draw terminal widgets
            term.draw(|frame| {
                let mut cursor_pos = None;

                frame.render_stateful_widget(&*self, frame.area(), &mut cursor_pos);

                if let Some(pos) = cursor_pos {
                    frame.set_cursor_position(pos);
                }
            })?;

            // Handle terminal events, worker responses and device reports
            tokio::select! {
                Some(evt) = events.next().fuse() => self
                    .handle_event(&evt?).context("Failed to handle event")?,
                Some(resp) = rx.recv() => self.handle_worker_response(resp),
                report = next_report(self.reports.as_mut()) => self.handle_report(report),
                _ = redraw.tick() => {}
            }
        }

        Ok(())
    }

    fn handle_event(&mut self, event: &Event) -> Result<()> {
        if self.session.handle_event(event)? {
            // Event was handled by session
            return Ok(());
        }

        if let Some(KeyEvent {
            code, modifiers, ..
        }) = event.as_key_press_event()
        {
            match code {
                KeyCode::Char('q') => self.should_exit = true,
                KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                    self.should_exit = true;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn handle_worker_response(&mut self, resp: Response) {
        match resp {
            Response::DeviceConnected { name, reports, tx } => {
                self.reports = Some(reports);
                self.session.connect(name, tx);
            }
            _ => self.session.handle_worker_response(resp),
        }
    }

    fn handle_report(&mut self, report: Option<InputReport>) {
        if let Some(report) = report {
            self.session.dispatch(&report);
        } else {
            // Reader stopped, dropping the sender lets the worker reconnect
            self.reports = None;
            self.session.disconnect();
        }
    }
}

async fn next_report(reports: Option<&mut Reports>) -> Option<InputReport> {
    match reports {
        Some(reports) => reports.recv().await,
        None => future::pending().await,
    }
}

impl StatefulWidget for &App {
    type State = Option<Position>;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        let area = area.inner(Margin::new(1, 0));
        let block = Block::bordered()
            .borders(Borders::TOP)
            .border_type(BorderType::Double)
            .padding(Padding::top(1))
            .title(
                Line::from(vec![
                    " ".into(),
                    "BEAN Debug Console ".into(),
                    env!("CARGO_PKG_VERSION").into(),
                    " ".into(),
                ])
                .bold()
                .centered(),
            );
        let inner = block.inner(area);

        // Session might set cursor position state
        self.session.render(inner, buf, state);
        block.render(area, buf);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut app = App {
        session: Session::new(
            args.log_known_events,
            BeanRepeat {
                count: args.bean_repeat,
                interval_ms: args.bean_interval,
            },
        ),
        reports: None,
        should_exit: false,
    };
    let mut term = ratatui::init();
    let res = LocalSet::new()
        .run_until(async move { app.run(&args, &mut term).await })
        .await;

    ratatui::restore();

    res
}
