use beandbg::{
    bean::CommandLog,
    console::{LogEntry, LogLevel, LogMessage},
    spi_log::SpiLog,
    state::{Direction, GlobalState, ImmoInputState, ImmoState, Port, PortStates, StatusRegister},
};
use ratatui::{
    buffer::Buffer,
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Stylize},
    symbols::line,
    text::{Line, Span},
    widgets::{Block, BorderType, LineGauge, Padding, Paragraph, Widget, Wrap},
};
use strum::IntoEnumIterator;

#[derive(Debug)]
pub enum Cell {
    Text(Line<'static>),
    Gauge(String, f64),
}

impl From<String> for Cell {
    fn from(txt: String) -> Self {
        Self::Text(txt.into())
    }
}

#[derive(Debug)]
pub struct PropertyTable {
    title: &'static str,
    color: Color,
    rows: Vec<(String, Cell)>,
}

impl PropertyTable {
    pub fn ports(states: &PortStates) -> Self {
        let rows = Port::iter()
            .map(|port| {
                let name = match port.label() {
                    Some(label) => format!("{port} {label}"),
                    None => port.to_string(),
                };
                let level = match states.get(port) {
                    Some(true) => "1".green(),
                    Some(false) => "0".red(),
                    None => "?".dark_gray(),
                };
                let dir = match port.direction() {
                    Direction::Input => " in",
                    Direction::Output => " out",
                    Direction::Peripheral => "",
                };

                (name, Cell::Text(Line::from(vec![level, dir.dark_gray()])))
            })
            .collect();

        Self {
            title: "Ports",
            color: Color::Green,
            rows,
        }
    }

    pub fn status_register(reg: Option<StatusRegister>) -> Self {
        let rows: Vec<(String, Cell)> = reg.map_or_else(Vec::new, |reg| {
            let mut rows: Vec<(String, Cell)> =
                vec![("Value".to_string(), format!("{:02X}", reg.bits()).into())];

            rows.extend(StatusRegister::NAMED.iter().map(|(name, bit)| {
                let val = if reg.contains(*bit) { "1" } else { "0" };

                ((*name).to_string(), val.to_string().into())
            }));

            rows
        });

        Self {
            title: "Status Register",
            color: Color::Magenta,
            rows,
        }
    }

    pub fn global_state(state: Option<&GlobalState>) -> Self {
        let rows: Vec<(String, Cell)> = state.map_or_else(Vec::new, |st| {
            let (immo_raw, immo_input_raw) = st.raw_immo_states();
            let immo = match st.immo_state {
                ImmoState::Unknown => format!("{} ({immo_raw})", st.immo_state),
                _ => st.immo_state.to_string(),
            };
            let immo_input = match st.immo_input_state {
                ImmoInputState::Unknown => format!("{} ({immo_input_raw})", st.immo_input_state),
                _ => st.immo_input_state.to_string(),
            };

            vec![
                ("SPI address".to_string(), format!("{:06X}", st.spi_addr).into()),
                ("SPI task".to_string(), format!("{:02X}", st.spi_task).into()),
                ("Initial tasks".to_string(), format!("{:02X}", st.initial_tasks).into()),
                ("Inputs".to_string(), st.inputs.to_string().into()),
                ("Button test".to_string(), st.button_test.to_string().into()),
                ("Capot test".to_string(), st.capot_test.to_string().into()),
                ("ImmoSence test".to_string(), st.immo_sense_test.to_string().into()),
                ("ASR+12 test".to_string(), st.asr12v_test.to_string().into()),
                (
                    "Uptime".to_string(),
                    format!(
                        "{}:{:02}:{:02}.{:02}",
                        st.hour,
                        st.min,
                        st.ms10 / 100,
                        st.ms10 % 100
                    )
                    .into(),
                ),
                ("Immo state".to_string(), immo.into()),
                ("Immo input".to_string(), immo_input.into()),
            ]
        });

        Self {
            title: "Global State",
            color: Color::Blue,
            rows,
        }
    }

    pub fn spi_log_progress(reading: bool, progress: f64, entries: usize) -> Self {
        let label = if reading {
            format!("{:.0} %", progress * 100.0)
        } else {
            "idle".to_string()
        };

        Self {
            title: "Flash Log Read",
            color: Color::Cyan,
            rows: vec![
                ("Progress".to_string(), Cell::Gauge(label, progress)),
                ("Entries".to_string(), entries.to_string().into()),
            ],
        }
    }

    pub fn bean_settings(record_ticks: bool, repeat: u32, interval_ms: u32, repeating: bool) -> Self {
        let ticks = if record_ticks { "on" } else { "off" };
        let repeat = if repeating {
            Line::from(vec![format!("{repeat} x {interval_ms} ms ").into(), "running".green()])
        } else {
            format!("{repeat} x {interval_ms} ms").into()
        };

        Self {
            title: "BEAN Settings",
            color: Color::Yellow,
            rows: vec![
                ("Record ticks".to_string(), ticks.to_string().into()),
                ("Repeat".to_string(), Cell::Text(repeat)),
            ],
        }
    }

    fn render_rows(&self, area: Rect, buf: &mut Buffer) {
        let layout = Layout::horizontal([Constraint::Fill(1); 2]);
        let mut offset = 0;

        for ((name, cell), row) in self.rows.iter().zip(area.rows()) {
            let [mut left, mut right] = layout.areas(row);

            left.y += offset;
            right.y += offset;

            // Abort if row exceeds table bounds
            if Self::row_height_out_of_bounds(right, area) {
                break;
            }

            match cell {
                Cell::Text(txt) => {
                    let par = Paragraph::new(txt.clone()).wrap(Wrap { trim: false });

                    right.height = par.line_count(right.width) as u16;

                    // Abort if wrapped paragraph exceeds table bounds
                    if Self::row_height_out_of_bounds(right, area) {
                        break;
                    }

                    par.render(right, buf);
                }
                Cell::Gauge(label, ratio) => LineGauge::default()
                    .filled_symbol(line::THICK_HORIZONTAL)
                    .filled_style(self.color)
                    .ratio(ratio.clamp(0.0, 1.0))
                    .label(label.as_str())
                    .render(right, buf),
            }

            name.as_str().bold().render(left, buf);
            offset += right.height.saturating_sub(1);
        }
    }

    fn row_height_out_of_bounds(row: Rect, area: Rect) -> bool {
        row.y + row.height > area.y + area.height
    }
}

impl Widget for &PropertyTable {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = titled_block(self.title, self.color);
        let inner = block.inner(area);

        if self.rows.is_empty() {
            "Nothing received yet.".bold().render(inner, buf);
        } else {
            self.render_rows(inner, buf);
        }

        block.render(area, buf);
    }
}

/// Scrolling list with the most relevant line first.
///
/// Only the first `limit` entries are formatted, enough to fill the panel.
#[derive(Debug)]
pub struct ListPanel {
    title: &'static str,
    color: Color,
    lines: Vec<Line<'static>>,
}

impl ListPanel {
    pub fn bean_log(log: &CommandLog, limit: usize) -> Self {
        Self {
            title: "BEAN Commands",
            color: Color::Yellow,
            lines: log
                .iter()
                .take(limit)
                .map(|(_, cmd)| cmd.to_string().into())
                .collect(),
        }
    }

    pub fn spi_log(log: &SpiLog, limit: usize) -> Self {
        Self {
            title: "Flash Log",
            color: Color::Cyan,
            lines: log
                .iter()
                .take(limit)
                .map(|entry| {
                    if entry.is_end_of_log() {
                        entry.to_string().dark_gray().into()
                    } else {
                        entry.to_string().into()
                    }
                })
                .collect(),
        }
    }

    pub fn operator_log<'a>(
        entries: impl Iterator<Item = &'a LogEntry>,
        log_known_events: bool,
        limit: usize,
    ) -> Self {
        let title = if log_known_events {
            "Log (all events)"
        } else {
            "Log"
        };

        Self {
            title,
            color: Color::Gray,
            lines: entries.take(limit).map(log_line).collect(),
        }
    }
}

fn log_line(entry: &LogEntry) -> Line<'static> {
    let mut spans = vec![
        format!(
            "{:>5}.{:03} ",
            entry.at.as_secs(),
            entry.at.subsec_millis()
        )
        .dark_gray(),
    ];

    match &entry.message {
        LogMessage::Text(txt) => spans.push(match entry.level {
            LogLevel::Info => Span::raw(txt.clone()),
            LogLevel::Warning => txt.clone().yellow(),
            LogLevel::Error => txt.clone().red(),
        }),
        LogMessage::Ticks(ticks) => {
            // Pulse width colored by the line level before the pulse
            for tick in ticks {
                let count = tick.bits.to_string();

                spans.push(if tick.level {
                    count.green()
                } else {
                    count.red()
                });

                if let Some(rem) = tick.remainder {
                    spans.push(format!("-{rem:x}").dark_gray());
                }

                spans.push(" ".into());
            }
        }
    }

    Line::from(spans)
}

impl Widget for &ListPanel {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = titled_block(self.title, self.color);
        let inner = block.inner(area);

        if self.lines.is_empty() {
            "No entries.".bold().render(inner, buf);
        } else {
            for (line, row) in self.lines.iter().zip(inner.rows()) {
                line.render(row, buf);
            }
        }

        block.render(area, buf);
    }
}

fn titled_block(title: &'static str, color: Color) -> Block<'static> {
    Block::bordered()
        .border_type(BorderType::Rounded)
        .border_style(color)
        .padding(Padding::horizontal(1))
        .title(Line::from(vec![" ".into(), title.bold(), " ".into()]).centered())
        .title_style(Style::reset())
}
