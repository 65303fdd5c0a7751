use beandbg::{
    bean::BeanCommand,
    hex,
    state::{OutputPort, PortDrive},
};
use ratatui::{
    buffer::Buffer,
    crossterm::event::{Event, KeyCode, KeyEvent},
    layout::Rect,
    style::Stylize,
    text::Line,
    widgets::Widget,
};
use strum::{Display, EnumIter};

// Maximum number of rendered commands, limited by number of usable function keys
const MAX_NUM_COMMANDS: usize = 10;

#[derive(Display, EnumIter, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Tab {
    #[strum(to_string = "Ports")]
    Ports,
    #[strum(to_string = "SPI Flash")]
    Spi,
    #[strum(to_string = "BEAN")]
    Bean,
    #[strum(to_string = "SPI Log")]
    SpiLog,
}

impl Tab {
    pub fn next(self) -> Self {
        match self {
            Self::Ports => Self::Spi,
            Self::Spi => Self::Bean,
            Self::Bean => Self::SpiLog,
            Self::SpiLog => Self::Ports,
        }
    }

    pub fn actions(self) -> &'static [Action] {
        match self {
            Self::Ports => &[
                Action::GetPortsState,
                Action::DrivePort(OutputPort::ImmoOn),
                Action::DrivePort(OutputPort::BeanOut),
                Action::DrivePort(OutputPort::Beeper),
                Action::PlayBeep,
                Action::GetGlobalState,
                Action::MonitorGlobalState,
                Action::PeriodicImmo,
                Action::Echo,
                Action::StartBootloader,
            ],
            Self::Spi => &[
                Action::ReadStatusRegister,
                Action::ToggleWriteEnable,
                Action::SpiRead,
                Action::SpiWrite,
                Action::SpiErase,
                Action::SpiRaw,
                Action::SpiGetRegisters,
            ],
            Self::Bean => &[
                Action::SendBean,
                Action::RepeatBean,
                Action::ListenBean,
                Action::ToggleTicks,
                Action::BeanDebug(true),
                Action::BeanDebug(false),
                Action::ClearBeanLog,
            ],
            Self::SpiLog => &[Action::ReadSpiLog, Action::ClearSpiLog],
        }
    }
}

/// Operator-triggered action, bound to a function key.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Action {
    GetPortsState,
    DrivePort(OutputPort),
    PlayBeep,
    GetGlobalState,
    MonitorGlobalState,
    PeriodicImmo,
    Echo,
    StartBootloader,
    ReadStatusRegister,
    ToggleWriteEnable,
    SpiRead,
    SpiWrite,
    SpiErase,
    SpiRaw,
    SpiGetRegisters,
    SendBean,
    RepeatBean,
    ListenBean,
    ToggleTicks,
    BeanDebug(bool),
    ClearBeanLog,
    ReadSpiLog,
    ClearSpiLog,
}

/// Kind of input an action asks for before it is triggered.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Prompt {
    /// Enter to confirm, nothing to type.
    Confirm,
    /// Free-form hex text with a usage hint.
    Hex(&'static str),
}

impl Action {
    pub fn name(self) -> &'static str {
        match self {
            Self::GetPortsState => "Ports",
            Self::DrivePort(OutputPort::ImmoOn) => "ImmoOn",
            Self::DrivePort(OutputPort::BeanOut) => "BEAN OUT",
            Self::DrivePort(OutputPort::Beeper) => "Beeper",
            Self::PlayBeep => "Beep",
            Self::GetGlobalState => "State",
            Self::MonitorGlobalState => "Monitor",
            Self::PeriodicImmo => "Immo",
            Self::Echo => "Echo",
            Self::StartBootloader => "Bootloader",
            Self::ReadStatusRegister => "Status",
            Self::ToggleWriteEnable => "WEN",
            Self::SpiRead => "Read",
            Self::SpiWrite => "Write",
            Self::SpiErase => "Erase",
            Self::SpiRaw => "Raw",
            Self::SpiGetRegisters => "Regs",
            Self::SendBean => "Send",
            Self::RepeatBean => "Repeat",
            Self::ListenBean => "Listen",
            Self::ToggleTicks => "Ticks",
            Self::BeanDebug(true) => "Debug 1",
            Self::BeanDebug(false) => "Debug 0",
            Self::ClearBeanLog | Self::ClearSpiLog => "Clear",
            Self::ReadSpiLog => "Read",
        }
    }

    pub fn prompt(self) -> Option<Prompt> {
        match self {
            Self::DrivePort(_) => Some(Prompt::Hex("0 = low, 1 = high, empty = release")),
            Self::PeriodicImmo => Some(Prompt::Hex("0 = disable, 1 = enable")),
            Self::StartBootloader => Some(Prompt::Confirm),
            Self::SpiRead | Self::SpiErase => Some(Prompt::Hex("address (3 bytes), e.g. 012340")),
            Self::SpiWrite => {
                Some(Prompt::Hex("address (3 bytes), data (4 bytes), e.g. 012340, deadbeef"))
            }
            Self::SpiRaw => Some(Prompt::Hex("command (up to 8 bytes), e.g. 9f")),
            Self::SendBean | Self::RepeatBean => {
                Some(Prompt::Hex("|PRI-ML|DST-ID|MSG-ID|data (1-11)|, ML and CRC are added"))
            }
            Self::ReadSpiLog => {
                Some(Prompt::Hex("start, end (empty reads up to the end marker), e.g. 000000, 000400"))
            }
            _ => None,
        }
    }

    /// Live preview of the request built from the current input.
    pub fn preview(self, input: &str) -> Option<String> {
        match self {
            Self::SendBean | Self::RepeatBean => Some(
                BeanCommand::from_hex(input).map_or_else(|err| err.to_string(), |cmd| cmd.to_string()),
            ),
            Self::SpiRaw => Some(hex::format_bytes_padded(
                &beandbg::spi::raw(&hex::parse_bytes(&hex::sanitize(input))),
                " ",
            )),
            Self::DrivePort(_) => Some(Self::port_drive(input).to_string()),
            _ => None,
        }
    }

    pub fn port_drive(input: &str) -> PortDrive {
        match input.trim() {
            "0" => PortDrive::Low,
            "1" => PortDrive::High,
            _ => PortDrive::Release,
        }
    }
}

#[derive(Debug)]
pub struct CommandBar {
    actions: &'static [Action],
}

impl CommandBar {
    pub fn new(actions: &'static [Action]) -> Self {
        Self { actions }
    }

    pub fn event_to_action(&self, event: &Event) -> Option<Action> {
        if let Some(KeyEvent {
            code: KeyCode::F(key),
            ..
        }) = event.as_key_press_event()
        {
            self.actions.get((key as usize).checked_sub(1)?).copied()
        } else {
            None
        }
    }
}

impl Widget for &CommandBar {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let len = MAX_NUM_COMMANDS.min(self.actions.len());
        let spans = self
            .actions
            .iter()
            .take(MAX_NUM_COMMANDS)
            .enumerate()
            .flat_map(|(i, action)| {
                // Map actions to function keys
                let name = action.name().into();
                let key = format!("<F{}>", i + 1).bold();

                if i + 1 == len {
                    [name, " ".into(), key, "".into()]
                } else {
                    [name, " ".into(), key, " | ".into()]
                }
            })
            .collect::<Vec<_>>();

        if spans.is_empty() {
            "No actions available.".render(area, buf);
        } else {
            Line::from(spans).render(area, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn tabs_fit_function_keys() {
        for tab in Tab::iter() {
            assert!(
                tab.actions().len() <= MAX_NUM_COMMANDS,
                "{tab} actions should fit the function keys"
            );
            assert_eq!(tab.next().next().next().next(), tab, "tabs should cycle");
        }
    }

    #[test]
    fn bean_preview() {
        assert_eq!(
            Action::SendBean.preview("10 01 02 03").as_deref(),
            Some("13 01 02 03 29"),
            "framed command should be correct"
        );
        assert_eq!(
            Action::SendBean.preview("").as_deref(),
            Some("empty BEAN command")
        );
    }

    #[test]
    fn port_drive_input() {
        assert_eq!(Action::port_drive(" 1 "), PortDrive::High);
        assert_eq!(Action::port_drive("0"), PortDrive::Low);
        assert_eq!(Action::port_drive(""), PortDrive::Release);
    }
}
