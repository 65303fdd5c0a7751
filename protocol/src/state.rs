//! Decoded device state: port levels, debounced inputs and the global diagnostic record.
//!
//! The board is built around a PIC microcontroller whose `PORTA` and `PORTB`
//! registers are reported as raw 32-bit snapshots. [`PortStates`] maps the
//! individual pins of those snapshots to named [`Port`]s.

use alloc::collections::btree_map::BTreeMap;
use bitflags_derive::{FlagsDebug, FlagsDisplay};
use strum::{Display, EnumIter, FromRepr, IntoEnumIterator};

/// Number of bytes in a ports-state snapshot (`PORTA` followed by `PORTB`).
pub const PORTS_SNAPSHOT_LEN: usize = 8;

/// Named microcontroller pin.
///
/// Only pins that are bonded out and meaningful on the board are listed.
#[derive(Display, EnumIter, PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum Port {
    /// `RA0`, unused.
    Ra0,
    /// `RA1`, unused.
    Ra1,
    /// `RA2`, oscillator clock.
    Ra2,
    /// `RA3`, oscillator clock.
    Ra3,
    /// `RA4`, immobilizer enable output.
    Ra4,
    /// `RB0`, button input.
    Rb0,
    /// `RB1`, flash serial input.
    Rb1,
    /// `RB2`, flash serial output.
    Rb2,
    /// `RB3`, flash chip select (active low).
    Rb3,
    /// `RB4`, capot input.
    Rb4,
    /// `RB5`, immobilizer sense input.
    Rb5,
    /// `RB7`, ASR+12 V sense input.
    Rb7,
    /// `RB8`, BEAN bus input.
    Rb8,
    /// `RB9`, ground.
    Rb9,
    /// `RB10`, USB D+.
    Rb10,
    /// `RB11`, USB D-.
    Rb11,
    /// `RB13`, BEAN bus output.
    Rb13,
    /// `RB14`, flash serial clock.
    Rb14,
    /// `RB15`, beeper control output.
    Rb15,
}

/// Signal direction of a pin as wired on the board.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Direction {
    /// Pin is sampled by the firmware.
    Input,
    /// Pin can be driven through [`OutputPort`].
    Output,
    /// Pin is used by a peripheral (SPI, USB, oscillator).
    Peripheral,
}

impl Port {
    /// Returns the snapshot byte index and bit mask holding this pin.
    ///
    /// The firmware copies `PORTA` into bytes 0–3 and `PORTB` into bytes 4–7.
    #[must_use]
    pub const fn location(self) -> (usize, u8) {
        match self {
            Self::Ra0 => (3, 0x01),
            Self::Ra1 => (3, 0x02),
            Self::Ra2 => (3, 0x04),
            Self::Ra3 => (3, 0x08),
            Self::Ra4 => (3, 0x10),
            Self::Rb0 => (7, 0x01),
            Self::Rb1 => (7, 0x02),
            Self::Rb2 => (7, 0x04),
            Self::Rb3 => (7, 0x08),
            Self::Rb4 => (7, 0x10),
            Self::Rb5 => (7, 0x20),
            Self::Rb7 => (7, 0x80),
            Self::Rb8 => (6, 0x01),
            Self::Rb9 => (6, 0x02),
            Self::Rb10 => (6, 0x04),
            Self::Rb11 => (6, 0x08),
            Self::Rb13 => (6, 0x20),
            Self::Rb14 => (6, 0x40),
            Self::Rb15 => (6, 0x80),
        }
    }

    /// Returns the board-level signal name, if the pin has one.
    #[must_use]
    pub const fn label(self) -> Option<&'static str> {
        match self {
            Self::Rb0 => Some("Button"),
            Self::Rb1 => Some("SI1"),
            Self::Rb2 => Some("SO1"),
            Self::Rb3 => Some("_CS"),
            Self::Ra2 | Self::Ra3 => Some("CLK"),
            Self::Rb4 => Some("Capot"),
            Self::Ra4 => Some("ImmoOn"),
            Self::Rb5 => Some("ImmoSence"),
            Self::Rb7 => Some("ASR+12"),
            Self::Rb8 => Some("BEAN IN"),
            Self::Rb9 => Some("GND"),
            Self::Rb10 => Some("USB D+"),
            Self::Rb11 => Some("USB D-"),
            Self::Rb13 => Some("BEAN OUT"),
            Self::Rb14 => Some("SCK1"),
            Self::Rb15 => Some("Beeper Ctrl"),
            Self::Ra0 | Self::Ra1 => None,
        }
    }

    /// Returns how the pin is used on the board.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Rb0 | Self::Rb4 | Self::Rb5 | Self::Rb7 | Self::Rb8 => Direction::Input,
            Self::Ra4 | Self::Rb13 | Self::Rb15 => Direction::Output,
            _ => Direction::Peripheral,
        }
    }

    /// Returns the drivable output behind this pin, if any.
    #[must_use]
    pub const fn output(self) -> Option<OutputPort> {
        match self {
            Self::Ra4 => Some(OutputPort::ImmoOn),
            Self::Rb13 => Some(OutputPort::BeanOut),
            Self::Rb15 => Some(OutputPort::Beeper),
            _ => None,
        }
    }
}

/// Last known level of every named [`Port`].
///
/// A port is unknown (`None`) until the first ports-state report arrives.
#[derive(Default, PartialEq, Eq, Clone, Debug)]
pub struct PortStates(BTreeMap<Port, bool>);

impl PortStates {
    /// Returns the level of a port, or `None` if it has never been reported.
    #[must_use]
    pub fn get(&self, port: Port) -> Option<bool> {
        self.0.get(&port).copied()
    }

    /// Refreshes all named ports from a raw `PORTA`/`PORTB` snapshot.
    pub fn update(&mut self, snapshot: &[u8; PORTS_SNAPSHOT_LEN]) {
        for port in Port::iter() {
            let (idx, mask) = port.location();

            self.0.insert(port, snapshot[idx] & mask != 0);
        }
    }
}

/// Pin that can be driven from the host.
#[derive(Display, EnumIter, PartialEq, Eq, Copy, Clone, Debug)]
pub enum OutputPort {
    /// Immobilizer enable output (`ra4`).
    #[strum(to_string = "ImmoOn")]
    ImmoOn,
    /// BEAN transmit line (`rb13`).
    #[strum(to_string = "BEAN OUT")]
    BeanOut,
    /// Beeper control (`rb15`).
    #[strum(to_string = "Beeper Ctrl")]
    Beeper,
}

impl OutputPort {
    /// Returns the mask sent with the set-port requests.
    #[must_use]
    pub const fn mask(self) -> [u8; 8] {
        match self {
            Self::ImmoOn => [0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00],
            Self::BeanOut => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x00],
            Self::Beeper => [0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00],
        }
    }

    /// Returns the pin behind this output.
    #[must_use]
    pub const fn port(self) -> Port {
        match self {
            Self::ImmoOn => Port::Ra4,
            Self::BeanOut => Port::Rb13,
            Self::Beeper => Port::Rb15,
        }
    }
}

/// Requested level for an [`OutputPort`].
#[derive(Display, PartialEq, Eq, Copy, Clone, Debug)]
pub enum PortDrive {
    /// Drive the pin low.
    #[strum(to_string = "0")]
    Low,
    /// Drive the pin high.
    #[strum(to_string = "1")]
    High,
    /// Leave the pin to the firmware (no request is sent).
    #[strum(to_string = "---")]
    Release,
}

bitflags::bitflags! {
    /// Status register of the LE25FU406B SPI flash.
    ///
    /// Bit 7 is not adjacent to the block protection bits.
    #[derive(FlagsDisplay, FlagsDebug, Default, PartialEq, Eq, Copy, Clone)]
    pub struct StatusRegister: u8 {
        /// Write cycle in progress (active-low ready, `_RDY`).
        const Rdy = 0x01;
        /// Write enable latch (`WEN`).
        const Wen = 0x02;
        /// Block protect bit 0.
        const Bp0 = 0x04;
        /// Block protect bit 1.
        const Bp1 = 0x08;
        /// Block protect bit 2.
        const Bp2 = 0x10;
        /// Status register write protect (`SRWP`).
        const Srwp = 0x80;
    }
}

impl StatusRegister {
    /// All bits with the names printed in the flash datasheet.
    pub const NAMED: [(&'static str, Self); 6] = [
        ("_RDY", Self::Rdy),
        ("WEN", Self::Wen),
        ("BP0", Self::Bp0),
        ("BP1", Self::Bp1),
        ("BP2", Self::Bp2),
        ("SRWP", Self::Srwp),
    ];
}

bitflags::bitflags! {
    /// Debounced digital inputs as sampled by the firmware.
    #[derive(FlagsDisplay, FlagsDebug, Default, PartialEq, Eq, Copy, Clone)]
    pub struct Inputs: u8 {
        /// Push button.
        const Button = 0x01;
        /// Hood ("capot") switch.
        const Capot = 0x02;
        /// Immobilizer sense line.
        const ImmoSense = 0x04;
        /// ASR +12 V line.
        const Asr12V = 0x08;
    }
}

/// Immobilizer state machine state.
#[derive(FromRepr, Display, Default, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ImmoState {
    /// State not determined yet, or an unrecognized value.
    #[default]
    Unknown = 0x00,
    /// Immobilizer handshake succeeded.
    OkImmo = 0x01,
    /// ASR line confirmed the ignition.
    OkAsr = 0x02,
    /// Alarm raised.
    Alert = 0x03,
}

/// State of the immobilizer input line.
#[derive(FromRepr, Display, Default, PartialEq, Eq, Copy, Clone, Debug)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ImmoInputState {
    /// State not determined yet, or an unrecognized value.
    #[default]
    Unknown = 0x00,
    /// Input behaves as expected.
    Ok = 0x01,
    /// Input indicates tampering.
    Alert = 0x02,
}

/// Diagnostic snapshot returned by the get/monitor global state requests.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct GlobalState {
    /// Next SPI flash log address.
    pub spi_addr: u32,
    /// Pending SPI flash task.
    pub spi_task: u8,
    /// Start-up tasks not yet completed.
    pub initial_tasks: u8,
    /// Debounced input levels.
    pub inputs: Inputs,
    /// Debounce counter of the push button.
    pub button_test: u8,
    /// Debounce counter of the hood switch.
    pub capot_test: u8,
    /// Debounce counter of the immobilizer sense line.
    pub immo_sense_test: u8,
    /// Debounce counter of the ASR +12 V line.
    pub asr12v_test: u8,
    /// Sub-minute timer in units of 10 ms.
    pub ms10: u16,
    /// Uptime minutes.
    pub min: u8,
    /// Uptime hours.
    pub hour: u8,
    /// Immobilizer state.
    pub immo_state: ImmoState,
    /// Immobilizer input state.
    pub immo_input_state: ImmoInputState,
    immo_state_raw: u8,
    immo_input_state_raw: u8,
}

impl GlobalState {
    /// Returns the raw immobilizer state values `(state, input)`.
    ///
    /// Useful when the firmware reports a value outside the known set.
    #[must_use]
    pub fn raw_immo_states(&self) -> (u8, u8) {
        (self.immo_state_raw, self.immo_input_state_raw)
    }
}

/// Decodes report bytes 1–17 (the opcode byte is not included).
impl From<[u8; 17]> for GlobalState {
    fn from(data: [u8; 17]) -> Self {
        Self {
            spi_addr: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            spi_task: data[4],
            initial_tasks: data[5],
            inputs: Inputs::from_bits_truncate(data[6]),
            button_test: data[7],
            capot_test: data[8],
            immo_sense_test: data[9],
            asr12v_test: data[10],
            ms10: u16::from_le_bytes([data[11], data[12]]),
            min: data[13],
            hour: data[14],
            immo_state: ImmoState::from_repr(data[15]).unwrap_or_default(),
            immo_input_state: ImmoInputState::from_repr(data[16]).unwrap_or_default(),
            immo_state_raw: data[15],
            immo_input_state_raw: data[16],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn ports_unknown_before_update() {
        let ports = PortStates::default();

        assert!(
            Port::iter().all(|port| ports.get(port).is_none()),
            "all ports should be unknown"
        );
    }

    #[test]
    fn ports_decode() {
        let mut ports = PortStates::default();

        ports.update(&[0x00, 0x00, 0x00, 0b0001_0001, 0x00, 0x00, 0x00, 0b0000_0001]);

        for port in Port::iter() {
            let expected = matches!(port, Port::Ra0 | Port::Ra4 | Port::Rb0);

            assert_eq!(
                ports.get(port),
                Some(expected),
                "state of {port} should be correct"
            );
        }
    }

    #[test]
    fn ports_decode_upper_portb() {
        let mut ports = PortStates::default();

        ports.update(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0b1010_0001, 0b1000_0000]);

        assert_eq!(ports.get(Port::Rb7), Some(true), "rb7 should be high");
        assert_eq!(ports.get(Port::Rb8), Some(true), "rb8 should be high");
        assert_eq!(ports.get(Port::Rb13), Some(true), "rb13 should be high");
        assert_eq!(ports.get(Port::Rb15), Some(true), "rb15 should be high");
        assert_eq!(ports.get(Port::Rb14), Some(false), "rb14 should be low");
        assert_eq!(ports.get(Port::Ra0), Some(false), "ra0 should be low");
    }

    #[test]
    fn port_names() {
        assert_eq!(Port::Rb13.to_string(), "rb13", "port name should be correct");
        assert_eq!(Port::Rb13.output(), Some(OutputPort::BeanOut));
        assert_eq!(OutputPort::Beeper.port(), Port::Rb15);
        assert_eq!(Port::Rb8.direction(), Direction::Input);
    }

    #[test]
    fn status_register_bits() {
        let reg = StatusRegister::from_bits_truncate(0b1000_0010);

        assert!(reg.contains(StatusRegister::Wen), "WEN should be set");
        assert!(reg.contains(StatusRegister::Srwp), "SRWP should be set");
        assert!(!reg.contains(StatusRegister::Rdy), "_RDY should be clear");
        assert_eq!(
            StatusRegister::from_bits_truncate(0xff).bits(),
            0x9f,
            "unused bits should be dropped"
        );
    }

    #[test]
    fn global_state_decode() {
        let state = GlobalState::from([
            0x00, 0x01, 0x23, 0x48, 0x02, 0x03, 0b0000_0101, 0x0a, 0x0b, 0x0c, 0x0d, 0x34, 0x12,
            0x2a, 0x05, 0x02, 0x07,
        ]);

        assert_eq!(state.spi_addr, 0x0001_2348, "SPI address should be correct");
        assert_eq!(state.spi_task, 0x02, "SPI task should be correct");
        assert_eq!(state.initial_tasks, 0x03, "initial tasks should be correct");
        assert_eq!(
            state.inputs,
            Inputs::Button | Inputs::ImmoSense,
            "inputs should be correct"
        );
        assert_eq!(state.asr12v_test, 0x0d, "test counter should be correct");
        assert_eq!(state.ms10, 0x1234, "timer should be correct");
        assert_eq!((state.hour, state.min), (5, 42), "time should be correct");
        assert_eq!(state.immo_state, ImmoState::OkAsr, "immo state should be correct");
        assert_eq!(
            state.immo_input_state,
            ImmoInputState::Unknown,
            "unrecognized input state should map to unknown"
        );
        assert_eq!(state.raw_immo_states(), (0x02, 0x07));
    }
}
