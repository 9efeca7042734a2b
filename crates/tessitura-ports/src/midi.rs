use serde::{Deserialize, Serialize};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const POLY_PRESSURE: u8 = 0xA0;
pub const CONTROLLER_CHANGE: u8 = 0xB0;
pub const PROGRAM_CHANGE: u8 = 0xC0;
pub const CHANNEL_PRESSURE: u8 = 0xD0;
pub const PITCH_WHEEL: u8 = 0xE0;
pub const SYSTEM_EXCLUSIVE: u8 = 0xF0;
pub const SYSTEM_RESET: u8 = 0xFF;

/// A channel voice message without its channel number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMessage {
    NoteOff { note: u8, velocity: u8 },
    NoteOn { note: u8, velocity: u8 },
    PolyPressure { note: u8, pressure: u8 },
    ControllerChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    ChannelPressure { pressure: u8 },
    /// 14-bit value, 8192 = center.
    PitchWheel { value: u16 },
}

impl ChannelMessage {
    pub fn is_note(&self) -> bool {
        matches!(
            self,
            ChannelMessage::NoteOn { .. } | ChannelMessage::NoteOff { .. }
        )
    }

    fn status(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { .. } => NOTE_OFF,
            ChannelMessage::NoteOn { .. } => NOTE_ON,
            ChannelMessage::PolyPressure { .. } => POLY_PRESSURE,
            ChannelMessage::ControllerChange { .. } => CONTROLLER_CHANGE,
            ChannelMessage::ProgramChange { .. } => PROGRAM_CHANGE,
            ChannelMessage::ChannelPressure { .. } => CHANNEL_PRESSURE,
            ChannelMessage::PitchWheel { .. } => PITCH_WHEEL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiMessage {
    Channel { channel: u8, message: ChannelMessage },
    /// Full SysEx including the leading 0xF0.
    SystemExclusive(Vec<u8>),
    SystemReset,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MidiParseError {
    #[error("empty message")]
    Empty,
    #[error("missing data bytes for status {0:#04x}")]
    Truncated(u8),
    #[error("unsupported status byte {0:#04x}")]
    Unsupported(u8),
}

impl MidiMessage {
    pub fn parse(data: &[u8]) -> Result<Self, MidiParseError> {
        let status = *data.first().ok_or(MidiParseError::Empty)?;
        if status == SYSTEM_EXCLUSIVE {
            return Ok(MidiMessage::SystemExclusive(data.to_vec()));
        }
        if status == SYSTEM_RESET {
            return Ok(MidiMessage::SystemReset);
        }
        if status < 0x80 || status >= 0xF0 {
            return Err(MidiParseError::Unsupported(status));
        }

        let channel = status & 0x0F;
        let data1 = |idx: usize| {
            data.get(idx)
                .map(|value| value & 0x7F)
                .ok_or(MidiParseError::Truncated(status))
        };
        let message = match status & 0xF0 {
            NOTE_OFF => ChannelMessage::NoteOff {
                note: data1(1)?,
                velocity: data1(2).unwrap_or(64),
            },
            NOTE_ON => {
                let note = data1(1)?;
                let velocity = data1(2)?;
                if velocity == 0 {
                    ChannelMessage::NoteOff { note, velocity: 64 }
                } else {
                    ChannelMessage::NoteOn { note, velocity }
                }
            }
            POLY_PRESSURE => ChannelMessage::PolyPressure {
                note: data1(1)?,
                pressure: data1(2)?,
            },
            CONTROLLER_CHANGE => ChannelMessage::ControllerChange {
                controller: data1(1)?,
                value: data1(2)?,
            },
            PROGRAM_CHANGE => ChannelMessage::ProgramChange { program: data1(1)? },
            CHANNEL_PRESSURE => ChannelMessage::ChannelPressure { pressure: data1(1)? },
            PITCH_WHEEL => {
                let lsb = data1(1)? as u16;
                let msb = data1(2)? as u16;
                ChannelMessage::PitchWheel {
                    value: (msb << 7) | lsb,
                }
            }
            _ => return Err(MidiParseError::Unsupported(status)),
        };
        Ok(MidiMessage::Channel { channel, message })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            MidiMessage::SystemExclusive(data) => data.clone(),
            MidiMessage::SystemReset => vec![SYSTEM_RESET],
            MidiMessage::Channel { channel, message } => {
                let status = message.status() | (channel & 0x0F);
                match *message {
                    ChannelMessage::NoteOff { note, velocity }
                    | ChannelMessage::NoteOn { note, velocity } => vec![status, note, velocity],
                    ChannelMessage::PolyPressure { note, pressure } => {
                        vec![status, note, pressure]
                    }
                    ChannelMessage::ControllerChange { controller, value } => {
                        vec![status, controller, value]
                    }
                    ChannelMessage::ProgramChange { program } => vec![status, program],
                    ChannelMessage::ChannelPressure { pressure } => vec![status, pressure],
                    ChannelMessage::PitchWheel { value } => {
                        vec![status, (value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        let msg = MidiMessage::parse(&[0x93, 60, 0]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::Channel {
                channel: 3,
                message: ChannelMessage::NoteOff {
                    note: 60,
                    velocity: 64
                }
            }
        );
    }

    #[test]
    fn pitch_wheel_combines_lsb_and_msb() {
        let msg = MidiMessage::parse(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::Channel {
                channel: 0,
                message: ChannelMessage::PitchWheel { value: 8192 }
            }
        );
        assert_eq!(msg.to_bytes(), vec![0xE0, 0x00, 0x40]);
    }

    #[test]
    fn truncated_and_running_status_are_rejected() {
        assert_eq!(
            MidiMessage::parse(&[0xB0, 7]),
            Err(MidiParseError::Truncated(0xB0))
        );
        assert_eq!(MidiMessage::parse(&[60, 100]), Err(MidiParseError::Unsupported(60)));
        assert_eq!(MidiMessage::parse(&[]), Err(MidiParseError::Empty));
    }
}
