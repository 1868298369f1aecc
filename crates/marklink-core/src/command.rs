//! Single-byte actuator command protocol.
//!
//! The station writes one unframed byte per command; the remote endpoint
//! interprets each byte against its [`ActuatorState`]:
//!
//! | byte   | effect                                   |
//! |--------|------------------------------------------|
//! | `0x00` | keepalive, nothing happens               |
//! | `0x01` | drive forward                            |
//! | `0x02` | turn left                                |
//! | `0x03` | drive backward                           |
//! | `0x04` | turn right                               |
//! | `0x05` | stop driving, auxiliary back to neutral  |
//! | `0x06` | tilt −2°                                 |
//! | `0x07` | tilt +2°                                 |
//! | `0x08` | pan +2°                                  |
//! | `0x09` | pan −2°                                  |
//! | `0x0b` | auxiliary to the triggered position      |
//!
//! Every other byte is a no-op, so new codes can be introduced without
//! breaking older endpoints.

use serde::{Deserialize, Serialize};

// MARK: - Command

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Command {
    Keepalive = 0x00,
    Forward = 0x01,
    Left = 0x02,
    Backward = 0x03,
    Right = 0x04,
    Stop = 0x05,
    TiltDecrease = 0x06,
    TiltIncrease = 0x07,
    PanIncrease = 0x08,
    PanDecrease = 0x09,
    Trigger = 0x0b,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Keepalive,
            0x01 => Self::Forward,
            0x02 => Self::Left,
            0x03 => Self::Backward,
            0x04 => Self::Right,
            0x05 => Self::Stop,
            0x06 => Self::TiltDecrease,
            0x07 => Self::TiltIncrease,
            0x08 => Self::PanIncrease,
            0x09 => Self::PanDecrease,
            0x0b => Self::Trigger,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

// MARK: - DriveDirection / ServoChannel

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveDirection {
    Forward,
    Left,
    Backward,
    Right,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServoChannel {
    Pan,
    Tilt,
    Aux,
}

impl ServoChannel {
    /// Physical servo index on the robot's motor board.
    pub fn index(self) -> u8 {
        match self {
            Self::Pan => 1,
            Self::Tilt => 2,
            Self::Aux => 3,
        }
    }
}

// MARK: - ActuatorState

/// Current servo positions, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuatorState {
    pub pan: u8,
    pub tilt: u8,
    pub auxiliary: u8,
}

impl ActuatorState {
    pub const MIN_ANGLE: u8 = 0;
    pub const MAX_ANGLE: u8 = 180;
    pub const AUX_NEUTRAL: u8 = 90;
    pub const AUX_TRIGGERED: u8 = 40;

    pub fn new(pan: u8, tilt: u8, auxiliary: u8) -> Self {
        Self {
            pan: clamp_angle(pan as i16),
            tilt: clamp_angle(tilt as i16),
            auxiliary,
        }
    }

    /// `(channel, degrees)` for every servo, in the order they are driven.
    pub fn angles(&self) -> [(ServoChannel, u8); 3] {
        [
            (ServoChannel::Pan, self.pan),
            (ServoChannel::Tilt, self.tilt),
            (ServoChannel::Aux, self.auxiliary),
        ]
    }
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self {
            pan: 90,
            tilt: 90,
            auxiliary: Self::AUX_NEUTRAL,
        }
    }
}

#[inline]
fn clamp_angle(value: i16) -> u8 {
    value.clamp(ActuatorState::MIN_ANGLE as i16, ActuatorState::MAX_ANGLE as i16) as u8
}

// MARK: - Effect

/// What the actuator collaborator has to do after a command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Drive(DriveDirection),
    /// Drive to a halt, then re-send all servo angles.
    StopAndServo(ActuatorState),
    /// Re-send all servo angles.
    Servo(ActuatorState),
}

// MARK: - CommandProtocol

/// Interprets command bytes against an [`ActuatorState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProtocol;

impl CommandProtocol {
    /// Degrees moved by one pan/tilt command.
    pub const STEP: i16 = 2;

    /// Apply one wire byte. Pan and tilt are clamped to `[0, 180]` after the
    /// mutation; the auxiliary servo only ever takes its two literal positions.
    pub fn apply(state: &mut ActuatorState, byte: u8) -> Effect {
        let Some(command) = Command::from_byte(byte) else {
            tracing::trace!("Ignoring unknown command byte 0x{:02x}", byte);
            return Effect::None;
        };

        match command {
            Command::Keepalive => {
                tracing::trace!("Keepalive");
                return Effect::None;
            }
            Command::Forward => return Effect::Drive(DriveDirection::Forward),
            Command::Left => return Effect::Drive(DriveDirection::Left),
            Command::Backward => return Effect::Drive(DriveDirection::Backward),
            Command::Right => return Effect::Drive(DriveDirection::Right),
            Command::Stop => {
                state.auxiliary = ActuatorState::AUX_NEUTRAL;
                return Effect::StopAndServo(*state);
            }
            Command::TiltDecrease => state.tilt = clamp_angle(state.tilt as i16 - Self::STEP),
            Command::TiltIncrease => state.tilt = clamp_angle(state.tilt as i16 + Self::STEP),
            Command::PanIncrease => state.pan = clamp_angle(state.pan as i16 + Self::STEP),
            Command::PanDecrease => state.pan = clamp_angle(state.pan as i16 - Self::STEP),
            Command::Trigger => state.auxiliary = ActuatorState::AUX_TRIGGERED,
        }

        Effect::Servo(*state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_n(state: &mut ActuatorState, byte: u8, n: usize) {
        for _ in 0..n {
            CommandProtocol::apply(state, byte);
        }
    }

    #[test]
    fn pan_saturates_at_upper_bound() {
        let mut state = ActuatorState::default();
        apply_n(&mut state, 0x08, 45);
        assert_eq!(state.pan, 180);
        for _ in 0..20 {
            let effect = CommandProtocol::apply(&mut state, 0x08);
            assert_eq!(state.pan, 180);
            // saturated commands still re-send the angles
            assert_eq!(effect, Effect::Servo(state));
        }
    }

    #[test]
    fn pan_walk_is_bounded_in_both_directions() {
        let mut state = ActuatorState::default();
        apply_n(&mut state, 0x09, 100);
        assert_eq!(state.pan, 0);
        apply_n(&mut state, 0x08, 45);
        assert_eq!(state.pan, 90);
        apply_n(&mut state, 0x08, 100);
        assert_eq!(state.pan, 180);
        apply_n(&mut state, 0x09, 45);
        assert_eq!(state.pan, 90);
    }

    #[test]
    fn tilt_clamps_at_zero() {
        let mut state = ActuatorState::new(90, 1, 90);
        CommandProtocol::apply(&mut state, 0x06);
        assert_eq!(state.tilt, 0);
        CommandProtocol::apply(&mut state, 0x07);
        assert_eq!(state.tilt, 2);
    }

    #[test]
    fn keepalive_changes_nothing() {
        let mut state = ActuatorState::new(12, 170, 40);
        let before = state;
        assert_eq!(CommandProtocol::apply(&mut state, 0x00), Effect::None);
        assert_eq!(state, before);
    }

    #[test]
    fn drive_commands_leave_servos_alone() {
        let mut state = ActuatorState::new(10, 20, 40);
        let before = state;
        let expected = [
            DriveDirection::Forward,
            DriveDirection::Left,
            DriveDirection::Backward,
            DriveDirection::Right,
        ];
        for (byte, direction) in (0x01..=0x04).zip(expected) {
            assert_eq!(CommandProtocol::apply(&mut state, byte), Effect::Drive(direction));
        }
        assert_eq!(state, before);
    }

    #[test]
    fn trigger_then_stop_resets_auxiliary() {
        let mut state = ActuatorState::default();
        CommandProtocol::apply(&mut state, 0x0b);
        assert_eq!(state.auxiliary, 40);
        let effect = CommandProtocol::apply(&mut state, 0x05);
        assert_eq!(state.auxiliary, 90);
        assert_eq!(effect, Effect::StopAndServo(state));
    }

    #[test]
    fn unknown_bytes_are_no_ops() {
        let mut state = ActuatorState::default();
        for byte in [0x0a, 0x0c, 0x7f, 0xff] {
            assert_eq!(CommandProtocol::apply(&mut state, byte), Effect::None);
        }
        assert_eq!(state, ActuatorState::default());
    }

    #[test]
    fn command_bytes_match_wire_codes() {
        for byte in 0u8..=0xff {
            if let Some(cmd) = Command::from_byte(byte) {
                assert_eq!(cmd.as_byte(), byte);
            }
        }
        assert_eq!(Command::from_byte(0x0a), None);
    }
}
