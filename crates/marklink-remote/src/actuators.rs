use async_trait::async_trait;
use marklink_core::{ActuatorState, CommandProtocol, DriveDirection, Effect, ServoChannel};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// MARK: - Actuators trait

/// Motor and servo drivers on the robot.
///
/// Implementations:
/// - `LoggingActuators`: logs every call, for bench runs without hardware
/// - motor-board drivers live outside this crate
#[async_trait]
pub trait Actuators: Send {
    /// Move one servo to an absolute angle.
    async fn set_angle(&mut self, channel: ServoChannel, degrees: u8) -> Result<(), ActuatorError>;

    /// Drive the wheels.
    async fn move_drive(&mut self, direction: DriveDirection, speed: u8) -> Result<(), ActuatorError>;
}

// MARK: - ActuatorError

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("Servo {channel:?} rejected {degrees}°: {reason}")]
    Servo {
        channel: ServoChannel,
        degrees: u8,
        reason: String,
    },

    #[error("Drive {direction:?} failed: {reason}")]
    Drive {
        direction: DriveDirection,
        reason: String,
    },
}

// MARK: - ActuatorExecutor

/// Sole owner of [`ActuatorState`]; applies command bytes in arrival order.
///
/// Runs as its own task, fed by the command queue the receive loop fills.
/// State survives reconnects because the executor outlives every connection.
pub struct ActuatorExecutor<A> {
    actuators: A,
    state: ActuatorState,
    drive_speed: u8,
    applied: u64,
}

impl<A: Actuators> ActuatorExecutor<A> {
    pub fn new(actuators: A, drive_speed: u8) -> Self {
        Self {
            actuators,
            state: ActuatorState::default(),
            drive_speed,
            applied: 0,
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Command bytes processed so far, including no-ops.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn actuators(&self) -> &A {
        &self.actuators
    }

    /// Apply one command byte and perform its effect.
    ///
    /// Actuator failures are logged; the state change stands regardless.
    pub async fn handle(&mut self, byte: u8) {
        self.applied += 1;
        let effect = CommandProtocol::apply(&mut self.state, byte);
        if let Err(e) = self.perform(effect).await {
            warn!("Actuator error on command 0x{:02x}: {}", byte, e);
        }
    }

    async fn perform(&mut self, effect: Effect) -> Result<(), ActuatorError> {
        match effect {
            Effect::None => Ok(()),
            Effect::Drive(direction) => self.actuators.move_drive(direction, self.drive_speed).await,
            Effect::StopAndServo(state) => {
                self.actuators.move_drive(DriveDirection::Stop, 0).await?;
                self.write_angles(state).await
            }
            Effect::Servo(state) => self.write_angles(state).await,
        }
    }

    async fn write_angles(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        for (channel, degrees) in state.angles() {
            self.actuators.set_angle(channel, degrees).await?;
        }
        Ok(())
    }

    /// Drain the command queue until every sender is dropped; returns the
    /// final state.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<u8>) -> ActuatorState {
        info!("Actuator executor started ({:?})", self.state);
        while let Some(byte) = commands.recv().await {
            self.handle(byte).await;
        }
        debug!("Command queue closed after {} commands", self.applied);
        self.state
    }
}

// MARK: - LoggingActuators

/// Stand-in driver that only logs.
#[derive(Debug, Default)]
pub struct LoggingActuators;

#[async_trait]
impl Actuators for LoggingActuators {
    async fn set_angle(&mut self, channel: ServoChannel, degrees: u8) -> Result<(), ActuatorError> {
        debug!("servo {} ({:?}) → {}°", channel.index(), channel, degrees);
        Ok(())
    }

    async fn move_drive(&mut self, direction: DriveDirection, speed: u8) -> Result<(), ActuatorError> {
        info!("drive {:?} speed={}", direction, speed);
        Ok(())
    }
}
