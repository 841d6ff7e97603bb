//! Actuator state and command dispatch.
//!
//! - `direct`: steering PWM plus two direction lines driven from this MCU.
//! - `companion`: the same commands forwarded to a companion MCU over I2C.
//!
//! `CarController` is the single owner of the vehicle state. HTTP workers hand
//! it validated commands through `CONTROL_LINK` and wait for the outcome.

/// Direction lines and steering PWM on local pins.
pub mod direct;
/// I2C handshake with the companion microcontroller.
pub mod companion;

use core::cell::Cell;

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex as BlockingMutex},
    channel::Channel,
    mutex::Mutex,
    signal::Signal,
};
use serde::Serialize;

use crate::utils::controls::{
    ControlCommand, DriveMode, Gear, STEER_CENTER,
};

pub use companion::{CompanionConfig, CompanionError, CompanionLink};
pub use direct::{DirectDrive, DriveError};

/// Link between the HTTP workers and the controller task.
pub static CONTROL_LINK: ControlLink = ControlLink::new();

/// Hardware that can carry out validated commands.
pub trait Actuator {
    type Error: core::fmt::Debug;

    /// Apply a steering duty (`0..=255`).
    fn steer(
        &mut self,
        duty: u8,
    ) -> Result<(), Self::Error>;

    /// Drive the direction outputs for `gear`.
    fn shift(
        &mut self,
        gear: Gear,
    ) -> Result<(), Self::Error>;

    /// Enter `mode`. Manual mode resumes in [`Gear::Forward`].
    fn set_mode(
        &mut self,
        mode: DriveMode,
    ) -> Result<(), Self::Error>;
}

/// Last applied steering, gear and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorState {
    pub steer: u8,
    pub gear: Gear,
    pub mode: DriveMode,
}

impl ActuatorState {
    /// Boot state: wheels centred, no drive, remote control.
    pub const NEUTRAL: ActuatorState = ActuatorState {
        steer: STEER_CENTER,
        gear: Gear::Neutral,
        mode: DriveMode::Manual,
    };
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Owns the actuator and the state it has been driven to.
pub struct CarController<A> {
    actuator: A,
    state: ActuatorState,
}

impl<A> CarController<A>
where
    A: Actuator,
{
    pub fn new(actuator: A) -> Self {
        CarController {
            actuator,
            state: ActuatorState::NEUTRAL,
        }
    }

    /// Drive the outputs to the neutral boot state.
    pub fn init(&mut self) -> Result<(), A::Error> {
        let neutral = ActuatorState::NEUTRAL;
        self.actuator.steer(neutral.steer)?;
        self.actuator.shift(neutral.gear)?;
        self.state = neutral;
        tracing::info!(?neutral, "actuators initialised");
        Ok(())
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    /// Carry out a validated command.
    ///
    /// State is committed only once the actuator reports success.
    pub fn apply(
        &mut self,
        command: ControlCommand,
    ) -> Result<ActuatorState, A::Error> {
        let mut next = self.state;
        match command {
            ControlCommand::Steer { duty } => {
                self.actuator.steer(duty)?;
                next.steer = duty;
                tracing::info!(
                    duty,
                    towards = if duty < 128 { "left" } else { "right" },
                    "steering"
                );
            }
            ControlCommand::Shift { gear } => {
                // Drives the outputs in either mode, overriding the avoidance code.
                self.actuator.shift(gear)?;
                next.gear = gear;
                tracing::info!(?gear, mode = ?self.state.mode, "gear engaged");
            }
            ControlCommand::ToggleMode => {
                let mode = self.state.mode.toggled();
                self.actuator.set_mode(mode)?;
                next.mode = mode;
                if mode == DriveMode::Manual {
                    next.gear = Gear::Forward;
                }
                tracing::info!(?mode, "drive mode changed");
            }
        }
        self.state = next;
        Ok(next)
    }

    /// Receive one request from `link`, apply it and report back.
    pub async fn serve_one(
        &mut self,
        link: &ControlLink,
    ) {
        let request = link.requests.receive().await;
        tracing::debug!(seq = request.seq, command = ?request.command, "control request");

        let result = match self.apply(request.command) {
            Ok(state) => {
                link.snapshot.lock(|cell| cell.set(state));
                Ok(state)
            }
            Err(error) => {
                tracing::error!(?error, command = ?request.command, "actuation failed");
                Err(ActuationFailed)
            }
        };

        link.outcomes.signal(ControlOutcome {
            seq: request.seq,
            result,
        });
    }

    /// Controller task body: serve requests forever.
    pub async fn run(
        &mut self,
        link: &ControlLink,
    ) -> ! {
        link.snapshot.lock(|cell| cell.set(self.state));
        loop {
            self.serve_one(link).await;
        }
    }
}

/// The actuator reported an error; details are logged by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationFailed;

#[derive(Debug, Clone, Copy)]
struct ControlRequest {
    seq: u32,
    command: ControlCommand,
}

#[derive(Debug, Clone, Copy)]
struct ControlOutcome {
    seq: u32,
    result: Result<ActuatorState, ActuationFailed>,
}

/// Request/response plumbing between HTTP workers and the controller.
///
/// Submissions are serialized: the turn lock is held from send until the
/// matching outcome arrives, so one command is in flight per device. Each
/// request is numbered and outcomes for abandoned requests are skipped.
pub struct ControlLink {
    requests: Channel<CriticalSectionRawMutex, ControlRequest, 1>,
    outcomes: Signal<CriticalSectionRawMutex, ControlOutcome>,
    turn: Mutex<CriticalSectionRawMutex, u32>,
    snapshot: BlockingMutex<CriticalSectionRawMutex, Cell<ActuatorState>>,
}

impl ControlLink {
    pub const fn new() -> Self {
        ControlLink {
            requests: Channel::new(),
            outcomes: Signal::new(),
            turn: Mutex::new(0),
            snapshot: BlockingMutex::new(Cell::new(ActuatorState::NEUTRAL)),
        }
    }

    /// Hand `command` to the controller and wait for its outcome.
    pub async fn submit(
        &self,
        command: ControlCommand,
    ) -> Result<ActuatorState, ActuationFailed> {
        let mut turn = self.turn.lock().await;
        *turn = turn.wrapping_add(1);
        let seq = *turn;

        self.requests.send(ControlRequest { seq, command }).await;
        loop {
            let outcome = self.outcomes.wait().await;
            if outcome.seq == seq {
                return outcome.result;
            }
            tracing::debug!(stale = outcome.seq, seq, "dropping outcome of abandoned request");
        }
    }

    /// State published after the last successful command.
    pub fn snapshot(&self) -> ActuatorState {
        self.snapshot.lock(|cell| cell.get())
    }
}

impl Default for ControlLink {
    fn default() -> Self {
        Self::new()
    }
}
