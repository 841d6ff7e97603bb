//! Direct actuation from the camera board's own pins.
//!
//! Steering is a PWM channel whose duty follows the 8-bit steering value.
//! Direction and mode travel to the motor board as a 2-bit code on two
//! digital lines:
//!
//! | state              | line A | line B |
//! |--------------------|--------|--------|
//! | forward            | high   | low    |
//! | backward           | low    | high   |
//! | neutral            | high   | high   |
//! | obstacle avoidance | low    | low    |
//!
//! Leaving obstacle avoidance drives the forward code.

use embedded_hal::{
    digital::{OutputPin, PinState},
    pwm::SetDutyCycle,
};

use super::Actuator;
use crate::utils::controls::{DriveMode, Gear};

/// Full-scale steering value; duty is `value / STEER_FULL_SCALE` of the PWM maximum.
pub const STEER_FULL_SCALE: u16 = u8::MAX as u16;

/// Errors reported by the PWM channel or the direction lines.
#[derive(Debug)]
pub enum DriveError<SE, PE> {
    Steering(SE),
    Direction(PE),
}

/// Levels of the two direction lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionCode {
    pub a: PinState,
    pub b: PinState,
}

impl DirectionCode {
    pub const fn for_gear(gear: Gear) -> Self {
        use PinState::{High, Low};
        match gear {
            Gear::Forward => DirectionCode { a: High, b: Low },
            Gear::Backward => DirectionCode { a: Low, b: High },
            Gear::Neutral => DirectionCode { a: High, b: High },
        }
    }

    pub const AVOIDANCE: DirectionCode = DirectionCode {
        a: PinState::Low,
        b: PinState::Low,
    };
}

/// Steering PWM plus the two direction lines.
pub struct DirectDrive<S, P> {
    steering: S,
    line_a: P,
    line_b: P,
}

impl<S, P> DirectDrive<S, P>
where
    S: SetDutyCycle,
    P: OutputPin,
{
    pub fn new(
        steering: S,
        line_a: P,
        line_b: P,
    ) -> Self {
        DirectDrive {
            steering,
            line_a,
            line_b,
        }
    }

    fn write_code(
        &mut self,
        code: DirectionCode,
    ) -> Result<(), DriveError<S::Error, P::Error>> {
        self.line_a
            .set_state(code.a)
            .map_err(DriveError::Direction)?;
        self.line_b
            .set_state(code.b)
            .map_err(DriveError::Direction)?;
        tracing::trace!(a = ?code.a, b = ?code.b, "direction lines set");
        Ok(())
    }
}

impl<S, P> Actuator for DirectDrive<S, P>
where
    S: SetDutyCycle,
    P: OutputPin,
{
    type Error = DriveError<S::Error, P::Error>;

    fn steer(
        &mut self,
        duty: u8,
    ) -> Result<(), Self::Error> {
        self.steering
            .set_duty_cycle_fraction(u16::from(duty), STEER_FULL_SCALE)
            .map_err(DriveError::Steering)
    }

    fn shift(
        &mut self,
        gear: Gear,
    ) -> Result<(), Self::Error> {
        self.write_code(DirectionCode::for_gear(gear))
    }

    fn set_mode(
        &mut self,
        mode: DriveMode,
    ) -> Result<(), Self::Error> {
        match mode {
            DriveMode::Manual => self.write_code(DirectionCode::for_gear(Gear::Forward)),
            DriveMode::ObstacleAvoidance => self.write_code(DirectionCode::AVOIDANCE),
        }
    }
}
