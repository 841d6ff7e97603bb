//! Host stand-ins for the car's pins, steering PWM and companion MCU.
//!
//! Everything logs what the firmware would have driven.

use std::convert::Infallible;

use camcar_core::utils::controllers::companion::CommandFamily;
use embedded_hal::{
    digital::{self, OutputPin},
    i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation},
    pwm::{self, SetDutyCycle},
};
use tracing::{info, warn};

/// Acknowledgement the companion sends for frames it cannot parse.
const GARBLED_ACK: u8 = 0xFF;

/// Direction line that logs every level change.
pub struct SimulatedPin {
    name: &'static str,
}

impl SimulatedPin {
    pub fn new(name: &'static str) -> Self {
        SimulatedPin { name }
    }
}

impl digital::ErrorType for SimulatedPin {
    type Error = Infallible;
}

impl OutputPin for SimulatedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        info!(pin = self.name, "LOW");
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        info!(pin = self.name, "HIGH");
        Ok(())
    }
}

/// Steering PWM channel with a 10-bit duty range.
pub struct SimulatedPwm {
    duty: u16,
}

impl SimulatedPwm {
    pub const MAX_DUTY: u16 = 1023;

    pub fn new() -> Self {
        SimulatedPwm { duty: 0 }
    }
}

impl pwm::ErrorType for SimulatedPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimulatedPwm {
    fn max_duty_cycle(&self) -> u16 {
        Self::MAX_DUTY
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Self::Error> {
        info!(from = self.duty, to = duty, max = Self::MAX_DUTY, "steering duty");
        self.duty = duty;
        Ok(())
    }
}

/// Companion MCU answering command frames on the I2C bus.
///
/// With `drop_acks` set it never answers, so every handshake times out.
pub struct SimulatedCompanion {
    address: u8,
    drop_acks: bool,
    pending_ack: Option<u8>,
}

impl SimulatedCompanion {
    pub fn new(
        address: u8,
        drop_acks: bool,
    ) -> Self {
        SimulatedCompanion {
            address,
            drop_acks,
            pending_ack: None,
        }
    }

    fn on_frame(
        &mut self,
        frame: &[u8],
    ) {
        let family = match frame {
            [family, _] => CommandFamily::from_byte(*family),
            _ => None,
        };

        self.pending_ack = Some(match family {
            Some(family) => {
                info!(?family, payload = frame[1], "companion received frame");
                family.ok_sentinel()
            }
            None => {
                warn!(?frame, "companion received garbled frame");
                GARBLED_ACK
            }
        });
    }
}

impl i2c::ErrorType for SimulatedCompanion {
    type Error = ErrorKind;
}

impl I2c for SimulatedCompanion {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }

        for operation in operations {
            match operation {
                Operation::Write(frame) => self.on_frame(frame),
                Operation::Read(buf) => {
                    let ack = self.pending_ack.take();
                    match ack {
                        Some(ack) if !self.drop_acks => buf.fill(ack),
                        _ => return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)),
                    }
                }
            }
        }
        Ok(())
    }
}
