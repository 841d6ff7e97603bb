//! Command handshake with the companion microcontroller.
//!
//! Every command is a two-byte frame `[family, payload]`. After writing it the
//! link polls for a one-byte acknowledgement, which must equal the family's
//! OK sentinel. A NACK on the read means the companion has nothing ready yet;
//! polling stops after `poll_attempts` reads spaced `poll_interval_us` apart.

use core::cell::RefCell;

use embedded_hal::{
    delay::DelayNs,
    i2c::{Error as I2cError, ErrorKind, I2c},
};
use embedded_hal_bus::i2c::RefCellDevice;

use super::Actuator;
use crate::utils::controls::{DriveMode, Gear};

/// Default bus address of the companion.
pub const COMPANION_ADDRESS: u8 = 0x08;

/// Command families understood by the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandFamily {
    Steer = 0x01,
    Gear = 0x02,
    Mode = 0x03,
}

impl CommandFamily {
    /// Acknowledgement byte the companion answers with on success.
    pub const fn ok_sentinel(self) -> u8 {
        0xA0 | self as u8
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CommandFamily::Steer),
            0x02 => Some(CommandFamily::Gear),
            0x03 => Some(CommandFamily::Mode),
            _ => None,
        }
    }
}

/// Payload byte of a mode frame.
pub const fn mode_payload(mode: DriveMode) -> u8 {
    match mode {
        DriveMode::Manual => 0,
        DriveMode::ObstacleAvoidance => 1,
    }
}

/// Bus address and polling window of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompanionConfig {
    pub address: u8,
    pub poll_attempts: u8,
    pub poll_interval_us: u32,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        CompanionConfig {
            address: COMPANION_ADDRESS,
            poll_attempts: 10,
            poll_interval_us: 1_000,
        }
    }
}

/// Errors that can end a handshake.
#[derive(Debug)]
pub enum CompanionError<E: core::fmt::Debug> {
    /// Writing the frame failed, or the read failed for a reason other than NACK.
    Bus(E),
    /// No acknowledgement within the polling window.
    Timeout { attempts: u8 },
    /// The companion answered with something other than the OK sentinel.
    Rejected { family: CommandFamily, ack: u8 },
}

/// Companion MCU reached over I2C.
pub struct CompanionLink<I2C, D> {
    i2c: I2C,
    delay: D,
    config: CompanionConfig,
}

impl<'a, I2C, D> CompanionLink<RefCellDevice<'a, I2C>, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Build a link on a bus shared with other devices.
    pub fn on_shared_bus(
        bus: &'a RefCell<I2C>,
        delay: D,
        config: CompanionConfig,
    ) -> Self {
        CompanionLink::new(RefCellDevice::new(bus), delay, config)
    }
}

impl<I2C, D, E> CompanionLink<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
    E: I2cError,
{
    pub fn new(
        i2c: I2C,
        delay: D,
        config: CompanionConfig,
    ) -> Self {
        CompanionLink { i2c, delay, config }
    }

    /// Send one frame and wait for its acknowledgement.
    pub fn handshake(
        &mut self,
        family: CommandFamily,
        payload: u8,
    ) -> Result<(), CompanionError<E>> {
        let address = self.config.address;
        self.i2c
            .write(address, &[family as u8, payload])
            .map_err(CompanionError::Bus)?;

        let ack = self.poll_ack()?;
        if ack != family.ok_sentinel() {
            tracing::error!(?family, ack, "companion rejected command");
            return Err(CompanionError::Rejected { family, ack });
        }

        tracing::debug!(?family, payload, "companion acknowledged");
        Ok(())
    }

    fn poll_ack(&mut self) -> Result<u8, CompanionError<E>> {
        let mut ack = [0u8; 1];
        for attempt in 0..self.config.poll_attempts {
            match self.i2c.read(self.config.address, &mut ack) {
                Ok(()) => return Ok(ack[0]),
                Err(e) if matches!(e.kind(), ErrorKind::NoAcknowledge(_)) => {
                    tracing::trace!(attempt, "acknowledgement not ready");
                    self.delay.delay_us(self.config.poll_interval_us);
                }
                Err(e) => return Err(CompanionError::Bus(e)),
            }
        }

        tracing::error!(attempts = self.config.poll_attempts, "companion handshake timed out");
        Err(CompanionError::Timeout {
            attempts: self.config.poll_attempts,
        })
    }
}

impl<I2C, D, E> Actuator for CompanionLink<I2C, D>
where
    I2C: I2c<Error = E>,
    D: DelayNs,
    E: I2cError,
{
    type Error = CompanionError<E>;

    fn steer(
        &mut self,
        duty: u8,
    ) -> Result<(), Self::Error> {
        self.handshake(CommandFamily::Steer, duty)
    }

    fn shift(
        &mut self,
        gear: Gear,
    ) -> Result<(), Self::Error> {
        self.handshake(CommandFamily::Gear, gear.symbol() as u8)
    }

    /// The companion resumes manual mode in forward gear on its own.
    fn set_mode(
        &mut self,
        mode: DriveMode,
    ) -> Result<(), Self::Error> {
        self.handshake(CommandFamily::Mode, mode_payload(mode))
    }
}
