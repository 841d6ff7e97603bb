//! Conversion of extracted query values into typed commands.

use core::num::IntErrorKind;

use super::{ControlCommand, ControlError, Gear};

/// Numeric ids of the legacy `control`/`value` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlId {
    Steer,
    ForwardButton,
    BackwardButton,
}

/// Steering duty: base-10, fully consumed, within `0..=255`.
pub fn steer(raw: &str) -> Result<u8, ControlError> {
    let value: i32 = raw.parse().map_err(|e: core::num::ParseIntError| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => ControlError::SteerOverflow,
        _ => ControlError::SteerNotNumeric,
    })?;

    u8::try_from(value).map_err(|_| {
        tracing::warn!(value, "steering value not in range");
        ControlError::SteerOutOfRange(value)
    })
}

/// Gear symbol; only the first character is significant.
pub fn gear(raw: &str) -> Result<Gear, ControlError> {
    let symbol = raw.chars().next();
    symbol
        .and_then(Gear::from_symbol)
        .ok_or(ControlError::InvalidGear(symbol))
}

pub fn control_id(raw: &str) -> Result<ControlId, ControlError> {
    match raw {
        "0" => Ok(ControlId::Steer),
        "1" => Ok(ControlId::ForwardButton),
        "2" => Ok(ControlId::BackwardButton),
        _ => Err(ControlError::UnknownControl),
    }
}

/// Resolve a legacy `control`/`value` pair.
///
/// Steering takes a duty value. The direction buttons take `0` (pressed),
/// which engages the gear, or `1` (released), which returns to neutral.
pub fn legacy_control(
    id: ControlId,
    value: &str,
) -> Result<ControlCommand, ControlError> {
    let gear = match (id, value) {
        (ControlId::Steer, _) => {
            return steer(value).map(|duty| ControlCommand::Steer { duty });
        }
        (_, "1") => Gear::Neutral,
        (ControlId::ForwardButton, "0") => Gear::Forward,
        (ControlId::BackwardButton, "0") => Gear::Backward,
        _ => return Err(ControlError::InvalidButtonEvent),
    };
    Ok(ControlCommand::Shift { gear })
}
