//! Control command decoding for the `/controls` endpoint.
//!
//! A request carries exactly one command, encoded in the URL query string.
//! Decoding runs in two stages that never touch the vehicle:
//!
//! - `query`: copy the raw query into a bounded buffer and extract named values
//! - `validate`: turn extracted strings into typed, range-checked values
//!
//! Only a fully decoded [`ControlCommand`] is handed to the actuator layer.

pub mod query;
pub mod validate;

use serde::Serialize;

use heapless::String;
use query::{ExtractError, QueryError, QueryString};

/// Content type sent with every `/controls` response. The body is always empty.
pub const CONTROL_CONTENT_TYPE: &str = "application/octet-stream";

/// Steering value the car boots with; values below it steer left.
pub const STEER_CENTER: u8 = 127;

/// Longest legal `steer` / `value`: a sign and three digits.
pub const STEER_LEN: usize = 4;
/// `gear` and `control` are a single character.
pub const SYMBOL_LEN: usize = 1;

/// Query keys understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlParam {
    Steer,
    Gear,
    Mode,
    /// Legacy numeric control id, paired with `Value`.
    Control,
    Value,
}

impl ControlParam {
    pub const fn key(self) -> &'static str {
        match self {
            ControlParam::Steer => "steer",
            ControlParam::Gear => "gear",
            ControlParam::Mode => "mode",
            ControlParam::Control => "control",
            ControlParam::Value => "value",
        }
    }
}

/// Symbolic drive direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gear {
    Backward,
    Forward,
    Neutral,
}

impl Gear {
    /// Query symbol for this gear (`B`, `F` or `N`).
    pub const fn symbol(self) -> char {
        match self {
            Gear::Backward => 'B',
            Gear::Forward => 'F',
            Gear::Neutral => 'N',
        }
    }

    pub const fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'B' => Some(Gear::Backward),
            'F' => Some(Gear::Forward),
            'N' => Some(Gear::Neutral),
            _ => None,
        }
    }
}

/// Who drives the car: the remote client or the on-board obstacle avoidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    Manual,
    ObstacleAvoidance,
}

impl DriveMode {
    pub const fn toggled(self) -> Self {
        match self {
            DriveMode::Manual => DriveMode::ObstacleAvoidance,
            DriveMode::ObstacleAvoidance => DriveMode::Manual,
        }
    }
}

/// A validated command, ready for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "cc", rename_all = "snake_case")] // cc = control command
pub enum ControlCommand {
    /// Steering duty, `0` full left to `255` full right.
    Steer { duty: u8 },
    /// Change drive direction.
    Shift { gear: Gear },
    /// Flip between manual control and obstacle avoidance.
    ToggleMode,
}

/// Everything that can go wrong before a command reaches the actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The request carried no query string at all.
    QueryUnavailable,
    /// The query does not fit the per-request buffer.
    QueryTooLarge { len: usize },
    /// The query could not be split into `key=value` pairs.
    MalformedQuery,
    /// None of the known command keys is present.
    MissingParameter,
    /// `control` was given without its `value`.
    MissingValue(ControlParam),
    /// The value does not fit the parameter's buffer.
    ValueTooLong(ControlParam),
    /// Steering value is empty or has non-digit characters.
    SteerNotNumeric,
    /// Steering value overflowed while parsing.
    SteerOverflow,
    SteerOutOfRange(i32),
    InvalidGear(Option<char>),
    UnknownControl,
    InvalidButtonEvent,
}

/// Terminal status of a `/controls` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Ok,
    BadRequest,
    InternalServerError,
}

impl ControlStatus {
    pub const fn code(self) -> u16 {
        match self {
            ControlStatus::Ok => 200,
            ControlStatus::BadRequest => 400,
            ControlStatus::InternalServerError => 500,
        }
    }
}

impl ControlError {
    /// Server-side failures (buffer, query parsing) map to 500, client mistakes to 400.
    pub const fn status(&self) -> ControlStatus {
        match self {
            ControlError::QueryUnavailable
            | ControlError::QueryTooLarge { .. }
            | ControlError::MalformedQuery => ControlStatus::InternalServerError,
            _ => ControlStatus::BadRequest,
        }
    }
}

impl From<QueryError> for ControlError {
    fn from(error: QueryError) -> Self {
        match error {
            QueryError::TooLarge { len } => ControlError::QueryTooLarge { len },
            QueryError::Malformed => ControlError::MalformedQuery,
        }
    }
}

/// Decode a raw `/controls` query string into a single command.
///
/// Keys are tried in order `steer`, `control`, `gear`, `mode`; the first one
/// present decides the command and the rest of the query is ignored.
pub fn decode(raw: Option<&str>) -> Result<ControlCommand, ControlError> {
    let raw = raw.ok_or(ControlError::QueryUnavailable)?;
    let query = QueryString::new(raw)?;
    tracing::debug!(query = query.as_str(), "parsing control query");

    if let Some(value) = lookup::<STEER_LEN>(&query, ControlParam::Steer)? {
        let duty = validate::steer(&value)?;
        return Ok(ControlCommand::Steer { duty });
    }

    if let Some(id) = lookup::<SYMBOL_LEN>(&query, ControlParam::Control)? {
        let id = validate::control_id(&id)?;
        let value = lookup::<STEER_LEN>(&query, ControlParam::Value)?
            .ok_or(ControlError::MissingValue(ControlParam::Value))?;
        return validate::legacy_control(id, &value);
    }

    if let Some(value) = lookup::<SYMBOL_LEN>(&query, ControlParam::Gear)? {
        let gear = validate::gear(&value)?;
        return Ok(ControlCommand::Shift { gear });
    }

    if query.contains(ControlParam::Mode.key()) {
        return Ok(ControlCommand::ToggleMode);
    }

    Err(ControlError::MissingParameter)
}

/// Extract one parameter, turning "absent" into `None`.
fn lookup<const N: usize>(
    query: &QueryString,
    param: ControlParam,
) -> Result<Option<String<N>>, ControlError> {
    match query.extract::<N>(param.key()) {
        Ok(value) => {
            tracing::debug!(key = param.key(), value = value.as_str(), "parameter parsed");
            Ok(Some(value))
        }
        Err(ExtractError::NotFound) => Ok(None),
        Err(ExtractError::Truncated) => {
            tracing::warn!(key = param.key(), "parameter value too long");
            Err(ControlError::ValueTooLong(param))
        }
    }
}
