//! Utility re-exports and helper macros for the camera car.
//!
//! - `connection`: HTTP server exposing `/controls` and `/status`
//! - `controls`: query extraction and command validation
//! - `controllers`: actuator state, direct-drive and companion actuators
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod connection;
pub mod controllers;
pub mod controls;

pub use connection::server::run as http;
pub use controllers::{CarController, CONTROL_LINK};
pub use controls::{decode, ControlCommand, ControlError, ControlStatus};
pub use embassy_time::*;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
