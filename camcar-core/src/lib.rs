//! Control decoding and actuator dispatch for the ESP32 camera car on no-std platforms.
//!
//! For a runnable host simulation, see the `camcar-app/mock-mcu` binary.
#![no_std]

pub mod utils;
