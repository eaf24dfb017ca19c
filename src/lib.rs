//! Boundary layer of an emulated Altair 8800: the front panel link
//! (switches and LEDs over SPI) and the MQTT remote channel.

pub mod comms;
pub mod config;
pub mod panel;
