//! # Front Panel Link
//!
//! Talks to the physical toggle-switch/LED panel over a bit-serial link: two
//! shift registers sharing one SPI device, sequenced with five GPIO control
//! lines.
//!
//! ```text
//! panel/
//! ├── codec.rs       - switch decode / LED word packing (pure)
//! ├── bus.rs         - GPIO + SPI primitives, rppal implementation
//! ├── link.rs        - FrontPanelLink typestate (initialize, read, write)
//! ├── dispatcher.rs  - edge-triggered command dispatch
//! └── error.rs       - PanelError
//! ```
//!
//! ## Failure model
//!
//! A switch read that does not return a whole frame is fatal: the panel is
//! assumed to be always attached, so a short frame means the hardware is
//! broken. It is surfaced as [`PanelError::ShortRead`] and the caller ends
//! the process with [`PanelError::exit_code`]. A short LED write only costs a
//! frame of lights and is logged.

pub mod bus;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod link;

pub use bus::{ControlLine, GpioSpiBus, LineLevel, PanelBus, PanelPins, SpiSettings};
pub use codec::{decode_address, encode_address, PanelStatus, SwitchFrame};
pub use dispatcher::{CommandDispatcher, CommandSink, PanelReading, SwitchSource};
pub use error::PanelError;
pub use link::{FrontPanelLink, LinkState, Ready, Uninitialized};
