//! Hardware primitives behind the front panel link
//!
//! [`PanelBus`] is the seam between the panel protocol and the driver: five
//! GPIO control lines plus one SPI device. [`GpioSpiBus`] implements it on a
//! Raspberry Pi with `rppal`.

use super::error::PanelError;
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Logic level of a control line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLevel {
    Low,
    High,
}

/// The control lines used by the panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLine {
    /// Latches the switch state into the shift register on a low pulse
    SwitchLoad,
    /// Switch register chip-select, active-low
    SwitchChipSelect,
    /// LED register master reset, active-low
    LedMasterReset,
    /// Moves shifted data to the LED outputs on the rising edge
    LedStore,
    /// LED output enable, active-low
    LedOutputEnable,
}

impl ControlLine {
    pub const ALL: [ControlLine; 5] = [
        ControlLine::SwitchLoad,
        ControlLine::SwitchChipSelect,
        ControlLine::LedMasterReset,
        ControlLine::LedStore,
        ControlLine::LedOutputEnable,
    ];

    /// Level the line is parked at after initialization
    pub fn safe_level(self) -> LineLevel {
        match self {
            ControlLine::LedOutputEnable => LineLevel::Low,
            _ => LineLevel::High,
        }
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlLine::SwitchLoad => write!(f, "switch-load"),
            ControlLine::SwitchChipSelect => write!(f, "switch-cs"),
            ControlLine::LedMasterReset => write!(f, "led-master-reset"),
            ControlLine::LedStore => write!(f, "led-store"),
            ControlLine::LedOutputEnable => write!(f, "led-output-enable"),
        }
    }
}

/// BCM pin numbers of the control lines
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PanelPins {
    pub switch_load: u8,
    pub switch_chip_select: u8,
    pub led_master_reset: u8,
    pub led_store: u8,
    pub led_output_enable: u8,
}

impl Default for PanelPins {
    fn default() -> Self {
        Self {
            switch_load: 5,
            switch_chip_select: 0,
            led_master_reset: 22,
            led_store: 27,
            led_output_enable: 17,
        }
    }
}

impl PanelPins {
    pub fn pin(&self, line: ControlLine) -> u8 {
        match line {
            ControlLine::SwitchLoad => self.switch_load,
            ControlLine::SwitchChipSelect => self.switch_chip_select,
            ControlLine::LedMasterReset => self.led_master_reset,
            ControlLine::LedStore => self.led_store,
            ControlLine::LedOutputEnable => self.led_output_enable,
        }
    }
}

/// Transaction configuration of the serial device
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct SpiSettings {
    pub bus: u8,
    pub slave_select: u8,
    /// SPI clock mode 0-3
    pub mode: u8,
    pub clock_hz: u32,
    /// Inter-transfer delay; rppal's plain read/write ignores it
    pub delay_us: u16,
    pub bits_per_word: u8,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            bus: 0,
            slave_select: 0,
            mode: 2,
            clock_hz: 5_000_000,
            delay_us: 1,
            bits_per_word: 8,
        }
    }
}

/// Driver primitives the panel link sequences.
///
/// Reads and writes are synchronous and report the number of bytes actually
/// transferred; judging a short transfer is up to the caller.
pub trait PanelBus: Send {
    /// Releases a line. Releasing a line that is not open is a no-op.
    fn close_line(&mut self, line: ControlLine);

    /// Claims a line as output, driven to `level`
    fn open_line(&mut self, line: ControlLine, level: LineLevel) -> Result<(), PanelError>;

    fn set_line(&mut self, line: ControlLine, level: LineLevel) -> Result<(), PanelError>;

    fn open_device(&mut self, settings: &SpiSettings) -> Result<(), PanelError>;

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PanelError>;

    fn write(&mut self, buffer: &[u8]) -> Result<usize, PanelError>;
}

/// `rppal` implementation of [`PanelBus`]
pub struct GpioSpiBus {
    gpio: Gpio,
    pins: PanelPins,
    lines: HashMap<ControlLine, OutputPin>,
    spi: Option<Spi>,
}

impl GpioSpiBus {
    pub fn new(pins: PanelPins) -> Result<Self, PanelError> {
        let gpio = Gpio::new().map_err(|e| PanelError::GpioUnavailable(e.to_string()))?;
        info!("GPIO peripheral opened, pins: {:?}", pins);

        Ok(Self {
            gpio,
            pins,
            lines: HashMap::new(),
            spi: None,
        })
    }

    fn line_mut(&mut self, line: ControlLine) -> Result<&mut OutputPin, PanelError> {
        let pin = self.pins.pin(line);
        self.lines.get_mut(&line).ok_or_else(|| PanelError::Gpio {
            line: pin,
            reason: format!("{} is not open", line),
        })
    }

    fn spi_mut(&mut self) -> Result<&mut Spi, PanelError> {
        self.spi
            .as_mut()
            .ok_or_else(|| PanelError::Spi("device not open".to_string()))
    }
}

impl PanelBus for GpioSpiBus {
    fn close_line(&mut self, line: ControlLine) {
        if self.lines.remove(&line).is_some() {
            debug!("Released {}", line);
        }
    }

    fn open_line(&mut self, line: ControlLine, level: LineLevel) -> Result<(), PanelError> {
        let pin = self.pins.pin(line);
        let gpio_pin = self.gpio.get(pin).map_err(|e| PanelError::Gpio {
            line: pin,
            reason: e.to_string(),
        })?;

        let mut output = match level {
            LineLevel::Low => gpio_pin.into_output_low(),
            LineLevel::High => gpio_pin.into_output_high(),
        };
        output.set_reset_on_drop(false);

        debug!("Opened {} (BCM {}) at {:?}", line, pin, level);
        self.lines.insert(line, output);
        Ok(())
    }

    fn set_line(&mut self, line: ControlLine, level: LineLevel) -> Result<(), PanelError> {
        let output = self.line_mut(line)?;
        match level {
            LineLevel::Low => output.set_low(),
            LineLevel::High => output.set_high(),
        }
        Ok(())
    }

    fn open_device(&mut self, settings: &SpiSettings) -> Result<(), PanelError> {
        let bus = match settings.bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            other => return Err(PanelError::Spi(format!("unsupported bus {}", other))),
        };
        let slave_select = match settings.slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => {
                return Err(PanelError::Spi(format!(
                    "unsupported slave select {}",
                    other
                )))
            }
        };
        let mode = match settings.mode {
            0 => Mode::Mode0,
            1 => Mode::Mode1,
            2 => Mode::Mode2,
            3 => Mode::Mode3,
            other => return Err(PanelError::Spi(format!("unsupported mode {}", other))),
        };

        let spi = Spi::new(bus, slave_select, settings.clock_hz, mode)
            .map_err(|e| PanelError::Spi(e.to_string()))?;
        spi.set_bits_per_word(settings.bits_per_word)
            .map_err(|e| PanelError::Spi(e.to_string()))?;

        if settings.delay_us != 0 {
            warn!(
                "Configured {}us transfer delay is not applied on plain reads/writes",
                settings.delay_us
            );
        }

        info!(
            "Opened SPI bus {} ss {} mode {} at {} Hz",
            settings.bus, settings.slave_select, settings.mode, settings.clock_hz
        );
        self.spi = Some(spi);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, PanelError> {
        self.spi_mut()?
            .read(buffer)
            .map_err(|e| PanelError::Transfer(e.to_string()))
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize, PanelError> {
        self.spi_mut()?
            .write(buffer)
            .map_err(|e| PanelError::Transfer(e.to_string()))
    }
}
