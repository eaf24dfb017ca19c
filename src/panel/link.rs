//! Front panel link with statum typestate lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──► Ready ──read_switches()/write_status()
//! ```
//!
//! Switch reads and status writes only exist on `FrontPanelLink<Ready>`, so a
//! transaction against an unopened device cannot be expressed.

use super::bus::{ControlLine, LineLevel, PanelBus, SpiSettings};
use super::codec::{PanelStatus, SwitchFrame, STATUS_WORD_LEN, SWITCH_FRAME_LEN};
use super::error::PanelError;
use statum::{machine, state};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay between the diagnostic LED patterns
pub const DIAGNOSTIC_SETTLE: Duration = Duration::from_millis(500);

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Uninitialized,
    Ready,
}

#[machine]
pub struct FrontPanelLink<LinkState> {
    bus: Box<dyn PanelBus>,
    settings: SpiSettings,
    settle: Duration,
}

impl<S: LinkStateTrait> FrontPanelLink<S> {
    pub fn settings(&self) -> &SpiSettings {
        &self.settings
    }
}

impl FrontPanelLink<Uninitialized> {
    pub fn create(bus: Box<dyn PanelBus>, settings: SpiSettings) -> Self {
        Self::new(bus, settings, DIAGNOSTIC_SETTLE)
    }

    /// Overrides the pause between diagnostic patterns
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Parks all control lines, opens the serial device and flashes the
    /// diagnostic pattern.
    ///
    /// Every line is released before it is claimed again, so running this on
    /// lines left open by an earlier attempt is fine.
    pub fn initialize(mut self) -> Result<FrontPanelLink<Ready>, PanelError> {
        info!("Initializing front panel link");

        for line in ControlLine::ALL {
            self.bus.close_line(line);
        }
        for line in ControlLine::ALL {
            self.bus.open_line(line, line.safe_level())?;
        }

        if let Err(e) = self.bus.open_device(&self.settings) {
            error!("Failed to open panel device: {}", e);
            return Err(e);
        }

        let settle = self.settle;
        let mut ready: FrontPanelLink<Ready> = self.transition();

        // short pattern writes are not fatal
        for pattern in [
            PanelStatus::new(0xff, 0xff, 0xffff),
            PanelStatus::new(0xaa, 0xaa, 0xaaaa),
        ] {
            match ready.write_status(pattern) {
                Ok(()) | Err(PanelError::ShortWrite { .. }) => {}
                Err(e) => return Err(e),
            }
            std::thread::sleep(settle);
        }

        info!("Front panel link ready");
        Ok(ready)
    }
}

impl FrontPanelLink<Ready> {
    /// Latches and reads the switches.
    ///
    /// Anything but a full frame is returned as [`PanelError::ShortRead`],
    /// which callers must treat as fatal.
    pub fn read_switches(&mut self) -> Result<SwitchFrame, PanelError> {
        let mut rx = [0u8; SWITCH_FRAME_LEN];

        self.bus.set_line(ControlLine::SwitchChipSelect, LineLevel::Low)?;
        self.bus.set_line(ControlLine::SwitchLoad, LineLevel::Low)?;
        self.bus.set_line(ControlLine::SwitchLoad, LineLevel::High)?;

        let read = self.bus.read(&mut rx);

        if let Err(e) = self.bus.set_line(ControlLine::SwitchChipSelect, LineLevel::High) {
            warn!("Failed to release switch chip-select: {}", e);
        }

        let count = match read {
            Ok(count) => count,
            Err(e) => {
                error!("Switch read failed: {}", e);
                0
            }
        };

        match rx.get(..count).and_then(SwitchFrame::from_bytes) {
            Some(frame) => {
                debug!(
                    "Switch frame: cmd={:#04x} raw={:#06x}",
                    frame.cmd, frame.raw_address
                );
                Ok(frame)
            }
            None => {
                error!(
                    "Switch read returned {} of {} bytes",
                    count, SWITCH_FRAME_LEN
                );
                Err(PanelError::ShortRead {
                    expected: SWITCH_FRAME_LEN,
                    actual: count,
                })
            }
        }
    }

    /// Shifts a status word out to the LEDs.
    ///
    /// A short write is logged and reported but leaves the link usable.
    pub fn write_status(&mut self, status: PanelStatus) -> Result<(), PanelError> {
        let bytes = status.to_bytes();

        self.bus.set_line(ControlLine::LedStore, LineLevel::Low)?;
        let written = self.bus.write(&bytes);
        self.bus.set_line(ControlLine::LedStore, LineLevel::High)?;

        match written {
            Ok(count) if count == STATUS_WORD_LEN => Ok(()),
            Ok(count) => {
                warn!("Front panel write failed: {} of {} bytes", count, STATUS_WORD_LEN);
                Err(PanelError::ShortWrite {
                    expected: STATUS_WORD_LEN,
                    actual: count,
                })
            }
            Err(e) => {
                warn!("Front panel write failed: {}", e);
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ready_link, BusOp, MockBus};
    use super::*;

    #[test]
    fn initialize_parks_lines_and_flashes_pattern() {
        let bus = MockBus::default();
        let _link = ready_link(&bus);

        let ops = bus.ops();
        for line in ControlLine::ALL {
            assert!(ops.contains(&BusOp::Open(line, line.safe_level())));
        }
        assert_eq!(bus.level(ControlLine::SwitchChipSelect), Some(LineLevel::High));
        assert_eq!(bus.level(ControlLine::LedOutputEnable), Some(LineLevel::Low));

        let writes: Vec<Vec<u8>> = ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![vec![0xff; 4], vec![0xaa; 4]]);
    }

    #[test]
    fn initialize_twice_reclaims_lines() {
        let bus = MockBus::default();
        let _first = ready_link(&bus);
        let _second = ready_link(&bus);
        assert_eq!(bus.level(ControlLine::LedStore), Some(LineLevel::High));
    }

    #[test]
    fn initialize_fails_without_device() {
        let bus = MockBus::default();
        bus.state.lock().unwrap().fail_open_device = true;
        let result = FrontPanelLink::create(Box::new(bus.clone()), SpiSettings::default())
            .with_settle(Duration::ZERO)
            .initialize();
        assert!(matches!(result, Err(PanelError::Spi(_))));
    }

    #[test]
    fn short_diagnostic_write_still_initializes() {
        let bus = MockBus::default();
        bus.state.lock().unwrap().write_limit = Some(3);

        let result = FrontPanelLink::create(Box::new(bus.clone()), SpiSettings::default())
            .with_settle(Duration::ZERO)
            .initialize();

        assert!(result.is_ok());
        let writes = bus
            .ops()
            .iter()
            .filter(|op| matches!(op, BusOp::Write(_)))
            .count();
        assert_eq!(writes, 2);
    }

    #[test]
    fn read_pulses_load_inside_chip_select() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.clear_ops();
        bus.queue_read(&[0x0a, 0x00, 0x02]);

        let frame = link.read_switches().unwrap();
        assert_eq!(frame.cmd, 0x02);
        assert_eq!(frame.address(), 0xffaf);

        assert_eq!(
            bus.ops(),
            vec![
                BusOp::Set(ControlLine::SwitchChipSelect, LineLevel::Low),
                BusOp::Set(ControlLine::SwitchLoad, LineLevel::Low),
                BusOp::Set(ControlLine::SwitchLoad, LineLevel::High),
                BusOp::Read(3),
                BusOp::Set(ControlLine::SwitchChipSelect, LineLevel::High),
            ]
        );
    }

    #[test]
    fn short_read_is_fatal_and_releases_chip_select() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.queue_read(&[0x00, 0x00]);

        let err = link.read_switches().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            PanelError::ShortRead {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(bus.level(ControlLine::SwitchChipSelect), Some(LineLevel::High));
    }

    #[test]
    fn failed_transfer_is_a_fatal_empty_read() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.state.lock().unwrap().fail_read = true;

        let err = link.read_switches().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.exit_code(), Some(4));
        assert!(matches!(
            err,
            PanelError::ShortRead {
                expected: 3,
                actual: 0
            }
        ));
        assert_eq!(bus.level(ControlLine::SwitchChipSelect), Some(LineLevel::High));
    }

    #[test]
    fn status_write_is_framed_by_store_strobe() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.clear_ops();

        link.write_status(PanelStatus::new(0x01, 0x02, 0x0304)).unwrap();
        assert_eq!(
            bus.ops(),
            vec![
                BusOp::Set(ControlLine::LedStore, LineLevel::Low),
                BusOp::Write(vec![0x04, 0x03, 0x02, 0x01]),
                BusOp::Set(ControlLine::LedStore, LineLevel::High),
            ]
        );
    }

    #[test]
    fn short_write_is_not_fatal() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.state.lock().unwrap().write_limit = Some(2);

        let err = link.write_status(PanelStatus::default()).unwrap_err();
        assert!(!err.is_fatal());

        // link stays usable
        bus.state.lock().unwrap().write_limit = None;
        link.write_status(PanelStatus::default()).unwrap();
    }
}
