//! Edge-triggered command dispatch for the front panel switches

use super::codec::SwitchFrame;
use super::error::PanelError;
use super::link::{FrontPanelLink, Ready};
use tokio::sync::watch;
use tracing::{debug, info};

/// Command byte reported with every switch released
pub const NOP: u8 = 0x00;

/// Anything that can deliver switch frames
pub trait SwitchSource {
    fn read_switches(&mut self) -> Result<SwitchFrame, PanelError>;
}

impl SwitchSource for FrontPanelLink<Ready> {
    fn read_switches(&mut self) -> Result<SwitchFrame, PanelError> {
        FrontPanelLink::<Ready>::read_switches(self)
    }
}

/// Decoded switch state of one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PanelReading {
    pub address: u16,
    pub cmd: u8,
}

/// Receives commands when the command switches change
pub trait CommandSink {
    fn on_command(&mut self, reading: PanelReading);
}

impl<F> CommandSink for F
where
    F: FnMut(PanelReading),
{
    fn on_command(&mut self, reading: PanelReading) {
        self(reading)
    }
}

/// Polls the switches and fires the sink only when the command byte changes.
///
/// The address switches are published on every poll through a watch channel
/// so displays can follow them; holding a command switch does not repeat
/// its action.
pub struct CommandDispatcher {
    last_command: u8,
    reading_tx: watch::Sender<PanelReading>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        let (reading_tx, _) = watch::channel(PanelReading::default());
        Self {
            last_command: NOP,
            reading_tx,
        }
    }

    /// Receiver for the switch state seen on the latest poll
    pub fn subscribe(&self) -> watch::Receiver<PanelReading> {
        self.reading_tx.subscribe()
    }

    /// Current address switch value
    pub fn bus_switches(&self) -> u16 {
        self.reading_tx.borrow().address
    }

    pub fn last_command(&self) -> u8 {
        self.last_command
    }

    /// One poll cycle. Returns whether the sink fired.
    ///
    /// A fatal read error is handed back untouched; the dispatcher state is
    /// left as it was.
    pub fn poll<S, C>(&mut self, source: &mut S, sink: &mut C) -> Result<bool, PanelError>
    where
        S: SwitchSource,
        C: CommandSink,
    {
        let frame = source.read_switches()?;
        let reading = PanelReading {
            address: frame.address(),
            cmd: frame.cmd,
        };

        self.reading_tx.send_replace(reading);

        if reading.cmd == self.last_command {
            return Ok(false);
        }

        debug!(
            "Command switches changed: {:#04x} -> {:#04x}",
            self.last_command, reading.cmd
        );
        self.last_command = reading.cmd;
        info!(
            "Dispatching panel command {:#04x} (address {:#06x})",
            reading.cmd, reading.address
        );
        sink.on_command(reading);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::codec::encode_address;
    use crate::panel::link::testing::{ready_link, MockBus};
    use std::collections::VecDeque;

    struct Frames(VecDeque<SwitchFrame>);

    impl Frames {
        fn commands(cmds: &[u8]) -> Self {
            Self(
                cmds.iter()
                    .map(|&cmd| SwitchFrame {
                        cmd,
                        raw_address: encode_address(0x1234),
                    })
                    .collect(),
            )
        }
    }

    impl SwitchSource for Frames {
        fn read_switches(&mut self) -> Result<SwitchFrame, PanelError> {
            self.0.pop_front().ok_or(PanelError::ShortRead {
                expected: 3,
                actual: 0,
            })
        }
    }

    #[test]
    fn repeated_commands_fire_once() {
        let mut dispatcher = CommandDispatcher::new();
        let mut source = Frames::commands(&[1, 1, 1, 2, 2, 3]);
        let mut fired = Vec::new();
        let mut sink = |reading: PanelReading| fired.push(reading.cmd);

        for _ in 0..6 {
            dispatcher.poll(&mut source, &mut sink).unwrap();
        }

        assert_eq!(fired, vec![1, 2, 3]);
    }

    #[test]
    fn bus_value_updates_without_command_change() {
        let mut dispatcher = CommandDispatcher::new();
        let rx = dispatcher.subscribe();
        let mut source = Frames(VecDeque::from(vec![SwitchFrame {
            cmd: NOP,
            raw_address: encode_address(0xbeef),
        }]));
        let mut sink = |_: PanelReading| panic!("no command expected");

        let fired = dispatcher.poll(&mut source, &mut sink).unwrap();

        assert!(!fired);
        assert_eq!(dispatcher.bus_switches(), 0xbeef);
        assert_eq!(rx.borrow().address, 0xbeef);
    }

    #[test]
    fn fatal_read_propagates() {
        let mut dispatcher = CommandDispatcher::new();
        let mut source = Frames(VecDeque::new());
        let mut sink = |_: PanelReading| {};

        let err = dispatcher.poll(&mut source, &mut sink).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(dispatcher.last_command(), NOP);
    }

    #[test]
    fn polls_a_real_link() {
        let bus = MockBus::default();
        let mut link = ready_link(&bus);
        bus.queue_read(&[0xff, 0xff, 0x04]);

        let mut dispatcher = CommandDispatcher::new();
        let mut seen = None;
        let mut sink = |reading: PanelReading| seen = Some(reading);
        dispatcher.poll(&mut link, &mut sink).unwrap();

        assert_eq!(
            seen,
            Some(PanelReading {
                address: 0x0000,
                cmd: 0x04
            })
        );
    }
}
