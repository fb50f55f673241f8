//! Boot-time detection of optional modules.
//!
//! Each peripheral is probed exactly once, before the first scan. A module
//! that is absent at that point stays absent until the next cold boot, even
//! if it is plugged in later.

use crate::config::{MatrixTopology, PeripheralConfig};
use crate::expander::ExpanderPort;
use crate::matrix::Matrix;

/// Probe outcome as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attachment {
    NotProbed,
    Absent,
    Attached(MatrixTopology),
}

enum State {
    NotProbed,
    Absent,
    Attached(Matrix),
}

pub struct Peripheral {
    config: PeripheralConfig,
    state: State,
}

impl Peripheral {
    pub const fn new(config: PeripheralConfig) -> Self {
        Self {
            config,
            state: State::NotProbed,
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn attachment(&self) -> Attachment {
        match &self.state {
            State::NotProbed => Attachment::NotProbed,
            State::Absent => Attachment::Absent,
            State::Attached(_) => Attachment::Attached(self.config.topology),
        }
    }

    /// Probe the module's address and, if it answers, configure its pins.
    /// Only the first call does anything; later calls return the settled
    /// state.
    pub fn probe<P: ExpanderPort + ?Sized>(&mut self, port: &mut P, debounce: u8) -> Attachment {
        if !matches!(self.state, State::NotProbed) {
            return self.attachment();
        }

        let name = self.config.name;
        let address = self.config.address;
        self.state = match port.probe(address) {
            Ok(()) => {
                let matrix = Matrix::new(self.config.topology, debounce);
                match matrix.init(port) {
                    Ok(()) => {
                        log::info!("{} attached at {}", name, address);
                        State::Attached(matrix)
                    }
                    Err(err) => {
                        log::warn!("{} answered at {} but setup failed: {}", name, address, err);
                        State::Absent
                    }
                }
            }
            Err(err) => {
                log::info!("{} not present at {} ({})", name, address, err);
                State::Absent
            }
        };
        self.attachment()
    }

    pub fn matrix(&self) -> Option<&Matrix> {
        match &self.state {
            State::Attached(matrix) => Some(matrix),
            _ => None,
        }
    }

    pub fn matrix_mut(&mut self) -> Option<&mut Matrix> {
        match &mut self.state {
            State::Attached(matrix) => Some(matrix),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Direction, ExpanderAddress, PinRef};
    use crate::error::Error;
    use crate::expander::Mcp23017;
    use crate::sim::SimBus;

    const PAD: PeripheralConfig = PeripheralConfig {
        name: "numpad",
        address: ExpanderAddress::new(0x23),
        topology: MatrixTopology {
            rows: &[PinRef::b(0x23, 0), PinRef::b(0x23, 1)],
            cols: &[PinRef::a(0x23, 0)],
            row_offset: 4,
        },
    };

    #[test]
    fn test_absent_stays_absent() {
        let mut port = Mcp23017::new(SimBus::new());
        let mut pad = Peripheral::new(PAD);
        assert_eq!(pad.attachment(), Attachment::NotProbed);
        assert_eq!(pad.probe(&mut port, 5), Attachment::Absent);

        port.bus_mut().attach(PAD.address);
        let before = port.bus().transactions();
        assert_eq!(pad.probe(&mut port, 5), Attachment::Absent);
        assert_eq!(port.bus().transactions(), before);
        assert!(pad.matrix().is_none());
    }

    #[test]
    fn test_attached_configures_pins() {
        let mut bus = SimBus::new();
        bus.attach(PAD.address);
        let mut port = Mcp23017::new(bus);
        let mut pad = Peripheral::new(PAD);

        assert_eq!(pad.probe(&mut port, 5), Attachment::Attached(PAD.topology));
        assert_eq!(port.direction(PinRef::b(0x23, 1)), Some(Direction::Output));
        assert_eq!(
            port.direction(PinRef::a(0x23, 0)),
            Some(Direction::Input { pull_up: true })
        );
        assert!(pad.matrix_mut().is_some());
    }

    #[test]
    fn test_setup_failure_after_probe_is_absent() {
        let mut bus = SimBus::new();
        bus.attach(PAD.address);
        // The probe gets through, the first register write does not
        bus.fail_after(PAD.address, 1, 1);
        let mut port = Mcp23017::new(bus);
        let mut pad = Peripheral::new(PAD);
        assert_eq!(pad.probe(&mut port, 5), Attachment::Absent);
    }

    #[test]
    fn test_probe_error_is_a_bus_error() {
        let mut port = Mcp23017::new(SimBus::new());
        assert!(matches!(
            port.probe(PAD.address),
            Err(Error::Bus { .. })
        ));
    }
}
