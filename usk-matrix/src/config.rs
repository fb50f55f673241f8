//! Static configuration: expander addresses, pin tables and matrix layout.
//!
//! Pin tables are meant to live in `const` items. The `const fn`
//! constructors assert their ranges, so a bad entry in a board table is a
//! compile error rather than a runtime surprise.

use core::fmt;
use core::ops::Range;

use heapless::Vec;

use crate::error::ConfigError;

/// Rows per matrix (the debounce buffers are sized by this).
pub const MAX_ROWS: usize = 16;
/// Columns per matrix; one row of state fits a `u32`.
pub const MAX_COLS: usize = 32;
/// Expander chips sharing the bus.
pub const MAX_CHIPS: usize = 8;
/// Optional modules besides the main matrix.
pub const MAX_PERIPHERALS: usize = 4;
/// Events a single poll cycle can hold in a fixed-size sink.
pub const MAX_EVENTS: usize = 64;

/// A 7-bit I2C address of one GPIO expander.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpanderAddress(u8);

impl ExpanderAddress {
    pub const fn new(addr: u8) -> Self {
        assert!(addr <= 0x7F, "expander address must be 7-bit");
        Self(addr)
    }

    pub const fn try_new(addr: u8) -> Result<Self, ConfigError> {
        if addr <= 0x7F {
            Ok(Self(addr))
        } else {
            Err(ConfigError::AddressOutOfRange(addr))
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ExpanderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// One GPIO line: an expander address plus a pin index 0-15.
///
/// Indices 0-7 are port A and 8-15 port B, matching the MCP23017 naming
/// `A0..A7`, `B0..B7`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PinRef {
    address: ExpanderAddress,
    pin: u8,
}

impl PinRef {
    pub const PINS_PER_CHIP: u8 = 16;

    pub const fn new(address: u8, pin: u8) -> Self {
        assert!(pin < Self::PINS_PER_CHIP, "pin index must be 0-15");
        Self {
            address: ExpanderAddress::new(address),
            pin,
        }
    }

    /// Port A pin `n` (`A0..A7`).
    pub const fn a(address: u8, n: u8) -> Self {
        assert!(n < 8, "port pin must be 0-7");
        Self::new(address, n)
    }

    /// Port B pin `n` (`B0..B7`).
    pub const fn b(address: u8, n: u8) -> Self {
        assert!(n < 8, "port pin must be 0-7");
        Self::new(address, 8 + n)
    }

    pub fn try_new(address: u8, pin: u8) -> Result<Self, ConfigError> {
        let address = ExpanderAddress::try_new(address)?;
        if pin >= Self::PINS_PER_CHIP {
            return Err(ConfigError::PinOutOfRange(pin));
        }
        Ok(Self { address, pin })
    }

    pub const fn address(self) -> ExpanderAddress {
        self.address
    }

    pub const fn pin(self) -> u8 {
        self.pin
    }

    /// Bit of this pin in a 16-bit port-pair register image.
    pub(crate) const fn mask(self) -> u16 {
        1 << self.pin
    }

    pub(crate) const fn is_port_b(self) -> bool {
        self.pin >= 8
    }

    /// Both pins are latched by the same 8-bit register.
    pub(crate) fn same_port(self, other: PinRef) -> bool {
        self.address == other.address && self.is_port_b() == other.is_port_b()
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = if self.is_port_b() { 'B' } else { 'A' };
        write!(f, "{}:{}{}", self.address, port, self.pin % 8)
    }
}

/// Pin direction, fixed at init.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input { pull_up: bool },
}

/// Output drive level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    High,
    Low,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Layout of one strobe/sense matrix.
///
/// `row_offset` places the matrix in the merged coordinate space: 0 for the
/// main matrix, the main row count for a module stacked below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatrixTopology {
    pub rows: &'static [PinRef],
    pub cols: &'static [PinRef],
    pub row_offset: u8,
}

impl MatrixTopology {
    pub const fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub const fn col_count(&self) -> usize {
        self.cols.len()
    }

    /// Logical rows this matrix occupies.
    pub fn logical_rows(&self) -> Range<usize> {
        let start = self.row_offset as usize;
        start..start + self.rows.len()
    }

    /// Every pin the matrix touches, strobes first.
    pub fn pins(&self) -> impl Iterator<Item = PinRef> + '_ {
        self.rows.iter().chain(self.cols.iter()).copied()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows.is_empty() || self.cols.is_empty() {
            return Err(ConfigError::EmptyMatrix);
        }
        if self.rows.len() > MAX_ROWS {
            return Err(ConfigError::TooManyRows(self.rows.len()));
        }
        if self.cols.len() > MAX_COLS {
            return Err(ConfigError::TooManyColumns(self.cols.len()));
        }
        // Logical rows are reported as u8.
        if self.logical_rows().end > usize::from(u8::MAX) + 1 {
            return Err(ConfigError::TooManyRows(self.logical_rows().end));
        }
        for (i, pin) in self.pins().enumerate() {
            if self.pins().skip(i + 1).any(|other| other == pin) {
                return Err(ConfigError::DuplicatePin(pin));
            }
        }
        Ok(())
    }
}

/// An optional module discovered by a probe at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeripheralConfig {
    pub name: &'static str,
    pub address: ExpanderAddress,
    pub topology: MatrixTopology,
}

/// Everything a build fixes at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyboardConfig {
    pub name: &'static str,
    pub main: MatrixTopology,
    pub peripherals: &'static [PeripheralConfig],
    /// Consecutive differing samples before a key flips.
    pub debounce: u8,
    /// Wait between driving a strobe and reading the sense lines.
    pub settle_us: u32,
}

impl KeyboardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        if self.peripherals.len() > MAX_PERIPHERALS {
            return Err(ConfigError::TooManyPeripherals(self.peripherals.len()));
        }
        self.main.validate()?;

        let mut chips: Vec<ExpanderAddress, MAX_CHIPS> = Vec::new();
        for pin in self.main.pins() {
            note_chip(&mut chips, pin.address())?;
        }

        for (i, peripheral) in self.peripherals.iter().enumerate() {
            peripheral.topology.validate()?;
            if let Some(pin) = peripheral
                .topology
                .pins()
                .find(|pin| pin.address() != peripheral.address)
            {
                return Err(ConfigError::PinOffChip {
                    pin,
                    expected: peripheral.address,
                });
            }
            if chips.contains(&peripheral.address) {
                return Err(ConfigError::SharedAddress(peripheral.address));
            }
            note_chip(&mut chips, peripheral.address)?;

            let rows = peripheral.topology.logical_rows();
            let earlier = core::iter::once(&self.main)
                .chain(self.peripherals[..i].iter().map(|p| &p.topology));
            for topology in earlier {
                let taken = topology.logical_rows();
                if rows.start < taken.end && taken.start < rows.end {
                    return Err(ConfigError::OverlappingRows {
                        row: rows.start.max(taken.start),
                    });
                }
            }
        }
        Ok(())
    }

    /// Total rows of the merged space when every peripheral is attached.
    pub fn total_rows(&self) -> usize {
        self.peripherals
            .iter()
            .map(|p| p.topology.logical_rows().end)
            .fold(self.main.logical_rows().end, usize::max)
    }

    /// Strobe and sense pins behind a logical key position.
    pub fn locate(&self, row: u8, col: u8) -> Option<(PinRef, PinRef)> {
        let row = row as usize;
        let col = col as usize;
        core::iter::once(&self.main)
            .chain(self.peripherals.iter().map(|p| &p.topology))
            .find(|t| t.logical_rows().contains(&row))
            .and_then(|t| {
                let strobe = t.rows[row - t.row_offset as usize];
                t.cols.get(col).map(|&sense| (strobe, sense))
            })
    }
}

fn note_chip(
    chips: &mut Vec<ExpanderAddress, MAX_CHIPS>,
    address: ExpanderAddress,
) -> Result<(), ConfigError> {
    if !chips.contains(&address) {
        chips.push(address).map_err(|_| ConfigError::TooManyChips)?;
    }
    Ok(())
}
