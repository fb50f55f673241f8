//! Error types for the scanning core.
//!
//! Bus failures are reduced to [`ErrorKind`] so the error stays `Copy` and
//! independent of whichever I2C driver sits underneath.

use core::fmt;

use embedded_hal::i2c::ErrorKind;

use crate::config::{Direction, ExpanderAddress, PinRef};

/// Everything that can go wrong while configuring or scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A bus transaction to `address` failed or timed out.
    Bus { address: ExpanderAddress, kind: ErrorKind },
    /// A pin was used against its configured direction, or before being
    /// configured at all.
    InvalidPinState {
        pin: PinRef,
        configured: Option<Direction>,
    },
    /// The static configuration was rejected.
    Config(ConfigError),
    /// `scan()` was called before a successful `init()`.
    NotInitialized,
}

impl Error {
    pub(crate) fn bus<E: embedded_hal::i2c::Error>(address: ExpanderAddress, err: E) -> Self {
        Error::Bus {
            address,
            kind: err.kind(),
        }
    }

    /// Transient, row-local failures that the scanner swallows.
    pub fn is_bus(&self) -> bool {
        matches!(self, Error::Bus { .. })
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Bus { address, kind } => write!(f, "bus error at {address}: {kind}"),
            Error::InvalidPinState {
                pin,
                configured: Some(direction),
            } => write!(f, "pin {pin} is configured as {direction:?}"),
            Error::InvalidPinState {
                pin,
                configured: None,
            } => write!(f, "pin {pin} was never configured"),
            Error::Config(err) => write!(f, "invalid configuration: {err}"),
            Error::NotInitialized => f.write_str("scan before init"),
        }
    }
}

impl core::error::Error for Error {}

/// Reasons a static configuration is rejected at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    AddressOutOfRange(u8),
    PinOutOfRange(u8),
    EmptyMatrix,
    TooManyRows(usize),
    TooManyColumns(usize),
    TooManyChips,
    TooManyPeripherals(usize),
    /// The same line appears twice, so it would need two directions.
    DuplicatePin(PinRef),
    /// A peripheral pin that is not on the peripheral's own expander.
    PinOffChip { pin: PinRef, expected: ExpanderAddress },
    /// A peripheral address is also used by another matrix.
    SharedAddress(ExpanderAddress),
    /// Two matrices claim the same logical row.
    OverlappingRows { row: usize },
    ZeroDebounce,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AddressOutOfRange(addr) => {
                write!(f, "address 0x{addr:02X} is not a 7-bit address")
            }
            ConfigError::PinOutOfRange(pin) => write!(f, "pin index {pin} is out of range 0-15"),
            ConfigError::EmptyMatrix => f.write_str("matrix has no rows or no columns"),
            ConfigError::TooManyRows(n) => write!(f, "{n} rows exceed the supported maximum"),
            ConfigError::TooManyColumns(n) => {
                write!(f, "{n} columns exceed the supported maximum")
            }
            ConfigError::TooManyChips => f.write_str("too many expander chips on the bus"),
            ConfigError::TooManyPeripherals(n) => write!(f, "{n} peripherals configured"),
            ConfigError::DuplicatePin(pin) => write!(f, "pin {pin} is used more than once"),
            ConfigError::PinOffChip { pin, expected } => {
                write!(f, "pin {pin} is not on the peripheral expander {expected}")
            }
            ConfigError::SharedAddress(addr) => {
                write!(f, "peripheral address {addr} is shared with another matrix")
            }
            ConfigError::OverlappingRows { row } => {
                write!(f, "logical row {row} is claimed by two matrices")
            }
            ConfigError::ZeroDebounce => f.write_str("debounce threshold must be at least 1"),
        }
    }
}
