//! Input-scanning core for split keyboards whose matrices sit behind I2C
//! GPIO expanders.
//!
//! On every poll cycle the main matrix and any peripheral found at boot are
//! strobed row by row through an [`ExpanderPort`], debounced per key, and the
//! resulting presses and releases are emitted in one ordered stream of
//! [`KeyEvent`]s in a merged row space.
//!
//! This crate is `no_std` so it can be used by both the AVR firmware and the
//! native CLI tool.

#![cfg_attr(not(test), no_std)]

pub mod boards;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod expander;
pub mod hotplug;
mod keyboard;
pub mod matrix;
pub mod sim;

pub use config::{
    Direction, ExpanderAddress, KeyboardConfig, Level, MatrixTopology, PeripheralConfig, PinRef,
};
pub use error::{ConfigError, Error};
pub use event::{EventSink, FnSink, KeyEvent};
pub use expander::{ExpanderPort, Mcp23017};
pub use hotplug::Attachment;
pub use keyboard::{Clock, Keyboard, ScanReport};
