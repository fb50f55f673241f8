//! The run-loop entry points: `init()` once, then `scan()` every tick.

use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::config::{KeyboardConfig, MAX_PERIPHERALS};
use crate::error::{ConfigError, Error};
use crate::event::EventSink;
use crate::expander::ExpanderPort;
use crate::hotplug::{Attachment, Peripheral};
use crate::matrix::Matrix;

/// Monotonic microsecond counter. Wraps at `u32::MAX`.
pub trait Clock {
    fn now_us(&mut self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_us(&mut self) -> u32 {
        (**self).now_us()
    }
}

/// What one poll cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub timestamp: u32,
    pub events: usize,
    /// Rows whose bus traffic failed and were carried forward.
    pub bus_errors: usize,
}

/// Main matrix plus optional peripherals behind one expander bus.
pub struct Keyboard<P, D, C> {
    config: KeyboardConfig,
    port: P,
    delay: D,
    clock: C,
    main: Matrix,
    peripherals: Vec<Peripheral, MAX_PERIPHERALS>,
    initialized: bool,
}

impl<P, D, C> Keyboard<P, D, C>
where
    P: ExpanderPort,
    D: DelayNs,
    C: Clock,
{
    /// Validates `config`; touches no hardware.
    pub fn new(config: KeyboardConfig, port: P, delay: D, clock: C) -> Result<Self, Error> {
        config.validate()?;

        let mut peripherals = Vec::new();
        for &peripheral in config.peripherals {
            peripherals
                .push(Peripheral::new(peripheral))
                .map_err(|_| ConfigError::TooManyPeripherals(config.peripherals.len()))?;
        }

        Ok(Self {
            main: Matrix::new(config.main, config.debounce),
            config,
            port,
            delay,
            clock,
            peripherals,
            initialized: false,
        })
    }

    /// Configure the main matrix, then probe every peripheral once.
    ///
    /// A bus error on the main matrix is returned and leaves the keyboard
    /// unusable; a missing peripheral is not an error.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }

        if let Err(err) = self.main.init(&mut self.port) {
            log::error!("{}: main matrix setup failed: {}", self.config.name, err);
            return Err(err);
        }
        for peripheral in self.peripherals.iter_mut() {
            peripheral.probe(&mut self.port, self.config.debounce);
        }

        log::info!(
            "{}: {} logical rows ready",
            self.config.name,
            self.logical_rows()
        );
        self.initialized = true;
        Ok(())
    }

    /// One poll cycle: scan and debounce every attached matrix, then emit
    /// the changes, main matrix first, under a single timestamp.
    pub fn scan<S: EventSink + ?Sized>(&mut self, sink: &mut S) -> Result<ScanReport, Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }

        let settle_us = self.config.settle_us;
        let mut bus_errors = self.main.scan(&mut self.port, &mut self.delay, settle_us)?;
        for peripheral in self.peripherals.iter_mut() {
            if let Some(matrix) = peripheral.matrix_mut() {
                bus_errors += matrix.scan(&mut self.port, &mut self.delay, settle_us)?;
            }
        }

        let timestamp = self.clock.now_us();
        let mut events = self.main.dispatch(timestamp, sink);
        for peripheral in self.peripherals.iter_mut() {
            if let Some(matrix) = peripheral.matrix_mut() {
                events += matrix.dispatch(timestamp, sink);
            }
        }

        Ok(ScanReport {
            timestamp,
            events,
            bus_errors,
        })
    }

    pub fn config(&self) -> &KeyboardConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Probe state of the peripheral at `index` in configuration order.
    pub fn attachment(&self, index: usize) -> Option<Attachment> {
        self.peripherals.get(index).map(Peripheral::attachment)
    }

    /// Debounced state of a key in logical coordinates.
    pub fn is_pressed(&self, row: usize, col: usize) -> bool {
        self.matrices()
            .find(|m| m.topology().logical_rows().contains(&row))
            .is_some_and(|m| m.is_pressed(row - m.topology().row_offset as usize, col))
    }

    /// Size of the merged row space given what is attached.
    pub fn logical_rows(&self) -> usize {
        self.matrices()
            .map(|m| m.topology().logical_rows().end)
            .max()
            .unwrap_or(0)
    }

    fn matrices(&self) -> impl Iterator<Item = &Matrix> + '_ {
        core::iter::once(&self.main).chain(self.peripherals.iter().filter_map(Peripheral::matrix))
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn release(self) -> (P, D, C) {
        (self.port, self.delay, self.clock)
    }
}
