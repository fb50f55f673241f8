//! GPIO expander access.
//!
//! [`ExpanderPort`] is the pin-level contract the scanner works against.
//! [`Mcp23017`] implements it for any number of MCP23017/MCP23018 chips on
//! one `embedded-hal` I2C bus.

use embedded_hal::i2c::{I2c, SevenBitAddress};
use heapless::{LinearMap, Vec};

use crate::config::{Direction, ExpanderAddress, Level, PinRef, MAX_CHIPS};
use crate::error::{ConfigError, Error};

/// Pin-level access to one or more expanders sharing a bus.
///
/// All calls block until the transaction completes or the bus driver gives
/// up, which surfaces as [`Error::Bus`].
pub trait ExpanderPort {
    /// Address-only write; `Ok` if a chip acknowledges at `address`.
    fn probe(&mut self, address: ExpanderAddress) -> Result<(), Error>;

    /// Set the direction of `pin`. Repeating a call is harmless.
    fn configure(&mut self, pin: PinRef, direction: Direction) -> Result<(), Error>;

    /// Drive an output pin.
    fn write(&mut self, pin: PinRef, level: Level) -> Result<(), Error>;

    /// Sample an input pin; `true` = high.
    fn read(&mut self, pin: PinRef) -> Result<bool, Error>;

    /// Sample several inputs at once. Bit `i` of the result is `pins[i]`.
    fn read_many(&mut self, pins: &[PinRef]) -> Result<u32, Error> {
        debug_assert!(pins.len() <= 32);
        let mut levels = 0;
        for (i, &pin) in pins.iter().enumerate() {
            if self.read(pin)? {
                levels |= 1 << i;
            }
        }
        Ok(levels)
    }
}

impl<T: ExpanderPort + ?Sized> ExpanderPort for &mut T {
    fn probe(&mut self, address: ExpanderAddress) -> Result<(), Error> {
        (**self).probe(address)
    }

    fn configure(&mut self, pin: PinRef, direction: Direction) -> Result<(), Error> {
        (**self).configure(pin, direction)
    }

    fn write(&mut self, pin: PinRef, level: Level) -> Result<(), Error> {
        (**self).write(pin, level)
    }

    fn read(&mut self, pin: PinRef) -> Result<bool, Error> {
        (**self).read(pin)
    }

    fn read_many(&mut self, pins: &[PinRef]) -> Result<u32, Error> {
        (**self).read_many(pins)
    }
}

// MCP23017 register addresses (IOCON.BANK = 0, default). Port B is always
// the port A register + 1.
pub(crate) const IODIRA: u8 = 0x00;
pub(crate) const GPPUA: u8 = 0x0C;
pub(crate) const GPIOA: u8 = 0x12;
pub(crate) const OLATA: u8 = 0x14;

const MAX_PORTS: usize = MAX_CHIPS * 2;

/// Register shadows for one chip.
#[derive(Clone, Copy)]
struct Chip {
    address: ExpanderAddress,
    /// Pins that have been configured at least once.
    configured: u16,
    /// Set bit = input. Power-on default is all inputs.
    iodir: u16,
    gppu: u16,
    /// Intended output levels.
    olat: u16,
}

impl Chip {
    const fn new(address: ExpanderAddress) -> Self {
        Self {
            address,
            configured: 0,
            iodir: 0xFFFF,
            gppu: 0,
            olat: 0,
        }
    }

    fn direction(&self, pin: PinRef) -> Option<Direction> {
        let mask = pin.mask();
        if self.configured & mask == 0 {
            None
        } else if self.iodir & mask != 0 {
            Some(Direction::Input {
                pull_up: self.gppu & mask != 0,
            })
        } else {
            Some(Direction::Output)
        }
    }
}

/// Register of the port `pin` lives on, and that port's byte of `image`.
fn port_byte(base: u8, pin: PinRef, image: u16) -> (u8, u8) {
    if pin.is_port_b() {
        (base + 1, (image >> 8) as u8)
    } else {
        (base, image as u8)
    }
}

/// MCP23017 driver for every expander on one bus.
///
/// Direction, pull-up and output latch registers are shadowed per chip, so a
/// single-pin change is one register write and never a read-modify-write.
pub struct Mcp23017<I2C> {
    i2c: I2C,
    chips: Vec<Chip, MAX_CHIPS>,
}

impl<I2C: I2c<SevenBitAddress>> Mcp23017<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            chips: Vec::new(),
        }
    }

    /// Give the bus back.
    pub fn release(self) -> I2C {
        self.i2c
    }

    pub fn bus(&self) -> &I2C {
        &self.i2c
    }

    pub fn bus_mut(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    /// Configured direction of `pin`, if any.
    pub fn direction(&self, pin: PinRef) -> Option<Direction> {
        self.chip(pin.address()).and_then(|chip| chip.direction(pin))
    }

    fn chip(&self, address: ExpanderAddress) -> Option<&Chip> {
        self.chips.iter().find(|chip| chip.address == address)
    }

    fn chip_index(&mut self, address: ExpanderAddress) -> Result<usize, Error> {
        if let Some(index) = self.chips.iter().position(|chip| chip.address == address) {
            return Ok(index);
        }
        self.chips
            .push(Chip::new(address))
            .map_err(|_| ConfigError::TooManyChips)?;
        Ok(self.chips.len() - 1)
    }

    fn expect(&self, pin: PinRef, output: bool) -> Result<usize, Error> {
        let index = self.chips.iter().position(|chip| chip.address == pin.address());
        let configured = index.and_then(|i| self.chips[i].direction(pin));
        match (index, configured) {
            (Some(i), Some(Direction::Output)) if output => Ok(i),
            (Some(i), Some(Direction::Input { .. })) if !output => Ok(i),
            _ => Err(Error::InvalidPinState { pin, configured }),
        }
    }

    fn write_register(&mut self, address: ExpanderAddress, reg: u8, value: u8) -> Result<(), Error> {
        self.i2c
            .write(address.get(), &[reg, value])
            .map_err(|e| Error::bus(address, e))
    }

    fn read_register(&mut self, address: ExpanderAddress, reg: u8) -> Result<u8, Error> {
        let mut buf = [0u8];
        self.i2c
            .write_read(address.get(), &[reg], &mut buf)
            .map_err(|e| Error::bus(address, e))?;
        Ok(buf[0])
    }
}

impl<I2C: I2c<SevenBitAddress>> ExpanderPort for Mcp23017<I2C> {
    fn probe(&mut self, address: ExpanderAddress) -> Result<(), Error> {
        self.i2c
            .write(address.get(), &[])
            .map_err(|e| Error::bus(address, e))
    }

    fn configure(&mut self, pin: PinRef, direction: Direction) -> Result<(), Error> {
        let index = self.chip_index(pin.address())?;
        let mut chip = self.chips[index];
        let mask = pin.mask();

        match direction {
            Direction::Output => {
                chip.iodir &= !mask;
                // A fresh output idles high so it never strobes before its
                // first write
                if chip.configured & mask == 0 {
                    chip.olat |= mask;
                }
                // Latch the intended level before the pin starts driving
                let (reg, value) = port_byte(OLATA, pin, chip.olat);
                self.write_register(chip.address, reg, value)?;
            }
            Direction::Input { pull_up } => {
                chip.iodir |= mask;
                if pull_up {
                    chip.gppu |= mask;
                } else {
                    chip.gppu &= !mask;
                }
                let (reg, value) = port_byte(GPPUA, pin, chip.gppu);
                self.write_register(chip.address, reg, value)?;
            }
        }

        let (reg, value) = port_byte(IODIRA, pin, chip.iodir);
        self.write_register(chip.address, reg, value)?;

        // Shadows only move once the chip has them
        chip.configured |= mask;
        self.chips[index] = chip;
        Ok(())
    }

    fn write(&mut self, pin: PinRef, level: Level) -> Result<(), Error> {
        let index = self.expect(pin, true)?;
        let chip = &mut self.chips[index];
        match level {
            Level::High => chip.olat |= pin.mask(),
            Level::Low => chip.olat &= !pin.mask(),
        }
        // The shadow keeps the intended level even if this write fails, so
        // the next write to the same port repairs it.
        let (address, olat) = (chip.address, chip.olat);
        let (reg, value) = port_byte(OLATA, pin, olat);
        self.write_register(address, reg, value)
    }

    fn read(&mut self, pin: PinRef) -> Result<bool, Error> {
        self.expect(pin, false)?;
        let (reg, _) = port_byte(GPIOA, pin, 0);
        let value = self.read_register(pin.address(), reg)?;
        Ok(value & (1 << (pin.pin() % 8)) != 0)
    }

    /// Reads each GPIO register involved once.
    fn read_many(&mut self, pins: &[PinRef]) -> Result<u32, Error> {
        debug_assert!(pins.len() <= 32);
        for &pin in pins {
            self.expect(pin, false)?;
        }

        let mut ports: LinearMap<(ExpanderAddress, u8), u8, MAX_PORTS> = LinearMap::new();
        let mut levels = 0;
        for (i, &pin) in pins.iter().enumerate() {
            let (reg, _) = port_byte(GPIOA, pin, 0);
            let key = (pin.address(), reg);
            let value = match ports.get(&key) {
                Some(&value) => value,
                None => {
                    let value = self.read_register(pin.address(), reg)?;
                    // Capacity covers every port of every chip
                    ports.insert(key, value).ok();
                    value
                }
            };
            if value & (1 << (pin.pin() % 8)) != 0 {
                levels |= 1 << i;
            }
        }
        Ok(levels)
    }
}
