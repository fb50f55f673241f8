//! Simulated expander bus for tests and trace replay.
//!
//! [`SimBus`] answers I2C like a set of MCP23017 chips and models the key
//! switches wired between their pins: a held key connects a strobe pin and a
//! sense pin, and an input reads low while it is connected to an output that
//! is driven low. Chips can be attached, detached, or told to fail upcoming
//! transactions.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};
use heapless::Vec;

use crate::config::{ExpanderAddress, KeyboardConfig, PinRef, MAX_CHIPS};
use crate::expander::{GPIOA, IODIRA, OLATA};
use crate::keyboard::Clock;

/// Keys that can be held at once.
pub const MAX_HELD: usize = 64;

const REGISTERS: usize = 0x16;

/// Register file of one simulated chip.
#[derive(Clone, Copy, Debug)]
pub struct SimChip {
    address: ExpanderAddress,
    present: bool,
    regs: [u8; REGISTERS],
    pointer: u8,
    skip: u32,
    fail: u32,
    transactions: u32,
}

impl SimChip {
    fn new(address: ExpanderAddress) -> Self {
        let mut chip = Self {
            address,
            present: true,
            regs: [0; REGISTERS],
            pointer: 0,
            skip: 0,
            fail: 0,
            transactions: 0,
        };
        chip.power_on();
        chip
    }

    fn power_on(&mut self) {
        self.regs = [0; REGISTERS];
        self.regs[IODIRA as usize] = 0xFF;
        self.regs[IODIRA as usize + 1] = 0xFF;
        self.pointer = 0;
    }

    /// Raw register contents. GPIO registers read back the latch here; use
    /// [`SimBus::level`] for pin levels.
    pub fn register(&self, reg: u8) -> u8 {
        self.regs.get(reg as usize).copied().unwrap_or(0)
    }

    fn image(&self, base: u8) -> u16 {
        u16::from_le_bytes([self.regs[base as usize], self.regs[base as usize + 1]])
    }

    pub fn address(&self) -> ExpanderAddress {
        self.address
    }

    /// Transactions this chip has acknowledged.
    pub fn transactions(&self) -> u32 {
        self.transactions
    }
}

/// A bus of simulated MCP23017 chips and the keys wired between them.
#[derive(Debug, Default)]
pub struct SimBus {
    chips: Vec<SimChip, MAX_CHIPS>,
    held: Vec<(PinRef, PinRef), MAX_HELD>,
    transactions: u32,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with every main-matrix chip present and, if `peripherals`,
    /// every peripheral chip too.
    pub fn for_config(config: &KeyboardConfig, peripherals: bool) -> Self {
        let mut bus = Self::new();
        for pin in config.main.pins() {
            bus.attach(pin.address());
        }
        if peripherals {
            for peripheral in config.peripherals {
                bus.attach(peripheral.address);
            }
        }
        bus
    }

    /// Plug a chip in. A chip that comes back starts from power-on state.
    pub fn attach(&mut self, address: ExpanderAddress) {
        match self.chips.iter_mut().find(|c| c.address == address) {
            Some(chip) if !chip.present => {
                chip.power_on();
                chip.present = true;
            }
            Some(_) => {}
            None => {
                // Only eight MCP23017 addresses exist
                self.chips.push(SimChip::new(address)).ok();
            }
        }
    }

    pub fn detach(&mut self, address: ExpanderAddress) {
        if let Some(chip) = self.chips.iter_mut().find(|c| c.address == address) {
            chip.present = false;
        }
    }

    pub fn is_attached(&self, address: ExpanderAddress) -> bool {
        self.chip(address).is_some()
    }

    /// The chip at `address`, if plugged in.
    pub fn chip(&self, address: ExpanderAddress) -> Option<&SimChip> {
        self.chips.iter().find(|c| c.address == address && c.present)
    }

    /// Fail the next `count` transactions addressed to `address`.
    pub fn fail_next(&mut self, address: ExpanderAddress, count: u32) {
        self.fail_after(address, 0, count);
    }

    /// Let `skip` transactions through, then fail `count`.
    pub fn fail_after(&mut self, address: ExpanderAddress, skip: u32, count: u32) {
        if let Some(chip) = self.chips.iter_mut().find(|c| c.address == address) {
            chip.skip = skip;
            chip.fail = count;
        }
    }

    /// Close the switch between two pins. Returns `false` if too many keys
    /// are held already.
    pub fn press(&mut self, a: PinRef, b: PinRef) -> bool {
        if self.is_held(a, b) {
            return true;
        }
        self.held.push((a, b)).is_ok()
    }

    pub fn release(&mut self, a: PinRef, b: PinRef) {
        self.held.retain(|&(x, y)| !((x, y) == (a, b) || (x, y) == (b, a)));
    }

    pub fn release_all(&mut self) {
        self.held.clear();
    }

    pub fn is_held(&self, a: PinRef, b: PinRef) -> bool {
        self.held
            .iter()
            .any(|&(x, y)| (x, y) == (a, b) || (x, y) == (b, a))
    }

    /// Transactions seen on the bus, failed ones included.
    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    /// Electrical level of `pin`, or `None` if its chip is not plugged in.
    ///
    /// Outputs follow their latch. Inputs read low when a held key connects
    /// them to an output driven low, otherwise high (pulled up or floating).
    pub fn level(&self, pin: PinRef) -> Option<bool> {
        let chip = self.chip(pin.address())?;
        if chip.image(IODIRA) & pin.mask() == 0 {
            return Some(chip.image(OLATA) & pin.mask() != 0);
        }
        let pulled_low = self
            .held
            .iter()
            .filter_map(|&(x, y)| match pin {
                p if p == x => Some(y),
                p if p == y => Some(x),
                _ => None,
            })
            .any(|other| self.drives_low(other));
        Some(!pulled_low)
    }

    fn drives_low(&self, pin: PinRef) -> bool {
        self.chip(pin.address()).is_some_and(|chip| {
            chip.image(IODIRA) & pin.mask() == 0 && chip.image(OLATA) & pin.mask() == 0
        })
    }

    fn gpio(&self, address: ExpanderAddress, port_b: bool) -> u8 {
        let mut value = 0;
        for bit in 0..8 {
            let pin = PinRef::new(address.get(), bit + if port_b { 8 } else { 0 });
            if self.level(pin).unwrap_or(true) {
                value |= 1 << bit;
            }
        }
        value
    }

    fn read_register(&self, index: usize, reg: u8) -> u8 {
        let chip = &self.chips[index];
        match reg {
            r if r == GPIOA || r == GPIOA + 1 => self.gpio(chip.address, r == GPIOA + 1),
            r => chip.register(r),
        }
    }

    fn write_register(&mut self, index: usize, reg: u8, value: u8) {
        let chip = &mut self.chips[index];
        // Writes to GPIO land in the output latch
        let reg = match reg {
            r if r == GPIOA || r == GPIOA + 1 => r + (OLATA - GPIOA),
            r => r,
        };
        if let Some(slot) = chip.regs.get_mut(reg as usize) {
            *slot = value;
        }
    }
}

impl ErrorType for SimBus {
    type Error = ErrorKind;
}

impl I2c<SevenBitAddress> for SimBus {
    fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transactions += 1;
        let index = self
            .chips
            .iter()
            .position(|c| c.address.get() == address && c.present)
            .ok_or(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))?;

        let chip = &mut self.chips[index];
        if chip.skip > 0 {
            chip.skip -= 1;
        } else if chip.fail > 0 {
            chip.fail -= 1;
            return Err(ErrorKind::Bus);
        }
        chip.transactions += 1;

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((&reg, data)) = bytes.split_first() else {
                        continue;
                    };
                    self.chips[index].pointer = reg;
                    for &value in data {
                        let reg = self.chips[index].pointer;
                        self.write_register(index, reg, value);
                        self.chips[index].pointer = reg.wrapping_add(1);
                    }
                }
                Operation::Read(buf) => {
                    for slot in buf.iter_mut() {
                        let reg = self.chips[index].pointer;
                        *slot = self.read_register(index, reg);
                        self.chips[index].pointer = reg.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Delay that returns immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDelay;

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Clock that advances a fixed step on every read.
#[derive(Clone, Copy, Debug)]
pub struct StepClock {
    now: u32,
    step: u32,
}

impl StepClock {
    pub const fn new(start: u32, step: u32) -> Self {
        Self { now: start, step }
    }
}

impl Clock for StepClock {
    fn now_us(&mut self) -> u32 {
        let now = self.now;
        self.now = self.now.wrapping_add(self.step);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expander::GPPUA;

    const ADDR: ExpanderAddress = ExpanderAddress::new(0x20);

    #[test]
    fn test_absent_chip_nacks() {
        let mut bus = SimBus::new();
        assert_eq!(
            bus.write(0x20, &[]),
            Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address))
        );
        bus.attach(ADDR);
        assert_eq!(bus.write(0x20, &[]), Ok(()));
        bus.detach(ADDR);
        assert!(bus.write(0x20, &[]).is_err());
        assert_eq!(bus.transactions(), 3);
    }

    #[test]
    fn test_register_pointer_auto_increments() {
        let mut bus = SimBus::new();
        bus.attach(ADDR);
        bus.write(0x20, &[GPPUA, 0x0F, 0xF0]).unwrap();
        let mut buf = [0u8; 2];
        bus.write_read(0x20, &[GPPUA], &mut buf).unwrap();
        assert_eq!(buf, [0x0F, 0xF0]);
    }

    #[test]
    fn test_held_key_pulls_input_low() {
        let mut bus = SimBus::new();
        bus.attach(ADDR);
        let strobe = PinRef::b(0x20, 0);
        let sense = PinRef::a(0x20, 3);
        // B0 output, latch low
        bus.write(0x20, &[IODIRA + 1, 0xFE]).unwrap();
        assert_eq!(bus.level(sense), Some(true));

        bus.press(strobe, sense);
        assert_eq!(bus.level(strobe), Some(false));
        assert_eq!(bus.level(sense), Some(false));
        let mut gpio = [0u8];
        bus.write_read(0x20, &[GPIOA], &mut gpio).unwrap();
        assert_eq!(gpio[0], 0xF7);

        bus.write(0x20, &[OLATA + 1, 0x01]).unwrap();
        assert_eq!(bus.level(sense), Some(true));
    }

    #[test]
    fn test_fault_injection() {
        let mut bus = SimBus::new();
        bus.attach(ADDR);
        bus.fail_after(ADDR, 1, 2);
        assert!(bus.write(0x20, &[]).is_ok());
        assert_eq!(bus.write(0x20, &[]), Err(ErrorKind::Bus));
        assert_eq!(bus.write(0x20, &[]), Err(ErrorKind::Bus));
        assert!(bus.write(0x20, &[]).is_ok());
    }

    #[test]
    fn test_reattached_chip_is_reset() {
        let mut bus = SimBus::new();
        bus.attach(ADDR);
        bus.write(0x20, &[IODIRA, 0x00]).unwrap();
        bus.detach(ADDR);
        bus.attach(ADDR);
        assert_eq!(bus.chip(ADDR).map(|c| c.register(IODIRA)), Some(0xFF));
    }

    #[test]
    fn test_step_clock() {
        let mut clock = StepClock::new(u32::MAX, 2);
        assert_eq!(clock.now_us(), u32::MAX);
        assert_eq!(clock.now_us(), 1);
    }
}
