//! Time sources for the scanner: a free-running TC1 clock and a busy-wait delay.

use avr_device::atmega32u4::TC1;
use embedded_hal::delay::DelayNs;
use usk_matrix::Clock;

/// 16MHz / 64 = 250kHz
const US_PER_TICK: u32 = 4;

/// Microsecond clock extended from the 16-bit TC1 counter.
///
/// The counter wraps every ~262ms, so `now_us` must be called more often
/// than that. The scan loop calls it every cycle.
pub struct Tc1Clock {
    tc1: TC1,
    last: u16,
    now: u32,
}

impl Tc1Clock {
    pub fn new(tc1: TC1) -> Self {
        // Normal mode, no compare outputs
        tc1.tccr1a.write(|w| unsafe { w.bits(0) });
        tc1.tccr1b.write(|w| w.cs1().prescale_64());
        tc1.tcnt1.write(|w| unsafe { w.bits(0) });
        Self {
            tc1,
            last: 0,
            now: 0,
        }
    }
}

impl Clock for Tc1Clock {
    fn now_us(&mut self) -> u32 {
        let count = self.tc1.tcnt1.read().bits();
        let ticks = count.wrapping_sub(self.last);
        self.last = count;
        self.now = self.now.wrapping_add(u32::from(ticks) * US_PER_TICK);
        self.now
    }
}

/// Busy-wait delay, approximate at 16MHz.
pub struct BusyDelay;

impl DelayNs for BusyDelay {
    fn delay_ns(&mut self, ns: u32) {
        // ~4 cycles per iteration, 250ns
        for _ in 0..ns.div_ceil(250) {
            unsafe { core::arch::asm!("nop") };
        }
    }
}
