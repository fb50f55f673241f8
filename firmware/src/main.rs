//! Scanning firmware for the right half of the split keyboard on an
//! ATmega32U4 (Teensy 2.0).
//!
//! The main matrix and the optional numpad both sit behind MCP23017
//! expanders on the TWI bus. The numpad is probed once at power-up; plugging
//! it in later needs a reset. Debounced key events drive the on-board LED,
//! lit while any key is held.

#![no_std]
#![no_main]
#![feature(asm_experimental_arch)]

mod i2c;
mod timer;

use avr_device::atmega32u4::{Peripherals, PORTD};
use embedded_hal::delay::DelayNs;
use usk_matrix::{boards, FnSink, KeyEvent, Keyboard, Mcp23017};

use i2c::Twi;
use timer::{BusyDelay, Tc1Clock};

/// Teensy on-board LED.
const LED: u8 = 0x40;

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    // Disable clock prescaler (CLKPR)
    dp.CPU.clkpr.write(|w| w.clkpce().set_bit());
    dp.CPU.clkpr.write(|w| unsafe { w.bits(0) }); // Prescaler = 1

    // PD6 output
    dp.PORTD.ddrd.modify(|r, w| unsafe { w.bits(r.bits() | LED) });

    let port = Mcp23017::new(Twi::new(dp.TWI));
    let mut delay = BusyDelay;
    let mut keyboard = match Keyboard::new(boards::USK_RIGHT, port, BusyDelay, Tc1Clock::new(dp.TC1))
    {
        Ok(keyboard) => keyboard,
        Err(_) => halt(&dp.PORTD, &mut delay),
    };
    if keyboard.init().is_err() {
        // Main matrix expander missing or not answering
        halt(&dp.PORTD, &mut delay);
    }

    let mut held: u16 = 0;
    loop {
        let mut sink = FnSink(|event: KeyEvent| {
            if event.pressed {
                held += 1;
            } else {
                held = held.saturating_sub(1);
            }
        });
        if keyboard.scan(&mut sink).is_err() {
            halt(&dp.PORTD, &mut delay);
        }
        set_led(&dp.PORTD, held > 0);

        delay.delay_ms(1);
    }
}

fn set_led(portd: &PORTD, on: bool) {
    portd.portd.modify(|r, w| {
        let bits = if on { r.bits() | LED } else { r.bits() & !LED };
        unsafe { w.bits(bits) }
    });
}

/// Blink forever.
fn halt(portd: &PORTD, delay: &mut BusyDelay) -> ! {
    loop {
        set_led(portd, true);
        delay.delay_ms(100);
        set_led(portd, false);
        delay.delay_ms(400);
    }
}
