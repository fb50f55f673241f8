//! Replays a scan trace through the real scanning core on a simulated bus.

use std::io::Write;

use anyhow::{bail, Context, Result};
use heapless::Vec as EventBuf;
use usk_matrix::config::MAX_EVENTS;
use usk_matrix::sim::{NoopDelay, SimBus, StepClock};
use usk_matrix::{Attachment, ExpanderAddress, KeyEvent, Keyboard, KeyboardConfig, Mcp23017};

use crate::trace::{parse_address, Step, Trace};

/// Simulated time between poll cycles.
const CYCLE_US: u32 = 1000;

/// Totals over a whole replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub cycles: u32,
    pub presses: usize,
    pub releases: usize,
    pub bus_errors: usize,
}

type SimKeyboard = Keyboard<Mcp23017<SimBus>, NoopDelay, StepClock>;

pub fn run(config: &KeyboardConfig, trace: &Trace, out: &mut impl Write) -> Result<Summary> {
    // Peripherals start unplugged; the trace attaches them
    let bus = SimBus::for_config(config, false);
    let mut keyboard = Keyboard::new(*config, Mcp23017::new(bus), NoopDelay, StepClock::new(0, CYCLE_US))
        .context("board configuration rejected")?;
    let mut summary = Summary::default();

    for (line, step) in &trace.steps {
        apply(&mut keyboard, step, out, &mut summary).with_context(|| format!("line {}", line))?;
    }

    writeln!(
        out,
        "{} cycles, {} presses, {} releases, {} row faults",
        summary.cycles, summary.presses, summary.releases, summary.bus_errors
    )?;
    Ok(summary)
}

fn apply(
    keyboard: &mut SimKeyboard,
    step: &Step,
    out: &mut impl Write,
    summary: &mut Summary,
) -> Result<()> {
    match step {
        Step::Attach(target) => {
            let address = resolve(keyboard.config(), target)?;
            keyboard.port_mut().bus_mut().attach(address);
        }
        Step::Detach(target) => {
            let address = resolve(keyboard.config(), target)?;
            keyboard.port_mut().bus_mut().detach(address);
        }
        Step::Boot => boot(keyboard, out)?,
        Step::Fault {
            address,
            count,
            skip,
        } => {
            let address = ExpanderAddress::new(*address);
            keyboard
                .port_mut()
                .bus_mut()
                .fail_after(address, *skip, *count);
        }
        Step::Hold { keys, cycles } => {
            if !keyboard.is_initialized() {
                boot(keyboard, out)?;
            }
            press(keyboard, keys)?;
            for _ in 0..*cycles {
                let mut events: EventBuf<KeyEvent, MAX_EVENTS> = EventBuf::new();
                let report = keyboard.scan(&mut events)?;
                summary.cycles += 1;
                summary.bus_errors += report.bus_errors;
                for event in &events {
                    if event.pressed {
                        summary.presses += 1;
                    } else {
                        summary.releases += 1;
                    }
                    writeln!(
                        out,
                        "t={} row={} col={} {}",
                        event.time,
                        event.row,
                        event.col,
                        if event.pressed { "press" } else { "release" }
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn boot(keyboard: &mut SimKeyboard, out: &mut impl Write) -> Result<()> {
    if keyboard.is_initialized() {
        return Ok(());
    }
    keyboard.init().context("main matrix did not initialize")?;
    for (i, peripheral) in keyboard.config().peripherals.iter().enumerate() {
        let state = match keyboard.attachment(i) {
            Some(Attachment::Attached(_)) => "attached",
            Some(Attachment::Absent) => "absent",
            Some(Attachment::NotProbed) | None => "not probed",
        };
        writeln!(out, "{} at {}: {}", peripheral.name, peripheral.address, state)?;
    }
    Ok(())
}

fn press(keyboard: &mut SimKeyboard, keys: &[(u8, u8)]) -> Result<()> {
    let config = *keyboard.config();
    let bus = keyboard.port_mut().bus_mut();
    bus.release_all();
    for &(row, col) in keys {
        let Some((strobe, sense)) = config.locate(row, col) else {
            bail!("no key at row {} col {} on {}", row, col, config.name);
        };
        if !bus.press(strobe, sense) {
            bail!("too many keys held");
        }
    }
    Ok(())
}

/// A peripheral name or a hex address.
fn resolve(config: &KeyboardConfig, target: &str) -> Result<ExpanderAddress> {
    if let Some(peripheral) = config.peripherals.iter().find(|p| p.name == target) {
        return Ok(peripheral.address);
    }
    Ok(ExpanderAddress::new(parse_address(target).with_context(|| {
        format!("`{}` is neither a peripheral of {} nor an address", target, config.name)
    })?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;
    use usk_matrix::boards;

    fn replay(text: &str) -> (Summary, String) {
        let trace = parse_trace(text).unwrap();
        let mut out = Vec::new();
        let summary = run(&boards::USK_RIGHT, &trace, &mut out).unwrap();
        (summary, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_press_and_release() {
        let (summary, out) = replay("hold 0,0 x10\nhold x10\n");
        assert_eq!(summary.cycles, 20);
        assert_eq!(summary.presses, 1);
        assert_eq!(summary.releases, 1);
        assert!(out.contains("t=9000 row=0 col=0 press"));
        assert!(out.contains("t=19000 row=0 col=0 release"));
        assert!(out.contains("numpad at 0x23: absent"));
    }

    #[test]
    fn test_numpad_attached_before_boot() {
        let (summary, out) = replay("attach numpad\nhold 6,1 x10\n");
        assert_eq!(summary.presses, 1);
        assert!(out.contains("numpad at 0x23: attached"));
        assert!(out.contains("row=6 col=1 press"));
    }

    #[test]
    fn test_numpad_attached_after_boot_is_ignored() {
        let (summary, _) = replay("boot\nattach numpad\nhold 6,1 x20\n");
        assert_eq!(summary.presses, 0);
    }

    #[test]
    fn test_fault_is_counted() {
        let (summary, _) = replay("hold\nfault 0x20 1\nhold\n");
        assert_eq!(summary.bus_errors, 1);
    }

    #[test]
    fn test_unknown_key_is_reported() {
        let trace = parse_trace("hold 20,0\n").unwrap();
        let err = run(&boards::USK_RIGHT, &trace, &mut Vec::new()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }
}
